pub mod processors;
pub mod reaper;
pub mod scheduler;
pub mod types;

pub use types::{
    ArtifactFormat, InputSource, OutputRef, ReleaseReport, SubmissionKind, Task, TaskStatus,
};

pub use processors::{Processor, ProcessorOutput, TranscribeProcessor};
pub use reaper::{ExpiryReaper, SweepStats};
pub use scheduler::{TaskManager, TaskScheduler, TaskWorker};

#[cfg(test)]
mod tests;
