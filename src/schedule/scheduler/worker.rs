use std::sync::Arc;

use anyhow::Result;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use super::TaskManager;
use crate::schedule::processors::Processor;

/// One processing slot. Polls for dispatched tasks, runs the processor,
/// and reports the terminal state back through the manager. Everything
/// long-running happens here, never in the request path.
pub struct TaskWorker {
    task_manager: Arc<TaskManager>,
    processor: Arc<dyn Processor>,
    interval: Duration,
}

impl TaskWorker {
    pub fn new(task_manager: Arc<TaskManager>, processor: Arc<dyn Processor>) -> Self {
        Self {
            task_manager,
            processor,
            interval: Duration::from_secs(1),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(&self) {
        loop {
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => sleep(self.interval).await,
                Err(e) => {
                    error!("Worker error: {}", e);
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Claims and processes one task. Returns whether a task was found.
    pub(crate) async fn process_next(&self) -> Result<bool> {
        let Some(task) = self.task_manager.claim_next().await? else {
            return Ok(false);
        };

        info!("Processing task {} ({})", task.id, task.input_path.display());

        match self.processor.process(&task.input_path).await {
            Ok(output) => {
                let completed = self.task_manager.complete(&task, output).await?;
                info!("Task {} finished as {}", completed.id, completed.status);
            }
            Err(e) => {
                error!("Processor failed on task {}: {}", task.id, e);
                self.task_manager.fail_task(&task.id, e.to_string()).await?;
            }
        }

        Ok(true)
    }
}
