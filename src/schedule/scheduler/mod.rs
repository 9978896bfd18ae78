mod task_manager;
mod worker;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub use task_manager::{validate_remote_path, TaskManager};
pub use worker::TaskWorker;

use crate::schedule::processors::Processor;

/// Holds the worker pool. The design deliberately runs one active
/// processing slot by default; concurrency is a configuration knob, not
/// a scaling strategy.
pub struct TaskScheduler {
    task_manager: Arc<TaskManager>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(task_manager: Arc<TaskManager>) -> Self {
        Self {
            task_manager,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub async fn spawn_worker(&self, processor: Arc<dyn Processor>) {
        let worker = TaskWorker::new(self.task_manager.clone(), processor);
        let handle = tokio::spawn(async move {
            worker.run().await;
        });
        self.workers.lock().await.push(handle);
    }

    pub async fn spawn_workers(&self, count: usize, processor: Arc<dyn Processor>) {
        for _ in 0..count.max(1) {
            self.spawn_worker(processor.clone()).await;
        }
    }

    pub async fn run(&self) -> Result<()> {
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            worker.await?;
        }
        Ok(())
    }
}
