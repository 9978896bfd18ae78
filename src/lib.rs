use std::sync::Arc;

pub mod config;
pub mod error;
pub mod schedule;
pub mod storage;
pub mod utils;
pub mod web;

use config::Config;
use schedule::TaskManager;

/// Shared handles threaded through the HTTP layer.
pub struct AppContext {
    pub config: Arc<Config>,
    pub task_manager: Arc<TaskManager>,
}

impl AppContext {
    pub fn new(config: Arc<Config>, task_manager: Arc<TaskManager>) -> Self {
        Self { config, task_manager }
    }
}
