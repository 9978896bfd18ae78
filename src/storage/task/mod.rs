use anyhow::Result;
use async_trait::async_trait;

use crate::schedule::types::Task;

pub mod entity;
pub mod mapping;
pub mod sqlite;

/// Mutation applied under the registry's compare-and-set primitive. May
/// be re-run on contention, so it must be a pure function of the task.
pub type TaskMutator = Box<dyn Fn(&mut Task) -> Result<()> + Send + Sync>;

/// Durable key-value registry of task metadata. The single source of
/// truth for task status; all mutation goes through `update` so racing
/// writers can never lose each other's changes.
#[async_trait]
pub trait TaskStorage: Send + Sync + 'static {
    /// Fails with `ServiceError::AlreadyExists` on id collision.
    async fn create(&self, task: &Task) -> Result<()>;
    async fn get(&self, task_id: &str) -> Result<Option<Task>>;
    /// Atomic read-mutate-write. Fails with `ServiceError::NotFound` if
    /// the record is absent; returns the record as written.
    async fn update(&self, task_id: &str, mutate: TaskMutator) -> Result<Task>;
    /// Idempotent; returns whether a record existed.
    async fn delete(&self, task_id: &str) -> Result<bool>;
    /// Snapshot scan of all ids. Holds no lock across the enumeration,
    /// so concurrent updates proceed while a sweep iterates.
    async fn list_ids(&self) -> Result<Vec<String>>;
    /// Oldest task waiting for a worker, if any.
    async fn next_dispatched(&self) -> Result<Option<Task>>;
    async fn count(&self) -> Result<u64>;
    async fn count_queued(&self) -> Result<u64>;
}
