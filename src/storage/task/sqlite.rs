use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::{TaskMutator, TaskStorage};
use crate::error::ServiceError;
use crate::schedule::types::{Task, TaskStatus};
use crate::storage::task::entity::Model as TaskModel;

const CAS_MAX_RETRIES: usize = 8;

pub struct SqliteTaskStorage {
    pool: SqlitePool,
}

impl SqliteTaskStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Initializing SQLite task registry at {}", database_url);
        let pool = SqlitePool::connect(database_url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                doc TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn row_to_model(row: &sqlx::sqlite::SqliteRow) -> TaskModel {
        TaskModel {
            id: row.get("id"),
            client_id: row.get("client_id"),
            status: row.get("status"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
            doc: row.get("doc"),
            version: row.get("version"),
        }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
        let task = Task::try_from(Self::row_to_model(row))?;
        Ok(task)
    }
}

#[async_trait]
impl TaskStorage for SqliteTaskStorage {
    async fn create(&self, task: &Task) -> Result<()> {
        let model = TaskModel::try_from(task)?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (id, client_id, status, created_at, updated_at, doc, version)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.id)
        .bind(&model.client_id)
        .bind(&model.status)
        .bind(model.created_at)
        .bind(model.updated_at)
        .bind(&model.doc)
        .bind(model.version)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db))
                if db.kind() == sqlx::error::ErrorKind::UniqueViolation =>
            {
                Err(ServiceError::AlreadyExists(format!("task {}", task.id)).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn update(&self, task_id: &str, mutate: TaskMutator) -> Result<Task> {
        // Optimistic compare-and-set on the version column. The mutator
        // re-runs from a fresh read on contention, so no writer ever
        // overwrites a state it has not seen.
        for _ in 0..CAS_MAX_RETRIES {
            let row = sqlx::query("SELECT doc, version FROM tasks WHERE id = ?")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;
            let Some(row) = row else {
                return Err(ServiceError::NotFound(format!("task {}", task_id)).into());
            };

            let doc: String = row.get("doc");
            let version: i64 = row.get("version");
            let mut task: Task = serde_json::from_str(&doc)?;
            mutate(&mut task)?;
            task.updated_at = Utc::now();

            let doc = serde_json::to_string(&task)?;
            let result = sqlx::query(
                r#"
                UPDATE tasks
                SET status = ?, updated_at = ?, doc = ?, version = ?
                WHERE id = ? AND version = ?
                "#,
            )
            .bind(task.status.as_str())
            .bind(task.updated_at)
            .bind(&doc)
            .bind(version + 1)
            .bind(task_id)
            .bind(version)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(task);
            }
        }

        Err(anyhow!("update of task {} lost the race {} times, giving up", task_id, CAS_MAX_RETRIES))
    }

    async fn delete(&self, task_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM tasks")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    async fn next_dispatched(&self) -> Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT * FROM tasks WHERE status = ? ORDER BY created_at ASC LIMIT 1",
        )
        .bind(TaskStatus::PendingDispatched.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_queued(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status IN (?, ?)")
            .bind(TaskStatus::PendingReceived.as_str())
            .bind(TaskStatus::PendingDispatched.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
