use crate::schedule::types::Task;
use crate::storage::task::entity::Model as TaskModel;

impl TryFrom<TaskModel> for Task {
    type Error = serde_json::Error;

    fn try_from(model: TaskModel) -> Result<Self, Self::Error> {
        serde_json::from_str(&model.doc)
    }
}

impl TryFrom<&Task> for TaskModel {
    type Error = serde_json::Error;

    fn try_from(task: &Task) -> Result<Self, Self::Error> {
        Ok(TaskModel {
            id: task.id.clone(),
            client_id: task.client_id.clone(),
            status: task.status.as_str().to_string(),
            created_at: task.created_at,
            updated_at: task.updated_at,
            doc: serde_json::to_string(task)?,
            // The storage layer owns the token; a fresh model starts at zero.
            version: 0,
        })
    }
}
