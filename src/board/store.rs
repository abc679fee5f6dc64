use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use flowboard_common::models::{ChangeKind, NewTask, Task, TaskChange, TaskPatch};

use super::db::DbHandle;
use crate::errors::StoreError;

/// Capacity of the change broadcast channel. Slow subscribers lag and skip.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Task persistence on behalf of exactly one user.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All of the user's tasks, by position.
    async fn list(&self) -> Result<Vec<Task>, StoreError>;

    async fn insert(&self, task: NewTask) -> Result<Task, StoreError>;

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Server-side store over the SQLite board database.
#[derive(Clone)]
pub struct SqliteTaskStore {
    db: DbHandle,
    changes: broadcast::Sender<TaskChange>,
}

impl SqliteTaskStore {
    pub fn new(db: DbHandle) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { db, changes }
    }

    /// Change notifications for every user. Consumers filter by `user_id`.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskChange> {
        self.changes.subscribe()
    }

    pub fn for_user(&self, user_id: impl Into<String>) -> UserTasks {
        UserTasks {
            db: self.db.clone(),
            changes: self.changes.clone(),
            user_id: user_id.into(),
        }
    }
}

/// A [`SqliteTaskStore`] view scoped to one owner.
#[derive(Clone)]
pub struct UserTasks {
    db: DbHandle,
    changes: broadcast::Sender<TaskChange>,
    user_id: String,
}

impl UserTasks {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn notify(&self, event: ChangeKind, task_id: Uuid) {
        // No receivers is fine.
        let _ = self.changes.send(TaskChange {
            event,
            task_id,
            user_id: self.user_id.clone(),
        });
    }
}

#[async_trait]
impl TaskStore for UserTasks {
    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        let user_id = self.user_id.clone();
        self.db
            .call(move |db| db.list_tasks(&user_id))
            .await
            .map_err(StoreError::Database)
    }

    async fn insert(&self, task: NewTask) -> Result<Task, StoreError> {
        task.validate().map_err(StoreError::Invalid)?;
        let user_id = self.user_id.clone();
        let created = self
            .db
            .call(move |db| db.insert_task(&user_id, &task))
            .await
            .map_err(StoreError::Database)?;
        tracing::debug!(task_id = %created.id, user_id = %self.user_id, "task inserted");
        self.notify(ChangeKind::Insert, created.id);
        Ok(created)
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task, StoreError> {
        patch.validate().map_err(StoreError::Invalid)?;
        let user_id = self.user_id.clone();
        let updated = self
            .db
            .call(move |db| db.update_task(&user_id, id, &patch))
            .await
            .map_err(StoreError::Database)?
            .ok_or(StoreError::TaskNotFound { id })?;
        self.notify(ChangeKind::Update, id);
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let user_id = self.user_id.clone();
        let deleted = self
            .db
            .call(move |db| db.delete_task(&user_id, id))
            .await
            .map_err(StoreError::Database)?;
        if !deleted {
            return Err(StoreError::TaskNotFound { id });
        }
        self.notify(ChangeKind::Delete, id);
        Ok(())
    }
}
