use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use flowboard_common::models::{NewTask, Task, TaskChange, TaskPatch, TaskStatus, TaskSummary};

use crate::board::store::TaskStore;
use crate::errors::StoreError;

/// The board split into its two columns, each in list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Columns {
    pub todo: Vec<Task>,
    pub in_progress: Vec<Task>,
}

/// Transient in-memory copy of the user's tasks. Mutations go to the store
/// and the copy is refetched whole afterwards.
pub struct TaskCache<S> {
    store: Arc<S>,
    tasks: Arc<RwLock<Vec<Task>>>,
}

impl<S> Clone for TaskCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<S: TaskStore + 'static> TaskCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            tasks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Refetch everything. Returns the number of tasks now cached.
    pub async fn refresh(&self) -> Result<usize, StoreError> {
        let fresh = self.store.list().await?;
        let count = fresh.len();
        *self.tasks.write().await = fresh;
        Ok(count)
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        self.tasks.read().await.clone()
    }

    pub async fn columns(&self) -> Columns {
        let tasks = self.tasks.read().await;
        let mut columns = Columns::default();
        for task in tasks.iter() {
            match task.status {
                TaskStatus::Todo => columns.todo.push(task.clone()),
                TaskStatus::InProgress => columns.in_progress.push(task.clone()),
            }
        }
        columns
    }

    /// Board snapshot in the shape the chat endpoint expects.
    pub async fn summaries(&self) -> Vec<TaskSummary> {
        self.tasks.read().await.iter().map(TaskSummary::from).collect()
    }

    pub async fn add(&self, task: NewTask) -> Result<Task, StoreError> {
        let created = self.store.insert(task).await?;
        self.refresh().await?;
        Ok(created)
    }

    pub async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<Task, StoreError> {
        let updated = self.store.update(id, patch).await?;
        self.refresh().await?;
        Ok(updated)
    }

    pub async fn move_task(&self, id: Uuid, status: TaskStatus) -> Result<Task, StoreError> {
        self.update(id, TaskPatch::status(status)).await
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        self.store.delete(id).await?;
        self.refresh().await?;
        Ok(())
    }

    /// One-shot refresh after `delay`, in the background.
    pub fn schedule_refresh(&self, delay: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = cache.refresh().await {
                tracing::warn!("Scheduled task refresh failed: {}", e);
            }
        })
    }

    /// Refetch on every change notification until the feed ends or fails.
    /// `on_change` runs after each refetch.
    pub async fn follow<C, F>(&self, changes: C, mut on_change: F)
    where
        C: Stream<Item = Result<TaskChange, StoreError>> + Unpin,
        F: FnMut(&TaskChange),
    {
        let mut changes = changes;
        while let Some(next) = changes.next().await {
            match next {
                Ok(change) => {
                    if let Err(e) = self.refresh().await {
                        tracing::warn!("Task refresh after change failed: {}", e);
                    }
                    on_change(&change);
                }
                Err(e) => {
                    tracing::warn!("Change feed ended: {}", e);
                    break;
                }
            }
        }
    }
}
