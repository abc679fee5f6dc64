use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use flowboard_common::models::{
    Category, NewTask, Priority, Task, TaskPatch, TaskStatus, empty_category,
};

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct BoardDb {
    conn: Connection,
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.run_migrations().context("Failed to run migrations")?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    title TEXT NOT NULL CHECK (length(trim(title)) > 0),
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'todo'
                        CHECK (status IN ('todo', 'in_progress')),
                    priority TEXT NOT NULL DEFAULT 'medium'
                        CHECK (priority IN ('low', 'medium', 'high')),
                    category TEXT NOT NULL DEFAULT '',
                    due_date TEXT,
                    position INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_user_position ON tasks(user_id, position);
                ",
            )
            .context("Failed to create tasks table")?;
        Ok(())
    }

    // ── Task CRUD ─────────────────────────────────────────────────────

    /// All tasks owned by `user_id`, by position then insertion order.
    pub fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, title, description, status, priority, category, due_date, position, created_at, updated_at
                 FROM tasks WHERE user_id = ?1 ORDER BY position ASC, created_at ASC, rowid ASC",
            )
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![user_id], TaskRow::from_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let r = row.context("Failed to read task row")?;
            tasks.push(r.into_task()?);
        }
        Ok(tasks)
    }

    pub fn get_task(&self, user_id: &str, id: Uuid) -> Result<Option<Task>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, title, description, status, priority, category, due_date, position, created_at, updated_at
                 FROM tasks WHERE id = ?1 AND user_id = ?2",
            )
            .context("Failed to prepare get_task")?;
        let mut rows = stmt
            .query_map(params![id.to_string(), user_id], TaskRow::from_row)
            .context("Failed to query task")?;
        match rows.next() {
            Some(row) => {
                let r = row.context("Failed to read task row")?;
                Ok(Some(r.into_task()?))
            }
            None => Ok(None),
        }
    }

    pub fn insert_task(&self, user_id: &str, task: &NewTask) -> Result<Task> {
        let id = Uuid::new_v4();
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO tasks (id, user_id, title, description, status, priority, category, due_date, position, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    id.to_string(),
                    user_id,
                    task.title,
                    task.description,
                    task.status.as_str(),
                    task.priority.as_str(),
                    category_text(task.category.as_ref()),
                    task.due_date.map(|d| d.to_string()),
                    task.position,
                    now,
                ],
            )
            .context("Failed to insert task")?;
        self.get_task(user_id, id)?
            .context("Task not found after insert")
    }

    /// Apply the fields present in `patch`. Returns `None` when the task does
    /// not exist or belongs to another user.
    pub fn update_task(&self, user_id: &str, id: Uuid, patch: &TaskPatch) -> Result<Option<Task>> {
        if self.get_task(user_id, id)?.is_none() {
            return Ok(None);
        }

        // unchecked_transaction is safe here: DbHandle's Mutex already
        // guarantees single-threaded access to the connection.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let key = id.to_string();

        if let Some(title) = &patch.title {
            tx.execute("UPDATE tasks SET title = ?1 WHERE id = ?2", params![title, key])
                .context("Failed to update task title")?;
        }
        if let Some(description) = &patch.description {
            tx.execute(
                "UPDATE tasks SET description = ?1 WHERE id = ?2",
                params![description, key],
            )
            .context("Failed to update task description")?;
        }
        if let Some(status) = patch.status {
            tx.execute(
                "UPDATE tasks SET status = ?1 WHERE id = ?2",
                params![status.as_str(), key],
            )
            .context("Failed to update task status")?;
        }
        if let Some(priority) = patch.priority {
            tx.execute(
                "UPDATE tasks SET priority = ?1 WHERE id = ?2",
                params![priority.as_str(), key],
            )
            .context("Failed to update task priority")?;
        }
        if let Some(category) = &patch.category {
            tx.execute(
                "UPDATE tasks SET category = ?1 WHERE id = ?2",
                params![category_text(category.as_ref()), key],
            )
            .context("Failed to update task category")?;
        }
        if let Some(due_date) = &patch.due_date {
            tx.execute(
                "UPDATE tasks SET due_date = ?1 WHERE id = ?2",
                params![due_date.map(|d| d.to_string()), key],
            )
            .context("Failed to update task due date")?;
        }
        if let Some(position) = patch.position {
            tx.execute(
                "UPDATE tasks SET position = ?1 WHERE id = ?2",
                params![position, key],
            )
            .context("Failed to update task position")?;
        }
        tx.execute(
            "UPDATE tasks SET updated_at = ?1 WHERE id = ?2",
            params![now_timestamp(), key],
        )
        .context("Failed to touch task updated_at")?;

        tx.commit().context("Failed to commit task update")?;
        self.get_task(user_id, id)
    }

    pub fn delete_task(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user_id],
            )
            .context("Failed to delete task")?;
        Ok(count > 0)
    }
}

fn category_text(category: Option<&Category>) -> &'static str {
    category.map(Category::as_str).unwrap_or("")
}

struct TaskRow {
    id: String,
    user_id: String,
    title: String,
    description: String,
    status: String,
    priority: String,
    category: String,
    due_date: Option<String>,
    position: i32,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            category: row.get(6)?,
            due_date: row.get(7)?,
            position: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let id = Uuid::parse_str(&self.id).context("Failed to parse task id")?;
        let status = TaskStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task status")?;
        let priority = Priority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task priority")?;
        let category = empty_category::parse(Some(self.category.as_str()))
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task category")?;
        let due_date = self
            .due_date
            .as_deref()
            .map(|d| NaiveDate::from_str(d).context("Failed to parse task due date"))
            .transpose()?;

        Ok(Task {
            id,
            user_id: self.user_id,
            title: self.title,
            description: self.description,
            status,
            priority,
            category,
            due_date,
            position: self.position,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
