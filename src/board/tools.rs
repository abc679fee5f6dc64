//! The `create_task` function the model may call.

use std::str::FromStr;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};

use flowboard_common::models::{Category, NewTask};

pub const CREATE_TASK: &str = "create_task";

/// Tool declaration sent with every upstream request.
pub fn create_task_tool() -> Value {
    let categories: Vec<&str> = Category::ALL.iter().map(Category::as_str).collect();
    json!({
        "type": "function",
        "function": {
            "name": CREATE_TASK,
            "description": "Create a new task on the Kanban board",
            "parameters": {
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Task title" },
                    "description": { "type": "string", "description": "Task description" },
                    "priority": { "type": "string", "enum": ["low", "medium", "high"] },
                    "category": { "type": "string", "enum": categories },
                    "status": {
                        "type": "string",
                        "enum": ["todo", "in_progress"],
                        "description": "Column to place the task in"
                    },
                    "due_date": { "type": "string", "description": "Due date in YYYY-MM-DD format" }
                },
                "required": ["title", "priority", "status"],
                "additionalProperties": false
            }
        }
    })
}

/// Arguments as the model produced them. Every field is loose text so a
/// single bad enum value degrades to its default instead of losing the task.
#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskArgs {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
}

impl CreateTaskArgs {
    /// Parse the concatenated argument fragments.
    pub fn parse(arguments: &str) -> Result<Self, String> {
        serde_json::from_str(arguments).map_err(|e| format!("Invalid tool arguments: {}", e))
    }

    /// Apply defaults: description `""`, priority `medium`, no category,
    /// status `todo`, no due date, position 0. A missing title is an error.
    pub fn into_new_task(self) -> Result<NewTask, String> {
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| "Tool call has no title".to_string())?;

        Ok(NewTask {
            title,
            description: self.description.unwrap_or_default(),
            status: lenient("status", self.status.as_deref()),
            priority: lenient("priority", self.priority.as_deref()),
            category: self.category.as_deref().and_then(|c| {
                if c.is_empty() {
                    return None;
                }
                Category::from_str(c)
                    .map_err(|e| tracing::warn!("Ignoring tool category: {}", e))
                    .ok()
            }),
            due_date: self.due_date.as_deref().and_then(|d| {
                if d.is_empty() {
                    return None;
                }
                NaiveDate::parse_from_str(d, "%Y-%m-%d")
                    .map_err(|e| tracing::warn!(due_date = d, "Ignoring tool due date: {}", e))
                    .ok()
            }),
            position: 0,
        })
    }
}

fn lenient<T>(field: &str, raw: Option<&str>) -> T
where
    T: FromStr<Err = String> + Default,
{
    match raw {
        None | Some("") => T::default(),
        Some(value) => T::from_str(value).unwrap_or_else(|e| {
            tracing::warn!(field, "{}; using default", e);
            T::default()
        }),
    }
}
