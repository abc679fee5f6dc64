//! Board commands against a running server: `board`, `watch`, `add`,
//! `move` and `rm`.

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use console::style;
use dialoguer::Confirm;
use uuid::Uuid;

use flowboard::client::cache::{Columns, TaskCache};
use flowboard::client::http::HttpTaskStore;
use flowboard::config::BoardConfig;
use flowboard_common::models::{Category, NewTask, Priority, Task, TaskStatus};

use super::super::AddArgs;

pub(crate) fn connect(config: &BoardConfig) -> Result<TaskCache<HttpTaskStore>> {
    let token = config.require_token()?;
    Ok(TaskCache::new(HttpTaskStore::new(&config.server_url, token)))
}

pub(crate) fn print_columns(columns: &Columns) {
    print_column("To Do", &columns.todo);
    print_column("In Progress", &columns.in_progress);
}

fn print_column(name: &str, tasks: &[Task]) {
    println!();
    println!("{} {}", style(name).bold(), style(format!("({})", tasks.len())).dim());
    if tasks.is_empty() {
        println!("  {}", style("(empty)").dim());
    }
    for task in tasks {
        println!("  {}", task_line(task));
    }
}

fn task_line(task: &Task) -> String {
    let short_id = &task.id.simple().to_string()[..8];
    let priority = match task.priority {
        Priority::High => style(task.priority.as_str()).red(),
        Priority::Medium => style(task.priority.as_str()).yellow(),
        Priority::Low => style(task.priority.as_str()).dim(),
    };
    let mut line = format!("{} {} [{}]", style(short_id).dim(), task.title, priority);
    if let Some(category) = task.category {
        line.push_str(&format!(" {}", style(format!("#{}", category.as_str())).cyan()));
    }
    if let Some(due) = task.due_date {
        line.push_str(&format!(" {}", style(format!("due {}", due)).dim()));
    }
    line
}

/// Full id or a unique prefix of one (as printed by `board`).
fn resolve_id(tasks: &[Task], needle: &str) -> Result<Uuid> {
    if let Ok(id) = Uuid::parse_str(needle) {
        return Ok(id);
    }
    let needle = needle.to_lowercase().replace('-', "");
    let matches: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.id.simple().to_string().starts_with(&needle))
        .collect();
    match matches.as_slice() {
        [task] => Ok(task.id),
        [] => bail!("No task matches '{}'", needle),
        _ => bail!("'{}' matches {} tasks; use more characters", needle, matches.len()),
    }
}

pub async fn cmd_board(config: &BoardConfig) -> Result<()> {
    let cache = connect(config)?;
    cache.refresh().await?;
    print_columns(&cache.columns().await);
    Ok(())
}

pub async fn cmd_watch(config: &BoardConfig) -> Result<()> {
    let cache = connect(config)?;
    cache.refresh().await?;
    print_columns(&cache.columns().await);

    let changes = cache.store().changes().await?;
    println!();
    println!("{}", style("Watching for changes (Ctrl+C to stop)...").dim());

    let printer = cache.clone();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let follower = tokio::spawn(async move {
        printer
            .follow(changes, |change| {
                let _ = tx.send(change.clone());
            })
            .await;
    });

    while let Some(change) = rx.recv().await {
        println!();
        println!(
            "{} {:?} {}",
            style("●").cyan(),
            change.event,
            style(change.task_id).dim()
        );
        print_columns(&cache.columns().await);
    }
    follower.await.context("Change follower panicked")?;
    println!("{}", style("Change feed closed").yellow());
    Ok(())
}

pub async fn cmd_add(config: &BoardConfig, args: &AddArgs) -> Result<()> {
    let mut task = NewTask::titled(args.title.clone());
    if let Some(description) = &args.description {
        task.description = description.clone();
    }
    if let Some(status) = &args.status {
        task.status = status.parse::<TaskStatus>().map_err(|e| anyhow!(e))?;
    }
    if let Some(priority) = &args.priority {
        task.priority = priority.parse::<Priority>().map_err(|e| anyhow!(e))?;
    }
    if let Some(category) = &args.category {
        task.category = Some(category.parse::<Category>().map_err(|e| anyhow!(e))?);
    }
    if let Some(due) = &args.due {
        task.due_date = Some(
            NaiveDate::parse_from_str(due, "%Y-%m-%d")
                .with_context(|| format!("Invalid due date '{}', expected YYYY-MM-DD", due))?,
        );
    }

    let cache = connect(config)?;
    let created = cache.add(task).await?;
    println!("{} Created {}", style("✓").green(), task_line(&created));
    Ok(())
}

pub async fn cmd_move(config: &BoardConfig, id: &str, status: &str) -> Result<()> {
    let status = status.parse::<TaskStatus>().map_err(|e| anyhow!(e))?;
    let cache = connect(config)?;
    cache.refresh().await?;
    let id = resolve_id(&cache.snapshot().await, id)?;

    let moved = cache.store().move_to(id, status).await?;
    cache.refresh().await?;
    println!(
        "{} Moved {} to {}",
        style("✓").green(),
        moved.title,
        style(moved.status.as_str()).bold()
    );
    Ok(())
}

pub async fn cmd_rm(config: &BoardConfig, id: &str, yes: bool) -> Result<()> {
    let cache = connect(config)?;
    cache.refresh().await?;
    let tasks = cache.snapshot().await;
    let id = resolve_id(&tasks, id)?;
    let title = tasks
        .iter()
        .find(|t| t.id == id)
        .map(|t| t.title.clone())
        .unwrap_or_else(|| id.to_string());

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete '{}'?", title))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    cache.remove(id).await?;
    println!("{} Deleted {}", style("✓").green(), title);
    Ok(())
}
