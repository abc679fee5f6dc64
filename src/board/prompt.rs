use flowboard_common::models::TaskSummary;

const INSTRUCTIONS: &str = "You are FlowBoard AI, a productivity assistant for a Kanban board app. You help users manage tasks and provide productivity insights.

You can:
1. Help users create tasks by using the create_task tool
2. Provide productivity insights based on their current board state
3. Give task management advice
4. Answer general productivity questions

When creating tasks, extract: title, description, priority (low/medium/high), category (Design/Dev/Media/Marketing/Research), status (todo/in_progress), and due_date (YYYY-MM-DD format).

Always be concise, helpful, and encouraging.";

/// Assistant instructions followed by the caller's board, one line per task.
pub fn system_prompt(tasks: &[TaskSummary]) -> String {
    let mut prompt = String::from(INSTRUCTIONS);
    if tasks.is_empty() {
        prompt.push_str("\n\nThe board currently has no tasks.");
        return prompt;
    }

    prompt.push_str("\n\nCurrent board tasks:");
    for task in tasks {
        prompt.push('\n');
        prompt.push_str(&summary_line(task));
    }
    prompt
}

fn summary_line(task: &TaskSummary) -> String {
    format!(
        "- \"{}\" [{}] priority:{} category:{} due:{}",
        task.title,
        task.status,
        task.priority,
        or_none(task.category.as_deref()),
        or_none(task.due_date.as_deref()),
    )
}

fn or_none(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => "none",
    }
}
