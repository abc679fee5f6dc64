use flowboard_common::models::{ChatMessage, Role};

/// The conversation as the user sees it. Lives only as long as the session.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::user(text));
    }

    /// Show `text_so_far` as the assistant's reply: it replaces the last
    /// message when that one is already the assistant's, otherwise it starts
    /// a new assistant message.
    pub fn apply_assistant(&mut self, text_so_far: &str) {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                last.content.clear();
                last.content.push_str(text_so_far);
            }
            _ => self.messages.push(ChatMessage::assistant(text_so_far)),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last_assistant(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}
