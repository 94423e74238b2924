//! Ordered message sequence for one session.
//!
//! The timeline only stores committed state. A user message appended here is
//! visible immediately; if the turn it opened fails, `rollback_last_user`
//! removes it again. Single-flight per session is enforced by the orchestrator.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::session::{Message, Role};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTimeline {
    messages: Vec<Message>,
}

/// Trims user input, rejecting text that is empty afterwards.
pub fn normalize_input(text: &str) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    Ok(trimmed)
}

impl MessageTimeline {
    pub fn append_user(&mut self, text: &str) -> Result<Message, ValidationError> {
        let content = normalize_input(text)?;
        let msg = Message::new(Role::User, content);
        self.messages.push(msg.clone());
        Ok(msg)
    }

    pub fn append_assistant(&mut self, text: &str) -> Message {
        let msg = Message::new(Role::Assistant, text);
        self.messages.push(msg.clone());
        msg
    }

    /// Removes the last message if it is the user message `id`.
    ///
    /// Returns false (and changes nothing) when that message is already gone or
    /// has been answered, so repeating a rollback is harmless.
    pub fn rollback_last_user(&mut self, id: Uuid) -> bool {
        match self.messages.last() {
            Some(last) if last.id == id && last.role == Role::User => {
                self.messages.pop();
                true
            }
            _ => false,
        }
    }

    /// The most recent user message, if nothing has answered it yet.
    pub fn pending_user(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.role == Role::User)
    }

    /// A turn is complete when every user message is answered or is the latest entry.
    pub fn is_complete(&self) -> bool {
        let n = self.messages.len();
        self.messages.iter().enumerate().all(|(i, m)| {
            m.role != Role::User
                || i + 1 == n
                || self.messages[i + 1].role == Role::Assistant
        })
    }

    pub fn first_user(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == Role::User)
    }

    pub fn find(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
