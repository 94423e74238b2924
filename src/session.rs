use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timeline::MessageTimeline;

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";
const TITLE_PREFIX_CHARS: usize = 30;
const TITLE_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed message. Never mutated after it lands in a timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(alias = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    pub messages: MessageTimeline,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            messages: MessageTimeline::default(),
            created_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            title: self.title.clone(),
            created_at: self.created_at,
        }
    }

    /// Sets the title from the first user message the first time one exists.
    /// Returns whether the title changed.
    pub fn derive_title(&mut self) -> bool {
        if self.title != DEFAULT_SESSION_TITLE {
            return false;
        }
        match self.messages.first_user() {
            Some(first) => {
                self.title = title_from(&first.content);
                true
            }
            None => false,
        }
    }

    /// Rolls back the pending user message `id`.
    ///
    /// If the title was derived from that message it goes back to the default,
    /// so the next first message names the session. Explicit titles are kept.
    pub fn rollback_turn(&mut self, id: Uuid) -> bool {
        let titled_by_it = self
            .messages
            .first_user()
            .is_some_and(|m| m.id == id && self.title == title_from(&m.content));
        if !self.messages.rollback_last_user(id) {
            return false;
        }
        if titled_by_it {
            self.title = DEFAULT_SESSION_TITLE.to_string();
        }
        true
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

pub fn title_from(content: &str) -> String {
    let prefix: String = content.chars().take(TITLE_PREFIX_CHARS).collect();
    format!("{}{}", prefix, TITLE_ELLIPSIS)
}

/// Decodes one persisted session record. Records missing required fields yield `None`.
pub fn decode_session(raw: &str) -> Option<Session> {
    match serde_json::from_str::<Session>(raw) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(error = %e, "dropping unreadable session record");
            None
        }
    }
}
