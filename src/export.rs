use serde::Serialize;

use crate::session::{Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Text,
    Json,
    Markdown,
}

#[derive(Serialize)]
struct ExportedMessage<'a> {
    role: Role,
    content: &'a str,
}

pub fn as_text(message: &Message) -> String {
    message.content.clone()
}

pub fn as_json(message: &Message) -> String {
    let exported = ExportedMessage { role: message.role, content: &message.content };
    // Serializing a role and a string cannot fail.
    serde_json::to_string_pretty(&exported).unwrap_or_default()
}

pub fn as_markdown(message: &Message) -> String {
    format!("**{}:** {}", message.role, message.content)
}

pub fn render(message: &Message, format: ExportFormat) -> String {
    match format {
        ExportFormat::Text => as_text(message),
        ExportFormat::Json => as_json(message),
        ExportFormat::Markdown => as_markdown(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_each_format() {
        let msg = Message::new(Role::Assistant, "A closure \"captures\" state.");
        assert_eq!(render(&msg, ExportFormat::Text), "A closure \"captures\" state.");
        assert_eq!(
            render(&msg, ExportFormat::Markdown),
            "**assistant:** A closure \"captures\" state."
        );

        let json: serde_json::Value = serde_json::from_str(&render(&msg, ExportFormat::Json)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "role": "assistant", "content": "A closure \"captures\" state." })
        );
    }

    #[test]
    fn user_messages_keep_their_role() {
        let msg = Message::new(Role::User, "hi");
        assert_eq!(as_markdown(&msg), "**user:** hi");
        assert!(as_json(&msg).contains("\"role\": \"user\""));
    }
}
