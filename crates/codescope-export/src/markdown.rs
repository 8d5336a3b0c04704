//! Markdown rendering.

use chrono::{DateTime, Local, Utc};

use codescope_core::types::{Conversation, Role};

/// Render a conversation as a Markdown document.
pub fn to_markdown(conversation: &Conversation) -> String {
    let mut out = String::new();

    out.push_str(&format!("# {}\n\n", conversation.title));
    out.push_str(&format!("**Created:** {}  \n", local_time(&conversation.created_at)));
    out.push_str(&format!("**Updated:** {}  \n", local_time(&conversation.updated_at)));
    if let Some(repo) = &conversation.repo_path {
        out.push_str(&format!("**Repository:** `{}`  \n", repo));
    }
    out.push_str("\n---\n\n");

    let blocks: Vec<String> = conversation
        .messages
        .iter()
        .map(|m| format!("## {} {}\n\n{}\n", role_icon(m.role), m.role.label(), m.content))
        .collect();
    out.push_str(&blocks.join("\n---\n\n"));

    out
}

fn role_icon(role: Role) -> &'static str {
    match role {
        Role::User => "👤",
        Role::Assistant => "🤖",
    }
}

fn local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use codescope_core::types::Message;

    fn conversation() -> Conversation {
        let mut c = Conversation::new(
            "c1",
            vec![
                Message::user("Where is the lexer?"),
                Message::assistant("In `src/lexer.rs`."),
            ],
            Utc::now(),
        );
        c.repo_path = Some("/work/compiler".to_string());
        c
    }

    #[test]
    fn test_markdown_header_and_metadata() {
        let md = to_markdown(&conversation());
        assert!(md.starts_with("# Where is the lexer?\n"));
        assert!(md.contains("**Created:** "));
        assert!(md.contains("**Updated:** "));
        assert!(md.contains("**Repository:** `/work/compiler`"));
    }

    #[test]
    fn test_markdown_message_blocks_separated_by_rules() {
        let md = to_markdown(&conversation());
        let user = md.find("## 👤 User").unwrap();
        let rule = md[user..].find("\n---\n").map(|i| i + user).unwrap();
        let assistant = md.find("## 🤖 Assistant").unwrap();
        assert!(user < rule && rule < assistant);
        assert!(md.contains("In `src/lexer.rs`."));
        assert!(!md.ends_with("---\n\n"));
    }

    #[test]
    fn test_markdown_without_repository() {
        let mut c = conversation();
        c.repo_path = None;
        assert!(!to_markdown(&c).contains("Repository"));
    }
}
