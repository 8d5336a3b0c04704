//! JSON rendering. The output parses back into an identical conversation.

use codescope_core::error::{CodeScopeError, Result};
use codescope_core::types::Conversation;

pub fn to_json(conversation: &Conversation) -> Result<String> {
    serde_json::to_string_pretty(conversation)
        .map_err(|e| CodeScopeError::Export(format!("JSON encoding failed: {}", e)))
}

pub fn parse_json(json: &str) -> Result<Conversation> {
    serde_json::from_str(json).map_err(|e| CodeScopeError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use codescope_core::types::Message;

    #[test]
    fn test_round_trip_preserves_every_field() {
        let now = Utc::now();
        let mut conversation = Conversation::new(
            "4f1c",
            vec![
                Message::user("Line one\nline \"two\" ✓"),
                Message::assistant("```rust\nfn main() {}\n```"),
            ],
            now,
        );
        conversation.touch(now + Duration::milliseconds(1500));
        conversation.repo_path = Some("C:\\work\\repo".to_string());

        let parsed = parse_json(&to_json(&conversation).unwrap()).unwrap();
        assert_eq!(parsed, conversation);
    }

    #[test]
    fn test_round_trip_without_repository() {
        let conversation = Conversation::new("c2", vec![], Utc::now());
        let json = to_json(&conversation).unwrap();
        assert!(!json.contains("repoPath"));
        assert_eq!(parse_json(&json).unwrap(), conversation);
    }

    #[test]
    fn test_json_uses_camel_case_keys() {
        let conversation = Conversation::new("c3", vec![Message::user("hi")], Utc::now());
        let value: serde_json::Value =
            serde_json::from_str(&to_json(&conversation).unwrap()).unwrap();
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_some());
        assert_eq!(value["messages"][0]["role"], "user");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_json("{"), Err(CodeScopeError::Parse(_))));
    }
}
