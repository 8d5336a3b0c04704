use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodeScopeError;

/// Title given to conversations that have no user message yet.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Number of characters of the first user message kept in a derived title.
pub const TITLE_MAX_CHARS: usize = 50;

// =============================================================================
// Messages and conversations
// =============================================================================

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
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

    /// Capitalized label used by exports.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation.
///
/// The content of the last assistant message is rewritten while its answer
/// streams in and is frozen once the stream closes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Empty assistant message that an incoming answer is written into.
    pub fn placeholder() -> Self {
        Self::assistant(String::new())
    }
}

/// A stored conversation.
///
/// `id` never changes after creation and `updated_at` never moves backwards
/// or before `created_at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<String>,
}

impl Conversation {
    /// Create a conversation with a title derived from its messages.
    pub fn new(id: impl Into<String>, messages: Vec<Message>, now: DateTime<Utc>) -> Self {
        let title = derive_title(&messages);
        Self {
            id: id.into(),
            title,
            messages,
            created_at: now,
            updated_at: now,
            repo_path: None,
        }
    }

    /// Advance `updated_at` to `now`, never moving it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at.max(self.created_at);
        self.updated_at = now.max(floor);
    }

    /// True if any user message has been recorded.
    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::User)
    }

    /// Case-insensitive match of `needle` (already lowercased) against the
    /// title or any message content.
    pub fn matches_lowercase(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self
                .messages
                .iter()
                .any(|m| m.content.to_lowercase().contains(needle))
    }
}

/// Derive a title from the first user message.
///
/// Keeps the first [`TITLE_MAX_CHARS`] characters and appends `...` when the
/// message was longer. Falls back to [`DEFAULT_TITLE`].
pub fn derive_title(messages: &[Message]) -> String {
    let Some(first) = messages.iter().find(|m| m.role == Role::User) else {
        return DEFAULT_TITLE.to_string();
    };
    let mut chars = first.content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

// =============================================================================
// Query modes and search results
// =============================================================================

/// How a submitted query is routed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryMode {
    /// Natural-language question answered by the retrieval/generation backend.
    #[default]
    Semantic,
    /// Literal or regular-expression match over the indexed files.
    ExactPattern,
    /// Typo-tolerant match above a similarity threshold.
    ApproximateText,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Semantic => "semantic",
            QueryMode::ExactPattern => "exact-pattern",
            QueryMode::ApproximateText => "approximate-text",
        }
    }

    /// True for the two batch search modes.
    pub fn is_search(&self) -> bool {
        !matches!(self, QueryMode::Semantic)
    }

    /// Guidance shown when a query in this mode produced nothing.
    pub fn empty_state_hint(&self) -> &'static str {
        match self {
            QueryMode::Semantic => {
                "Ask a question about the indexed repository. Open a repository first so answers are grounded in its code."
            }
            QueryMode::ExactPattern => {
                "No matches. Exact search uses case-insensitive regular expressions: escape special characters such as ( ) [ ] . * with a backslash."
            }
            QueryMode::ApproximateText => {
                "No matches. Try fewer words or lower the similarity threshold to allow more typos."
            }
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = CodeScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "semantic" | "chat" | "ask" => Ok(QueryMode::Semantic),
            "exact" | "exact-pattern" | "regex" | "pattern" => Ok(QueryMode::ExactPattern),
            "fuzzy" | "approximate" | "approximate-text" => Ok(QueryMode::ApproximateText),
            other => Err(CodeScopeError::Config(format!("unknown query mode: {}", other))),
        }
    }
}

/// A single matching line returned by a search endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Path of the file, relative to the repository root.
    pub file: String,
    /// 1-based line number of the match.
    pub line_number: u64,
    pub line_content: String,
    /// Lines immediately before the match, oldest first.
    #[serde(default)]
    pub context_before: Vec<String>,
    /// Lines immediately after the match.
    #[serde(default)]
    pub context_after: Vec<String>,
}

/// The current search result set, tagged with the mode that produced it.
///
/// Replaced wholesale by every search; never merged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultSet {
    pub mode: QueryMode,
    pub results: Vec<SearchResult>,
    pub total_matches: u64,
    /// Message of the failure that cleared the set, if any.
    pub error: Option<String>,
}

impl SearchResultSet {
    pub fn new(mode: QueryMode, results: Vec<SearchResult>, total_matches: u64) -> Self {
        Self {
            mode,
            results,
            total_matches,
            error: None,
        }
    }

    /// Empty set recording a failed search.
    pub fn failed(mode: QueryMode, message: impl Into<String>) -> Self {
        Self {
            mode,
            results: Vec::new(),
            total_matches: 0,
            error: Some(message.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

// =============================================================================
// Remote files
// =============================================================================

/// Whether a remote path is a file or a directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Directory,
}

/// One entry of a directory listing as sent by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub path: String,
}

/// A node of the lazily materialized file tree.
///
/// `children` stays `None` until a directory is first expanded; after that
/// `loaded` is true for the lifetime of the node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FileNode>>,
    #[serde(default)]
    pub loaded: bool,
}

impl FileNode {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

impl From<FileEntry> for FileNode {
    fn from(entry: FileEntry) -> Self {
        Self {
            name: entry.name,
            kind: entry.kind,
            path: entry.path,
            children: None,
            loaded: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_derive_title_short_message() {
        let title = derive_title(&[Message::user("hello")]);
        assert_eq!(title, "hello");
    }

    #[test]
    fn test_derive_title_truncates_long_message() {
        let long = "a".repeat(120);
        let title = derive_title(&[Message::user(long)]);
        assert_eq!(title, format!("{}...", "a".repeat(50)));
    }

    #[test]
    fn test_derive_title_exactly_fifty_chars_has_no_ellipsis() {
        let exact = "b".repeat(50);
        assert_eq!(derive_title(&[Message::user(exact.clone())]), exact);
    }

    #[test]
    fn test_derive_title_counts_chars_not_bytes() {
        let text = "\u{00e9}".repeat(60);
        let title = derive_title(&[Message::user(text)]);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_derive_title_skips_assistant_messages() {
        let messages = vec![Message::assistant("Welcome!"), Message::user("where is main?")];
        assert_eq!(derive_title(&messages), "where is main?");
    }

    #[test]
    fn test_derive_title_default_without_user_message() {
        assert_eq!(derive_title(&[]), DEFAULT_TITLE);
        assert_eq!(derive_title(&[Message::assistant("hi")]), DEFAULT_TITLE);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let now = Utc::now();
        let mut conv = Conversation::new("c1", vec![], now);
        conv.touch(now - Duration::seconds(30));
        assert_eq!(conv.updated_at, now);
        conv.touch(now + Duration::seconds(5));
        assert_eq!(conv.updated_at, now + Duration::seconds(5));
        assert!(conv.updated_at >= conv.created_at);
    }

    #[test]
    fn test_conversation_json_uses_camel_case() {
        let mut conv = Conversation::new("c1", vec![Message::user("hi")], Utc::now());
        conv.repo_path = Some("/tmp/repo".to_string());
        let json = serde_json::to_value(&conv).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json["repoPath"], "/tmp/repo");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_conversation_without_repo_path_omits_field() {
        let conv = Conversation::new("c1", vec![], Utc::now());
        let json = serde_json::to_value(&conv).unwrap();
        assert!(json.get("repoPath").is_none());
        let back: Conversation = serde_json::from_value(json).unwrap();
        assert_eq!(back, conv);
    }

    #[test]
    fn test_matches_lowercase() {
        let conv = Conversation::new(
            "c1",
            vec![Message::user("Explain the Parser"), Message::assistant("It tokenizes")],
            Utc::now(),
        );
        assert!(conv.matches_lowercase("parser"));
        assert!(conv.matches_lowercase("tokeniz"));
        assert!(!conv.matches_lowercase("lexer"));
    }

    #[test]
    fn test_query_mode_from_str() {
        assert_eq!("semantic".parse::<QueryMode>().unwrap(), QueryMode::Semantic);
        assert_eq!("Regex".parse::<QueryMode>().unwrap(), QueryMode::ExactPattern);
        assert_eq!("exact".parse::<QueryMode>().unwrap(), QueryMode::ExactPattern);
        assert_eq!(" fuzzy ".parse::<QueryMode>().unwrap(), QueryMode::ApproximateText);
        assert!("vector".parse::<QueryMode>().is_err());
    }

    #[test]
    fn test_query_mode_serde_kebab_case() {
        let json = serde_json::to_string(&QueryMode::ApproximateText).unwrap();
        assert_eq!(json, "\"approximate-text\"");
        assert!(QueryMode::ExactPattern.is_search());
        assert!(!QueryMode::Semantic.is_search());
    }

    #[test]
    fn test_empty_state_hints_differ_by_mode() {
        let hints = [
            QueryMode::Semantic.empty_state_hint(),
            QueryMode::ExactPattern.empty_state_hint(),
            QueryMode::ApproximateText.empty_state_hint(),
        ];
        assert_ne!(hints[0], hints[1]);
        assert_ne!(hints[1], hints[2]);
    }

    #[test]
    fn test_search_result_context_defaults() {
        let json = r#"{"file":"src/main.rs","line_number":3,"line_content":"fn main() {"}"#;
        let result: SearchResult = serde_json::from_str(json).unwrap();
        assert!(result.context_before.is_empty());
        assert!(result.context_after.is_empty());
    }

    #[test]
    fn test_search_result_set_failed_is_cleared() {
        let set = SearchResultSet::failed(QueryMode::ExactPattern, "Invalid regex");
        assert!(set.is_empty());
        assert_eq!(set.total_matches, 0);
        assert_eq!(set.error.as_deref(), Some("Invalid regex"));
    }

    #[test]
    fn test_file_entry_wire_shape() {
        let json = r#"[{"name":"src","type":"directory","path":"/r/src"},{"name":"a.py","type":"file","path":"/r/a.py"}]"#;
        let entries: Vec<FileEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].kind, FileKind::Directory);
        let node = FileNode::from(entries[1].clone());
        assert!(!node.is_dir());
        assert!(!node.loaded);
        assert!(node.children.is_none());
    }
}
