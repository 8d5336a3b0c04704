use serde::{Deserialize, Serialize};

use crate::types::{Conversation, QueryMode};

/// Engine state changes published to the presentation layer.
///
/// Events are broadcast after the state they describe has been applied, so a
/// subscriber can always re-read the store and see at least this state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EngineEvent {
    // =========================================================================
    // Conversation events
    // =========================================================================
    /// A new snapshot of a conversation is available (one per stream fragment).
    ConversationUpdated { conversation: Conversation },

    /// The active conversation pointer changed.
    ActiveConversationChanged { conversation_id: Option<String> },

    /// A conversation was deleted.
    ConversationDeleted { conversation_id: String },

    // =========================================================================
    // Dispatcher events
    // =========================================================================
    /// The dispatcher moved between idle and one of its awaiting states.
    DispatcherStateChanged { from: String, to: String },

    /// The user picked another query mode.
    ModeChanged { mode: QueryMode },

    /// A chat answer started streaming.
    AnswerStarted { conversation_id: String },

    /// A chat answer finished, successfully or not.
    AnswerFinished {
        conversation_id: String,
        fragments: usize,
        outcome: String,
    },

    /// A search produced a new result set.
    SearchCompleted { mode: QueryMode, total_matches: u64 },

    /// A search failed and the result set was cleared.
    SearchFailed { mode: QueryMode, message: String },

    // =========================================================================
    // Repository events
    // =========================================================================
    /// A progress line arrived while a repository was being indexed.
    RepositoryIndexing { repo_path: String, progress: String },

    /// A repository finished indexing and became the active repository.
    RepositoryReady { repo_path: String },
}

impl EngineEvent {
    /// Returns a stable event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            EngineEvent::ConversationUpdated { .. } => "conversation_updated",
            EngineEvent::ActiveConversationChanged { .. } => "active_conversation_changed",
            EngineEvent::ConversationDeleted { .. } => "conversation_deleted",
            EngineEvent::DispatcherStateChanged { .. } => "dispatcher_state_changed",
            EngineEvent::ModeChanged { .. } => "mode_changed",
            EngineEvent::AnswerStarted { .. } => "answer_started",
            EngineEvent::AnswerFinished { .. } => "answer_finished",
            EngineEvent::SearchCompleted { .. } => "search_completed",
            EngineEvent::SearchFailed { .. } => "search_failed",
            EngineEvent::RepositoryIndexing { .. } => "repository_indexing",
            EngineEvent::RepositoryReady { .. } => "repository_ready",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_event_names_are_unique() {
        let events = vec![
            EngineEvent::ConversationUpdated {
                conversation: Conversation::new("c1", vec![], Utc::now()),
            },
            EngineEvent::ActiveConversationChanged {
                conversation_id: None,
            },
            EngineEvent::ConversationDeleted {
                conversation_id: "c1".into(),
            },
            EngineEvent::DispatcherStateChanged {
                from: "idle".into(),
                to: "awaiting-answer".into(),
            },
            EngineEvent::ModeChanged {
                mode: QueryMode::ExactPattern,
            },
            EngineEvent::AnswerStarted {
                conversation_id: "c1".into(),
            },
            EngineEvent::AnswerFinished {
                conversation_id: "c1".into(),
                fragments: 3,
                outcome: "completed".into(),
            },
            EngineEvent::SearchCompleted {
                mode: QueryMode::ApproximateText,
                total_matches: 4,
            },
            EngineEvent::SearchFailed {
                mode: QueryMode::ExactPattern,
                message: "bad".into(),
            },
            EngineEvent::RepositoryIndexing {
                repo_path: "/r".into(),
                progress: "Loading".into(),
            },
            EngineEvent::RepositoryReady {
                repo_path: "/r".into(),
            },
        ];

        let mut names: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_event_serializes() {
        let event = EngineEvent::SearchCompleted {
            mode: QueryMode::ExactPattern,
            total_matches: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["SearchCompleted"]["mode"], "exact-pattern");
        assert_eq!(json["SearchCompleted"]["total_matches"], 12);
    }
}
