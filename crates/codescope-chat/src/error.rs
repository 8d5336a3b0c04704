//! Error types for the interaction engine.

use codescope_core::error::CodeScopeError;

/// Errors surfaced by the dispatcher and the application state.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("no repository selected")]
    NoRepository,
    #[error("search error: {0}")]
    Search(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("{0}")]
    Precondition(String),
    #[error(transparent)]
    Engine(CodeScopeError),
}

impl From<CodeScopeError> for ChatError {
    fn from(err: CodeScopeError) -> Self {
        match err {
            CodeScopeError::Storage(msg) => ChatError::Storage(msg),
            CodeScopeError::Serialization(msg) => ChatError::Storage(msg),
            CodeScopeError::Precondition(msg) => ChatError::Precondition(msg),
            other => ChatError::Engine(other),
        }
    }
}
