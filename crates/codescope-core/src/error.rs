use thiserror::Error;

/// Top-level error type for the CodeScope client engine.
///
/// The first six variants form the failure taxonomy every engine operation
/// reports in; the remaining ones cover local concerns (configuration, files,
/// export rendering). Subsystem crates convert into this type so that `?`
/// works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodeScopeError {
    /// The request could not be sent or the connection dropped.
    #[error("Network error: {0}")]
    Network(String),

    /// A bounded wait was exceeded.
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The backend answered with a non-success status.
    #[error("{detail}")]
    Backend { status: u16, detail: String },

    /// The operation needs state that has not been established yet.
    #[error("{0}")]
    Precondition(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A response body did not match the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Export error: {0}")]
    Export(String),
}

impl CodeScopeError {
    /// Backend error with the given status and detail message.
    pub fn backend(status: u16, detail: impl Into<String>) -> Self {
        CodeScopeError::Backend {
            status,
            detail: detail.into(),
        }
    }

    /// The `detail` message for backend errors, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            CodeScopeError::Backend { detail, .. } => Some(detail),
            _ => None,
        }
    }

    /// True for failures of the transport rather than of the request itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CodeScopeError::Network(_) | CodeScopeError::Timeout { .. }
        )
    }
}

impl From<toml::de::Error> for CodeScopeError {
    fn from(err: toml::de::Error) -> Self {
        CodeScopeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CodeScopeError {
    fn from(err: toml::ser::Error) -> Self {
        CodeScopeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CodeScopeError {
    fn from(err: serde_json::Error) -> Self {
        CodeScopeError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for CodeScope operations.
pub type Result<T> = std::result::Result<T, CodeScopeError>;
