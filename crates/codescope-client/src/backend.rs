//! The backend port.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use codescope_core::error::{CodeScopeError, Result};
use codescope_core::types::{FileEntry, QueryMode, SearchResult};

/// Decoded text fragments of one chat answer, in arrival order.
///
/// The stream ends when the backend closes the response; an `Err` item means
/// the connection failed and no further items follow.
pub type ChatStream = BoxStream<'static, std::result::Result<String, CodeScopeError>>;

/// Normalized payload of an exact or approximate search.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_matches: u64,
}

/// Outcome of indexing a repository.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub message: String,
    #[serde(default)]
    pub chunks_count: Option<u64>,
    #[serde(default)]
    pub files_count: Option<u64>,
}

/// Answer of the backend health check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub version: String,
}

/// Operations the engine needs from the retrieval/generation service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Start a chat answer for `message`.
    async fn chat(&self, message: &str) -> Result<ChatStream>;

    /// Run an exact-pattern or approximate-text search.
    ///
    /// `threshold` is only sent for [`QueryMode::ApproximateText`]. Calling
    /// this with [`QueryMode::Semantic`] is a precondition error.
    async fn search(
        &self,
        mode: QueryMode,
        query: &str,
        repo_path: &str,
        threshold: u8,
    ) -> Result<SearchResponse>;

    /// List one level of a remote directory.
    async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Fetch the text content of a remote file.
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Index a repository, reporting progress lines as they arrive.
    async fn ingest(
        &self,
        repo_path: &str,
        progress: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<IngestSummary>;

    async fn health(&self) -> Result<HealthStatus>;
}

pub(crate) fn require_search_mode(mode: QueryMode) -> Result<()> {
    if mode.is_search() {
        Ok(())
    } else {
        Err(CodeScopeError::Precondition(
            "semantic queries are answered through chat, not search".to_string(),
        ))
    }
}
