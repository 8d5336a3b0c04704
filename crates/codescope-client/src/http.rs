//! reqwest implementation of the backend port.
//!
//! Non-2xx answers are turned into [`CodeScopeError::Backend`] carrying the
//! FastAPI `detail` message when the body has one. Search and ingestion run
//! under a hard timeout; chat streams are not time-bounded.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use codescope_core::config::BackendConfig;
use codescope_core::error::{CodeScopeError, Result};
use codescope_core::types::{FileEntry, QueryMode, SearchResult};

use crate::backend::{
    require_search_mode, Backend, ChatStream, HealthStatus, IngestSummary, SearchResponse,
};
use crate::decoder::Utf8ChunkDecoder;

/// Text the backend emits once a repository has been fully indexed.
pub const INGEST_COMPLETE_MARKER: &str = "Ingestion successful";

// =============================================================================
// Wire types
// =============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    repo_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold: Option<u8>,
}

#[derive(Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct IngestRequest<'a> {
    repo_path: &'a str,
}

#[derive(Deserialize)]
struct WireSearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
    total_matches: Option<u64>,
}

impl WireSearchResponse {
    fn normalize(self) -> SearchResponse {
        let total_matches = self.total_matches.unwrap_or(self.results.len() as u64);
        SearchResponse {
            results: self.results,
            total_matches,
        }
    }
}

#[derive(Deserialize)]
struct ContentResponse {
    content: String,
}

#[derive(Deserialize)]
struct WireIngestResponse {
    message: String,
    chunks_count: Option<u64>,
    files_count: Option<u64>,
    count: Option<u64>,
}

impl From<WireIngestResponse> for IngestSummary {
    fn from(wire: WireIngestResponse) -> Self {
        IngestSummary {
            message: wire.message,
            chunks_count: wire.chunks_count,
            files_count: wire.files_count.or(wire.count),
        }
    }
}

// =============================================================================
// HttpBackend
// =============================================================================

/// Backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    search_timeout: Duration,
    ingest_timeout: Duration,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| CodeScopeError::Network(format!("Failed to build HTTP client: {}", e)))?;

        info!(base_url = %config.base_url, "HTTP backend configured");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_timeout: config.search_timeout(),
            ingest_timeout: config.ingest_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        generic_failure: &str,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_transport)?;
        check_status(response, generic_failure).await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn chat(&self, message: &str) -> Result<ChatStream> {
        debug!(chars = message.chars().count(), "Opening chat stream");
        let response = self
            .post_json("/api/chat", &ChatRequest { message }, "Chat request failed")
            .await?;

        let bytes = Box::pin(response.bytes_stream());
        let stream = futures::stream::unfold(
            (bytes, Utf8ChunkDecoder::new(), false),
            |(mut bytes, mut decoder, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            let text = decoder.push(&chunk);
                            if !text.is_empty() {
                                return Some((Ok(text), (bytes, decoder, false)));
                            }
                        }
                        Some(Err(e)) => {
                            return Some((Err(map_transport(e)), (bytes, decoder, true)));
                        }
                        None => {
                            let rest = decoder.finish();
                            if rest.is_empty() {
                                return None;
                            }
                            return Some((Ok(rest), (bytes, decoder, true)));
                        }
                    }
                }
            },
        );

        Ok(stream.boxed())
    }

    async fn search(
        &self,
        mode: QueryMode,
        query: &str,
        repo_path: &str,
        threshold: u8,
    ) -> Result<SearchResponse> {
        require_search_mode(mode)?;

        let (path, request) = match mode {
            QueryMode::ApproximateText => (
                "/api/search/fuzzy",
                SearchRequest {
                    query,
                    repo_path,
                    threshold: Some(threshold.min(100)),
                },
            ),
            _ => (
                "/api/search/regex",
                SearchRequest {
                    query,
                    repo_path,
                    threshold: None,
                },
            ),
        };
        debug!(mode = %mode, path, "Sending search request");

        with_timeout(self.search_timeout, async {
            let response = self.post_json(path, &request, "Search failed").await?;
            let wire: WireSearchResponse = response.json().await.map_err(map_body)?;
            Ok(wire.normalize())
        })
        .await
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>> {
        let response = self
            .post_json("/api/files/list", &PathRequest { path }, "Failed to list directory")
            .await?;
        response.json().await.map_err(map_body)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let response = self
            .post_json("/api/files/content", &PathRequest { path }, "Failed to read file")
            .await?;
        let body: ContentResponse = response.json().await.map_err(map_body)?;
        Ok(body.content)
    }

    async fn ingest(
        &self,
        repo_path: &str,
        progress: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<IngestSummary> {
        info!(repo_path, "Requesting repository ingestion");

        with_timeout(self.ingest_timeout, async {
            let response = self
                .post_json("/api/ingest", &IngestRequest { repo_path }, "Ingestion failed")
                .await?;

            let is_json = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.contains("application/json"));

            if is_json {
                let wire: WireIngestResponse = response.json().await.map_err(map_body)?;
                progress(&wire.message);
                return Ok(IngestSummary::from(wire));
            }

            read_progress_stream(response, progress).await
        })
        .await
    }

    async fn health(&self) -> Result<HealthStatus> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(map_transport)?;
        let response = check_status(response, "Health check failed").await?;
        response.json().await.map_err(map_body)
    }
}

/// Forward each non-empty line of a text progress stream until the
/// completion marker shows up.
async fn read_progress_stream(
    response: reqwest::Response,
    progress: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<IngestSummary> {
    let mut bytes = Box::pin(response.bytes_stream());
    let mut decoder = Utf8ChunkDecoder::new();
    let mut buffer = String::new();
    let mut completed: Option<String> = None;

    let mut emit = |line: &str, completed: &mut Option<String>| {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        progress(line);
        if line.contains(INGEST_COMPLETE_MARKER) {
            *completed = Some(line.to_string());
        }
    };

    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.map_err(map_transport)?;
        buffer.push_str(&decoder.push(&chunk));
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            emit(&line, &mut completed);
        }
    }
    buffer.push_str(&decoder.finish());
    emit(&buffer, &mut completed);

    match completed {
        Some(message) => Ok(IngestSummary {
            message,
            chunks_count: None,
            files_count: None,
        }),
        None => Err(CodeScopeError::Parse(
            "ingestion stream ended without a completion message".to_string(),
        )),
    }
}

async fn with_timeout<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        warn!(secs = limit.as_secs(), "Backend request timed out");
        CodeScopeError::Timeout {
            secs: limit.as_secs(),
        }
    })?
}

async fn check_status(response: reqwest::Response, generic_failure: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = error_detail(&body).unwrap_or_else(|| generic_failure.to_string());
    warn!(status = status.as_u16(), detail = %detail, "Backend returned an error");
    Err(CodeScopeError::backend(status.as_u16(), detail))
}

/// Extract the FastAPI `detail` message from an error body.
///
/// A string detail is returned verbatim; any other JSON value is rendered
/// compactly. Returns `None` when the body has no usable detail.
pub fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn map_transport(e: reqwest::Error) -> CodeScopeError {
    if e.is_decode() {
        CodeScopeError::Parse(e.to_string())
    } else {
        CodeScopeError::Network(e.to_string())
    }
}

fn map_body(e: reqwest::Error) -> CodeScopeError {
    CodeScopeError::Parse(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail_string() {
        assert_eq!(
            error_detail(r#"{"detail":"File not found"}"#).as_deref(),
            Some("File not found")
        );
    }

    #[test]
    fn test_error_detail_structured_is_compact_json() {
        let body = r#"{"detail":[{"loc":["body","query"],"msg":"field required"}]}"#;
        assert_eq!(
            error_detail(body).as_deref(),
            Some(r#"[{"loc":["body","query"],"msg":"field required"}]"#)
        );
    }

    #[test]
    fn test_error_detail_missing_or_unparseable() {
        assert_eq!(error_detail(""), None);
        assert_eq!(error_detail("Internal Server Error"), None);
        assert_eq!(error_detail(r#"{"error":"x"}"#), None);
        assert_eq!(error_detail(r#"{"detail":null}"#), None);
    }

    #[test]
    fn test_wire_search_defaults_total_to_result_count() {
        let wire: WireSearchResponse = serde_json::from_str(
            r#"{"results":[{"file":"a.rs","line_number":3,"line_content":"fn a()"}]}"#,
        )
        .unwrap();
        let response = wire.normalize();
        assert_eq!(response.total_matches, 1);
        assert!(response.results[0].context_before.is_empty());
    }

    #[test]
    fn test_wire_ingest_count_maps_to_files() {
        let wire: WireIngestResponse = serde_json::from_str(
            r#"{"message":"No valid documents found in the repository.","count":0}"#,
        )
        .unwrap();
        let summary = IngestSummary::from(wire);
        assert_eq!(summary.files_count, Some(0));
        assert_eq!(summary.chunks_count, None);
    }

    #[test]
    fn test_search_request_omits_threshold_for_exact() {
        let body = serde_json::to_value(SearchRequest {
            query: "fn main",
            repo_path: "/r",
            threshold: None,
        })
        .unwrap();
        assert!(body.get("threshold").is_none());
        assert_eq!(body["repo_path"], "/r");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = BackendConfig {
            base_url: "http://localhost:8000/".to_string(),
            ..BackendConfig::default()
        };
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8000");
        assert_eq!(backend.url("/health"), "http://localhost:8000/health");
    }
}
