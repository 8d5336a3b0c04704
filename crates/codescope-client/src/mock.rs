//! Scripted backend for tests.
//!
//! Every call is counted. Responses are consumed from per-operation queues;
//! when a queue is empty a neutral default is returned.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use codescope_core::error::{CodeScopeError, Result};
use codescope_core::types::{FileEntry, QueryMode};

use crate::backend::{
    require_search_mode, Backend, ChatStream, HealthStatus, IngestSummary, SearchResponse,
};

/// How the next chat request is answered.
pub enum ChatScript {
    /// Emit these items in order, then close.
    Fragments(Vec<std::result::Result<String, CodeScopeError>>),
    /// Emit whatever the paired sender pushes; closes when it is dropped.
    Channel(mpsc::UnboundedReceiver<std::result::Result<String, CodeScopeError>>),
    /// Fail before any stream is opened.
    Fail(CodeScopeError),
}

impl ChatScript {
    /// Successful answer made of `fragments`.
    pub fn text<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ChatScript::Fragments(fragments.into_iter().map(|f| Ok(f.into())).collect())
    }

    /// Channel-driven answer plus the sender that feeds it.
    pub fn channel() -> (
        mpsc::UnboundedSender<std::result::Result<String, CodeScopeError>>,
        Self,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, ChatScript::Channel(rx))
    }
}

/// Arguments of one recorded search call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchCall {
    pub mode: QueryMode,
    pub query: String,
    pub repo_path: String,
    pub threshold: u8,
}

#[derive(Default)]
pub struct MockBackend {
    chat_scripts: Mutex<VecDeque<ChatScript>>,
    search_results: Mutex<VecDeque<Result<SearchResponse>>>,
    search_delay: Mutex<Option<Duration>>,
    searches: Mutex<Vec<SearchCall>>,
    chat_messages: Mutex<Vec<String>>,
    directories: Mutex<HashMap<String, Vec<FileEntry>>>,
    files: Mutex<HashMap<String, String>>,
    ingest_results: Mutex<VecDeque<Result<IngestSummary>>>,
    ingest_progress: Mutex<Vec<String>>,

    chat_calls: AtomicUsize,
    search_calls: AtomicUsize,
    list_calls: AtomicUsize,
    read_calls: AtomicUsize,
    ingest_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    // -- scripting ------------------------------------------------------------

    pub fn push_chat(&self, script: ChatScript) {
        lock(&self.chat_scripts).push_back(script);
    }

    pub fn push_search(&self, result: Result<SearchResponse>) {
        lock(&self.search_results).push_back(result);
    }

    /// Delay every search answer, so callers can observe the in-flight state.
    pub fn set_search_delay(&self, delay: Duration) {
        *lock(&self.search_delay) = Some(delay);
    }

    pub fn set_dir(&self, path: &str, entries: Vec<FileEntry>) {
        lock(&self.directories).insert(path.to_string(), entries);
    }

    pub fn set_file(&self, path: &str, content: &str) {
        lock(&self.files).insert(path.to_string(), content.to_string());
    }

    pub fn push_ingest(&self, result: Result<IngestSummary>) {
        lock(&self.ingest_results).push_back(result);
    }

    /// Progress lines reported by every ingestion before it resolves.
    pub fn set_ingest_progress<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *lock(&self.ingest_progress) = lines.into_iter().map(Into::into).collect();
    }

    // -- inspection -----------------------------------------------------------

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn ingest_calls(&self) -> usize {
        self.ingest_calls.load(Ordering::SeqCst)
    }

    /// Every request issued so far, of any kind.
    pub fn total_calls(&self) -> usize {
        self.chat_calls()
            + self.search_calls()
            + self.list_calls()
            + self.read_calls()
            + self.ingest_calls()
    }

    pub fn searches(&self) -> Vec<SearchCall> {
        lock(&self.searches).clone()
    }

    pub fn chat_messages(&self) -> Vec<String> {
        lock(&self.chat_messages).clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn chat(&self, message: &str) -> Result<ChatStream> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.chat_messages).push(message.to_string());

        let script = lock(&self.chat_scripts).pop_front();
        match script {
            None => Ok(futures::stream::empty().boxed()),
            Some(ChatScript::Fragments(items)) => Ok(futures::stream::iter(items).boxed()),
            Some(ChatScript::Channel(rx)) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            Some(ChatScript::Fail(e)) => Err(e),
        }
    }

    async fn search(
        &self,
        mode: QueryMode,
        query: &str,
        repo_path: &str,
        threshold: u8,
    ) -> Result<SearchResponse> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        require_search_mode(mode)?;
        lock(&self.searches).push(SearchCall {
            mode,
            query: query.to_string(),
            repo_path: repo_path.to_string(),
            threshold,
        });

        let delay = *lock(&self.search_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = lock(&self.search_results).pop_front();
        scripted.unwrap_or_else(|| Ok(SearchResponse::default()))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<FileEntry>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.directories)
            .get(path)
            .cloned()
            .ok_or_else(|| CodeScopeError::backend(404, "Path not found"))
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.files)
            .get(path)
            .cloned()
            .ok_or_else(|| CodeScopeError::backend(404, "File not found"))
    }

    async fn ingest(
        &self,
        _repo_path: &str,
        progress: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<IngestSummary> {
        self.ingest_calls.fetch_add(1, Ordering::SeqCst);

        let lines = lock(&self.ingest_progress).clone();
        for line in &lines {
            progress(line);
        }

        let scripted = lock(&self.ingest_results).pop_front();
        scripted.unwrap_or_else(|| {
            Ok(IngestSummary {
                message: "Ingestion successful".to_string(),
                chunks_count: Some(0),
                files_count: Some(0),
            })
        })
    }

    async fn health(&self) -> Result<HealthStatus> {
        Ok(HealthStatus {
            status: "healthy".to_string(),
            service: "mock".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescope_core::types::FileKind;

    #[tokio::test]
    async fn test_fragments_script_replays_in_order() {
        let backend = MockBackend::new();
        backend.push_chat(ChatScript::text(["a", "b"]));

        let stream = backend.chat("q").await.unwrap();
        let items: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(backend.chat_calls(), 1);
        assert_eq!(backend.chat_messages(), vec!["q"]);
    }

    #[tokio::test]
    async fn test_channel_script_follows_sender() {
        let backend = MockBackend::new();
        let (tx, script) = ChatScript::channel();
        backend.push_chat(script);

        let mut stream = backend.chat("q").await.unwrap();
        tx.send(Ok("x".into())).unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "x");
        drop(tx);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_semantic_search_is_rejected() {
        let backend = MockBackend::new();
        let err = backend
            .search(QueryMode::Semantic, "q", "/r", 70)
            .await
            .unwrap_err();
        assert!(matches!(err, CodeScopeError::Precondition(_)));
        assert!(backend.searches().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_paths_are_404() {
        let backend = MockBackend::new();
        backend.set_dir(
            "/r",
            vec![FileEntry {
                name: "src".into(),
                kind: FileKind::Directory,
                path: "/r/src".into(),
            }],
        );
        assert_eq!(backend.list_dir("/r").await.unwrap().len(), 1);

        let err = backend.read_file("/r/missing.rs").await.unwrap_err();
        assert_eq!(err.detail(), Some("File not found"));
        assert_eq!(backend.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_ingest_reports_progress() {
        let backend = MockBackend::new();
        backend.set_ingest_progress(["Loading files", "Ingestion successful"]);

        let mut seen = Vec::new();
        let summary = backend
            .ingest("/r", &mut |line: &str| seen.push(line.to_string()))
            .await
            .unwrap();
        assert_eq!(summary.message, "Ingestion successful");
        assert_eq!(seen, vec!["Loading files", "Ingestion successful"]);
    }
}
