//! Application state shared by the presentation layer.
//!
//! AppState owns the single sources of truth (the conversation store and the
//! dispatcher) and the event channel every view listens on. It is cheap to
//! clone; every field is reference counted.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use codescope_client::{Backend, IngestSummary};
use codescope_core::config::{expand_home, CodeScopeConfig};
use codescope_core::events::EngineEvent;
use codescope_core::types::Conversation;
use codescope_export::{DirectoryDownloader, Downloader, ExportFormat};
use codescope_storage::ConversationStore;

use crate::browser::FileBrowser;
use crate::dispatcher::Dispatcher;
use crate::error::ChatError;

#[derive(Clone)]
pub struct AppState {
    /// Configuration the state was built from.
    pub config: Arc<CodeScopeConfig>,
    store: Arc<ConversationStore>,
    backend: Arc<dyn Backend>,
    dispatcher: Arc<Dispatcher>,
    browser: Arc<FileBrowser>,
    downloader: Arc<dyn Downloader>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl AppState {
    pub fn new(
        config: CodeScopeConfig,
        store: Arc<ConversationStore>,
        backend: Arc<dyn Backend>,
    ) -> Self {
        let downloader = Arc::new(DirectoryDownloader::new(expand_home(
            &config.export.output_dir,
        )));
        Self::with_downloader(config, store, backend, downloader)
    }

    /// Like [`AppState::new`] with a custom export destination.
    pub fn with_downloader(
        config: CodeScopeConfig,
        store: Arc<ConversationStore>,
        backend: Arc<dyn Backend>,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            event_tx.clone(),
            config.search.default_mode,
            config.search.threshold(),
        ));
        let browser = Arc::new(FileBrowser::new(Arc::clone(&backend)));

        Self {
            config: Arc::new(config),
            store,
            backend,
            dispatcher,
            browser,
            downloader,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn browser(&self) -> &FileBrowser {
        &self.browser
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    // =========================================================================
    // Repository
    // =========================================================================

    /// Index `repo_path` and make it the repository searches run against.
    ///
    /// On failure the previous selection is kept.
    pub async fn open_repository(&self, repo_path: &str) -> Result<IngestSummary, ChatError> {
        let repo_path = repo_path.trim();
        if repo_path.is_empty() {
            return Err(ChatError::Precondition(
                "repository path cannot be empty".to_string(),
            ));
        }

        let events = self.event_tx.clone();
        let owned = repo_path.to_string();
        let mut forward = |line: &str| {
            let _ = events.send(EngineEvent::RepositoryIndexing {
                repo_path: owned.clone(),
                progress: line.to_string(),
            });
        };
        let summary = self.backend.ingest(repo_path, &mut forward).await?;

        self.dispatcher.set_repository(Some(repo_path.to_string()));
        info!(
            repo_path,
            files = ?summary.files_count,
            chunks = ?summary.chunks_count,
            "Repository ready"
        );
        self.emit(EngineEvent::RepositoryReady {
            repo_path: repo_path.to_string(),
        });
        Ok(summary)
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Create an empty conversation titled "New Chat" and make it active.
    pub fn new_conversation(&self) -> Result<Conversation, ChatError> {
        let id = uuid::Uuid::new_v4().to_string();
        let conversation = self
            .store
            .upsert(&id, Vec::new(), None, self.dispatcher.repository())?;
        self.store.set_active(Some(&id))?;

        self.emit(EngineEvent::ConversationUpdated {
            conversation: conversation.clone(),
        });
        self.emit(EngineEvent::ActiveConversationChanged {
            conversation_id: Some(id),
        });
        Ok(conversation)
    }

    pub fn switch_conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        let conversation = self
            .store
            .get(id)?
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
        self.store.set_active(Some(id))?;
        self.emit(EngineEvent::ActiveConversationChanged {
            conversation_id: Some(id.to_string()),
        });
        Ok(conversation)
    }

    pub fn active_conversation(&self) -> Result<Option<Conversation>, ChatError> {
        Ok(self.store.active()?)
    }

    /// All conversations, most recently updated first.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.store.list_recent()?)
    }

    pub fn delete_conversation(&self, id: &str) -> Result<(), ChatError> {
        let was_active = self.store.active_id()?.as_deref() == Some(id);
        if !self.store.delete(id)? {
            return Err(ChatError::ConversationNotFound(id.to_string()));
        }

        self.emit(EngineEvent::ConversationDeleted {
            conversation_id: id.to_string(),
        });
        if was_active {
            self.emit(EngineEvent::ActiveConversationChanged {
                conversation_id: None,
            });
        }
        Ok(())
    }

    pub fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation, ChatError> {
        let conversation = self
            .store
            .rename(id, title)?
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
        self.emit(EngineEvent::ConversationUpdated {
            conversation: conversation.clone(),
        });
        Ok(conversation)
    }

    pub fn search_conversations(&self, query: &str) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.store.search(query)?)
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Export conversation `id` (or the active one) and save it through the
    /// configured downloader.
    pub fn export_conversation(
        &self,
        id: Option<&str>,
        format: ExportFormat,
    ) -> Result<PathBuf, ChatError> {
        let conversation = match id {
            Some(id) => self
                .store
                .get(id)?
                .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?,
            None => self
                .store
                .active()?
                .ok_or_else(|| ChatError::Precondition("no conversation to export".to_string()))?,
        };

        let file = codescope_export::export(&conversation, format)?;
        Ok(self.downloader.save(&file)?)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}
