//! Query routing and the submit state machine.
//!
//! Transitions:
//! - Idle -> AwaitingAnswer (semantic submit)
//! - Idle -> AwaitingSearch (exact or approximate submit)
//! - AwaitingAnswer -> Idle
//! - AwaitingSearch -> Idle
//!
//! A submit while not idle is ignored. That is the only concurrency guard:
//! nothing in flight can be cancelled.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use codescope_client::Backend;
use codescope_core::error::CodeScopeError;
use codescope_core::events::EngineEvent;
use codescope_core::types::{
    derive_title, Conversation, Message, QueryMode, SearchResultSet, DEFAULT_TITLE,
};
use codescope_storage::ConversationStore;

use crate::accumulator::{accumulate, SnapshotSink, StreamOutcome};
use crate::error::ChatError;

// =============================================================================
// State machine
// =============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DispatcherState {
    #[default]
    Idle,
    AwaitingAnswer,
    AwaitingSearch,
}

impl DispatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatcherState::Idle => "idle",
            DispatcherState::AwaitingAnswer => "awaiting-answer",
            DispatcherState::AwaitingSearch => "awaiting-search",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, DispatcherState::Idle)
    }
}

impl std::fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate that a dispatcher state transition is allowed.
pub fn validate_transition(from: DispatcherState, to: DispatcherState) -> Result<(), ChatError> {
    let valid = matches!(
        (from, to),
        (DispatcherState::Idle, DispatcherState::AwaitingAnswer)
            | (DispatcherState::Idle, DispatcherState::AwaitingSearch)
            | (DispatcherState::AwaitingAnswer, DispatcherState::Idle)
            | (DispatcherState::AwaitingSearch, DispatcherState::Idle)
    );

    if valid {
        Ok(())
    } else {
        Err(ChatError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Why a submit did nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoredReason {
    /// Another query is still in flight.
    Busy,
    /// The query was empty after trimming.
    EmptyQuery,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Ignored(IgnoredReason),
    /// A chat answer ran to the end of its stream (or failed, see `outcome`).
    Answered {
        conversation_id: String,
        outcome: StreamOutcome,
        /// Set when the final answer could not be saved. The stored
        /// conversation then holds the last snapshot that did persist.
        save_error: Option<String>,
    },
    /// A search replaced the current result set.
    Searched { mode: QueryMode, total_matches: u64 },
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    store: Arc<ConversationStore>,
    events: broadcast::Sender<EngineEvent>,
    state: Mutex<DispatcherState>,
    mode: Mutex<QueryMode>,
    repository: Mutex<Option<String>>,
    threshold: Mutex<u8>,
    results: Mutex<SearchResultSet>,
}

impl Dispatcher {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<ConversationStore>,
        events: broadcast::Sender<EngineEvent>,
        mode: QueryMode,
        fuzzy_threshold: u8,
    ) -> Self {
        Self {
            backend,
            store,
            events,
            state: Mutex::new(DispatcherState::Idle),
            mode: Mutex::new(mode),
            repository: Mutex::new(None),
            threshold: Mutex::new(fuzzy_threshold.min(100)),
            results: Mutex::new(SearchResultSet::default()),
        }
    }

    pub fn state(&self) -> DispatcherState {
        *lock(&self.state)
    }

    pub fn mode(&self) -> QueryMode {
        *lock(&self.mode)
    }

    pub fn set_mode(&self, mode: QueryMode) {
        let previous = std::mem::replace(&mut *lock(&self.mode), mode);
        if previous != mode {
            debug!(from = %previous, to = %mode, "Query mode changed");
            self.emit(EngineEvent::ModeChanged { mode });
        }
    }

    pub fn fuzzy_threshold(&self) -> u8 {
        *lock(&self.threshold)
    }

    /// Set the approximate-search threshold, clamped to 0-100. Returns the
    /// value actually stored.
    pub fn set_fuzzy_threshold(&self, threshold: u8) -> u8 {
        let clamped = threshold.min(100);
        *lock(&self.threshold) = clamped;
        clamped
    }

    /// The repository searches run against, if one has been opened.
    pub fn repository(&self) -> Option<String> {
        lock(&self.repository).clone()
    }

    /// Select the repository searches run against. Blank paths clear it.
    pub fn set_repository(&self, repo_path: Option<String>) {
        let repo_path = repo_path
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        *lock(&self.repository) = repo_path;
    }

    /// The result set of the most recent search.
    pub fn search_results(&self) -> SearchResultSet {
        lock(&self.results).clone()
    }

    /// Submit `query` in the current mode.
    pub async fn submit(&self, query: &str) -> Result<SubmitOutcome, ChatError> {
        self.submit_with_mode(query, self.mode()).await
    }

    /// Submit `query` routed by `mode`.
    ///
    /// Searches without a selected repository fail with
    /// [`ChatError::NoRepository`] before any request is sent.
    pub async fn submit_with_mode(
        &self,
        query: &str,
        mode: QueryMode,
    ) -> Result<SubmitOutcome, ChatError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SubmitOutcome::Ignored(IgnoredReason::EmptyQuery));
        }
        if !self.state().is_idle() {
            debug!(state = %self.state(), "Ignoring submit while busy");
            return Ok(SubmitOutcome::Ignored(IgnoredReason::Busy));
        }

        if mode.is_search() {
            let repo_path = self.repository().ok_or(ChatError::NoRepository)?;
            let Some(_in_flight) = self.begin(DispatcherState::AwaitingSearch)? else {
                return Ok(SubmitOutcome::Ignored(IgnoredReason::Busy));
            };
            self.run_search(mode, query, &repo_path).await
        } else {
            let Some(_in_flight) = self.begin(DispatcherState::AwaitingAnswer)? else {
                return Ok(SubmitOutcome::Ignored(IgnoredReason::Busy));
            };
            self.run_chat(query).await
        }
    }

    // -- chat -----------------------------------------------------------------

    async fn run_chat(&self, query: &str) -> Result<SubmitOutcome, ChatError> {
        let active = self.store.active()?;
        let repo_path = self.repository();

        let (conversation_id, mut messages, title) = match &active {
            Some(conversation) => (
                conversation.id.clone(),
                conversation.messages.clone(),
                needs_title(conversation),
            ),
            None => (uuid::Uuid::new_v4().to_string(), Vec::new(), false),
        };
        messages.push(Message::user(query));
        messages.push(Message::placeholder());
        let title = title.then(|| derive_title(&messages));

        let snapshot =
            self.store
                .upsert(&conversation_id, messages.clone(), title, repo_path)?;
        if active.is_none() {
            self.store.set_active(Some(&conversation_id))?;
            self.emit(EngineEvent::ActiveConversationChanged {
                conversation_id: Some(conversation_id.clone()),
            });
        }
        self.emit(EngineEvent::ConversationUpdated {
            conversation: snapshot,
        });
        self.emit(EngineEvent::AnswerStarted {
            conversation_id: conversation_id.clone(),
        });

        let stream = match self.backend.chat(query).await {
            Ok(stream) => stream,
            Err(e) => futures::stream::once(async move { Err::<String, CodeScopeError>(e) }).boxed(),
        };

        let mut sink = StoreSink {
            store: &self.store,
            events: &self.events,
            conversation_id: &conversation_id,
        };
        let accumulation = accumulate(stream, messages, &mut sink).await;

        let save_error = if accumulation.publish_failures > 0 {
            self.save_final_answer(&conversation_id, accumulation.messages.clone())
        } else {
            None
        };

        info!(
            conversation_id = %conversation_id,
            outcome = accumulation.outcome.label(),
            fragments = accumulation.outcome.fragments(),
            "Answer finished"
        );
        self.emit(EngineEvent::AnswerFinished {
            conversation_id: conversation_id.clone(),
            fragments: accumulation.outcome.fragments(),
            outcome: accumulation.outcome.label().to_string(),
        });

        Ok(SubmitOutcome::Answered {
            conversation_id,
            outcome: accumulation.outcome,
            save_error,
        })
    }

    /// One more attempt to persist the finished answer after snapshot writes
    /// failed. Returns the error if that fails too.
    fn save_final_answer(&self, conversation_id: &str, messages: Vec<Message>) -> Option<String> {
        match self.store.upsert(conversation_id, messages, None, None) {
            Ok(conversation) => {
                info!(conversation_id = %conversation_id, "Answer saved after earlier write failures");
                self.emit(EngineEvent::ConversationUpdated { conversation });
                None
            }
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "Answer could not be saved");
                Some(e.to_string())
            }
        }
    }

    // -- search ---------------------------------------------------------------

    async fn run_search(
        &self,
        mode: QueryMode,
        query: &str,
        repo_path: &str,
    ) -> Result<SubmitOutcome, ChatError> {
        let threshold = self.fuzzy_threshold();
        debug!(mode = %mode, repo_path, threshold, "Running search");

        match self.backend.search(mode, query, repo_path, threshold).await {
            Ok(response) => {
                let total_matches = response.total_matches;
                *lock(&self.results) = SearchResultSet::new(mode, response.results, total_matches);
                info!(mode = %mode, total_matches, "Search completed");
                self.emit(EngineEvent::SearchCompleted {
                    mode,
                    total_matches,
                });
                Ok(SubmitOutcome::Searched {
                    mode,
                    total_matches,
                })
            }
            Err(e) => {
                let message = search_failure_message(&e);
                warn!(mode = %mode, error = %message, "Search failed");
                *lock(&self.results) = SearchResultSet::failed(mode, message.clone());
                self.emit(EngineEvent::SearchFailed {
                    mode,
                    message: message.clone(),
                });
                Err(ChatError::Search(message))
            }
        }
    }

    // -- state ----------------------------------------------------------------

    /// Move from idle to `target`. Returns `None` if another submit got there
    /// first.
    fn begin(&self, target: DispatcherState) -> Result<Option<InFlight<'_>>, ChatError> {
        let mut state = lock(&self.state);
        if !state.is_idle() {
            return Ok(None);
        }
        validate_transition(*state, target)?;
        *state = target;
        drop(state);

        self.emit(EngineEvent::DispatcherStateChanged {
            from: DispatcherState::Idle.to_string(),
            to: target.to_string(),
        });
        Ok(Some(InFlight {
            dispatcher: self,
            from: target,
        }))
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Returns the dispatcher to idle when the submit finishes, whichever way.
struct InFlight<'a> {
    dispatcher: &'a Dispatcher,
    from: DispatcherState,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        *lock(&self.dispatcher.state) = DispatcherState::Idle;
        self.dispatcher.emit(EngineEvent::DispatcherStateChanged {
            from: self.from.to_string(),
            to: DispatcherState::Idle.to_string(),
        });
    }
}

/// Persists every answer snapshot and announces it.
struct StoreSink<'a> {
    store: &'a ConversationStore,
    events: &'a broadcast::Sender<EngineEvent>,
    conversation_id: &'a str,
}

impl SnapshotSink for StoreSink<'_> {
    fn publish(&mut self, messages: &[Message]) -> Result<(), CodeScopeError> {
        let conversation =
            self.store
                .upsert(self.conversation_id, messages.to_vec(), None, None)?;
        let _ = self
            .events
            .send(EngineEvent::ConversationUpdated { conversation });
        Ok(())
    }
}

/// True for a conversation that still carries the placeholder title.
fn needs_title(conversation: &Conversation) -> bool {
    conversation.title == DEFAULT_TITLE && !conversation.has_user_message()
}

fn search_failure_message(err: &CodeScopeError) -> String {
    match err.detail() {
        Some(detail) if !detail.trim().is_empty() => detail.to_string(),
        Some(_) => "Search failed".to_string(),
        None => err.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
