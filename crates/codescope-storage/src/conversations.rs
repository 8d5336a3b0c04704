//! Durable multi-conversation store.
//!
//! The whole collection lives in memory and is written back as one JSON
//! document after every mutation. The in-memory copy only changes once the
//! write has succeeded, so a failed persist never leaves the store claiming
//! data is saved when it is not.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use codescope_core::error::{CodeScopeError, Result};
use codescope_core::types::{Conversation, Message};

use crate::blob::BlobStorage;

/// Storage key of the serialized conversation collection.
pub const CONVERSATIONS_KEY: &str = "codescope_conversations";

/// Storage key of the active conversation id.
pub const ACTIVE_KEY: &str = "codescope_active_conversation";

#[derive(Default)]
struct StoreState {
    conversations: BTreeMap<String, Conversation>,
    active: Option<String>,
}

/// Keyed collection of conversations plus the active-conversation pointer.
pub struct ConversationStore {
    storage: Arc<dyn BlobStorage>,
    state: Mutex<StoreState>,
}

impl ConversationStore {
    /// Load the store from `storage`.
    ///
    /// Fails with [`CodeScopeError::Parse`] if the stored collection is not
    /// valid; use [`ConversationStore::open_with_recovery`] to start over
    /// without losing the unreadable data.
    pub fn open(storage: Arc<dyn BlobStorage>) -> Result<Self> {
        let conversations = match storage.read_blob(CONVERSATIONS_KEY)? {
            Some(raw) => parse_collection(&raw)?,
            None => BTreeMap::new(),
        };

        let active = storage
            .read_blob(ACTIVE_KEY)?
            .filter(|id| {
                let known = conversations.contains_key(id);
                if !known {
                    debug!(conversation_id = %id, "Dropping dangling active conversation pointer");
                }
                known
            });

        info!(
            conversations = conversations.len(),
            active = ?active,
            "Conversation store opened"
        );

        Ok(Self {
            storage,
            state: Mutex::new(StoreState {
                conversations,
                active,
            }),
        })
    }

    /// Load the store, moving an unreadable collection aside under a
    /// timestamped backup key and starting empty.
    pub fn open_with_recovery(storage: Arc<dyn BlobStorage>) -> Result<Self> {
        match Self::open(Arc::clone(&storage)) {
            Err(CodeScopeError::Parse(reason)) => {
                let backup_key = format!(
                    "{}.corrupt-{}",
                    CONVERSATIONS_KEY,
                    Utc::now().format("%Y%m%dT%H%M%S")
                );
                if let Some(raw) = storage.read_blob(CONVERSATIONS_KEY)? {
                    storage.write_blob(&backup_key, &raw)?;
                }
                storage.remove_blob(CONVERSATIONS_KEY)?;
                warn!(
                    backup_key = %backup_key,
                    reason = %reason,
                    "Stored conversations were unreadable; moved aside and starting empty"
                );
                Self::open(storage)
            }
            other => other,
        }
    }

    /// All stored conversations, in storage order.
    pub fn list(&self) -> Result<Vec<Conversation>> {
        Ok(self.lock()?.conversations.values().cloned().collect())
    }

    /// All conversations, most recently updated first.
    pub fn list_recent(&self) -> Result<Vec<Conversation>> {
        let mut conversations = self.list()?;
        sort_recent_first(&mut conversations);
        Ok(conversations)
    }

    pub fn get(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.lock()?.conversations.get(id).cloned())
    }

    /// Replace the messages of `id`, creating the conversation if needed.
    pub fn upsert(
        &self,
        id: &str,
        messages: Vec<Message>,
        title: Option<String>,
        repo_path: Option<String>,
    ) -> Result<Conversation> {
        self.upsert_at(id, messages, title, repo_path, Utc::now())
    }

    /// [`ConversationStore::upsert`] with an explicit clock reading.
    ///
    /// An existing conversation gets its messages replaced and `updated_at`
    /// advanced; `title` and `repo_path` are only overwritten when given. A
    /// new conversation starts with `created_at = updated_at = now` and a
    /// title derived from its first user message unless one is given.
    pub fn upsert_at(
        &self,
        id: &str,
        messages: Vec<Message>,
        title: Option<String>,
        repo_path: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Conversation> {
        let mut state = self.lock()?;

        let updated = match state.conversations.get(id) {
            Some(existing) => {
                let mut conversation = existing.clone();
                conversation.messages = messages;
                conversation.touch(now);
                if let Some(title) = title {
                    conversation.title = title;
                }
                if repo_path.is_some() {
                    conversation.repo_path = repo_path;
                }
                conversation
            }
            None => {
                let mut conversation = Conversation::new(id, messages, now);
                if let Some(title) = title {
                    conversation.title = title;
                }
                conversation.repo_path = repo_path;
                debug!(conversation_id = %id, title = %conversation.title, "Creating conversation");
                conversation
            }
        };

        let previous = state
            .conversations
            .insert(id.to_string(), updated.clone());
        if let Err(e) = self.persist(&state.conversations) {
            match previous {
                Some(previous) => state.conversations.insert(id.to_string(), previous),
                None => state.conversations.remove(id),
            };
            return Err(e);
        }

        Ok(updated)
    }

    /// Remove a conversation. Clears the active pointer if it pointed here.
    ///
    /// Returns whether a conversation was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.lock()?;

        let Some(removed) = state.conversations.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&state.conversations) {
            state.conversations.insert(id.to_string(), removed);
            return Err(e);
        }

        if state.active.as_deref() == Some(id) {
            // The record is gone either way; a stale pointer blob left behind
            // is dropped the next time the store is opened.
            state.active = None;
            if let Err(e) = self.storage.remove_blob(ACTIVE_KEY) {
                warn!(conversation_id = %id, error = %e, "Failed to clear active conversation");
                return Err(e);
            }
        }

        info!(conversation_id = %id, "Conversation deleted");
        Ok(true)
    }

    /// Change the title of `id` and advance its `updated_at`.
    ///
    /// Returns `Ok(None)` without writing anything if `id` is unknown.
    pub fn rename(&self, id: &str, title: &str) -> Result<Option<Conversation>> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CodeScopeError::Precondition(
                "title cannot be empty".to_string(),
            ));
        }

        let mut state = self.lock()?;
        let Some(existing) = state.conversations.get(id).cloned() else {
            return Ok(None);
        };

        let mut renamed = existing.clone();
        renamed.title = title.to_string();
        renamed.touch(Utc::now());

        state.conversations.insert(id.to_string(), renamed.clone());
        if let Err(e) = self.persist(&state.conversations) {
            state.conversations.insert(id.to_string(), existing);
            return Err(e);
        }

        debug!(conversation_id = %id, title = %title, "Conversation renamed");
        Ok(Some(renamed))
    }

    /// Case-insensitive substring search over titles and message contents,
    /// most recently updated first. An empty query returns everything.
    pub fn search(&self, query: &str) -> Result<Vec<Conversation>> {
        let needle = query.trim().to_lowercase();
        let mut matches: Vec<Conversation> = self
            .lock()?
            .conversations
            .values()
            .filter(|c| needle.is_empty() || c.matches_lowercase(&needle))
            .cloned()
            .collect();
        sort_recent_first(&mut matches);
        Ok(matches)
    }

    pub fn active_id(&self) -> Result<Option<String>> {
        Ok(self.lock()?.active.clone())
    }

    /// The active conversation, if the pointer is set.
    pub fn active(&self) -> Result<Option<Conversation>> {
        let state = self.lock()?;
        Ok(state
            .active
            .as_ref()
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    /// Point the active conversation at `id`, or clear it with `None`.
    pub fn set_active(&self, id: Option<&str>) -> Result<()> {
        let mut state = self.lock()?;
        match id {
            Some(id) => {
                if !state.conversations.contains_key(id) {
                    return Err(CodeScopeError::Precondition(format!(
                        "conversation not found: {}",
                        id
                    )));
                }
                self.storage.write_blob(ACTIVE_KEY, id)?;
                state.active = Some(id.to_string());
            }
            None => {
                self.storage.remove_blob(ACTIVE_KEY)?;
                state.active = None;
            }
        }
        Ok(())
    }

    fn persist(&self, conversations: &BTreeMap<String, Conversation>) -> Result<()> {
        let blob = serde_json::to_string(conversations)?;
        self.storage
            .write_blob(CONVERSATIONS_KEY, &blob)
            .inspect_err(|e| error!(error = %e, "Failed to persist conversations"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|e| CodeScopeError::Storage(format!("store lock poisoned: {}", e)))
    }
}

fn parse_collection(raw: &str) -> Result<BTreeMap<String, Conversation>> {
    serde_json::from_str(raw)
        .map_err(|e| CodeScopeError::Parse(format!("stored conversations: {}", e)))
}

fn sort_recent_first(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
