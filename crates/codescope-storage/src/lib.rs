//! CodeScope Storage crate - durable client-side state.
//!
//! Provides a WAL-mode SQLite database holding a small key-value table,
//! the [`BlobStorage`] capability built on it, and the [`ConversationStore`]
//! that persists the conversation collection and the active-conversation
//! pointer as whole-document blobs.

pub mod blob;
pub mod conversations;
pub mod db;
pub mod migrations;

pub use blob::{BlobStorage, MemoryBlobStorage, SqliteBlobStorage};
pub use conversations::{ConversationStore, ACTIVE_KEY, CONVERSATIONS_KEY};
pub use db::Database;
