//! Client-side interaction engine.
//!
//! Routes queries to chat or search, folds streamed answers into the active
//! conversation, and composes the store, backend and exporters into one
//! [`AppState`] the presentation layer drives.

pub mod accumulator;
pub mod browser;
pub mod dispatcher;
pub mod error;
pub mod state;

pub use accumulator::{accumulate, Accumulation, SnapshotSink, StreamOutcome, STREAM_FAILURE_MESSAGE};
pub use browser::FileBrowser;
pub use dispatcher::{Dispatcher, DispatcherState, IgnoredReason, SubmitOutcome};
pub use error::ChatError;
pub use state::AppState;
