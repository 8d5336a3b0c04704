//! Transport to the CodeScope retrieval/generation backend.
//!
//! [`Backend`] is the port the engine talks through. [`HttpBackend`] speaks
//! the real HTTP contract with reqwest; [`MockBackend`] is a scripted stand-in
//! for tests.

pub mod backend;
pub mod decoder;
pub mod http;
pub mod mock;

pub use backend::{Backend, ChatStream, HealthStatus, IngestSummary, SearchResponse};
pub use decoder::Utf8ChunkDecoder;
pub use http::HttpBackend;
pub use mock::{ChatScript, MockBackend};
