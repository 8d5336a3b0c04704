//! Shared domain model for the CodeScope client engine.
//!
//! Every other `codescope-*` crate builds on the types, error taxonomy,
//! configuration and engine events defined here.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::CodeScopeConfig;
pub use error::{CodeScopeError, Result};
pub use events::EngineEvent;
pub use types::*;
