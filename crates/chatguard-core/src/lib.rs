//! ChatGuard Core
//!
//! Core types and error handling shared across ChatGuard components.
//!
//! This crate provides:
//! - The two conversational personas and their lenient label parsing
//! - Role-tagged chat messages used for both session history and upstream calls
//! - Error types and result handling

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ChatMessage, Persona, Role};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{ChatMessage, Persona, Role};
}
