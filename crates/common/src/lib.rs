//! Specstream Common Library
//!
//! Shared types and errors for the specstream reporter and its adapters.

pub mod error;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;

/// Specstream version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
