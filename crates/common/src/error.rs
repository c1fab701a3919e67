//! Error types for specstream

use thiserror::Error;

/// Result type alias using the specstream Error
pub type Result<T> = std::result::Result<T, Error>;

/// Specstream error types
///
/// Structural errors mean the caller violated a tree lifecycle invariant.
/// They are fatal to the run's reporting: the caller must stop driving
/// events into the tree rather than risk emitting corrupt protocol.
#[derive(Error, Debug)]
pub enum Error {
    #[error("structural violation: {0}")]
    Structure(String),

    #[error("node already exists: '{name}' under node {parent}")]
    DuplicateNode { parent: u64, name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a structural lifecycle violation.
    pub fn structure(msg: impl Into<String>) -> Self {
        Error::Structure(msg.into())
    }
}
