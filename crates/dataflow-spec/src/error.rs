//! Error types for specification processing

use thiserror::Error;

/// Result type alias using SpecError
pub type Result<T> = std::result::Result<T, SpecError>;

/// Errors that can occur while processing a specification
///
/// These are the fail-fast structural errors. Semantic validation that can
/// continue past a problem (interface parsing, discrepancy detection) returns
/// accumulated `Vec<String>` lists instead.
#[derive(Debug, Error)]
pub enum SpecError {
    /// A node's extends list references a node that does not exist
    #[error("unknown node '{parent}' in extends list of node '{node}'")]
    UnknownParent { node: String, parent: String },

    /// A node's extends list names the same parent twice
    #[error("repeated class '{parent}' in extends list of node '{node}'")]
    RepeatedParent { node: String, parent: String },

    /// A node's extends chain reaches itself
    #[error("circular extends chain detected at node '{node}'")]
    InheritanceCycle { node: String },

    /// An inherited array entry collides without an explicit override flag
    #[error("node '{node}' inherits conflicting entry '{entry}' (set override to replace it)")]
    ConflictingEntry { node: String, entry: String },

    /// A merged definition no longer deserializes into a node definition
    #[error("malformed node definition '{node}': {message}")]
    Malformed { node: String, message: String },

    /// Fetching or decoding an included specification failed
    #[error("failed to fetch include '{url}': {message}")]
    IncludeFetch { url: String, message: String },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SpecError {
    /// Create an include fetch error with a message
    pub fn include_fetch(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IncludeFetch {
            url: url.into(),
            message: message.into(),
        }
    }
}
