//! Error types for the editor engine

use thiserror::Error;

/// Result type alias using EditorError
pub type Result<T> = std::result::Result<T, EditorError>;

/// Errors raised by live graph mutations and editor orchestration
///
/// Validation that accumulates (discrepancy detection, template building)
/// returns `Vec<String>` lists instead; these are the single-operation
/// failures.
#[derive(Debug, Error)]
pub enum EditorError {
    /// No specification has been loaded yet
    #[error("no specification loaded")]
    NoSpecification,

    /// A node state references a type missing from the registry
    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    /// A graph id could not be resolved
    #[error("unknown graph '{0}'")]
    UnknownGraph(String),

    /// A node instance could not be found in the graph
    #[error("node '{0}' not found")]
    NodeNotFound(String),

    /// A connection could not be found in the graph
    #[error("connection '{0}' not found")]
    ConnectionNotFound(String),

    /// An interface id is not present in the arena
    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    /// An interface id is already owned by a different graph
    #[error("interface '{id}' is already registered to graph '{graph}'")]
    InterfaceConflict { id: String, graph: String },

    /// The (from, to) pair is already connected
    #[error("connection from '{from}' to '{to}' already exists")]
    DuplicateConnection { from: String, to: String },

    /// The from end is not an output or inout interface
    #[error("interface '{0}' cannot act as a connection source")]
    InvalidSource(String),

    /// The to end is not an input interface
    #[error("interface '{0}' cannot act as a connection target")]
    InvalidTarget(String),

    /// Both ends sit on the same node and loopback is not allowed
    #[error("loopback connections are disabled")]
    LoopbackDisabled,

    /// The interfaces share no common type
    #[error("incompatible interface types between '{from}' and '{to}'")]
    TypeMismatch { from: String, to: String },

    /// The target interface is at its connection limit
    #[error("interface '{0}' accepts no further connections")]
    ConnectionLimit(String),

    /// The property exists but is not a button property
    #[error("property '{0}' is not a button property")]
    NotAButton(String),

    /// A property could not be found on the node
    #[error("property '{0}' not found")]
    PropertyNotFound(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
