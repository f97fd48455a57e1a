//! Dataflow Editor - Stateful layer of the Lattix dataflow editor
//!
//! Built on the declarative `dataflow-spec` crate, this crate provides the
//! in-memory graph model and its data-integrity guarantees:
//!
//! - `Graph`: live nodes and connections with validated mutations and
//!   synchronous observer events
//! - `NodeType` factory: save/load with discrepancy detection and
//!   dynamic-interface regeneration
//! - `InterfaceArena`: id-addressed interface state with synchronized
//!   exposed-interface proxies
//! - `GraphTemplate`: reusable subgraphs with exposed interfaces
//! - `History`: transactional undo/redo with scoped replay suppression
//! - `Editor`: top-level specification and dataflow load/save orchestration
//!
//! The model is single-threaded and cooperative: mutations are synchronous
//! calls, and observers run inline inside the mutating call.

pub mod discrepancy;
pub mod error;
pub mod events;
pub mod factory;
pub mod graph;
pub mod history;
pub mod interfaces;
pub mod manager;
pub mod node;
pub mod registry;
pub mod template;

// Re-export key types
pub use discrepancy::detect_discrepancies;
pub use error::{EditorError, Result};
pub use events::{
    ActionSink, GraphEvent, NullActionSink, ObserverRegistry, PropertyAction, Subscription,
    VecActionSink,
};
pub use factory::{create_node_type, NodeType};
pub use graph::{Connection, Graph};
pub use history::{History, ReplayGuard, Step, StepKind};
pub use interfaces::{InterfaceArena, InterfaceRecord};
pub use manager::Editor;
pub use node::{InterfaceBinding, LiveProperty, NodeInstance};
pub use registry::NodeTypeRegistry;
pub use template::{build_graph_template, GraphTemplate};
