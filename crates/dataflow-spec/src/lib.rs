//! Dataflow Spec - Declarative layer of the Lattix dataflow editor
//!
//! This crate turns raw specification and dataflow documents into validated,
//! normalized data the editor can work with:
//!
//! - Document models for the two portable JSON formats
//! - Interface and property parsing with accumulated error reporting
//! - Multi-parent inheritance resolution with cycle detection
//! - Versioned JSON Schema validation with source line mapping
//! - Async resolution of nested specification includes
//!
//! Everything here is a pure data transformation; the live graph model and
//! its history live in the `dataflow-editor` crate.

pub mod definition;
pub mod error;
pub mod include;
pub mod inherit;
pub mod parser;
pub mod schema;

// Re-export key types
pub use definition::{
    Anchor, ConnectionState, DataflowDoc, Direction, EnabledGroupState, ExposedInterfaceState,
    GraphState, InterfaceDef, InterfaceGroupDef, InterfaceState, MetadataOptions, MetadataPatch,
    NodeDef, NodeState, Position, PropertyDef, PropertyKind, PropertyState, Side,
    SpecificationDoc, TypeSet,
};
pub use error::{Result, SpecError};
pub use include::{HttpFetcher, IncludeFetcher};
pub use inherit::{resolve_inheritance, ResolvedNode};
pub use parser::{
    parse_interfaces, parse_properties, ParsedGroup, ParsedInterface, ParsedInterfaces,
    ParsedProperties,
};
pub use schema::FORMAT_VERSION;
