//! Document model for specifications and dataflows
//!
//! These types define the two portable JSON formats the editor consumes and
//! produces: the declarative *specification* (node and graph definitions) and
//! the *dataflow* (a saved graph with node instances, connections, and
//! exposed interfaces).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Direction of an interface
///
/// `Inout` interfaces are stored alongside inputs in parsed form but keep
/// their direction tag; they may act as the `from` end of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Input,
    Output,
    Inout,
}

impl Direction {
    /// The side an interface of this direction renders on when none is given
    pub fn default_side(&self) -> Side {
        match self {
            Direction::Output => Side::Right,
            Direction::Input | Direction::Inout => Side::Left,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
            Direction::Inout => write!(f, "inout"),
        }
    }
}

/// Which side of the node an interface renders on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

/// A single type name or a set of alternatives for polymorphic matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeSet {
    One(String),
    Many(Vec<String>),
}

impl TypeSet {
    /// Iterate over the type names in this set
    pub fn names(&self) -> impl Iterator<Item = &str> {
        match self {
            TypeSet::One(name) => std::slice::from_ref(name).iter(),
            TypeSet::Many(names) => names.iter(),
        }
        .map(|s| s.as_str())
    }

    /// Check whether this set contains a type name
    pub fn contains(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    /// Two type sets are connectable if they share at least one type name
    pub fn matches(&self, other: &TypeSet) -> bool {
        self.names().any(|n| other.contains(n))
    }
}

/// Declarative interface controlled by a property's numeric value
///
/// The named property's integer value determines how many indexed copies
/// (`name[0]`, `name[1]`, ...) of the interface exist on a live node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicInterfaceDef {
    /// Name of the property whose value controls the interface count
    pub count_property: String,
}

/// Specification-level interface declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceDef {
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    /// Interface type, a single string or a set of strings
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub interface_type: Option<TypeSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    /// Explicit slot on the side; must be unique per side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_position: Option<i64>,
    /// Name the interface is exposed under when its node sits in a subgraph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
    /// Half-open range `[low, high)` generating indexed interface copies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array: Option<[i64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicInterfaceDef>,
    /// Replaces an inherited interface of the same name during resolution
    #[serde(rename = "override", default, skip_serializing_if = "is_false")]
    pub override_: bool,
}

/// The fixed enumeration of property kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyKind {
    Constant,
    Text,
    Multiline,
    Number,
    Integer,
    Hex,
    Select,
    Bool,
    Slider,
    List,
    ButtonUrl,
    ButtonApi,
    ButtonGraph,
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PropertyKind::Constant => "constant",
            PropertyKind::Text => "text",
            PropertyKind::Multiline => "multiline",
            PropertyKind::Number => "number",
            PropertyKind::Integer => "integer",
            PropertyKind::Hex => "hex",
            PropertyKind::Select => "select",
            PropertyKind::Bool => "bool",
            PropertyKind::Slider => "slider",
            PropertyKind::List => "list",
            PropertyKind::ButtonUrl => "button-url",
            PropertyKind::ButtonApi => "button-api",
            PropertyKind::ButtonGraph => "button-graph",
        };
        write!(f, "{}", name)
    }
}

/// Element type of a list property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListDtype {
    String,
    Number,
    Integer,
    Boolean,
}

/// Specification-level property declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    /// Allowed values for a select property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    /// Element type for a list property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<ListDtype>,
    /// Sub-properties whose visibility this property toggles
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<PropertyDef>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub readonly: bool,
    /// Target URL for a button-url property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Remote procedure name for a button-api property
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure_name: Option<String>,
    /// Replaces an inherited property of the same name during resolution
    #[serde(rename = "override", default, skip_serializing_if = "is_false")]
    pub override_: bool,
}

/// Specification-level interface group declaration
///
/// A group and its members are mutually exclusive for rendering: enabling a
/// group hides the members but the underlying interfaces stay connectable
/// through the group's aggregate identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceGroupDef {
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    /// Member interface names; must all exist and be disjoint across enabled groups
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(rename = "override", default, skip_serializing_if = "is_false")]
    pub override_: bool,
}

/// Specification-level node definition, pre-resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyDef>,
    /// Parent node names, merged in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
    #[serde(rename = "abstract", default, skip_serializing_if = "is_false")]
    pub abstract_: bool,
    /// Category nodes must be named after the last segment of their category
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_category: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interface_groups: Vec<InterfaceGroupDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_interface_groups: Vec<String>,
}

impl NodeDef {
    /// Create an empty node definition with the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: None,
            layer: None,
            description: None,
            interfaces: Vec::new(),
            properties: Vec::new(),
            extends: Vec::new(),
            abstract_: false,
            is_category: false,
            interface_groups: Vec::new(),
            default_interface_groups: Vec::new(),
        }
    }

    /// Last path segment of the category, if any
    pub fn category_leaf(&self) -> Option<&str> {
        self.category
            .as_deref()
            .map(|c| c.rsplit('/').next().unwrap_or(c))
    }
}

/// A 2D canvas position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Serialized state of a single interface on a node instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Serialized state of a single property on a node instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// An interface group enabled on a node instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnabledGroupState {
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Serialized state of a node instance in a dataflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    /// Instance id, unique within the dataflow
    pub id: String,
    /// Node type name, resolved against the active specification
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InterfaceState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled_interface_groups: Vec<EnabledGroupState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// An anchor point (waypoint) on a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub x: f64,
    pub y: f64,
}

/// Serialized connection between two interface ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anchors: Vec<Anchor>,
}

/// A graph-level exposed interface: a reference to an interior interface id
/// plus the external name it is published under
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedInterfaceState {
    /// Id of the interior interface being exposed
    pub id: String,
    /// External name; unique within the graph
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_position: Option<i64>,
}

/// Serialized form of a graph, used both for specification-level graph
/// templates and for saved dataflow graphs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeState>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<ConnectionState>,
    /// Exposed interfaces of this graph
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<ExposedInterfaceState>,
}

/// Rendering style of connection paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStyle {
    #[default]
    Curved,
    Orthogonal,
}

/// Line pattern of connection paths
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPattern {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

/// Styling, layout, and feature-flag options carried by a specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataOptions {
    /// Whether a connection may start and end on the same node
    pub allow_loopback: bool,
    pub connection_style: ConnectionStyle,
    pub interface_connection_pattern: ConnectionPattern,
    pub interface_connection_color: String,
    /// Snap step for node movement, in canvas units
    pub movement_step: i64,
    pub background_size: i64,
    pub read_only: bool,
    pub hide_hud: bool,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            allow_loopback: false,
            connection_style: ConnectionStyle::default(),
            interface_connection_pattern: ConnectionPattern::default(),
            interface_connection_color: "#FFFFFF".to_string(),
            movement_step: 1,
            background_size: 100,
            read_only: false,
            hide_hud: false,
        }
    }
}

/// Partial metadata carried by a dataflow, overriding specification metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataPatch {
    pub allow_loopback: Option<bool>,
    pub connection_style: Option<ConnectionStyle>,
    pub interface_connection_pattern: Option<ConnectionPattern>,
    pub interface_connection_color: Option<String>,
    pub movement_step: Option<i64>,
    pub background_size: Option<i64>,
    pub read_only: Option<bool>,
    pub hide_hud: Option<bool>,
}

impl MetadataOptions {
    /// Apply a dataflow-level override block on top of these options
    pub fn apply(&mut self, patch: &MetadataPatch) {
        if let Some(v) = patch.allow_loopback {
            self.allow_loopback = v;
        }
        if let Some(v) = patch.connection_style {
            self.connection_style = v;
        }
        if let Some(v) = patch.interface_connection_pattern {
            self.interface_connection_pattern = v;
        }
        if let Some(ref v) = patch.interface_connection_color {
            self.interface_connection_color = v.clone();
        }
        if let Some(v) = patch.movement_step {
            self.movement_step = v;
        }
        if let Some(v) = patch.background_size {
            self.background_size = v;
        }
        if let Some(v) = patch.read_only {
            self.read_only = v;
        }
        if let Some(v) = patch.hide_hud {
            self.hide_hud = v;
        }
    }
}

/// A complete specification document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub graphs: Vec<GraphState>,
    /// Graphs pulled in from other dataflows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_graphs: Vec<GraphState>,
    /// URLs of nested specifications to merge in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default)]
    pub metadata: MetadataOptions,
}

/// A complete dataflow document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataflowDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub graphs: Vec<GraphState>,
    /// Id of the graph the editor shows first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_graph: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataPatch>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_default_side() {
        assert_eq!(Direction::Input.default_side(), Side::Left);
        assert_eq!(Direction::Inout.default_side(), Side::Left);
        assert_eq!(Direction::Output.default_side(), Side::Right);
    }

    #[test]
    fn test_type_set_matching() {
        let scalar = TypeSet::One("signal".to_string());
        let poly = TypeSet::Many(vec!["signal".to_string(), "constant".to_string()]);
        let other = TypeSet::One("image".to_string());

        assert!(scalar.matches(&poly));
        assert!(poly.matches(&scalar));
        assert!(!scalar.matches(&other));
    }

    #[test]
    fn test_interface_def_round_trip() {
        let json = serde_json::json!({
            "name": "in",
            "direction": "inout",
            "type": ["signal", "constant"],
            "sidePosition": 2
        });
        let def: InterfaceDef = serde_json::from_value(json).unwrap();
        assert_eq!(def.direction, Direction::Inout);
        assert_eq!(def.side_position, Some(2));
        assert!(def.interface_type.unwrap().contains("constant"));
    }

    #[test]
    fn test_property_kind_wire_names() {
        let json = serde_json::to_value(PropertyKind::ButtonApi).unwrap();
        assert_eq!(json, serde_json::json!("button-api"));
        let kind: PropertyKind = serde_json::from_value(serde_json::json!("slider")).unwrap();
        assert_eq!(kind, PropertyKind::Slider);
    }

    #[test]
    fn test_category_leaf() {
        let mut def = NodeDef::named("Edges");
        def.category = Some("Filters/Edges".to_string());
        assert_eq!(def.category_leaf(), Some("Edges"));
        def.category = Some("Filters".to_string());
        assert_eq!(def.category_leaf(), Some("Filters"));
    }

    #[test]
    fn test_metadata_patch() {
        let mut options = MetadataOptions::default();
        assert!(!options.allow_loopback);

        let patch = MetadataPatch {
            allow_loopback: Some(true),
            movement_step: Some(10),
            ..Default::default()
        };
        options.apply(&patch);
        assert!(options.allow_loopback);
        assert_eq!(options.movement_step, 10);
        assert_eq!(options.background_size, 100);
    }

    #[test]
    fn test_specification_doc_defaults() {
        let doc: SpecificationDoc = serde_json::from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(doc.version.as_deref(), Some("1.0"));
        assert!(doc.nodes.is_empty());
        assert_eq!(doc.metadata, MetadataOptions::default());
    }
}
