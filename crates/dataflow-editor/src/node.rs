//! Live node instances
//!
//! A [`NodeInstance`] binds interface names to arena ids and carries property
//! values and enabled interface groups. Interface *state* lives in the arena;
//! the instance only holds the bindings, so exposed interfaces stay
//! synchronized no matter which side touches them.
//!
//! Dynamic interfaces (count controlled by a property value) are modeled as a
//! pure expected-set function plus a diff/apply step, so the regeneration
//! logic is testable without a live graph.

use serde_json::Value;
use uuid::Uuid;

use dataflow_spec::{
    Direction, EnabledGroupState, InterfaceState, NodeState, ParsedInterface, Position,
    PropertyState,
};

use crate::interfaces::{InterfaceArena, InterfaceRecord};

/// Binding of an interface name to its arena record
#[derive(Debug, Clone)]
pub struct InterfaceBinding {
    pub name: String,
    pub id: String,
    pub direction: Direction,
}

/// Live value of one property
#[derive(Debug, Clone)]
pub struct LiveProperty {
    pub name: String,
    /// None models an unset value; it serializes as null
    pub value: Option<Value>,
}

/// A node instance in a live graph
#[derive(Debug, Clone)]
pub struct NodeInstance {
    pub id: String,
    /// Node type name, resolved against the registry
    pub type_name: String,
    pub instance_name: Option<String>,
    pub position: Position,
    /// Input bindings, including direction-tagged inout interfaces
    pub inputs: Vec<InterfaceBinding>,
    pub outputs: Vec<InterfaceBinding>,
    pub properties: Vec<LiveProperty>,
    pub enabled_groups: Vec<EnabledGroupState>,
}

impl NodeInstance {
    /// Look up a binding by interface name across both directions
    pub fn binding(&self, name: &str) -> Option<&InterfaceBinding> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|b| b.name == name)
    }

    /// Look up a binding by arena id
    pub fn binding_by_id(&self, id: &str) -> Option<&InterfaceBinding> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|b| b.id == id)
    }

    /// Whether this instance owns the given interface id
    pub fn owns_interface(&self, id: &str) -> bool {
        self.binding_by_id(id).is_some()
    }

    /// Iterate over all bindings, inputs first
    pub fn bindings(&self) -> impl Iterator<Item = &InterfaceBinding> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Current value of a property
    pub fn property_value(&self, name: &str) -> Option<&Value> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_ref())
    }

    /// Set a property value, creating the slot if needed
    pub fn set_property_value(&mut self, name: &str, value: Value) {
        match self.properties.iter_mut().find(|p| p.name == name) {
            Some(prop) => prop.value = Some(value),
            None => self.properties.push(LiveProperty {
                name: name.to_string(),
                value: Some(value),
            }),
        }
    }

    /// Full serialized form of this instance, interfaces included
    ///
    /// Unlike the minimal dataflow projection, a snapshot carries *every*
    /// interface so a history step can rebuild the node on its own.
    pub fn snapshot(&self, arena: &InterfaceArena) -> NodeState {
        let interfaces = self
            .bindings()
            .map(|binding| {
                let record = arena.get(&binding.id);
                InterfaceState {
                    name: binding.name.clone(),
                    id: Some(binding.id.clone()),
                    direction: Some(binding.direction),
                    side: record.map(|r| r.side),
                    side_position: record.map(|r| r.side_position),
                    external_name: record.and_then(|r| r.external_name.clone()),
                    value: record.and_then(|r| r.value.clone()),
                }
            })
            .collect();
        NodeState {
            id: self.id.clone(),
            name: self.type_name.clone(),
            instance_name: self.instance_name.clone(),
            interfaces,
            properties: self
                .properties
                .iter()
                .map(|p| PropertyState {
                    name: p.name.clone(),
                    id: None,
                    value: p.value.clone().unwrap_or(Value::Null),
                })
                .collect(),
            enabled_interface_groups: self.enabled_groups.clone(),
            position: Some(self.position),
        }
    }

    /// Rebuild an instance from a snapshot, re-registering its interfaces
    ///
    /// Used by history replay when a removed node is brought back; the
    /// snapshot's interface ids are reused so surviving connections still
    /// resolve.
    pub fn from_snapshot(
        state: &NodeState,
        graph_id: &str,
        arena: &mut InterfaceArena,
    ) -> crate::error::Result<Self> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for iface in &state.interfaces {
            let direction = iface.direction.unwrap_or_default();
            let id = iface
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            arena.register(InterfaceRecord {
                id: id.clone(),
                graph_id: graph_id.to_string(),
                node_id: state.id.clone(),
                name: iface.name.clone(),
                direction,
                side: iface.side.unwrap_or_else(|| direction.default_side()),
                side_position: iface.side_position.unwrap_or(0),
                interface_type: None,
                value: iface.value.clone(),
                external_name: iface.external_name.clone(),
                max_connections_count: None,
                connection_count: 0,
                proxy_of: None,
            })?;
            let binding = InterfaceBinding {
                name: iface.name.clone(),
                id,
                direction,
            };
            match direction {
                Direction::Output => outputs.push(binding),
                Direction::Input | Direction::Inout => inputs.push(binding),
            }
        }
        Ok(Self {
            id: state.id.clone(),
            type_name: state.name.clone(),
            instance_name: state.instance_name.clone(),
            position: state.position.unwrap_or_default(),
            inputs,
            outputs,
            properties: state
                .properties
                .iter()
                .map(|p| LiveProperty {
                    name: p.name.clone(),
                    value: Some(p.value.clone()),
                })
                .collect(),
            enabled_groups: state.enabled_interface_groups.clone(),
        })
    }

    /// Drop this instance's interface records from the arena
    pub fn release_interfaces(&self, arena: &mut InterfaceArena) {
        for binding in self.bindings() {
            arena.remove(&binding.id);
        }
    }
}

/// Expected set of indexed interface names for a dynamic interface
///
/// Pure function: `(count, template name)` to `name[0] .. name[count-1]`.
pub fn expected_dynamic_names(base: &str, count: u64) -> Vec<String> {
    (0..count).map(|i| format!("{}[{}]", base, i)).collect()
}

/// Diff between the current indexed set and the expected one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Compute the diff for one dynamic interface template
///
/// `current` is the full set of interface names on the node; only names
/// generated from `base` participate.
pub fn diff_dynamic_interfaces(base: &str, count: u64, current: &[String]) -> DynamicDiff {
    let expected = expected_dynamic_names(base, count);
    let prefix = format!("{}[", base);
    let existing: Vec<&String> = current.iter().filter(|n| n.starts_with(&prefix)).collect();

    DynamicDiff {
        added: expected
            .iter()
            .filter(|e| !existing.iter().any(|c| *c == *e))
            .cloned()
            .collect(),
        removed: existing
            .iter()
            .filter(|c| !expected.contains(**c))
            .map(|c| (*c).to_string())
            .collect(),
    }
}

/// Apply a dynamic diff to an instance, creating and dropping arena records
///
/// New interfaces copy side and type from the template and receive fresh ids;
/// slots are appended after the template's declared position.
pub fn apply_dynamic_diff(
    instance: &mut NodeInstance,
    template: &ParsedInterface,
    diff: &DynamicDiff,
    graph_id: &str,
    arena: &mut InterfaceArena,
) -> crate::error::Result<()> {
    for name in &diff.removed {
        if let Some(position) = instance
            .inputs
            .iter()
            .position(|b| &b.name == name)
        {
            let binding = instance.inputs.remove(position);
            arena.remove(&binding.id);
        } else if let Some(position) = instance.outputs.iter().position(|b| &b.name == name) {
            let binding = instance.outputs.remove(position);
            arena.remove(&binding.id);
        }
    }

    for name in &diff.added {
        let taken: Vec<i64> = instance
            .bindings()
            .filter_map(|b| arena.get(&b.id))
            .filter(|r| r.side == template.side)
            .map(|r| r.side_position)
            .collect();
        let mut slot = template.side_position;
        while taken.contains(&slot) {
            slot += 1;
        }

        let id = Uuid::new_v4().to_string();
        arena.register(InterfaceRecord {
            id: id.clone(),
            graph_id: graph_id.to_string(),
            node_id: instance.id.clone(),
            name: name.clone(),
            direction: template.direction,
            side: template.side,
            side_position: slot,
            interface_type: template.interface_type.clone(),
            value: None,
            external_name: None,
            max_connections_count: template.max_connections_count,
            connection_count: 0,
            proxy_of: None,
        })?;
        let binding = InterfaceBinding {
            name: name.clone(),
            id,
            direction: template.direction,
        };
        match template.direction {
            Direction::Output => instance.outputs.push(binding),
            Direction::Input | Direction::Inout => instance.inputs.push(binding),
        }
    }
    Ok(())
}
