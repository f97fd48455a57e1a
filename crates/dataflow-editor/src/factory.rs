//! Node type factory
//!
//! Turns a resolved node definition into a constructible [`NodeType`] whose
//! instances support save, load, dynamic-interface regeneration, and
//! discrepancy detection. Parsing is delegated to the declarative layer; any
//! parser error is prefixed with the node name and propagated instead of
//! registering a partially-valid type.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use uuid::Uuid;

use dataflow_spec::definition::{PropertyDef, PropertyKind, Side};
use dataflow_spec::parser::{parse_interfaces, parse_properties, ParsedInterfaces, ParsedProperties};
use dataflow_spec::{Direction, EnabledGroupState, NodeState, ResolvedNode};

use crate::discrepancy::detect_discrepancies;
use crate::interfaces::{InterfaceArena, InterfaceRecord};
use crate::node::{
    apply_dynamic_diff, diff_dynamic_interfaces, InterfaceBinding, LiveProperty, NodeInstance,
};

/// A concrete, constructible node type
#[derive(Debug, Clone)]
pub struct NodeType {
    pub name: String,
    pub category: Option<String>,
    pub layer: Option<String>,
    pub description: Option<String>,
    pub interfaces: ParsedInterfaces,
    pub properties: ParsedProperties,
    /// Groups enabled on fresh instances; saved state always overrides these
    pub default_groups: Vec<String>,
    pub extends: Vec<String>,
    pub extending: Vec<String>,
    pub siblings: Vec<String>,
}

/// Build a node type from a resolved definition
///
/// On any parser error, each message is prefixed with the node name and the
/// whole array is returned.
pub fn create_node_type(resolved: &ResolvedNode) -> Result<NodeType, Vec<String>> {
    let def = &resolved.def;
    let mut errors = Vec::new();

    let interfaces = match parse_interfaces(
        &def.interfaces,
        &def.interface_groups,
        &def.default_interface_groups,
    ) {
        Ok(parsed) => parsed,
        Err(messages) => {
            errors.extend(messages);
            ParsedInterfaces::default()
        }
    };
    let properties = match parse_properties(&def.properties) {
        Ok(parsed) => parsed,
        Err(messages) => {
            errors.extend(messages);
            ParsedProperties::default()
        }
    };

    if !errors.is_empty() {
        return Err(errors
            .into_iter()
            .map(|e| format!("{}: {}", def.name, e))
            .collect());
    }

    Ok(NodeType {
        name: def.name.clone(),
        category: def.category.clone(),
        layer: def.layer.clone(),
        description: def.description.clone(),
        interfaces,
        properties,
        default_groups: def.default_interface_groups.clone(),
        extends: def.extends.clone(),
        extending: resolved.extending.clone(),
        siblings: resolved.siblings.clone(),
    })
}

impl NodeType {
    /// Create a fresh instance with default property values, default-enabled
    /// groups, and newly allocated interface ids
    pub fn instantiate(
        &self,
        graph_id: &str,
        arena: &mut InterfaceArena,
    ) -> crate::error::Result<NodeInstance> {
        let mut instance = NodeInstance {
            id: Uuid::new_v4().to_string(),
            type_name: self.name.clone(),
            instance_name: None,
            position: Default::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: self
                .properties
                .iter_flat()
                .into_iter()
                .map(|def| LiveProperty {
                    name: def.name.clone(),
                    value: default_property_value(def),
                })
                .collect(),
            enabled_groups: self
                .default_groups
                .iter()
                .filter_map(|name| {
                    self.interfaces.groups.iter().find(|g| &g.name == name).map(|g| {
                        EnabledGroupState {
                            name: g.name.clone(),
                            direction: g.direction,
                        }
                    })
                })
                .collect(),
        };

        for parsed in self.interfaces.iter() {
            // Dynamic templates materialize as indexed copies below.
            if parsed.dynamic.is_some() {
                continue;
            }
            let id = Uuid::new_v4().to_string();
            arena.register(InterfaceRecord {
                id: id.clone(),
                graph_id: graph_id.to_string(),
                node_id: instance.id.clone(),
                name: parsed.name.clone(),
                direction: parsed.direction,
                side: parsed.side,
                side_position: parsed.side_position,
                interface_type: parsed.interface_type.clone(),
                value: None,
                external_name: parsed.external_name.clone(),
                max_connections_count: parsed.max_connections_count,
                connection_count: 0,
                proxy_of: None,
            })?;
            let binding = InterfaceBinding {
                name: parsed.name.clone(),
                id,
                direction: parsed.direction,
            };
            match parsed.direction {
                Direction::Output => instance.outputs.push(binding),
                Direction::Input | Direction::Inout => instance.inputs.push(binding),
            }
        }

        self.regenerate_dynamic(&mut instance, None, graph_id, arena)?;
        Ok(instance)
    }

    /// Project live instance state to the minimal portable form
    ///
    /// Generated interfaces (array expansion, dynamic copies) are serialized
    /// only when connected, exposed, or carrying a value; unset property
    /// values are normalized to null.
    pub fn save(&self, instance: &NodeInstance, arena: &InterfaceArena) -> NodeState {
        let mut state = instance.snapshot(arena);
        state.interfaces.retain(|iface| {
            let generated = iface.name.ends_with(']') && iface.name.contains('[');
            if !generated {
                return true;
            }
            let record = iface.id.as_deref().and_then(|id| arena.get(id));
            let connected = record.map(|r| r.connection_count > 0).unwrap_or(false);
            let exposed = record.map(|r| r.external_name.is_some()).unwrap_or(false);
            connected || exposed || iface.value.is_some()
        });
        state
    }

    /// Load saved state into an instance: the consistency gate
    ///
    /// Dynamic interfaces are re-derived from the saved controlling property
    /// *before* discrepancy checking, so expected-count mismatches don't
    /// falsely fire. On any discrepancy the instance is left untouched and
    /// the accumulated error strings are returned.
    pub fn load(
        &self,
        instance: &mut NodeInstance,
        state: &NodeState,
        graph_id: &str,
        arena: &mut InterfaceArena,
    ) -> Result<(), Vec<String>> {
        self.regenerate_dynamic(instance, Some(state), graph_id, arena)
            .map_err(|e| vec![format!("{}: {}", self.name, e)])?;

        let errors = detect_discrepancies(self, state);
        if !errors.is_empty() {
            return Err(errors);
        }

        if state.instance_name.is_some() {
            instance.instance_name = state.instance_name.clone();
        }
        if let Some(position) = state.position {
            instance.position = position;
        }

        for prop in &state.properties {
            let value = if prop.value.is_null() {
                None
            } else {
                Some(prop.value.clone())
            };
            match instance.properties.iter_mut().find(|p| p.name == prop.name) {
                Some(live) => live.value = value,
                None => instance.properties.push(LiveProperty {
                    name: prop.name.clone(),
                    value,
                }),
            }
        }

        // State always wins over specification defaults: a group not
        // explicitly re-enabled stays hidden, default or not.
        instance.enabled_groups = state.enabled_interface_groups.clone();

        self.apply_interface_states(instance, state, arena);
        self.reassign_free_positions(instance, state, arena);

        Ok(())
    }

    /// Saved-state-compatible normalization without a live instance
    ///
    /// Used by the graph template factory to validate contained nodes before
    /// any instantiation happens.
    pub fn normalize_state(&self, state: &NodeState) -> Result<(), Vec<String>> {
        let errors = detect_discrepancies(self, state);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Re-derive dynamic interface copies from the controlling property
    ///
    /// The count is taken from the saved state when present, else from the
    /// instance, else from the declared default.
    pub fn regenerate_dynamic(
        &self,
        instance: &mut NodeInstance,
        state: Option<&NodeState>,
        graph_id: &str,
        arena: &mut InterfaceArena,
    ) -> crate::error::Result<()> {
        let templates: Vec<_> = self
            .interfaces
            .iter()
            .filter(|p| p.dynamic.is_some())
            .cloned()
            .collect();
        for template in templates {
            let control = template
                .dynamic
                .as_ref()
                .map(|d| d.count_property.as_str())
                .unwrap_or_default();
            let count = state
                .and_then(|s| s.properties.iter().find(|p| p.name == control))
                .map(|p| p.value.clone())
                .or_else(|| instance.property_value(control).cloned())
                .or_else(|| {
                    self.properties
                        .find(control)
                        .and_then(default_property_value)
                })
                .and_then(|v| v.as_u64())
                .unwrap_or(0);

            let current: Vec<String> = instance.bindings().map(|b| b.name.clone()).collect();
            let diff = diff_dynamic_interfaces(&template.name, count, &current);
            apply_dynamic_diff(instance, &template, &diff, graph_id, arena)?;
        }
        Ok(())
    }

    fn apply_interface_states(
        &self,
        instance: &mut NodeInstance,
        state: &NodeState,
        arena: &mut InterfaceArena,
    ) {
        for saved in &state.interfaces {
            let binding = instance
                .inputs
                .iter_mut()
                .chain(instance.outputs.iter_mut())
                .find(|b| b.name == saved.name);
            let Some(binding) = binding else {
                // Tolerated indexed leftovers from a different count
                log::debug!(
                    "saved interface '{}' has no live counterpart on node '{}'",
                    saved.name,
                    instance.id
                );
                continue;
            };

            // Reuse the saved id so connections in the same document resolve.
            if let Some(saved_id) = &saved.id {
                if saved_id != &binding.id && arena.rekey(&binding.id, saved_id) {
                    binding.id = saved_id.clone();
                }
            }
            if let Some(record) = arena.get_mut(&binding.id) {
                record.value = saved.value.clone();
                if let Some(side) = saved.side {
                    record.side = side;
                }
                if let Some(position) = saved.side_position {
                    record.side_position = position;
                }
                if saved.external_name.is_some() {
                    record.external_name = saved.external_name.clone();
                }
            }
        }
    }

    /// Recompute slots only for interfaces absent from the saved state, so
    /// specification changes that add interfaces don't collide with
    /// previously assigned positions
    fn reassign_free_positions(
        &self,
        instance: &NodeInstance,
        state: &NodeState,
        arena: &mut InterfaceArena,
    ) {
        let saved: HashSet<&str> = state.interfaces.iter().map(|s| s.name.as_str()).collect();

        let mut taken: HashMap<Side, HashSet<i64>> = HashMap::new();
        for binding in instance.bindings().filter(|b| saved.contains(b.name.as_str())) {
            if let Some(record) = arena.get(&binding.id) {
                taken.entry(record.side).or_default().insert(record.side_position);
            }
        }

        for binding in instance.bindings().filter(|b| !saved.contains(b.name.as_str())) {
            let Some(record) = arena.get_mut(&binding.id) else {
                continue;
            };
            let used = taken.entry(record.side).or_default();
            let mut slot = 0;
            while used.contains(&slot) {
                slot += 1;
            }
            used.insert(slot);
            record.side_position = slot;
        }
    }
}

/// Default live value for a property declaration
pub fn default_property_value(def: &PropertyDef) -> Option<Value> {
    if let Some(default) = &def.default {
        return Some(default.clone());
    }
    match def.kind {
        PropertyKind::Number => Some(Value::from(def.min.unwrap_or(0.0))),
        PropertyKind::Integer => Some(Value::from(def.min.map(|m| m as i64).unwrap_or(0))),
        PropertyKind::Slider => def.min.map(Value::from),
        PropertyKind::Text | PropertyKind::Multiline | PropertyKind::Hex => {
            Some(Value::from(""))
        }
        PropertyKind::Bool => Some(Value::from(false)),
        PropertyKind::Select => def.values.as_ref().and_then(|v| v.first().cloned()),
        PropertyKind::List => Some(Value::Array(Vec::new())),
        PropertyKind::Constant
        | PropertyKind::ButtonUrl
        | PropertyKind::ButtonApi
        | PropertyKind::ButtonGraph => None,
    }
}
