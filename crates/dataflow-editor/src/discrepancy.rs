//! Discrepancy detection between saved node state and the current specification
//!
//! A validation pass, not merely a schema check: every interface, property,
//! and interface group referenced by a saved node must still exist on the
//! current node type, and every property value must match its declared type
//! and range. All discrepancies are accumulated so the caller sees one
//! message per problem, each tagged with the node type and instance id.

use serde_json::Value;

use dataflow_spec::definition::{InterfaceGroupDef, ListDtype, PropertyDef, PropertyKind};
use dataflow_spec::parser::{check_group_disjointness, select_value_allowed, value_matches_dtype};
use dataflow_spec::NodeState;

use crate::factory::NodeType;

/// Validate a saved node state against its current type definition
pub fn detect_discrepancies(ty: &NodeType, state: &NodeState) -> Vec<String> {
    let mut errors = Vec::new();
    let tag = format!("node '{}' (instance {})", ty.name, state.id);

    check_interfaces(ty, state, &tag, &mut errors);
    check_groups(ty, state, &tag, &mut errors);
    check_properties(ty, state, &tag, &mut errors);

    errors
}

fn check_interfaces(ty: &NodeType, state: &NodeState, tag: &str, errors: &mut Vec<String>) {
    for iface in &state.interfaces {
        if ty.interfaces.find(&iface.name).is_some() {
            continue;
        }
        // Indexed names belong to array or dynamic interfaces whose count is
        // instance-specific; they are tolerated.
        if is_indexed_name(&iface.name) {
            continue;
        }
        errors.push(format!(
            "{}: interface \"{}\" does not exist in the current specification",
            tag, iface.name
        ));
    }
}

fn is_indexed_name(name: &str) -> bool {
    name.ends_with(']') && name.contains('[')
}

fn check_groups(ty: &NodeType, state: &NodeState, tag: &str, errors: &mut Vec<String>) {
    for enabled in &state.enabled_interface_groups {
        if ty
            .interfaces
            .find_group(enabled.direction, &enabled.name)
            .is_none()
        {
            errors.push(format!(
                "{}: enabled interface group \"{}\" ({}) does not exist in the current specification",
                tag, enabled.name, enabled.direction
            ));
        }
    }

    // Disjointness is re-validated against the enabled set from the saved
    // state, independent of specification-time defaults.
    let group_defs: Vec<InterfaceGroupDef> = ty
        .interfaces
        .groups
        .iter()
        .map(|g| InterfaceGroupDef {
            name: g.name.clone(),
            direction: g.direction,
            side: Some(g.side),
            interfaces: g.members.clone(),
            override_: false,
        })
        .collect();
    let enabled_names: Vec<String> = state
        .enabled_interface_groups
        .iter()
        .map(|g| g.name.clone())
        .collect();

    let mut conflicts = Vec::new();
    check_group_disjointness(&group_defs, &enabled_names, &mut conflicts);
    errors.extend(conflicts.into_iter().map(|c| format!("{}: {}", tag, c)));
}

fn check_properties(ty: &NodeType, state: &NodeState, tag: &str, errors: &mut Vec<String>) {
    for prop in &state.properties {
        let Some(def) = ty.properties.find(&prop.name) else {
            errors.push(format!(
                "{}: property \"{}\" does not exist in the current specification",
                tag, prop.name
            ));
            continue;
        };
        check_property_value(def, &prop.value, tag, errors);
    }
}

fn check_property_value(def: &PropertyDef, value: &Value, tag: &str, errors: &mut Vec<String>) {
    // Null stands for an unset value and is always accepted.
    if value.is_null() {
        return;
    }
    let mismatch = |expected: &str, errors: &mut Vec<String>| {
        errors.push(format!(
            "{}: property \"{}\" of type {} holds a value that is not {}",
            tag, def.name, def.kind, expected
        ));
    };

    match def.kind {
        PropertyKind::Text | PropertyKind::Multiline | PropertyKind::Hex => {
            if !value.is_string() {
                mismatch("a string", errors);
            }
        }
        PropertyKind::Number | PropertyKind::Slider => {
            if !value.is_number() {
                mismatch("a number", errors);
            } else {
                check_range(def, value, tag, errors);
            }
        }
        PropertyKind::Integer => {
            if !value_matches_dtype(value, ListDtype::Integer) {
                mismatch("a whole number", errors);
            } else {
                check_range(def, value, tag, errors);
            }
        }
        PropertyKind::Bool => {
            if !value.is_boolean() {
                mismatch("a boolean", errors);
            }
        }
        PropertyKind::List => match value.as_array() {
            None => mismatch("an array", errors),
            Some(elements) => {
                if let Some(dtype) = def.dtype {
                    for (index, element) in elements.iter().enumerate() {
                        if !value_matches_dtype(element, dtype) {
                            errors.push(format!(
                                "{}: element {} of list property \"{}\" does not match dtype",
                                tag, index, def.name
                            ));
                        }
                    }
                }
            }
        },
        PropertyKind::Select => {
            let allowed = def.values.as_deref().unwrap_or(&[]);
            if !select_value_allowed(value, allowed) {
                errors.push(format!(
                    "{}: value of select property \"{}\" is not among its allowed values",
                    tag, def.name
                ));
            }
        }
        // Constants carry whatever the specification declared; button
        // properties have no persistent value to validate.
        PropertyKind::Constant
        | PropertyKind::ButtonUrl
        | PropertyKind::ButtonApi
        | PropertyKind::ButtonGraph => {}
    }
}

fn check_range(def: &PropertyDef, value: &Value, tag: &str, errors: &mut Vec<String>) {
    let Some(number) = value.as_f64() else {
        return;
    };
    if let Some(min) = def.min {
        if number < min {
            errors.push(format!(
                "{}: property \"{}\" value {} is below its minimum {}",
                tag, def.name, number, min
            ));
        }
    }
    if let Some(max) = def.max {
        if number > max {
            errors.push(format!(
                "{}: property \"{}\" value {} is above its maximum {}",
                tag, def.name, number, max
            ));
        }
    }
}
