//! Inheritance resolution for node definitions
//!
//! Resolves multi-parent `extends` chains into fully merged, concrete node
//! definitions. The merge is a pure transformation over `serde_json` values:
//! definitions are never merged as live objects, only as plain data, and the
//! result is materialized back into a typed [`NodeDef`].
//!
//! Unlike the accumulating validators elsewhere, a broken inheritance chain
//! makes every dependent node meaningless, so this module fails fast with a
//! [`SpecError`].

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::{Map, Value};

use crate::definition::NodeDef;
use crate::error::{Result, SpecError};

/// A node definition with all extends chains flattened, plus derived edges
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    /// The merged definition; non-inheritable flags of ancestors stripped
    pub def: NodeDef,
    /// Names of nodes that declare this node as a parent
    pub extending: Vec<String>,
    /// Other nodes sharing a common non-abstract parent, excluding self
    pub siblings: Vec<String>,
}

/// Fields a child never inherits from a parent
const NON_INHERITABLE: &[&str] = &["extends", "abstract", "isCategory", "name"];

/// Resolve a set of node definitions into concrete, fully merged nodes
///
/// Resolution is memoized per node, so resolving the same set in a different
/// declaration order yields identical output. Abstract nodes participate in
/// merging but are filtered from the result.
pub fn resolve_inheritance(definitions: &[NodeDef]) -> Result<Vec<ResolvedNode>> {
    let by_name: HashMap<&str, &NodeDef> = definitions
        .iter()
        .map(|def| (def.name.as_str(), def))
        .collect();

    let mut memo: HashMap<String, Value> = HashMap::new();
    let mut resolved = Vec::with_capacity(definitions.len());

    for def in definitions {
        let mut in_progress = HashSet::new();
        let value = resolve_one(def, &by_name, &mut memo, &mut in_progress)?;
        if def.abstract_ {
            continue;
        }
        let merged: NodeDef =
            serde_json::from_value(value).map_err(|e| SpecError::Malformed {
                node: def.name.clone(),
                message: e.to_string(),
            })?;
        resolved.push(ResolvedNode {
            def: merged,
            extending: Vec::new(),
            siblings: Vec::new(),
        });
    }

    derive_relations(definitions, &mut resolved);
    Ok(resolved)
}

fn resolve_one(
    def: &NodeDef,
    by_name: &HashMap<&str, &NodeDef>,
    memo: &mut HashMap<String, Value>,
    in_progress: &mut HashSet<String>,
) -> Result<Value> {
    if let Some(cached) = memo.get(&def.name) {
        return Ok(cached.clone());
    }
    if !in_progress.insert(def.name.clone()) {
        return Err(SpecError::InheritanceCycle {
            node: def.name.clone(),
        });
    }

    let mut seen_parents = HashSet::new();
    // Later parents take precedence, so fold them left to right.
    let mut base = Value::Object(Map::new());
    for parent_name in &def.extends {
        if !seen_parents.insert(parent_name.as_str()) {
            return Err(SpecError::RepeatedParent {
                node: def.name.clone(),
                parent: parent_name.clone(),
            });
        }
        let parent = by_name
            .get(parent_name.as_str())
            .ok_or_else(|| SpecError::UnknownParent {
                node: def.name.clone(),
                parent: parent_name.clone(),
            })?;
        let mut parent_value = resolve_one(parent, by_name, memo, in_progress)?;
        strip_non_inheritable(&mut parent_value);
        base = deep_merge(base, parent_value, &def.name)?;
    }

    let own = serde_json::to_value(def)?;
    let merged = deep_merge(base, own, &def.name)?;

    in_progress.remove(&def.name);
    memo.insert(def.name.clone(), merged.clone());
    Ok(merged)
}

fn strip_non_inheritable(value: &mut Value) {
    if let Value::Object(map) = value {
        for key in NON_INHERITABLE {
            map.remove(*key);
        }
    }
}

/// Merge `over` onto `base`: objects recurse, named arrays merge element-wise,
/// anything else is replaced by `over`
fn deep_merge(base: Value, over: Value, node: &str) -> Result<Value> {
    match (base, over) {
        (Value::Object(mut base_map), Value::Object(over_map)) => {
            for (key, over_value) in over_map {
                match base_map.remove(&key) {
                    Some(base_value) => {
                        let merged = deep_merge(base_value, over_value, node)?;
                        base_map.insert(key, merged);
                    }
                    None => {
                        base_map.insert(key, over_value);
                    }
                }
            }
            Ok(Value::Object(base_map))
        }
        (Value::Array(base_arr), Value::Array(over_arr)) => {
            merge_arrays(base_arr, over_arr, node).map(Value::Array)
        }
        // An explicit null does not clear an inherited value
        (base_value, Value::Null) if !base_value.is_null() => Ok(base_value),
        (_, over_value) => Ok(over_value),
    }
}

/// Array merge: elements matched by `name` require an explicit override flag
/// to replace an inherited entry; unmatched elements are appended
fn merge_arrays(base: Vec<Value>, over: Vec<Value>, node: &str) -> Result<Vec<Value>> {
    let mut result = base;
    for mut element in over {
        let name = element
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        match name {
            Some(name) => {
                let existing = result
                    .iter()
                    .position(|e| e.get("name").and_then(Value::as_str) == Some(name.as_str()));
                match existing {
                    Some(index) => {
                        let has_override = element
                            .get("override")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                        if !has_override {
                            return Err(SpecError::ConflictingEntry {
                                node: node.to_string(),
                                entry: name,
                            });
                        }
                        if let Value::Object(map) = &mut element {
                            map.remove("override");
                        }
                        result[index] = element;
                    }
                    None => {
                        if let Value::Object(map) = &mut element {
                            map.remove("override");
                        }
                        result.push(element);
                    }
                }
            }
            // Scalar arrays (e.g. default group names) append unique values.
            None => {
                if !result.contains(&element) {
                    result.push(element);
                }
            }
        }
    }
    Ok(result)
}

/// Second pass over the fully resolved set: reverse `extending` edges and
/// `siblings` through shared non-abstract parents
fn derive_relations(definitions: &[NodeDef], resolved: &mut [ResolvedNode]) {
    let abstract_names: HashSet<&str> = definitions
        .iter()
        .filter(|d| d.abstract_)
        .map(|d| d.name.as_str())
        .collect();

    let mut children_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for def in definitions {
        for parent in &def.extends {
            children_of
                .entry(parent.as_str())
                .or_default()
                .push(def.name.as_str());
        }
    }

    for node in resolved.iter_mut() {
        let extending: BTreeSet<&str> = children_of
            .get(node.def.name.as_str())
            .map(|children| children.iter().copied().collect())
            .unwrap_or_default();
        node.extending = extending.iter().map(|s| s.to_string()).collect();

        let mut siblings: BTreeSet<&str> = BTreeSet::new();
        for parent in &node.def.extends {
            if abstract_names.contains(parent.as_str()) {
                continue;
            }
            if let Some(children) = children_of.get(parent.as_str()) {
                siblings.extend(children.iter().filter(|c| **c != node.def.name));
            }
        }
        node.siblings = siblings.iter().map(|s| s.to_string()).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{Direction, InterfaceDef, PropertyDef, PropertyKind};
    use pretty_assertions::assert_eq;

    fn iface(name: &str, direction: Direction) -> InterfaceDef {
        InterfaceDef {
            name: name.to_string(),
            direction,
            interface_type: None,
            side: None,
            side_position: None,
            external_name: None,
            array: None,
            max_connections_count: None,
            dynamic: None,
            override_: false,
        }
    }

    fn prop(name: &str, kind: PropertyKind) -> PropertyDef {
        PropertyDef {
            name: name.to_string(),
            kind,
            default: None,
            min: None,
            max: None,
            step: None,
            values: None,
            dtype: None,
            group: Vec::new(),
            readonly: false,
            url: None,
            procedure_name: None,
            override_: false,
        }
    }

    #[test]
    fn test_child_inherits_parent_interfaces() {
        let mut parent = NodeDef::named("Base");
        parent.abstract_ = true;
        parent.interfaces = vec![iface("in", Direction::Input)];
        parent.category = Some("Common".to_string());

        let mut child = NodeDef::named("Child");
        child.extends = vec!["Base".to_string()];
        child.interfaces = vec![iface("out", Direction::Output)];

        let resolved = resolve_inheritance(&[parent, child]).unwrap();
        // Abstract parent filtered out
        assert_eq!(resolved.len(), 1);
        let child = &resolved[0].def;
        assert_eq!(child.name, "Child");
        assert_eq!(child.interfaces.len(), 2);
        // Scalar fields flow down
        assert_eq!(child.category.as_deref(), Some("Common"));
        // Abstractness does not propagate
        assert!(!child.abstract_);
    }

    #[test]
    fn test_conflicting_array_entry_requires_override() {
        let mut parent = NodeDef::named("Base");
        parent.properties = vec![prop("gain", PropertyKind::Number)];
        let mut child = NodeDef::named("Child");
        child.extends = vec!["Base".to_string()];
        child.properties = vec![prop("gain", PropertyKind::Integer)];

        let err = resolve_inheritance(&[parent, child]).unwrap_err();
        assert!(matches!(err, SpecError::ConflictingEntry { ref entry, .. } if entry == "gain"));
    }

    #[test]
    fn test_override_replaces_inherited_entry() {
        let mut parent = NodeDef::named("Base");
        parent.properties = vec![prop("gain", PropertyKind::Number)];
        let mut child = NodeDef::named("Child");
        child.extends = vec!["Base".to_string()];
        let mut replacement = prop("gain", PropertyKind::Integer);
        replacement.override_ = true;
        child.properties = vec![replacement];

        let resolved = resolve_inheritance(&[parent, child]).unwrap();
        let child = resolved.iter().find(|r| r.def.name == "Child").unwrap();
        assert_eq!(child.def.properties.len(), 1);
        let gain = child.def.properties.iter().find(|p| p.name == "gain").unwrap();
        assert_eq!(gain.kind, PropertyKind::Integer);
        // The override marker is stripped from the merged result
        assert!(!gain.override_);
    }

    #[test]
    fn test_repeated_parent_fails() {
        let parent = NodeDef::named("Base");
        let mut child = NodeDef::named("Child");
        child.extends = vec!["Base".to_string(), "Base".to_string()];

        let err = resolve_inheritance(&[parent, child]).unwrap_err();
        assert!(matches!(err, SpecError::RepeatedParent { .. }));
        assert!(err.to_string().contains("Child"));
    }

    #[test]
    fn test_unknown_parent_fails() {
        let mut child = NodeDef::named("Child");
        child.extends = vec!["Ghost".to_string()];
        let err = resolve_inheritance(&[child]).unwrap_err();
        assert!(matches!(err, SpecError::UnknownParent { .. }));
    }

    #[test]
    fn test_circular_extends_errors_without_hanging() {
        let mut a = NodeDef::named("A");
        a.extends = vec!["B".to_string()];
        let mut b = NodeDef::named("B");
        b.extends = vec!["A".to_string()];

        let err = resolve_inheritance(&[a, b]).unwrap_err();
        assert!(matches!(err, SpecError::InheritanceCycle { .. }));
    }

    #[test]
    fn test_self_extends_errors() {
        let mut a = NodeDef::named("A");
        a.extends = vec!["A".to_string()];
        let err = resolve_inheritance(&[a]).unwrap_err();
        assert!(matches!(err, SpecError::InheritanceCycle { .. }));
    }

    #[test]
    fn test_extends_itself_is_never_inherited() {
        let mut grandparent = NodeDef::named("GrandParent");
        grandparent.abstract_ = true;
        let mut parent = NodeDef::named("Parent");
        parent.extends = vec!["GrandParent".to_string()];
        let mut child = NodeDef::named("Child");
        child.extends = vec!["Parent".to_string()];

        let resolved = resolve_inheritance(&[grandparent, parent, child]).unwrap();
        let child = resolved.iter().find(|r| r.def.name == "Child").unwrap();
        assert_eq!(child.def.extends, vec!["Parent".to_string()]);
    }

    #[test]
    fn test_declaration_order_independence() {
        let mut parent = NodeDef::named("Base");
        parent.interfaces = vec![iface("in", Direction::Input)];
        let mut child = NodeDef::named("Child");
        child.extends = vec!["Base".to_string()];

        let forward = resolve_inheritance(&[parent.clone(), child.clone()]).unwrap();
        let reverse = resolve_inheritance(&[child, parent]).unwrap();

        let pick = |set: &[ResolvedNode], name: &str| -> Value {
            serde_json::to_value(
                &set.iter().find(|r| r.def.name == name).unwrap().def,
            )
            .unwrap()
        };
        assert_eq!(pick(&forward, "Child"), pick(&reverse, "Child"));
        assert_eq!(pick(&forward, "Base"), pick(&reverse, "Base"));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut parent = NodeDef::named("Base");
        parent.properties = vec![prop("gain", PropertyKind::Number)];
        let mut child = NodeDef::named("Child");
        child.extends = vec!["Base".to_string()];

        let first = resolve_inheritance(&[parent.clone(), child.clone()]).unwrap();
        let second = resolve_inheritance(&[parent, child]).unwrap();
        assert_eq!(
            serde_json::to_value(&first[1].def).unwrap(),
            serde_json::to_value(&second[1].def).unwrap()
        );
    }

    #[test]
    fn test_later_parent_wins_on_scalars() {
        let mut first = NodeDef::named("First");
        first.abstract_ = true;
        first.layer = Some("alpha".to_string());
        let mut second = NodeDef::named("Second");
        second.abstract_ = true;
        second.layer = Some("beta".to_string());
        let mut child = NodeDef::named("Child");
        child.extends = vec!["First".to_string(), "Second".to_string()];

        let resolved = resolve_inheritance(&[first, second, child]).unwrap();
        assert_eq!(resolved[0].def.layer.as_deref(), Some("beta"));
    }

    #[test]
    fn test_extending_and_siblings() {
        let parent = NodeDef::named("Base");
        let mut left = NodeDef::named("Left");
        left.extends = vec!["Base".to_string()];
        let mut right = NodeDef::named("Right");
        right.extends = vec!["Base".to_string()];

        let resolved = resolve_inheritance(&[parent, left, right]).unwrap();
        let base = resolved.iter().find(|r| r.def.name == "Base").unwrap();
        assert_eq!(base.extending, vec!["Left".to_string(), "Right".to_string()]);

        let left = resolved.iter().find(|r| r.def.name == "Left").unwrap();
        assert_eq!(left.siblings, vec!["Right".to_string()]);
    }

    #[test]
    fn test_abstract_parent_yields_no_siblings() {
        let mut parent = NodeDef::named("Base");
        parent.abstract_ = true;
        let mut left = NodeDef::named("Left");
        left.extends = vec!["Base".to_string()];
        let mut right = NodeDef::named("Right");
        right.extends = vec!["Base".to_string()];

        let resolved = resolve_inheritance(&[parent, left, right]).unwrap();
        let left = resolved.iter().find(|r| r.def.name == "Left").unwrap();
        assert!(left.siblings.is_empty());
    }
}
