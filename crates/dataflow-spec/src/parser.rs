//! Interface and property parsing
//!
//! Turns raw interface/property declarations into a normalized, validated
//! form: array ranges expanded, duplicates detected, inout interfaces merged
//! into the input namespace, interface-group membership checked for
//! disjointness, and side positions assigned.
//!
//! All validation here accumulates errors instead of failing fast, so a
//! caller sees every problem with a declaration in one pass.

use std::collections::{HashMap, HashSet};

use crate::definition::{
    Direction, DynamicInterfaceDef, InterfaceDef, InterfaceGroupDef, ListDtype, PropertyDef,
    PropertyKind, Side, TypeSet,
};

/// A fully normalized interface, ready to back a live node
#[derive(Debug, Clone)]
pub struct ParsedInterface {
    pub name: String,
    pub direction: Direction,
    pub interface_type: Option<TypeSet>,
    pub side: Side,
    pub side_position: i64,
    pub external_name: Option<String>,
    pub max_connections_count: Option<i64>,
    pub dynamic: Option<DynamicInterfaceDef>,
    /// Base name when this interface was expanded from an array range
    pub array_source: Option<String>,
}

/// A validated interface group
#[derive(Debug, Clone)]
pub struct ParsedGroup {
    pub name: String,
    pub direction: Direction,
    pub side: Side,
    pub members: Vec<String>,
}

/// Result of [`parse_interfaces`]: inputs (including direction-tagged inout
/// interfaces), outputs, and validated groups, in declaration order
#[derive(Debug, Clone, Default)]
pub struct ParsedInterfaces {
    pub inputs: Vec<ParsedInterface>,
    pub outputs: Vec<ParsedInterface>,
    pub groups: Vec<ParsedGroup>,
}

impl ParsedInterfaces {
    /// Look up an interface by name across both collections
    pub fn find(&self, name: &str) -> Option<&ParsedInterface> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|i| i.name == name)
    }

    /// Look up a group by (direction, name)
    pub fn find_group(&self, direction: Direction, name: &str) -> Option<&ParsedGroup> {
        self.groups
            .iter()
            .find(|g| g.direction == direction && g.name == name)
    }

    /// Iterate over every interface in declaration order, inputs first
    pub fn iter(&self) -> impl Iterator<Item = &ParsedInterface> {
        self.inputs.iter().chain(self.outputs.iter())
    }
}

/// Validated property set, preserving declaration order and group nesting
#[derive(Debug, Clone, Default)]
pub struct ParsedProperties {
    pub properties: Vec<PropertyDef>,
}

impl ParsedProperties {
    /// Look up a property by name, descending into grouped sub-properties
    pub fn find(&self, name: &str) -> Option<&PropertyDef> {
        fn walk<'a>(props: &'a [PropertyDef], name: &str) -> Option<&'a PropertyDef> {
            for prop in props {
                if prop.name == name {
                    return Some(prop);
                }
                if let Some(found) = walk(&prop.group, name) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.properties, name)
    }

    /// Iterate over every property, including grouped sub-properties
    pub fn iter_flat(&self) -> Vec<&PropertyDef> {
        fn walk<'a>(props: &'a [PropertyDef], out: &mut Vec<&'a PropertyDef>) {
            for prop in props {
                out.push(prop);
                walk(&prop.group, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.properties, &mut out);
        out
    }
}

/// Parse and validate interface declarations
///
/// `enabled_groups` lists the group names enabled by default; disjointness is
/// only enforced between groups that are simultaneously enabled.
///
/// Returns the normalized interface collections, or every accumulated error.
pub fn parse_interfaces(
    interfaces: &[InterfaceDef],
    groups: &[InterfaceGroupDef],
    enabled_groups: &[String],
) -> Result<ParsedInterfaces, Vec<String>> {
    let mut errors = Vec::new();

    // Array ranges expand before any validation so duplicates between a
    // generated name and an explicit one are caught like any other.
    let expanded = expand_arrays(interfaces, &mut errors);

    detect_duplicates(&expanded, &mut errors);

    let parsed_groups = validate_groups(&expanded, groups, enabled_groups, &mut errors);

    let positioned = assign_side_positions(&expanded, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut result = ParsedInterfaces {
        groups: parsed_groups,
        ..Default::default()
    };
    for iface in positioned {
        match iface.direction {
            // Inout interfaces live in the input collection but keep their tag
            Direction::Input | Direction::Inout => result.inputs.push(iface),
            Direction::Output => result.outputs.push(iface),
        }
    }
    Ok(result)
}

/// Parse and validate property declarations
///
/// Duplicate detection recurses into grouped sub-properties: a sub-property
/// colliding with any other property name, at any level, is a duplicate.
pub fn parse_properties(properties: &[PropertyDef]) -> Result<ParsedProperties, Vec<String>> {
    let mut errors = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    fn check_level<'a>(
        props: &'a [PropertyDef],
        seen: &mut HashSet<&'a str>,
        errors: &mut Vec<String>,
    ) {
        for prop in props {
            if !seen.insert(prop.name.as_str()) {
                errors.push(format!("duplicate property \"{}\"", prop.name));
            }
            validate_property(prop, errors);
            check_level(&prop.group, seen, errors);
        }
    }
    check_level(properties, &mut seen, &mut errors);

    if errors.is_empty() {
        Ok(ParsedProperties {
            properties: properties.to_vec(),
        })
    } else {
        Err(errors)
    }
}

/// Kind-specific declaration checks: constraint sanity and default values
fn validate_property(prop: &PropertyDef, errors: &mut Vec<String>) {
    match prop.kind {
        PropertyKind::Select => {
            let values = prop.values.as_deref().unwrap_or(&[]);
            if values.is_empty() {
                errors.push(format!(
                    "select property \"{}\" declares no allowed values",
                    prop.name
                ));
            } else if let Some(default) = &prop.default {
                if !select_value_allowed(default, values) {
                    errors.push(format!(
                        "default of select property \"{}\" is not among its allowed values",
                        prop.name
                    ));
                }
            }
        }
        PropertyKind::Slider => {
            if prop.min.is_none() || prop.max.is_none() {
                errors.push(format!(
                    "slider property \"{}\" requires both min and max",
                    prop.name
                ));
            }
        }
        PropertyKind::List => {
            if prop.dtype.is_none() {
                errors.push(format!(
                    "list property \"{}\" declares no element dtype",
                    prop.name
                ));
            }
        }
        _ => {}
    }
    if let (Some(min), Some(max)) = (prop.min, prop.max) {
        if min > max {
            errors.push(format!(
                "property \"{}\" has min {} greater than max {}",
                prop.name, min, max
            ));
        }
    }
}

/// A select value is allowed if it is a member of, or string-equal to, one of
/// the declared values
pub fn select_value_allowed(value: &serde_json::Value, allowed: &[serde_json::Value]) -> bool {
    fn unquoted(v: &serde_json::Value) -> String {
        match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        }
    }
    allowed
        .iter()
        .any(|a| a == value || unquoted(a) == unquoted(value))
}

/// Whether a value satisfies a declared list element dtype
///
/// `integer` accepts any whole-number value, including whole floats.
pub fn value_matches_dtype(value: &serde_json::Value, dtype: ListDtype) -> bool {
    match dtype {
        ListDtype::String => value.is_string(),
        ListDtype::Number => value.is_number(),
        ListDtype::Integer => value
            .as_f64()
            .map(|f| f.fract() == 0.0)
            .unwrap_or(false),
        ListDtype::Boolean => value.is_boolean(),
    }
}

fn expand_arrays(interfaces: &[InterfaceDef], errors: &mut Vec<String>) -> Vec<InterfaceDef> {
    let mut expanded = Vec::with_capacity(interfaces.len());
    for def in interfaces {
        match def.array {
            Some([low, high]) if low > high => {
                errors.push(format!(
                    "interface \"{}\" has invalid array range [{}, {})",
                    def.name, low, high
                ));
            }
            Some([low, high]) => {
                for index in low..high {
                    let mut copy = def.clone();
                    copy.name = format!("{}[{}]", def.name, index);
                    copy.array = None;
                    // A fixed slot can't be shared by every generated copy
                    copy.side_position = None;
                    expanded.push(copy);
                }
            }
            None => expanded.push(def.clone()),
        }
    }
    expanded
}

fn detect_duplicates(interfaces: &[InterfaceDef], errors: &mut Vec<String>) {
    let mut seen: HashSet<(Direction, &str)> = HashSet::new();
    for def in interfaces {
        if !seen.insert((def.direction, def.name.as_str())) {
            errors.push(format!(
                "duplicate {} interface \"{}\"",
                def.direction, def.name
            ));
        }
    }
    // Inout shares the input namespace and must not shadow either side.
    for def in interfaces.iter().filter(|d| d.direction == Direction::Inout) {
        for other in interfaces {
            if other.direction != Direction::Inout && other.name == def.name {
                errors.push(format!(
                    "inout interface \"{}\" collides with the {} interface of the same name",
                    def.name, other.direction
                ));
            }
        }
    }
}

fn validate_groups(
    interfaces: &[InterfaceDef],
    groups: &[InterfaceGroupDef],
    enabled: &[String],
    errors: &mut Vec<String>,
) -> Vec<ParsedGroup> {
    let names: HashSet<&str> = interfaces.iter().map(|i| i.name.as_str()).collect();

    for group in groups {
        for member in &group.interfaces {
            if !names.contains(member.as_str()) {
                errors.push(format!(
                    "interface group \"{}\" references unknown interface \"{}\"",
                    group.name, member
                ));
            }
        }
    }

    check_group_disjointness(groups, enabled, errors);

    groups
        .iter()
        .map(|g| ParsedGroup {
            name: g.name.clone(),
            direction: g.direction,
            side: g.side.unwrap_or_else(|| g.direction.default_side()),
            members: g.interfaces.clone(),
        })
        .collect()
}

/// Enabled groups must be pairwise disjoint; a shared member is reported once
/// per offending pair, naming both groups and the interface
pub fn check_group_disjointness(
    groups: &[InterfaceGroupDef],
    enabled: &[String],
    errors: &mut Vec<String>,
) {
    let enabled_groups: Vec<&InterfaceGroupDef> = groups
        .iter()
        .filter(|g| enabled.iter().any(|e| e == &g.name))
        .collect();

    for (i, a) in enabled_groups.iter().enumerate() {
        for b in &enabled_groups[i + 1..] {
            for member in &a.interfaces {
                if b.interfaces.contains(member) {
                    errors.push(format!(
                        "interface \"{}\" is claimed by both enabled group \"{}\" and enabled group \"{}\"",
                        member, a.name, b.name
                    ));
                }
            }
        }
    }
}

fn assign_side_positions(
    interfaces: &[InterfaceDef],
    errors: &mut Vec<String>,
) -> Vec<ParsedInterface> {
    // Explicit positions are validated for uniqueness per side first.
    let mut taken: HashMap<Side, HashSet<i64>> = HashMap::new();
    for def in interfaces {
        let side = def.side.unwrap_or_else(|| def.direction.default_side());
        if let Some(position) = def.side_position {
            if !taken.entry(side).or_default().insert(position) {
                errors.push(format!(
                    "interface \"{}\" claims already-occupied {} slot {}",
                    def.name, side, position
                ));
            }
        }
    }

    // Unassigned interfaces receive the lowest unused non-negative integer on
    // their side, in declaration order.
    let mut next_free = |side: Side, taken: &mut HashMap<Side, HashSet<i64>>| -> i64 {
        let used = taken.entry(side).or_default();
        let mut candidate = 0;
        while used.contains(&candidate) {
            candidate += 1;
        }
        used.insert(candidate);
        candidate
    };

    interfaces
        .iter()
        .map(|def| {
            let side = def.side.unwrap_or_else(|| def.direction.default_side());
            let side_position = match def.side_position {
                Some(position) => position,
                None => next_free(side, &mut taken),
            };
            ParsedInterface {
                name: def.name.clone(),
                direction: def.direction,
                interface_type: def.interface_type.clone(),
                side,
                side_position,
                external_name: def.external_name.clone(),
                max_connections_count: def.max_connections_count,
                dynamic: def.dynamic.clone(),
                array_source: def.name.rfind('[').and_then(|open| {
                    def.name
                        .ends_with(']')
                        .then(|| def.name[..open].to_string())
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn group(name: &str, direction: Direction, members: &[&str]) -> InterfaceGroupDef {
        InterfaceGroupDef {
            name: name.to_string(),
            direction,
            side: None,
            interfaces: members.iter().map(|m| m.to_string()).collect(),
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
    fn test_side_defaults_and_namespaces() {
        let parsed = parse_interfaces(
            &[
                iface("a", Direction::Input),
                iface("b", Direction::Inout),
                iface("c", Direction::Output),
            ],
            &[],
            &[],
        )
        .unwrap();

        assert_eq!(parsed.inputs.len(), 2);
        assert_eq!(parsed.outputs.len(), 1);
        assert_eq!(parsed.inputs[1].direction, Direction::Inout);
        assert_eq!(parsed.inputs[1].side, Side::Left);
        assert_eq!(parsed.outputs[0].side, Side::Right);
    }

    #[test]
    fn test_side_positions_smallest_unused() {
        let mut fixed = iface("fixed", Direction::Input);
        fixed.side_position = Some(1);
        let parsed = parse_interfaces(
            &[
                iface("a", Direction::Input),
                fixed,
                iface("b", Direction::Input),
                iface("c", Direction::Input),
            ],
            &[],
            &[],
        )
        .unwrap();

        let positions: Vec<i64> = parsed.inputs.iter().map(|i| i.side_position).collect();
        // "a" gets 0, "fixed" keeps 1, "b" gets 2, "c" gets 3
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_side_position_uniqueness_per_side() {
        let mut a = iface("a", Direction::Input);
        a.side_position = Some(0);
        let mut b = iface("b", Direction::Output);
        b.side_position = Some(0);
        // Different sides, no conflict
        assert!(parse_interfaces(&[a.clone(), b], &[], &[]).is_ok());

        let mut c = iface("c", Direction::Input);
        c.side_position = Some(0);
        let errors = parse_interfaces(&[a, c], &[], &[]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("slot 0"));
    }

    #[test]
    fn test_array_expansion() {
        let mut arr = iface("data", Direction::Input);
        arr.array = Some([0, 3]);
        let parsed = parse_interfaces(&[arr], &[], &[]).unwrap();

        let names: Vec<&str> = parsed.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["data[0]", "data[1]", "data[2]"]);
        assert_eq!(parsed.inputs[0].array_source.as_deref(), Some("data"));
    }

    #[test]
    fn test_array_expansion_collides_with_explicit() {
        let mut arr = iface("data", Direction::Input);
        arr.array = Some([0, 2]);
        let explicit = iface("data[1]", Direction::Input);
        let errors = parse_interfaces(&[arr, explicit], &[], &[]).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate") && e.contains("data[1]")));
    }

    #[test]
    fn test_duplicate_interfaces_accumulate() {
        let errors = parse_interfaces(
            &[
                iface("a", Direction::Input),
                iface("a", Direction::Input),
                iface("b", Direction::Output),
                iface("b", Direction::Output),
            ],
            &[],
            &[],
        )
        .unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_inout_collision_with_either_direction() {
        let errors = parse_interfaces(
            &[iface("x", Direction::Output), iface("x", Direction::Inout)],
            &[],
            &[],
        )
        .unwrap_err();
        assert!(errors.iter().any(|e| e.contains("inout") && e.contains("\"x\"")));
    }

    #[test]
    fn test_group_unknown_member() {
        let errors = parse_interfaces(
            &[iface("a", Direction::Input)],
            &[group("g", Direction::Input, &["a", "missing"])],
            &[],
        )
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("missing"));
    }

    #[test]
    fn test_enabled_group_disjointness() {
        let errors = parse_interfaces(
            &[iface("a", Direction::Input), iface("b", Direction::Input)],
            &[
                group("g1", Direction::Input, &["a", "b"]),
                group("g2", Direction::Input, &["b"]),
            ],
            &["g1".to_string(), "g2".to_string()],
        )
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("\"b\""));
        assert!(errors[0].contains("\"g1\""));
        assert!(errors[0].contains("\"g2\""));
    }

    #[test]
    fn test_disabled_groups_may_overlap() {
        let parsed = parse_interfaces(
            &[iface("a", Direction::Input)],
            &[
                group("g1", Direction::Input, &["a"]),
                group("g2", Direction::Input, &["a"]),
            ],
            &["g1".to_string()],
        )
        .unwrap();
        assert_eq!(parsed.groups.len(), 2);
    }

    #[test]
    fn test_inout_participates_in_group_disjointness() {
        let errors = parse_interfaces(
            &[iface("io", Direction::Inout)],
            &[
                group("g1", Direction::Input, &["io"]),
                group("g2", Direction::Input, &["io"]),
            ],
            &["g1".to_string(), "g2".to_string()],
        )
        .unwrap_err();
        assert!(errors.iter().any(|e| e.contains("\"io\"")));
    }

    #[test]
    fn test_duplicate_property() {
        let errors =
            parse_properties(&[prop("threshold", PropertyKind::Number), prop("threshold", PropertyKind::Number)])
                .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("duplicate"));
        assert!(errors[0].contains("threshold"));
    }

    #[test]
    fn test_duplicate_across_group_boundary() {
        let mut parent = prop("advanced", PropertyKind::Bool);
        parent.group = vec![prop("gain", PropertyKind::Number)];
        let errors = parse_properties(&[prop("gain", PropertyKind::Number), parent]).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("gain")));
    }

    #[test]
    fn test_select_default_membership() {
        let mut select = prop("mode", PropertyKind::Select);
        select.values = Some(vec![serde_json::json!("fast"), serde_json::json!("slow")]);
        select.default = Some(serde_json::json!("turbo"));
        let errors = parse_properties(&[select]).unwrap_err();
        assert!(errors[0].contains("mode"));
    }

    #[test]
    fn test_slider_requires_range() {
        let errors = parse_properties(&[prop("level", PropertyKind::Slider)]).unwrap_err();
        assert!(errors[0].contains("min and max"));
    }

    #[test]
    fn test_dtype_integer_accepts_whole_floats() {
        assert!(value_matches_dtype(&serde_json::json!(3.0), ListDtype::Integer));
        assert!(value_matches_dtype(&serde_json::json!(3), ListDtype::Integer));
        assert!(!value_matches_dtype(&serde_json::json!(3.5), ListDtype::Integer));
    }
}
