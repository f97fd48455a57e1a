//! Graph templates
//!
//! A template is a reusable subgraph definition: node states, connections,
//! and the interfaces the graph exposes. Templates are built from
//! specification data or included dataflows, validated node by node, and can
//! be instantiated into live graphs. When a template's graph is embedded as a
//! node in a parent graph, the graph-node-facing interfaces are arena proxy
//! records back-referencing the inner ids, so both stay value-synchronized.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use dataflow_spec::{ConnectionState, Direction, ExposedInterfaceState, GraphState, NodeState};

use crate::graph::Graph;
use crate::interfaces::{InterfaceArena, InterfaceRecord};
use crate::node::{InterfaceBinding, NodeInstance};
use crate::registry::NodeTypeRegistry;

/// A reusable subgraph definition
#[derive(Debug, Clone)]
pub struct GraphTemplate {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub nodes: Vec<NodeState>,
    pub connections: Vec<ConnectionState>,
    pub exposed: Vec<ExposedInterfaceState>,
}

/// Build a graph template from serialized graph data
///
/// Every contained node is normalized against its registered type; all
/// errors are collected and prefixed with the template name, and no partial
/// template is produced on failure.
pub fn build_graph_template(
    state: &GraphState,
    registry: &NodeTypeRegistry,
) -> Result<GraphTemplate, Vec<String>> {
    let name = state
        .name
        .clone()
        .or_else(|| state.id.clone())
        .unwrap_or_else(|| "graph".to_string());
    let mut errors = Vec::new();

    for node in &state.nodes {
        match registry.get(&node.name) {
            None => errors.push(format!("{}: unknown node type '{}'", name, node.name)),
            Some(ty) => {
                if let Err(messages) = ty.normalize_state(node) {
                    errors.extend(messages.into_iter().map(|m| format!("{}: {}", name, m)));
                }
            }
        }
    }

    let exposed = discover_exposed(state, &name, &mut errors);
    validate_connection_endpoints(state, &name, &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(GraphTemplate {
        id: state.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
        name,
        category: state.category.clone(),
        nodes: state.nodes.clone(),
        connections: state.connections.clone(),
        exposed,
    })
}

/// Exposed interfaces come from the graph-level list plus any node interface
/// tagged with an external name; external names must be unique per graph
fn discover_exposed(
    state: &GraphState,
    name: &str,
    errors: &mut Vec<String>,
) -> Vec<ExposedInterfaceState> {
    let mut exposed: Vec<ExposedInterfaceState> = state.interfaces.clone();

    for node in &state.nodes {
        for iface in &node.interfaces {
            let Some(external_name) = &iface.external_name else {
                continue;
            };
            if exposed.iter().any(|e| &e.name == external_name) {
                continue; // graph-level entry already references it
            }
            match &iface.id {
                Some(id) => exposed.push(ExposedInterfaceState {
                    id: id.clone(),
                    name: external_name.clone(),
                    direction: iface.direction,
                    side: iface.side,
                    side_position: iface.side_position,
                }),
                None => errors.push(format!(
                    "{}: exposed interface \"{}\" on node '{}' carries no id",
                    name, external_name, node.id
                )),
            }
        }
    }

    let mut seen = HashSet::new();
    for entry in &exposed {
        if !seen.insert(entry.name.as_str()) {
            errors.push(format!(
                "{}: duplicate exposed interface name \"{}\"",
                name, entry.name
            ));
        }
    }
    exposed
}

fn validate_connection_endpoints(state: &GraphState, name: &str, errors: &mut Vec<String>) {
    let known: HashSet<&str> = state
        .nodes
        .iter()
        .flat_map(|n| n.interfaces.iter())
        .filter_map(|i| i.id.as_deref())
        .collect();

    for connection in &state.connections {
        for endpoint in [&connection.from, &connection.to] {
            if !known.contains(endpoint.as_str()) {
                errors.push(format!(
                    "{}: connection '{}' references unknown interface '{}'",
                    name, connection.id, endpoint
                ));
            }
        }
    }
}

impl GraphTemplate {
    /// Instantiate the template into a live graph
    ///
    /// Every interface id is remapped to a fresh id so a template can be
    /// instantiated any number of times without arena collisions. Errors are
    /// collected per node, prefixed with the template name.
    pub fn instantiate(
        &self,
        registry: &NodeTypeRegistry,
        graph: &mut Graph,
    ) -> Result<(), Vec<String>> {
        let mut id_map: HashMap<String, String> = HashMap::new();
        for node in &self.nodes {
            for iface in &node.interfaces {
                if let Some(id) = &iface.id {
                    id_map.insert(id.clone(), Uuid::new_v4().to_string());
                }
            }
        }

        let mut errors = Vec::new();
        let graph_id = graph.id().to_string();

        for node_state in &self.nodes {
            let Some(ty) = registry.get(&node_state.name) else {
                errors.push(format!("{}: unknown node type '{}'", self.name, node_state.name));
                continue;
            };

            let mut remapped = node_state.clone();
            remapped.id = Uuid::new_v4().to_string();
            for iface in &mut remapped.interfaces {
                if let Some(id) = &iface.id {
                    iface.id = Some(id_map[id].clone());
                }
            }

            let outcome = {
                let mut arena = graph.arena().borrow_mut();
                ty.instantiate(&graph_id, &mut arena).map(|mut instance| {
                    instance.id = remapped.id.clone();
                    let result = ty.load(&mut instance, &remapped, &graph_id, &mut arena);
                    (instance, result)
                })
            };
            match outcome {
                Ok((instance, Ok(()))) => {
                    graph.add_node(instance);
                }
                Ok((_, Err(messages))) => {
                    errors.extend(messages.into_iter().map(|m| format!("{}: {}", self.name, m)));
                }
                Err(e) => errors.push(format!("{}: {}", self.name, e)),
            }
        }

        for connection in &self.connections {
            let mut remapped = connection.clone();
            remapped.id = Uuid::new_v4().to_string();
            remapped.from = id_map.get(&connection.from).cloned().unwrap_or(remapped.from);
            remapped.to = id_map.get(&connection.to).cloned().unwrap_or(remapped.to);
            if let Err(e) = graph.restore_connection(&remapped) {
                errors.push(format!("{}: {}", self.name, e));
            }
        }

        graph.exposed = self
            .exposed
            .iter()
            .map(|entry| ExposedInterfaceState {
                id: id_map.get(&entry.id).cloned().unwrap_or_else(|| entry.id.clone()),
                ..entry.clone()
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Embed an instantiated graph as a node in a host graph
    ///
    /// The returned instance's interfaces are proxy records: each carries a
    /// back-reference to the inner interface id, so reads and writes through
    /// either side resolve to the same canonical value. The exposed external
    /// name becomes the interface name on the subgraph node.
    pub fn as_subgraph_node(
        &self,
        inner: &Graph,
        host_graph_id: &str,
        arena: &mut InterfaceArena,
    ) -> crate::error::Result<NodeInstance> {
        let node_id = Uuid::new_v4().to_string();
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();

        for (slot, entry) in inner.exposed.iter().enumerate() {
            let canonical = arena
                .get(&entry.id)
                .ok_or_else(|| crate::error::EditorError::InterfaceNotFound(entry.id.clone()))?;
            let direction = entry.direction.unwrap_or(canonical.direction);

            let proxy_id = Uuid::new_v4().to_string();
            arena.register(InterfaceRecord {
                id: proxy_id.clone(),
                graph_id: host_graph_id.to_string(),
                node_id: node_id.clone(),
                name: entry.name.clone(),
                direction,
                side: entry.side.unwrap_or_else(|| direction.default_side()),
                side_position: entry.side_position.unwrap_or(slot as i64),
                interface_type: canonical.interface_type.clone(),
                value: None,
                external_name: None,
                max_connections_count: canonical.max_connections_count,
                connection_count: 0,
                proxy_of: Some(entry.id.clone()),
            })?;

            let binding = InterfaceBinding {
                name: entry.name.clone(),
                id: proxy_id,
                direction,
            };
            match direction {
                Direction::Output => outputs.push(binding),
                Direction::Input | Direction::Inout => inputs.push(binding),
            }
        }

        Ok(NodeInstance {
            id: node_id,
            type_name: self.name.clone(),
            instance_name: None,
            position: Default::default(),
            inputs,
            outputs,
            properties: Vec::new(),
            enabled_groups: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::create_node_type;
    use dataflow_spec::definition::{InterfaceDef, InterfaceState, NodeDef};
    use dataflow_spec::ResolvedNode;
    use std::cell::RefCell;
    use std::rc::Rc;

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

    fn registry_with_pipe() -> NodeTypeRegistry {
        let mut def = NodeDef::named("Pipe");
        def.interfaces = vec![iface("in", Direction::Input), iface("out", Direction::Output)];
        let ty = create_node_type(&ResolvedNode {
            def,
            extending: Vec::new(),
            siblings: Vec::new(),
        })
        .unwrap();
        let mut registry = NodeTypeRegistry::new();
        registry.register(ty);
        registry
    }

    fn iface_state(name: &str, id: &str, external: Option<&str>) -> InterfaceState {
        InterfaceState {
            name: name.to_string(),
            id: Some(id.to_string()),
            direction: Some(if name == "out" {
                Direction::Output
            } else {
                Direction::Input
            }),
            side: None,
            side_position: None,
            external_name: external.map(|e| e.to_string()),
            value: None,
        }
    }

    fn node_state(id: &str, prefix: &str) -> NodeState {
        NodeState {
            id: id.to_string(),
            name: "Pipe".to_string(),
            instance_name: None,
            interfaces: vec![
                iface_state("in", &format!("{}-in", prefix), None),
                iface_state("out", &format!("{}-out", prefix), None),
            ],
            properties: vec![],
            enabled_interface_groups: vec![],
            position: None,
        }
    }

    fn two_node_graph_state() -> GraphState {
        GraphState {
            id: Some("sub".to_string()),
            name: Some("Subgraph".to_string()),
            category: None,
            nodes: vec![node_state("n1", "a"), node_state("n2", "b")],
            connections: vec![ConnectionState {
                id: "c1".to_string(),
                from: "a-out".to_string(),
                to: "b-in".to_string(),
                anchors: vec![],
            }],
            interfaces: vec![],
        }
    }

    #[test]
    fn test_build_template() {
        let registry = registry_with_pipe();
        let template = build_graph_template(&two_node_graph_state(), &registry).unwrap();
        assert_eq!(template.nodes.len(), 2);
        assert_eq!(template.connections.len(), 1);
    }

    #[test]
    fn test_unknown_type_prefixed_with_template_name() {
        let registry = NodeTypeRegistry::new();
        let errors = build_graph_template(&two_node_graph_state(), &registry).unwrap_err();
        assert!(errors[0].starts_with("Subgraph:"));
        assert!(errors[0].contains("Pipe"));
    }

    #[test]
    fn test_duplicate_external_names_fatal() {
        let registry = registry_with_pipe();
        let mut state = two_node_graph_state();
        state.nodes[0].interfaces[0].external_name = Some("shared".to_string());
        state.nodes[1].interfaces[0].external_name = Some("shared".to_string());

        let errors = build_graph_template(&state, &registry).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate") && e.contains("shared")));
    }

    #[test]
    fn test_unknown_connection_endpoint() {
        let registry = registry_with_pipe();
        let mut state = two_node_graph_state();
        state.connections[0].to = "ghost".to_string();

        let errors = build_graph_template(&state, &registry).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("ghost")));
    }

    #[test]
    fn test_instantiate_remaps_ids() {
        let registry = registry_with_pipe();
        let template = build_graph_template(&two_node_graph_state(), &registry).unwrap();

        let arena = Rc::new(RefCell::new(InterfaceArena::new()));
        let mut first = Graph::new("inst1", "First", arena.clone(), false);
        template.instantiate(&registry, &mut first).unwrap();
        let mut second = Graph::new("inst2", "Second", arena.clone(), false);
        template.instantiate(&registry, &mut second).unwrap();

        // Two instantiations coexist without id collisions
        assert_eq!(first.nodes().len(), 2);
        assert_eq!(second.nodes().len(), 2);
        assert_eq!(first.connections().len(), 1);
        assert_eq!(second.connections().len(), 1);
        assert_eq!(arena.borrow().len(), 8);
    }

    #[test]
    fn test_subgraph_node_synchronizes_through_proxy() {
        let registry = registry_with_pipe();
        let mut state = two_node_graph_state();
        state.nodes[0].interfaces[0].external_name = Some("signal".to_string());
        let template = build_graph_template(&state, &registry).unwrap();

        let arena = Rc::new(RefCell::new(InterfaceArena::new()));
        let mut inner = Graph::new("sub-1", "Inner", arena.clone(), false);
        template.instantiate(&registry, &mut inner).unwrap();

        let node = template
            .as_subgraph_node(&inner, "host", &mut arena.borrow_mut())
            .unwrap();
        assert_eq!(node.inputs.len(), 1);
        assert_eq!(node.inputs[0].name, "signal");

        // Writing through the host-facing interface is visible on the inner
        // interface and vice versa.
        let proxy_id = node.inputs[0].id.clone();
        let inner_id = inner.exposed[0].id.clone();
        arena
            .borrow_mut()
            .set_value(&proxy_id, serde_json::json!(7));
        assert_eq!(
            arena.borrow().value(&inner_id).cloned(),
            Some(serde_json::json!(7))
        );
    }
}
