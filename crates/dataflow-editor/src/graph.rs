//! Live graph model
//!
//! A [`Graph`] owns node instances and connections, validates every
//! structural mutation, and announces it to observers. Removal APIs return
//! the removed entity's serialized form at removal time, so a recorded
//! history step can replay the removal in either direction on its own.

use std::cell::RefCell;
use std::rc::Rc;

use uuid::Uuid;

use dataflow_spec::{Anchor, ConnectionState, Direction, ExposedInterfaceState, NodeState};

use crate::error::{EditorError, Result};
use crate::events::{GraphEvent, ObserverRegistry};
use crate::interfaces::InterfaceArena;
use crate::node::NodeInstance;

/// A connection between two interface ids, with ordered anchor waypoints
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub from: String,
    pub to: String,
    pub anchors: Vec<Anchor>,
}

impl Connection {
    pub fn to_state(&self) -> ConnectionState {
        ConnectionState {
            id: self.id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            anchors: self.anchors.clone(),
        }
    }
}

/// A live graph: nodes, connections, and graph-level exposed interfaces
pub struct Graph {
    id: String,
    pub name: String,
    nodes: Vec<NodeInstance>,
    connections: Vec<Connection>,
    /// Interfaces this graph publishes when embedded as a subgraph node
    pub exposed: Vec<ExposedInterfaceState>,
    observers: ObserverRegistry,
    arena: Rc<RefCell<InterfaceArena>>,
    allow_loopback: bool,
}

impl Graph {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arena: Rc<RefCell<InterfaceArena>>,
        allow_loopback: bool,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
            exposed: Vec::new(),
            observers: ObserverRegistry::new(),
            arena,
            allow_loopback,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Observer registry for this graph's mutation events
    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn arena(&self) -> &Rc<RefCell<InterfaceArena>> {
        &self.arena
    }

    pub fn nodes(&self) -> &[NodeInstance] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn find_node(&self, node_id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn find_connection(&self, connection_id: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == connection_id)
    }

    /// Node owning the given interface id
    pub fn interface_owner(&self, interface_id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.owns_interface(interface_id))
    }

    /// Insert a node instance and announce it
    pub fn add_node(&mut self, instance: NodeInstance) -> String {
        let node_id = instance.id.clone();
        let snapshot = instance.snapshot(&self.arena.borrow());
        self.nodes.push(instance);
        self.observers.notify(&GraphEvent::NodeAdded {
            graph_id: self.id.clone(),
            node: snapshot,
        });
        node_id
    }

    /// Remove a node, its connections first, and announce each removal
    ///
    /// Returns the node's full serialized form captured at removal time.
    pub fn remove_node(&mut self, node_id: &str) -> Result<NodeState> {
        let position = self
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or_else(|| EditorError::NodeNotFound(node_id.to_string()))?;

        let touching: Vec<String> = self
            .connections
            .iter()
            .filter(|c| {
                self.nodes[position].owns_interface(&c.from)
                    || self.nodes[position].owns_interface(&c.to)
            })
            .map(|c| c.id.clone())
            .collect();
        for connection_id in touching {
            self.remove_connection(&connection_id)?;
        }

        let instance = self.nodes.remove(position);
        let snapshot = instance.snapshot(&self.arena.borrow());
        instance.release_interfaces(&mut self.arena.borrow_mut());

        self.observers.notify(&GraphEvent::NodeRemoved {
            graph_id: self.id.clone(),
            node: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Edit a node in place, capturing before/after snapshots
    pub fn update_node(
        &mut self,
        node_id: &str,
        mutate: impl FnOnce(&mut NodeInstance, &mut InterfaceArena) -> Result<()>,
    ) -> Result<()> {
        let position = self
            .nodes
            .iter()
            .position(|n| n.id == node_id)
            .ok_or_else(|| EditorError::NodeNotFound(node_id.to_string()))?;

        let before = self.nodes[position].snapshot(&self.arena.borrow());
        mutate(&mut self.nodes[position], &mut self.arena.borrow_mut())?;
        let after = self.nodes[position].snapshot(&self.arena.borrow());

        self.observers.notify(&GraphEvent::NodeUpdated {
            graph_id: self.id.clone(),
            node_id: node_id.to_string(),
            before,
            after,
        });
        Ok(())
    }

    /// Restore a node from a snapshot, reusing its saved interface ids
    ///
    /// Used by history replay; fails if the snapshot's interfaces collide
    /// with another graph.
    pub fn restore_node(&mut self, state: &NodeState) -> Result<String> {
        let instance =
            NodeInstance::from_snapshot(state, &self.id, &mut self.arena.borrow_mut())?;
        Ok(self.add_node(instance))
    }

    /// Apply a node snapshot to an existing instance (history replay of edits)
    pub fn apply_node_snapshot(&mut self, node_id: &str, state: &NodeState) -> Result<()> {
        self.update_node(node_id, |instance, arena| {
            instance.instance_name = state.instance_name.clone();
            if let Some(position) = state.position {
                instance.position = position;
            }
            for prop in &state.properties {
                instance.set_property_value(&prop.name, prop.value.clone());
            }
            instance.enabled_groups = state.enabled_interface_groups.clone();
            for saved in &state.interfaces {
                if let Some(binding) = instance.binding(&saved.name) {
                    if let Some(record) = arena.get_mut(&binding.id) {
                        record.value = saved.value.clone();
                        if let Some(side_position) = saved.side_position {
                            record.side_position = side_position;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    /// Connect two interfaces, validating direction, duplication, loopback,
    /// type compatibility, and connection limits
    pub fn add_connection(&mut self, from: &str, to: &str) -> Result<ConnectionState> {
        self.validate_connection(from, to)?;
        let connection = Connection {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            anchors: Vec::new(),
        };
        Ok(self.insert_connection(connection))
    }

    /// Re-add a connection with its saved id and anchors
    ///
    /// Used by dataflow loading and history replay. Validation still applies;
    /// a vanished endpoint surfaces as an error for the caller to soft-fail.
    pub fn restore_connection(&mut self, state: &ConnectionState) -> Result<ConnectionState> {
        self.validate_connection(&state.from, &state.to)?;
        let connection = Connection {
            id: state.id.clone(),
            from: state.from.clone(),
            to: state.to.clone(),
            anchors: state.anchors.clone(),
        };
        Ok(self.insert_connection(connection))
    }

    fn insert_connection(&mut self, connection: Connection) -> ConnectionState {
        {
            let mut arena = self.arena.borrow_mut();
            arena.bump_connections(&connection.from, 1);
            arena.bump_connections(&connection.to, 1);
        }
        let state = connection.to_state();
        self.connections.push(connection);
        self.observers.notify(&GraphEvent::ConnectionAdded {
            graph_id: self.id.clone(),
            connection: state.clone(),
        });
        state
    }

    fn validate_connection(&self, from: &str, to: &str) -> Result<()> {
        let arena = self.arena.borrow();
        let from_record = arena
            .get(from)
            .ok_or_else(|| EditorError::InterfaceNotFound(from.to_string()))?;
        let to_record = arena
            .get(to)
            .ok_or_else(|| EditorError::InterfaceNotFound(to.to_string()))?;

        // from must be an output or an inout acting as one; to must accept
        // input.
        if from_record.direction == Direction::Input {
            return Err(EditorError::InvalidSource(from.to_string()));
        }
        if to_record.direction == Direction::Output {
            return Err(EditorError::InvalidTarget(to.to_string()));
        }

        if self
            .connections
            .iter()
            .any(|c| c.from == from && c.to == to)
        {
            return Err(EditorError::DuplicateConnection {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if !self.allow_loopback {
            let same_node = self
                .interface_owner(from)
                .zip(self.interface_owner(to))
                .map(|(a, b)| a.id == b.id)
                .unwrap_or(false);
            if same_node {
                return Err(EditorError::LoopbackDisabled);
            }
        }

        if let (Some(from_type), Some(to_type)) =
            (&from_record.interface_type, &to_record.interface_type)
        {
            if !from_type.matches(to_type) {
                return Err(EditorError::TypeMismatch {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }

        if let Some(limit) = to_record.max_connections_count {
            if to_record.connection_count as i64 >= limit {
                return Err(EditorError::ConnectionLimit(to.to_string()));
            }
        }
        Ok(())
    }

    /// Remove a connection, its anchors individually first
    ///
    /// Anchors are removed last-to-first, each with its own event, before the
    /// connection-removal event fires; replaying the events in reverse
    /// restores the anchors in their original order.
    pub fn remove_connection(&mut self, connection_id: &str) -> Result<ConnectionState> {
        let position = self
            .connections
            .iter()
            .position(|c| c.id == connection_id)
            .ok_or_else(|| EditorError::ConnectionNotFound(connection_id.to_string()))?;

        while !self.connections[position].anchors.is_empty() {
            let index = self.connections[position].anchors.len() - 1;
            self.remove_anchor(connection_id, index)?;
        }

        let connection = self.connections.remove(position);
        {
            let mut arena = self.arena.borrow_mut();
            arena.bump_connections(&connection.from, -1);
            arena.bump_connections(&connection.to, -1);
        }
        let state = connection.to_state();
        self.observers.notify(&GraphEvent::ConnectionRemoved {
            graph_id: self.id.clone(),
            connection: state.clone(),
        });
        Ok(state)
    }

    /// Insert an anchor at the given index (clamped), or append
    pub fn add_anchor(
        &mut self,
        connection_id: &str,
        index: Option<usize>,
        mut anchor: Anchor,
    ) -> Result<()> {
        let connection = self
            .connections
            .iter_mut()
            .find(|c| c.id == connection_id)
            .ok_or_else(|| EditorError::ConnectionNotFound(connection_id.to_string()))?;

        if anchor.id.is_none() {
            anchor.id = Some(Uuid::new_v4().to_string());
        }
        let index = index
            .unwrap_or(connection.anchors.len())
            .min(connection.anchors.len());
        connection.anchors.insert(index, anchor.clone());
        self.observers.notify(&GraphEvent::AnchorAdded {
            graph_id: self.id.clone(),
            connection_id: connection_id.to_string(),
            anchor,
            index,
        });
        Ok(())
    }

    /// Remove the anchor at the given index
    pub fn remove_anchor(&mut self, connection_id: &str, index: usize) -> Result<Anchor> {
        let connection = self
            .connections
            .iter_mut()
            .find(|c| c.id == connection_id)
            .ok_or_else(|| EditorError::ConnectionNotFound(connection_id.to_string()))?;
        if index >= connection.anchors.len() {
            return Err(EditorError::ConnectionNotFound(format!(
                "{} anchor {}",
                connection_id, index
            )));
        }
        let anchor = connection.anchors.remove(index);
        self.observers.notify(&GraphEvent::AnchorRemoved {
            graph_id: self.id.clone(),
            connection_id: connection_id.to_string(),
            anchor: anchor.clone(),
            index,
        });
        Ok(anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GraphEvent;
    use crate::factory::{create_node_type, NodeType};
    use dataflow_spec::definition::{InterfaceDef, NodeDef};
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

    fn source_sink_type() -> NodeType {
        let mut def = NodeDef::named("Pipe");
        def.interfaces = vec![iface("in", Direction::Input), iface("out", Direction::Output)];
        create_node_type(&ResolvedNode {
            def,
            extending: Vec::new(),
            siblings: Vec::new(),
        })
        .unwrap()
    }

    fn graph_with_two_nodes() -> (Graph, String, String) {
        let arena = Rc::new(RefCell::new(InterfaceArena::new()));
        let ty = source_sink_type();
        let mut graph = Graph::new("g1", "Test", arena.clone(), false);

        let a = ty.instantiate("g1", &mut arena.borrow_mut()).unwrap();
        let b = ty.instantiate("g1", &mut arena.borrow_mut()).unwrap();
        let a_id = graph.add_node(a);
        let b_id = graph.add_node(b);
        (graph, a_id, b_id)
    }

    fn interface_of(graph: &Graph, node_id: &str, name: &str) -> String {
        graph
            .find_node(node_id)
            .unwrap()
            .binding(name)
            .unwrap()
            .id
            .clone()
    }

    #[test]
    fn test_connection_direction_validation() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let a_in = interface_of(&graph, &a, "in");
        let a_out = interface_of(&graph, &a, "out");
        let b_in = interface_of(&graph, &b, "in");

        // Input as source is rejected
        assert!(matches!(
            graph.add_connection(&a_in, &b_in),
            Err(EditorError::InvalidSource(_))
        ));
        // Output as target is rejected
        let b_out = interface_of(&graph, &b, "out");
        assert!(matches!(
            graph.add_connection(&a_out, &b_out),
            Err(EditorError::InvalidTarget(_))
        ));
        // Proper direction connects
        assert!(graph.add_connection(&a_out, &b_in).is_ok());
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let a_out = interface_of(&graph, &a, "out");
        let b_in = interface_of(&graph, &b, "in");

        graph.add_connection(&a_out, &b_in).unwrap();
        assert!(matches!(
            graph.add_connection(&a_out, &b_in),
            Err(EditorError::DuplicateConnection { .. })
        ));
    }

    #[test]
    fn test_loopback_policy() {
        let (mut graph, a, _) = graph_with_two_nodes();
        let a_out = interface_of(&graph, &a, "out");
        let a_in = interface_of(&graph, &a, "in");

        assert!(matches!(
            graph.add_connection(&a_out, &a_in),
            Err(EditorError::LoopbackDisabled)
        ));
    }

    #[test]
    fn test_remove_node_removes_connections_first() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let a_out = interface_of(&graph, &a, "out");
        let b_in = interface_of(&graph, &b, "in");
        graph.add_connection(&a_out, &b_in).unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let _sub = graph
            .observers()
            .subscribe(move |e| sink.borrow_mut().push(e.clone()));

        graph.remove_node(&a).unwrap();
        assert!(graph.connections().is_empty());
        assert_eq!(graph.nodes().len(), 1);

        let kinds: Vec<&str> = events
            .borrow()
            .iter()
            .map(|e| match e {
                GraphEvent::ConnectionRemoved { .. } => "connection",
                GraphEvent::NodeRemoved { .. } => "node",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["connection", "node"]);
    }

    #[test]
    fn test_anchor_events_precede_connection_removal() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let a_out = interface_of(&graph, &a, "out");
        let b_in = interface_of(&graph, &b, "in");
        let connection = graph.add_connection(&a_out, &b_in).unwrap();

        graph
            .add_anchor(&connection.id, None, Anchor { id: None, x: 10.0, y: 10.0 })
            .unwrap();
        graph
            .add_anchor(&connection.id, None, Anchor { id: None, x: 20.0, y: 20.0 })
            .unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let _sub = graph
            .observers()
            .subscribe(move |e| sink.borrow_mut().push(e.clone()));

        graph.remove_connection(&connection.id).unwrap();

        let kinds: Vec<&str> = events
            .borrow()
            .iter()
            .map(|e| match e {
                GraphEvent::AnchorRemoved { .. } => "anchor",
                GraphEvent::ConnectionRemoved { .. } => "connection",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["anchor", "anchor", "connection"]);
    }

    #[test]
    fn test_connection_counts_follow_mutations() {
        let (mut graph, a, b) = graph_with_two_nodes();
        let a_out = interface_of(&graph, &a, "out");
        let b_in = interface_of(&graph, &b, "in");
        let connection = graph.add_connection(&a_out, &b_in).unwrap();

        assert_eq!(
            graph.arena().borrow().get(&a_out).unwrap().connection_count,
            1
        );
        graph.remove_connection(&connection.id).unwrap();
        assert_eq!(
            graph.arena().borrow().get(&a_out).unwrap().connection_count,
            0
        );
    }

    #[test]
    fn test_update_node_captures_before_and_after() {
        let (mut graph, a, _) = graph_with_two_nodes();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let _sub = graph
            .observers()
            .subscribe(move |e| sink.borrow_mut().push(e.clone()));

        graph
            .update_node(&a, |instance, _| {
                instance.instance_name = Some("renamed".to_string());
                Ok(())
            })
            .unwrap();

        let events = events.borrow();
        match &events[0] {
            GraphEvent::NodeUpdated { before, after, .. } => {
                assert_eq!(before.instance_name, None);
                assert_eq!(after.instance_name.as_deref(), Some("renamed"));
            }
            other => panic!("expected NodeUpdated, got {:?}", other),
        }
    }
}
