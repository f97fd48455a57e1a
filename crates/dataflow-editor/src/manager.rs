//! Editor manager
//!
//! Top-level orchestration: loading a specification (schema validation,
//! include resolution, inheritance, category rules, type and template
//! registration), loading and saving dataflows against the active
//! specification, and the session-wide state that must be reset when a
//! specification is reloaded.
//!
//! Structural/schema errors abort before any state mutation. Semantic errors
//! are accumulated across the whole document so the user sees every problem
//! in one pass. A failure partway through building graphs leaves the session
//! explicitly cleaned up rather than relying on automatic rollback.

use std::cell::RefCell;
use std::rc::Rc;

use uuid::Uuid;

use dataflow_spec::include::{resolve_includes, IncludeFetcher};
use dataflow_spec::inherit::resolve_inheritance;
use dataflow_spec::schema;
use dataflow_spec::{
    DataflowDoc, GraphState, MetadataOptions, NodeDef, PropertyKind, ResolvedNode,
    SpecificationDoc,
};

use crate::error::{EditorError, Result};
use crate::events::{ActionSink, NullActionSink, PropertyAction, Subscription};
use crate::factory::create_node_type;
use crate::graph::Graph;
use crate::history::History;
use crate::interfaces::InterfaceArena;
use crate::registry::NodeTypeRegistry;
use crate::template::build_graph_template;

/// The active editor session
pub struct Editor {
    registry: NodeTypeRegistry,
    graphs: Vec<Graph>,
    active_graph: Option<String>,
    arena: Rc<RefCell<InterfaceArena>>,
    history: History,
    subscriptions: Vec<Subscription>,
    metadata: MetadataOptions,
    actions: Rc<dyn ActionSink>,
    spec_loaded: bool,
}

impl Editor {
    pub fn new() -> Self {
        Self::with_action_sink(Rc::new(NullActionSink))
    }

    /// Create an editor delivering button-property actions to the given sink
    pub fn with_action_sink(actions: Rc<dyn ActionSink>) -> Self {
        Self {
            registry: NodeTypeRegistry::new(),
            graphs: Vec::new(),
            active_graph: None,
            arena: Rc::new(RefCell::new(InterfaceArena::new())),
            history: History::new(),
            subscriptions: Vec::new(),
            metadata: MetadataOptions::default(),
            actions,
            spec_loaded: false,
        }
    }

    /// Load a specification document, replacing the current one
    ///
    /// Nested includes are fetched through `fetcher`; a document without
    /// includes loads with `None`. On success all session state (graphs,
    /// history, registered types, interface records) is reset.
    pub async fn load_specification(
        &mut self,
        doc: SpecificationDoc,
        fetcher: Option<&dyn IncludeFetcher>,
    ) -> std::result::Result<(), Vec<String>> {
        schema::check_version(doc.version.as_deref(), "specification");

        let doc = if doc.include.is_empty() {
            doc
        } else {
            let Some(fetcher) = fetcher else {
                return Err(vec![
                    "specification declares includes but no fetcher is available".to_string(),
                ]);
            };
            resolve_includes(doc, fetcher)
                .await
                .map_err(|e| vec![e.to_string()])?
        };

        let value = serde_json::to_value(&doc).map_err(|e| vec![e.to_string()])?;
        let schema_errors = schema::validate_specification(&value);
        if !schema_errors.is_empty() {
            return Err(schema_errors);
        }

        let resolved = resolve_inheritance(&doc.nodes).map_err(|e| vec![e.to_string()])?;

        let mut errors = Vec::new();
        check_category_rules(&doc.nodes, &resolved, &mut errors);

        let mut registry = NodeTypeRegistry::new();
        for node in &resolved {
            match create_node_type(node) {
                Ok(ty) => registry.register(ty),
                Err(messages) => errors.extend(messages),
            }
        }
        for graph_state in doc.graphs.iter().chain(doc.include_graphs.iter()) {
            match build_graph_template(graph_state, &registry) {
                Ok(template) => registry.register_template(template),
                Err(messages) => errors.extend(messages),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        // Commit point: swap the registry in and reset the session.
        self.registry = registry;
        self.metadata = doc.metadata.clone();
        self.reset_session();
        self.spec_loaded = true;
        Ok(())
    }

    /// Parse and load a specification supplied as raw JSON text
    ///
    /// Schema violations are reported with source line numbers.
    pub async fn load_specification_text(
        &mut self,
        text: &str,
        fetcher: Option<&dyn IncludeFetcher>,
    ) -> std::result::Result<(), Vec<String>> {
        let value = schema::validate_specification_text(text)?;
        let doc: SpecificationDoc =
            serde_json::from_value(value).map_err(|e| vec![e.to_string()])?;
        self.load_specification(doc, fetcher).await
    }

    /// Load a dataflow against the active specification
    ///
    /// Every node is validated against its registered type before any state
    /// is touched; discrepancies are accumulated across the whole document.
    /// History recording is suppressed for the duration of the load.
    pub fn load_dataflow(&mut self, doc: DataflowDoc) -> std::result::Result<(), Vec<String>> {
        if !self.spec_loaded {
            return Err(vec![EditorError::NoSpecification.to_string()]);
        }

        let value = serde_json::to_value(&doc).map_err(|e| vec![e.to_string()])?;
        let schema_errors = schema::validate_dataflow(&value);
        if !schema_errors.is_empty() {
            return Err(schema_errors);
        }
        schema::check_version(doc.version.as_deref(), "dataflow");

        // Pre-validate before mutating anything, so a discrepant document
        // leaves the live session untouched.
        let mut errors = Vec::new();
        for graph_state in &doc.graphs {
            for node_state in &graph_state.nodes {
                match self.registry.get(&node_state.name) {
                    None => errors.push(format!(
                        "unknown node type '{}' (instance {})",
                        node_state.name, node_state.id
                    )),
                    Some(ty) => {
                        if let Err(messages) = ty.normalize_state(node_state) {
                            errors.extend(messages);
                        }
                    }
                }
            }
            check_exposed_names(graph_state, &mut errors);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let mut metadata = self.metadata.clone();
        if let Some(patch) = &doc.metadata {
            metadata.apply(patch);
        }

        // The previous dataflow is replaced; drop its graphs and records.
        self.clear_dataflow();

        let guard = self.history.replay_guard();
        let mut new_graphs = Vec::new();
        let mut new_subscriptions = Vec::new();

        for graph_state in &doc.graphs {
            let graph = self.build_graph(graph_state, metadata.allow_loopback, &mut errors);
            new_subscriptions.push(self.history.attach(&graph));
            new_graphs.push(graph);
        }
        drop(guard);

        if !errors.is_empty() {
            // Explicit cleanup: unregister everything the failed load built.
            let mut arena = self.arena.borrow_mut();
            for graph in &new_graphs {
                arena.remove_graph(graph.id());
            }
            return Err(errors);
        }

        self.active_graph = doc
            .entry_graph
            .clone()
            .filter(|id| new_graphs.iter().any(|g| g.id() == id.as_str()))
            .or_else(|| new_graphs.first().map(|g| g.id().to_string()));
        self.graphs = new_graphs;
        self.subscriptions = new_subscriptions;
        self.metadata = metadata;
        Ok(())
    }

    /// Parse and load a dataflow supplied as raw JSON text
    pub fn load_dataflow_text(&mut self, text: &str) -> std::result::Result<(), Vec<String>> {
        let value = schema::validate_dataflow_text(text)?;
        let doc: DataflowDoc = serde_json::from_value(value).map_err(|e| vec![e.to_string()])?;
        self.load_dataflow(doc)
    }

    fn build_graph(
        &self,
        graph_state: &GraphState,
        allow_loopback: bool,
        errors: &mut Vec<String>,
    ) -> Graph {
        let graph_id = graph_state
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut graph = Graph::new(
            graph_id.clone(),
            graph_state.name.clone().unwrap_or_default(),
            self.arena.clone(),
            allow_loopback,
        );

        for node_state in &graph_state.nodes {
            // Pre-validation guarantees the type exists.
            let Some(ty) = self.registry.get(&node_state.name) else {
                continue;
            };
            let outcome = {
                let mut arena = self.arena.borrow_mut();
                ty.instantiate(&graph_id, &mut arena).map(|mut instance| {
                    instance.id = node_state.id.clone();
                    let loaded = ty.load(&mut instance, node_state, &graph_id, &mut arena);
                    (instance, loaded)
                })
            };
            match outcome {
                Ok((instance, Ok(()))) => {
                    graph.add_node(instance);
                }
                Ok((instance, Err(messages))) => {
                    instance.release_interfaces(&mut self.arena.borrow_mut());
                    errors.extend(messages);
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        for connection in &graph_state.connections {
            if let Err(e) = graph.restore_connection(connection) {
                errors.push(format!("graph '{}': {}", graph_id, e));
            }
        }
        graph.exposed = graph_state.interfaces.clone();
        graph
    }

    /// Serialize the live session back to the portable dataflow format
    pub fn save_dataflow(&self) -> DataflowDoc {
        let arena = self.arena.borrow();
        let graphs = self
            .graphs
            .iter()
            .map(|graph| GraphState {
                id: Some(graph.id().to_string()),
                name: Some(graph.name.clone()),
                category: None,
                nodes: graph
                    .nodes()
                    .iter()
                    .map(|node| match self.registry.get(&node.type_name) {
                        Some(ty) => ty.save(node, &arena),
                        // Subgraph nodes have no registered type; keep the
                        // full snapshot.
                        None => node.snapshot(&arena),
                    })
                    .collect(),
                connections: graph.connections().iter().map(|c| c.to_state()).collect(),
                interfaces: graph.exposed.clone(),
            })
            .collect();

        DataflowDoc {
            version: Some(schema::FORMAT_VERSION.to_string()),
            graphs,
            entry_graph: self.active_graph.clone(),
            metadata: None,
        }
    }

    /// Undo the latest step (or whole transaction) on the active graph
    pub fn undo(&mut self) {
        let Some(active) = self.active_graph.clone() else {
            return;
        };
        let history = self.history.clone();
        if let Some(graph) = self.graphs.iter_mut().find(|g| g.id() == active) {
            history.undo(graph);
        }
    }

    /// Redo the latest undone step (or whole transaction) on the active graph
    pub fn redo(&mut self) {
        let Some(active) = self.active_graph.clone() else {
            return;
        };
        let history = self.history.clone();
        if let Some(graph) = self.graphs.iter_mut().find(|g| g.id() == active) {
            history.redo(graph);
        }
    }

    /// Set a property value on a node of the active graph
    ///
    /// Dynamic interfaces controlled by the property are re-derived as part
    /// of the same edit, so the resulting interface churn shares the edit's
    /// history step and any open transaction.
    pub fn set_property(
        &mut self,
        node_id: &str,
        property: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let active = self
            .active_graph
            .clone()
            .ok_or_else(|| EditorError::UnknownGraph("<none>".to_string()))?;
        let graph = self
            .graphs
            .iter_mut()
            .find(|g| g.id() == active)
            .ok_or(EditorError::UnknownGraph(active))?;

        let type_name = graph
            .find_node(node_id)
            .ok_or_else(|| EditorError::NodeNotFound(node_id.to_string()))?
            .type_name
            .clone();
        let ty = self
            .registry
            .get(&type_name)
            .ok_or(EditorError::UnknownNodeType(type_name))?;

        let graph_id = graph.id().to_string();
        graph.update_node(node_id, |instance, arena| {
            instance.set_property_value(property, value);
            ty.regenerate_dynamic(instance, None, &graph_id, arena)
        })
    }

    /// Fire a button property's action to the external collaborator
    ///
    /// Fire-and-forget: nothing is awaited and no reply is expected.
    pub fn trigger_property_action(&self, node_id: &str, property: &str) -> Result<()> {
        let graph = self
            .active_graph()
            .ok_or_else(|| EditorError::UnknownGraph("<none>".to_string()))?;
        let node = graph
            .find_node(node_id)
            .ok_or_else(|| EditorError::NodeNotFound(node_id.to_string()))?;
        let ty = self
            .registry
            .get(&node.type_name)
            .ok_or_else(|| EditorError::UnknownNodeType(node.type_name.clone()))?;
        let def = ty
            .properties
            .find(property)
            .ok_or_else(|| EditorError::PropertyNotFound(property.to_string()))?;

        let action = match def.kind {
            PropertyKind::ButtonUrl => PropertyAction::OpenUrl {
                node_id: node_id.to_string(),
                property: property.to_string(),
                url: def.url.clone().unwrap_or_default(),
            },
            PropertyKind::ButtonApi => PropertyAction::CallProcedure {
                node_id: node_id.to_string(),
                property: property.to_string(),
                procedure_name: def
                    .procedure_name
                    .clone()
                    .unwrap_or_else(|| property.to_string()),
            },
            PropertyKind::ButtonGraph => PropertyAction::OpenGraph {
                node_id: node_id.to_string(),
                property: property.to_string(),
            },
            _ => return Err(EditorError::NotAButton(property.to_string())),
        };
        self.actions.send(action);
        Ok(())
    }

    /// Switch the active view to another graph
    ///
    /// With `copy_state_stack` the current graph's history carries over as
    /// the target's starting stack, so entering a subgraph view doesn't lose
    /// the parent's history.
    pub fn enter_graph(&mut self, graph_id: &str, copy_state_stack: bool) -> Result<()> {
        if !self.graphs.iter().any(|g| g.id() == graph_id) {
            return Err(EditorError::UnknownGraph(graph_id.to_string()));
        }
        if let Some(current) = &self.active_graph {
            self.history.enter_graph(current, graph_id, copy_state_stack);
        }
        self.active_graph = Some(graph_id.to_string());
        Ok(())
    }

    pub fn active_graph(&self) -> Option<&Graph> {
        self.active_graph
            .as_deref()
            .and_then(|id| self.graphs.iter().find(|g| g.id() == id))
    }

    pub fn active_graph_mut(&mut self) -> Option<&mut Graph> {
        let id = self.active_graph.clone()?;
        self.graphs.iter_mut().find(|g| g.id() == id)
    }

    pub fn graph(&self, graph_id: &str) -> Option<&Graph> {
        self.graphs.iter().find(|g| g.id() == graph_id)
    }

    pub fn graphs(&self) -> &[Graph] {
        &self.graphs
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    pub fn metadata(&self) -> &MetadataOptions {
        &self.metadata
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn arena(&self) -> &Rc<RefCell<InterfaceArena>> {
        &self.arena
    }

    fn clear_dataflow(&mut self) {
        let mut arena = self.arena.borrow_mut();
        for graph in &self.graphs {
            arena.remove_graph(graph.id());
        }
        drop(arena);
        self.graphs.clear();
        self.subscriptions.clear();
        self.active_graph = None;
    }

    /// Reset all process-wide session state; stale history entries
    /// referencing removed graphs are not collected automatically, so a
    /// specification reload clears everything
    fn reset_session(&mut self) {
        self.clear_dataflow();
        self.history.clear();
        self.arena.borrow_mut().clear();
    }
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

/// Exposed-interface external names must be unique within one graph
fn check_exposed_names(graph_state: &GraphState, errors: &mut Vec<String>) {
    let graph_label = graph_state
        .id
        .as_deref()
        .or(graph_state.name.as_deref())
        .unwrap_or("graph");
    // A node-level external name matching a graph-level entry names the same
    // exposure, so the two namespaces are checked independently.
    let mut graph_level = std::collections::HashSet::new();
    for entry in &graph_state.interfaces {
        if !graph_level.insert(entry.name.as_str()) {
            errors.push(format!(
                "graph '{}': duplicate exposed interface name \"{}\"",
                graph_label, entry.name
            ));
        }
    }
    let mut node_level = std::collections::HashSet::new();
    for name in graph_state
        .nodes
        .iter()
        .flat_map(|n| n.interfaces.iter())
        .filter_map(|i| i.external_name.as_deref())
    {
        if !node_level.insert(name) {
            errors.push(format!(
                "graph '{}': duplicate exposed interface name \"{}\"",
                graph_label, name
            ));
        }
    }
}

/// Category rules checked at registration time
///
/// A category node must be named after the last path segment of its
/// category, and a node extending a category node must live inside that
/// category's subtree.
fn check_category_rules(
    definitions: &[NodeDef],
    resolved: &[ResolvedNode],
    errors: &mut Vec<String>,
) {
    for def in definitions {
        if def.is_category {
            match def.category_leaf() {
                Some(leaf) if leaf == def.name => {}
                _ => errors.push(format!(
                    "category node '{}' must be named after the last segment of its category '{}'",
                    def.name,
                    def.category.as_deref().unwrap_or("")
                )),
            }
        }
    }

    for node in resolved {
        for parent_name in &node.def.extends {
            let Some(parent) = definitions.iter().find(|d| &d.name == parent_name) else {
                continue;
            };
            if !parent.is_category {
                continue;
            }
            let parent_category = parent.category.as_deref().unwrap_or("");
            let child_category = node.def.category.as_deref().unwrap_or("");
            let inside = child_category == parent_category
                || child_category.starts_with(&format!("{}/", parent_category));
            if !inside {
                errors.push(format!(
                    "node '{}' extends category node '{}' but is not in category '{}'",
                    node.def.name, parent_name, parent_category
                ));
            }
        }
    }
}
