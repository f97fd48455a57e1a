//! Node type and graph template registry
//!
//! Central registry mapping type names to constructible node types and
//! reusable graph templates. Registries are process-wide state scoped to the
//! active editor session and are cleared when a specification is reloaded.

use std::collections::HashMap;
use std::rc::Rc;

use crate::factory::NodeType;
use crate::template::GraphTemplate;

/// Registry of node types and graph templates
#[derive(Default)]
pub struct NodeTypeRegistry {
    types: HashMap<String, Rc<NodeType>>,
    templates: HashMap<String, GraphTemplate>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type under its name
    ///
    /// Re-registering a name replaces the previous entry.
    pub fn register(&mut self, node_type: NodeType) {
        self.types.insert(node_type.name.clone(), Rc::new(node_type));
    }

    pub fn get(&self, name: &str) -> Option<Rc<NodeType>> {
        self.types.get(name).cloned()
    }

    pub fn has_node_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// All registered node types
    pub fn all(&self) -> Vec<Rc<NodeType>> {
        self.types.values().cloned().collect()
    }

    /// Node types grouped by category, for palette listing
    pub fn by_category(&self) -> HashMap<String, Vec<Rc<NodeType>>> {
        let mut grouped: HashMap<String, Vec<Rc<NodeType>>> = HashMap::new();
        for node_type in self.types.values() {
            let category = node_type.category.clone().unwrap_or_default();
            grouped.entry(category).or_default().push(node_type.clone());
        }
        grouped
    }

    pub fn register_template(&mut self, template: GraphTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get_template(&self, name: &str) -> Option<&GraphTemplate> {
        self.templates.get(name)
    }

    pub fn all_templates(&self) -> Vec<&GraphTemplate> {
        self.templates.values().collect()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Drop every registered type and template
    pub fn clear(&mut self) {
        self.types.clear();
        self.templates.clear();
    }
}
