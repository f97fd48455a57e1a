//! Interface arena
//!
//! Live interface state is owned by a single arena addressed by stable id.
//! An interface exposed through a containing subgraph node is a *second*
//! record carrying a back-reference to the canonical id, never a second
//! ownership claim: reads and writes resolve through the id chain, so the
//! inner interface and the graph-node-facing copy can never drift apart.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dataflow_spec::{Direction, Side, TypeSet};

use crate::error::{EditorError, Result};

/// Live state of one interface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRecord {
    pub id: String,
    /// Graph the owning node lives in
    pub graph_id: String,
    /// Owning node instance
    pub node_id: String,
    pub name: String,
    pub direction: Direction,
    pub side: Side,
    pub side_position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_type: Option<TypeSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections_count: Option<i64>,
    #[serde(default)]
    pub connection_count: usize,
    /// Canonical id this record proxies, for exposed subgraph interfaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_of: Option<String>,
}

/// Arena of interface records addressed by stable id
#[derive(Debug, Default)]
pub struct InterfaceArena {
    records: HashMap<String, InterfaceRecord>,
}

impl InterfaceArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record
    ///
    /// Registration is idempotent per (id, graph): re-registering an id that
    /// already exists in the same graph replaces the stored record (a
    /// refresh), never an error. The same id surfacing from a *different*
    /// graph is a conflict.
    pub fn register(&mut self, record: InterfaceRecord) -> Result<()> {
        if let Some(existing) = self.records.get(&record.id) {
            if existing.graph_id != record.graph_id {
                return Err(EditorError::InterfaceConflict {
                    id: record.id,
                    graph: existing.graph_id.clone(),
                });
            }
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&InterfaceRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut InterfaceRecord> {
        self.records.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Follow the proxy chain to the canonical id
    pub fn canonical_id<'a>(&'a self, id: &'a str) -> &'a str {
        let mut current = id;
        // Proxy chains are one level deep in practice; the loop guards
        // against registration bugs producing longer chains.
        let mut hops = 0;
        while let Some(record) = self.records.get(current) {
            match &record.proxy_of {
                Some(next) if hops < 8 => {
                    current = next;
                    hops += 1;
                }
                _ => break,
            }
        }
        current
    }

    /// Read a value through the canonical record
    pub fn value(&self, id: &str) -> Option<&Value> {
        let canonical = self.canonical_id(id);
        self.records.get(canonical).and_then(|r| r.value.as_ref())
    }

    /// Write a value through the canonical record
    ///
    /// Returns false when neither the id nor its canonical target exists.
    pub fn set_value(&mut self, id: &str, value: Value) -> bool {
        let canonical = self.canonical_id(id).to_string();
        match self.records.get_mut(&canonical) {
            Some(record) => {
                record.value = Some(value);
                true
            }
            None => false,
        }
    }

    /// Adjust the connection count of a record
    pub fn bump_connections(&mut self, id: &str, delta: isize) {
        if let Some(record) = self.records.get_mut(id) {
            record.connection_count = record.connection_count.saturating_add_signed(delta);
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<InterfaceRecord> {
        self.records.remove(id)
    }

    /// Move a record to a new id, keeping its state
    pub fn rekey(&mut self, old_id: &str, new_id: &str) -> bool {
        match self.records.remove(old_id) {
            Some(mut record) => {
                record.id = new_id.to_string();
                self.records.insert(new_id.to_string(), record);
                true
            }
            None => false,
        }
    }

    /// Drop every record owned by a graph
    pub fn remove_graph(&mut self, graph_id: &str) {
        self.records.retain(|_, r| r.graph_id != graph_id);
    }

    /// Drop everything; used when a specification is reloaded
    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
