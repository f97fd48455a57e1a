//! Graph mutation events and observer plumbing
//!
//! Every structural mutation of a live graph is announced synchronously to
//! registered observers. Observation is how the history manager taps the
//! graph: it never wraps the mutation API itself.
//!
//! Subscribing returns an owned [`Subscription`] handle; dropping the handle
//! unsubscribes. There is no token bookkeeping for callers to get wrong.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use dataflow_spec::{Anchor, ConnectionState, NodeState};

/// Events emitted by a live graph on structural mutation
///
/// Removal events carry the full serialized form of the removed entity so a
/// recorded step is self-sufficient for replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphEvent {
    #[serde(rename_all = "camelCase")]
    NodeAdded { graph_id: String, node: NodeState },

    #[serde(rename_all = "camelCase")]
    NodeRemoved { graph_id: String, node: NodeState },

    /// A node was edited in place; both snapshots are captured
    #[serde(rename_all = "camelCase")]
    NodeUpdated {
        graph_id: String,
        node_id: String,
        before: NodeState,
        after: NodeState,
    },

    #[serde(rename_all = "camelCase")]
    ConnectionAdded {
        graph_id: String,
        connection: ConnectionState,
    },

    #[serde(rename_all = "camelCase")]
    ConnectionRemoved {
        graph_id: String,
        connection: ConnectionState,
    },

    #[serde(rename_all = "camelCase")]
    AnchorAdded {
        graph_id: String,
        connection_id: String,
        anchor: Anchor,
        index: usize,
    },

    #[serde(rename_all = "camelCase")]
    AnchorRemoved {
        graph_id: String,
        connection_id: String,
        anchor: Anchor,
        index: usize,
    },
}

impl GraphEvent {
    /// Id of the graph the event originated from
    pub fn graph_id(&self) -> &str {
        match self {
            GraphEvent::NodeAdded { graph_id, .. }
            | GraphEvent::NodeRemoved { graph_id, .. }
            | GraphEvent::NodeUpdated { graph_id, .. }
            | GraphEvent::ConnectionAdded { graph_id, .. }
            | GraphEvent::ConnectionRemoved { graph_id, .. }
            | GraphEvent::AnchorAdded { graph_id, .. }
            | GraphEvent::AnchorRemoved { graph_id, .. } => graph_id,
        }
    }
}

type Handler = Rc<dyn Fn(&GraphEvent)>;

struct RegistryInner {
    handlers: RefCell<Vec<(u64, Handler)>>,
    next_token: Cell<u64>,
}

/// Synchronous observer registry for graph events
///
/// The graph model is single-threaded and cooperative; handlers run inline
/// inside the mutating call, in subscription order.
#[derive(Clone)]
pub struct ObserverRegistry {
    inner: Rc<RegistryInner>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                handlers: RefCell::new(Vec::new()),
                next_token: Cell::new(0),
            }),
        }
    }

    /// Register an observer; the handler stays registered for the lifetime of
    /// the returned subscription
    pub fn subscribe(&self, handler: impl Fn(&GraphEvent) + 'static) -> Subscription {
        let token = self.inner.next_token.get();
        self.inner.next_token.set(token + 1);
        self.inner
            .handlers
            .borrow_mut()
            .push((token, Rc::new(handler)));
        Subscription {
            token,
            registry: Rc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every registered observer
    pub fn notify(&self, event: &GraphEvent) {
        // Handlers may drop their own subscription; never hold the borrow
        // across the calls.
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .borrow()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.inner.handlers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned handle to a registered observer; dropping it unsubscribes
pub struct Subscription {
    token: u64,
    registry: Weak<RegistryInner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.handlers.borrow_mut().retain(|(t, _)| *t != self.token);
        }
    }
}

/// Fire-and-forget notification emitted by a button property
///
/// The receiving collaborator (a remote execution backend or the host UI) is
/// never waited on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PropertyAction {
    /// button-url: open an external address
    #[serde(rename_all = "camelCase")]
    OpenUrl {
        node_id: String,
        property: String,
        url: String,
    },

    /// button-api: invoke a named remote procedure
    #[serde(rename_all = "camelCase")]
    CallProcedure {
        node_id: String,
        property: String,
        procedure_name: String,
    },

    /// button-graph: navigate to a related subgraph
    #[serde(rename_all = "camelCase")]
    OpenGraph { node_id: String, property: String },
}

/// Trait for delivering property actions to an external collaborator
pub trait ActionSink {
    fn send(&self, action: PropertyAction);
}

/// A no-op action sink that discards all actions
pub struct NullActionSink;

impl ActionSink for NullActionSink {
    fn send(&self, _action: PropertyAction) {}
}

/// A vector-based action sink that collects actions
///
/// Useful for testing to verify actions were emitted correctly.
pub struct VecActionSink {
    actions: RefCell<Vec<PropertyAction>>,
}

impl VecActionSink {
    pub fn new() -> Self {
        Self {
            actions: RefCell::new(Vec::new()),
        }
    }

    /// Get all collected actions
    pub fn actions(&self) -> Vec<PropertyAction> {
        self.actions.borrow().clone()
    }

    /// Clear all collected actions
    pub fn clear(&self) {
        self.actions.borrow_mut().clear();
    }
}

impl Default for VecActionSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionSink for VecActionSink {
    fn send(&self, action: PropertyAction) {
        self.actions.borrow_mut().push(action);
    }
}
