//! Transactional undo/redo history
//!
//! The history manager taps graph mutation events through an observer
//! subscription and records each one as a reversible [`Step`] on a per-graph
//! stack. Steps recorded while a transaction is open share its transaction
//! id; undo and redo consume a whole transaction as one indivisible unit.
//!
//! Replay runs with recording suppressed. Suppression is a scoped
//! [`ReplayGuard`], released on drop even when a replay panics; there is no
//! bare flag for an exception path to leave stuck.
//!
//! A reversed step whose entity has vanished (a specification reload removed
//! its node or interface) is abandoned silently: the editor prefers a
//! silently-incomplete undo over a crash.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dataflow_spec::{Anchor, ConnectionState, NodeState};

use crate::events::{GraphEvent, Subscription};
use crate::graph::Graph;

/// A reversible history step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StepKind {
    #[serde(rename_all = "camelCase")]
    AddNode { node: NodeState },
    #[serde(rename_all = "camelCase")]
    RemoveNode { node: NodeState },
    #[serde(rename_all = "camelCase")]
    AddConnection { connection: ConnectionState },
    #[serde(rename_all = "camelCase")]
    RemoveConnection { connection: ConnectionState },
    #[serde(rename_all = "camelCase")]
    AddAnchor {
        connection_id: String,
        anchor: Anchor,
        index: usize,
    },
    #[serde(rename_all = "camelCase")]
    RemoveAnchor {
        connection_id: String,
        anchor: Anchor,
        index: usize,
    },
    /// Edits flip by swapping the snapshots; applying a step applies `after`
    #[serde(rename_all = "camelCase")]
    EditNode {
        node_id: String,
        before: NodeState,
        after: NodeState,
    },
}

impl StepKind {
    /// The inverse step: add and remove swap, edit swaps its snapshots
    pub fn flipped(&self) -> StepKind {
        match self.clone() {
            StepKind::AddNode { node } => StepKind::RemoveNode { node },
            StepKind::RemoveNode { node } => StepKind::AddNode { node },
            StepKind::AddConnection { connection } => StepKind::RemoveConnection { connection },
            StepKind::RemoveConnection { connection } => StepKind::AddConnection { connection },
            StepKind::AddAnchor {
                connection_id,
                anchor,
                index,
            } => StepKind::RemoveAnchor {
                connection_id,
                anchor,
                index,
            },
            StepKind::RemoveAnchor {
                connection_id,
                anchor,
                index,
            } => StepKind::AddAnchor {
                connection_id,
                anchor,
                index,
            },
            StepKind::EditNode {
                node_id,
                before,
                after,
            } => StepKind::EditNode {
                node_id,
                before: after,
                after: before,
            },
        }
    }
}

/// A step tagged with the transaction it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub transaction: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

#[derive(Debug, Default)]
struct GraphHistory {
    undo: Vec<Step>,
    redo: Vec<Step>,
}

#[derive(Debug)]
struct HistoryState {
    stacks: HashMap<String, GraphHistory>,
    open_transaction: Option<String>,
    suppressing: bool,
    max_steps: usize,
}

/// Per-editor history manager; clones share one underlying state
#[derive(Clone)]
pub struct History {
    state: Rc<RefCell<HistoryState>>,
}

impl History {
    pub fn new() -> Self {
        Self::with_capacity(200)
    }

    /// Create a history keeping at most `max_steps` undo steps per graph
    pub fn with_capacity(max_steps: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(HistoryState {
                stacks: HashMap::new(),
                open_transaction: None,
                suppressing: false,
                max_steps: max_steps.max(1),
            })),
        }
    }

    /// Subscribe to a graph's mutation events
    ///
    /// The per-graph stacks are created lazily on the first recorded event
    /// and survive graph switches; recording stops when the returned
    /// subscription is dropped.
    pub fn attach(&self, graph: &Graph) -> Subscription {
        let state = self.state.clone();
        graph.observers().subscribe(move |event| {
            record(&state, event);
        })
    }

    /// Open a transaction; steps recorded until commit share its id
    ///
    /// Idempotent no-op while a transaction is already open: returns None to
    /// signal the rejection.
    pub fn start_transaction(&self) -> Option<String> {
        let mut state = self.state.borrow_mut();
        if state.open_transaction.is_some() {
            return None;
        }
        let id = Uuid::new_v4().to_string();
        state.open_transaction = Some(id.clone());
        Some(id)
    }

    /// Close the open transaction, if any
    pub fn commit_transaction(&self) {
        self.state.borrow_mut().open_transaction = None;
    }

    pub fn can_undo(&self, graph_id: &str) -> bool {
        self.state
            .borrow()
            .stacks
            .get(graph_id)
            .map(|s| !s.undo.is_empty())
            .unwrap_or(false)
    }

    pub fn can_redo(&self, graph_id: &str) -> bool {
        self.state
            .borrow()
            .stacks
            .get(graph_id)
            .map(|s| !s.redo.is_empty())
            .unwrap_or(false)
    }

    /// Undo the most recent step on the graph's stack
    ///
    /// If the popped step shares its transaction id with the new top of the
    /// stack, undo continues until the whole transaction is consumed.
    pub fn undo(&self, graph: &mut Graph) {
        loop {
            let (step, transaction_continues) = {
                let mut state = self.state.borrow_mut();
                let Some(stack) = state.stacks.get_mut(graph.id()) else {
                    return;
                };
                let Some(step) = stack.undo.pop() else {
                    return;
                };
                let continues = stack
                    .undo
                    .last()
                    .map(|next| next.transaction == step.transaction)
                    .unwrap_or(false);
                (step, continues)
            };

            let flipped = Step {
                transaction: step.transaction,
                kind: step.kind.flipped(),
            };
            {
                let _guard = self.replay_guard();
                apply_step(graph, &flipped.kind);
            }
            if let Some(stack) = self.state.borrow_mut().stacks.get_mut(graph.id()) {
                stack.redo.push(flipped);
            }

            if !transaction_continues {
                break;
            }
        }
    }

    /// Redo the most recently undone step, transaction-atomically
    pub fn redo(&self, graph: &mut Graph) {
        loop {
            let (step, transaction_continues) = {
                let mut state = self.state.borrow_mut();
                let Some(stack) = state.stacks.get_mut(graph.id()) else {
                    return;
                };
                let Some(step) = stack.redo.pop() else {
                    return;
                };
                let continues = stack
                    .redo
                    .last()
                    .map(|next| next.transaction == step.transaction)
                    .unwrap_or(false);
                (step, continues)
            };

            let flipped = Step {
                transaction: step.transaction,
                kind: step.kind.flipped(),
            };
            {
                let _guard = self.replay_guard();
                apply_step(graph, &flipped.kind);
            }
            if let Some(stack) = self.state.borrow_mut().stacks.get_mut(graph.id()) {
                stack.undo.push(flipped);
            }

            if !transaction_continues {
                break;
            }
        }
    }

    /// Acquire the suppression guard; recording pauses until it drops
    ///
    /// Also used by the editor manager while loading a dataflow, so the load
    /// does not record itself.
    pub fn replay_guard(&self) -> ReplayGuard {
        ReplayGuard::acquire(self.state.clone())
    }

    /// Carry a history stack across a graph switch
    ///
    /// Entering or leaving a subgraph view keeps the parent's stacks keyed
    /// under its id; with `copy_state_stack` the current stack is copied to
    /// the target graph id as its starting history.
    pub fn enter_graph(&self, from: &str, to: &str, copy_state_stack: bool) {
        if !copy_state_stack || from == to {
            return;
        }
        let mut state = self.state.borrow_mut();
        if let Some(source) = state.stacks.get(from) {
            let copied = GraphHistory {
                undo: source.undo.clone(),
                redo: source.redo.clone(),
            };
            state.stacks.insert(to.to_string(), copied);
        }
    }

    /// Number of undo steps recorded for a graph
    pub fn undo_depth(&self, graph_id: &str) -> usize {
        self.state
            .borrow()
            .stacks
            .get(graph_id)
            .map(|s| s.undo.len())
            .unwrap_or(0)
    }

    /// Drop all recorded history; used when a specification is reloaded
    pub fn clear(&self) {
        let mut state = self.state.borrow_mut();
        state.stacks.clear();
        state.open_transaction = None;
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

fn record(state: &Rc<RefCell<HistoryState>>, event: &GraphEvent) {
    let mut state = state.borrow_mut();
    if state.suppressing {
        return;
    }

    let kind = match event.clone() {
        GraphEvent::NodeAdded { node, .. } => StepKind::AddNode { node },
        GraphEvent::NodeRemoved { node, .. } => StepKind::RemoveNode { node },
        GraphEvent::NodeUpdated {
            node_id,
            before,
            after,
            ..
        } => StepKind::EditNode {
            node_id,
            before,
            after,
        },
        GraphEvent::ConnectionAdded { connection, .. } => StepKind::AddConnection { connection },
        GraphEvent::ConnectionRemoved { connection, .. } => {
            StepKind::RemoveConnection { connection }
        }
        GraphEvent::AnchorAdded {
            connection_id,
            anchor,
            index,
            ..
        } => StepKind::AddAnchor {
            connection_id,
            anchor,
            index,
        },
        GraphEvent::AnchorRemoved {
            connection_id,
            anchor,
            index,
            ..
        } => StepKind::RemoveAnchor {
            connection_id,
            anchor,
            index,
        },
    };

    let in_open_transaction = state.open_transaction.is_some();
    let transaction = state
        .open_transaction
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let max_steps = state.max_steps;
    let graph_id = event.graph_id().to_string();
    let stack = state.stacks.entry(graph_id).or_default();

    // Removing a connection implies its anchors were just removed one by
    // one. Outside an explicit transaction, pull those anchor steps into
    // this step's transaction so the removal undoes as one unit.
    if !in_open_transaction {
        if let StepKind::RemoveConnection { connection } = &kind {
            for previous in stack.undo.iter_mut().rev() {
                match &previous.kind {
                    StepKind::RemoveAnchor { connection_id, .. }
                        if connection_id == &connection.id =>
                    {
                        previous.transaction = transaction.clone();
                    }
                    _ => break,
                }
            }
        }
    }

    stack.undo.push(Step { transaction, kind });
    // A new forward action invalidates anything that was undone.
    stack.redo.clear();
    if stack.undo.len() > max_steps {
        let excess = stack.undo.len() - max_steps;
        stack.undo.drain(..excess);
    }
}

/// Replay one step against the live graph, soft-failing on vanished entities
fn apply_step(graph: &mut Graph, kind: &StepKind) {
    let outcome = match kind {
        StepKind::AddNode { node } => graph.restore_node(node).map(|_| ()),
        StepKind::RemoveNode { node } => graph.remove_node(&node.id).map(|_| ()),
        StepKind::AddConnection { connection } => {
            graph.restore_connection(connection).map(|_| ())
        }
        StepKind::RemoveConnection { connection } => {
            graph.remove_connection(&connection.id).map(|_| ())
        }
        StepKind::AddAnchor {
            connection_id,
            anchor,
            index,
        } => graph.add_anchor(connection_id, Some(*index), anchor.clone()),
        StepKind::RemoveAnchor {
            connection_id,
            index,
            ..
        } => graph.remove_anchor(connection_id, *index).map(|_| ()),
        StepKind::EditNode { node_id, after, .. } => graph.apply_node_snapshot(node_id, after),
    };
    if let Err(e) = outcome {
        log::debug!("history replay skipped a step: {}", e);
    }
}

/// Scoped suppression of history recording
///
/// Nesting-safe: the previous suppression state is restored on drop, so an
/// outer guard is not released by an inner one.
pub struct ReplayGuard {
    state: Rc<RefCell<HistoryState>>,
    previous: bool,
}

impl ReplayGuard {
    fn acquire(state: Rc<RefCell<HistoryState>>) -> Self {
        let previous = {
            let mut borrowed = state.borrow_mut();
            let previous = borrowed.suppressing;
            borrowed.suppressing = true;
            previous
        };
        Self { state, previous }
    }
}

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        self.state.borrow_mut().suppressing = self.previous;
    }
}
