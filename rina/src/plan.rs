use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::RenderGeneration;
use crate::graph::NodeId;
use crate::node_kind::TextFragment;
use crate::queue_node::{Phase, QueueNode};

/// Shared cancellation flag of a [`QueuePlan`]. Once raised, every node
/// phase that has not run yet completes without calling its hook.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEvent {
    pub node_id: NodeId,
    pub name: String,
    pub phase: Phase,
    pub skipped: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanNodeSnapshot {
    pub node_id: NodeId,
    pub name: String,
    pub longest_distance: usize,
    pub parents: Vec<NodeId>,
    pub children: Vec<Option<NodeId>>,
    pub waiting_parents: usize,
    pub waiting_children: usize,
}

/// Serializable view of a plan, nodes in discovery order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub generation: RenderGeneration,
    pub root: NodeId,
    pub nodes: Vec<PlanNodeSnapshot>,
}

/// The queue nodes of one render, built by
/// [`QueueBuilder`](crate::queue_builder::QueueBuilder). Nodes are stored in
/// discovery order, the target node first.
#[derive(Debug)]
pub struct QueuePlan {
    generation: RenderGeneration,
    q_nodes: Vec<QueueNode>,
    node_index: HashMap<NodeId, usize>,
    root: usize,

    cancel: CancelHandle,
    journal: Option<Mutex<Vec<ProcessEvent>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.0.swap(true, Ordering::AcqRel) {
            debug!("render cancelled");
        }
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl QueuePlan {
    pub(crate) fn new(
        generation: RenderGeneration,
        q_nodes: Vec<QueueNode>,
        node_index: HashMap<NodeId, usize>,
        root: usize,
    ) -> Self {
        assert!(root < q_nodes.len());
        assert_eq!(q_nodes.len(), node_index.len());

        Self {
            generation,
            q_nodes,
            node_index,
            root,
            cancel: CancelHandle::default(),
            journal: None,
        }
    }

    pub fn generation(&self) -> RenderGeneration {
        self.generation
    }
    pub fn len(&self) -> usize {
        self.q_nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.q_nodes.is_empty()
    }
    pub fn root(&self) -> usize {
        self.root
    }
    pub fn root_node(&self) -> &QueueNode {
        &self.q_nodes[self.root]
    }
    pub fn q_nodes(&self) -> &[QueueNode] {
        &self.q_nodes
    }
    pub fn q_node(&self, q_node_idx: usize) -> &QueueNode {
        &self.q_nodes[q_node_idx]
    }

    pub fn index_of(&self, node_id: NodeId) -> Option<usize> {
        self.node_index.get(&node_id).copied()
    }
    pub fn by_node_id(&self, node_id: NodeId) -> Option<&QueueNode> {
        self.index_of(node_id).map(|idx| &self.q_nodes[idx])
    }

    /// Output of the target node once the plan has been processed.
    pub fn output(&self) -> Option<TextFragment> {
        self.root_node().output()
    }

    /// Nodes whose End ran its hook.
    pub fn executed_nodes(&self) -> usize {
        self.q_nodes
            .iter()
            .filter(|q_node| q_node.was_executed())
            .count()
    }

    /// The node still takes part in ordering but its hooks are not called.
    /// Returns false if the node is not part of this plan.
    pub fn mark_skip(&self, node_id: NodeId) -> bool {
        match self.by_node_id(node_id) {
            Some(q_node) => {
                q_node.set_skip();
                true
            }
            None => false,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn enable_journal(&mut self) {
        self.journal.get_or_insert_with(Mutex::default);
    }
    pub fn journal(&self) -> Vec<ProcessEvent> {
        self.journal
            .as_ref()
            .map(|journal| journal.lock().clone())
            .unwrap_or_default()
    }

    pub(crate) fn record(&self, q_node: &QueueNode, phase: Phase, skipped: bool) {
        if let Some(journal) = self.journal.as_ref() {
            journal.lock().push(ProcessEvent {
                node_id: q_node.node_id(),
                name: q_node.name().to_string(),
                phase,
                skipped,
            });
        }
    }

    pub fn snapshot(&self) -> PlanSnapshot {
        let id_of = |q_node_idx: usize| self.q_nodes[q_node_idx].node_id();

        PlanSnapshot {
            generation: self.generation,
            root: id_of(self.root),
            nodes: self
                .q_nodes
                .iter()
                .map(|q_node| PlanNodeSnapshot {
                    node_id: q_node.node_id(),
                    name: q_node.name().to_string(),
                    longest_distance: q_node.longest_distance(),
                    parents: q_node.parents().iter().map(|&idx| id_of(idx)).collect(),
                    children: q_node
                        .children()
                        .iter()
                        .map(|child| child.map(id_of))
                        .collect(),
                    waiting_parents: q_node.waiting_parents(),
                    waiting_children: q_node.waiting_children(),
                })
                .collect(),
        }
    }
}
