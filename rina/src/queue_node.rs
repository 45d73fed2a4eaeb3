use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{trace, warn};

use crate::graph::{NodeId, ProcessNode};
use crate::node_kind::{NodeKind, NodeState, TextFragment};
use crate::plan::QueuePlan;
use crate::queue::{QueueError, QueueResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Phase {
    Begin,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub q_node_idx: usize,
    pub phase: Phase,
}

/// A graph node scheduled for one render.
///
/// `parents` are the nodes consuming this node's output, `children` the
/// producers it reads from, indexed by input pin. Begin flows from the
/// sink towards the sources, End flows back. A node's Begin becomes ready
/// once every parent has begun, its End once every child has ended.
#[derive(Debug)]
pub struct QueueNode {
    node_id: NodeId,
    name: String,
    kind: NodeKind,
    longest_distance: usize,

    parents: Vec<usize>,
    children: Vec<Option<usize>>,

    waiting_parents: AtomicUsize,
    waiting_children: AtomicUsize,

    begun: AtomicBool,
    ended: AtomicBool,
    skip: AtomicBool,
    executed: AtomicBool,

    state: Mutex<NodeState>,
}

impl WorkItem {
    pub fn new(q_node_idx: usize, phase: Phase) -> Self {
        Self { q_node_idx, phase }
    }
}

impl QueueNode {
    pub(crate) fn new(node: &ProcessNode) -> Self {
        Self {
            node_id: node.id(),
            name: node.name.clone(),
            kind: node.kind().clone(),
            longest_distance: node.longest_distance().unwrap_or(0),
            parents: Vec::new(),
            children: Vec::new(),
            waiting_parents: AtomicUsize::new(0),
            waiting_children: AtomicUsize::new(0),
            begun: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            skip: AtomicBool::new(false),
            executed: AtomicBool::new(false),
            state: Mutex::new(NodeState::default()),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
    pub fn longest_distance(&self) -> usize {
        self.longest_distance
    }
    pub fn parents(&self) -> &[usize] {
        &self.parents
    }
    pub fn children(&self) -> &[Option<usize>] {
        &self.children
    }
    pub fn waiting_parents(&self) -> usize {
        self.waiting_parents.load(Ordering::Acquire)
    }
    pub fn waiting_children(&self) -> usize {
        self.waiting_children.load(Ordering::Acquire)
    }
    pub fn has_begun(&self) -> bool {
        self.begun.load(Ordering::Acquire)
    }
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
    pub fn is_skipped(&self) -> bool {
        self.skip.load(Ordering::Acquire)
    }
    /// True once the End hook actually ran. Skipped and cancelled nodes
    /// end without it.
    pub fn was_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    pub fn output(&self) -> Option<TextFragment> {
        self.state.lock().output.clone()
    }

    pub(crate) fn set_skip(&self) {
        self.skip.store(true, Ordering::Release);
    }

    /// Records that `q_nodes[parent_idx]` reads the output of
    /// `q_nodes[q_node_idx]` through input pin `slot`.
    pub(crate) fn add_parent(
        q_nodes: &mut [QueueNode],
        q_node_idx: usize,
        parent_idx: usize,
        slot: usize,
    ) {
        assert_ne!(q_node_idx, parent_idx);

        let q_node = &mut q_nodes[q_node_idx];
        q_node.parents.push(parent_idx);
        *q_node.waiting_parents.get_mut() += 1;

        q_nodes[parent_idx].add_child(q_node_idx, slot);
    }

    fn add_child(&mut self, child_idx: usize, slot: usize) {
        if self.children.len() <= slot {
            self.children.resize(slot + 1, None);
        }
        assert!(
            self.children[slot].is_none(),
            "Input slot {} of {} is already linked",
            slot,
            self.name
        );

        self.children[slot] = Some(child_idx);
        *self.waiting_children.get_mut() += 1;
    }

    /// Runs one phase and hands every node it makes ready to `ready`.
    ///
    /// A node without children finishes its End right after its Begin.
    pub(crate) fn process(
        &self,
        plan: &QueuePlan,
        phase: Phase,
        ready: &mut dyn FnMut(WorkItem),
    ) -> QueueResult<()> {
        match phase {
            Phase::Begin => {
                let already_begun = self.begun.swap(true, Ordering::AcqRel);
                assert!(!already_begun, "Begin ran twice for {}", self.name);

                self.run_hook(plan, Phase::Begin)?;

                let mut has_children = false;
                for &child_idx in self.children.iter().flatten() {
                    has_children = true;
                    if plan.q_node(child_idx).release_parent() {
                        ready(WorkItem::new(child_idx, Phase::Begin));
                    }
                }

                if !has_children {
                    self.process(plan, Phase::End, ready)?;
                }
            }
            Phase::End => {
                let already_ended = self.ended.swap(true, Ordering::AcqRel);
                assert!(!already_ended, "End ran twice for {}", self.name);
                assert_eq!(self.waiting_children(), 0);

                self.run_hook(plan, Phase::End)?;

                for &parent_idx in self.parents.iter() {
                    if plan.q_node(parent_idx).release_child() {
                        ready(WorkItem::new(parent_idx, Phase::End));
                    }
                }
            }
        }

        Ok(())
    }

    // True when the last waiting parent released this node.
    fn release_parent(&self) -> bool {
        let previous = self.waiting_parents.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "Waiting parents underflow on {}", self.name);
        previous == 1
    }

    fn release_child(&self) -> bool {
        let previous = self.waiting_children.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "Waiting children underflow on {}", self.name);
        previous == 1
    }

    fn run_hook(&self, plan: &QueuePlan, phase: Phase) -> QueueResult<()> {
        let skipped = self.is_skipped() || plan.is_cancelled();

        if skipped {
            trace!(node = %self.name, %phase, "phase skipped");
        } else {
            let result = match phase {
                Phase::Begin => self.kind.begin_process(&mut self.state.lock()),
                Phase::End => {
                    let inputs: Vec<TextFragment> = self
                        .children
                        .iter()
                        .flatten()
                        .filter_map(|&child_idx| plan.q_node(child_idx).output())
                        .collect();
                    self.kind.end_process(&mut self.state.lock(), inputs)
                }
            };

            result.map_err(|err| {
                warn!(node = %self.name, %phase, error = %err, "node processing failed");
                QueueError::Process {
                    node_id: self.node_id,
                    name: self.name.clone(),
                    phase,
                    message: format!("{err:#}"),
                }
            })?;
            if phase == Phase::End {
                self.executed.store(true, Ordering::Release);
            }
            trace!(node = %self.name, %phase, "phase processed");
        }

        plan.record(self, phase, skipped);

        Ok(())
    }
}
