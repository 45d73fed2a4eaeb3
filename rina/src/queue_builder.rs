use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::context::{RenderContext, RenderGeneration};
use crate::graph::{Graph, NodeId, ProcessNode};
use crate::plan::QueuePlan;
use crate::queue::{QueueError, QueueResult};
use crate::queue_node::QueueNode;

/// Discovers the subgraph a target node depends on and links it into a
/// [`QueuePlan`].
///
/// Nodes are expanded in ascending longest distance, so every consumer of
/// a node is expanded before the node itself. A producer that turns up
/// after it was expanded can only be reached through a cycle.
#[derive(Debug)]
pub struct QueueBuilder {
    generation: RenderGeneration,
    // (longest distance, discovery order) -> node
    worklist: BTreeMap<(usize, usize), NodeId>,
    node_index: HashMap<NodeId, usize>,
    expanded: HashSet<NodeId>,
    q_nodes: Vec<QueueNode>,
}

impl QueueBuilder {
    pub fn new(ctx: &RenderContext) -> Self {
        Self {
            generation: ctx.next_generation(),
            worklist: BTreeMap::new(),
            node_index: HashMap::new(),
            expanded: HashSet::new(),
            q_nodes: Vec::new(),
        }
    }

    pub fn generation(&self) -> RenderGeneration {
        self.generation
    }

    pub fn build(mut self, graph: &Graph, target: NodeId) -> QueueResult<QueuePlan> {
        let target_node = graph
            .node(target)
            .ok_or(QueueError::NodeNotFound { node_id: target })?;
        let root = self.discover(target_node);

        while let Some((_, node_id)) = self.worklist.pop_first() {
            let node = graph
                .node(node_id)
                .ok_or(QueueError::NodeNotFound { node_id })?;
            self.expanded.insert(node_id);
            node.build_queue(&mut self, graph)?;
        }

        debug!(
            generation = self.generation,
            target = %target_node.name,
            nodes = self.q_nodes.len(),
            "queue built"
        );

        Ok(QueuePlan::new(
            self.generation,
            self.q_nodes,
            self.node_index,
            root,
        ))
    }

    // Returns the queue node of `node`, creating and scheduling it on first
    // reference.
    fn discover(&mut self, node: &ProcessNode) -> usize {
        if let Some(&q_node_idx) = self.node_index.get(&node.id()) {
            return q_node_idx;
        }

        let q_node_idx = self.q_nodes.len();
        let q_node = QueueNode::new(node);
        self.worklist
            .insert((q_node.longest_distance(), q_node_idx), node.id());
        self.q_nodes.push(q_node);
        self.node_index.insert(node.id(), q_node_idx);
        trace!(node = %node.name, q_node_idx, "node discovered");

        q_node_idx
    }

    /// Links `producer` as the child feeding input `slot` of the already
    /// discovered `consumer_id`.
    pub fn link(&mut self, consumer_id: NodeId, slot: usize, producer: &ProcessNode) -> QueueResult<()> {
        if self.expanded.contains(&producer.id()) {
            return Err(QueueError::GraphCycle {
                node_id: producer.id(),
            });
        }

        let consumer_idx = self
            .node_index
            .get(&consumer_id)
            .copied()
            .ok_or(QueueError::NodeNotFound {
                node_id: consumer_id,
            })?;
        let producer_idx = self.discover(producer);
        QueueNode::add_parent(&mut self.q_nodes, producer_idx, consumer_idx, slot);

        Ok(())
    }
}

impl ProcessNode {
    /// Registers the producers bound to this node's inputs with `builder`.
    pub fn build_queue(&self, builder: &mut QueueBuilder, graph: &Graph) -> QueueResult<()> {
        for (input_idx, producer) in self.producers() {
            let producer_node = graph.node(producer.node_id).ok_or(QueueError::NodeNotFound {
                node_id: producer.node_id,
            })?;
            builder.link(self.id(), input_idx, producer_node)?;
        }

        Ok(())
    }
}
