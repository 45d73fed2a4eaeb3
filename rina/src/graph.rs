use std::path::Path;

use anyhow::Context;
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::node_kind::{negotiate, NodeKind, PinType};
use common::id_type;
use common::key_index_vec::{KeyIndexKey, KeyIndexVec};
use common::{is_debug, FileFormat};

id_type!(NodeId);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node {node_id} not found")]
    NodeNotFound { node_id: NodeId },
    #[error("Node has nil id")]
    NilNodeId,
    #[error("Input pin {input_idx} out of range for node {node_id}")]
    InputOutOfRange { node_id: NodeId, input_idx: usize },
    #[error("Output pin {output_idx} out of range for node {node_id}")]
    OutputOutOfRange { node_id: NodeId, output_idx: usize },
    #[error("Node {node_id} has a fixed set of input pins")]
    FixedInputs { node_id: NodeId },
    #[error("Node {node_id} kind cannot change from {from} to {to}")]
    KindMismatch {
        node_id: NodeId,
        from: String,
        to: String,
    },
    #[error("Input pin {input_idx} of node {node_id} is bound to a missing node")]
    DanglingBinding { node_id: NodeId, input_idx: usize },
    #[error("Connecting {producer} to {consumer} would create a cycle")]
    CycleDetected { producer: NodeId, consumer: NodeId },
    #[error("Output of {producer} offers no type the input of {consumer} accepts")]
    TypeMismatch { producer: NodeId, consumer: NodeId },
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputAddress {
    pub node_id: NodeId,
    pub output_idx: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputAddress {
    pub node_id: NodeId,
    pub input_idx: usize,
}

#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<OutputAddress>,
    // negotiated on connect and on load
    #[serde(skip)]
    agreed_type: Option<PinType>,
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct OutputPin {
    consumers: Vec<InputAddress>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessNode {
    id: NodeId,
    pub name: String,
    kind: NodeKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    inputs: Vec<InputPin>,
    // derived from kind and the consumers' bindings
    #[serde(skip)]
    outputs: Vec<OutputPin>,

    #[serde(skip)]
    longest_distance: Option<usize>,
}

/// The processing network. Owns every [`ProcessNode`] and the pin links
/// between them. Pin links always form a DAG: [`Graph::connect`] rejects
/// edges that would close a cycle and loading validates the same.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct Graph {
    nodes: KeyIndexVec<NodeId, ProcessNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Visited,
}

#[derive(Debug)]
enum Visit {
    Enter {
        node_idx: usize,
        consumer: Option<NodeId>,
    },
    Exit {
        node_idx: usize,
    },
}

impl InputAddress {
    pub fn new(node_id: NodeId, input_idx: usize) -> Self {
        Self { node_id, input_idx }
    }
}

impl OutputAddress {
    pub fn new(node_id: NodeId, output_idx: usize) -> Self {
        Self {
            node_id,
            output_idx,
        }
    }
}

impl InputPin {
    /// Type both ends settled on. `None` while unbound.
    pub fn agreed_type(&self) -> Option<PinType> {
        self.agreed_type
    }
}

impl OutputPin {
    pub fn consumers(&self) -> &[InputAddress] {
        &self.consumers
    }
}

impl KeyIndexKey<NodeId> for ProcessNode {
    fn key(&self) -> &NodeId {
        &self.id
    }
}

impl ProcessNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self::with_id(NodeId::unique(), name, kind)
    }

    pub fn with_id(id: NodeId, name: impl Into<String>, kind: NodeKind) -> Self {
        let outputs = vec![OutputPin::default(); kind.output_count()];
        let inputs = vec![InputPin::default(); kind.fixed_input_count().unwrap_or(0)];
        Self {
            id,
            name: name.into(),
            kind,
            inputs,
            outputs,
            longest_distance: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
    pub fn inputs(&self) -> &[InputPin] {
        &self.inputs
    }
    pub fn outputs(&self) -> &[OutputPin] {
        &self.outputs
    }

    /// Edges on the longest downstream path to a terminal node, counting the
    /// node itself: a node without consumers has distance 1.
    /// `None` until the owning graph computed it.
    pub fn longest_distance(&self) -> Option<usize> {
        self.longest_distance
    }

    /// Bound input pins with the output they read from, in pin order.
    pub fn producers(&self) -> impl Iterator<Item = (usize, OutputAddress)> + '_ {
        self.inputs
            .iter()
            .enumerate()
            .filter_map(|(input_idx, input)| input.binding.map(|binding| (input_idx, binding)))
    }

    fn consumers(&self) -> impl Iterator<Item = &InputAddress> + '_ {
        self.outputs
            .iter()
            .flat_map(|output| output.consumers.iter())
    }
}

impl Graph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ProcessNode> + '_ {
        self.nodes.iter()
    }

    pub fn node(&self, node_id: NodeId) -> Option<&ProcessNode> {
        self.nodes.by_key(&node_id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&ProcessNode> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn add_node(&mut self, node: ProcessNode) -> NodeId {
        assert!(!node.id.is_nil());
        assert!(
            !self.nodes.contains_key(&node.id),
            "Duplicate node id {}",
            node.id
        );
        assert!(node.inputs.iter().all(|input| input.binding.is_none()));

        let node_id = node.id;
        self.nodes.insert(node);
        self.calc_longest_distance(node_id);

        node_id
    }

    /// Removes the node after unlinking every pin that touches it.
    pub fn remove_node(&mut self, node_id: NodeId) -> GraphResult<ProcessNode> {
        let node = self.node(node_id).ok_or(GraphError::NodeNotFound { node_id })?;
        let input_count = node.inputs.len();
        let consumers: Vec<InputAddress> = node.consumers().copied().collect();

        for input_idx in 0..input_count {
            self.disconnect(InputAddress::new(node_id, input_idx))?;
        }
        for consumer in consumers {
            self.disconnect(consumer)?;
        }

        let removed = self
            .nodes
            .remove_by_key(&node_id)
            .ok_or(GraphError::NodeNotFound { node_id })?;
        debug!(node = %removed.name, %node_id, "node removed");

        Ok(removed)
    }

    /// Swaps the node's parameters. The variant must stay the same so the
    /// pin layout is preserved.
    pub fn replace_kind(&mut self, node_id: NodeId, kind: NodeKind) -> GraphResult<()> {
        let node = self
            .nodes
            .by_key_mut(&node_id)
            .ok_or(GraphError::NodeNotFound { node_id })?;
        if std::mem::discriminant(&node.kind) != std::mem::discriminant(&kind) {
            return Err(GraphError::KindMismatch {
                node_id,
                from: node.kind.as_ref().to_string(),
                to: kind.as_ref().to_string(),
            });
        }
        node.kind = kind;

        Ok(())
    }

    pub fn insert_input_pin(&mut self, node_id: NodeId, input_idx: usize) -> GraphResult<()> {
        let node = self
            .nodes
            .by_key_mut(&node_id)
            .ok_or(GraphError::NodeNotFound { node_id })?;
        if !node.kind.accepts_inputs() {
            return Err(GraphError::FixedInputs { node_id });
        }
        if input_idx > node.inputs.len() {
            return Err(GraphError::InputOutOfRange { node_id, input_idx });
        }

        node.inputs.insert(input_idx, InputPin::default());
        self.relink_consumers(node_id);

        Ok(())
    }

    pub fn remove_input_pin(&mut self, node_id: NodeId, input_idx: usize) -> GraphResult<()> {
        let node = self.node(node_id).ok_or(GraphError::NodeNotFound { node_id })?;
        if !node.kind.accepts_inputs() {
            return Err(GraphError::FixedInputs { node_id });
        }

        self.disconnect(InputAddress::new(node_id, input_idx))?;
        let node = self
            .nodes
            .by_key_mut(&node_id)
            .ok_or(GraphError::NodeNotFound { node_id })?;
        node.inputs.remove(input_idx);
        self.relink_consumers(node_id);

        Ok(())
    }

    /// Binds `consumer` to read from `producer`, replacing any previous
    /// binding of that input pin. Both pins must agree on a [`PinType`].
    pub fn connect(&mut self, producer: OutputAddress, consumer: InputAddress) -> GraphResult<()> {
        self.check_output(producer)?;
        self.check_input(consumer)?;

        if producer.node_id == consumer.node_id || self.depends_on(producer.node_id, consumer.node_id)
        {
            return Err(GraphError::CycleDetected {
                producer: producer.node_id,
                consumer: consumer.node_id,
            });
        }
        let agreed_type = self.negotiate(producer.node_id, consumer.node_id)?;

        self.disconnect(consumer)?;
        self.link(producer, consumer, agreed_type)?;
        self.calc_longest_distance(producer.node_id);

        debug!(
            producer = %producer.node_id,
            output_idx = producer.output_idx,
            consumer = %consumer.node_id,
            input_idx = consumer.input_idx,
            %agreed_type,
            "pins connected"
        );

        Ok(())
    }

    /// Clears the binding of `consumer`. Returns the output it was bound to.
    pub fn disconnect(&mut self, consumer: InputAddress) -> GraphResult<Option<OutputAddress>> {
        self.check_input(consumer)?;

        let node = self
            .nodes
            .by_key_mut(&consumer.node_id)
            .ok_or(GraphError::NodeNotFound {
                node_id: consumer.node_id,
            })?;
        let input = &mut node.inputs[consumer.input_idx];
        input.agreed_type = None;
        let Some(producer) = input.binding.take() else {
            return Ok(None);
        };

        if let Some(producer_node) = self.nodes.by_key_mut(&producer.node_id) {
            producer_node.outputs[producer.output_idx]
                .consumers
                .retain(|address| *address != consumer);
        }
        self.calc_longest_distance(producer.node_id);

        Ok(Some(producer))
    }

    fn negotiate(&self, producer_id: NodeId, consumer_id: NodeId) -> GraphResult<PinType> {
        let producer = self.node(producer_id).ok_or(GraphError::NodeNotFound {
            node_id: producer_id,
        })?;
        let consumer = self.node(consumer_id).ok_or(GraphError::NodeNotFound {
            node_id: consumer_id,
        })?;

        negotiate(producer.kind.output_types(), consumer.kind.input_types()).ok_or(
            GraphError::TypeMismatch {
                producer: producer_id,
                consumer: consumer_id,
            },
        )
    }

    // Unchecked beyond pin ranges.
    fn link(
        &mut self,
        producer: OutputAddress,
        consumer: InputAddress,
        agreed_type: PinType,
    ) -> GraphResult<()> {
        self.check_output(producer)?;
        self.check_input(consumer)?;

        let consumer_node = self
            .nodes
            .by_key_mut(&consumer.node_id)
            .ok_or(GraphError::NodeNotFound {
                node_id: consumer.node_id,
            })?;
        consumer_node.inputs[consumer.input_idx] = InputPin {
            binding: Some(producer),
            agreed_type: Some(agreed_type),
        };

        let producer_node = self
            .nodes
            .by_key_mut(&producer.node_id)
            .ok_or(GraphError::NodeNotFound {
                node_id: producer.node_id,
            })?;
        producer_node.outputs[producer.output_idx]
            .consumers
            .push(consumer);

        Ok(())
    }

    /// Links two pins without the cycle check, to build broken graphs.
    #[cfg(test)]
    pub(crate) fn bind(&mut self, producer: OutputAddress, consumer: InputAddress) -> GraphResult<()> {
        let agreed_type = self.negotiate(producer.node_id, consumer.node_id)?;
        self.link(producer, consumer, agreed_type)
    }

    /// True if `node_id` reads, directly or through other nodes, from
    /// `ancestor_id`.
    pub fn depends_on(&self, node_id: NodeId, ancestor_id: NodeId) -> bool {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = vec![node_id];

        while let Some(node_id) = stack.pop() {
            if !seen.insert(node_id) {
                continue;
            }
            let Some(node) = self.node(node_id) else {
                continue;
            };
            for (_, producer) in node.producers() {
                if producer.node_id == ancestor_id {
                    return true;
                }
                stack.push(producer.node_id);
            }
        }

        false
    }

    /// Recomputes the longest distance of `node_id` and of every node it
    /// reads from. Needs exclusive access to the graph.
    pub fn calc_longest_distance(&mut self, node_id: NodeId) {
        let affected = self.collect_ancestors(node_id);
        self.recalc_distances(&affected);
    }

    fn collect_ancestors(&self, node_id: NodeId) -> HashSet<NodeId> {
        let mut ancestors: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = vec![node_id];

        while let Some(node_id) = stack.pop() {
            let Some(node) = self.node(node_id) else {
                continue;
            };
            if !ancestors.insert(node_id) {
                continue;
            }
            stack.extend(node.producers().map(|(_, producer)| producer.node_id));
        }

        ancestors
    }

    // Each affected node is recomputed once, after every affected consumer
    // of it. Unaffected consumers already hold current values.
    fn recalc_distances(&mut self, affected: &HashSet<NodeId>) {
        let mut pending_consumers: HashMap<NodeId, usize> =
            affected.iter().map(|&node_id| (node_id, 0)).collect();
        for &node_id in affected {
            let Some(node) = self.node(node_id) else {
                continue;
            };
            for (_, producer) in node.producers() {
                if let Some(count) = pending_consumers.get_mut(&producer.node_id) {
                    *count += 1;
                }
            }
        }

        let mut ready: Vec<NodeId> = pending_consumers
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node_id, _)| *node_id)
            .collect();

        while let Some(node_id) = ready.pop() {
            let Some(node_idx) = self.nodes.index_of_key(&node_id) else {
                continue;
            };

            let longest = self.nodes[node_idx]
                .consumers()
                .filter_map(|consumer| {
                    self.node(consumer.node_id)
                        .and_then(|consumer_node| consumer_node.longest_distance)
                })
                .max();

            let node = &mut self.nodes[node_idx];
            node.longest_distance = Some(longest.map_or(1, |distance| distance + 1));
            trace!(node = %node.name, distance = ?node.longest_distance, "longest distance updated");

            for (_, producer) in node.producers() {
                if let Some(count) = pending_consumers.get_mut(&producer.node_id) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(producer.node_id);
                    }
                }
            }
        }
    }

    // Output pins and consumer lists of the nodes `node_id` reads from are
    // rebuilt from its current input bindings.
    fn relink_consumers(&mut self, node_id: NodeId) {
        let Some(node) = self.node(node_id) else {
            return;
        };
        let bindings: Vec<(usize, OutputAddress)> = node.producers().collect();

        for (_, producer) in bindings.iter() {
            if let Some(producer_node) = self.nodes.by_key_mut(&producer.node_id) {
                for output in producer_node.outputs.iter_mut() {
                    output
                        .consumers
                        .retain(|consumer| consumer.node_id != node_id);
                }
            }
        }
        for (input_idx, producer) in bindings {
            if let Some(producer_node) = self.nodes.by_key_mut(&producer.node_id) {
                producer_node.outputs[producer.output_idx]
                    .consumers
                    .push(InputAddress::new(node_id, input_idx));
            }
        }
    }

    fn check_input(&self, address: InputAddress) -> GraphResult<()> {
        let node = self.node(address.node_id).ok_or(GraphError::NodeNotFound {
            node_id: address.node_id,
        })?;
        if address.input_idx >= node.inputs.len() {
            return Err(GraphError::InputOutOfRange {
                node_id: address.node_id,
                input_idx: address.input_idx,
            });
        }

        Ok(())
    }

    fn check_output(&self, address: OutputAddress) -> GraphResult<()> {
        let node = self.node(address.node_id).ok_or(GraphError::NodeNotFound {
            node_id: address.node_id,
        })?;
        if address.output_idx >= node.outputs.len() {
            return Err(GraphError::OutputOutOfRange {
                node_id: address.node_id,
                output_idx: address.output_idx,
            });
        }

        Ok(())
    }

    pub fn validate(&self) -> GraphResult<()> {
        for node in self.nodes.iter() {
            if node.id.is_nil() {
                return Err(GraphError::NilNodeId);
            }
            if let Some(count) = node.kind.fixed_input_count() {
                if node.inputs.len() != count {
                    return Err(GraphError::FixedInputs { node_id: node.id });
                }
            }
            assert_eq!(node.outputs.len(), node.kind.output_count());

            for (input_idx, producer) in node.producers() {
                let producer_node =
                    self.node(producer.node_id)
                        .ok_or(GraphError::DanglingBinding {
                            node_id: node.id,
                            input_idx,
                        })?;
                if producer.output_idx >= producer_node.outputs.len() {
                    return Err(GraphError::OutputOutOfRange {
                        node_id: producer.node_id,
                        output_idx: producer.output_idx,
                    });
                }
                let agreed_type = self.negotiate(producer.node_id, node.id)?;
                if node.inputs[input_idx].agreed_type != Some(agreed_type) {
                    return Err(GraphError::TypeMismatch {
                        producer: producer.node_id,
                        consumer: node.id,
                    });
                }
                if is_debug() {
                    assert!(producer_node.outputs[producer.output_idx]
                        .consumers
                        .contains(&InputAddress::new(node.id, input_idx)));
                }
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> GraphResult<()> {
        let mut state: Vec<Option<VisitState>> = vec![None; self.nodes.len()];
        let mut stack: Vec<Visit> = Vec::new();

        for start_idx in 0..self.nodes.len() {
            if state[start_idx].is_some() {
                continue;
            }
            stack.push(Visit::Enter {
                node_idx: start_idx,
                consumer: None,
            });

            while let Some(visit) = stack.pop() {
                let (node_idx, consumer) = match visit {
                    Visit::Exit { node_idx } => {
                        state[node_idx] = Some(VisitState::Visited);
                        continue;
                    }
                    Visit::Enter { node_idx, consumer } => (node_idx, consumer),
                };

                let node = &self.nodes[node_idx];
                match state[node_idx] {
                    Some(VisitState::Visited) => continue,
                    Some(VisitState::Visiting) => {
                        return Err(GraphError::CycleDetected {
                            producer: node.id,
                            consumer: consumer.unwrap_or(node.id),
                        });
                    }
                    None => {}
                }

                state[node_idx] = Some(VisitState::Visiting);
                stack.push(Visit::Exit { node_idx });
                for (_, producer) in node.producers() {
                    if let Some(producer_idx) = self.nodes.index_of_key(&producer.node_id) {
                        stack.push(Visit::Enter {
                            node_idx: producer_idx,
                            consumer: Some(node.id),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    // Rebuilds what serialization leaves out: output pins, consumer lists,
    // agreed pin types and distances.
    fn restore_derived(&mut self) -> GraphResult<()> {
        for node in self.nodes.iter_mut() {
            node.outputs = vec![OutputPin::default(); node.kind.output_count()];
            node.longest_distance = None;
        }

        let node_ids: Vec<NodeId> = self.nodes.keys().collect();
        for &node_id in node_ids.iter() {
            let bindings: Vec<(usize, OutputAddress)> = self
                .node(node_id)
                .map(|node| node.producers().collect())
                .unwrap_or_default();
            for (input_idx, producer) in bindings {
                let producer_node = self.nodes.by_key_mut(&producer.node_id).ok_or(
                    GraphError::DanglingBinding { node_id, input_idx },
                )?;
                let output = producer_node.outputs.get_mut(producer.output_idx).ok_or(
                    GraphError::OutputOutOfRange {
                        node_id: producer.node_id,
                        output_idx: producer.output_idx,
                    },
                )?;
                output.consumers.push(InputAddress::new(node_id, input_idx));

                let agreed_type = self.negotiate(producer.node_id, node_id)?;
                if let Some(node) = self.nodes.by_key_mut(&node_id) {
                    node.inputs[input_idx].agreed_type = Some(agreed_type);
                }
            }
        }

        self.validate()?;

        let all: HashSet<NodeId> = node_ids.into_iter().collect();
        self.recalc_distances(&all);

        Ok(())
    }

    pub fn serialize(&self, format: FileFormat) -> anyhow::Result<String> {
        Ok(common::serialize(self, format)?)
    }
    pub fn deserialize(serialized: &str, format: FileFormat) -> anyhow::Result<Graph> {
        let mut graph: Graph = common::deserialize(serialized, format)?;
        graph.restore_derived()?;

        Ok(graph)
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        self.serialize(FileFormat::Yaml)
    }
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Graph> {
        Self::deserialize(yaml, FileFormat::Yaml)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Graph> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let serialized = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read graph file {}", path.display()))?;

        Self::deserialize(&serialized, format)
            .with_context(|| format!("Failed to load graph from {}", path.display()))
    }
}

/// Two text providers composited by a draw device:
/// `provider1 -> device[0]`, `provider2 -> device[1]`.
#[cfg(test)]
pub(crate) fn test_graph() -> Graph {
    let mut graph = Graph::default();
    let provider1 = graph.add_node(ProcessNode::new(
        "provider1",
        NodeKind::TextProvider {
            caption: "aaaaaa".to_string(),
            position: 1,
        },
    ));
    let provider2 = graph.add_node(ProcessNode::new(
        "provider2",
        NodeKind::TextProvider {
            caption: "bbbbbbbb".to_string(),
            position: 10,
        },
    ));
    let device = graph.add_node(ProcessNode::new(
        "device",
        NodeKind::DrawDevice { canvas_size: 20 },
    ));

    graph.insert_input_pin(device, 0).unwrap();
    graph.insert_input_pin(device, 1).unwrap();
    graph
        .connect(OutputAddress::new(provider1, 0), InputAddress::new(device, 0))
        .unwrap();
    graph
        .connect(OutputAddress::new(provider2, 0), InputAddress::new(device, 1))
        .unwrap();

    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(name: &str) -> ProcessNode {
        ProcessNode::new(
            name,
            NodeKind::TextMixer {
                position: 0,
                canvas_size: 8,
            },
        )
    }

    fn link(graph: &mut Graph, producer: NodeId, consumer: NodeId) -> GraphResult<()> {
        let input_idx = graph.node(consumer).unwrap().inputs().len();
        graph.insert_input_pin(consumer, input_idx)?;
        graph.connect(
            OutputAddress::new(producer, 0),
            InputAddress::new(consumer, input_idx),
        )
    }

    fn distance(graph: &Graph, node_id: NodeId) -> usize {
        graph.node(node_id).unwrap().longest_distance().unwrap()
    }

    #[test]
    fn chain_longest_distance() -> anyhow::Result<()> {
        let mut graph = Graph::default();
        let a = graph.add_node(mixer("a"));
        let b = graph.add_node(mixer("b"));
        let c = graph.add_node(mixer("c"));
        assert_eq!(distance(&graph, a), 1);

        // a -> b -> c, c is terminal
        link(&mut graph, a, b)?;
        link(&mut graph, b, c)?;

        assert_eq!(distance(&graph, c), 1);
        assert_eq!(distance(&graph, b), 2);
        assert_eq!(distance(&graph, a), 3);

        // recomputing is idempotent
        graph.calc_longest_distance(c);
        graph.calc_longest_distance(a);
        assert_eq!(distance(&graph, a), 3);

        Ok(())
    }

    #[test]
    fn longest_path_wins_over_shorter_one() -> anyhow::Result<()> {
        let mut graph = Graph::default();
        let sink = graph.add_node(mixer("sink"));
        let mid = graph.add_node(mixer("mid"));
        let shared = graph.add_node(mixer("shared"));

        link(&mut graph, shared, sink)?;
        assert_eq!(distance(&graph, shared), 2);

        link(&mut graph, mid, sink)?;
        link(&mut graph, shared, mid)?;
        assert_eq!(distance(&graph, mid), 2);
        assert_eq!(distance(&graph, shared), 3);

        // dropping the long path shortens the shared producer again
        graph.disconnect(InputAddress::new(mid, 0))?;
        assert_eq!(distance(&graph, shared), 2);

        Ok(())
    }

    #[test]
    fn connect_rejects_cycles() -> anyhow::Result<()> {
        let mut graph = Graph::default();
        let a = graph.add_node(mixer("a"));
        let b = graph.add_node(mixer("b"));
        link(&mut graph, a, b)?;

        assert_eq!(
            link(&mut graph, b, a),
            Err(GraphError::CycleDetected {
                producer: b,
                consumer: a
            })
        );
        assert_eq!(
            graph.connect(OutputAddress::new(a, 0), InputAddress::new(a, 0)),
            Err(GraphError::CycleDetected {
                producer: a,
                consumer: a
            })
        );
        assert!(graph.depends_on(b, a));
        assert!(!graph.depends_on(a, b));

        Ok(())
    }

    #[test]
    fn connect_validates_pins() {
        let mut graph = test_graph();
        let provider = graph.node_by_name("provider1").unwrap().id();
        let device = graph.node_by_name("device").unwrap().id();

        assert_eq!(
            graph.connect(OutputAddress::new(provider, 1), InputAddress::new(device, 0)),
            Err(GraphError::OutputOutOfRange {
                node_id: provider,
                output_idx: 1
            })
        );
        assert_eq!(
            graph.connect(OutputAddress::new(provider, 0), InputAddress::new(device, 5)),
            Err(GraphError::InputOutOfRange {
                node_id: device,
                input_idx: 5
            })
        );
        assert_eq!(
            graph.insert_input_pin(provider, 0),
            Err(GraphError::FixedInputs { node_id: provider })
        );
        let missing = NodeId::unique();
        assert_eq!(
            graph.connect(OutputAddress::new(missing, 0), InputAddress::new(device, 0)),
            Err(GraphError::NodeNotFound { node_id: missing })
        );
    }

    #[test]
    fn reconnect_replaces_binding() -> anyhow::Result<()> {
        let mut graph = test_graph();
        let provider1 = graph.node_by_name("provider1").unwrap().id();
        let provider2 = graph.node_by_name("provider2").unwrap().id();
        let device = graph.node_by_name("device").unwrap().id();

        graph.connect(OutputAddress::new(provider2, 0), InputAddress::new(device, 0))?;

        assert!(graph.node(provider1).unwrap().outputs()[0].consumers().is_empty());
        assert_eq!(graph.node(provider2).unwrap().outputs()[0].consumers().len(), 2);
        assert_eq!(distance(&graph, provider1), 1);
        assert_eq!(distance(&graph, provider2), 2);
        graph.validate()?;

        Ok(())
    }

    #[test]
    fn input_pin_insert_and_remove_follow_bindings() -> anyhow::Result<()> {
        let mut graph = test_graph();
        let provider1 = graph.node_by_name("provider1").unwrap().id();
        let provider2 = graph.node_by_name("provider2").unwrap().id();
        let device = graph.node_by_name("device").unwrap().id();

        graph.insert_input_pin(device, 0)?;
        let bindings: Vec<_> = graph.node(device).unwrap().producers().collect();
        assert_eq!(
            bindings,
            vec![
                (1, OutputAddress::new(provider1, 0)),
                (2, OutputAddress::new(provider2, 0))
            ]
        );
        assert_eq!(
            graph.node(provider2).unwrap().outputs()[0].consumers(),
            &[InputAddress::new(device, 2)]
        );
        graph.validate()?;

        graph.remove_input_pin(device, 1)?;
        assert_eq!(graph.node(device).unwrap().inputs().len(), 2);
        assert!(graph.node(provider1).unwrap().outputs()[0].consumers().is_empty());
        assert_eq!(
            graph.node(provider2).unwrap().outputs()[0].consumers(),
            &[InputAddress::new(device, 1)]
        );
        graph.validate()?;

        Ok(())
    }

    #[test]
    fn remove_node_unlinks_pins() -> anyhow::Result<()> {
        let mut graph = test_graph();
        let provider1 = graph.node_by_name("provider1").unwrap().id();
        let device = graph.node_by_name("device").unwrap().id();

        graph.remove_node(device)?;
        assert_eq!(graph.len(), 2);
        assert!(graph.node(provider1).unwrap().outputs()[0].consumers().is_empty());
        assert_eq!(distance(&graph, provider1), 1);

        assert_eq!(
            graph.remove_node(device).unwrap_err(),
            GraphError::NodeNotFound { node_id: device }
        );

        Ok(())
    }

    #[test]
    fn replace_kind_keeps_variant() {
        let mut graph = test_graph();
        let provider1 = graph.node_by_name("provider1").unwrap().id();

        graph
            .replace_kind(
                provider1,
                NodeKind::TextProvider {
                    caption: "zz".to_string(),
                    position: 3,
                },
            )
            .unwrap();
        assert!(matches!(
            graph.replace_kind(provider1, NodeKind::DrawDevice { canvas_size: 4 }),
            Err(GraphError::KindMismatch { .. })
        ));
    }

    #[test]
    fn graph_from_yaml_file() -> anyhow::Result<()> {
        let graph = Graph::from_file("../test_resources/text_draw.yml")?;
        assert_eq!(graph.len(), 3);

        let device = graph.node_by_name("device").unwrap();
        let provider1 = graph.node_by_name("provider1").unwrap();
        assert_eq!(device.id(), NodeId::from_u128(3));
        assert_eq!(
            provider1.id(),
            "00000000-0000-0000-0000-000000000001".parse::<NodeId>()?
        );
        assert_eq!(device.inputs().len(), 2);
        assert_eq!(device.longest_distance(), Some(1));
        assert_eq!(provider1.longest_distance(), Some(2));
        assert_eq!(
            provider1.outputs()[0].consumers(),
            &[InputAddress::new(device.id(), 0)]
        );

        let yaml = graph.to_yaml()?;
        let reloaded = Graph::from_yaml(&yaml)?;
        assert_eq!(reloaded.len(), 3);
        assert_eq!(
            reloaded.node(device.id()).unwrap().kind(),
            &NodeKind::DrawDevice { canvas_size: 20 }
        );

        Ok(())
    }

    #[test]
    fn connect_negotiates_pin_types() -> anyhow::Result<()> {
        let mut graph = Graph::default();
        let narrow = graph.add_node(ProcessNode::new(
            "narrow",
            NodeKind::NarrowTextProvider {
                caption: "ab".to_string(),
                position: 0,
            },
        ));
        let widen = graph.add_node(ProcessNode::new("widen", NodeKind::NarrowToWideConverter));
        let sink = graph.add_node(mixer("sink"));
        assert_eq!(graph.node(widen).unwrap().inputs().len(), 1);

        assert_eq!(
            link(&mut graph, narrow, sink),
            Err(GraphError::TypeMismatch {
                producer: narrow,
                consumer: sink
            })
        );
        assert!(graph.node(sink).unwrap().inputs()[0].binding.is_none());
        assert!(graph.node(narrow).unwrap().outputs()[0].consumers().is_empty());

        graph.connect(OutputAddress::new(narrow, 0), InputAddress::new(widen, 0))?;
        graph.connect(OutputAddress::new(widen, 0), InputAddress::new(sink, 0))?;
        assert_eq!(
            graph.node(widen).unwrap().inputs()[0].agreed_type(),
            Some(PinType::NarrowText)
        );
        assert_eq!(
            graph.node(sink).unwrap().inputs()[0].agreed_type(),
            Some(PinType::WideText)
        );
        assert_eq!(distance(&graph, narrow), 3);

        assert_eq!(
            graph.connect(OutputAddress::new(sink, 0), InputAddress::new(widen, 0)),
            Err(GraphError::CycleDetected {
                producer: sink,
                consumer: widen
            })
        );
        assert_eq!(
            graph.insert_input_pin(widen, 1),
            Err(GraphError::FixedInputs { node_id: widen })
        );

        graph.disconnect(InputAddress::new(widen, 0))?;
        assert_eq!(graph.node(widen).unwrap().inputs()[0].agreed_type(), None);
        graph.validate()?;

        Ok(())
    }

    #[test]
    fn loading_negotiates_pin_types() -> anyhow::Result<()> {
        let graph = Graph::from_file("../test_resources/narrow_text.yml")?;
        let widen = graph.node_by_name("widen").unwrap();
        let device = graph.node_by_name("device").unwrap();

        assert_eq!(widen.inputs()[0].agreed_type(), Some(PinType::NarrowText));
        assert_eq!(device.inputs()[0].agreed_type(), Some(PinType::WideText));
        assert_eq!(graph.node_by_name("narrow").unwrap().longest_distance(), Some(3));

        // a narrow output bound straight into the device
        let device_id = device.id();
        let narrow_id = graph.node_by_name("narrow").unwrap().id();
        let mut broken = graph.clone();
        broken.nodes.by_key_mut(&device_id).unwrap().inputs[0].binding =
            Some(OutputAddress::new(narrow_id, 0));
        let err = Graph::from_yaml(&broken.to_yaml()?).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::TypeMismatch { consumer, .. }) if *consumer == device_id
        ));

        Ok(())
    }

    #[test]
    fn loading_rejects_nil_ids() {
        let yaml = "nodes:\n  - id: 00000000-0000-0000-0000-000000000000\n    name: nil\n    kind:\n      type: DrawDevice\n      canvas_size: 1\n";
        let err = Graph::from_yaml(yaml).unwrap_err();
        assert_eq!(err.downcast_ref::<GraphError>(), Some(&GraphError::NilNodeId));
    }

    #[test]
    fn loading_rejects_cycles_and_dangling_bindings() {
        let cyclic = std::fs::read_to_string("../test_resources/cycle.yml").unwrap();
        let err = Graph::from_yaml(&cyclic).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::CycleDetected { .. })
        ));

        let mut graph = test_graph();
        let provider1 = graph.node_by_name("provider1").unwrap().id();
        graph.nodes.remove_by_key(&provider1);
        let yaml = graph.to_yaml().unwrap();
        let err = Graph::from_yaml(&yaml).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GraphError>(),
            Some(GraphError::DanglingBinding { input_idx: 0, .. })
        ));
    }
}
