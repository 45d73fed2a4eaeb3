
use crate::graph::{Graph, InputAddress, NodeId, OutputAddress, ProcessNode};
use crate::node_kind::NodeKind;
use crate::plan::{ProcessEvent, QueuePlan};
use crate::queue_node::Phase;

pub(crate) fn provider(graph: &mut Graph, name: &str, caption: &str, position: usize) -> NodeId {
    graph.add_node(ProcessNode::new(
        name,
        NodeKind::TextProvider {
            caption: caption.to_string(),
            position,
        },
    ))
}

pub(crate) fn mixer(graph: &mut Graph, name: &str, position: usize, canvas_size: usize) -> NodeId {
    graph.add_node(ProcessNode::new(
        name,
        NodeKind::TextMixer {
            position,
            canvas_size,
        },
    ))
}

/// Appends an input pin to `consumer` and binds it to `producer`.
pub(crate) fn feed(graph: &mut Graph, producer: NodeId, consumer: NodeId) -> anyhow::Result<()> {
    let input_idx = graph
        .node(consumer)
        .map(|node| node.inputs().len())
        .unwrap_or_default();
    graph.insert_input_pin(consumer, input_idx)?;
    graph.connect(
        OutputAddress::new(producer, 0),
        InputAddress::new(consumer, input_idx),
    )?;

    Ok(())
}

pub(crate) fn journal_lines(journal: &[ProcessEvent]) -> Vec<String> {
    journal
        .iter()
        .map(|event| format!("{} {}", event.phase, event.name))
        .collect()
}

/// Every node begins after all of its consumers began and ends after all of
/// its producers ended, each phase exactly once.
pub(crate) fn assert_dependency_order(plan: &QueuePlan, journal: &[ProcessEvent]) {
    assert_eq!(journal.len(), plan.len() * 2);

    let position = |node_id: NodeId, phase: Phase| {
        let mut matches = journal
            .iter()
            .enumerate()
            .filter(|(_, event)| event.node_id == node_id && event.phase == phase);
        let (idx, _) = matches.next().unwrap();
        assert!(matches.next().is_none(), "{phase} recorded twice");
        idx
    };

    for q_node in plan.q_nodes() {
        let begin = position(q_node.node_id(), Phase::Begin);
        let end = position(q_node.node_id(), Phase::End);
        assert!(begin < end);

        for &parent_idx in q_node.parents() {
            let parent = plan.q_node(parent_idx);
            assert!(position(parent.node_id(), Phase::Begin) < begin);
            assert!(end < position(parent.node_id(), Phase::End));
        }
    }
}
