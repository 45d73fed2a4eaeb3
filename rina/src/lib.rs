pub mod config;
pub mod context;
pub mod graph;
pub mod node_kind;
pub mod plan;
pub mod queue;
pub mod queue_builder;
pub mod queue_node;
pub mod render;

pub mod prelude {
    pub use crate::config::RenderConfig;
    pub use crate::context::{RenderContext, RenderGeneration};
    pub use crate::graph::{
        Graph, GraphError, InputAddress, NodeId, OutputAddress, ProcessNode,
    };
    pub use crate::node_kind::{NodeKind, PinType, TextFragment};
    pub use crate::plan::{CancelHandle, PlanSnapshot, ProcessEvent, QueuePlan};
    pub use crate::queue::{ParallelQueue, Queue, QueueError, QueueResult};
    pub use crate::queue_builder::QueueBuilder;
    pub use crate::queue_node::{Phase, QueueNode, WorkItem};
    pub use crate::render::{RenderReport, Renderer};
}

#[cfg(test)]
mod tests;
