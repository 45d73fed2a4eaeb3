use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::config::RenderConfig;
use crate::context::{RenderContext, RenderGeneration};
use crate::graph::{Graph, NodeId};
use crate::node_kind::TextFragment;
use crate::plan::{ProcessEvent, QueuePlan};
use crate::queue::{ParallelQueue, Queue, QueueResult};
use crate::queue_builder::QueueBuilder;
use common::Shared;

#[derive(Clone, Debug, Serialize)]
pub struct RenderReport {
    pub generation: RenderGeneration,
    pub output: Option<TextFragment>,
    pub executed_nodes: usize,
    pub queued_nodes: usize,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub journal: Vec<ProcessEvent>,
}

/// Builds and runs plans against a shared graph.
///
/// The graph read lock is held only while a plan is built; processing
/// works on the plan's own copy of each node.
#[derive(Debug)]
pub struct Renderer {
    context: RenderContext,
    config: RenderConfig,
    parallel: Option<ParallelQueue>,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> QueueResult<Self> {
        let parallel = match config.workers {
            0 => None,
            workers => Some(ParallelQueue::new(workers)?),
        };

        Ok(Self {
            context: RenderContext::new(),
            config,
            parallel,
        })
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn build(&self, graph: &Shared<Graph>, target: NodeId) -> QueueResult<QueuePlan> {
        let mut plan = {
            let graph = graph.read();
            QueueBuilder::new(&self.context).build(&graph, target)?
        };
        if self.config.record_journal {
            plan.enable_journal();
        }

        Ok(plan)
    }

    pub fn execute(&self, plan: &QueuePlan) -> QueueResult<RenderReport> {
        let start = Instant::now();

        match self.parallel.as_ref() {
            Some(parallel) => parallel.process(plan)?,
            None => Queue::new().process(plan)?,
        }

        let report = RenderReport {
            generation: plan.generation(),
            output: plan.output(),
            executed_nodes: plan.executed_nodes(),
            queued_nodes: plan.len(),
            elapsed_secs: start.elapsed().as_secs_f64(),
            journal: plan.journal(),
        };
        info!(
            generation = report.generation,
            executed = report.executed_nodes,
            queued = report.queued_nodes,
            elapsed_secs = report.elapsed_secs,
            "render finished"
        );

        Ok(report)
    }

    pub fn render(&self, graph: &Shared<Graph>, target: NodeId) -> QueueResult<RenderReport> {
        let plan = self.build(graph, target)?;
        self.execute(&plan)
    }
}
