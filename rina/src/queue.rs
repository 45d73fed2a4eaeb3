use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::graph::NodeId;
use crate::plan::QueuePlan;
use crate::queue_node::{Phase, WorkItem};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Node {node_id} not found while building the queue")]
    NodeNotFound { node_id: NodeId },
    #[error("Cycle detected while building the queue at node {node_id}")]
    GraphCycle { node_id: NodeId },
    #[error("{phase} failed for node {name} ({node_id}): {message}")]
    Process {
        node_id: NodeId,
        name: String,
        phase: Phase,
        message: String,
    },
    #[error("Failed to start queue workers: {message}")]
    WorkerPool { message: String },
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Single threaded FIFO of ready work items.
#[derive(Debug, Default)]
pub struct Queue {
    items: VecDeque<WorkItem>,
}

/// Processes ready items concurrently on a dedicated rayon pool.
#[derive(Debug)]
pub struct ParallelQueue {
    pool: rayon::ThreadPool,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, item: WorkItem) {
        self.items.push_back(item);
    }

    /// Drains the plan from its root. Stops at the first failing hook and
    /// drops whatever was still queued, so the queue can be reused for the
    /// next plan.
    pub fn process(&mut self, plan: &QueuePlan) -> QueueResult<()> {
        debug!(generation = plan.generation(), nodes = plan.len(), "queue drain started");
        self.push(WorkItem::new(plan.root(), Phase::Begin));

        while let Some(item) = self.items.pop_front() {
            let q_node = plan.q_node(item.q_node_idx);
            let result = q_node.process(plan, item.phase, &mut |ready| {
                self.items.push_back(ready)
            });

            if let Err(err) = result {
                debug!(dropped = self.items.len(), "queue stopped");
                self.items.clear();
                return Err(err);
            }
        }

        Ok(())
    }
}

impl ParallelQueue {
    pub fn new(workers: usize) -> QueueResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("rina-queue-{idx}"))
            .build()
            .map_err(|err| QueueError::WorkerPool {
                message: err.to_string(),
            })?;

        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Same ordering as [`Queue::process`]. After a failure no further
    /// items start; items already running finish.
    pub fn process(&self, plan: &QueuePlan) -> QueueResult<()> {
        let failure: Mutex<Option<QueueError>> = Mutex::new(None);
        let stop = AtomicBool::new(false);
        let root = WorkItem::new(plan.root(), Phase::Begin);
        debug!(
            generation = plan.generation(),
            nodes = plan.len(),
            workers = self.workers(),
            "parallel queue drain started"
        );

        self.pool
            .scope(|scope| spawn_item(scope, plan, root, &failure, &stop));

        match failure.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn spawn_item<'scope>(
    scope: &rayon::Scope<'scope>,
    plan: &'scope QueuePlan,
    item: WorkItem,
    failure: &'scope Mutex<Option<QueueError>>,
    stop: &'scope AtomicBool,
) {
    scope.spawn(move |scope| {
        if stop.load(Ordering::Acquire) {
            return;
        }

        let mut ready: Vec<WorkItem> = Vec::new();
        let result = plan
            .q_node(item.q_node_idx)
            .process(plan, item.phase, &mut |next| ready.push(next));

        match result {
            Ok(()) => {
                for next in ready {
                    spawn_item(scope, plan, next, failure, stop);
                }
            }
            Err(err) => {
                stop.store(true, Ordering::Release);
                failure.lock().get_or_insert(err);
            }
        }
    });
}
