// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Execution driver
//!
//! One [`ExecutionRun`] per execution. Its mutable state (scheduler table and
//! pending input fragments) sits behind a single async mutex; completions
//! arrive on a channel and are applied one at a time by the driver task, so
//! two nodes finishing together never race on readiness.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::engine::dispatcher::{DispatchRequest, Dispatcher, TaskCompletion};
use crate::engine::propagator::MetadataPropagator;
use crate::engine::scheduler::{Completion, NodeStatus, Scheduler, SkipCause};
use crate::engine::tracker::{Execution, ExecutionId, LogSink, RunTracker, TaskId, TaskStatus};
use crate::executors::{TaskContext, TaskInput};
use crate::pipeline::PipelineGraph;

/// Trigger payloads keyed by node id
pub type TriggerInputs = HashMap<String, serde_json::Value>;

struct RunState {
    scheduler: Scheduler,
    propagator: MetadataPropagator,
    tasks: HashMap<String, (TaskId, LogSink)>,
}

pub(crate) struct ExecutionRun {
    id: ExecutionId,
    graph: Arc<PipelineGraph>,
    state: Mutex<RunState>,
    tracker: Arc<RunTracker>,
    dispatcher: Arc<Dispatcher>,
    triggers: TriggerInputs,
    cancel: CancellationToken,
    report: mpsc::UnboundedSender<TaskCompletion>,
    done: watch::Sender<bool>,
}

impl ExecutionRun {
    /// Register the execution and spawn its driver
    pub(crate) async fn start(
        graph: Arc<PipelineGraph>,
        triggers: TriggerInputs,
        max_in_flight: usize,
        tracker: Arc<RunTracker>,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        let execution = Execution::new(&graph);
        let id = execution.id;
        let scheduler = Scheduler::new(Arc::clone(&graph), max_in_flight);
        tracker.register(execution, scheduler.statuses()).await;

        let (report, completions) = mpsc::unbounded_channel();
        let (done, _) = watch::channel(false);

        let run = Arc::new(Self {
            id,
            state: Mutex::new(RunState {
                scheduler,
                propagator: MetadataPropagator::new(Arc::clone(&graph)),
                tasks: HashMap::new(),
            }),
            graph,
            tracker,
            dispatcher,
            triggers,
            cancel: CancellationToken::new(),
            report,
            done,
        });

        let span = tracing::info_span!("execution", id = %id, pipeline = %run.graph.name());
        tokio::spawn(Arc::clone(&run).drive(completions).instrument(span));
        run
    }

    pub(crate) fn id(&self) -> ExecutionId {
        self.id
    }

    async fn drive(self: Arc<Self>, mut completions: mpsc::UnboundedReceiver<TaskCompletion>) {
        tracing::info!(nodes = self.graph.len(), "execution started");
        self.tracker.mark_started(self.id).await;

        loop {
            {
                let mut state = self.state.lock().await;
                self.dispatch_ready(&mut state).await;
                if let Some(status) = state.scheduler.outcome() {
                    tracing::info!(status = %status, "execution finished");
                    break;
                }
            }

            tokio::select! {
                Some(completion) = completions.recv() => self.apply(completion).await,
                _ = self.cancel.cancelled() => {}
            }
        }

        self.done.send_replace(true);
    }

    async fn dispatch_ready(&self, state: &mut RunState) {
        for node_id in state.scheduler.drain_dispatchable() {
            let Some(node) = self.graph.node(&node_id) else {
                continue;
            };
            let task_id = Uuid::new_v4();
            let inputs = state.propagator.take_inputs(&node_id);

            self.tracker.set_node(self.id, &node_id, NodeStatus::Dispatched, None).await;
            let log = self.tracker.create_task(self.id, &node_id, task_id).await;
            state.tasks.insert(node_id.clone(), (task_id, log.clone()));

            tracing::info!(node = %node_id, task = %task_id, block = %node.spec.id, "dispatching");
            let request = DispatchRequest {
                graph: Arc::clone(&self.graph),
                input: TaskInput {
                    execution_id: self.id,
                    task_id,
                    node_id: node_id.clone(),
                    block: node.spec.id.clone(),
                    config: node.config.clone(),
                    inputs,
                    trigger: self.triggers.get(&node_id).cloned(),
                },
                context: TaskContext {
                    cancel: self.cancel.child_token(),
                    log,
                },
            };
            self.dispatcher.dispatch(request, self.report.clone());
        }
    }

    async fn apply(&self, completion: TaskCompletion) {
        let mut state = self.state.lock().await;
        let TaskCompletion {
            node_id,
            task_id,
            status,
            output,
        } = completion;

        match state.scheduler.complete(&node_id, status == TaskStatus::Success) {
            Completion::Ignored => {
                tracing::debug!(node = %node_id, "ignoring completion for node not in flight");
            }
            Completion::Succeeded { ready } => {
                if let Err(violation) = state.propagator.propagate(&node_id, output.clone()) {
                    tracing::error!(node = %node_id, "{}", violation);
                }
                self.tracker.finish_task(self.id, task_id, TaskStatus::Success, output).await;
                self.tracker.set_node(self.id, &node_id, NodeStatus::Succeeded, None).await;
                for node in &ready {
                    self.tracker.set_node(self.id, node, NodeStatus::Ready, None).await;
                }
                tracing::info!(node = %node_id, ready = ?ready, "node succeeded");
            }
            Completion::Failed { skipped } => {
                self.tracker.finish_task(self.id, task_id, TaskStatus::Failed, None).await;
                self.tracker.set_node(self.id, &node_id, NodeStatus::Failed, None).await;
                for node in &skipped {
                    let cause = SkipCause::UpstreamFailed { node: node_id.clone() };
                    self.tracker.set_node(self.id, node, NodeStatus::Skipped, Some(cause)).await;
                }
                tracing::warn!(node = %node_id, skipped = ?skipped, "node failed");
            }
        }
    }

    /// Abort the execution. Returns false if it had already finished.
    pub(crate) async fn cancel(&self, reason: &str) -> bool {
        let mut state = self.state.lock().await;
        let cancellation = state.scheduler.cancel(reason);
        if cancellation.skipped.is_empty() {
            return false;
        }

        for node in &cancellation.interrupted {
            if let Some((task_id, log)) = state.tasks.get(node) {
                log.line(format!("cancelled: {}", reason));
                self.tracker.finish_task(self.id, *task_id, TaskStatus::Failed, None).await;
            }
        }
        for node in &cancellation.skipped {
            let cause = SkipCause::Cancelled {
                reason: reason.to_string(),
            };
            self.tracker.set_node(self.id, node, NodeStatus::Skipped, Some(cause)).await;
        }

        tracing::warn!(
            execution = %self.id,
            interrupted = ?cancellation.interrupted,
            reason,
            "execution cancelled"
        );
        self.cancel.cancel();
        true
    }

    /// Resolve once the driver has stopped
    pub(crate) async fn finished(&self) {
        let mut done = self.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
    }
}
