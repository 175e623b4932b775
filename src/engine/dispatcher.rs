// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Executor dispatcher
//!
//! Hands a ready node to the executor registered for its execution kind and
//! turns whatever comes back (outcome, error, panic, cancellation) into a
//! [`TaskCompletion`] for the run driver.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::engine::propagator::check_output;
use crate::engine::tracker::{LogSink, RunTracker, TaskStatus};
use crate::errors::BlockflowError;
use crate::executors::{BlockExecutor, ExecutionOutcome, ExecutorRegistry, OutputMetadata, TaskContext, TaskInput};
use crate::pipeline::PipelineGraph;

/// Normalized result of one task
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub node_id: String,
    pub task_id: uuid::Uuid,
    pub status: TaskStatus,
    pub output: Option<Arc<OutputMetadata>>,
}

/// Everything needed to run one node
#[derive(Debug)]
pub struct DispatchRequest {
    pub graph: Arc<PipelineGraph>,
    pub input: TaskInput,
    pub context: TaskContext,
}

/// Routes tasks to executors
#[derive(Debug)]
pub struct Dispatcher {
    executors: ExecutorRegistry,
    tracker: Arc<RunTracker>,
    global_limit: Option<Arc<Semaphore>>,
    cancel_grace: Duration,
}

impl Dispatcher {
    pub fn new(executors: ExecutorRegistry, tracker: Arc<RunTracker>) -> Self {
        Self {
            executors,
            tracker,
            global_limit: None,
            cancel_grace: Duration::from_secs(5),
        }
    }

    /// Bound the tasks running at once across every execution
    pub fn with_global_limit(mut self, permits: usize) -> Self {
        self.global_limit = Some(Arc::new(Semaphore::new(permits)));
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    /// Start a task. The completion is sent on `report` exactly once.
    pub fn dispatch(self: &Arc<Self>, request: DispatchRequest, report: mpsc::UnboundedSender<TaskCompletion>) {
        let node = &request.input.node_id;
        let kind = match request.graph.node(node) {
            Some(n) => n.spec.execution_kind.clone(),
            None => {
                request.context.log.line(format!("node '{}' is not part of the graph", node));
                let _ = report.send(failed(&request.input));
                return;
            }
        };

        let Some(executor) = self.executors.get(&kind) else {
            let error = BlockflowError::DispatchUnavailable { kind };
            tracing::warn!(node = %node, "{}", error);
            request.context.log.line(error.to_string());
            let _ = report.send(failed(&request.input));
            return;
        };

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(completion) = dispatcher.run(executor, request).await {
                let _ = report.send(completion);
            }
        });
    }

    async fn run(&self, executor: Arc<dyn BlockExecutor>, request: DispatchRequest) -> Option<TaskCompletion> {
        let DispatchRequest { graph, input, context } = request;
        let cancel = context.cancel.clone();

        let _permit = match &self.global_limit {
            Some(limit) => tokio::select! {
                permit = Arc::clone(limit).acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => return Some(failed(&input)),
            },
            None => None,
        };

        // A task finished by cancellation before it started never runs
        if !self.tracker.task_running(input.execution_id, input.task_id).await {
            return None;
        }

        let node_id = input.node_id.clone();
        let task_id = input.task_id;
        let log = context.log.clone();
        let result = self.invoke(executor, input, context, &cancel).await;

        let (status, output) = match result {
            Ok(Ok(outcome)) => normalize(&graph, &node_id, outcome, &log),
            Ok(Err(fault)) => {
                log.line(
                    BlockflowError::TaskExecutionFailed {
                        node: node_id.clone(),
                        reason: format!("executor fault: {:#}", fault),
                    }
                    .to_string(),
                );
                (TaskStatus::Failed, None)
            }
            Err(join) => {
                log.line(
                    BlockflowError::TaskExecutionFailed {
                        node: node_id.clone(),
                        reason: describe_join_error(join),
                    }
                    .to_string(),
                );
                (TaskStatus::Failed, None)
            }
        };

        tracing::debug!(node = %node_id, task = %task_id, status = %status, "task finished");
        Some(TaskCompletion {
            node_id,
            task_id,
            status,
            output,
        })
    }

    /// Run the executor on its own task so a panic stays contained; once
    /// cancelled it gets `cancel_grace` to return before being aborted.
    async fn invoke(
        &self,
        executor: Arc<dyn BlockExecutor>,
        input: TaskInput,
        context: TaskContext,
        cancel: &CancellationToken,
    ) -> Result<anyhow::Result<ExecutionOutcome>, JoinError> {
        let mut handle = tokio::spawn(async move { executor.execute(input, context).await });

        tokio::select! {
            joined = &mut handle => joined,
            _ = cancel.cancelled() => {
                match tokio::time::timeout(self.cancel_grace, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        handle.await
                    }
                }
            }
        }
    }
}

fn failed(input: &TaskInput) -> TaskCompletion {
    TaskCompletion {
        node_id: input.node_id.clone(),
        task_id: input.task_id,
        status: TaskStatus::Failed,
        output: None,
    }
}

fn normalize(
    graph: &PipelineGraph,
    node: &str,
    outcome: ExecutionOutcome,
    log: &LogSink,
) -> (TaskStatus, Option<Arc<OutputMetadata>>) {
    log.text(&outcome.logs);

    if !outcome.is_success() {
        log.line(
            BlockflowError::TaskExecutionFailed {
                node: node.to_string(),
                reason: "block reported failure".into(),
            }
            .to_string(),
        );
        return (TaskStatus::Failed, None);
    }

    match check_output(graph, node, outcome.output.as_ref()) {
        Ok(()) => {
            log.line("block reported success");
            (TaskStatus::Success, outcome.output.map(Arc::new))
        }
        Err(reason) => {
            log.line(
                BlockflowError::TaskExecutionFailed {
                    node: node.to_string(),
                    reason,
                }
                .to_string(),
            );
            (TaskStatus::Failed, None)
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "executor aborted after cancellation".into();
    }
    let panic = err.into_panic();
    format!("executor panicked: {}", panic_message(panic.as_ref()))
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tracker::{Execution, TaskLog};
    use crate::pipeline::tests::linear;
    use crate::pipeline::GraphValidator;
    use crate::registry::{BlockRegistry, PortKind};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    enum Behavior {
        Succeed(Option<OutputMetadata>),
        Quiet(Option<OutputMetadata>),
        Refuse,
        Fault,
        Panic,
        Hang,
    }

    struct Scripted(Behavior);

    #[async_trait]
    impl BlockExecutor for Scripted {
        async fn execute(&self, _input: TaskInput, ctx: TaskContext) -> anyhow::Result<ExecutionOutcome> {
            match &self.0 {
                Behavior::Succeed(output) => Ok(ExecutionOutcome::success("done", output.clone())),
                Behavior::Quiet(output) => Ok(ExecutionOutcome::success("", output.clone())),
                Behavior::Refuse => Ok(ExecutionOutcome::failure("")),
                Behavior::Fault => anyhow::bail!("connection reset"),
                Behavior::Panic => panic!("boom"),
                Behavior::Hang => {
                    ctx.cancel.cancelled().await;
                    Ok(ExecutionOutcome::failure("stopped"))
                }
            }
        }
    }

    struct Harness {
        dispatcher: Arc<Dispatcher>,
        graph: Arc<PipelineGraph>,
        tracker: Arc<RunTracker>,
        execution: Uuid,
    }

    async fn harness(behavior: Behavior) -> Harness {
        let graph = Arc::new(GraphValidator::new(BlockRegistry::builtin()).validate(&linear()).unwrap());
        let tracker = Arc::new(RunTracker::new());
        let execution = Execution::new(&graph);
        let id = execution.id;
        tracker.register(execution, graph.nodes().iter().map(|n| (n.id.as_str(), crate::engine::NodeStatus::Blocked))).await;

        let executors = ExecutorRegistry::new().with("extract", Arc::new(Scripted(behavior)));
        let dispatcher = Arc::new(Dispatcher::new(executors, Arc::clone(&tracker)).with_cancel_grace(Duration::from_millis(50)));
        Harness {
            dispatcher,
            graph,
            tracker,
            execution: id,
        }
    }

    async fn request(h: &Harness, node: &str, cancel: CancellationToken) -> (DispatchRequest, LogSink) {
        let task_id = Uuid::new_v4();
        let log = h.tracker.create_task(h.execution, node, task_id).await;
        let request = DispatchRequest {
            graph: Arc::clone(&h.graph),
            input: TaskInput {
                execution_id: h.execution,
                task_id,
                node_id: node.into(),
                block: node.into(),
                config: json!({}),
                inputs: BTreeMap::new(),
                trigger: None,
            },
            context: TaskContext {
                cancel,
                log: log.clone(),
            },
        };
        (request, log)
    }

    async fn dispatch(h: &Harness, node: &str, cancel: CancellationToken) -> (TaskCompletion, Uuid) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (req, _) = request(h, node, cancel).await;
        let task_id = req.input.task_id;
        h.dispatcher.dispatch(req, tx);
        (rx.recv().await.unwrap(), task_id)
    }

    async fn logs(h: &Harness, task: Uuid) -> Vec<String> {
        h.tracker.finish_task(h.execution, task, TaskStatus::Failed, None).await;
        h.tracker.log_stream(h.execution, task).await.unwrap().collect().await
    }

    #[tokio::test]
    async fn test_success_with_matching_output() {
        let output = OutputMetadata::new(PortKind::S3File, json!({ "uri": "s3://raw/1" }));
        let h = harness(Behavior::Succeed(Some(output.clone()))).await;

        let (completion, _) = dispatch(&h, "extract", CancellationToken::new()).await;

        assert_eq!(completion.status, TaskStatus::Success);
        assert_eq!(completion.output.as_deref(), Some(&output));
    }

    #[tokio::test]
    async fn test_missing_output_is_downgraded() {
        let h = harness(Behavior::Succeed(None)).await;

        let (completion, task) = dispatch(&h, "extract", CancellationToken::new()).await;

        assert_eq!(completion.status, TaskStatus::Failed);
        assert!(logs(&h, task).await.iter().any(|l| l.contains("no output metadata")));
    }

    #[tokio::test]
    async fn test_silent_outcomes_still_leave_a_log_line() {
        let h = harness(Behavior::Refuse).await;
        let (completion, task) = dispatch(&h, "extract", CancellationToken::new()).await;
        assert_eq!(completion.status, TaskStatus::Failed);
        assert_eq!(
            logs(&h, task).await,
            vec!["Task for node 'extract' failed: block reported failure"]
        );

        let output = OutputMetadata::new(PortKind::S3File, json!({ "uri": "s3://raw/1" }));
        let h = harness(Behavior::Quiet(Some(output))).await;
        let (completion, task) = dispatch(&h, "extract", CancellationToken::new()).await;
        assert_eq!(completion.status, TaskStatus::Success);
        assert_eq!(logs(&h, task).await, vec!["block reported success"]);
    }

    #[tokio::test]
    async fn test_fault_and_panic_become_failures() {
        let h = harness(Behavior::Fault).await;
        let (completion, task) = dispatch(&h, "extract", CancellationToken::new()).await;
        assert_eq!(completion.status, TaskStatus::Failed);
        assert!(logs(&h, task).await.iter().any(|l| l.contains("connection reset")));

        let h = harness(Behavior::Panic).await;
        let (completion, task) = dispatch(&h, "extract", CancellationToken::new()).await;
        assert_eq!(completion.status, TaskStatus::Failed);
        assert!(logs(&h, task).await.iter().any(|l| l.contains("panicked: boom")));
    }

    #[tokio::test]
    async fn test_unregistered_kind_fails_immediately() {
        let h = harness(Behavior::Fault).await;

        let (completion, task) = dispatch(&h, "transform", CancellationToken::new()).await;

        assert_eq!(completion.status, TaskStatus::Failed);
        assert_eq!(
            logs(&h, task).await,
            vec!["No executor registered for execution kind 'file_transform'"]
        );
    }

    #[tokio::test]
    async fn test_cancellation_reaches_executor() {
        let h = harness(Behavior::Hang).await;
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (req, _) = request(&h, "extract", cancel.clone()).await;
        h.dispatcher.dispatch(req, tx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.status, TaskStatus::Failed);
    }

    #[test]
    fn test_task_log_is_shared_with_sink() {
        let log = TaskLog::new();
        LogSink::new(Arc::clone(&log)).line("hello");
        assert_eq!(log.lines(), vec!["hello"]);
    }
}
