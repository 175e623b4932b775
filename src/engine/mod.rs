// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Execution engine
//!
//! [`Engine`] is the run lifecycle surface: start an execution of a validated
//! graph, observe it, stream task logs, cancel it. Internally every execution
//! gets its own scheduler, propagator and driver task, while the dispatcher
//! and the run tracker are shared.

mod config;
mod dispatcher;
mod propagator;
mod run;
mod scheduler;
mod tracker;

pub use config::EngineConfig;
pub use dispatcher::{DispatchRequest, Dispatcher, TaskCompletion};
pub use propagator::{check_output, InputFragment, MetadataPropagator};
pub use run::TriggerInputs;
pub use scheduler::{Cancellation, Completion, NodeStatus, Scheduler, SkipCause};
pub use tracker::{
    aggregate_status, Execution, ExecutionId, ExecutionSnapshot, ExecutionStatus, LogSink, LogStream,
    NodeSnapshot, RunTracker, Task, TaskId, TaskLog, TaskSnapshot, TaskStatus,
};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{BlockflowError, BlockflowResult};
use crate::executors::ExecutorRegistry;
use crate::pipeline::PipelineGraph;
use run::ExecutionRun;

/// Pipeline orchestration engine
pub struct Engine {
    config: EngineConfig,
    dispatcher: Arc<Dispatcher>,
    tracker: Arc<RunTracker>,
    runs: RwLock<HashMap<ExecutionId, Arc<ExecutionRun>>>,
}

impl Engine {
    /// Create an engine with the executors it may dispatch to
    pub fn new(config: EngineConfig, executors: ExecutorRegistry) -> BlockflowResult<Self> {
        config.validate()?;

        let tracker = Arc::new(RunTracker::new());
        let mut dispatcher = Dispatcher::new(executors, Arc::clone(&tracker)).with_cancel_grace(config.cancel_grace());
        if let Some(limit) = config.global_max_in_flight {
            dispatcher = dispatcher.with_global_limit(limit);
        }

        Ok(Self {
            config,
            dispatcher: Arc::new(dispatcher),
            tracker,
            runs: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        self.dispatcher.executors()
    }

    /// Start an execution; returns as soon as it is registered
    pub async fn start(&self, graph: Arc<PipelineGraph>, triggers: TriggerInputs) -> BlockflowResult<ExecutionId> {
        if let Some(node) = triggers.keys().find(|node| graph.node(node).is_none()) {
            return Err(BlockflowError::UnknownTriggerNode { node: node.clone() });
        }

        let run = ExecutionRun::start(
            graph,
            triggers,
            self.config.max_in_flight,
            Arc::clone(&self.tracker),
            Arc::clone(&self.dispatcher),
        )
        .await;

        let id = run.id();
        self.runs.write().await.insert(id, run);
        Ok(id)
    }

    /// Current execution state with every node and task
    pub async fn status(&self, id: ExecutionId) -> BlockflowResult<ExecutionSnapshot> {
        self.tracker.snapshot(id).await
    }

    /// Follow a task's log lines
    pub async fn stream_logs(&self, id: ExecutionId, task_id: TaskId) -> BlockflowResult<LogStream> {
        self.tracker.log_stream(id, task_id).await
    }

    /// Cancel a running execution; a finished one is left untouched
    pub async fn cancel(&self, id: ExecutionId, reason: &str) -> BlockflowResult<()> {
        let run = self.run(id).await?;
        if !run.cancel(reason).await {
            tracing::debug!(execution = %id, "cancel ignored, execution already finished");
        }
        Ok(())
    }

    /// Wait for an execution to finish and return its final state
    pub async fn wait(&self, id: ExecutionId) -> BlockflowResult<ExecutionSnapshot> {
        self.run(id).await?.finished().await;
        self.tracker.snapshot(id).await
    }

    /// Every execution started on this engine, most recent first
    pub async fn executions(&self) -> Vec<Execution> {
        self.tracker.executions().await
    }

    async fn run(&self, id: ExecutionId) -> BlockflowResult<Arc<ExecutionRun>> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| BlockflowError::ExecutionNotFound { id: id.to_string() })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("executors", self.executors())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{BlockExecutor, ExecutionOutcome, OutputMetadata, TaskContext, TaskInput};
    use crate::pipeline::tests::linear;
    use crate::pipeline::GraphValidator;
    use crate::registry::{BlockRegistry, PortKind};
    use async_trait::async_trait;
    use serde_json::json;

    /// Echoes its first input payload, or the trigger payload for roots
    struct Echo;

    #[async_trait]
    impl BlockExecutor for Echo {
        async fn execute(&self, input: TaskInput, ctx: TaskContext) -> anyhow::Result<ExecutionOutcome> {
            let payload = input
                .inputs
                .get(&0)
                .and_then(|f| f.payload().cloned())
                .or(input.trigger)
                .unwrap_or(json!(null));
            ctx.log.line(format!("{} got {}", input.node_id, payload));
            let kind = match input.block.as_str() {
                "load" => PortKind::DbTable,
                _ => PortKind::S3File,
            };
            Ok(ExecutionOutcome::success("", Some(OutputMetadata::new(kind, payload))))
        }
    }

    fn engine() -> Engine {
        let echo: Arc<dyn BlockExecutor> = Arc::new(Echo);
        let executors = ExecutorRegistry::new()
            .with("extract", Arc::clone(&echo))
            .with("file_transform", Arc::clone(&echo))
            .with("db_load", echo);
        Engine::new(EngineConfig::default(), executors).unwrap()
    }

    fn linear_graph() -> Arc<PipelineGraph> {
        Arc::new(GraphValidator::new(BlockRegistry::builtin()).validate(&linear()).unwrap())
    }

    #[tokio::test]
    async fn test_trigger_payload_flows_downstream() {
        let engine = engine();
        let triggers = TriggerInputs::from([("extract".to_string(), json!("s3://raw/day=1"))]);

        let id = engine.start(linear_graph(), triggers).await.unwrap();
        let snapshot = engine.wait(id).await.unwrap();

        assert_eq!(snapshot.execution.status, ExecutionStatus::Success);
        let load = snapshot.node("load").unwrap().task.as_ref().unwrap();
        assert_eq!(load.logs, vec![r#"load got "s3://raw/day=1""#, "block reported success"]);
        assert_eq!(load.task.output.as_ref().unwrap().kind, PortKind::DbTable);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_errors() {
        let engine = engine();
        let triggers = TriggerInputs::from([("nope".to_string(), json!(1))]);

        assert!(matches!(
            engine.start(linear_graph(), triggers).await,
            Err(BlockflowError::UnknownTriggerNode { .. })
        ));
        assert!(matches!(
            engine.status(uuid::Uuid::new_v4()).await,
            Err(BlockflowError::ExecutionNotFound { .. })
        ));
        assert!(engine.cancel(uuid::Uuid::new_v4(), "x").await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_after_finish_is_noop() {
        let engine = engine();
        let id = engine.start(linear_graph(), TriggerInputs::new()).await.unwrap();
        engine.wait(id).await.unwrap();

        engine.cancel(id, "late").await.unwrap();

        let snapshot = engine.status(id).await.unwrap();
        assert_eq!(snapshot.execution.status, ExecutionStatus::Success);
        assert_eq!(engine.executions().await.len(), 1);
    }

    #[test]
    fn test_zero_max_in_flight_is_rejected() {
        let config = EngineConfig::default().with_max_in_flight(0);
        assert!(Engine::new(config, ExecutorRegistry::new()).is_err());
    }
}
