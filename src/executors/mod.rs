// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Block executors
//!
//! The engine implements no block logic itself. Every block type names an
//! execution kind, and an executor registered for that kind does the work
//! through the [`BlockExecutor`] contract.

mod shell;

pub use shell::ShellExecutor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::{InputFragment, LogSink};
use crate::registry::PortKind;

/// What a finished task produced: a port kind and an opaque payload
/// (typically a storage location). The engine routes it, never reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub kind: PortKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl OutputMetadata {
    pub fn new(kind: PortKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }
}

/// Status reported by an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Result of executing a block
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: OutcomeStatus,
    /// Log text explaining the outcome
    pub logs: String,
    /// Output metadata, if the block produced any
    pub output: Option<OutputMetadata>,
}

impl ExecutionOutcome {
    /// Create a successful outcome
    pub fn success(logs: impl Into<String>, output: Option<OutputMetadata>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            logs: logs.into(),
            output,
        }
    }

    /// Create a failed outcome
    pub fn failure(logs: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            logs: logs.into(),
            output: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Fully resolved configuration handed to an executor
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub node_id: String,
    /// Id of the block spec the node selected
    pub block: String,
    /// Node configuration payload, including resolved connection settings
    pub config: serde_json::Value,
    /// Upstream fragments keyed by input port index
    pub inputs: BTreeMap<usize, InputFragment>,
    /// Payload supplied for the node's trigger ports when the run was started
    pub trigger: Option<serde_json::Value>,
}

/// Per-task handles available to an executor while it runs
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Fires when the owning execution is cancelled
    pub cancel: CancellationToken,
    /// Live log output, visible to log streams as it is written
    pub log: LogSink,
}

/// Trait for block executors
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    /// Execute a block.
    ///
    /// Returning `Err` is a fault: the engine records it in the task log and
    /// fails the task exactly like a reported failure.
    async fn execute(&self, input: TaskInput, ctx: TaskContext) -> anyhow::Result<ExecutionOutcome>;

    /// Check if the executor can run on this host
    async fn check_available(&self) -> bool {
        true
    }
}

/// Capability map from execution kind to executor
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn BlockExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor for an execution kind, replacing any previous one
    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn BlockExecutor>) {
        self.executors.insert(kind.into(), executor);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, kind: impl Into<String>, executor: Arc<dyn BlockExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn BlockExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Create a standard executor setup with all built-in executors
pub fn create_default_executors() -> ExecutorRegistry {
    ExecutorRegistry::new().with("shell", Arc::new(ShellExecutor::new()))
}
