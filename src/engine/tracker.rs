// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Run tracker
//!
//! Keeps the observable record of every execution: aggregate status, per-node
//! status with skip causes, tasks, and their logs. The tracker never drives a
//! transition. It only records what the scheduler and dispatcher produce.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::engine::scheduler::{NodeStatus, SkipCause};
use crate::errors::BlockflowError;
use crate::executors::OutputMetadata;
use crate::pipeline::PipelineGraph;

pub type ExecutionId = Uuid;
pub type TaskId = Uuid;

/// Overall status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether moving to `next` keeps transitions monotonic
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            Self::Success | Self::Failed => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Task statuses follow the execution status lattice
pub type TaskStatus = ExecutionStatus;

/// Execution status as a function of node statuses.
///
/// SUCCESS when every node succeeded, FAILED when every node is terminal and
/// at least one is not SUCCEEDED, otherwise RUNNING (or PENDING before start).
pub fn aggregate_status<I>(nodes: I, started: bool) -> ExecutionStatus
where
    I: IntoIterator<Item = NodeStatus>,
{
    let mut all_succeeded = true;
    for status in nodes {
        if !status.is_terminal() {
            return if started {
                ExecutionStatus::Running
            } else {
                ExecutionStatus::Pending
            };
        }
        all_succeeded &= status == NodeStatus::Succeeded;
    }

    if all_succeeded {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::Failed
    }
}

/// One run of a pipeline graph
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub pipeline: String,
    pub graph_version: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Why the execution failed, once it has
    pub reason: Option<String>,
}

impl Execution {
    pub fn new(graph: &PipelineGraph) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: graph.name().to_string(),
            graph_version: graph.version().to_string(),
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            reason: None,
        }
    }

    /// Apply a status change if it is monotonic; returns whether it applied
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == ExecutionStatus::Running || (next.is_terminal() && self.started_at.is_none()) {
            self.started_at.get_or_insert(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        true
    }
}

/// One node's execution within an execution
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub execution_id: ExecutionId,
    pub node_id: String,
    pub status: TaskStatus,
    pub output: Option<Arc<OutputMetadata>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        true
    }
}

#[derive(Debug, Default)]
struct LogBuffer {
    lines: Vec<String>,
    closed: bool,
}

/// Append-only log of one task
#[derive(Debug)]
pub struct TaskLog {
    buffer: Mutex<LogBuffer>,
    version: watch::Sender<u64>,
}

impl TaskLog {
    pub fn new() -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new(Self {
            buffer: Mutex::new(LogBuffer::default()),
            version,
        })
    }

    fn buffer(&self) -> MutexGuard<'_, LogBuffer> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a line; ignored once the log is closed
    pub fn push(&self, line: impl Into<String>) {
        {
            let mut buffer = self.buffer();
            if buffer.closed {
                return;
            }
            buffer.lines.push(line.into());
        }
        self.version.send_modify(|v| *v += 1);
    }

    /// Mark the log complete; streams end after the last line
    pub fn close(&self) {
        self.buffer().closed = true;
        self.version.send_modify(|v| *v += 1);
    }

    pub fn is_closed(&self) -> bool {
        self.buffer().closed
    }

    pub fn lines(&self) -> Vec<String> {
        self.buffer().lines.clone()
    }

    /// Stream every line from the start, following new ones until closed
    pub fn stream(self: &Arc<Self>) -> LogStream {
        LogStream {
            log: Arc::clone(self),
            updates: self.version.subscribe(),
            cursor: 0,
        }
    }
}

/// Write handle on a task log, given to executors
#[derive(Debug, Clone)]
pub struct LogSink(Arc<TaskLog>);

impl LogSink {
    pub fn new(log: Arc<TaskLog>) -> Self {
        Self(log)
    }

    /// Append a single line
    pub fn line(&self, line: impl Into<String>) {
        self.0.push(line);
    }

    /// Append every line of a block of text
    pub fn text(&self, text: &str) {
        for line in text.lines() {
            self.0.push(line);
        }
    }
}

/// Lazy, append-only sequence of log lines.
///
/// Finite once the task is terminal, otherwise it waits for more lines.
#[derive(Debug)]
pub struct LogStream {
    log: Arc<TaskLog>,
    updates: watch::Receiver<u64>,
    cursor: usize,
}

impl LogStream {
    /// Next line, or `None` once the log is closed and fully read
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            self.updates.borrow_and_update();
            {
                let buffer = self.log.buffer();
                if let Some(line) = buffer.lines.get(self.cursor) {
                    self.cursor += 1;
                    return Some(line.clone());
                }
                if buffer.closed {
                    return None;
                }
            }
            if self.updates.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Read until the log closes
    pub async fn collect(mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await {
            lines.push(line);
        }
        lines
    }
}

#[derive(Debug)]
struct TaskRecord {
    task: Task,
    log: Arc<TaskLog>,
}

#[derive(Debug)]
struct NodeRecord {
    status: NodeStatus,
    skip_cause: Option<SkipCause>,
    task: Option<TaskRecord>,
}

#[derive(Debug)]
struct ExecutionRecord {
    execution: Execution,
    started: bool,
    nodes: BTreeMap<String, NodeRecord>,
}

/// Point-in-time view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub task: Task,
    pub logs: Vec<String>,
}

/// Point-in-time view of a node
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub node_id: String,
    pub status: NodeStatus,
    pub skip_cause: Option<SkipCause>,
    pub task: Option<TaskSnapshot>,
}

/// Point-in-time view of an execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub execution: Execution,
    /// Nodes ordered by id
    pub nodes: Vec<NodeSnapshot>,
}

impl ExecutionSnapshot {
    pub fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.node_id == id)
    }

    /// Tasks ordered by start time, i.e. dispatch order
    pub fn tasks(&self) -> Vec<&TaskSnapshot> {
        let mut tasks: Vec<&TaskSnapshot> = self.nodes.iter().filter_map(|n| n.task.as_ref()).collect();
        tasks.sort_by_key(|t| t.task.started_at);
        tasks
    }
}

/// Aggregates node and task state into execution state
#[derive(Debug, Default)]
pub struct RunTracker {
    executions: RwLock<HashMap<ExecutionId, ExecutionRecord>>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new execution with its initial node statuses
    pub async fn register<'a, I>(&self, execution: Execution, nodes: I)
    where
        I: IntoIterator<Item = (&'a str, NodeStatus)>,
    {
        let nodes = nodes
            .into_iter()
            .map(|(id, status)| {
                (
                    id.to_string(),
                    NodeRecord {
                        status,
                        skip_cause: None,
                        task: None,
                    },
                )
            })
            .collect();

        let mut executions = self.executions.write().await;
        executions.insert(
            execution.id,
            ExecutionRecord {
                execution,
                started: false,
                nodes,
            },
        );
    }

    /// Mark the execution as started and recompute its status
    pub async fn mark_started(&self, id: ExecutionId) {
        let mut executions = self.executions.write().await;
        if let Some(record) = executions.get_mut(&id) {
            record.started = true;
            refresh(record);
        }
    }

    /// Record a node status change
    pub async fn set_node(&self, id: ExecutionId, node: &str, status: NodeStatus, skip_cause: Option<SkipCause>) {
        let mut executions = self.executions.write().await;
        let Some(record) = executions.get_mut(&id) else {
            return;
        };
        if let Some(n) = record.nodes.get_mut(node) {
            n.status = status;
            if skip_cause.is_some() {
                n.skip_cause = skip_cause;
            }
        }
        refresh(record);
    }

    /// Create a PENDING task for a node and return its log sink
    pub async fn create_task(&self, id: ExecutionId, node: &str, task_id: TaskId) -> LogSink {
        let log = TaskLog::new();
        let mut executions = self.executions.write().await;
        if let Some(n) = executions.get_mut(&id).and_then(|r| r.nodes.get_mut(node)) {
            n.task = Some(TaskRecord {
                task: Task {
                    id: task_id,
                    execution_id: id,
                    node_id: node.to_string(),
                    status: TaskStatus::Pending,
                    output: None,
                    started_at: None,
                    finished_at: None,
                },
                log: Arc::clone(&log),
            });
        }
        LogSink::new(log)
    }

    /// Move a task to RUNNING; false if it already finished (e.g. cancelled)
    pub async fn task_running(&self, id: ExecutionId, task_id: TaskId) -> bool {
        let mut executions = self.executions.write().await;
        executions
            .get_mut(&id)
            .and_then(|r| find_task(r, task_id))
            .map(|t| t.task.transition(TaskStatus::Running))
            .unwrap_or(false)
    }

    /// Move a task to a terminal status and close its log.
    /// Returns false if the task was already terminal.
    pub async fn finish_task(
        &self,
        id: ExecutionId,
        task_id: TaskId,
        status: TaskStatus,
        output: Option<Arc<OutputMetadata>>,
    ) -> bool {
        let mut executions = self.executions.write().await;
        let Some(record) = executions.get_mut(&id).and_then(|r| find_task(r, task_id)) else {
            return false;
        };
        if !record.task.transition(status) {
            return false;
        }
        record.task.output = output;
        record.log.close();
        true
    }

    /// Snapshot of an execution
    pub async fn snapshot(&self, id: ExecutionId) -> Result<ExecutionSnapshot, BlockflowError> {
        let executions = self.executions.read().await;
        let record = executions
            .get(&id)
            .ok_or_else(|| BlockflowError::ExecutionNotFound { id: id.to_string() })?;

        let nodes = record
            .nodes
            .iter()
            .map(|(node_id, n)| NodeSnapshot {
                node_id: node_id.clone(),
                status: n.status,
                skip_cause: n.skip_cause.clone(),
                task: n.task.as_ref().map(|t| TaskSnapshot {
                    task: t.task.clone(),
                    logs: t.log.lines(),
                }),
            })
            .collect();

        Ok(ExecutionSnapshot {
            execution: record.execution.clone(),
            nodes,
        })
    }

    /// Stream a task's log
    pub async fn log_stream(&self, id: ExecutionId, task_id: TaskId) -> Result<LogStream, BlockflowError> {
        let mut executions = self.executions.write().await;
        let record = executions
            .get_mut(&id)
            .ok_or_else(|| BlockflowError::ExecutionNotFound { id: id.to_string() })?;

        find_task(record, task_id)
            .map(|t| t.log.stream())
            .ok_or_else(|| BlockflowError::TaskNotFound {
                execution: id.to_string(),
                task: task_id.to_string(),
            })
    }

    /// All executions, most recent first
    pub async fn executions(&self) -> Vec<Execution> {
        let executions = self.executions.read().await;
        let mut list: Vec<Execution> = executions.values().map(|r| r.execution.clone()).collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }
}

fn find_task(record: &mut ExecutionRecord, task_id: TaskId) -> Option<&mut TaskRecord> {
    record
        .nodes
        .values_mut()
        .filter_map(|n| n.task.as_mut())
        .find(|t| t.task.id == task_id)
}

/// Recompute the execution status from its node statuses
fn refresh(record: &mut ExecutionRecord) {
    let status = aggregate_status(record.nodes.values().map(|n| n.status), record.started);
    let previous = record.execution.status;

    if !record.execution.transition(status) {
        return;
    }

    if status == ExecutionStatus::Failed {
        record.execution.reason = Some(failure_reason(record));
    }

    tracing::info!(
        execution = %record.execution.id,
        from = %previous,
        to = %status,
        "execution status changed"
    );
}

fn failure_reason(record: &ExecutionRecord) -> String {
    let cancelled = record.nodes.values().find_map(|n| match &n.skip_cause {
        Some(SkipCause::Cancelled { reason }) => Some(reason.clone()),
        _ => None,
    });
    if let Some(reason) = cancelled {
        return BlockflowError::ExecutionCancelled { reason }.to_string();
    }

    let failed: Vec<&str> = record
        .nodes
        .iter()
        .filter(|(_, n)| n.status == NodeStatus::Failed)
        .map(|(id, _)| id.as_str())
        .collect();
    format!("failed node(s): {}", failed.join(", "))
}
