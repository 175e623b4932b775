// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Scheduler
//!
//! Per-execution node state machine:
//!
//! ```text
//! BLOCKED ──► READY ──► DISPATCHED ──► SUCCEEDED | FAILED
//!    │          │            │
//!    └──────────┴────────────┴──► SKIPPED (upstream failure or cancellation)
//! ```
//!
//! The scheduler is synchronous. The run driver owns it behind the
//! execution's lock, which serializes every transition.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crate::engine::tracker::{aggregate_status, ExecutionStatus};
use crate::pipeline::PipelineGraph;

/// State of a node within one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Blocked,
    Ready,
    Dispatched,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "BLOCKED",
            Self::Ready => "READY",
            Self::Dispatched => "DISPATCHED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a node was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum SkipCause {
    /// A node this one depends on failed
    UpstreamFailed { node: String },
    /// The execution was cancelled
    Cancelled { reason: String },
}

impl fmt::Display for SkipCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailed { node } => write!(f, "upstream node '{}' failed", node),
            Self::Cancelled { reason } => write!(f, "cancelled: {}", reason),
        }
    }
}

#[derive(Debug, Clone)]
struct NodeState {
    status: NodeStatus,
    skip_cause: Option<SkipCause>,
}

/// Effect of a completion notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The node was not in flight; nothing changed
    Ignored,
    /// The node succeeded; these dependents became ready
    Succeeded { ready: Vec<String> },
    /// The node failed; these transitive dependents were skipped
    Failed { skipped: Vec<String> },
}

/// Effect of cancelling an execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cancellation {
    /// Nodes that were in flight and must be told to stop
    pub interrupted: Vec<String>,
    /// Every node moved to SKIPPED, including the interrupted ones
    pub skipped: Vec<String>,
}

/// Traversal state for one execution of a graph
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<PipelineGraph>,
    states: BTreeMap<String, NodeState>,
    ready: VecDeque<String>,
    in_flight: usize,
    max_in_flight: usize,
    cancelled: bool,
}

impl Scheduler {
    /// Initialize node states: nodes without incoming edges start READY
    pub fn new(graph: Arc<PipelineGraph>, max_in_flight: usize) -> Self {
        let mut states = BTreeMap::new();
        let mut ready = VecDeque::new();

        for node in graph.nodes() {
            let status = if graph.incoming(&node.id).next().is_none() {
                NodeStatus::Ready
            } else {
                NodeStatus::Blocked
            };
            states.insert(
                node.id.clone(),
                NodeState {
                    status,
                    skip_cause: None,
                },
            );
        }

        // BTreeMap iteration gives the id tie-break for the initial batch
        for (id, state) in &states {
            if state.status == NodeStatus::Ready {
                ready.push_back(id.clone());
            }
        }

        Self {
            graph,
            states,
            ready,
            in_flight: 0,
            max_in_flight: max_in_flight.max(1),
            cancelled: false,
        }
    }

    pub fn graph(&self) -> &Arc<PipelineGraph> {
        &self.graph
    }

    pub fn status(&self, node: &str) -> Option<NodeStatus> {
        self.states.get(node).map(|s| s.status)
    }

    pub fn skip_cause(&self, node: &str) -> Option<&SkipCause> {
        self.states.get(node).and_then(|s| s.skip_cause.as_ref())
    }

    /// Node statuses ordered by node id
    pub fn statuses(&self) -> impl Iterator<Item = (&str, NodeStatus)> {
        self.states.iter().map(|(id, s)| (id.as_str(), s.status))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// READY nodes waiting for a free slot, in dispatch order
    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.ready.iter().map(String::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Take the next READY node if a slot is free, marking it DISPATCHED
    pub fn next_dispatch(&mut self) -> Option<String> {
        if self.cancelled || self.in_flight >= self.max_in_flight {
            return None;
        }

        let node = self.ready.pop_front()?;
        if let Some(state) = self.states.get_mut(&node) {
            state.status = NodeStatus::Dispatched;
        }
        self.in_flight += 1;
        Some(node)
    }

    /// Take every node that can be dispatched right now
    pub fn drain_dispatchable(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.next_dispatch()).collect()
    }

    /// Apply a completion notification for a dispatched node.
    ///
    /// Notifications for nodes that are not in flight (duplicates, unknown
    /// nodes, nodes skipped by cancellation) are ignored.
    pub fn complete(&mut self, node: &str, succeeded: bool) -> Completion {
        match self.states.get_mut(node) {
            Some(state) if state.status == NodeStatus::Dispatched => {
                state.status = if succeeded {
                    NodeStatus::Succeeded
                } else {
                    NodeStatus::Failed
                };
            }
            _ => return Completion::Ignored,
        }
        self.in_flight -= 1;

        if succeeded {
            let graph = Arc::clone(&self.graph);
            let ready: Vec<String> = graph
                .dependents(node)
                .into_iter()
                .filter(|dep| self.reevaluate(dep))
                .map(str::to_string)
                .collect();
            self.ready.extend(ready.iter().cloned());
            Completion::Succeeded { ready }
        } else {
            Completion::Failed {
                skipped: self.skip_downstream(node),
            }
        }
    }

    /// Promote a BLOCKED node to READY once all its sources succeeded.
    /// Re-running it without new completions changes nothing.
    fn reevaluate(&mut self, node: &str) -> bool {
        if self.status(node) != Some(NodeStatus::Blocked) {
            return false;
        }

        let satisfied = self
            .graph
            .dependencies(node)
            .iter()
            .all(|dep| self.status(dep) == Some(NodeStatus::Succeeded));

        if satisfied {
            if let Some(state) = self.states.get_mut(node) {
                state.status = NodeStatus::Ready;
            }
        }
        satisfied
    }

    fn skip_downstream(&mut self, failed: &str) -> Vec<String> {
        let graph = Arc::clone(&self.graph);
        let mut skipped = Vec::new();

        for node in graph.downstream(failed) {
            let Some(state) = self.states.get_mut(node) else {
                continue;
            };
            if state.status.is_terminal() {
                continue;
            }
            state.status = NodeStatus::Skipped;
            state.skip_cause = Some(SkipCause::UpstreamFailed {
                node: failed.to_string(),
            });
            skipped.push(node.to_string());
        }

        self.ready.retain(|n| !skipped.contains(n));
        skipped
    }

    /// Stop the execution: nothing new is dispatched and every non-terminal
    /// node becomes SKIPPED.
    pub fn cancel(&mut self, reason: &str) -> Cancellation {
        let mut result = Cancellation::default();
        if self.cancelled {
            return result;
        }
        self.cancelled = true;

        for (id, state) in self.states.iter_mut() {
            if state.status.is_terminal() {
                continue;
            }
            if state.status == NodeStatus::Dispatched {
                result.interrupted.push(id.clone());
            }
            state.status = NodeStatus::Skipped;
            state.skip_cause = Some(SkipCause::Cancelled {
                reason: reason.to_string(),
            });
            result.skipped.push(id.clone());
        }

        self.ready.clear();
        self.in_flight = 0;
        result
    }

    /// Terminal status once no further progress is possible
    pub fn outcome(&self) -> Option<ExecutionStatus> {
        if !self.ready.is_empty() || self.in_flight > 0 {
            return None;
        }

        match aggregate_status(self.states.values().map(|s| s.status), true) {
            status if status.is_terminal() => Some(status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{diamond, linear};
    use crate::pipeline::{GraphValidator, NodeDefinition, PipelineDefinition};
    use crate::registry::BlockRegistry;

    fn graph(def: PipelineDefinition) -> Arc<PipelineGraph> {
        Arc::new(GraphValidator::new(BlockRegistry::builtin()).validate(&def).unwrap())
    }

    #[test]
    fn test_linear_runs_in_order() {
        let mut scheduler = Scheduler::new(graph(linear()), 4);
        let mut dispatched = Vec::new();

        loop {
            let batch = scheduler.drain_dispatchable();
            if batch.is_empty() {
                break;
            }
            for node in batch {
                assert!(matches!(scheduler.complete(&node, true), Completion::Succeeded { .. }));
                dispatched.push(node);
            }
        }

        assert_eq!(dispatched, vec!["extract", "transform", "load"]);
        assert_eq!(scheduler.outcome(), Some(ExecutionStatus::Success));
    }

    #[test]
    fn test_diamond_join_waits_for_both_branches() {
        let mut scheduler = Scheduler::new(graph(diamond()), 4);

        assert_eq!(scheduler.drain_dispatchable(), vec!["a"]);
        assert_eq!(
            scheduler.complete("a", true),
            Completion::Succeeded {
                ready: vec!["b".into(), "c".into()]
            }
        );
        assert_eq!(scheduler.drain_dispatchable(), vec!["b", "c"]);
        assert_eq!(scheduler.in_flight(), 2);

        assert_eq!(scheduler.complete("b", true), Completion::Succeeded { ready: vec![] });
        assert_eq!(scheduler.status("d"), Some(NodeStatus::Blocked));

        assert_eq!(
            scheduler.complete("c", true),
            Completion::Succeeded {
                ready: vec!["d".into()]
            }
        );
        assert_eq!(scheduler.drain_dispatchable(), vec!["d"]);
    }

    #[test]
    fn test_failure_skips_transitive_dependents() {
        let mut scheduler = Scheduler::new(graph(linear()), 4);

        scheduler.drain_dispatchable();
        scheduler.complete("extract", true);
        scheduler.drain_dispatchable();

        assert_eq!(
            scheduler.complete("transform", false),
            Completion::Failed {
                skipped: vec!["load".into()]
            }
        );
        assert_eq!(scheduler.status("load"), Some(NodeStatus::Skipped));
        assert_eq!(
            scheduler.skip_cause("load"),
            Some(&SkipCause::UpstreamFailed {
                node: "transform".into()
            })
        );
        assert_eq!(scheduler.outcome(), Some(ExecutionStatus::Failed));
    }

    #[test]
    fn test_independent_branch_continues_after_failure() {
        let mut def = linear();
        def.nodes.push(NodeDefinition::new("solo", "extract"));
        let mut scheduler = Scheduler::new(graph(def), 4);

        assert_eq!(scheduler.drain_dispatchable(), vec!["extract", "solo"]);
        scheduler.complete("extract", false);

        assert_eq!(scheduler.outcome(), None);
        scheduler.complete("solo", true);

        assert_eq!(scheduler.status("solo"), Some(NodeStatus::Succeeded));
        assert_eq!(scheduler.status("transform"), Some(NodeStatus::Skipped));
        assert_eq!(scheduler.outcome(), Some(ExecutionStatus::Failed));
    }

    #[test]
    fn test_bound_queues_ready_nodes_by_id() {
        let def = PipelineDefinition {
            name: "wide".into(),
            description: None,
            blocks: vec![],
            nodes: ["c", "a", "b"]
                .iter()
                .map(|id| NodeDefinition::new(*id, "extract"))
                .collect(),
            edges: vec![],
        };
        let mut scheduler = Scheduler::new(graph(def), 2);

        assert_eq!(scheduler.drain_dispatchable(), vec!["a", "b"]);
        assert_eq!(scheduler.queued().collect::<Vec<_>>(), vec!["c"]);
        assert!(scheduler.next_dispatch().is_none());

        scheduler.complete("b", true);
        assert_eq!(scheduler.drain_dispatchable(), vec!["c"]);
    }

    #[test]
    fn test_duplicate_completion_is_ignored() {
        let mut scheduler = Scheduler::new(graph(linear()), 4);
        scheduler.drain_dispatchable();

        assert!(matches!(scheduler.complete("extract", true), Completion::Succeeded { .. }));
        assert_eq!(scheduler.complete("extract", true), Completion::Ignored);
        assert_eq!(scheduler.complete("extract", false), Completion::Ignored);
        assert_eq!(scheduler.complete("ghost", true), Completion::Ignored);
        assert_eq!(scheduler.status("extract"), Some(NodeStatus::Succeeded));
    }

    #[test]
    fn test_cancel_skips_everything_not_terminal() {
        let mut scheduler = Scheduler::new(graph(diamond()), 4);
        scheduler.drain_dispatchable();
        scheduler.complete("a", true);
        scheduler.drain_dispatchable();

        let cancellation = scheduler.cancel("user abort");

        assert_eq!(cancellation.interrupted, vec!["b", "c"]);
        assert_eq!(cancellation.skipped, vec!["b", "c", "d"]);
        assert!(scheduler.next_dispatch().is_none());
        assert_eq!(scheduler.complete("b", true), Completion::Ignored);
        assert_eq!(scheduler.status("a"), Some(NodeStatus::Succeeded));
        assert_eq!(scheduler.outcome(), Some(ExecutionStatus::Failed));
        assert!(scheduler.cancel("again").skipped.is_empty());
    }
}
