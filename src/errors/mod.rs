// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Error types
//!
//! Validation problems are collected into a single [`BlockflowError::GraphInvalid`]
//! so a caller can report every issue at once. Runtime errors are contained at
//! node granularity by the engine and only surface here when the caller asks
//! about an execution or task directly.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for blockflow operations
pub type BlockflowResult<T> = Result<T, BlockflowError>;

/// Main error type for blockflow
#[derive(Error, Debug, Diagnostic)]
pub enum BlockflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline graph is invalid ({} violation{})", violations.len(), if violations.len() == 1 { "" } else { "s" })]
    #[diagnostic(
        code(blockflow::graph_invalid),
        help("Run 'blockflow validate' to list every violation with a suggested fix")
    )]
    GraphInvalid { violations: Vec<GraphViolation> },

    #[error("Block '{block}' is already registered")]
    #[diagnostic(code(blockflow::duplicate_block))]
    DuplicateBlock { block: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Task for node '{node}' failed: {reason}")]
    #[diagnostic(code(blockflow::task_execution_failed))]
    TaskExecutionFailed { node: String, reason: String },

    #[error("No executor registered for execution kind '{kind}'")]
    #[diagnostic(
        code(blockflow::dispatch_unavailable),
        help("Register an executor for '{kind}' before starting the execution")
    )]
    DispatchUnavailable { kind: String },

    #[error("Execution cancelled: {reason}")]
    #[diagnostic(code(blockflow::execution_cancelled))]
    ExecutionCancelled { reason: String },

    #[error("Execution '{id}' not found")]
    #[diagnostic(code(blockflow::execution_not_found))]
    ExecutionNotFound { id: String },

    #[error("Task '{task}' not found in execution '{execution}'")]
    #[diagnostic(code(blockflow::task_not_found))]
    TaskNotFound { execution: String, task: String },

    #[error("Trigger input names node '{node}', which is not in the pipeline")]
    #[diagnostic(code(blockflow::unknown_trigger_node))]
    UnknownTriggerNode { node: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(blockflow::pipeline_not_found),
        help("Pass the path of a pipeline definition (YAML or JSON)")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(blockflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Invalid engine configuration: {reason}")]
    #[diagnostic(code(blockflow::invalid_config))]
    InvalidConfig { reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(blockflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(blockflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(blockflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(blockflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for BlockflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for BlockflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for BlockflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for BlockflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl BlockflowError {
    /// Violations carried by a `GraphInvalid` error, empty for anything else
    pub fn violations(&self) -> &[GraphViolation] {
        match self {
            Self::GraphInvalid { violations } => violations,
            _ => &[],
        }
    }
}

/// What a violation points at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ViolationSubject {
    Node(String),
    Edge(String),
}

impl fmt::Display for ViolationSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node '{}'", id),
            Self::Edge(id) => write!(f, "edge '{}'", id),
        }
    }
}

/// Category of a graph violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DuplicateNode,
    UnknownBlock,
    UnknownNode,
    PortOutOfRange,
    PortOverConnected,
    PortUnconnected,
    IncompatibleKinds,
    MixedOutputKinds,
    Cycle,
    Orphaned,
}

/// A single problem found while validating a pipeline graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphViolation {
    pub subject: ViolationSubject,
    pub kind: ViolationKind,
    pub reason: String,
}

impl GraphViolation {
    pub fn node(id: impl Into<String>, kind: ViolationKind, reason: impl Into<String>) -> Self {
        Self {
            subject: ViolationSubject::Node(id.into()),
            kind,
            reason: reason.into(),
        }
    }

    pub fn edge(id: impl Into<String>, kind: ViolationKind, reason: impl Into<String>) -> Self {
        Self {
            subject: ViolationSubject::Edge(id.into()),
            kind,
            reason: reason.into(),
        }
    }

    /// Id of the offending node or edge
    pub fn subject_id(&self) -> &str {
        match &self.subject {
            ViolationSubject::Node(id) | ViolationSubject::Edge(id) => id,
        }
    }
}

impl fmt::Display for GraphViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_invalid_message_counts_violations() {
        let err = BlockflowError::GraphInvalid {
            violations: vec![
                GraphViolation::node("a", ViolationKind::Orphaned, "unreachable"),
                GraphViolation::edge("a.0->b.0", ViolationKind::Cycle, "cycle"),
            ],
        };

        assert_eq!(err.to_string(), "Pipeline graph is invalid (2 violations)");
        assert_eq!(err.violations().len(), 2);
        assert_eq!(err.violations()[1].subject_id(), "a.0->b.0");
    }

    #[test]
    fn test_violation_display() {
        let v = GraphViolation::node("load", ViolationKind::PortUnconnected, "input 0 is unconnected");
        assert_eq!(v.to_string(), "node 'load': input 0 is unconnected");
    }
}
