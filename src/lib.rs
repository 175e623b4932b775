// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! # blockflow - Data Pipeline Orchestrator
//!
//! `blockflow` validates and executes pipelines expressed as DAGs of typed
//! blocks that read and write data in databases and object storage.
//!
//! ## Features
//!
//! - **Typed ports** - `DB_TABLE`, `S3_FILE`, `ML_MODEL` and `TRIGGER` ports must match exactly
//! - **Whole-graph validation** - every violation reported at once, with a suggested fix
//! - **Bounded parallelism** - ready blocks run concurrently up to a configurable limit
//! - **Failure containment** - a failed block skips only what depends on it
//! - **Pluggable executors** - block logic lives behind the [`BlockExecutor`] trait
//!
//! ## Quick Start
//!
//! ```bash
//! # Check a pipeline
//! blockflow validate pipeline.yaml
//!
//! # Run it
//! blockflow run pipeline.yaml --trigger extract='{"day": "2025-01-01"}'
//!
//! # Render it
//! blockflow graph --format mermaid pipeline.yaml
//! ```

pub mod cli;
pub mod engine;
pub mod errors;
pub mod executors;
pub mod pipeline;
pub mod registry;
pub mod utils;

// Re-export commonly used types
pub use engine::{Engine, EngineConfig, ExecutionSnapshot, ExecutionStatus, NodeStatus, TriggerInputs};
pub use errors::{BlockflowError, BlockflowResult};
pub use executors::{BlockExecutor, ExecutionOutcome, ExecutorRegistry, OutputMetadata};
pub use pipeline::{GraphValidator, PipelineDefinition, PipelineGraph};
pub use registry::{BlockRegistry, BlockSpec, PortKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
