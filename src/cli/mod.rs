// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for blockflow.

pub mod blocks;
pub mod graph;
pub mod run;
pub mod validate;

use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand};
use miette::Result;
use std::path::{Path, PathBuf};

use crate::pipeline::{GraphValidator, PipelineDefinition, PipelineGraph};
use crate::registry::BlockRegistry;

/// Data pipeline orchestrator
///
/// Validate and run typed DAGs of blocks spanning databases and object storage.
#[derive(Parser, Debug)]
#[clap(
    name = "blockflow",
    version,
    about = "Orchestrate typed data-pipeline DAGs across databases and object storage",
    long_about = None,
    after_help = "Examples:\n\
        blockflow validate pipeline.yaml          Check types, ports and acyclicity\n\
        blockflow run pipeline.yaml               Execute the pipeline\n\
        blockflow graph -f mermaid pipeline.yaml  Render the DAG\n\
        blockflow blocks                          List available blocks\n\n\
        See 'blockflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a pipeline definition
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = "pipeline.yaml")]
        pipeline: PathBuf,
    },

    /// Run a pipeline
    Run {
        /// Pipeline file
        #[clap(default_value = "pipeline.yaml")]
        pipeline: PathBuf,

        /// Engine configuration file (TOML)
        #[clap(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Maximum tasks in flight (overrides the config file)
        #[clap(short = 'j', long)]
        max_in_flight: Option<usize>,

        /// Trigger payload for a node, as NODE=JSON (repeatable)
        #[clap(short, long, value_name = "NODE=JSON")]
        trigger: Vec<String>,

        /// Dry run (show the execution plan only)
        #[clap(long)]
        dry_run: bool,
    },

    /// Show pipeline as a graph
    Graph {
        /// Pipeline file
        #[clap(default_value = "pipeline.yaml")]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, default_value = "text", value_parser = clap::builder::PossibleValuesParser::new(["text", "dot", "mermaid"]).map(|s| s.parse::<GraphFormat>().unwrap()))]
        format: GraphFormat,
    },

    /// List the block catalog
    Blocks {
        /// Also include blocks declared in this pipeline file
        #[clap(short, long)]
        pipeline: Option<PathBuf>,

        /// Output format
        #[clap(short, long, default_value = "text", value_parser = clap::builder::PossibleValuesParser::new(["text", "json"]).map(|s| s.parse::<OutputFormat>().unwrap()))]
        format: OutputFormat,
    },
}

/// Output format for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}

/// Load and validate a pipeline against the built-in catalog
pub(crate) fn load_graph(path: &Path) -> Result<(PipelineDefinition, PipelineGraph)> {
    let definition = PipelineDefinition::from_file(path)?;
    let graph = GraphValidator::new(BlockRegistry::builtin()).validate(&definition)?;
    Ok((definition, graph))
}
