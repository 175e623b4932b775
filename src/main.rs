// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! blockflow - Data Pipeline Orchestrator
//!
//! Validate, render and run typed data-pipeline DAGs.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blockflow::cli::run::RunOptions;
use blockflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blockflow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Validate { pipeline } => {
            blockflow::cli::validate::run(pipeline, cli.verbose).await
        }
        Commands::Run {
            pipeline,
            config,
            max_in_flight,
            trigger,
            dry_run,
        } => {
            let options = RunOptions {
                config,
                max_in_flight,
                triggers: trigger,
                dry_run,
                verbose: cli.verbose,
            };
            blockflow::cli::run::run(pipeline, options).await
        }
        Commands::Graph { pipeline, format } => {
            blockflow::cli::graph::run(pipeline, format, cli.verbose).await
        }
        Commands::Blocks { pipeline, format } => {
            blockflow::cli::blocks::run(pipeline, format, cli.verbose).await
        }
    }
}
