// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Blocks command - list the block catalog

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

use super::OutputFormat;
use crate::executors::create_default_executors;
use crate::pipeline::PipelineDefinition;
use crate::registry::BlockRegistry;

/// Run the blocks command
pub async fn run(pipeline: Option<PathBuf>, format: OutputFormat, verbose: bool) -> Result<()> {
    let registry = match pipeline {
        Some(path) => PipelineDefinition::from_file(&path)?.registry(&BlockRegistry::builtin())?,
        None => BlockRegistry::builtin(),
    };

    if format == OutputFormat::Json {
        let specs: Vec<_> = registry.iter().map(|spec| spec.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&specs).into_diagnostic()?);
        return Ok(());
    }

    let executors = create_default_executors();
    let width = registry.iter().map(|spec| spec.id.len()).max().unwrap_or(0);

    println!("{}", "Blocks".bold());
    println!("{}", "═".repeat(40));
    for spec in registry.iter() {
        let kind = if executors.contains(&spec.execution_kind) {
            spec.execution_kind.green()
        } else {
            spec.execution_kind.dimmed()
        };
        println!("  {:width$}  {:<28} {}", spec.id.cyan(), spec.signature(), kind, width = width);

        if verbose {
            if let Some(description) = &spec.description {
                println!("  {:width$}  {}", "", description.dimmed(), width = width);
            }
        }
    }

    println!();
    println!(
        "{} execution kinds with a built-in executor are shown in {}",
        "→".blue(),
        "green".green()
    );

    Ok(())
}
