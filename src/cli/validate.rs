// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Validate command - check a pipeline definition

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::errors::{BlockflowError, GraphViolation, RecoverySuggestion};
use crate::pipeline::{GraphValidator, PipelineDefinition};
use crate::registry::BlockRegistry;

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let definition = match PipelineDefinition::from_file(&pipeline_path) {
        Ok(d) => d,
        Err(e @ BlockflowError::PipelineNotFound { .. }) => return Err(e.into()),
        Err(e) => {
            eprintln!("  {} Failed to parse pipeline", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };

    println!("  {} Pipeline file parsed", "✓".green());

    let validator = GraphValidator::new(BlockRegistry::builtin());
    let graph = match validator.validate(&definition) {
        Ok(graph) => graph,
        Err(BlockflowError::GraphInvalid { violations }) => {
            print_violations(&violations);
            println!();
            return Err(BlockflowError::GraphInvalid { violations }.into());
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "  {} {} nodes, {} edges, types and ports check out",
        "✓".green(),
        graph.len(),
        graph.edges().len()
    );

    if verbose {
        println!();
        println!("{}:", "Execution order".bold());
        for line in graph.to_text().lines() {
            println!("  {}", line);
        }
        println!();
        println!("  Version: {}", graph.version().dimmed());
    }

    println!();
    println!("{}", "Pipeline is valid!".green().bold());
    Ok(())
}

/// Print each violation with a suggested fix
pub(crate) fn print_violations(violations: &[GraphViolation]) {
    println!();
    println!("{}:", "Errors".red().bold());
    for violation in violations {
        println!("  {} {}", "✗".red(), violation);
        for line in RecoverySuggestion::for_violation(violation).to_string().lines() {
            println!("    {}", line.dimmed());
        }
    }
}
