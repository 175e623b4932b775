// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Run command - execute a pipeline

use colored::Colorize;
use miette::Result;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::validate::print_violations;
use crate::engine::{Engine, EngineConfig, ExecutionSnapshot, ExecutionStatus, NodeStatus, TriggerInputs};
use crate::errors::BlockflowError;
use crate::executors::{create_default_executors, ExecutorRegistry};
use crate::pipeline::{GraphValidator, PipelineDefinition, PipelineGraph};
use crate::registry::BlockRegistry;
use crate::utils::{execution_status, node_status, print_header, print_warning, RunProgress};

/// Options for the run command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: Option<PathBuf>,
    pub max_in_flight: Option<usize>,
    pub triggers: Vec<String>,
    pub dry_run: bool,
    pub verbose: bool,
}

/// Run the pipeline
pub async fn run(pipeline_path: PathBuf, options: RunOptions) -> Result<()> {
    let definition = PipelineDefinition::from_file(&pipeline_path)?;

    let graph = match GraphValidator::new(BlockRegistry::builtin()).validate(&definition) {
        Ok(graph) => Arc::new(graph),
        Err(BlockflowError::GraphInvalid { violations }) => {
            eprintln!("{}", "Pipeline validation failed:".red().bold());
            print_violations(&violations);
            return Err(BlockflowError::GraphInvalid { violations }.into());
        }
        Err(e) => return Err(e.into()),
    };

    let mut config = match &options.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(max) = options.max_in_flight {
        config = config.with_max_in_flight(max);
    }
    let triggers = parse_triggers(&options.triggers)?;

    print_plan(&graph, &config);

    if options.dry_run {
        println!();
        println!("{}", "Dry run: nothing executed".yellow());
        return Ok(());
    }

    let executors = create_default_executors();
    preflight(&graph, &executors).await?;

    let log_tail = config.log_tail_lines;
    let engine = Engine::new(config, executors)?;
    let id = engine.start(Arc::clone(&graph), triggers).await?;
    tracing::info!(execution = %id, "started execution");

    let snapshot = follow(&engine, id, graph.len()).await?;
    report(&snapshot, log_tail, options.verbose);

    match snapshot.execution.status {
        ExecutionStatus::Success => Ok(()),
        _ => Err(miette::miette!(
            "Pipeline execution failed: {}",
            snapshot.execution.reason.as_deref().unwrap_or("unknown reason")
        )),
    }
}

/// Parse `NODE=JSON` pairs; a value that is not JSON is taken as a string
fn parse_triggers(raw: &[String]) -> Result<TriggerInputs> {
    let mut triggers = TriggerInputs::new();
    for entry in raw {
        let (node, value) = entry
            .split_once('=')
            .ok_or_else(|| miette::miette!("Invalid trigger '{}': expected NODE=JSON", entry))?;
        let payload =
            serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        triggers.insert(node.trim().to_string(), payload);
    }
    Ok(triggers)
}

fn print_plan(graph: &PipelineGraph, config: &EngineConfig) {
    print_header(&format!("Pipeline: {}", graph.name()));
    if let Some(description) = graph.description() {
        println!("{}", description.dimmed());
    }
    println!(
        "{}",
        format!("version {} · max {} in flight", graph.version(), config.max_in_flight).dimmed()
    );
    println!();
    for line in graph.to_text().lines() {
        println!("  {}", line);
    }
    println!();
}

/// Refuse to start when a block's execution kind has no executor here
async fn preflight(graph: &PipelineGraph, executors: &ExecutorRegistry) -> Result<()> {
    let kinds: BTreeSet<&str> = graph.nodes().iter().map(|n| n.spec.execution_kind.as_str()).collect();

    let mut missing = Vec::new();
    for kind in kinds {
        let Some(executor) = executors.get(kind) else {
            missing.push(kind);
            continue;
        };
        if !executor.check_available().await {
            print_warning(&format!("executor for '{}' is not available on this host", kind));
        }
    }

    if missing.is_empty() {
        return Ok(());
    }

    eprintln!("{}", "Missing executors:".red().bold());
    for kind in &missing {
        eprintln!("  {} {}", "✗".red(), kind);
    }
    eprintln!(
        "    Only {} blocks run from the command line; embed the engine to register others",
        executors.kinds().join(", ").cyan()
    );
    Err(BlockflowError::DispatchUnavailable {
        kind: missing.join(", "),
    }
    .into())
}

/// Poll the execution until it finishes, cancelling it on Ctrl-C
async fn follow(engine: &Engine, id: crate::engine::ExecutionId, total: usize) -> Result<ExecutionSnapshot> {
    let progress = RunProgress::new(total);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                engine.cancel(id, "interrupted by user").await?;
            }
        }

        let snapshot = engine.status(id).await?;
        progress.update(&snapshot);
        if snapshot.execution.status.is_terminal() {
            break;
        }
    }

    progress.finish();
    Ok(engine.wait(id).await?)
}

fn report(snapshot: &ExecutionSnapshot, log_tail: usize, verbose: bool) {
    println!("{}:", "Results".bold());

    for node in &snapshot.nodes {
        let mut line = format!("  {} {}", node_status(node.status), node.node_id);
        if let Some(cause) = &node.skip_cause {
            line.push_str(&format!(" ({})", cause).dimmed().to_string());
        }
        println!("{}", line);

        let Some(task) = &node.task else { continue };
        let show = verbose || node.status == NodeStatus::Failed;
        if !show {
            continue;
        }

        let skip = task.logs.len().saturating_sub(log_tail);
        for log in &task.logs[skip..] {
            println!("      {}", log.dimmed());
        }
        if let Some(output) = &task.task.output {
            println!("      {} {} {}", "output".cyan(), output.kind, output.payload);
        }
    }

    println!();
    println!("Execution {}: {}", snapshot.execution.id, execution_status(snapshot.execution.status));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_triggers() {
        let triggers = parse_triggers(&["extract={\"day\":1}".into(), "other=plain".into()]).unwrap();

        assert_eq!(triggers["extract"], json!({ "day": 1 }));
        assert_eq!(triggers["other"], json!("plain"));
        assert!(parse_triggers(&["missing-separator".into()]).is_err());
    }
}
