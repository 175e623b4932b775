// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Shell executor
//!
//! Runs a node's `command` through a shell. Upstream fragments arrive as
//! `BLOCKFLOW_INPUT_<port>` environment variables holding the JSON payload,
//! and the command declares its output by printing a line of the form
//! `::output {"kind": "S3_FILE", "payload": ...}` on stdout.

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{BlockExecutor, ExecutionOutcome, OutputMetadata, TaskContext, TaskInput};
use crate::engine::LogSink;

const OUTPUT_PREFIX: &str = "::output ";

#[derive(Debug, Deserialize)]
struct ShellConfig {
    command: String,
    shell: Option<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
}

/// Shell executor
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    default_shell: String,
}

impl ShellExecutor {
    /// Create a new shell executor using bash
    pub fn new() -> Self {
        Self::with_shell("bash")
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            default_shell: shell.into(),
        }
    }

    fn command(&self, config: &ShellConfig, input: &TaskInput) -> anyhow::Result<Command> {
        let shell = config.shell.as_deref().unwrap_or(&self.default_shell);

        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(&config.command)
            .envs(&config.env)
            .env("BLOCKFLOW_EXECUTION_ID", input.execution_id.to_string())
            .env("BLOCKFLOW_NODE_ID", &input.node_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (port, fragment) in &input.inputs {
            let payload = serde_json::to_string(&fragment.payload())?;
            cmd.env(format!("BLOCKFLOW_INPUT_{}", port), payload);
        }
        if let Some(trigger) = &input.trigger {
            cmd.env("BLOCKFLOW_TRIGGER", trigger.to_string());
        }
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        Ok(cmd)
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlockExecutor for ShellExecutor {
    async fn execute(&self, input: TaskInput, ctx: TaskContext) -> anyhow::Result<ExecutionOutcome> {
        let config: ShellConfig = serde_json::from_value(input.config.clone())
            .with_context(|| format!("invalid shell configuration for node '{}'", input.node_id))?;

        if config.command.trim().is_empty() {
            return Ok(ExecutionOutcome::failure("shell command is empty"));
        }

        let mut child = self
            .command(&config, &input)?
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", config.shell.as_deref().unwrap_or(&self.default_shell)))?;

        let stdout = child.stdout.take().context("stdout was not captured")?;
        let stderr = child.stderr.take().context("stderr was not captured")?;

        let stderr_log = ctx.log.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_log.line(line);
            }
        });

        let mut output = None;
        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = ctx.cancel.cancelled() => {
                    child.kill().await?;
                    return Ok(ExecutionOutcome::failure("command killed after cancellation"));
                }
            };
            let Some(line) = line else { break };

            match line.strip_prefix(OUTPUT_PREFIX) {
                Some(declared) => match serde_json::from_str::<OutputMetadata>(declared.trim()) {
                    Ok(meta) => output = Some(meta),
                    Err(e) => ctx.log.line(format!("ignoring malformed output declaration: {}", e)),
                },
                None => ctx.log.line(line),
            }
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = ctx.cancel.cancelled() => {
                child.kill().await?;
                return Ok(ExecutionOutcome::failure("command killed after cancellation"));
            }
        };
        join_reader(stderr_task, &ctx.log).await;

        if status.success() {
            Ok(ExecutionOutcome::success(format!("command finished ({})", status), output))
        } else {
            Ok(ExecutionOutcome::failure(format!("command failed ({})", status)))
        }
    }

    async fn check_available(&self) -> bool {
        which::which(&self.default_shell).is_ok()
    }
}

/// Wait for a stream reader; a reader that died is noted in the task log
async fn join_reader(reader: JoinHandle<()>, log: &LogSink) {
    if let Err(e) = reader.await {
        tracing::warn!("stderr reader failed: {}", e);
        log.line(format!("stderr capture incomplete: {}", e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{InputFragment, LogSink, TaskLog};
    use crate::registry::PortKind;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn input(config: serde_json::Value) -> TaskInput {
        TaskInput {
            execution_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            node_id: "step".into(),
            block: "shell".into(),
            config,
            inputs: BTreeMap::new(),
            trigger: None,
        }
    }

    fn context() -> (TaskContext, Arc<TaskLog>) {
        let log = TaskLog::new();
        let ctx = TaskContext {
            cancel: CancellationToken::new(),
            log: LogSink::new(Arc::clone(&log)),
        };
        (ctx, log)
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let (ctx, log) = context();
        let outcome = ShellExecutor::new()
            .execute(input(json!({ "command": "echo hello; echo oops >&2" })), ctx)
            .await
            .unwrap();

        assert!(outcome.is_success());
        let lines = log.lines();
        assert!(lines.contains(&"hello".to_string()));
        assert!(lines.contains(&"oops".to_string()));
    }

    #[tokio::test]
    async fn test_output_declaration_and_inputs() {
        let mut task = input(json!({
            "command": "echo \"::output {\\\"kind\\\":\\\"DB_TABLE\\\",\\\"payload\\\":$BLOCKFLOW_INPUT_0}\""
        }));
        task.inputs.insert(
            0,
            InputFragment {
                port: 0,
                kind: PortKind::S3File,
                source: "up".into(),
                metadata: Some(Arc::new(OutputMetadata::new(PortKind::S3File, json!("s3://b/k")))),
            },
        );
        let (ctx, log) = context();

        let outcome = ShellExecutor::new().execute(task, ctx).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.output, Some(OutputMetadata::new(PortKind::DbTable, json!("s3://b/k"))));
        assert!(log.lines().is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let (ctx, _) = context();
        let outcome = ShellExecutor::new()
            .execute(input(json!({ "command": "exit 3" })), ctx)
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert!(outcome.logs.contains('3'));
    }

    #[tokio::test]
    async fn test_missing_command_is_a_fault() {
        let (ctx, _) = context();
        assert!(ShellExecutor::new().execute(input(json!({})), ctx).await.is_err());

        let (ctx, _) = context();
        let outcome = ShellExecutor::new()
            .execute(input(json!({ "command": "  " })), ctx)
            .await
            .unwrap();
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_cancel_kills_command() {
        let (ctx, _) = context();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            ShellExecutor::new().execute(input(json!({ "command": "sleep 30" })), ctx),
        )
        .await
        .expect("command was not killed")
        .unwrap();

        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_check_available() {
        assert!(ShellExecutor::new().check_available().await);
        assert!(!ShellExecutor::with_shell("definitely-not-a-shell-xyz").check_available().await);
    }

    #[tokio::test]
    async fn test_failed_stderr_reader_is_logged() {
        let (ctx, log) = context();
        let reader = tokio::spawn(async { panic!("reader broke") });

        join_reader(reader, &ctx.log).await;

        let lines = log.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("stderr capture incomplete"));
        assert!(lines[0].contains("panic"));
    }
}
