// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Terminal color utilities
//!
//! Consistent styling of node and execution statuses across the CLI.

use colored::{ColoredString, Colorize};

use crate::engine::{ExecutionStatus, NodeStatus};

/// Status symbol and label for a node
pub fn node_status(status: NodeStatus) -> ColoredString {
    match status {
        NodeStatus::Succeeded => "✓".green(),
        NodeStatus::Failed => "✗".red(),
        NodeStatus::Skipped => "○".dimmed(),
        NodeStatus::Dispatched => "→".blue(),
        NodeStatus::Ready | NodeStatus::Blocked => "·".dimmed(),
    }
}

/// Colored execution status
pub fn execution_status(status: ExecutionStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        ExecutionStatus::Success => label.green().bold(),
        ExecutionStatus::Failed => label.red().bold(),
        ExecutionStatus::Running => label.blue(),
        ExecutionStatus::Pending => label.dimmed(),
    }
}

/// Print a styled header
pub fn print_header(title: &str) {
    println!("{}", title.bold());
    println!("{}", "═".repeat(title.len().max(40)));
}

/// Print a warning
pub fn print_warning(msg: &str) {
    eprintln!("  {} {}", "⚠".yellow(), msg);
}
