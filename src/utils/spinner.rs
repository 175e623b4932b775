// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Progress indicator for a running execution

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::engine::ExecutionSnapshot;

/// Progress bar counting finished nodes of one execution
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.blue} [{bar:30.cyan/blue}] {pos}/{len} {msg}") {
            bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ").progress_chars("█▓░"));
        }
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    /// Reflect a snapshot: finished nodes and the ones currently running
    pub fn update(&self, snapshot: &ExecutionSnapshot) {
        let finished = snapshot.nodes.iter().filter(|n| n.status.is_terminal()).count();
        self.bar.set_position(finished as u64);
        self.bar.set_message(running_message(snapshot));
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}

fn running_message(snapshot: &ExecutionSnapshot) -> String {
    let running: Vec<&str> = snapshot
        .nodes
        .iter()
        .filter(|n| n.status == crate::engine::NodeStatus::Dispatched)
        .map(|n| n.node_id.as_str())
        .collect();

    if running.is_empty() {
        String::new()
    } else {
        format!("running: {}", running.join(", "))
    }
}
