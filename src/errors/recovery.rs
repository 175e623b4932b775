// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Recovery suggestions for graph violations
//!
//! Maps each violation category to an actionable fix for the CLI.

use super::{GraphViolation, ViolationKind};

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Suggest a fix for a single graph violation
    pub fn for_violation(violation: &GraphViolation) -> Self {
        let subject = violation.subject_id();

        match violation.kind {
            ViolationKind::DuplicateNode => Self {
                action: format!("Rename one of the nodes called '{}'", subject),
                steps: vec!["Node ids must be unique within a pipeline".into()],
                commands: vec![],
            },
            ViolationKind::UnknownBlock => Self {
                action: "Use a registered block or declare it under 'blocks:'".into(),
                steps: vec![
                    format!("Node '{}' selects a block that is not in the catalog", subject),
                    "Custom blocks must list their input and output port kinds".into(),
                ],
                commands: vec!["# List available blocks:".into(), "blockflow blocks".into()],
            },
            ViolationKind::UnknownNode => Self {
                action: format!("Fix the endpoints of edge '{}'", subject),
                steps: vec!["Both 'source' and 'target' must name nodes of this pipeline".into()],
                commands: vec![],
            },
            ViolationKind::PortOutOfRange => Self {
                action: format!("Fix the port index on edge '{}'", subject),
                steps: vec!["Port indices are zero-based positions in the block's port list".into()],
                commands: vec!["# Show port lists per block:".into(), "blockflow blocks".into()],
            },
            ViolationKind::PortOverConnected => Self {
                action: format!("Keep a single incoming edge per input port of '{}'", subject),
                steps: vec![
                    "Each input port accepts exactly one upstream edge".into(),
                    "Route extra sources through a block that combines them".into(),
                ],
                commands: vec![],
            },
            ViolationKind::PortUnconnected => Self {
                action: format!("Connect every data input of '{}'", subject),
                steps: vec!["Only TRIGGER inputs may be left unconnected".into()],
                commands: vec![],
            },
            ViolationKind::IncompatibleKinds => Self {
                action: "Insert an explicit conversion block".into(),
                steps: vec![
                    format!("Edge '{}' joins ports of different kinds", subject),
                    "Store crossings need a block such as 'db_load' (S3_FILE -> DB_TABLE) \
                     or 'db_unload' (DB_TABLE -> S3_FILE)"
                        .into(),
                ],
                commands: vec![],
            },
            ViolationKind::MixedOutputKinds => Self {
                action: format!("Give every connected output of '{}' the same kind", subject),
                steps: vec![
                    "A task reports a single output, so it can only satisfy one payload kind".into(),
                    "Split the block into one block per output kind".into(),
                ],
                commands: vec![],
            },
            ViolationKind::Cycle => Self {
                action: "Remove the circular dependency".into(),
                steps: vec![
                    violation.reason.clone(),
                    "Ensure edges form a directed acyclic graph (DAG)".into(),
                ],
                commands: vec![
                    "# Visualize your pipeline:".into(),
                    "blockflow graph --format mermaid <pipeline>".into(),
                ],
            },
            ViolationKind::Orphaned => Self {
                action: format!("Connect '{}' to the rest of the pipeline", subject),
                steps: vec!["Every node must be reachable from a node with no incoming edges".into()],
                commands: vec![],
            },
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incompatible_kinds_suggests_conversion_block() {
        let v = GraphViolation::edge("a.0->b.0", ViolationKind::IncompatibleKinds, "DB_TABLE -> ML_MODEL");
        let suggestion = RecoverySuggestion::for_violation(&v);

        assert!(suggestion.action.contains("conversion"));
        assert!(suggestion.to_string().contains("db_load"));
    }
}
