// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Pipeline definitions and validated graphs
//!
//! A raw [`PipelineDefinition`] goes through the [`GraphValidator`] to become
//! an immutable [`PipelineGraph`], the only graph type the engine accepts.

mod dag;
mod definition;
mod validation;

pub use dag::{Edge, Node, PipelineGraph};
pub use definition::*;
pub use validation::GraphValidator;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// extract -> transform -> load
    pub(crate) fn linear() -> PipelineDefinition {
        PipelineDefinition {
            name: "linear".into(),
            description: None,
            blocks: vec![],
            nodes: vec![
                NodeDefinition::new("extract", "extract"),
                NodeDefinition::new("transform", "transform"),
                NodeDefinition::new("load", "load"),
            ],
            edges: vec![
                EdgeDefinition::new("extract", 0, "transform", 0),
                EdgeDefinition::new("transform", 0, "load", 0),
            ],
        }
    }

    /// a -> {b, c} -> d, where d joins both branches on a two-input block
    pub(crate) fn diamond() -> PipelineDefinition {
        use crate::registry::{BlockSpec, PortKind};

        PipelineDefinition {
            name: "diamond".into(),
            description: None,
            blocks: vec![BlockSpec::new(
                "join",
                vec![PortKind::S3File, PortKind::S3File],
                vec![PortKind::S3File],
                "file_transform",
            )],
            nodes: vec![
                NodeDefinition::new("a", "extract"),
                NodeDefinition::new("b", "transform"),
                NodeDefinition::new("c", "transform"),
                NodeDefinition::new("d", "join"),
            ],
            edges: vec![
                EdgeDefinition::new("a", 0, "b", 0),
                EdgeDefinition::new("a", 0, "c", 0),
                EdgeDefinition::new("b", 0, "d", 0),
                EdgeDefinition::new("c", 0, "d", 1),
            ],
        }
    }
}
