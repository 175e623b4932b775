// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Pipeline definition structures
//!
//! The raw node/edge structure handed over by the editing surface. Nothing
//! here is trusted: a definition only becomes runnable after the
//! [`GraphValidator`](super::GraphValidator) turns it into a `PipelineGraph`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::BlockflowError;
use crate::registry::{BlockRegistry, BlockSpec};

/// Pipeline definition loaded from a YAML or JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Block types declared by this pipeline in addition to the catalog
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<BlockSpec>,

    /// Nodes of the graph
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,

    /// Edges between node ports
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl PipelineDefinition {
    /// Load a definition from a file, picking the format from its extension
    pub fn from_file(path: &Path) -> Result<Self, BlockflowError> {
        if !path.exists() {
            return Err(BlockflowError::PipelineNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BlockflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse a definition from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self, BlockflowError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse a definition from JSON
    pub fn from_json(json: &str) -> Result<Self, BlockflowError> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String, BlockflowError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Catalog for this pipeline: `base` plus the blocks declared inline
    pub fn registry(&self, base: &BlockRegistry) -> Result<BlockRegistry, BlockflowError> {
        let mut registry = base.clone();
        for spec in &self.blocks {
            registry.register(spec.clone())?;
        }
        Ok(registry)
    }

    /// Get a node by id
    pub fn get_node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A node selecting a block and carrying its configuration payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Node id (must be unique within the pipeline)
    pub id: String,

    /// Id of the selected block spec
    pub block: String,

    /// Block-specific configuration, passed to the executor untouched
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, block: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            block: block.into(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// An edge from an output port to an input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    /// Optional explicit id, used in error reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Source node id
    pub source: String,

    /// Output port index on the source node
    #[serde(default)]
    pub output: usize,

    /// Target node id
    pub target: String,

    /// Input port index on the target node
    #[serde(default)]
    pub input: usize,
}

impl EdgeDefinition {
    pub fn new(source: impl Into<String>, output: usize, target: impl Into<String>, input: usize) -> Self {
        Self {
            id: None,
            source: source.into(),
            output,
            target: target.into(),
            input,
        }
    }

    /// Id used to cite this edge: the explicit one, or `source.out->target.in`
    pub fn display_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}.{}->{}.{}", self.source, self.output, self.target, self.input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PortKind;

    const PIPELINE: &str = r#"
name: nightly
blocks:
  - id: score
    inputs: [ML_MODEL]
    outputs: [S3_FILE]
    execution_kind: shell
nodes:
  - id: extract
    block: extract
    config:
      bucket: raw
  - id: load
    block: load
edges:
  - source: extract
    target: load
"#;

    #[test]
    fn test_parse_yaml() {
        let def = PipelineDefinition::from_yaml(PIPELINE).unwrap();

        assert_eq!(def.name, "nightly");
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.get_node("extract").unwrap().config["bucket"], "raw");
        assert_eq!(def.edges[0].output, 0);
        assert_eq!(def.edges[0].display_id(), "extract.0->load.0");
        assert_eq!(def.blocks[0].inputs, vec![PortKind::MlModel]);
    }

    #[test]
    fn test_registry_merges_inline_blocks() {
        let def = PipelineDefinition::from_yaml(PIPELINE).unwrap();
        let registry = def.registry(&BlockRegistry::builtin()).unwrap();

        assert!(registry.get("score").is_some());
        assert!(registry.get("extract").is_some());
    }

    #[test]
    fn test_inline_block_cannot_shadow_catalog() {
        let mut def = PipelineDefinition::from_yaml(PIPELINE).unwrap();
        def.blocks.push(BlockSpec::new("sql", vec![], vec![], "shell"));

        assert!(matches!(
            def.registry(&BlockRegistry::builtin()),
            Err(BlockflowError::DuplicateBlock { .. })
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let result = PipelineDefinition::from_file(Path::new("/nonexistent/pipeline.yaml"));
        assert!(matches!(result, Err(BlockflowError::PipelineNotFound { .. })));
    }
}
