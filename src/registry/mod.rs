// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Type registry
//!
//! Port kinds, the compatibility rule between them, and the catalog of
//! block specifications a pipeline may select from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::BlockflowError;

/// Data kind carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PortKind {
    /// A table in a relational database
    DbTable,
    /// An object in object storage
    S3File,
    /// A trained model artifact
    MlModel,
    /// Start signal without payload
    Trigger,
}

impl PortKind {
    pub const ALL: [PortKind; 4] = [Self::DbTable, Self::S3File, Self::MlModel, Self::Trigger];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DbTable => "DB_TABLE",
            Self::S3File => "S3_FILE",
            Self::MlModel => "ML_MODEL",
            Self::Trigger => "TRIGGER",
        }
    }

    /// Whether values of this kind carry a payload
    pub fn carries_payload(&self) -> bool {
        !matches!(self, Self::Trigger)
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an output port of `output` kind may feed an input port of `input` kind.
///
/// Kinds must match exactly. Crossing stores takes an explicit block
/// (e.g. `db_load`), never an implicit coercion.
pub fn is_compatible(output: PortKind, input: PortKind) -> bool {
    output == input
}

/// Static descriptor of a block type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSpec {
    /// Block identifier referenced by pipeline nodes
    pub id: String,

    /// Input port kinds, by port index
    #[serde(default)]
    pub inputs: Vec<PortKind>,

    /// Output port kinds, by port index
    #[serde(default)]
    pub outputs: Vec<PortKind>,

    /// Tag selecting the executor that runs this block
    pub execution_kind: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BlockSpec {
    pub fn new(
        id: impl Into<String>,
        inputs: Vec<PortKind>,
        outputs: Vec<PortKind>,
        execution_kind: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            inputs,
            outputs,
            execution_kind: execution_kind.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn input(&self, port: usize) -> Option<PortKind> {
        self.inputs.get(port).copied()
    }

    pub fn output(&self, port: usize) -> Option<PortKind> {
        self.outputs.get(port).copied()
    }

    /// Short signature such as `S3_FILE -> DB_TABLE`
    pub fn signature(&self) -> String {
        fn join(kinds: &[PortKind]) -> String {
            if kinds.is_empty() {
                "()".to_string()
            } else {
                kinds.iter().map(PortKind::as_str).collect::<Vec<_>>().join(", ")
            }
        }
        format!("{} -> {}", join(&self.inputs), join(&self.outputs))
    }
}

/// Catalog of block specifications keyed by id
#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    blocks: BTreeMap<String, Arc<BlockSpec>>,
}

impl BlockRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the stock block catalog
    pub fn builtin() -> Self {
        use PortKind::*;

        let mut registry = Self::new();
        let stock = [
            BlockSpec::new("extract", vec![Trigger], vec![S3File], "extract")
                .with_description("Pull source data into object storage"),
            BlockSpec::new("transform", vec![S3File], vec![S3File], "file_transform")
                .with_description("Rewrite a file in object storage"),
            BlockSpec::new("load", vec![S3File], vec![DbTable], "db_load")
                .with_description("Load a file into a database table"),
            BlockSpec::new("db_load", vec![S3File], vec![DbTable], "db_load")
                .with_description("Copy an object-storage file into a database table"),
            BlockSpec::new("db_unload", vec![DbTable], vec![S3File], "db_unload")
                .with_description("Export a database table to object storage"),
            BlockSpec::new("sql", vec![DbTable], vec![DbTable], "sql")
                .with_description("Run a query pushed down into the database"),
            BlockSpec::new("train_model", vec![S3File], vec![MlModel], "model_training")
                .with_description("Train a model from a dataset file"),
            BlockSpec::new("predict", vec![MlModel, S3File], vec![S3File], "model_inference")
                .with_description("Score a dataset file with a trained model"),
            BlockSpec::new("shell", vec![Trigger], vec![Trigger], "shell")
                .with_description("Run a shell command"),
        ];

        for spec in stock {
            registry.blocks.insert(spec.id.clone(), Arc::new(spec));
        }

        registry
    }

    /// Register a new block specification
    pub fn register(&mut self, spec: BlockSpec) -> Result<Arc<BlockSpec>, BlockflowError> {
        if self.blocks.contains_key(&spec.id) {
            return Err(BlockflowError::DuplicateBlock { block: spec.id });
        }
        let spec = Arc::new(spec);
        self.blocks.insert(spec.id.clone(), Arc::clone(&spec));
        Ok(spec)
    }

    /// Look up a block by id
    pub fn get(&self, id: &str) -> Option<Arc<BlockSpec>> {
        self.blocks.get(id).cloned()
    }

    /// All blocks ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Arc<BlockSpec>> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
