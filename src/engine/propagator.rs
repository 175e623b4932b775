// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Metadata propagation
//!
//! Routes a finished task's output metadata along its outgoing edges into
//! per-port input fragments of the downstream nodes. Payloads are shared by
//! reference and never inspected.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::executors::OutputMetadata;
use crate::pipeline::PipelineGraph;
use crate::registry::PortKind;

/// Input configuration contributed to one input port by one edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputFragment {
    /// Downstream input port index
    pub port: usize,
    /// Kind declared by the input port
    pub kind: PortKind,
    /// Upstream node that produced it
    pub source: String,
    /// Upstream output; `None` for trigger edges
    pub metadata: Option<Arc<OutputMetadata>>,
}

impl InputFragment {
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.metadata.as_ref().map(|m| &m.payload)
    }
}

/// Check that a successful node's output satisfies its outgoing edges.
///
/// Every outgoing edge on a payload-carrying port needs metadata of the
/// edge's kind. Trigger edges need nothing.
pub fn check_output(graph: &PipelineGraph, node: &str, output: Option<&OutputMetadata>) -> Result<(), String> {
    for edge in graph.outgoing(node) {
        if !edge.kind.carries_payload() {
            continue;
        }
        match output {
            None => {
                return Err(format!(
                    "output port {} feeds '{}' but the block produced no output metadata",
                    edge.output, edge.target
                ))
            }
            Some(meta) if meta.kind != edge.kind => {
                return Err(format!(
                    "output port {} is declared {} but the block produced {}",
                    edge.output, edge.kind, meta.kind
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Pending input fragments for the nodes of one execution
#[derive(Debug)]
pub struct MetadataPropagator {
    graph: Arc<PipelineGraph>,
    pending: HashMap<String, BTreeMap<usize, InputFragment>>,
}

impl MetadataPropagator {
    pub fn new(graph: Arc<PipelineGraph>) -> Self {
        Self {
            graph,
            pending: HashMap::new(),
        }
    }

    /// Contribute `node`'s output to every dependent.
    ///
    /// Returns the downstream nodes that received a fragment. A second
    /// fragment for an already-filled port is rejected.
    pub fn propagate(&mut self, node: &str, output: Option<Arc<OutputMetadata>>) -> Result<Vec<String>, String> {
        let graph = Arc::clone(&self.graph);
        let mut touched = Vec::new();

        for edge in graph.outgoing(node) {
            let metadata = if edge.kind.carries_payload() {
                output.clone()
            } else {
                None
            };

            let ports = self.pending.entry(edge.target.clone()).or_default();
            if ports.contains_key(&edge.input) {
                return Err(format!(
                    "input port {} of '{}' already received a fragment",
                    edge.input, edge.target
                ));
            }
            ports.insert(
                edge.input,
                InputFragment {
                    port: edge.input,
                    kind: edge.kind,
                    source: node.to_string(),
                    metadata,
                },
            );
            touched.push(edge.target.clone());
        }

        tracing::debug!(node, downstream = ?touched, "propagated output metadata");
        Ok(touched)
    }

    /// Merged fragments for a node about to be dispatched
    pub fn take_inputs(&mut self, node: &str) -> BTreeMap<usize, InputFragment> {
        self.pending.remove(node).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{diamond, linear};
    use crate::pipeline::GraphValidator;
    use crate::registry::BlockRegistry;
    use serde_json::json;

    fn graph(def: crate::pipeline::PipelineDefinition) -> Arc<PipelineGraph> {
        Arc::new(GraphValidator::new(BlockRegistry::builtin()).validate(&def).unwrap())
    }

    fn s3(uri: &str) -> Arc<OutputMetadata> {
        Arc::new(OutputMetadata::new(PortKind::S3File, json!({ "uri": uri })))
    }

    #[test]
    fn test_fragments_merge_per_port() {
        let mut propagator = MetadataPropagator::new(graph(diamond()));

        propagator.propagate("b", Some(s3("s3://x/b"))).unwrap();
        propagator.propagate("c", Some(s3("s3://x/c"))).unwrap();

        let inputs = propagator.take_inputs("d");
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[&0].source, "b");
        assert_eq!(inputs[&1].payload(), Some(&json!({ "uri": "s3://x/c" })));
        assert!(propagator.take_inputs("d").is_empty());
    }

    #[test]
    fn test_metadata_is_shared_not_copied() {
        let graph = graph(diamond());
        let mut propagator = MetadataPropagator::new(graph);
        let output = s3("s3://x/a");

        propagator.propagate("a", Some(Arc::clone(&output))).unwrap();

        let b = propagator.take_inputs("b");
        let c = propagator.take_inputs("c");
        assert!(Arc::ptr_eq(b[&0].metadata.as_ref().unwrap(), &output));
        assert!(Arc::ptr_eq(c[&0].metadata.as_ref().unwrap(), &output));
    }

    #[test]
    fn test_same_port_twice_is_rejected() {
        let mut propagator = MetadataPropagator::new(graph(linear()));

        propagator.propagate("extract", Some(s3("s3://x/1"))).unwrap();
        assert!(propagator.propagate("extract", Some(s3("s3://x/2"))).is_err());
    }

    #[test]
    fn test_check_output_enforces_declared_kind() {
        let graph = graph(linear());

        assert!(check_output(&graph, "extract", Some(&s3("s3://x"))).is_ok());
        assert!(check_output(&graph, "extract", None).is_err());

        let wrong = OutputMetadata::new(PortKind::DbTable, json!("public.t"));
        assert!(check_output(&graph, "extract", Some(&wrong)).is_err());

        // sink node: nothing downstream to satisfy
        assert!(check_output(&graph, "load", None).is_ok());
    }
}
