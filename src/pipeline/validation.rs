// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Graph validation
//!
//! Turns a raw [`PipelineDefinition`] into a [`PipelineGraph`], or rejects it
//! with every violation found. No check short-circuits another.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::errors::{BlockflowError, GraphViolation, ViolationKind};
use crate::pipeline::{EdgeDefinition, PipelineDefinition, PipelineGraph};
use crate::registry::{is_compatible, BlockRegistry, BlockSpec, PortKind};

/// Validates pipeline definitions against a block catalog
#[derive(Debug, Clone)]
pub struct GraphValidator {
    registry: BlockRegistry,
}

impl GraphValidator {
    pub fn new(registry: BlockRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &BlockRegistry {
        &self.registry
    }

    /// Validate a definition, returning the immutable graph on success.
    ///
    /// Blocks declared inline by the definition are resolved on top of the
    /// validator's catalog.
    pub fn validate(&self, definition: &PipelineDefinition) -> Result<PipelineGraph, BlockflowError> {
        let registry = definition.registry(&self.registry)?;
        let mut violations = Vec::new();

        let specs = resolve_nodes(&registry, definition, &mut violations);
        let (linked, typed) = resolve_edges(definition, &specs, &mut violations);

        check_port_coverage(definition, &specs, &typed, &mut violations);
        check_compatibility(&specs, &typed, &mut violations);
        check_output_kinds(definition, &specs, &typed, &mut violations);
        check_acyclic(definition, &linked, &mut violations);
        check_reachable(definition, &linked, &mut violations);

        if violations.is_empty() {
            tracing::debug!(
                pipeline = %definition.name,
                nodes = definition.nodes.len(),
                edges = definition.edges.len(),
                "pipeline graph validated"
            );
            Ok(PipelineGraph::assemble(definition, &specs))
        } else {
            tracing::debug!(
                pipeline = %definition.name,
                violations = violations.len(),
                "pipeline graph rejected"
            );
            Err(BlockflowError::GraphInvalid { violations })
        }
    }
}

/// Resolve each node's block; flags duplicate ids and unknown blocks
fn resolve_nodes(
    registry: &BlockRegistry,
    definition: &PipelineDefinition,
    violations: &mut Vec<GraphViolation>,
) -> HashMap<String, Arc<BlockSpec>> {
    let mut seen = HashSet::new();
    let mut specs = HashMap::new();

    for node in &definition.nodes {
        if !seen.insert(node.id.as_str()) {
            violations.push(GraphViolation::node(
                &node.id,
                ViolationKind::DuplicateNode,
                format!("node id '{}' is used more than once", node.id),
            ));
            continue;
        }

        match registry.get(&node.block) {
            Some(spec) => {
                specs.insert(node.id.clone(), spec);
            }
            None => violations.push(GraphViolation::node(
                &node.id,
                ViolationKind::UnknownBlock,
                format!("block '{}' is not registered", node.block),
            )),
        }
    }

    specs
}

/// Split edges into those joining known nodes (`linked`) and those whose
/// port indices also resolve against both blocks (`typed`).
fn resolve_edges<'a>(
    definition: &'a PipelineDefinition,
    specs: &HashMap<String, Arc<BlockSpec>>,
    violations: &mut Vec<GraphViolation>,
) -> (Vec<&'a EdgeDefinition>, Vec<&'a EdgeDefinition>) {
    let known: HashSet<&str> = definition.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut linked = Vec::new();
    let mut typed = Vec::new();

    for edge in &definition.edges {
        let mut endpoints_ok = true;
        for endpoint in [&edge.source, &edge.target] {
            if !known.contains(endpoint.as_str()) {
                endpoints_ok = false;
                violations.push(GraphViolation::edge(
                    edge.display_id(),
                    ViolationKind::UnknownNode,
                    format!("edge references unknown node '{}'", endpoint),
                ));
            }
        }
        if !endpoints_ok {
            continue;
        }
        linked.push(edge);

        let (Some(source), Some(target)) = (specs.get(&edge.source), specs.get(&edge.target)) else {
            continue;
        };

        let mut ports_ok = true;
        if edge.output >= source.outputs.len() {
            ports_ok = false;
            violations.push(GraphViolation::edge(
                edge.display_id(),
                ViolationKind::PortOutOfRange,
                format!(
                    "output port {} does not exist on '{}' (block '{}' has {})",
                    edge.output,
                    edge.source,
                    source.id,
                    source.outputs.len()
                ),
            ));
        }
        if edge.input >= target.inputs.len() {
            ports_ok = false;
            violations.push(GraphViolation::edge(
                edge.display_id(),
                ViolationKind::PortOutOfRange,
                format!(
                    "input port {} does not exist on '{}' (block '{}' has {})",
                    edge.input,
                    edge.target,
                    target.id,
                    target.inputs.len()
                ),
            ));
        }
        if ports_ok {
            typed.push(edge);
        }
    }

    (linked, typed)
}

/// Each input port has at most one incoming edge; data ports exactly one
fn check_port_coverage(
    definition: &PipelineDefinition,
    specs: &HashMap<String, Arc<BlockSpec>>,
    typed: &[&EdgeDefinition],
    violations: &mut Vec<GraphViolation>,
) {
    let mut coverage: HashMap<(&str, usize), Vec<String>> = HashMap::new();
    for edge in typed {
        coverage
            .entry((edge.target.as_str(), edge.input))
            .or_default()
            .push(edge.display_id());
    }

    let mut checked = HashSet::new();
    for node in &definition.nodes {
        if !checked.insert(node.id.as_str()) {
            continue;
        }
        let Some(spec) = specs.get(&node.id) else {
            continue;
        };

        for (port, kind) in spec.inputs.iter().enumerate() {
            let edges = coverage.get(&(node.id.as_str(), port));
            match edges.map(Vec::len).unwrap_or(0) {
                0 if *kind != PortKind::Trigger => violations.push(GraphViolation::node(
                    &node.id,
                    ViolationKind::PortUnconnected,
                    format!("input port {} ({}) is not connected", port, kind),
                )),
                n if n > 1 => violations.push(GraphViolation::node(
                    &node.id,
                    ViolationKind::PortOverConnected,
                    format!(
                        "input port {} ({}) is connected {} times: {}",
                        port,
                        kind,
                        n,
                        edges.map(|e| e.join(", ")).unwrap_or_default()
                    ),
                )),
                _ => {}
            }
        }
    }
}

/// Output and input kinds of every edge agree
fn check_compatibility(
    specs: &HashMap<String, Arc<BlockSpec>>,
    typed: &[&EdgeDefinition],
    violations: &mut Vec<GraphViolation>,
) {
    for edge in typed {
        let output = specs[&edge.source].outputs[edge.output];
        let input = specs[&edge.target].inputs[edge.input];

        if !is_compatible(output, input) {
            violations.push(GraphViolation::edge(
                edge.display_id(),
                ViolationKind::IncompatibleKinds,
                format!(
                    "output {} of '{}' cannot feed input {} of '{}'",
                    output, edge.source, input, edge.target
                ),
            ));
        }
    }
}

/// Connected payload outputs of one node share a kind; a task reports a
/// single output which must satisfy all of them
fn check_output_kinds(
    definition: &PipelineDefinition,
    specs: &HashMap<String, Arc<BlockSpec>>,
    typed: &[&EdgeDefinition],
    violations: &mut Vec<GraphViolation>,
) {
    let mut connected: HashMap<&str, BTreeMap<usize, PortKind>> = HashMap::new();
    for edge in typed {
        let kind = specs[&edge.source].outputs[edge.output];
        if kind.carries_payload() {
            connected
                .entry(edge.source.as_str())
                .or_default()
                .insert(edge.output, kind);
        }
    }

    let mut checked = HashSet::new();
    for node in &definition.nodes {
        if !checked.insert(node.id.as_str()) {
            continue;
        }
        let Some(ports) = connected.get(node.id.as_str()) else {
            continue;
        };
        let mut kinds: Vec<PortKind> = ports.values().copied().collect();
        kinds.dedup();
        if kinds.len() > 1 {
            let listed: Vec<String> = ports
                .iter()
                .map(|(port, kind)| format!("{} ({})", port, kind))
                .collect();
            violations.push(GraphViolation::node(
                &node.id,
                ViolationKind::MixedOutputKinds,
                format!("connected outputs carry different kinds: {}", listed.join(", ")),
            ));
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first search for back edges
struct CycleSearch<'a> {
    adjacency: BTreeMap<&'a str, Vec<&'a str>>,
    marks: HashMap<&'a str, Mark>,
    path: Vec<&'a str>,
    cycles: Vec<Vec<&'a str>>,
}

impl<'a> CycleSearch<'a> {
    /// Iterative DFS from `root`; each frame holds a node and the index of
    /// its next unexplored successor.
    fn visit(&mut self, root: &'a str) {
        let mut stack: Vec<(&'a str, usize)> = vec![(root, 0)];
        self.marks.insert(root, Mark::InProgress);
        self.path.push(root);

        while let Some(frame) = stack.last_mut() {
            let (node, cursor) = *frame;
            let next = self
                .adjacency
                .get(node)
                .and_then(|targets| targets.get(cursor))
                .copied();

            let Some(target) = next else {
                stack.pop();
                self.path.pop();
                self.marks.insert(node, Mark::Done);
                continue;
            };
            frame.1 += 1;

            match self.marks.get(target).copied().unwrap_or(Mark::Unvisited) {
                Mark::Unvisited => {
                    self.marks.insert(target, Mark::InProgress);
                    self.path.push(target);
                    stack.push((target, 0));
                }
                Mark::InProgress => {
                    if let Some(start) = self.path.iter().position(|n| *n == target) {
                        let mut cycle = self.path[start..].to_vec();
                        cycle.push(target);
                        self.cycles.push(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
    }
}

fn check_acyclic(
    definition: &PipelineDefinition,
    linked: &[&EdgeDefinition],
    violations: &mut Vec<GraphViolation>,
) {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for node in &definition.nodes {
        adjacency.entry(node.id.as_str()).or_default();
    }
    for edge in linked {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }
    for targets in adjacency.values_mut() {
        targets.sort_unstable();
        targets.dedup();
    }

    let roots: Vec<&str> = adjacency.keys().copied().collect();
    let mut search = CycleSearch {
        adjacency,
        marks: HashMap::new(),
        path: Vec::new(),
        cycles: Vec::new(),
    };

    for root in roots {
        if search.marks.get(root).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            search.visit(root);
        }
    }

    for cycle in search.cycles {
        violations.push(GraphViolation::node(
            cycle[0],
            ViolationKind::Cycle,
            format!("cycle detected: {}", cycle.join(" → ")),
        ));
    }
}

/// Every node is reachable from a node without incoming edges
fn check_reachable(
    definition: &PipelineDefinition,
    linked: &[&EdgeDefinition],
    violations: &mut Vec<GraphViolation>,
) {
    let mut has_incoming = HashSet::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in linked {
        has_incoming.insert(edge.target.as_str());
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = definition
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !has_incoming.contains(id))
        .collect();

    while let Some(node) = queue.pop_front() {
        if !reached.insert(node) {
            continue;
        }
        if let Some(targets) = adjacency.get(node) {
            queue.extend(targets.iter().copied());
        }
    }

    let mut reported = HashSet::new();
    for node in &definition.nodes {
        if !reached.contains(node.id.as_str()) && reported.insert(node.id.as_str()) {
            violations.push(GraphViolation::node(
                &node.id,
                ViolationKind::Orphaned,
                "node is not reachable from any root node",
            ));
        }
    }
}
