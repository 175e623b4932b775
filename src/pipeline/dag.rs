// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 blockflow contributors

//! Validated pipeline graph
//!
//! A [`PipelineGraph`] can only be produced by the
//! [`GraphValidator`](super::GraphValidator). Once built it is immutable and
//! shared read-only (`Arc<PipelineGraph>`) by every task of an execution.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::sync::Arc;

use crate::pipeline::{EdgeDefinition, NodeDefinition, PipelineDefinition};
use crate::registry::{BlockSpec, PortKind};

/// A node of a validated graph
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub spec: Arc<BlockSpec>,
    pub config: serde_json::Value,
}

/// An edge of a validated graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    id: Option<String>,
    pub source: String,
    pub output: usize,
    pub target: String,
    pub input: usize,
    /// Kind carried along this edge (both ends agree)
    pub kind: PortKind,
}

impl Edge {
    /// Id used to cite this edge
    pub fn display_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("{}.{}->{}.{}", self.source, self.output, self.target, self.input),
        }
    }
}

/// Immutable, validated pipeline DAG
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    name: String,
    description: Option<String>,
    version: String,
    blocks: Vec<BlockSpec>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    index: HashMap<String, NodeIndex>,
    graph: DiGraph<usize, usize>,
}

impl PipelineGraph {
    /// Assemble a graph from a definition whose blocks, endpoints and ports
    /// have already been resolved and checked. `specs` maps node id to block.
    pub(crate) fn assemble(definition: &PipelineDefinition, specs: &HashMap<String, Arc<BlockSpec>>) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut nodes = Vec::with_capacity(definition.nodes.len());

        for (pos, def) in definition.nodes.iter().enumerate() {
            let spec = Arc::clone(&specs[&def.id]);
            index.insert(def.id.clone(), graph.add_node(pos));
            nodes.push(Node {
                id: def.id.clone(),
                spec,
                config: def.config.clone(),
            });
        }

        let mut edges = Vec::with_capacity(definition.edges.len());
        for (pos, def) in definition.edges.iter().enumerate() {
            let kind = specs[&def.source].outputs[def.output];
            graph.add_edge(index[&def.source], index[&def.target], pos);
            edges.push(Edge {
                id: def.id.clone(),
                source: def.source.clone(),
                output: def.output,
                target: def.target.clone(),
                input: def.input,
                kind,
            });
        }

        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            version: version_of(definition),
            blocks: definition.blocks.clone(),
            nodes,
            edges,
            index,
            graph,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Content hash of the definition this graph was built from
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|idx| &self.nodes[self.graph[*idx]])
    }

    /// Edges entering `id`
    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Edges leaving `id`
    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    /// Nodes that must finish before `id` can run, ordered by id
    pub fn dependencies(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Nodes fed directly by `id`, ordered by id
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, dir: Direction) -> Vec<&str> {
        let Some(node) = self.index.get(id) else {
            return Vec::new();
        };
        let set: BTreeSet<&str> = self
            .graph
            .neighbors_directed(*node, dir)
            .map(|n| self.nodes[self.graph[n]].id.as_str())
            .collect();
        set.into_iter().collect()
    }

    /// Nodes without incoming edges, ordered by id
    pub fn roots(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self
            .graph
            .node_indices()
            .filter(|n| self.graph.neighbors_directed(*n, Direction::Incoming).next().is_none())
            .map(|n| self.nodes[self.graph[n]].id.as_str())
            .collect();
        set.into_iter().collect()
    }

    /// Every node transitively depending on `id`, ordered by id
    pub fn downstream(&self, id: &str) -> Vec<&str> {
        let Some(start) = self.index.get(id) else {
            return Vec::new();
        };

        let mut reached = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, *start);
        while let Some(n) = dfs.next(&self.graph) {
            if n != *start {
                reached.insert(self.nodes[self.graph[n]].id.as_str());
            }
        }
        reached.into_iter().collect()
    }

    /// Check if `a` depends (directly or transitively) on `b`
    pub fn depends_on(&self, a: &str, b: &str) -> bool {
        let (Some(node_a), Some(node_b)) = (self.index.get(a), self.index.get(b)) else {
            return false;
        };
        node_a != node_b && petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Topological order; among nodes available at the same time the smaller id goes first
    pub fn topological_order(&self) -> Vec<&str> {
        let mut indegree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();

        let id_of = |n: NodeIndex| self.nodes[self.graph[n]].id.as_str();

        let mut available: BinaryHeap<Reverse<(&str, NodeIndex)>> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| Reverse((id_of(*n), *n)))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse((id, n))) = available.pop() {
            order.push(id);
            for next in self.graph.neighbors_directed(n, Direction::Outgoing) {
                if let Some(d) = indegree.get_mut(&next) {
                    *d -= 1;
                    if *d == 0 {
                        available.push(Reverse((id_of(next), next)));
                    }
                }
            }
        }

        order
    }

    /// The definition this graph was validated from
    pub fn to_definition(&self) -> PipelineDefinition {
        PipelineDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            blocks: self.blocks.clone(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeDefinition {
                    id: n.id.clone(),
                    block: n.spec.id.clone(),
                    config: n.config.clone(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| EdgeDefinition {
                    id: e.id.clone(),
                    source: e.source.clone(),
                    output: e.output,
                    target: e.target.clone(),
                    input: e.input,
                })
                .collect(),
        }
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for node in &self.nodes {
            out.push_str(&format!("    {}[\"{} ({})\"]\n", node.id, node.id, node.spec.id));
        }

        for edge in &self.edges {
            out.push_str(&format!("    {} -->|{}| {}\n", edge.source, edge.kind, edge.target));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = format!("digraph \"{}\" {{\n", self.name);
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for node in &self.nodes {
            out.push_str(&format!(
                "    \"{}\" [label=\"{}\\n{}\"];\n",
                node.id, node.id, node.spec.id
            ));
        }

        for edge in &self.edges {
            out.push_str(&format!(
                "    \"{}\" -> \"{}\" [label=\"{}\"];\n",
                edge.source, edge.target, edge.kind
            ));
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for (i, id) in self.topological_order().into_iter().enumerate() {
            let Some(node) = self.node(id) else { continue };
            let deps = self.dependencies(id);

            out.push_str(&format!("{}. {} ({}: {})", i + 1, id, node.spec.id, node.spec.signature()));

            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        out
    }
}

impl PartialEq for PipelineGraph {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.version == other.version
            && self.blocks == other.blocks
            && self.nodes == other.nodes
            && self.edges == other.edges
    }
}

/// Short content hash of a definition
fn version_of(definition: &PipelineDefinition) -> String {
    let canonical = serde_json::to_vec(definition).unwrap_or_default();
    let hash = blake3::hash(&canonical);
    hash.to_hex()[..16].to_string()
}
