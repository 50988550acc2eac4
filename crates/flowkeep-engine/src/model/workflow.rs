//! Workflow graph definitions: nodes, edges, and the closed set of node kinds.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of node kinds the engine knows how to route and dispatch.
///
/// Unknown kinds are rejected at workflow validation time (`GraphConfig::validate`),
/// never discovered at runtime the way a string-keyed dispatch table would.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Trigger,
    HttpRequest,
    Code,
    Condition,
    ConditionSwitch,
    Connector,
    Agent,
    SubWorkflow,
    ParallelFanout,
    ParallelJoin,
    WaitSignal,
    LoopStart,
    LoopEnd,
    Try,
    Catch,
    Finally,
}

impl NodeKind {
    /// Whether a node of this kind parks the execution rather than completing inline.
    pub fn is_parking(self) -> bool {
        matches!(self, NodeKind::WaitSignal)
    }

    /// Whether this node is a synthetic routing marker with no dispatcher handler of its own.
    pub fn is_routing_marker(self) -> bool {
        matches!(self, NodeKind::ParallelJoin | NodeKind::LoopEnd)
    }
}

/// A vertex of the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique within a workflow version.
    pub node_id: String,
    pub kind: NodeKind,
    /// Node-type-specific configuration, e.g. `{"url": "...", "method": "GET"}` for `http_request`.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Cosmetic UI position, ignored by the engine.
    #[serde(default)]
    pub position: Option<serde_json::Value>,
}

/// An edge of the workflow graph.
///
/// `branch` labels condition/switch outgoing edges (`"true"`/`"false"`/case names/`"default"`),
/// loop outgoing edges (`"repeat"`/`"exit"`), and try/catch/finally successors. A `None` branch
/// means an unconditional ("default") edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub branch: Option<String>,
}

/// Errors produced when a graph fails validation.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph has no nodes")]
    Empty,

    #[error("no entry node: expected a unique `trigger` node or a first declared node")]
    NoEntry,

    #[error("more than one trigger node declared")]
    MultipleTriggers,

    #[error("edge references unknown node: {0}")]
    DanglingEdge(String),

    #[error("static (non loop-scoped) cycle detected involving node {0}")]
    UnscopedCycle(String),

    #[error("duplicate node_id: {0}")]
    DuplicateNodeId(String),
}

/// The declarative graph: nodes plus the edges between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<Edge>,
}

impl GraphConfig {
    /// The entry node: the unique `trigger` node if one exists, else the first declared node.
    pub fn entry_node_id(&self) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.kind == NodeKind::Trigger)
            .or_else(|| self.nodes.first())
            .map(|n| n.node_id.as_str())
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Outgoing edges of a node, in declaration order (first-declared-wins tie-breaking
    /// for condition/switch routing relies on this order being preserved).
    pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Edges matching a branch label, falling back to the `"default"`-labelled edge.
    pub fn edges_for_branch<'a>(&'a self, node_id: &'a str, branch: &str) -> Vec<&'a Edge> {
        let matching: Vec<&Edge> = self
            .outgoing(node_id)
            .filter(|e| e.branch.as_deref() == Some(branch))
            .collect();
        if !matching.is_empty() {
            return matching;
        }
        self.outgoing(node_id)
            .filter(|e| e.branch.as_deref() == Some("default"))
            .collect()
    }

    /// Unconditional (unlabelled) outgoing edges.
    pub fn default_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.outgoing(node_id).filter(|e| e.branch.is_none()).collect()
    }

    /// Structural validation run once at `create_workflow` time.
    ///
    /// Rejects unknown node references, duplicate ids, more than one trigger, and static
    /// cycles that are not scoped inside a `loop_start`/`loop_end` pair. Loop-scoped cycles
    /// (a `loop_end` edge labelled `"repeat"` pointing back to the loop body) are permitted.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut seen = HashMap::new();
        for node in &self.nodes {
            if seen.insert(node.node_id.as_str(), ()).is_some() {
                return Err(GraphError::DuplicateNodeId(node.node_id.clone()));
            }
        }

        let trigger_count = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Trigger)
            .count();
        if trigger_count > 1 {
            return Err(GraphError::MultipleTriggers);
        }

        if self.entry_node_id().is_none() {
            return Err(GraphError::NoEntry);
        }

        for edge in &self.edges {
            if !seen.contains_key(edge.from.as_str()) {
                return Err(GraphError::DanglingEdge(edge.from.clone()));
            }
            if !seen.contains_key(edge.to.as_str()) {
                return Err(GraphError::DanglingEdge(edge.to.clone()));
            }
        }

        self.check_cycles()
    }

    /// A cycle is permitted only when every edge in it is a `"repeat"`-labelled edge leaving
    /// a `loop_end` node (i.e. the loop construct's own back-edge). Any other cycle is rejected.
    fn check_cycles(&self) -> Result<(), GraphError> {
        let loop_back_edges: std::collections::HashSet<(&str, &str)> = self
            .edges
            .iter()
            .filter(|e| e.branch.as_deref() == Some("repeat"))
            .filter(|e| {
                self.node(&e.from)
                    .map(|n| n.kind == NodeKind::LoopEnd)
                    .unwrap_or(false)
            })
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();

        let mut color: HashMap<&str, u8> = HashMap::new(); // 0 unvisited, 1 in-stack, 2 done
        for node in &self.nodes {
            if color.get(node.node_id.as_str()).copied().unwrap_or(0) == 0 {
                self.visit(&node.node_id, &mut color, &loop_back_edges)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node_id: &'a str,
        color: &mut HashMap<&'a str, u8>,
        loop_back_edges: &std::collections::HashSet<(&str, &str)>,
    ) -> Result<(), GraphError> {
        color.insert(node_id, 1);
        for edge in self.outgoing(node_id) {
            if loop_back_edges.contains(&(edge.from.as_str(), edge.to.as_str())) {
                continue;
            }
            match color.get(edge.to.as_str()).copied().unwrap_or(0) {
                0 => self.visit(&edge.to, color, loop_back_edges)?,
                1 => return Err(GraphError::UnscopedCycle(edge.to.clone())),
                _ => {}
            }
        }
        color.insert(node_id, 2);
        Ok(())
    }
}

/// A versioned workflow definition. Versions are immutable once an execution has observed them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: Uuid,
    pub version: i32,
    pub graph: GraphConfig,
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    pub is_active: bool,
    pub owner_id: Option<String>,
}
