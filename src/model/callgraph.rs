//! The call graph the propagation walks: an arena of nodes and edges keyed by
//! integer ids, with inbound and outbound adjacency per node.
//!
//! Edges are statically resolved calls; an imprecise constructor may overlay
//! several callees onto one call site, which the analysis tolerates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::span::Pos;

use super::ir::{FuncId, ValueId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EdgeId(pub u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub func: FuncId,
    pub ins: Vec<EdgeId>,
    pub outs: Vec<EdgeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub caller: NodeId,
    pub callee: NodeId,
    /// Function physically containing the call instruction.
    pub site_fn: FuncId,
    /// The call instruction itself.
    pub site_instr: ValueId,
    /// Position of the call site (left paren, or spawn/defer keyword).
    pub pos: Pos,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(with = "super::serde_pairs")]
    by_func: HashMap<FuncId, NodeId>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, func: FuncId) -> NodeId {
        if let Some(id) = self.by_func.get(&func) {
            return *id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { func, ins: Vec::new(), outs: Vec::new() });
        self.by_func.insert(func, id);
        id
    }

    pub fn add_edge(
        &mut self,
        caller: NodeId,
        callee: NodeId,
        site_fn: FuncId,
        site_instr: ValueId,
        pos: Pos,
    ) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge { caller, callee, site_fn, site_instr, pos });
        self.nodes[caller.0 as usize].outs.push(id);
        self.nodes[callee.0 as usize].ins.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.0 as usize]
    }

    pub fn node_of(&self, func: FuncId) -> Option<NodeId> {
        self.by_func.get(&func).copied()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn ins(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.node(id).ins.iter().map(|e| self.edge(*e))
    }

    pub fn outs(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.node(id).outs.iter().map(|e| self.edge(*e))
    }
}
