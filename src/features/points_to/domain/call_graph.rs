//! The context-sensitive call graph.

use super::context::CtxId;
use crate::shared::models::{FuncId, InstId};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallNode {
    pub ctx: CtxId,
    pub func: FuncId,
}

/// Directed call graph over (context, function) nodes; edges carry the
/// call-site instruction.
#[derive(Debug, Default)]
pub struct CallGraph {
    graph: DiGraph<CallNode, InstId>,
    index: FxHashMap<(CtxId, FuncId), NodeIndex>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure_node(&mut self, ctx: CtxId, func: FuncId) -> NodeIndex {
        if let Some(&idx) = self.index.get(&(ctx, func)) {
            return idx;
        }
        let idx = self.graph.add_node(CallNode { ctx, func });
        self.index.insert((ctx, func), idx);
        idx
    }

    pub fn add_call(
        &mut self,
        caller: (CtxId, FuncId),
        callee: (CtxId, FuncId),
        site: InstId,
    ) {
        let from = self.ensure_node(caller.0, caller.1);
        let to = self.ensure_node(callee.0, callee.1);
        // One edge per (site, callee) pair is enough.
        let duplicate = self
            .graph
            .edges_connecting(from, to)
            .any(|e| *e.weight() == site);
        if !duplicate {
            self.graph.add_edge(from, to, site);
        }
    }

    pub fn contains(&self, ctx: CtxId, func: FuncId) -> bool {
        self.index.contains_key(&(ctx, func))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
