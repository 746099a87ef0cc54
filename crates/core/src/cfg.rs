//! Block-level control-flow graph views over a function body.
//!
//! Transforms edit blocks and terminators directly; this module derives
//! graph structure from them on demand (successor lists come from
//! terminators, predecessors and reachability from a scan, and dominance
//! queries from a petgraph graph built here).

use crate::function::{BlockId, Function, FunctionBody};
use crate::instruction::{Op, Terminator};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet, VecDeque};

/// Classifies the edge a terminator induces, mainly for DOT output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EdgeKind {
    Uncond,
    BranchTrue,
    BranchFalse,
    Case(i64),
    Default,
    Indirect,
}

impl EdgeKind {
    pub fn label(&self) -> String {
        match self {
            EdgeKind::Uncond => "br".to_string(),
            EdgeKind::BranchTrue => "true".to_string(),
            EdgeKind::BranchFalse => "false".to_string(),
            EdgeKind::Case(v) => format!("case {v}"),
            EdgeKind::Default => "default".to_string(),
            EdgeKind::Indirect => "indirect".to_string(),
        }
    }
}

/// Builds a directed graph over the body's layout blocks.
///
/// Returns the graph plus the block-to-node mapping used to translate query
/// results back into block ids.
pub fn block_graph(body: &FunctionBody) -> (DiGraph<BlockId, EdgeKind>, HashMap<BlockId, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    for &block in body.layout() {
        nodes.insert(block, graph.add_node(block));
    }
    for &block in body.layout() {
        let Some(term) = body.terminator(block) else {
            continue;
        };
        let src = nodes[&block];
        for (dest, kind) in edges_of(term) {
            if let Some(&dst) = nodes.get(&dest) {
                graph.add_edge(src, dst, kind);
            }
        }
    }
    (graph, nodes)
}

fn edges_of(term: &Terminator) -> Vec<(BlockId, EdgeKind)> {
    match term {
        Terminator::Br { dest } => vec![(*dest, EdgeKind::Uncond)],
        Terminator::CondBr {
            then_dest,
            else_dest,
            ..
        } => vec![
            (*then_dest, EdgeKind::BranchTrue),
            (*else_dest, EdgeKind::BranchFalse),
        ],
        Terminator::Switch { default, cases, .. } => {
            let mut edges = vec![(*default, EdgeKind::Default)];
            edges.extend(cases.iter().map(|&(v, dest)| (dest, EdgeKind::Case(v))));
            edges
        }
        Terminator::Ret { .. } | Terminator::Unreachable => Vec::new(),
        Terminator::IndirectBr { destinations, .. } => destinations
            .iter()
            .map(|&dest| (dest, EdgeKind::Indirect))
            .collect(),
    }
}

/// Predecessors of `block`, in layout order, with duplicates collapsed.
pub fn predecessors(body: &FunctionBody, block: BlockId) -> Vec<BlockId> {
    let mut preds = Vec::new();
    for &b in body.layout() {
        if let Some(term) = body.terminator(b) {
            if term.successors().contains(&block) && !preds.contains(&b) {
                preds.push(b);
            }
        }
    }
    preds
}

/// The set of blocks reachable from the entry along terminator edges.
pub fn reachable_from_entry(body: &FunctionBody) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([body.entry()]);
    seen.insert(body.entry());
    while let Some(block) = queue.pop_front() {
        if let Some(term) = body.terminator(block) {
            for succ in term.successors() {
                if seen.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
    }
    seen
}

/// Renders a function's CFG as Graphviz DOT, one record node per block.
pub fn to_dot(function: &Function) -> String {
    let mut dot = format!("digraph \"{}\" {{\n", function.name);
    dot.push_str("    node [shape=box, fontname=monospace];\n");
    let Some(body) = function.body.as_ref() else {
        dot.push_str("}\n");
        return dot;
    };

    for &block in body.layout() {
        let data = body.block(block);
        let mut lines = vec![format!("{} ({})", data.name, block)];
        for &id in &data.instrs {
            lines.push(render_instr(body, id));
        }
        if let Some(term) = &data.term {
            lines.push(render_term(term));
        }
        dot.push_str(&format!(
            "    {} [label=\"{}\"];\n",
            block.0,
            lines.join("\\l")
        ));
    }
    let (graph, _) = block_graph(body);
    for edge in graph.edge_references() {
        dot.push_str(&format!(
            "    {} -> {} [label=\"{}\"];\n",
            graph[edge.source()].0,
            graph[edge.target()].0,
            edge.weight().label()
        ));
    }
    dot.push_str("}\n");
    dot
}

fn render_instr(body: &FunctionBody, id: crate::function::InstrId) -> String {
    let instr = body.instr(id);
    let operands: Vec<String> = instr.op.operands().iter().map(|v| v.to_string()).collect();
    let lhs = if instr.ty == crate::types::Ty::Void {
        String::new()
    } else if instr.name.is_empty() {
        format!("%{} = ", id.0)
    } else {
        format!("%{} = ", instr.name)
    };
    match &instr.op {
        Op::Alloca { allocated } => format!("{lhs}alloca {allocated}"),
        _ => format!("{lhs}{} {}", instr.op.mnemonic(), operands.join(", ")),
    }
}

fn render_term(term: &Terminator) -> String {
    match term {
        Terminator::Br { dest } => format!("br {dest}"),
        Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        } => format!("br {cond}, {then_dest}, {else_dest}"),
        Terminator::Switch { cond, default, cases } => {
            let arms: Vec<String> = cases
                .iter()
                .map(|(v, dest)| format!("{v} -> {dest}"))
                .collect();
            format!("switch {cond}, default {default} [{}]", arms.join(", "))
        }
        Terminator::Ret { value: Some(v) } => format!("ret {v}"),
        Terminator::Ret { value: None } => "ret void".to_string(),
        Terminator::Unreachable => "unreachable".to_string(),
        Terminator::IndirectBr { address, .. } => format!("indirectbr {address}"),
    }
}
