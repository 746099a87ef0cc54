//! Structural and SSA checks for modules.
//!
//! The verifier is the acceptance gate the obfuscation passes run after
//! mutating a function: every block must be terminated, branch targets must
//! exist, phi incoming lists must match the predecessor set, returns must
//! agree with the signature, and every SSA use must be dominated by its
//! definition. Dominance is computed with petgraph's `simple_fast` over the
//! block graph; blocks unreachable from the entry are exempt from the
//! dominance check, matching LLVM's verifier.

use crate::cfg;
use crate::function::{BlockId, FunctionBody};
use crate::instruction::{Op, Terminator};
use crate::module::{FuncId, Module};
use crate::types::Ty;
use crate::value::Value;
use chakravyuha_utils::errors::VerifyError;
use petgraph::algo::dominators;
use std::collections::HashSet;

/// Verifies every function definition in the module.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    tracing::debug!(
        "verifying module '{}' ({} functions)",
        module.name,
        module.function_ids().len()
    );
    for id in module.function_ids() {
        verify_function(module, id)?;
    }
    Ok(())
}

/// Verifies a single function. Declarations trivially pass.
pub fn verify_function(module: &Module, func: FuncId) -> Result<(), VerifyError> {
    let function = module.function(func);
    let Some(body) = function.body.as_ref() else {
        return Ok(());
    };
    let fname = function.name.clone();

    if !body.layout().contains(&body.entry()) {
        return Err(VerifyError::MissingEntry { func: fname });
    }
    let layout_set: HashSet<BlockId> = body.layout().iter().copied().collect();

    for &block in body.layout() {
        let Some(term) = body.terminator(block) else {
            return Err(VerifyError::MissingTerminator {
                func: fname,
                block: body.block(block).name.clone(),
            });
        };
        for succ in term.successors() {
            if !layout_set.contains(&succ) {
                return Err(VerifyError::BadBranchTarget {
                    func: fname,
                    block: body.block(block).name.clone(),
                });
            }
        }
    }

    check_phis(body, &fname)?;
    check_returns(body, &function.ret_ty, &fname)?;
    check_dominance(body, &fname)?;
    Ok(())
}

fn check_phis(body: &FunctionBody, fname: &str) -> Result<(), VerifyError> {
    for &block in body.layout() {
        let preds = cfg::predecessors(body, block);
        for &id in &body.block(block).instrs {
            if let Op::Phi { incomings } = &body.instr(id).op {
                for pred in &preds {
                    if !incomings.iter().any(|(_, pb)| pb == pred) {
                        return Err(VerifyError::PhiPredMismatch {
                            func: fname.to_string(),
                            block: body.block(block).name.clone(),
                            pred: body.block(*pred).name.clone(),
                        });
                    }
                }
                for (_, pb) in incomings {
                    if !preds.contains(pb) {
                        return Err(VerifyError::PhiExtraPred {
                            func: fname.to_string(),
                            block: body.block(block).name.clone(),
                            pred: body.block(*pb).name.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_returns(body: &FunctionBody, ret_ty: &Ty, fname: &str) -> Result<(), VerifyError> {
    for &block in body.layout() {
        if let Some(Terminator::Ret { value }) = body.terminator(block) {
            let ok = match value {
                None => *ret_ty == Ty::Void,
                Some(v) => *ret_ty != Ty::Void && body.value_ty(v) == *ret_ty,
            };
            if !ok {
                return Err(VerifyError::ReturnTypeMismatch {
                    func: fname.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn check_dominance(body: &FunctionBody, fname: &str) -> Result<(), VerifyError> {
    let (graph, nodes) = cfg::block_graph(body);
    let entry_node = nodes[&body.entry()];
    let doms = dominators::simple_fast(&graph, entry_node);
    let reachable = cfg::reachable_from_entry(body);

    let dominates = |a: BlockId, b: BlockId| -> bool {
        if a == b {
            return true;
        }
        let mut cursor = nodes[&b];
        while let Some(idom) = doms.immediate_dominator(cursor) {
            if graph[idom] == a {
                return true;
            }
            cursor = idom;
        }
        false
    };

    let violation = |block: BlockId| VerifyError::DominanceViolation {
        func: fname.to_string(),
        block: body.block(block).name.clone(),
    };
    let dangling = || VerifyError::DanglingOperand {
        func: fname.to_string(),
    };

    for &block in body.layout() {
        if !reachable.contains(&block) {
            continue;
        }
        let instrs = &body.block(block).instrs;
        for (index, &id) in instrs.iter().enumerate() {
            let data = body.instr(id);
            if let Op::Phi { incomings } = &data.op {
                // a phi's use point is the end of the incoming edge
                for (value, pred) in incomings {
                    if let Value::Instr(def) = value {
                        let Some((def_block, _)) = body.position_of(*def) else {
                            return Err(dangling());
                        };
                        if reachable.contains(pred) && !dominates(def_block, *pred) {
                            return Err(violation(block));
                        }
                    }
                }
            } else {
                for value in data.op.operands() {
                    if let Value::Instr(def) = value {
                        let Some((def_block, def_index)) = body.position_of(*def) else {
                            return Err(dangling());
                        };
                        let dominated = if def_block == block {
                            def_index < index
                        } else {
                            dominates(def_block, block)
                        };
                        if !dominated {
                            return Err(violation(block));
                        }
                    }
                }
            }
        }
        if let Some(term) = body.terminator(block) {
            for value in term.operands() {
                if let Value::Instr(def) = value {
                    let Some((def_block, _)) = body.position_of(*def) else {
                        return Err(dangling());
                    };
                    if def_block != block && !dominates(def_block, block) {
                        return Err(violation(block));
                    }
                }
            }
        }
    }
    Ok(())
}
