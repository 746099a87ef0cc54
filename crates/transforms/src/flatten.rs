//! Control-flow flattening.
//!
//! Rewrites a function's structured CFG into a dispatcher-driven state
//! machine: every non-entry block gets a dense state id, the entry stores
//! the id of its original successor into a stack slot and jumps to a
//! dispatcher block, and the dispatcher switches on the slot to reach the
//! next block. Rewritten blocks store their successor's id and loop back to
//! the dispatcher; returns and unreachables keep their original terminator
//! and end the machine.
//!
//! The function is cloned before anything is touched. If the entry's next
//! state cannot be computed or the verifier rejects the result, the clone is
//! swapped back in and the function is reported as skipped.

use crate::demote::demote_to_memory;
use crate::{ModulePass, PassConfig, Preserved};
use chakravyuha_analysis::with_report;
use chakravyuha_core::{
    cfg, verifier, BlockId, Builder, Constant, FuncId, Function, ICmpPred, Module, Terminator, Ty,
    Value,
};
use chakravyuha_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct ControlFlowFlatten {
    config: PassConfig,
}

impl ControlFlowFlatten {
    pub fn new(config: PassConfig) -> Self {
        Self { config }
    }
}

/// Why a function was left untouched. Only the reasons a user can do
/// something about (pads, exotic terminators, verifier rejections) count
/// toward the skipped-functions metric; declarations and tiny functions are
/// ordinary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SkipReason {
    Declaration,
    Intrinsic,
    TooFewBlocks,
    EhPad,
    UnsupportedTerminator(&'static str),
}

impl SkipReason {
    fn counted(self) -> bool {
        matches!(
            self,
            SkipReason::EhPad | SkipReason::UnsupportedTerminator(_)
        )
    }

    fn describe(self) -> String {
        match self {
            SkipReason::Declaration => "declaration".to_string(),
            SkipReason::Intrinsic => "intrinsic".to_string(),
            SkipReason::TooFewBlocks => "fewer blocks than the flattening threshold".to_string(),
            SkipReason::EhPad => "contains an exception-handling pad".to_string(),
            SkipReason::UnsupportedTerminator(kind) => {
                format!("unsupported terminator '{kind}'")
            }
        }
    }
}

/// The eligibility gate of the pass.
fn gate(function: &Function, config: &PassConfig) -> Result<(), SkipReason> {
    if function.is_intrinsic {
        return Err(SkipReason::Intrinsic);
    }
    let Some(body) = function.body.as_ref() else {
        return Err(SkipReason::Declaration);
    };
    if body.block_count() < config.min_flatten_blocks {
        return Err(SkipReason::TooFewBlocks);
    }
    for &block in body.layout() {
        if body.block(block).is_eh_pad {
            return Err(SkipReason::EhPad);
        }
        match body.terminator(block) {
            Some(
                Terminator::Br { .. }
                | Terminator::CondBr { .. }
                | Terminator::Switch { .. }
                | Terminator::Ret { .. }
                | Terminator::Unreachable,
            ) => {}
            Some(other) => return Err(SkipReason::UnsupportedTerminator(other.kind_name())),
            None => return Err(SkipReason::UnsupportedTerminator("missing")),
        }
    }
    Ok(())
}

/// Builds the next-state expression for `term` at the builder's cursor.
///
/// Returns `None` without emitting anything when the terminator has a
/// successor outside the flattened set (the caller preserves the original
/// terminator in that case), and for returns and unreachables.
fn build_next_state(
    b: &mut Builder<'_>,
    term: &Terminator,
    ids: &HashMap<BlockId, i64>,
) -> Option<Value> {
    match term {
        Terminator::Br { dest } => ids.get(dest).map(|&id| Value::i32(id)),
        Terminator::CondBr {
            cond,
            then_dest,
            else_dest,
        } => {
            let then_id = *ids.get(then_dest)?;
            let else_id = *ids.get(else_dest)?;
            Some(b.select(
                cond.clone(),
                Value::i32(then_id),
                Value::i32(else_id),
                "cff.next",
            ))
        }
        Terminator::Switch {
            cond,
            default,
            cases,
        } => {
            let any_flattened =
                ids.contains_key(default) || cases.iter().any(|(_, dest)| ids.contains_key(dest));
            if !any_flattened {
                return None;
            }
            let cond_ty = b.value_ty(cond);
            // the default supplies the fallback; an unmapped default folds
            // to state 0, which the dispatcher routes to its unreachable
            // default block
            let mut next = Value::i32(ids.get(default).copied().unwrap_or(0));
            for (case_value, dest) in cases {
                if let Some(&id) = ids.get(dest) {
                    let is_case = b.icmp(
                        ICmpPred::Eq,
                        cond.clone(),
                        Value::Const(Constant::Int {
                            ty: cond_ty.clone(),
                            value: *case_value,
                        }),
                        "cff.case.cmp",
                    );
                    next = b.select(is_case, Value::i32(id), next, "cff.case.select");
                }
            }
            Some(next)
        }
        _ => None,
    }
}

/// Flattens one gated function. Returns the number of blocks folded behind
/// the dispatcher, or `None` if the transformation was aborted and rolled
/// back.
fn flatten_function(module: &mut Module, func: FuncId, rng: &mut StdRng) -> Option<u64> {
    let fname = module.function(func).name.clone();
    let body = module.function_mut(func).body.as_mut()?;
    let snapshot = body.clone();
    let blocks_before = body.block_count() as u64;

    demote_to_memory(body);

    let entry = body.entry();
    let mut targets: Vec<BlockId> = body
        .layout()
        .iter()
        .copied()
        .filter(|&b| b != entry)
        .collect();
    if targets.is_empty() {
        *body = snapshot;
        return None;
    }
    // ids are dense but the assignment order is randomized per run
    targets.shuffle(rng);
    let ids: HashMap<BlockId, i64> = targets
        .iter()
        .enumerate()
        .map(|(index, &block)| (block, (index + 1) as i64))
        .collect();

    let state = {
        let mut b = Builder::at_block_begin(body, entry);
        b.alloca(Ty::I32, "cff.state")
    };

    let dispatch = body.add_block("cff.dispatch");
    let default_block = body.add_block("cff.default");
    body.set_terminator(default_block, Terminator::Unreachable);

    // initial state from the original entry terminator
    let Some(entry_term) = body.terminator(entry).cloned() else {
        *module.function_mut(func).body.as_mut()? = snapshot;
        return None;
    };
    let init = {
        let mut b = Builder::at_block_end(body, entry);
        build_next_state(&mut b, &entry_term, &ids)
    };
    let Some(init) = init else {
        debug!("{fname}: entry reaches a non-flattened block, aborting");
        *module.function_mut(func).body.as_mut()? = snapshot;
        return None;
    };
    {
        let mut b = Builder::at_block_end(body, entry);
        b.store(init, state.clone());
    }
    body.set_terminator(entry, Terminator::Br { dest: dispatch });

    // dispatcher: load the state slot and switch over every flattened block
    {
        let mut b = Builder::at_block_end(body, dispatch);
        let current = b.load(Ty::I32, state.clone(), "cff.cur");
        let cases: Vec<(i64, BlockId)> = targets.iter().map(|&t| (ids[&t], t)).collect();
        body.set_terminator(
            dispatch,
            Terminator::Switch {
                cond: current,
                default: default_block,
                cases,
            },
        );
    }

    // rewrite the terminator of each flattened block into a state store plus
    // a jump back to the dispatcher
    for &block in &targets {
        let Some(term) = body.terminator(block).cloned() else {
            continue;
        };
        if matches!(term, Terminator::Ret { .. } | Terminator::Unreachable) {
            continue;
        }
        let next = {
            let mut b = Builder::at_block_end(body, block);
            build_next_state(&mut b, &term, &ids)
        };
        if let Some(next) = next {
            let mut b = Builder::at_block_end(body, block);
            b.store(next, state.clone());
            body.set_terminator(block, Terminator::Br { dest: dispatch });
        }
        // successors outside the flattened set keep their original branch
    }

    // drop anything the rewiring disconnected
    let reachable = cfg::reachable_from_entry(body);
    for block in body.layout().to_vec() {
        if !reachable.contains(&block) {
            body.erase_block(block);
        }
    }

    match verifier::verify_function(module, func) {
        Ok(()) => Some(blocks_before - 1),
        Err(e) => {
            warn!("{fname}: verification failed after flattening, restoring: {e}");
            if let Some(body) = module.function_mut(func).body.as_mut() {
                *body = snapshot;
            }
            None
        }
    }
}

impl ModulePass for ControlFlowFlatten {
    fn name(&self) -> &'static str {
        "ControlFlowFlatten"
    }

    fn run(&self, module: &mut Module, rng: &mut StdRng) -> Result<Preserved, TransformError> {
        with_report(|r| {
            r.enable_control_flow_flattening = true;
            r.passes_run.push("ControlFlowFlatten".to_string());
        });

        let mut flattened_functions = 0u64;
        let mut flattened_blocks = 0u64;
        let mut skipped = 0u64;

        for func in module.function_ids() {
            let function = module.function(func);
            if let Err(reason) = gate(function, &self.config) {
                if reason.counted() {
                    skipped += 1;
                    info!("skipping '{}': {}", function.name, reason.describe());
                } else {
                    debug!("skipping '{}': {}", function.name, reason.describe());
                }
                continue;
            }
            match flatten_function(module, func, rng) {
                Some(blocks) => {
                    flattened_functions += 1;
                    flattened_blocks += blocks;
                }
                None => skipped += 1,
            }
        }

        with_report(|r| {
            r.flattened_functions += flattened_functions;
            r.flattened_blocks += flattened_blocks;
            r.skipped_functions += skipped;
        });
        debug!(
            flattened_functions,
            flattened_blocks, skipped, "control-flow flattening finished"
        );

        if flattened_functions > 0 {
            Ok(Preserved::None)
        } else {
            Ok(Preserved::All)
        }
    }
}
