//! Demotion of SSA values to stack slots.
//!
//! Flattening rewires the CFG into a star around a dispatcher, which
//! destroys the dominance relationships SSA relies on. Before that happens,
//! every value that crosses a block boundary is lowered into a dedicated
//! entry-block alloca in two steps: phi nodes first, then any remaining
//! instruction whose result is referenced outside its defining block.
//!
//! Phi lowering places stores at the end of each predecessor and loads at
//! each use. A use that is itself a phi incoming is loaded at the end of the
//! carrying edge's predecessor; those loads are inserted before any of the
//! incoming stores land in the same predecessor, so a phi whose incoming
//! value is another phi still observes the value from block entry rather
//! than the freshly stored one. The entry block also stores poison into each
//! phi slot, defining it on paths that reach the phi's block without
//! passing a recorded predecessor once the dispatcher exists.

use chakravyuha_core::{Builder, Constant, FunctionBody, InstrId, Op, Ty, Value};
use tracing::debug;

/// Counters for one demotion run.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoteStats {
    pub phi_slots: usize,
    pub value_slots: usize,
}

/// Every instruction id currently linked into the layout, in layout order.
fn linked_instrs(body: &FunctionBody) -> Vec<InstrId> {
    body.layout()
        .to_vec()
        .into_iter()
        .flat_map(|b| body.block(b).instrs.clone())
        .collect()
}

fn slot_base_name(body: &FunctionBody, id: InstrId) -> String {
    let name = &body.instr(id).name;
    if name.is_empty() {
        format!("v{}", id.0)
    } else {
        name.clone()
    }
}

/// Inserts a fresh load of `slot` before every non-phi instruction user of
/// `target` (one load per operand occurrence) and redirects the use.
fn reload_before_instr_users(
    body: &mut FunctionBody,
    target: InstrId,
    slot: &Value,
    ty: &Ty,
    base: &str,
    skip: Option<InstrId>,
) {
    let target_value = Value::Instr(target);
    let users: Vec<InstrId> = linked_instrs(body)
        .into_iter()
        .filter(|&u| Some(u) != skip && u != target)
        .filter(|&u| !body.instr(u).op.is_phi())
        .filter(|&u| body.instr(u).op.operands().iter().any(|v| **v == target_value))
        .collect();
    for user in users {
        let occurrences = body
            .instr(user)
            .op
            .operands()
            .iter()
            .filter(|v| ***v == target_value)
            .count();
        for _ in 0..occurrences {
            let mut b = Builder::before(body, user);
            let load = b.load(ty.clone(), slot.clone(), &format!("{base}.reload"));
            for operand in body.instr_mut(user).op.operands_mut() {
                if *operand == target_value {
                    *operand = load;
                    break;
                }
            }
        }
    }
}

/// Same as above for terminator operand uses; loads go at the block end.
fn reload_before_terminator_users(
    body: &mut FunctionBody,
    target: InstrId,
    slot: &Value,
    ty: &Ty,
    base: &str,
) {
    let target_value = Value::Instr(target);
    for block in body.layout().to_vec() {
        let occurrences = body.terminator(block).map_or(0, |t| {
            t.operands().iter().filter(|v| ***v == target_value).count()
        });
        for _ in 0..occurrences {
            let mut b = Builder::at_block_end(body, block);
            let load = b.load(ty.clone(), slot.clone(), &format!("{base}.reload"));
            if let Some(term) = body.terminator_mut(block) {
                for operand in term.operands_mut() {
                    if *operand == target_value {
                        *operand = load;
                        break;
                    }
                }
            }
        }
    }
}

/// Lowers every cross-block SSA value of `body` into entry-block stack
/// slots. Postcondition: the body contains no phi nodes, and no instruction
/// result is referenced from a block other than its own except through
/// memory.
pub fn demote_to_memory(body: &mut FunctionBody) -> DemoteStats {
    let entry = body.entry();
    let mut stats = DemoteStats::default();

    // -- Step 1: phi removal --
    let phis: Vec<InstrId> = linked_instrs(body)
        .into_iter()
        .filter(|&i| body.instr(i).op.is_phi())
        .collect();
    let phi_tys: Vec<Ty> = phis.iter().map(|&p| body.instr(p).ty.clone()).collect();
    let phi_names: Vec<String> = phis.iter().map(|&p| slot_base_name(body, p)).collect();

    let mut phi_slots: Vec<Value> = Vec::with_capacity(phis.len());
    {
        let mut b = Builder::at_block_begin(body, entry);
        for (i, _) in phis.iter().enumerate() {
            phi_slots.push(b.alloca(phi_tys[i].clone(), &format!("{}.phislot", phi_names[i])));
        }
    }
    {
        // define each slot on paths that bypass every recorded predecessor
        let mut b = Builder::at_block_end(body, entry);
        for (i, _) in phis.iter().enumerate() {
            b.store(
                Value::Const(Constant::Poison(phi_tys[i].clone())),
                phi_slots[i].clone(),
            );
        }
    }

    // redirect all uses of each phi through its slot
    for (i, &phi) in phis.iter().enumerate() {
        let target_value = Value::Instr(phi);
        let slot = phi_slots[i].clone();
        let ty = phi_tys[i].clone();
        let base = phi_names[i].clone();

        let phi_users: Vec<InstrId> = linked_instrs(body)
            .into_iter()
            .filter(|&u| u != phi && body.instr(u).op.is_phi())
            .filter(|&u| body.instr(u).op.operands().iter().any(|v| **v == target_value))
            .collect();
        for user in phi_users {
            let Op::Phi { incomings } = body.instr(user).op.clone() else {
                continue;
            };
            for (index, (value, pred)) in incomings.iter().enumerate() {
                if *value == target_value {
                    let mut b = Builder::at_block_end(body, *pred);
                    let load = b.load(ty.clone(), slot.clone(), &format!("{base}.reload"));
                    if let Op::Phi { incomings } = &mut body.instr_mut(user).op {
                        incomings[index].0 = load;
                    }
                }
            }
        }
        // a phi's own incoming list may also carry it (self loop)
        let Op::Phi { incomings } = body.instr(phi).op.clone() else {
            continue;
        };
        for (index, (value, pred)) in incomings.iter().enumerate() {
            if *value == target_value {
                let mut b = Builder::at_block_end(body, *pred);
                let load = b.load(ty.clone(), slot.clone(), &format!("{base}.reload"));
                if let Op::Phi { incomings } = &mut body.instr_mut(phi).op {
                    incomings[index].0 = load;
                }
            }
        }

        reload_before_instr_users(body, phi, &slot, &ty, &base, None);
        reload_before_terminator_users(body, phi, &slot, &ty, &base);
    }

    // store each incoming value at the end of its predecessor, then drop the
    // phis themselves
    for (i, &phi) in phis.iter().enumerate() {
        let Op::Phi { incomings } = body.instr(phi).op.clone() else {
            continue;
        };
        for (value, pred) in incomings {
            let mut b = Builder::at_block_end(body, pred);
            b.store(value, phi_slots[i].clone());
        }
    }
    for &phi in &phis {
        body.erase_instr(phi);
    }
    stats.phi_slots = phis.len();

    // -- Step 2: cross-block SSA demotion --
    let candidates: Vec<InstrId> = linked_instrs(body)
        .into_iter()
        .filter(|&i| {
            let data = body.instr(i);
            !data.op.is_alloca() && !data.op.is_phi() && data.ty != Ty::Void
        })
        .filter(|&i| {
            let home = body.instr(i).block;
            let value = Value::Instr(i);
            let used_by_instr = linked_instrs(body).into_iter().any(|u| {
                body.instr(u).block != home
                    && body.instr(u).op.operands().iter().any(|v| **v == value)
            });
            let used_by_term = body.layout().iter().any(|&b| {
                b != home
                    && body
                        .terminator(b)
                        .is_some_and(|t| t.operands().iter().any(|v| **v == value))
            });
            used_by_instr || used_by_term
        })
        .collect();

    let candidate_tys: Vec<Ty> = candidates
        .iter()
        .map(|&i| body.instr(i).ty.clone())
        .collect();
    let candidate_names: Vec<String> = candidates
        .iter()
        .map(|&i| slot_base_name(body, i))
        .collect();
    let mut value_slots: Vec<Value> = Vec::with_capacity(candidates.len());
    {
        let mut b = Builder::at_block_begin(body, entry);
        for (i, _) in candidates.iter().enumerate() {
            value_slots.push(b.alloca(
                candidate_tys[i].clone(),
                &format!("{}.slot", candidate_names[i]),
            ));
        }
    }

    for (i, &instr) in candidates.iter().enumerate() {
        let slot = value_slots[i].clone();
        let ty = candidate_tys[i].clone();
        let base = candidate_names[i].clone();

        // spill right after the definition
        let (block, index) = body
            .position_of(instr)
            .expect("demotion candidate unlinked mid-pass");
        let store = body.insert_instr(
            block,
            index + 1,
            "",
            Ty::Void,
            Op::Store {
                value: Value::Instr(instr),
                ptr: slot.clone(),
            },
        );

        reload_before_instr_users(body, instr, &slot, &ty, &base, Some(store));
        reload_before_terminator_users(body, instr, &slot, &ty, &base);
    }
    stats.value_slots = candidates.len();

    debug!(
        phi_slots = stats.phi_slots,
        value_slots = stats.value_slots,
        "demoted SSA values to memory"
    );
    stats
}
