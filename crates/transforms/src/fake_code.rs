//! Fake-code insertion.
//!
//! A stylistic transform: unconditional branches are rewritten into
//! conditional branches guarded by a constant-false predicate whose taken
//! side leads into bogus arithmetic that stores to a dummy stack slot. The
//! dead region is either a straight block or a small counted loop. Nothing
//! on the live path changes, so there are no correctness subtleties beyond
//! leaving phi-carrying successors alone (their incoming lists would need a
//! new edge entry).

use crate::{ModulePass, PassConfig, Preserved};
use chakravyuha_analysis::with_report;
use chakravyuha_core::{
    BinOp, BlockId, Builder, FuncId, FunctionBody, ICmpPred, Module, Op, Terminator, Ty, Value,
};
use chakravyuha_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

pub struct FakeCodeInsertion {
    config: PassConfig,
}

impl FakeCodeInsertion {
    pub fn new(config: PassConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Default)]
struct FakeStats {
    blocks: u64,
    loops: u64,
    conditionals: u64,
    bogus: u64,
}

const BOGUS_OPS: [BinOp; 4] = [BinOp::Add, BinOp::Mul, BinOp::Xor, BinOp::Shl];

fn emit_bogus_chain(
    b: &mut Builder<'_>,
    rng: &mut StdRng,
    seedling: i64,
    count: usize,
) -> (Value, u64) {
    let mut acc = Value::i32(seedling);
    for i in 0..count {
        let op = BOGUS_OPS[rng.random_range(0..BOGUS_OPS.len())];
        let operand = if op == BinOp::Shl {
            Value::i32(1)
        } else {
            Value::i32(i as i64 + 1)
        };
        acc = b.bin(op, acc, operand, "fake.op");
    }
    (acc, count as u64)
}

/// Rewrites `block`'s unconditional branch into a never-taken conditional
/// into a straight run of bogus arithmetic.
fn insert_fake_conditional(
    body: &mut FunctionBody,
    block: BlockId,
    successor: BlockId,
    sink: Value,
    rng: &mut StdRng,
    stats: &mut FakeStats,
) {
    let fake_then = body.add_block("fake.then");
    let fake_merge = body.add_block("fake.merge");

    let mut b = Builder::at_block_end(body, fake_then);
    let count = rng.random_range(3..=10);
    let (acc, bogus) = emit_bogus_chain(&mut b, rng, 42, count);
    b.store(acc, sink);
    body.set_terminator(fake_then, Terminator::Br { dest: fake_merge });
    body.set_terminator(fake_merge, Terminator::Br { dest: successor });

    body.set_terminator(
        block,
        Terminator::CondBr {
            cond: Value::bool(false),
            then_dest: fake_then,
            else_dest: successor,
        },
    );

    stats.conditionals += 1;
    stats.blocks += 2;
    stats.bogus += bogus;
}

/// Rewrites `block`'s unconditional branch into a never-taken conditional
/// into a counted loop of bogus arithmetic.
fn insert_fake_loop(
    body: &mut FunctionBody,
    block: BlockId,
    successor: BlockId,
    sink: Value,
    rng: &mut StdRng,
    stats: &mut FakeStats,
) {
    let loop_entry = body.add_block("fake.loop.entry");
    let header = body.add_block("fake.loop.header");
    let loop_body = body.add_block("fake.loop.body");
    let exit = body.add_block("fake.loop.exit");

    body.set_terminator(loop_entry, Terminator::Br { dest: header });

    let mut b = Builder::at_block_end(body, header);
    let counter = b.phi(Ty::I32, vec![(Value::i32(0), loop_entry)], "fake.counter");
    let cond = b.icmp(ICmpPred::Slt, counter.clone(), Value::i32(10), "fake.cond");
    body.set_terminator(
        header,
        Terminator::CondBr {
            cond,
            then_dest: loop_body,
            else_dest: exit,
        },
    );

    let mut b = Builder::at_block_end(body, loop_body);
    let count = rng.random_range(5..=15);
    let (acc, bogus) = emit_bogus_chain(&mut b, rng, 1, count);
    b.store(acc, sink);
    let next = b.add(counter.clone(), Value::i32(1), "fake.inc");
    body.set_terminator(loop_body, Terminator::Br { dest: header });
    let counter_id = counter.as_instr().expect("phi is an instruction");
    if let Op::Phi { incomings } = &mut body.instr_mut(counter_id).op {
        incomings.push((next, loop_body));
    }

    body.set_terminator(exit, Terminator::Br { dest: successor });

    body.set_terminator(
        block,
        Terminator::CondBr {
            cond: Value::bool(false),
            then_dest: loop_entry,
            else_dest: successor,
        },
    );

    stats.loops += 1;
    stats.blocks += 4;
    // loop control counts toward the bogus total as in the reference pass
    stats.bogus += bogus + 4;
}

fn instrument_function(
    module: &mut Module,
    func: FuncId,
    config: &PassConfig,
    rng: &mut StdRng,
    stats: &mut FakeStats,
) -> bool {
    let function = module.function_mut(func);
    if function.is_intrinsic {
        return false;
    }
    let Some(body) = function.body.as_mut() else {
        return false;
    };

    // only instrument edges whose target carries no phis; a new predecessor
    // would invalidate their incoming lists
    let mut sites: Vec<(BlockId, BlockId)> = body
        .layout()
        .iter()
        .filter_map(|&b| match body.terminator(b) {
            Some(Terminator::Br { dest }) => Some((b, *dest)),
            _ => None,
        })
        .filter(|&(_, dest)| body.phis_of(dest).is_empty())
        .collect();
    if sites.is_empty() {
        return false;
    }

    sites.shuffle(rng);
    let cap = config.max_fake_blocks.min(sites.len());
    if cap == 0 {
        return false;
    }
    let budget = rng.random_range(1..=cap);
    let entry = body.entry();
    let sink = {
        let mut b = Builder::at_block_begin(body, entry);
        b.alloca(Ty::I32, "fake.sink")
    };

    for (block, successor) in sites.into_iter().take(budget) {
        if rng.random_range(0..2) == 0 {
            insert_fake_loop(body, block, successor, sink.clone(), rng, stats);
        } else {
            insert_fake_conditional(body, block, successor, sink.clone(), rng, stats);
        }
    }
    true
}

impl ModulePass for FakeCodeInsertion {
    fn name(&self) -> &'static str {
        "FakeCodeInsertion"
    }

    fn run(&self, module: &mut Module, rng: &mut StdRng) -> Result<Preserved, TransformError> {
        with_report(|r| {
            r.enable_fake_code_insertion = true;
            r.passes_run.push("FakeCodeInsertion".to_string());
        });

        let mut stats = FakeStats::default();
        let mut changed = false;
        for func in module.function_ids() {
            changed |= instrument_function(module, func, &self.config, rng, &mut stats);
        }

        with_report(|r| {
            r.fake_code_blocks_inserted += stats.blocks;
            r.fake_loops_inserted += stats.loops;
            r.fake_conditionals_inserted += stats.conditionals;
            r.total_bogus_instructions += stats.bogus;
        });
        debug!(
            blocks = stats.blocks,
            loops = stats.loops,
            conditionals = stats.conditionals,
            "fake-code insertion finished"
        );

        if changed {
            Ok(Preserved::None)
        } else {
            Ok(Preserved::All)
        }
    }
}
