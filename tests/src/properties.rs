//! Universal properties of the pass pipeline: semantic equivalence,
//! verifier acceptance, determinism under a fixed seed, and the structural
//! guarantees flattening makes about the output CFG.

use crate::fixtures;
use chakravyuha_core::{cfg, interp, verifier, BlockId, Module, Op, Terminator, Value};
use chakravyuha_transform::{parse_pipeline, pass, ControlFlowFlatten, ModulePass, PassConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn obfuscated(module: &Module, seed: u64) -> Module {
    let mut out = module.clone();
    let config = PassConfig {
        seed: Some(seed),
        ..PassConfig::default()
    };
    let passes = parse_pipeline("chakravyuha-all", &config).unwrap();
    pass::run(&mut out, &passes, &config).unwrap();
    out
}

fn flattened(module: &Module, seed: u64) -> Module {
    let mut out = module.clone();
    let mut rng = StdRng::seed_from_u64(seed);
    ControlFlowFlatten::new(PassConfig::default())
        .run(&mut out, &mut rng)
        .unwrap();
    out
}

#[test]
fn test_observable_equivalence_across_corpus() {
    for (module, func, arg_sets) in fixtures::corpus() {
        for seed in [1u64, 7, 42] {
            let transformed = obfuscated(&module, seed);
            for args in &arg_sets {
                let before = interp::run_function(&module, func, args).unwrap();
                let after = interp::run_function(&transformed, func, args).unwrap();
                assert_eq!(
                    before, after,
                    "{func}({args:?}) diverged under seed {seed}"
                );
            }
        }
    }
}

#[test]
fn test_verifier_accepts_transformed_corpus() {
    for (module, _, _) in fixtures::corpus() {
        verifier::verify_module(&module).unwrap();
        let transformed = obfuscated(&module, 13);
        verifier::verify_module(&transformed).unwrap();
    }
}

#[test]
fn test_fixed_seed_output_is_byte_identical() {
    for (module, _, _) in fixtures::corpus() {
        let first = serde_json::to_string(&obfuscated(&module, 99)).unwrap();
        let second = serde_json::to_string(&obfuscated(&module, 99)).unwrap();
        assert_eq!(first, second);
    }
}

#[test]
fn test_no_phis_survive_flattening() {
    for source in [fixtures::loop_sum(), fixtures::switch_on_byte()] {
        let transformed = flattened(&source, 5);
        for (_, function) in transformed.functions() {
            let Some(body) = function.body.as_ref() else {
                continue;
            };
            for &block in body.layout() {
                for &instr in &body.block(block).instrs {
                    assert!(
                        !body.instr(instr).op.is_phi(),
                        "phi left behind in '{}'",
                        function.name
                    );
                }
            }
        }
    }
}

#[test]
fn test_dispatcher_shape() {
    let transformed = flattened(&fixtures::branch_on_input(), 21);
    let f = transformed.function_by_name("sign").unwrap();
    let body = transformed.function(f).body.as_ref().unwrap();

    let dispatchers: Vec<BlockId> = body
        .layout()
        .iter()
        .copied()
        .filter(|&b| matches!(body.terminator(b), Some(Terminator::Switch { .. })))
        .collect();
    assert_eq!(dispatchers.len(), 1, "exactly one dispatcher switch");
    let dispatch = dispatchers[0];

    // the switch scrutinee is a load of the state slot performed in the
    // dispatcher itself
    let Some(Terminator::Switch { cond, default, .. }) = body.terminator(dispatch) else {
        unreachable!();
    };
    let Value::Instr(load) = cond else {
        panic!("dispatcher must switch on a loaded value");
    };
    assert_eq!(body.instr(*load).block, dispatch);
    let Op::Load { ptr } = &body.instr(*load).op else {
        panic!("dispatcher scrutinee must come from a load");
    };
    let Value::Instr(slot) = ptr else {
        panic!("state must live in a stack slot");
    };
    assert!(body.instr(*slot).op.is_alloca());
    assert_eq!(body.instr(*slot).block, body.entry());

    // exactly one default block, terminated by unreachable
    assert_eq!(body.terminator(*default), Some(&Terminator::Unreachable));

    // the entry's sole successor is the dispatcher
    assert_eq!(
        body.terminator(body.entry()),
        Some(&Terminator::Br { dest: dispatch })
    );
}

#[test]
fn test_flattened_blocks_have_single_entry_edge() {
    let source = fixtures::switch_on_byte();
    let transformed = flattened(&source, 33);
    let f = transformed.function_by_name("classify").unwrap();
    let body = transformed.function(f).body.as_ref().unwrap();

    let dispatch = body
        .layout()
        .iter()
        .copied()
        .find(|&b| matches!(body.terminator(b), Some(Terminator::Switch { .. })))
        .unwrap();

    // every former non-entry block that still transitions (case and default
    // arms, the shared exit's predecessors) is reached only from the
    // dispatcher
    for &block in body.layout() {
        if block == body.entry() || block == dispatch {
            continue;
        }
        let name = &body.block(block).name;
        if name.starts_with("cff.") {
            continue;
        }
        let preds = cfg::predecessors(body, block);
        assert_eq!(
            preds,
            vec![dispatch],
            "block '{name}' must be reached only through the dispatcher"
        );
    }
}

#[test]
fn test_returns_are_preserved_by_flattening() {
    let source = fixtures::branch_on_input();
    let transformed = flattened(&source, 2);

    let collect_returns = |module: &Module| {
        let f = module.function_by_name("sign").unwrap();
        let body = module.function(f).body.as_ref().unwrap();
        let mut rets: Vec<Option<Value>> = body
            .layout()
            .iter()
            .filter_map(|&b| match body.terminator(b) {
                Some(Terminator::Ret { value }) => Some(value.clone()),
                _ => None,
            })
            .collect();
        rets.sort_by_key(|v| format!("{v:?}"));
        rets
    };
    assert_eq!(collect_returns(&source), collect_returns(&transformed));
}

#[test]
fn test_string_encryption_is_idempotent_at_module_level() {
    use chakravyuha_transform::StringEncrypt;
    let mut module = fixtures::hello_world();

    let mut rng = StdRng::seed_from_u64(4);
    StringEncrypt::new(PassConfig::default())
        .run(&mut module, &mut rng)
        .unwrap();
    let names_once: Vec<String> = module.globals().map(|(_, g)| g.name.clone()).collect();

    let mut rng = StdRng::seed_from_u64(5);
    StringEncrypt::new(PassConfig::default())
        .run(&mut module, &mut rng)
        .unwrap();
    let names_twice: Vec<String> = module.globals().map(|(_, g)| g.name.clone()).collect();

    assert_eq!(names_once, names_twice);
    assert_eq!(
        interp::run_function(&module, "main", &[]).unwrap().output,
        b"hello\n"
    );
}
