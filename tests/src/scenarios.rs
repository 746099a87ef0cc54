//! The concrete end-to-end scenarios: literal input programs, each pinned to
//! a distinct expected outcome.

use crate::fixtures;
use chakravyuha_analysis::with_report;
use chakravyuha_core::{interp, verifier, Initializer, Module, Op, Terminator, Ty, Value};
use chakravyuha_transform::{
    parse_pipeline, pass, ControlFlowFlatten, ModulePass, PassConfig, Preserved, StringEncrypt,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn seeded(seed: u64) -> PassConfig {
    PassConfig {
        seed: Some(seed),
        ..PassConfig::default()
    }
}

/// Scenario 1: a module with `int main(){return 0;}` and no string globals.
/// String encryption touches nothing, and the whole pipeline leaves an
/// equivalent program behind.
#[test]
fn test_empty_string_table() {
    let mut module = fixtures::trivial_main();
    let pristine = module.clone();

    let mut rng = StdRng::seed_from_u64(8);
    let preserved = StringEncrypt::new(seeded(8))
        .run(&mut module, &mut rng)
        .unwrap();
    assert_eq!(preserved, Preserved::All);
    assert_eq!(module, pristine);

    let config = seeded(8);
    let passes = parse_pipeline("chakravyuha-all", &config).unwrap();
    pass::run(&mut module, &passes, &config).unwrap();
    assert_eq!(interp::run_function(&module, "main", &[]).unwrap().ret, Some(0));
}

/// Scenario 2: hello world. The plaintext global disappears, an encrypted
/// global of identical length appears, the call's argument becomes a stack
/// buffer, and the program still prints `hello\n`.
#[test]
fn test_hello_world() {
    let mut module = fixtures::hello_world();

    let mut rng = StdRng::seed_from_u64(12);
    StringEncrypt::new(seeded(12))
        .run(&mut module, &mut rng)
        .unwrap();
    verifier::verify_module(&module).unwrap();

    assert!(module.globals().all(|(_, g)| g.name != ".str"));
    let (_, encrypted) = module
        .globals()
        .find(|(_, g)| g.name == ".str.enc")
        .expect("encrypted global must exist");
    assert_eq!(encrypted.ty, Ty::array(Ty::I8, 7));
    let Some(Initializer::Bytes(cipher)) = &encrypted.init else {
        panic!("ciphertext must be a byte array");
    };
    assert_eq!(cipher.len(), 7);

    // the print call's first argument now points at a local buffer
    let print = module.function_by_name("print_str").unwrap();
    let main = module.function_by_name("main").unwrap();
    let body = module.function(main).body.as_ref().unwrap();
    let call_arg = body
        .layout()
        .iter()
        .flat_map(|&b| body.block(b).instrs.iter())
        .find_map(|&i| match &body.instr(i).op {
            Op::Call { callee, args } if *callee == print => Some(args[0].clone()),
            _ => None,
        })
        .expect("main still calls the print routine");
    assert!(matches!(call_arg, Value::Instr(_)));

    let exec = interp::run_function(&module, "main", &[]).unwrap();
    assert_eq!(exec.output, b"hello\n");
    assert_eq!(exec.ret, Some(0));
}

/// Scenario 3: `if (x > 0) return 1; else return -1;`. Flattening installs
/// a two-case dispatcher, keeps the returns, and preserves both outcomes.
#[test]
fn test_branch_on_input() {
    let mut module = fixtures::branch_on_input();
    let mut rng = StdRng::seed_from_u64(30);
    ControlFlowFlatten::new(seeded(30))
        .run(&mut module, &mut rng)
        .unwrap();
    verifier::verify_module(&module).unwrap();

    let f = module.function_by_name("sign").unwrap();
    let body = module.function(f).body.as_ref().unwrap();
    let case_count = body
        .layout()
        .iter()
        .find_map(|&b| match body.terminator(b) {
            Some(Terminator::Switch { cases, .. }) => Some(cases.len()),
            _ => None,
        })
        .expect("dispatcher switch");
    assert_eq!(case_count, 2);
    let returns = body
        .layout()
        .iter()
        .filter(|&&b| matches!(body.terminator(b), Some(Terminator::Ret { .. })))
        .count();
    assert_eq!(returns, 2);

    assert_eq!(interp::run_function(&module, "sign", &[5]).unwrap().ret, Some(1));
    assert_eq!(
        interp::run_function(&module, "sign", &[-7]).unwrap().ret,
        Some(-1)
    );
}

/// Scenario 4: a four-case switch on a byte. The dispatcher owns every
/// former arm, and each case value computes the same result as before.
#[test]
fn test_switch_without_fall_through() {
    let source = fixtures::switch_on_byte();
    let mut module = source.clone();
    let mut rng = StdRng::seed_from_u64(44);
    ControlFlowFlatten::new(seeded(44))
        .run(&mut module, &mut rng)
        .unwrap();
    verifier::verify_module(&module).unwrap();

    let f = module.function_by_name("classify").unwrap();
    let body = module.function(f).body.as_ref().unwrap();
    // 4 cases + default arm + exit behind the dispatcher, plus entry,
    // dispatcher, and its unreachable default
    assert_eq!(body.layout().len(), 9);

    for x in 0..=5 {
        let expected = interp::run_function(&source, "classify", &[x]).unwrap();
        let actual = interp::run_function(&module, "classify", &[x]).unwrap();
        assert_eq!(expected, actual, "classify({x})");
    }
}

/// Scenario 5: a counted loop with an induction variable held in phis.
/// After flattening no phis remain, the verifier accepts, and the sum is
/// still 45.
#[test]
fn test_loop_with_induction_variable() {
    let mut module = fixtures::loop_sum();
    let mut rng = StdRng::seed_from_u64(55);
    ControlFlowFlatten::new(seeded(55))
        .run(&mut module, &mut rng)
        .unwrap();
    verifier::verify_module(&module).unwrap();

    let f = module.function_by_name("sum").unwrap();
    let body = module.function(f).body.as_ref().unwrap();
    let phis = body
        .layout()
        .iter()
        .flat_map(|&b| body.block(b).instrs.iter())
        .filter(|&&i| body.instr(i).op.is_phi())
        .count();
    assert_eq!(phis, 0);
    assert_eq!(interp::run_function(&module, "sum", &[]).unwrap().ret, Some(45));
}

/// Scenario 6: a computed goto. String encryption proceeds, flattening
/// skips the function with a counted reason, the module verifies, and the
/// behavior is unchanged.
#[test]
fn test_ineligible_function() {
    let source = fixtures::computed_goto();
    let mut module = source.clone();

    let layout_before: Vec<_> = {
        let f = module.function_by_name("pick").unwrap();
        module.function(f).body.as_ref().unwrap().layout().to_vec()
    };
    let skipped_before = with_report(|r| r.skipped_functions);

    let config = seeded(66);
    let passes = parse_pipeline(
        "chakravyuha-string-encrypt, chakravyuha-control-flow-flatten",
        &config,
    )
    .unwrap();
    pass::run(&mut module, &passes, &config).unwrap();

    // SE ran: the plaintext is gone
    assert!(module.globals().all(|(_, g)| g.name != ".str.ok"));
    // CFF refused: the function layout is untouched and the skip was counted
    let f = module.function_by_name("pick").unwrap();
    assert_eq!(
        module.function(f).body.as_ref().unwrap().layout(),
        layout_before.as_slice()
    );
    let skipped_after = with_report(|r| r.skipped_functions);
    assert!(skipped_after > skipped_before);

    verifier::verify_module(&module).unwrap();
    for i in [0i64, 1] {
        let expected = interp::run_function(&source, "pick", &[i]).unwrap();
        let actual = interp::run_function(&module, "pick", &[i]).unwrap();
        assert_eq!(expected, actual, "pick({i})");
    }
}

/// Two full pipeline runs with the same seed produce byte-identical modules
/// even when every pass participates.
#[test]
fn test_full_pipeline_determinism() {
    let run_once = || -> Module {
        let mut module = fixtures::switch_on_byte();
        let config = seeded(77);
        let passes = parse_pipeline("chakravyuha-all", &config).unwrap();
        pass::run(&mut module, &passes, &config).unwrap();
        module
    };
    let first = serde_json::to_string(&run_once()).unwrap();
    let second = serde_json::to_string(&run_once()).unwrap();
    assert_eq!(first, second);
}
