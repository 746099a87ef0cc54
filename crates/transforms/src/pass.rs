//! Pipeline driver.
//!
//! Seeds one RNG for the whole pipeline, runs each pass in order over the
//! module, then hands the result to the verifier. Per-function trouble never
//! reaches this level; passes convert it into counters and log lines, so the
//! only errors that surface here are structural (an invalid pipeline spec or
//! a module the verifier rejects outright).

use crate::{ModulePass, PassConfig, Preserved};
use chakravyuha_analysis::with_report;
use chakravyuha_core::{verifier, Module};
use chakravyuha_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

/// Runs `passes` over `module` in order and verifies the result.
pub fn run(
    module: &mut Module,
    passes: &[Box<dyn ModulePass>],
    config: &PassConfig,
) -> Result<Preserved, TransformError> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    with_report(|r| r.start_timer());

    let mut preserved = Preserved::All;
    for pass in passes {
        let outcome = pass.run(module, &mut rng)?;
        info!(
            "{:>20} {}",
            pass.name(),
            match outcome {
                Preserved::None => "modified",
                Preserved::All => "no change",
            }
        );
        preserved = preserved.fold(outcome);
    }

    verifier::verify_module(module)?;
    with_report(|r| r.stop_timer());
    Ok(preserved)
}
