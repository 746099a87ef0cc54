pub mod demote;
pub mod fake_code;
pub mod flatten;
pub mod pass;
pub mod string_encrypt;

use chakravyuha_core::Module;
use chakravyuha_utils::errors::TransformError;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub use fake_code::FakeCodeInsertion;
pub use flatten::ControlFlowFlatten;
pub use string_encrypt::StringEncrypt;

/// Name and version the plugin reports to its host.
pub const PLUGIN_NAME: &str = "chakravyuha";
pub const PLUGIN_VERSION: &str = "v0.1";

/// What a pass claims about host analyses after running: `All` when the
/// module is untouched, `None` after any mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preserved {
    All,
    None,
}

impl Preserved {
    pub fn fold(self, other: Preserved) -> Preserved {
        if self == Preserved::None || other == Preserved::None {
            Preserved::None
        } else {
            Preserved::All
        }
    }
}

/// Trait for module-level obfuscation passes.
pub trait ModulePass: Send + Sync {
    /// Returns the pass name for logging and identification.
    fn name(&self) -> &'static str;
    /// Applies the pass to the module, reporting which analyses survive.
    fn run(&self, module: &mut Module, rng: &mut StdRng) -> Result<Preserved, TransformError>;
}

/// Configuration for the obfuscation passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassConfig {
    /// Fixed RNG seed; `None` draws from OS entropy. Fixing the seed is the
    /// only way to get byte-identical output across runs.
    pub seed: Option<u64>,
    /// Functions with fewer blocks than this are not flattened.
    pub min_flatten_blocks: usize,
    /// Restrict string encryption to globals with this name prefix
    /// (compatibility with `.str`-filtered toolchains). Off by default.
    pub string_name_prefix: Option<String>,
    /// Upper bound on fake-code insertion sites per function.
    pub max_fake_blocks: usize,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            seed: None,
            min_flatten_blocks: 2,
            string_name_prefix: None,
            max_fake_blocks: 10,
        }
    }
}

/// Maps pipeline element names to pass constructors, the way the host's
/// pipeline-parsing callback would.
pub fn parse_pipeline(
    spec: &str,
    config: &PassConfig,
) -> Result<Vec<Box<dyn ModulePass>>, TransformError> {
    let mut passes: Vec<Box<dyn ModulePass>> = Vec::new();
    for element in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match element {
            "chakravyuha-string-encrypt" => {
                passes.push(Box::new(StringEncrypt::new(config.clone())));
            }
            "chakravyuha-control-flow-flatten" => {
                passes.push(Box::new(ControlFlowFlatten::new(config.clone())));
            }
            "chakravyuha-fake-code" => {
                passes.push(Box::new(FakeCodeInsertion::new(config.clone())));
            }
            "chakravyuha-all" => {
                passes.push(Box::new(StringEncrypt::new(config.clone())));
                passes.push(Box::new(ControlFlowFlatten::new(config.clone())));
                passes.push(Box::new(FakeCodeInsertion::new(config.clone())));
            }
            other => return Err(TransformError::InvalidPass(other.to_string())),
        }
    }
    Ok(passes)
}
