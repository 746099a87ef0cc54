use chakravyuha_core::Module;
use chakravyuha_utils::errors::ObfuscateError;
use clap::Subcommand;
use std::error::Error;
use std::fs;

pub mod cfg;
pub mod obfuscate;
pub mod run;
pub mod verify;

/// CLI subcommands for Chakravyuha.
#[derive(Subcommand)]
pub enum Cmd {
    /// Obfuscate a module with the specified pass pipeline
    Obfuscate(obfuscate::ObfuscateArgs),
    /// Write per-function CFGs as Graphviz .dot to stdout or a file
    Cfg(cfg::CfgArgs),
    /// Execute a function through the reference interpreter
    Run(run::RunArgs),
    /// Verify the module and report the first failure
    Verify(verify::VerifyArgs),
}

/// Trait for executing CLI subcommands against the input module path.
pub trait Command {
    fn execute(self, input: &str) -> Result<(), Box<dyn Error>>;
}

impl Command for Cmd {
    fn execute(self, input: &str) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Obfuscate(args) => args.execute(input),
            Cmd::Cfg(args) => args.execute(input),
            Cmd::Run(args) => args.execute(input),
            Cmd::Verify(args) => args.execute(input),
        }
    }
}

/// Loads a JSON-serialized module from disk.
pub fn load_module(path: &str) -> Result<Module, ObfuscateError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Writes a module back to disk as pretty-printed JSON.
pub fn save_module(path: &str, module: &Module) -> Result<(), ObfuscateError> {
    let raw = serde_json::to_string_pretty(module)?;
    fs::write(path, raw)?;
    Ok(())
}
