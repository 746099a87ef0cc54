/// Entry point for the Chakravyuha CLI.
///
/// This module parses command-line arguments and dispatches to subcommands
/// for obfuscating a module, rendering its CFG, executing it in the
/// reference interpreter, or verifying it. It initializes logging and
/// handles the main execution flow.
use chakravyuha_cli::commands::{Cmd, Command};
use clap::Parser;

/// Command-line interface for Chakravyuha.
///
/// Chakravyuha is an IR obfuscator that supports XOR string encryption,
/// control-flow flattening, and fake-code insertion over JSON-serialized
/// modules.
#[derive(Parser)]
#[command(name = "chakravyuha")]
#[command(about = "Chakravyuha: IR obfuscator")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Path to a JSON-serialized IR module
    input: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    cli.command.execute(&cli.input)
}
