use super::{load_module, save_module};
use chakravyuha_analysis::{emit_report_json, with_report};
use chakravyuha_transform::{parse_pipeline, pass, PassConfig};
use clap::Args;
use std::error::Error;
use std::fs;
use tracing::info;

#[derive(Args)]
pub struct ObfuscateArgs {
    /// Output path for the transformed module
    #[arg(short, long, default_value = "obfuscated.json")]
    output: String,

    /// Comma-separated pipeline spec (pass names as the host would see them)
    #[arg(long, default_value = "chakravyuha-all")]
    passes: String,

    /// Fixed RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Also write the JSON obfuscation report to this path
    #[arg(long)]
    report: Option<String>,
}

impl super::Command for ObfuscateArgs {
    fn execute(self, input: &str) -> Result<(), Box<dyn Error>> {
        let mut module = load_module(input)?;
        with_report(|r| {
            r.input_file = input.to_string();
            r.output_file = self.output.clone();
        });

        let config = PassConfig {
            seed: self.seed,
            ..PassConfig::default()
        };
        let passes = parse_pipeline(&self.passes, &config)?;
        let preserved = pass::run(&mut module, &passes, &config)?;
        info!(
            "pipeline '{}' finished ({:?} analyses preserved)",
            self.passes, preserved
        );

        save_module(&self.output, &module)?;
        if let Some(report_path) = self.report {
            let doc = emit_report_json(&module);
            fs::write(report_path, serde_json::to_string_pretty(&doc)?)?;
        }
        Ok(())
    }
}
