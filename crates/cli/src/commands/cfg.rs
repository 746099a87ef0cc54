use super::load_module;
use chakravyuha_core::cfg::to_dot;
use chakravyuha_utils::errors::ObfuscateError;
use clap::Args;
use std::error::Error;
use std::fs;

#[derive(Args)]
pub struct CfgArgs {
    /// Output file for Graphviz .dot (default: stdout)
    #[arg(short, long)]
    output: Option<String>,

    /// Render only this function
    #[arg(short, long)]
    function: Option<String>,
}

impl super::Command for CfgArgs {
    fn execute(self, input: &str) -> Result<(), Box<dyn Error>> {
        let module = load_module(input)?;

        let mut dot = String::new();
        match &self.function {
            Some(name) => {
                let id = module
                    .function_by_name(name)
                    .ok_or_else(|| ObfuscateError::UnknownFunction(name.clone()))?;
                dot.push_str(&to_dot(module.function(id)));
            }
            None => {
                for (_, function) in module.functions() {
                    if function.body.is_some() {
                        dot.push_str(&to_dot(function));
                    }
                }
            }
        }

        if let Some(out_path) = self.output {
            fs::write(out_path, &dot)?;
        } else {
            println!("{dot}");
        }
        Ok(())
    }
}
