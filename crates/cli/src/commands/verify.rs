use super::load_module;
use chakravyuha_core::verifier;
use clap::Args;
use std::error::Error;

#[derive(Args)]
pub struct VerifyArgs {}

impl super::Command for VerifyArgs {
    fn execute(self, input: &str) -> Result<(), Box<dyn Error>> {
        let module = load_module(input)?;
        verifier::verify_module(&module)?;
        println!("module '{}' verifies", module.name);
        Ok(())
    }
}
