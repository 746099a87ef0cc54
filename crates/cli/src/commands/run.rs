use super::load_module;
use chakravyuha_core::interp;
use clap::Args;
use std::error::Error;

#[derive(Args)]
pub struct RunArgs {
    /// Function to execute
    #[arg(short, long, default_value = "main")]
    function: String,

    /// Step budget before execution is aborted
    #[arg(long, default_value_t = 1_000_000)]
    fuel: u64,

    /// Integer arguments passed to the function
    args: Vec<i64>,
}

impl super::Command for RunArgs {
    fn execute(self, input: &str) -> Result<(), Box<dyn Error>> {
        let module = load_module(input)?;
        let exec =
            interp::run_function_with_fuel(&module, &self.function, &self.args, self.fuel)?;

        if !exec.output.is_empty() {
            print!("{}", String::from_utf8_lossy(&exec.output));
        }
        match exec.ret {
            Some(value) => println!("{} returned {value}", self.function),
            None => println!("{} returned void", self.function),
        }
        Ok(())
    }
}
