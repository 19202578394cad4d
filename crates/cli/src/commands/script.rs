use std::path::PathBuf;

use anyhow::{Context as _, Error, Result};
use clap::Parser;
use weft_wast::WastRunner;

use crate::commands::{Command, GlobalOptions};
use crate::utils;

/// Executes the directives of a reference test-suite script.
#[derive(Parser)]
pub struct ScriptCommand {
    /// The `.wast` script to execute.
    #[clap(value_name = "SCRIPT")]
    script: PathBuf,
}

impl Command for ScriptCommand {
    fn execute(self, options: &GlobalOptions) -> Result<(), Error> {
        let source = std::fs::read_to_string(&self.script)
            .with_context(|| format!("failed to read {:?}", self.script))?;
        let filename = self.script.display().to_string();
        let mut runner = WastRunner::new();
        utils::timed(options.profiling, "script", || {
            runner.run_script(&filename, &source)
        })?;
        println!("all directives passed");
        Ok(())
    }
}
