mod run;
mod script;
mod sym;

use anyhow::Error;
use clap::Parser;

pub use self::{run::RunCommand, script::ScriptCommand, sym::SymCommand};

#[derive(Parser)]
#[command(name = "weft", version, about = "A WebAssembly interpreter and symbolic executor")]
pub struct WeftApp {
    /// Enable debug logging (shorthand for RUST_LOG=debug).
    #[clap(long = "debug", global = true)]
    debug: bool,

    /// Run the solver's simplifier over reported terms.
    #[clap(long = "optimize", global = true)]
    optimize: bool,

    /// Log per-stage timings.
    #[clap(long = "profiling", global = true)]
    profiling: bool,

    #[command(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Execute a Wasm module.
    Run(RunCommand),
    /// Execute the directives of a .wast script.
    Script(ScriptCommand),
    /// Explore a Wasm module symbolically.
    Sym(SymCommand),
}

/// Implemented by sub-commands in order to execute them.
pub trait Command {
    /// Executes the command under the global options.
    fn execute(self, options: &GlobalOptions) -> Result<(), Error>;
}

/// The global flags, passed down to every sub-command.
#[derive(Debug, Copy, Clone)]
pub struct GlobalOptions {
    pub optimize: bool,
    pub profiling: bool,
}

impl WeftApp {
    /// Initialises the process-wide logger; `--debug` lowers the filter,
    /// `RUST_LOG` still takes precedence.
    pub fn init_logging(&self) {
        let default_level = if self.debug { "debug" } else { "warn" };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp(None)
            .init();
    }

    pub fn execute(self) -> Result<(), Error> {
        let options = GlobalOptions {
            optimize: self.optimize,
            profiling: self.profiling,
        };
        match self.subcommand {
            SubCommand::Run(command) => command.execute(&options),
            SubCommand::Script(command) => command.execute(&options),
            SubCommand::Sym(command) => command.execute(&options),
        }
    }
}
