use std::path::PathBuf;

use anyhow::{bail, Error, Result};
use clap::Parser;
use weft::{Concrete, Linker, Store};

use crate::commands::{Command, GlobalOptions};
use crate::utils;

/// Executes a Wasm module.
#[derive(Parser)]
pub struct RunCommand {
    /// The module to execute, in binary or text form.
    #[clap(value_name = "MODULE")]
    module: PathBuf,

    /// The exported function to invoke.
    ///
    /// Without this flag the conventional entry points `_start` and
    /// `main` are tried in that order.
    #[clap(long = "invoke", value_name = "FUNCTION")]
    invoke: Option<String>,

    /// Arguments for the invoked function.
    #[clap(value_name = "ARGS", trailing_var_arg = true)]
    args: Vec<String>,
}

impl Command for RunCommand {
    fn execute(self, options: &GlobalOptions) -> Result<(), Error> {
        let profiling = options.profiling;
        let bytes = utils::timed(profiling, "read", || utils::read_module_bytes(&self.module))?;
        let module = utils::timed(profiling, "load", || weft::load(&bytes))?;

        let mut store = Store::new(Concrete);
        let mut linker = Linker::new();
        let instance =
            utils::timed(profiling, "link", || linker.instantiate(&mut store, &module))?;

        let func_name = self.entry_point(&store, instance)?;
        let Some(weft::ExternVal::Func(handle)) = store.export(instance, &func_name) else {
            bail!("no exported function named {func_name}")
        };
        let ty = store.funcs[handle as usize].ty().clone();
        let args = utils::decode_func_args(&ty, &self.args)?;
        let results = utils::timed(profiling, "run", || {
            weft::invoke(&mut store, instance, &func_name, &args)
        })?;
        utils::print_results(&results);
        Ok(())
    }
}

impl RunCommand {
    /// The function to invoke: `--invoke`, or a conventional entry point.
    fn entry_point(&self, store: &Store<Concrete>, instance: u32) -> Result<String> {
        if let Some(name) = &self.invoke {
            return Ok(name.clone());
        }
        for candidate in ["_start", "main"] {
            if matches!(
                store.export(instance, candidate),
                Some(weft::ExternVal::Func(_))
            ) {
                return Ok(candidate.into());
            }
        }
        bail!("no --invoke given and no conventional entry point exported")
    }
}
