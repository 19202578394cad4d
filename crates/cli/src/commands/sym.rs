use std::path::PathBuf;

use anyhow::{bail, Error, Result};
use clap::Parser;
use weft::sym::{self, solver::NaiveSolver, solver::Solver as _, Explorer, PathOutcome, Symbolic};
use weft::{Linker, Store};

use crate::commands::{Command, GlobalOptions};
use crate::utils;

/// Explores a Wasm module symbolically.
///
/// The module may import fresh symbols and path-condition primitives from
/// the `symbolic` module: `i32`, `i64`, `f32`, `f64`, `assume`, `assert`.
/// Parameters of the explored function become fresh symbols.
#[derive(Parser)]
pub struct SymCommand {
    /// The module to explore, in binary or text form.
    #[clap(value_name = "MODULE")]
    module: PathBuf,

    /// The exported function to explore.
    #[clap(long = "invoke", value_name = "FUNCTION", default_value = "main")]
    invoke: String,

    /// Stop after this many terminal paths.
    #[clap(long = "max-paths", value_name = "N", default_value_t = 4096)]
    max_paths: usize,
}

impl Command for SymCommand {
    fn execute(self, options: &GlobalOptions) -> Result<(), Error> {
        let profiling = options.profiling;
        let bytes = utils::timed(profiling, "read", || utils::read_module_bytes(&self.module))?;
        let module = utils::timed(profiling, "load", || weft::load(&bytes))?;

        let mut store = Store::new(Symbolic::new(NaiveSolver));
        let mut linker = Linker::new();
        linker.define_module(&mut store, "symbolic", sym::extern_module());
        let instance =
            utils::timed(profiling, "link", || linker.instantiate(&mut store, &module))?;

        let explorer = Explorer {
            max_paths: self.max_paths,
        };
        let mut reports = utils::timed(profiling, "explore", || {
            explorer.explore(store, instance, &self.invoke)
        })?;

        if options.optimize {
            let mut solver = NaiveSolver;
            for report in &mut reports {
                for constraint in &mut report.constraints {
                    if let sym::SymVal::Num(expr) = constraint {
                        *expr = solver.simplify(expr);
                    }
                }
            }
        }

        let mut violations = 0usize;
        for report in &reports {
            println!("{report}");
            if matches!(&report.outcome, PathOutcome::Trapped(_)) {
                violations += 1;
            }
        }
        println!("{} paths, {} trapped", reports.len(), violations);
        if violations > 0 {
            bail!("{violations} of {} paths trapped", reports.len())
        }
        Ok(())
    }
}
