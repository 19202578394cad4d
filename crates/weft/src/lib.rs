//! # weft
//!
//! A WebAssembly execution toolchain: modules are decoded from the binary
//! format (or handed over by a text front-end as a raw AST), lowered to a
//! fully indexed form, validated, linked against each other and against
//! host-provided modules, and executed — either concretely on native
//! values or symbolically on constraint terms.
//!
//! The pipeline runs strictly forward:
//!
//! ```text
//! decode -> group -> rewrite -> validate -> link -> interpret
//! ```
//!
//! Each stage consumes the previous stage's output as an immutable value.
//! The interpreter itself is written once, against the [`Algebra`] trait;
//! [`Concrete`] executes bit-exactly and [`sym::Symbolic`] builds solver
//! terms and forks at satisfiable branch points.
//!
//! ```no_run
//! use weft::{Concrete, Linker, Store};
//!
//! # fn main() -> Result<(), weft::Error> {
//! let wasm = std::fs::read("module.wasm").expect("read failed");
//! let module = weft::load(&wasm)?;
//! let mut store = Store::new(Concrete);
//! let mut linker = Linker::new();
//! let instance = linker.instantiate(&mut store, &module)?;
//! let results = weft::invoke(&mut store, instance, "main", &[])?;
//! println!("{results:?}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

use core::fmt;

use weft_core::Trap;

pub mod ast;
pub mod decode;
pub mod exec;
pub mod link;
pub mod module;
pub mod store;
pub mod sym;
pub mod valid;

pub use self::{
    exec::{invoke, Algebra, Branches, Concrete},
    link::{ExternModule, Linker},
    module::Module,
    store::{ExternVal, Store},
};

/// Any failure along the pipeline.
///
/// The first three variants are static errors produced by the decoder, the
/// rewriter and the type checker respectively; their messages use the
/// stable vocabulary of the reference test suite. [`Error::Trap`] is the
/// runtime channel. No stage recovers from another stage's errors.
#[derive(Debug)]
pub enum Error {
    /// The input is not a well-formed module.
    Malformed(String),
    /// The module is well-formed but violates a validation rule.
    Validation(String),
    /// Import resolution or segment initialisation failed at link time.
    Instantiation(String),
    /// Execution trapped.
    Trap(Trap),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn instantiation(msg: impl Into<String>) -> Self {
        Self::Instantiation(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Malformed(msg) | Self::Validation(msg) | Self::Instantiation(msg) => {
                write!(f, "{msg}")
            }
            Self::Trap(trap) => write!(f, "{trap}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Trap> for Error {
    fn from(trap: Trap) -> Self {
        Self::Trap(trap)
    }
}

/// Runs the front half of the pipeline on a binary module: decode, group,
/// rewrite and validate.
pub fn load(bytes: &[u8]) -> Result<Module, Error> {
    let raw = decode::decode_module(bytes)?;
    load_ast(raw)
}

/// Runs group, rewrite and validate on a raw AST, e.g. one delivered by an
/// external text parser.
pub fn load_ast(raw: ast::Module) -> Result<Module, Error> {
    let grouped = module::group(raw)?;
    let module = module::rewrite(grouped)?;
    valid::validate(&module)?;
    Ok(module)
}
