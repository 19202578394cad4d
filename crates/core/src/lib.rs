//! Core primitives for the weft WebAssembly toolchain.
//!
//! This crate defines the pieces every pipeline stage agrees on:
//!
//! - the type grammar ([`ValType`], [`RefType`], [`FuncType`]),
//! - concrete runtime values ([`Val`]) together with the conversion and
//!   arithmetic traits the interpreter dispatches through,
//! - bit-preserving float wrappers ([`F32`], [`F64`]),
//! - the runtime failure channel ([`Trap`], [`TrapCode`]).
//!
//! Nothing in here knows about modules, stores or instruction encodings.

#![warn(missing_docs)]

mod nan_preserving_float;
mod trap;
mod types;
mod value;

pub use self::{
    nan_preserving_float::{F32, F64},
    trap::{Trap, TrapCode},
    types::{FuncType, RefType, ValType},
    value::{
        ArithmeticOps,
        ExtendInto,
        Float,
        FromVal,
        Integer,
        LittleEndianConvert,
        TransmuteInto,
        TruncSatInto,
        TryTruncateInto,
        Val,
        WrapInto,
    },
};
