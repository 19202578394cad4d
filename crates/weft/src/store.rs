//! The store: single owner of all runtime instances.
//!
//! Every function, table, memory and global allocated by linking lives in
//! one of the store's vectors; cross-module references are integer handles
//! into them. A module instance is a record mapping its module-local index
//! spaces onto store handles. The store is a plain value: forking a
//! symbolic execution path clones it, and memory contents are shared
//! copy-on-write underneath.

use std::collections::HashMap;
use std::rc::Rc;

use weft_core::{FuncType, RefType, Trap, ValType};

use crate::ast::{GlobalType, MemType, TableType};
use crate::exec::Algebra;
use crate::module::Code;

/// Bytes per linear-memory page.
pub const PAGE_SIZE: usize = 65536;

/// A runtime reference: null, or a handle to a store entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ref {
    /// The null reference of the given type.
    Null(RefType),
    /// A function handle.
    Func(u32),
    /// An opaque host value handle.
    Extern(u32),
}

impl Ref {
    /// Returns `true` for the null references.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    /// The reference type of this value.
    pub fn ty(&self) -> RefType {
        match self {
            Self::Null(ty) => *ty,
            Self::Func(_) => RefType::Func,
            Self::Extern(_) => RefType::Extern,
        }
    }
}

/// The compiled body of a Wasm function, shared between the store and any
/// frames executing it.
#[derive(Debug)]
pub struct WasmFuncCode {
    /// Types of the declared locals, after the parameters.
    pub locals: Box<[ValType]>,
    /// The body.
    pub body: Code,
}

/// A host function: invoked with the popped operands on the interpreter's
/// thread; may push one result and may extend the path condition.
pub type HostFunc<A> = Rc<
    dyn Fn(
        &mut A,
        &mut HostCtx<'_, A>,
        &[<A as Algebra>::Value],
    ) -> Result<Option<<A as Algebra>::Value>, Trap>,
>;

/// What a host function may touch beyond its arguments.
pub struct HostCtx<'a, A: Algebra> {
    /// The path condition of the calling thread.
    pub path: &'a mut Vec<A::Value>,
}

/// A function instance.
pub enum FuncInst<A: Algebra> {
    /// A function defined by a linked module.
    Wasm {
        /// Its signature.
        ty: FuncType,
        /// The owning module instance.
        instance: u32,
        /// Locals and body.
        code: Rc<WasmFuncCode>,
    },
    /// A function provided by the host.
    Host {
        /// Its signature.
        ty: FuncType,
        /// The implementation.
        func: HostFunc<A>,
    },
}

impl<A: Algebra> FuncInst<A> {
    /// The signature of the function.
    pub fn ty(&self) -> &FuncType {
        match self {
            Self::Wasm { ty, .. } | Self::Host { ty, .. } => ty,
        }
    }
}

impl<A: Algebra> Clone for FuncInst<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Wasm { ty, instance, code } => Self::Wasm {
                ty: ty.clone(),
                instance: *instance,
                code: Rc::clone(code),
            },
            Self::Host { ty, func } => Self::Host {
                ty: ty.clone(),
                func: Rc::clone(func),
            },
        }
    }
}

impl<A: Algebra> std::fmt::Debug for FuncInst<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wasm { ty, instance, .. } => f
                .debug_struct("FuncInst::Wasm")
                .field("ty", ty)
                .field("instance", instance)
                .finish_non_exhaustive(),
            Self::Host { ty, .. } => f
                .debug_struct("FuncInst::Host")
                .field("ty", ty)
                .finish_non_exhaustive(),
        }
    }
}

/// A table instance: a sized vector of references.
#[derive(Debug, Clone)]
pub struct TableInst {
    /// The declared type.
    pub ty: TableType,
    /// Current contents; the length is the current size.
    pub elems: Vec<Ref>,
}

impl TableInst {
    /// Allocates a table of `ty.limits.min` null entries.
    pub fn new(ty: TableType) -> Self {
        Self {
            elems: vec![Ref::Null(ty.elem); ty.limits.min as usize],
            ty,
        }
    }

    /// Current size in elements.
    pub fn size(&self) -> u32 {
        self.elems.len() as u32
    }

    /// Grows by `delta` entries filled with `init`; returns the old size,
    /// or `None` when the limit would be exceeded.
    pub fn grow(&mut self, delta: u32, init: Ref) -> Option<u32> {
        let old = self.size();
        let new = old.checked_add(delta)?;
        if let Some(max) = self.ty.limits.max {
            if new > max {
                return None;
            }
        }
        self.elems.resize(new as usize, init);
        Some(old)
    }
}

/// A linear memory instance; the byte representation belongs to the value
/// algebra so that symbolic contents are possible.
#[derive(Debug, Clone)]
pub struct MemInst<A: Algebra> {
    /// The declared type.
    pub ty: MemType,
    /// Current size in pages.
    pub pages: u32,
    /// The bytes, in the algebra's representation.
    pub data: A::Mem,
}

impl<A: Algebra> MemInst<A> {
    /// Current size in bytes.
    pub fn byte_len(&self) -> usize {
        self.pages as usize * PAGE_SIZE
    }

    /// Whether the access `[addr, addr + width)` is in bounds.
    ///
    /// `addr` is the 33-bit effective address, so the sum cannot wrap.
    pub fn in_bounds(&self, addr: u64, width: u64) -> bool {
        addr + width <= self.byte_len() as u64
    }
}

/// A global instance.
#[derive(Debug, Clone)]
pub struct GlobalInst<A: Algebra> {
    /// The declared type.
    pub ty: GlobalType,
    /// The current value.
    pub value: A::Value,
}

/// The runtime residue of an element segment: its references, until
/// dropped.
#[derive(Debug, Clone)]
pub struct ElemInst {
    /// The reference type of the segment.
    pub ty: RefType,
    /// The materialised references; empty once dropped.
    pub refs: Vec<Ref>,
}

/// The runtime residue of a data segment: its bytes, until dropped.
#[derive(Debug, Clone)]
pub struct DataInst {
    /// The payload; a dropped segment behaves as zero-length.
    pub bytes: Rc<[u8]>,
    /// Set by `data.drop` and for active segments after initialisation.
    pub dropped: bool,
}

impl DataInst {
    /// The accessible bytes: none once dropped.
    pub fn bytes(&self) -> &[u8] {
        if self.dropped {
            &[]
        } else {
            &self.bytes
        }
    }
}

/// An external value: a store handle of any kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExternVal {
    /// A function handle.
    Func(u32),
    /// A table handle.
    Table(u32),
    /// A memory handle.
    Memory(u32),
    /// A global handle.
    Global(u32),
}

/// One linked module: maps its local index spaces to store handles and
/// owns its segments and exports.
#[derive(Debug, Clone, Default)]
pub struct Instance {
    /// Function handles, imports first.
    pub funcs: Vec<u32>,
    /// Table handles.
    pub tables: Vec<u32>,
    /// Memory handles.
    pub memories: Vec<u32>,
    /// Global handles.
    pub globals: Vec<u32>,
    /// The declared types, for `call_indirect` checks.
    pub types: Vec<FuncType>,
    /// Element segments.
    pub elems: Vec<ElemInst>,
    /// Data segments.
    pub datas: Vec<DataInst>,
    /// Exports by name.
    pub exports: HashMap<String, ExternVal>,
}

/// Owner of all runtime instances, plus the value algebra driving them.
#[derive(Debug, Clone)]
pub struct Store<A: Algebra> {
    /// The value algebra.
    pub alg: A,
    /// All function instances.
    pub funcs: Vec<FuncInst<A>>,
    /// All table instances.
    pub tables: Vec<TableInst>,
    /// All memory instances.
    pub memories: Vec<MemInst<A>>,
    /// All global instances.
    pub globals: Vec<GlobalInst<A>>,
    /// All module instances, in link order.
    pub instances: Vec<Instance>,
}

impl<A: Algebra> Store<A> {
    /// Creates an empty store driven by `alg`.
    pub fn new(alg: A) -> Self {
        Self {
            alg,
            funcs: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
            globals: Vec::new(),
            instances: Vec::new(),
        }
    }

    /// The export `name` of module instance `instance`, if present.
    pub fn export(&self, instance: u32, name: &str) -> Option<ExternVal> {
        self.instances
            .get(instance as usize)?
            .exports
            .get(name)
            .copied()
    }
}
