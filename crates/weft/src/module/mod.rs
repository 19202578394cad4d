//! The fully indexed module produced by the grouper and rewriter.
//!
//! Every identifier is a dense 0-based index, every block type is an
//! explicit signature, and each kind of definition lives in a *named
//! collection*: an ordered sequence of entries plus a side map from
//! optional textual names to indices. Imports are numbered before local
//! definitions within each kind, so both share one index space.

mod group;
mod rewrite;

pub(crate) use self::group::group;
pub(crate) use self::rewrite::rewrite;

use std::collections::HashMap;
use std::rc::Rc;

use weft_core::{FuncType, RefType, ValType};

use crate::ast::{Custom, Expr, ExternKind, GlobalType, Id, Instr, MemType, TableType};
use crate::Error;

/// A rewritten instruction: indices resolved, block types explicit.
pub type Op = Instr<u32, FuncType>;

/// A rewritten instruction sequence.
pub type Code = Expr<u32, FuncType>;

/// An ordered sequence of entries plus a name-to-index side map.
#[derive(Debug, Clone)]
pub struct Named<T> {
    entries: Vec<T>,
    names: HashMap<String, u32>,
}

impl<T> Default for Named<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            names: HashMap::new(),
        }
    }
}

impl<T> Named<T> {
    /// Appends `entry`, binding `name` to its index when present.
    ///
    /// Fails with "duplicate `kind` …" when the name is already bound.
    pub fn push(&mut self, name: Option<String>, entry: T, kind: &str) -> Result<u32, Error> {
        let index = self.entries.len() as u32;
        if let Some(name) = name {
            if self.names.insert(name.clone(), index).is_some() {
                return Err(Error::validation(format!("duplicate {kind} ${name}")));
            }
        }
        self.entries.push(entry);
        Ok(index)
    }

    /// Resolves an identifier to an index, checking bounds for raw indices
    /// and the name map for textual names.
    pub fn resolve(&self, id: &Id, what: &str) -> Result<u32, Error> {
        match id {
            Id::Num(index) => {
                if (*index as usize) < self.entries.len() {
                    Ok(*index)
                } else {
                    Err(Error::validation(format!("unknown {what} {index}")))
                }
            }
            Id::Name(name) => self
                .names
                .get(name)
                .copied()
                .ok_or_else(|| Error::validation(format!("unknown {what} ${name}"))),
        }
    }

    /// The entry at `index`, if in bounds.
    pub fn get(&self, index: u32) -> Option<&T> {
        self.entries.get(index as usize)
    }

    /// Number of entries.
    pub fn len(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// The index bound to `name`, if any.
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.names.get(name).copied()
    }

    pub(crate) fn entries_mut(&mut self) -> &mut Vec<T> {
        &mut self.entries
    }

    pub(crate) fn into_parts(self) -> (Vec<T>, HashMap<String, u32>) {
        (self.entries, self.names)
    }

    pub(crate) fn from_parts(entries: Vec<T>, names: HashMap<String, u32>) -> Self {
        Self { entries, names }
    }
}

/// An entry of an index space: defined locally, or imported with its
/// declared type.
#[derive(Debug, Clone)]
pub enum Def<L, T> {
    /// Defined in this module.
    Local(L),
    /// Imported from another module.
    Import {
        /// Name of the providing module.
        module: String,
        /// Name of the item within the providing module.
        name: String,
        /// The declared type of the import.
        ty: T,
    },
}

impl<L, T> Def<L, T> {
    /// Returns `true` for imported entries.
    pub fn is_import(&self) -> bool {
        matches!(self, Self::Import { .. })
    }
}

/// A rewritten function: its type index, extra locals, and body.
#[derive(Debug, Clone)]
pub struct Func {
    /// Index of the declared function type.
    pub ty: u32,
    /// Types of the declared locals, after the parameters.
    pub locals: Box<[ValType]>,
    /// The body, shared with runtime continuations.
    pub body: Code,
}

/// A rewritten global: its type and constant initialiser.
#[derive(Debug, Clone)]
pub struct Global {
    /// Value type and mutability.
    pub ty: GlobalType,
    /// The constant initialiser expression.
    pub init: Code,
}

/// A rewritten element segment.
#[derive(Debug, Clone)]
pub struct ElemSeg {
    /// Type of the produced references.
    pub ty: RefType,
    /// Constant initialiser expressions, one per element.
    pub items: Box<[Code]>,
    /// Placement mode.
    pub mode: ElemPlacement,
}

/// Placement of a rewritten element segment.
#[derive(Debug, Clone)]
pub enum ElemPlacement {
    /// Available to `table.init`.
    Passive,
    /// Only contributes declared function references.
    Declarative,
    /// Written to `table` at link time.
    Active {
        /// Destination table index.
        table: u32,
        /// Constant offset expression.
        offset: Code,
    },
}

/// A rewritten data segment.
#[derive(Debug, Clone)]
pub struct DataSeg {
    /// The payload, shared with the runtime.
    pub bytes: Rc<[u8]>,
    /// Placement mode.
    pub mode: DataPlacement,
}

/// Placement of a rewritten data segment.
#[derive(Debug, Clone)]
pub enum DataPlacement {
    /// Available to `memory.init`.
    Passive,
    /// Copied into `memory` at link time.
    Active {
        /// Destination memory index.
        memory: u32,
        /// Constant offset expression.
        offset: Code,
    },
}

/// A resolved export.
#[derive(Debug, Clone)]
pub struct ExportDef {
    /// The UTF-8 export name.
    pub name: String,
    /// Kind of the exported item.
    pub kind: ExternKind,
    /// Index of the item within its index space.
    pub index: u32,
}

/// An immutable, fully indexed module.
///
/// Built in stages and never mutated after rewrite.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Declared function types.
    pub types: Named<FuncType>,
    /// Functions: imports first, then local definitions.
    pub funcs: Named<Def<Func, u32>>,
    /// Tables.
    pub tables: Named<Def<TableType, TableType>>,
    /// Memories.
    pub memories: Named<Def<MemType, MemType>>,
    /// Globals.
    pub globals: Named<Def<Global, GlobalType>>,
    /// Element segments.
    pub elems: Named<ElemSeg>,
    /// Data segments.
    pub datas: Named<DataSeg>,
    /// Resolved exports, in declaration order.
    pub exports: Vec<ExportDef>,
    /// The start function, if declared.
    pub start: Option<u32>,
    /// Custom sections, retained by name.
    pub customs: Vec<Custom>,
}

impl Module {
    /// The declared type of function `index`.
    pub fn func_type(&self, index: u32) -> Option<&FuncType> {
        let ty_index = match self.funcs.get(index)? {
            Def::Local(func) => func.ty,
            Def::Import { ty, .. } => *ty,
        };
        self.types.get(ty_index)
    }

    /// The declared type of global `index`.
    pub fn global_type(&self, index: u32) -> Option<GlobalType> {
        Some(match self.globals.get(index)? {
            Def::Local(global) => global.ty,
            Def::Import { ty, .. } => *ty,
        })
    }

    /// The declared type of table `index`.
    pub fn table_type(&self, index: u32) -> Option<TableType> {
        Some(match self.tables.get(index)? {
            Def::Local(ty) | Def::Import { ty, .. } => *ty,
        })
    }

    /// The declared type of memory `index`.
    pub fn mem_type(&self, index: u32) -> Option<MemType> {
        Some(match self.memories.get(index)? {
            Def::Local(ty) | Def::Import { ty, .. } => *ty,
        })
    }

    /// Number of imported globals; const-expressions may only read these.
    pub fn num_imported_globals(&self) -> u32 {
        self.globals.iter().filter(|def| def.is_import()).count() as u32
    }
}
