//! Linking: turning validated modules into runnable instances.
//!
//! The linker owns a registry mapping module names to instances in the
//! store. Instantiation resolves every import against that registry,
//! allocates tables, memories and globals, initialises active segments in
//! declaration order after all allocations, and finally runs the start
//! function. Host functionality enters through [`ExternModule`], which is
//! allocated into the store like any other instance.

use std::collections::HashMap;
use std::rc::Rc;

use weft_core::{FuncType, Trap, TrapCode, Val};

use crate::ast::{GlobalType, Limits, MemType, TableType};
use crate::exec::{self, Algebra};
use crate::module::{DataPlacement, Def, ElemPlacement, Module};
use crate::store::{
    DataInst,
    ElemInst,
    ExternVal,
    FuncInst,
    GlobalInst,
    HostCtx,
    Instance,
    MemInst,
    Store,
    TableInst,
    WasmFuncCode,
};
use crate::Error;

/// A host-provided module: named, typed items to satisfy imports.
pub struct ExternModule<A: Algebra> {
    funcs: Vec<(String, FuncType, crate::store::HostFunc<A>)>,
    globals: Vec<(String, GlobalType, Val)>,
    tables: Vec<(String, TableType)>,
    memories: Vec<(String, MemType)>,
}

impl<A: Algebra> Default for ExternModule<A> {
    fn default() -> Self {
        Self {
            funcs: Vec::new(),
            globals: Vec::new(),
            tables: Vec::new(),
            memories: Vec::new(),
        }
    }
}

impl<A: Algebra> ExternModule<A> {
    /// An empty extern module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host function export.
    pub fn func<F>(mut self, name: &str, ty: FuncType, f: F) -> Self
    where
        F: Fn(&mut A, &mut HostCtx<'_, A>, &[A::Value]) -> Result<Option<A::Value>, Trap>
            + 'static,
    {
        self.funcs.push((name.into(), ty, Rc::new(f)));
        self
    }

    /// Adds an immutable or mutable global export.
    pub fn global(mut self, name: &str, ty: GlobalType, init: Val) -> Self {
        self.globals.push((name.into(), ty, init));
        self
    }

    /// Adds a table export.
    pub fn table(mut self, name: &str, ty: TableType) -> Self {
        self.tables.push((name.into(), ty));
        self
    }

    /// Adds a memory export.
    pub fn memory(mut self, name: &str, ty: MemType) -> Self {
        self.memories.push((name.into(), ty));
        self
    }
}

/// Links modules against each other and against host modules.
#[derive(Debug, Clone, Default)]
pub struct Linker {
    registry: HashMap<String, u32>,
}

impl Linker {
    /// An empty linker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `instance` importable under `name`.
    pub fn register(&mut self, name: &str, instance: u32) {
        self.registry.insert(name.into(), instance);
    }

    /// The registered instance named `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.registry.get(name).copied()
    }

    /// Allocates a host module into the store and registers it.
    pub fn define_module<A: Algebra>(
        &mut self,
        store: &mut Store<A>,
        name: &str,
        module: ExternModule<A>,
    ) -> u32 {
        let mut instance = Instance::default();
        for (export, ty, func) in module.funcs {
            let handle = store.funcs.len() as u32;
            store.funcs.push(FuncInst::Host { ty, func });
            instance.funcs.push(handle);
            instance.exports.insert(export, ExternVal::Func(handle));
        }
        for (export, ty, init) in module.globals {
            let handle = store.globals.len() as u32;
            let value = store.alg.from_val(init);
            store.globals.push(GlobalInst { ty, value });
            instance.globals.push(handle);
            instance.exports.insert(export, ExternVal::Global(handle));
        }
        for (export, ty) in module.tables {
            let handle = store.tables.len() as u32;
            store.tables.push(TableInst::new(ty));
            instance.tables.push(handle);
            instance.exports.insert(export, ExternVal::Table(handle));
        }
        for (export, ty) in module.memories {
            let handle = store.memories.len() as u32;
            let data = store.alg.mem_new(ty.limits.min);
            store.memories.push(MemInst {
                ty,
                pages: ty.limits.min,
                data,
            });
            instance.memories.push(handle);
            instance.exports.insert(export, ExternVal::Memory(handle));
        }
        let index = store.instances.len() as u32;
        store.instances.push(instance);
        self.register(name, index);
        index
    }

    /// Resolves the import `module`/`name` in the registry.
    fn resolve_import<A: Algebra>(
        &self,
        store: &Store<A>,
        module: &str,
        name: &str,
    ) -> Result<ExternVal, Error> {
        let instance = self
            .lookup(module)
            .ok_or_else(|| Error::instantiation(format!("unknown import {module}.{name}")))?;
        store
            .export(instance, name)
            .ok_or_else(|| Error::instantiation(format!("unknown import {module}.{name}")))
    }

    /// Instantiates `module`: resolves imports, allocates and initialises
    /// everything, and runs the start function. Returns the instance
    /// index.
    pub fn instantiate<A: Algebra>(
        &mut self,
        store: &mut Store<A>,
        module: &Module,
    ) -> Result<u32, Error> {
        let index = store.instances.len() as u32;
        let mut instance = Instance {
            types: module.types.iter().cloned().collect(),
            ..Instance::default()
        };

        // Imports and local definitions, in index order per kind.
        for def in module.funcs.iter() {
            match def {
                Def::Import {
                    module: mod_name,
                    name,
                    ty,
                } => {
                    let declared = instance.types[*ty as usize].clone();
                    let ExternVal::Func(handle) = self.resolve_import(store, mod_name, name)?
                    else {
                        return Err(Error::instantiation("incompatible import type"));
                    };
                    if *store.funcs[handle as usize].ty() != declared {
                        return Err(Error::instantiation("incompatible import type"));
                    }
                    instance.funcs.push(handle);
                }
                Def::Local(func) => {
                    let handle = store.funcs.len() as u32;
                    store.funcs.push(FuncInst::Wasm {
                        ty: instance.types[func.ty as usize].clone(),
                        instance: index,
                        code: Rc::new(WasmFuncCode {
                            locals: func.locals.clone(),
                            body: func.body.clone(),
                        }),
                    });
                    instance.funcs.push(handle);
                }
            }
        }

        for def in module.tables.iter() {
            match def {
                Def::Import {
                    module: mod_name,
                    name,
                    ty,
                } => {
                    let ExternVal::Table(handle) = self.resolve_import(store, mod_name, name)?
                    else {
                        return Err(Error::instantiation("incompatible import type"));
                    };
                    let actual = &store.tables[handle as usize].ty;
                    if actual.elem != ty.elem || !limits_match(&actual.limits, &ty.limits) {
                        return Err(Error::instantiation("incompatible import type"));
                    }
                    instance.tables.push(handle);
                }
                Def::Local(ty) => {
                    let handle = store.tables.len() as u32;
                    store.tables.push(TableInst::new(*ty));
                    instance.tables.push(handle);
                }
            }
        }

        for def in module.memories.iter() {
            match def {
                Def::Import {
                    module: mod_name,
                    name,
                    ty,
                } => {
                    let ExternVal::Memory(handle) = self.resolve_import(store, mod_name, name)?
                    else {
                        return Err(Error::instantiation("incompatible import type"));
                    };
                    let actual = &store.memories[handle as usize].ty;
                    if !limits_match(&actual.limits, &ty.limits) {
                        return Err(Error::instantiation("incompatible import type"));
                    }
                    instance.memories.push(handle);
                }
                Def::Local(ty) => {
                    let handle = store.memories.len() as u32;
                    let data = store.alg.mem_new(ty.limits.min);
                    store.memories.push(MemInst {
                        ty: *ty,
                        pages: ty.limits.min,
                        data,
                    });
                    instance.memories.push(handle);
                }
            }
        }

        for def in module.globals.iter() {
            match def {
                Def::Import {
                    module: mod_name,
                    name,
                    ty,
                } => {
                    let ExternVal::Global(handle) = self.resolve_import(store, mod_name, name)?
                    else {
                        return Err(Error::instantiation("incompatible import type"));
                    };
                    let actual = store.globals[handle as usize].ty;
                    if actual != *ty {
                        return Err(Error::instantiation("incompatible import type"));
                    }
                    instance.globals.push(handle);
                }
                Def::Local(global) => {
                    let value = exec::eval_const(store, &instance, &global.init)?;
                    let handle = store.globals.len() as u32;
                    store.globals.push(GlobalInst {
                        ty: global.ty,
                        value,
                    });
                    instance.globals.push(handle);
                }
            }
        }

        for export in &module.exports {
            let value = match export.kind {
                crate::ast::ExternKind::Func => {
                    ExternVal::Func(instance.funcs[export.index as usize])
                }
                crate::ast::ExternKind::Table => {
                    ExternVal::Table(instance.tables[export.index as usize])
                }
                crate::ast::ExternKind::Memory => {
                    ExternVal::Memory(instance.memories[export.index as usize])
                }
                crate::ast::ExternKind::Global => {
                    ExternVal::Global(instance.globals[export.index as usize])
                }
            };
            instance.exports.insert(export.name.clone(), value);
        }

        // Materialise element segments up front; declarative ones only
        // contribute declared references and are dropped immediately.
        for elem in module.elems.iter() {
            let mut refs = Vec::with_capacity(elem.items.len());
            for item in elem.items.iter() {
                let value = exec::eval_const(store, &instance, item)?;
                let entry = store.alg.as_ref_val(&value).ok_or_else(|| {
                    Error::instantiation("constant expression required")
                })?;
                refs.push(entry);
            }
            if matches!(elem.mode, ElemPlacement::Declarative) {
                refs.clear();
            }
            instance.elems.push(ElemInst { ty: elem.ty, refs });
        }
        for data in module.datas.iter() {
            instance.datas.push(DataInst {
                bytes: Rc::clone(&data.bytes),
                dropped: false,
            });
        }

        // Segment initialisation happens after all allocations and before
        // the start function, in declaration order within each kind.
        for (data, seg) in module.datas.iter().enumerate() {
            if let DataPlacement::Active { memory, offset } = &seg.mode {
                let value = exec::eval_const(store, &instance, offset)?;
                let offset = store
                    .alg
                    .as_u32(&value)
                    .ok_or_else(|| Error::instantiation("constant expression required"))?;
                let handle = instance.memories[*memory as usize];
                let end = u64::from(offset) + seg.bytes.len() as u64;
                if end > store.memories[handle as usize].byte_len() as u64 {
                    return Err(Error::Trap(Trap::from(TrapCode::OutOfBoundsMemoryAccess)));
                }
                let mut bytes = std::mem::take(&mut store.memories[handle as usize].data);
                store.alg.mem_init(&mut bytes, offset as usize, &seg.bytes);
                store.memories[handle as usize].data = bytes;
                instance.datas[data].dropped = true;
            }
        }
        for (elem, seg) in module.elems.iter().enumerate() {
            if let ElemPlacement::Active { table, offset } = &seg.mode {
                let value = exec::eval_const(store, &instance, offset)?;
                let offset = store
                    .alg
                    .as_u32(&value)
                    .ok_or_else(|| Error::instantiation("constant expression required"))?
                    as usize;
                let refs = std::mem::take(&mut instance.elems[elem].refs);
                let handle = instance.tables[*table as usize];
                let dst = &mut store.tables[handle as usize];
                if offset
                    .checked_add(refs.len())
                    .map_or(true, |end| end > dst.elems.len())
                {
                    return Err(Error::Trap(Trap::from(TrapCode::OutOfBoundsTableAccess)));
                }
                dst.elems[offset..offset + refs.len()].copy_from_slice(&refs);
            }
        }

        store.instances.push(instance);
        log::debug!("instantiated module as instance {index}");

        if let Some(start) = module.start {
            let handle = store.instances[index as usize].funcs[start as usize];
            run_start(store, handle)?;
        }
        Ok(index)
    }
}

/// Import limits check: the provided item must be at least as permissive
/// in its minimum and no more permissive in its maximum.
fn limits_match(actual: &Limits, required: &Limits) -> bool {
    if actual.min < required.min {
        return false;
    }
    match (required.max, actual.max) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(required), Some(actual)) => actual <= required,
    }
}

/// Runs the start function on a fresh thread over the store.
fn run_start<A: Algebra>(store: &mut Store<A>, handle: u32) -> Result<(), Error> {
    let placeholder = Store::new(store.alg.clone());
    let mut thread = exec::Thread::new(std::mem::replace(store, placeholder));
    let mut forks = exec::Forks::default();
    let outcome = exec::call(&mut thread, handle).and_then(|()| exec::run(&mut thread, &mut forks));
    *store = thread.store;
    outcome.map_err(Error::Trap)?;
    Ok(())
}
