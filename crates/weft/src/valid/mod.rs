//! Module validation.
//!
//! Module-level rules (limits, segment typing, memory count) live here;
//! the stack-polymorphic validation of function bodies lives in
//! [`func`]. Every rule is fail-fast: the first violation aborts with a
//! message from the reference-suite vocabulary.

mod func;

use std::collections::HashSet;

use weft_core::{RefType, ValType};

use crate::ast::Limits;
use crate::module::{Code, Def, ElemPlacement, Module, Op};
use crate::Error;

/// Largest number of 64 KiB pages a memory may declare.
pub const MAX_PAGES: u32 = 65536;

/// Validates `module`, returning the first violated rule as an error.
pub fn validate(module: &Module) -> Result<(), Error> {
    if module.memories.len() > 1 {
        return Err(Error::validation("multiple memories"));
    }
    for index in 0..module.memories.len() {
        let ty = module
            .mem_type(index)
            .expect("index ranges over the collection");
        check_limits(&ty.limits, MAX_PAGES, "memory size must be at most 65536 pages (4GiB)")?;
    }
    for index in 0..module.tables.len() {
        let ty = module
            .table_type(index)
            .expect("index ranges over the collection");
        check_limits(&ty.limits, u32::MAX, "table size")?;
    }

    let declared = declared_func_refs(module);

    // Globals: initialiser must be constant of the declared type.
    for def in module.globals.iter() {
        if let Def::Local(global) = def {
            let ty = const_expr_type(module, &global.init)?;
            if ty != global.ty.ty {
                return Err(Error::validation("type mismatch"));
            }
        }
    }

    // Element segments: items must produce the segment's reference type,
    // active offsets must be i32 and the target table must agree.
    for elem in module.elems.iter() {
        for item in elem.items.iter() {
            let ty = const_expr_type(module, item)?;
            if ty != ValType::Ref(elem.ty) {
                return Err(Error::validation("type mismatch"));
            }
        }
        if let ElemPlacement::Active { table, offset } = &elem.mode {
            let table_ty = module
                .table_type(*table)
                .ok_or_else(|| Error::validation(format!("unknown table {table}")))?;
            if table_ty.elem != elem.ty {
                return Err(Error::validation("type mismatch"));
            }
            let ty = const_expr_type(module, offset)?;
            if ty != ValType::I32 {
                return Err(Error::validation("type mismatch"));
            }
        }
    }

    // Data segments: active offsets must be i32.
    for data in module.datas.iter() {
        if let crate::module::DataPlacement::Active { memory, offset } = &data.mode {
            if module.mem_type(*memory).is_none() {
                return Err(Error::validation(format!("unknown memory {memory}")));
            }
            let ty = const_expr_type(module, offset)?;
            if ty != ValType::I32 {
                return Err(Error::validation("type mismatch"));
            }
        }
    }

    // Function bodies.
    for (index, def) in module.funcs.iter().enumerate() {
        if let Def::Local(function) = def {
            func::validate_function(module, &declared, function).map_err(|err| {
                log::debug!("function {index} failed validation: {err}");
                err
            })?;
        }
    }
    log::debug!("validated module: {} functions", module.funcs.len());
    Ok(())
}

fn check_limits(limits: &Limits, bound: u32, bound_msg: &str) -> Result<(), Error> {
    if limits.min > bound || limits.max.is_some_and(|max| max > bound) {
        return Err(Error::validation(bound_msg));
    }
    if let Some(max) = limits.max {
        if limits.min > max {
            return Err(Error::validation(
                "size minimum must not be greater than maximum",
            ));
        }
    }
    Ok(())
}

/// The declared-reference set: function indices reachable from exports or
/// from const-expressions in globals and element segments. `ref.func`
/// inside a function body is only legal for members of this set.
fn declared_func_refs(module: &Module) -> HashSet<u32> {
    let mut declared = HashSet::new();
    for export in &module.exports {
        if export.kind == crate::ast::ExternKind::Func {
            declared.insert(export.index);
        }
    }
    let mut scan = |code: &Code| {
        for op in code.iter() {
            if let Op::RefFunc(index) = op {
                declared.insert(*index);
            }
        }
    };
    for def in module.globals.iter() {
        if let Def::Local(global) = def {
            scan(&global.init);
        }
    }
    for elem in module.elems.iter() {
        for item in elem.items.iter() {
            scan(item);
        }
        if let ElemPlacement::Active { offset, .. } = &elem.mode {
            scan(offset);
        }
    }
    declared
}

/// The result type of a validated const-expression.
///
/// The rewriter already restricted the instruction set; here we check that
/// the expression produces exactly one value and determine its type.
fn const_expr_type(module: &Module, code: &Code) -> Result<ValType, Error> {
    let [op] = code.as_ref() else {
        return Err(Error::validation("constant expression required"));
    };
    Ok(match op {
        Op::I32Const(_) => ValType::I32,
        Op::I64Const(_) => ValType::I64,
        Op::F32Const(_) => ValType::F32,
        Op::F64Const(_) => ValType::F64,
        Op::RefNull(ty) => ValType::Ref(*ty),
        Op::RefFunc(_) => ValType::Ref(RefType::Func),
        Op::GlobalGet(index) => {
            module
                .global_type(*index)
                .expect("const-expr globals were resolved by the rewriter")
                .ty
        }
        _ => return Err(Error::validation("constant expression required")),
    })
}

