//! The rewriter: lowers the grouped module to fully indexed form.
//!
//! Every name-bearing instruction is resolved against the appropriate
//! named collection (or the local scope of the enclosing function), block
//! types are normalised to explicit signatures, and the structural rules
//! that do not need the type checker's stack are enforced here:
//! const-expression shape, memory alignment, global mutability and the
//! start function signature.

use std::collections::HashMap;
use std::rc::Rc;

use weft_core::FuncType;

use crate::ast::{
    self,
    BlockAnnot,
    BlockType,
    DataMode,
    ElemMode,
    ExternKind,
    Id,
    InlineSig,
    Instr,
    RawInstr,
    TypeUse,
};
use crate::module::{
    group::Grouped,
    Code,
    DataPlacement,
    DataSeg,
    Def,
    ElemPlacement,
    ElemSeg,
    ExportDef,
    Func,
    Global,
    Module,
    Named,
    Op,
};
use crate::Error;

/// Resolution environment: the name maps and counts of every index space.
struct Env<'a> {
    funcs: &'a Named<Def<ast::Func, TypeUse>>,
    tables: &'a Named<Def<ast::TableType, ast::TableType>>,
    memories: &'a Named<Def<ast::MemType, ast::MemType>>,
    globals: &'a Named<Def<ast::Global, ast::GlobalType>>,
    elems: &'a Named<ast::Elem>,
    datas: &'a Named<ast::Data>,
}

impl Env<'_> {
    fn global_type(&self, index: u32) -> ast::GlobalType {
        match self
            .globals
            .get(index)
            .expect("global index was resolved against this collection")
        {
            Def::Local(global) => global.ty,
            Def::Import { ty, .. } => *ty,
        }
    }

    fn num_imported_globals(&self) -> u32 {
        self.globals.iter().filter(|def| def.is_import()).count() as u32
    }
}

/// The local scope of one function: parameter and local names over a
/// shared 0-based index space.
struct Scope {
    names: HashMap<String, u32>,
    count: u32,
}

impl Scope {
    fn build(params: Option<&InlineSig>, param_count: u32, locals: &[ast::Local]) -> Result<Self, Error> {
        let mut names = HashMap::new();
        if let Some(sig) = params {
            for (index, param) in sig.params.iter().enumerate() {
                if let Some(name) = &param.id {
                    if names.insert(name.clone(), index as u32).is_some() {
                        return Err(Error::validation(format!("duplicate local ${name}")));
                    }
                }
            }
        }
        for (offset, local) in locals.iter().enumerate() {
            if let Some(name) = &local.id {
                let index = param_count + offset as u32;
                if names.insert(name.clone(), index).is_some() {
                    return Err(Error::validation(format!("duplicate local ${name}")));
                }
            }
        }
        Ok(Self {
            names,
            count: param_count + locals.len() as u32,
        })
    }

    fn resolve(&self, id: &Id) -> Result<u32, Error> {
        match id {
            Id::Num(index) => {
                if *index < self.count {
                    Ok(*index)
                } else {
                    Err(Error::validation(format!("unknown local {index}")))
                }
            }
            Id::Name(name) => self
                .names
                .get(name)
                .copied()
                .ok_or_else(|| Error::validation(format!("unknown local ${name}"))),
        }
    }
}

/// Lowers `grouped` to a fully indexed [`Module`].
pub(crate) fn rewrite(grouped: Grouped) -> Result<Module, Error> {
    let Grouped {
        types,
        funcs,
        tables,
        memories,
        globals,
        elems,
        datas,
        exports,
        start,
        customs,
    } = grouped;
    let mut types = types;

    // Assign every function its type index up front; bodies may call
    // forward.
    let mut func_tys = Vec::with_capacity(funcs.len() as usize);
    for def in funcs.iter() {
        let ty = match def {
            Def::Import { ty, .. } => ty,
            Def::Local(func) => &func.ty,
        };
        func_tys.push(resolve_typeuse(&mut types, ty)?);
    }

    let env = Env {
        funcs: &funcs,
        tables: &tables,
        memories: &memories,
        globals: &globals,
        elems: &elems,
        datas: &datas,
    };

    // Function bodies.
    let mut rewritten_funcs: Vec<Def<Func, u32>> = Vec::with_capacity(funcs.len() as usize);
    for (index, def) in funcs.iter().enumerate() {
        match def {
            Def::Import { module, name, .. } => rewritten_funcs.push(Def::Import {
                module: module.clone(),
                name: name.clone(),
                ty: func_tys[index],
            }),
            Def::Local(func) => {
                let ty = func_tys[index];
                let param_count = types
                    .get(ty)
                    .expect("type index was resolved above")
                    .params()
                    .len() as u32;
                let scope = Scope::build(func.ty.inline.as_ref(), param_count, &func.locals)?;
                let mut labels = vec![None];
                let body =
                    rewrite_expr(&env, &mut types, Some(&scope), &mut labels, &func.body)?;
                let locals = func.locals.iter().map(|local| local.ty).collect();
                rewritten_funcs.push(Def::Local(Func { ty, locals, body }));
            }
        }
    }

    // Global initialisers.
    let mut rewritten_globals: Vec<Def<Global, ast::GlobalType>> =
        Vec::with_capacity(globals.len() as usize);
    for def in globals.iter() {
        match def {
            Def::Import { module, name, ty } => rewritten_globals.push(Def::Import {
                module: module.clone(),
                name: name.clone(),
                ty: *ty,
            }),
            Def::Local(global) => {
                let init = rewrite_const_expr(&env, &global.init)?;
                rewritten_globals.push(Def::Local(Global {
                    ty: global.ty,
                    init,
                }));
            }
        }
    }

    // Element segments: items and offsets are const-expressions.
    let mut rewritten_elems = Vec::with_capacity(elems.len() as usize);
    for elem in elems.iter() {
        let items = elem
            .items
            .iter()
            .map(|item| rewrite_const_expr(&env, item))
            .collect::<Result<Box<[Code]>, Error>>()?;
        let mode = match &elem.mode {
            ElemMode::Passive => ElemPlacement::Passive,
            ElemMode::Declarative => ElemPlacement::Declarative,
            ElemMode::Active { table, offset } => ElemPlacement::Active {
                table: env.tables.resolve(table, "table")?,
                offset: rewrite_const_expr(&env, offset)?,
            },
        };
        rewritten_elems.push(ElemSeg {
            ty: elem.ty,
            items,
            mode,
        });
    }

    // Data segments.
    let mut rewritten_datas = Vec::with_capacity(datas.len() as usize);
    for data in datas.iter() {
        let mode = match &data.mode {
            DataMode::Passive => DataPlacement::Passive,
            DataMode::Active { memory, offset } => DataPlacement::Active {
                memory: env.memories.resolve(memory, "memory")?,
                offset: rewrite_const_expr(&env, offset)?,
            },
        };
        rewritten_datas.push(DataSeg {
            bytes: Rc::from(data.bytes.as_slice()),
            mode,
        });
    }

    // Exports.
    let mut rewritten_exports = Vec::with_capacity(exports.len());
    let mut export_names: HashMap<&str, ()> = HashMap::new();
    for export in &exports {
        if export_names.insert(&export.name, ()).is_some() {
            return Err(Error::validation("duplicate export name"));
        }
        let index = match export.kind {
            ExternKind::Func => env.funcs.resolve(&export.item, "function")?,
            ExternKind::Table => env.tables.resolve(&export.item, "table")?,
            ExternKind::Memory => env.memories.resolve(&export.item, "memory")?,
            ExternKind::Global => env.globals.resolve(&export.item, "global")?,
        };
        rewritten_exports.push(ExportDef {
            name: export.name.clone(),
            kind: export.kind,
            index,
        });
    }

    // The start function must have the empty signature.
    let start = match &start {
        None => None,
        Some(id) => {
            let index = env.funcs.resolve(id, "function")?;
            let ty = types
                .get(func_tys[index as usize])
                .expect("every function type index was resolved above");
            if !ty.params().is_empty() || !ty.results().is_empty() {
                return Err(Error::validation("start function"));
            }
            Some(index)
        }
    };

    let (_, func_names) = funcs.into_parts();
    let (table_entries, table_names) = tables.into_parts();
    let (memory_entries, memory_names) = memories.into_parts();
    let (_, global_names) = globals.into_parts();
    let (_, elem_names) = elems.into_parts();
    let (_, data_names) = datas.into_parts();

    let module = Module {
        types,
        funcs: Named::from_parts(rewritten_funcs, func_names),
        tables: Named::from_parts(table_entries, table_names),
        memories: Named::from_parts(memory_entries, memory_names),
        globals: Named::from_parts(rewritten_globals, global_names),
        elems: Named::from_parts(rewritten_elems, elem_names),
        datas: Named::from_parts(rewritten_datas, data_names),
        exports: rewritten_exports,
        start,
        customs,
    };
    log::debug!(
        "rewrote module: {} funcs, start = {:?}",
        module.funcs.len(),
        module.start
    );
    Ok(module)
}

/// Resolves a type use against the declared types, appending a fresh type
/// for inline-only signatures that match no declared one.
fn resolve_typeuse(types: &mut Named<FuncType>, ty: &TypeUse) -> Result<u32, Error> {
    match (&ty.index, &ty.inline) {
        (Some(id), None) => types.resolve(id, "type"),
        (Some(id), Some(sig)) => {
            let index = types.resolve(id, "type")?;
            // An empty inline signature is the abbreviation for "use the
            // declared type as-is".
            if sig.params.is_empty() && sig.results.is_empty() {
                return Ok(index);
            }
            let declared = types.get(index).expect("resolve checked bounds");
            if sig.to_func_type() != *declared {
                return Err(Error::validation("inline function type"));
            }
            Ok(index)
        }
        (None, Some(sig)) => intern_type(types, sig.to_func_type()),
        (None, None) => intern_type(types, FuncType::default()),
    }
}

fn intern_type(types: &mut Named<FuncType>, ty: FuncType) -> Result<u32, Error> {
    for (index, declared) in types.iter().enumerate() {
        if *declared == ty {
            return Ok(index as u32);
        }
    }
    types.push(None, ty, "type")
}

/// Resolves a block annotation to an explicit signature.
fn resolve_block_type(
    types: &mut Named<FuncType>,
    annot: &BlockAnnot,
) -> Result<FuncType, Error> {
    match &annot.ty {
        BlockType::Void => Ok(FuncType::default()),
        BlockType::Val(ty) => Ok(FuncType::new([], [*ty])),
        BlockType::TypeUse(ty) => {
            let index = resolve_typeuse(types, ty)?;
            Ok(types
                .get(index)
                .expect("resolve_typeuse returns a valid index")
                .clone())
        }
    }
}

fn resolve_label(labels: &[Option<String>], id: &Id) -> Result<u32, Error> {
    match id {
        Id::Num(depth) => {
            if (*depth as usize) < labels.len() {
                Ok(*depth)
            } else {
                Err(Error::validation(format!("unknown label {depth}")))
            }
        }
        Id::Name(name) => labels
            .iter()
            .rev()
            .position(|label| label.as_deref() == Some(name))
            .map(|depth| depth as u32)
            .ok_or_else(|| Error::validation(format!("unknown label ${name}"))),
    }
}

/// Fails unless the module declares (or imports) a memory.
fn require_memory(env: &Env<'_>) -> Result<(), Error> {
    if env.memories.is_empty() {
        return Err(Error::validation("unknown memory 0"));
    }
    Ok(())
}

/// The alignment exponent must not exceed the natural alignment of the
/// access width.
fn check_alignment(align: u32, natural_bytes: u32) -> Result<(), Error> {
    if align >= 32 || (1u64 << align) > u64::from(natural_bytes) {
        return Err(Error::validation(
            "alignment must not be larger than natural",
        ));
    }
    Ok(())
}

/// Rewrites one instruction sequence.
///
/// `scope` is absent for const-expressions, which may not touch locals.
fn rewrite_expr(
    env: &Env<'_>,
    types: &mut Named<FuncType>,
    scope: Option<&Scope>,
    labels: &mut Vec<Option<String>>,
    code: &[RawInstr],
) -> Result<Code, Error> {
    let mut out = Vec::with_capacity(code.len());
    for instr in code {
        out.push(rewrite_instr(env, types, scope, labels, instr)?);
    }
    Ok(Rc::from(out))
}

fn rewrite_instr(
    env: &Env<'_>,
    types: &mut Named<FuncType>,
    scope: Option<&Scope>,
    labels: &mut Vec<Option<String>>,
    instr: &RawInstr,
) -> Result<Op, Error> {
    let scope_of = |id: &Id| -> Result<u32, Error> {
        match scope {
            Some(scope) => scope.resolve(id),
            None => Err(Error::validation("constant expression required")),
        }
    };
    let op = match instr {
        Instr::Unreachable => Instr::Unreachable,
        Instr::Nop => Instr::Nop,
        Instr::Block(annot, body) => {
            let ty = resolve_block_type(types, annot)?;
            labels.push(annot.label.clone());
            let body = rewrite_expr(env, types, scope, labels, body)?;
            labels.pop();
            Instr::Block(ty, body)
        }
        Instr::Loop(annot, body) => {
            let ty = resolve_block_type(types, annot)?;
            labels.push(annot.label.clone());
            let body = rewrite_expr(env, types, scope, labels, body)?;
            labels.pop();
            Instr::Loop(ty, body)
        }
        Instr::If(annot, then, alt) => {
            let ty = resolve_block_type(types, annot)?;
            labels.push(annot.label.clone());
            let then = rewrite_expr(env, types, scope, labels, then)?;
            let alt = rewrite_expr(env, types, scope, labels, alt)?;
            labels.pop();
            Instr::If(ty, then, alt)
        }
        Instr::Br(id) => Instr::Br(resolve_label(labels, id)?),
        Instr::BrIf(id) => Instr::BrIf(resolve_label(labels, id)?),
        Instr::BrTable(targets, default) => {
            let mut resolved = Vec::with_capacity(targets.len());
            for target in targets.iter() {
                resolved.push(resolve_label(labels, target)?);
            }
            Instr::BrTable(
                resolved.into_boxed_slice(),
                resolve_label(labels, default)?,
            )
        }
        Instr::Return => Instr::Return,
        Instr::Call(id) => Instr::Call(env.funcs.resolve(id, "function")?),
        Instr::CallIndirect(table, annot) => {
            let table = env.tables.resolve(table, "table")?;
            let ty = resolve_block_type(types, annot)?;
            Instr::CallIndirect(table, ty)
        }
        Instr::Drop => Instr::Drop,
        Instr::Select(ty) => Instr::Select(*ty),
        Instr::LocalGet(id) => Instr::LocalGet(scope_of(id)?),
        Instr::LocalSet(id) => Instr::LocalSet(scope_of(id)?),
        Instr::LocalTee(id) => Instr::LocalTee(scope_of(id)?),
        Instr::GlobalGet(id) => Instr::GlobalGet(env.globals.resolve(id, "global")?),
        Instr::GlobalSet(id) => {
            let index = env.globals.resolve(id, "global")?;
            if !env.global_type(index).mutable {
                return Err(Error::validation("global is immutable"));
            }
            Instr::GlobalSet(index)
        }
        Instr::TableGet(id) => Instr::TableGet(env.tables.resolve(id, "table")?),
        Instr::TableSet(id) => Instr::TableSet(env.tables.resolve(id, "table")?),
        Instr::TableSize(id) => Instr::TableSize(env.tables.resolve(id, "table")?),
        Instr::TableGrow(id) => Instr::TableGrow(env.tables.resolve(id, "table")?),
        Instr::TableFill(id) => Instr::TableFill(env.tables.resolve(id, "table")?),
        Instr::TableCopy { dst, src } => Instr::TableCopy {
            dst: env.tables.resolve(dst, "table")?,
            src: env.tables.resolve(src, "table")?,
        },
        Instr::TableInit { table, elem } => Instr::TableInit {
            table: env.tables.resolve(table, "table")?,
            elem: env.elems.resolve(elem, "elem segment")?,
        },
        Instr::ElemDrop(id) => Instr::ElemDrop(env.elems.resolve(id, "elem segment")?),
        Instr::ILoad(size, arg) => {
            require_memory(env)?;
            check_alignment(arg.align, size.bytes())?;
            Instr::ILoad(*size, *arg)
        }
        Instr::FLoad(size, arg) => {
            require_memory(env)?;
            check_alignment(arg.align, size.bytes())?;
            Instr::FLoad(*size, *arg)
        }
        Instr::ILoadPacked(size, pack, sign, arg) => {
            require_memory(env)?;
            check_alignment(arg.align, pack.bytes())?;
            Instr::ILoadPacked(*size, *pack, *sign, *arg)
        }
        Instr::IStore(size, arg) => {
            require_memory(env)?;
            check_alignment(arg.align, size.bytes())?;
            Instr::IStore(*size, *arg)
        }
        Instr::FStore(size, arg) => {
            require_memory(env)?;
            check_alignment(arg.align, size.bytes())?;
            Instr::FStore(*size, *arg)
        }
        Instr::IStorePacked(size, pack, arg) => {
            require_memory(env)?;
            check_alignment(arg.align, pack.bytes())?;
            Instr::IStorePacked(*size, *pack, *arg)
        }
        Instr::MemorySize => {
            require_memory(env)?;
            Instr::MemorySize
        }
        Instr::MemoryGrow => {
            require_memory(env)?;
            Instr::MemoryGrow
        }
        Instr::MemoryFill => {
            require_memory(env)?;
            Instr::MemoryFill
        }
        Instr::MemoryCopy => {
            require_memory(env)?;
            Instr::MemoryCopy
        }
        Instr::MemoryInit(id) => {
            require_memory(env)?;
            Instr::MemoryInit(env.datas.resolve(id, "data segment")?)
        }
        Instr::DataDrop(id) => Instr::DataDrop(env.datas.resolve(id, "data segment")?),
        Instr::I32Const(v) => Instr::I32Const(*v),
        Instr::I64Const(v) => Instr::I64Const(*v),
        Instr::F32Const(v) => Instr::F32Const(*v),
        Instr::F64Const(v) => Instr::F64Const(*v),
        Instr::IUnop(size, op) => Instr::IUnop(*size, *op),
        Instr::IBinop(size, op) => Instr::IBinop(*size, *op),
        Instr::IEqz(size) => Instr::IEqz(*size),
        Instr::IRelop(size, op) => Instr::IRelop(*size, *op),
        Instr::FUnop(size, op) => Instr::FUnop(*size, *op),
        Instr::FBinop(size, op) => Instr::FBinop(*size, *op),
        Instr::FRelop(size, op) => Instr::FRelop(*size, *op),
        Instr::IExtend(size, pack) => Instr::IExtend(*size, *pack),
        Instr::I32WrapI64 => Instr::I32WrapI64,
        Instr::I64ExtendI32(sign) => Instr::I64ExtendI32(*sign),
        Instr::ITrunc(to, from, sign) => Instr::ITrunc(*to, *from, *sign),
        Instr::ITruncSat(to, from, sign) => Instr::ITruncSat(*to, *from, *sign),
        Instr::FConvertI(to, from, sign) => Instr::FConvertI(*to, *from, *sign),
        Instr::F32DemoteF64 => Instr::F32DemoteF64,
        Instr::F64PromoteF32 => Instr::F64PromoteF32,
        Instr::IReinterpretF(size) => Instr::IReinterpretF(*size),
        Instr::FReinterpretI(size) => Instr::FReinterpretI(*size),
        Instr::RefNull(ty) => Instr::RefNull(*ty),
        Instr::RefIsNull => Instr::RefIsNull,
        Instr::RefFunc(id) => Instr::RefFunc(env.funcs.resolve(id, "function")?),
    };
    Ok(op)
}

/// Rewrites a const-expression, rejecting any instruction outside the
/// constant subset.
fn rewrite_const_expr(env: &Env<'_>, code: &[RawInstr]) -> Result<Code, Error> {
    let mut out = Vec::with_capacity(code.len());
    for instr in code {
        let op = match instr {
            Instr::I32Const(v) => Instr::I32Const(*v),
            Instr::I64Const(v) => Instr::I64Const(*v),
            Instr::F32Const(v) => Instr::F32Const(*v),
            Instr::F64Const(v) => Instr::F64Const(*v),
            Instr::RefNull(ty) => Instr::RefNull(*ty),
            Instr::RefFunc(id) => Instr::RefFunc(env.funcs.resolve(id, "function")?),
            Instr::GlobalGet(id) => {
                let index = env.globals.resolve(id, "global")?;
                // Only imported, immutable globals are constant.
                if index >= env.num_imported_globals() {
                    return Err(Error::validation("unknown global"));
                }
                if env.global_type(index).mutable {
                    return Err(Error::validation("constant expression required"));
                }
                Instr::GlobalGet(index)
            }
            _ => return Err(Error::validation("constant expression required")),
        };
        out.push(op);
    }
    Ok(Rc::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Field, Local, MemArg, Memory, MemType, Limits};
    use crate::module::group::group;
    use weft_core::ValType;

    fn type_field(id: Option<&str>, params: &[ValType], results: &[ValType]) -> Field {
        Field::Type(ast::TypeDef {
            id: id.map(Into::into),
            ty: FuncType::new(params.to_vec(), results.to_vec()),
        })
    }

    fn func_field(id: Option<&str>, ty: TypeUse, locals: Vec<Local>, body: Vec<RawInstr>) -> Field {
        Field::Func(ast::Func {
            id: id.map(Into::into),
            ty,
            locals,
            body: Rc::from(body),
        })
    }

    fn rewrite_module(fields: Vec<Field>) -> Result<Module, Error> {
        rewrite(group(ast::Module { id: None, fields })?)
    }

    fn body_of(module: &Module, index: u32) -> &[Op] {
        match module.funcs.get(index).expect("function exists") {
            Def::Local(func) => &func.body,
            Def::Import { .. } => panic!("expected a local function"),
        }
    }

    #[test]
    fn calls_and_labels_resolve_by_name() {
        let module = rewrite_module(vec![
            func_field(Some("callee"), TypeUse::default(), vec![], vec![]),
            func_field(
                Some("caller"),
                TypeUse::default(),
                vec![],
                vec![
                    Instr::Block(
                        BlockAnnot {
                            label: Some("out".into()),
                            ty: BlockType::Void,
                        },
                        Rc::from(vec![
                            Instr::Call(Id::Name("callee".into())),
                            Instr::Br(Id::Name("out".into())),
                        ]),
                    ),
                ],
            ),
        ])
        .unwrap();
        let [Op::Block(_, inner)] = body_of(&module, 1) else {
            panic!("expected a single block")
        };
        assert_eq!(inner.as_ref(), &[Instr::Call(0), Instr::Br(0)][..]);
    }

    #[test]
    fn inner_labels_shadow_outer_ones() {
        let module = rewrite_module(vec![func_field(
            None,
            TypeUse::default(),
            vec![],
            vec![Instr::Block(
                BlockAnnot {
                    label: Some("l".into()),
                    ty: BlockType::Void,
                },
                Rc::from(vec![Instr::Block(
                    BlockAnnot {
                        label: Some("l".into()),
                        ty: BlockType::Void,
                    },
                    Rc::from(vec![Instr::Br(Id::Name("l".into()))]),
                )]),
            )],
        )])
        .unwrap();
        let [Op::Block(_, outer)] = body_of(&module, 0) else {
            panic!("expected a block")
        };
        let [Op::Block(_, inner)] = outer.as_ref() else {
            panic!("expected a nested block")
        };
        // The innermost matching label wins.
        assert_eq!(inner.as_ref(), &[Instr::Br(0)][..]);
    }

    #[test]
    fn params_and_locals_share_one_scope() {
        let sig = InlineSig {
            params: vec![Local {
                id: Some("x".into()),
                ty: ValType::I32,
            }],
            results: vec![],
        };
        let module = rewrite_module(vec![func_field(
            None,
            TypeUse::inline(sig),
            vec![Local {
                id: Some("y".into()),
                ty: ValType::I64,
            }],
            vec![
                Instr::LocalGet(Id::Name("x".into())),
                Instr::Drop,
                Instr::LocalGet(Id::Name("y".into())),
                Instr::Drop,
            ],
        )])
        .unwrap();
        assert_eq!(
            body_of(&module, 0),
            &[
                Instr::LocalGet(0),
                Instr::Drop,
                Instr::LocalGet(1),
                Instr::Drop
            ][..]
        );
    }

    #[test]
    fn unknown_label_depth_is_rejected() {
        let err = rewrite_module(vec![func_field(
            None,
            TypeUse::default(),
            vec![],
            vec![Instr::Br(Id::Num(5))],
        )])
        .unwrap_err();
        assert_eq!(err.to_string(), "unknown label 5");
    }

    #[test]
    fn global_set_on_immutable_global_is_rejected() {
        let err = rewrite_module(vec![
            Field::Global(ast::Global {
                id: Some("g".into()),
                ty: ast::GlobalType {
                    ty: ValType::I32,
                    mutable: false,
                },
                init: Rc::from(vec![Instr::I32Const(0)]),
            }),
            func_field(
                None,
                TypeUse::default(),
                vec![],
                vec![Instr::I32Const(1), Instr::GlobalSet(Id::Name("g".into()))],
            ),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "global is immutable");
    }

    #[test]
    fn initialisers_must_be_constant() {
        let err = rewrite_module(vec![Field::Global(ast::Global {
            id: None,
            ty: ast::GlobalType {
                ty: ValType::I32,
                mutable: false,
            },
            init: Rc::from(vec![
                Instr::I32Const(1),
                Instr::I32Const(2),
                Instr::IBinop(crate::ast::NumSize::S32, crate::ast::IBinOp::Add),
            ]),
        })])
        .unwrap_err();
        assert_eq!(err.to_string(), "constant expression required");
    }

    #[test]
    fn over_aligned_accesses_are_rejected() {
        let memory = Field::Memory(Memory {
            id: None,
            ty: MemType {
                limits: Limits { min: 1, max: None },
            },
        });
        let err = rewrite_module(vec![
            memory.clone(),
            func_field(
                None,
                TypeUse::default(),
                vec![],
                vec![
                    Instr::I32Const(0),
                    Instr::ILoad(crate::ast::NumSize::S32, MemArg { align: 3, offset: 0 }),
                    Instr::Drop,
                ],
            ),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "alignment must not be larger than natural");

        rewrite_module(vec![
            memory,
            func_field(
                None,
                TypeUse::default(),
                vec![],
                vec![
                    Instr::I32Const(0),
                    Instr::ILoad(crate::ast::NumSize::S32, MemArg { align: 2, offset: 0 }),
                    Instr::Drop,
                ],
            ),
        ])
        .expect("natural alignment is fine");
    }

    #[test]
    fn memory_instructions_require_a_memory() {
        let err = rewrite_module(vec![func_field(
            None,
            TypeUse::default(),
            vec![],
            vec![
                Instr::I32Const(0),
                Instr::ILoad(crate::ast::NumSize::S32, MemArg::default()),
                Instr::Drop,
            ],
        )])
        .unwrap_err();
        assert_eq!(err.to_string(), "unknown memory 0");
    }

    #[test]
    fn inline_signature_must_match_declared_type() {
        let err = rewrite_module(vec![
            type_field(Some("t"), &[ValType::I32], &[]),
            func_field(
                None,
                TypeUse {
                    index: Some(Id::Name("t".into())),
                    inline: Some(InlineSig {
                        params: vec![Local {
                            id: None,
                            ty: ValType::I64,
                        }],
                        results: vec![],
                    }),
                },
                vec![],
                vec![],
            ),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "inline function type");
    }

    #[test]
    fn inline_only_signatures_are_interned() {
        let sig = InlineSig {
            params: vec![],
            results: vec![ValType::I32],
        };
        let module = rewrite_module(vec![
            func_field(None, TypeUse::inline(sig.clone()), vec![], vec![Instr::I32Const(1)]),
            func_field(None, TypeUse::inline(sig), vec![], vec![Instr::I32Const(2)]),
        ])
        .unwrap();
        // Both functions share one interned type.
        assert_eq!(module.types.len(), 1);
    }
}
