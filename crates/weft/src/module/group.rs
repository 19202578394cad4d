//! The grouper/assigner: one walk over the raw AST that partitions fields
//! by kind and assigns dense indices.
//!
//! Within each kind, imports are numbered before local definitions so that
//! an imported function and a local function share one index space.
//! Textual names are bound as indices are assigned; a name bound twice in
//! the same kind is rejected.

use crate::ast::{self, Field, Id, ImportDesc, InlineSig, MemType, TypeUse};
use crate::module::{Def, Named};
use crate::Error;

use weft_core::FuncType;

/// The grouped form: indices assigned and names bound, instruction
/// payloads still raw.
#[derive(Debug, Default)]
pub(crate) struct Grouped {
    pub types: Named<FuncType>,
    pub funcs: Named<Def<ast::Func, TypeUse>>,
    pub tables: Named<Def<ast::TableType, ast::TableType>>,
    pub memories: Named<Def<MemType, MemType>>,
    pub globals: Named<Def<ast::Global, ast::GlobalType>>,
    pub elems: Named<ast::Elem>,
    pub datas: Named<ast::Data>,
    pub exports: Vec<ast::Export>,
    pub start: Option<Id>,
    pub customs: Vec<ast::Custom>,
}

/// Partitions `raw` into per-kind collections with dense indices.
pub(crate) fn group(raw: ast::Module) -> Result<Grouped, Error> {
    let mut grouped = Grouped::default();

    // Imports claim the leading indices of their kind.
    for field in &raw.fields {
        let Field::Import(import) = field else {
            continue;
        };
        let module = import.module.clone();
        let name = import.name.clone();
        match &import.desc {
            ImportDesc::Func(id, ty) => {
                grouped.funcs.push(
                    id.clone(),
                    Def::Import {
                        module,
                        name,
                        ty: ty.clone(),
                    },
                    "func",
                )?;
            }
            ImportDesc::Table(id, ty) => {
                grouped.tables.push(
                    id.clone(),
                    Def::Import {
                        module,
                        name,
                        ty: *ty,
                    },
                    "table",
                )?;
            }
            ImportDesc::Memory(id, ty) => {
                grouped.memories.push(
                    id.clone(),
                    Def::Import {
                        module,
                        name,
                        ty: *ty,
                    },
                    "memory",
                )?;
            }
            ImportDesc::Global(id, ty) => {
                grouped.globals.push(
                    id.clone(),
                    Def::Import {
                        module,
                        name,
                        ty: *ty,
                    },
                    "global",
                )?;
            }
        }
    }

    for field in raw.fields {
        match field {
            Field::Import(_) => {}
            Field::Type(def) => {
                grouped.types.push(def.id, def.ty, "type")?;
            }
            Field::Func(func) => {
                grouped.funcs.push(func.id.clone(), Def::Local(func), "func")?;
            }
            Field::Table(table) => {
                grouped.tables.push(table.id, Def::Local(table.ty), "table")?;
            }
            Field::Memory(memory) => {
                grouped
                    .memories
                    .push(memory.id, Def::Local(memory.ty), "memory")?;
            }
            Field::Global(global) => {
                grouped
                    .globals
                    .push(global.id.clone(), Def::Local(global), "global")?;
            }
            Field::Export(export) => grouped.exports.push(export),
            Field::Start(id) => {
                if grouped.start.replace(id).is_some() {
                    return Err(Error::validation("multiple start sections"));
                }
            }
            Field::Elem(elem) => {
                grouped.elems.push(elem.id.clone(), elem, "elem")?;
            }
            Field::Data(data) => {
                grouped.datas.push(data.id.clone(), data, "data")?;
            }
            Field::Custom(custom) => grouped.customs.push(custom),
        }
    }

    // A function whose type use carries only an inline signature still
    // needs that signature declared; give empty uses the empty one.
    for def in grouped.funcs.entries_mut() {
        if let Def::Local(func) = def {
            if func.ty.index.is_none() && func.ty.inline.is_none() {
                func.ty.inline = Some(InlineSig::default());
            }
        }
    }

    log::debug!(
        "grouped module: {} types, {} funcs, {} tables, {} memories, {} globals, {} elems, {} datas",
        grouped.types.len(),
        grouped.funcs.len(),
        grouped.tables.len(),
        grouped.memories.len(),
        grouped.globals.len(),
        grouped.elems.len(),
        grouped.datas.len(),
    );
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Export, ExternKind, Global, GlobalType, Import, Limits, TableType};
    use std::rc::Rc;
    use weft_core::{RefType, ValType};

    fn empty_expr() -> ast::RawExpr {
        Rc::from(Vec::new())
    }

    #[test]
    fn imports_are_numbered_first() {
        let raw = ast::Module {
            id: None,
            fields: vec![
                Field::Global(Global {
                    id: Some("local".into()),
                    ty: GlobalType {
                        ty: ValType::I32,
                        mutable: false,
                    },
                    init: empty_expr(),
                }),
                Field::Import(Import {
                    module: "env".into(),
                    name: "g".into(),
                    desc: ImportDesc::Global(
                        Some("imported".into()),
                        GlobalType {
                            ty: ValType::I32,
                            mutable: false,
                        },
                    ),
                }),
            ],
        };
        let grouped = group(raw).unwrap();
        // The import got index 0 even though it appeared second.
        assert_eq!(grouped.globals.index_of("imported"), Some(0));
        assert_eq!(grouped.globals.index_of("local"), Some(1));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let table = TableType {
            limits: Limits { min: 1, max: None },
            elem: RefType::Func,
        };
        let raw = ast::Module {
            id: None,
            fields: vec![
                Field::Table(ast::Table {
                    id: Some("t".into()),
                    ty: table,
                }),
                Field::Table(ast::Table {
                    id: Some("t".into()),
                    ty: table,
                }),
            ],
        };
        let err = group(raw).unwrap_err();
        assert_eq!(err.to_string(), "duplicate table $t");
    }

    #[test]
    fn exports_stay_unresolved() {
        let raw = ast::Module {
            id: None,
            fields: vec![Field::Export(Export {
                name: "f".into(),
                kind: ExternKind::Func,
                item: Id::Name("missing".into()),
            })],
        };
        let grouped = group(raw).unwrap();
        assert_eq!(grouped.exports.len(), 1);
        assert_eq!(grouped.exports[0].item, Id::Name("missing".into()));
    }
}
