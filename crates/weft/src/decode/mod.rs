//! Decoding of the canonical Wasm binary format into the raw AST.
//!
//! A module is a `\0asm` header followed by length-prefixed sections in
//! canonical order, with custom sections allowed between any two standard
//! ones. Every declared section byte must be consumed; the decoder fails
//! with "section size mismatch" otherwise.

mod leb;
mod op;

use std::rc::Rc;

use weft_core::FuncType;

use crate::ast::{
    self,
    Data,
    DataMode,
    Elem,
    ElemMode,
    ExternKind,
    Field,
    GlobalType,
    Id,
    ImportDesc,
    Instr,
    Limits,
    MemType,
    RawInstr,
    TableType,
    TypeDef,
    TypeUse,
};
use crate::Error;

/// The four-byte magic at the start of every binary module.
const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];
/// The only supported binary version.
const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// A cursor over a byte slice that fails with "unexpected end" instead of
/// running off the input.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub(crate) fn byte(&mut self) -> Result<u8, Error> {
        let byte = self
            .bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::malformed("unexpected end"))?;
        self.pos += 1;
        Ok(byte)
    }

    pub(crate) fn peek(&self) -> Result<u8, Error> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::malformed("unexpected end"))
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < len {
            return Err(Error::malformed("unexpected end"));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, Error> {
        leb::read_unsigned(|| self.byte(), 32).map(|v| v as u32)
    }

    pub(crate) fn s32(&mut self) -> Result<i32, Error> {
        leb::read_signed(|| self.byte(), 32).map(|v| v as i32)
    }

    pub(crate) fn s33(&mut self) -> Result<i64, Error> {
        leb::read_signed(|| self.byte(), 33)
    }

    pub(crate) fn s64(&mut self) -> Result<i64, Error> {
        leb::read_signed(|| self.byte(), 64)
    }

    fn name(&mut self) -> Result<String, Error> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::malformed("malformed UTF-8 encoding"))
    }
}

/// The standard section identifiers, in canonical order of appearance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SectionId {
    Type,
    Import,
    Function,
    Table,
    Memory,
    Global,
    Export,
    Start,
    Element,
    DataCount,
    Code,
    Data,
}

impl SectionId {
    fn from_byte(byte: u8) -> Result<Option<Self>, Error> {
        Ok(Some(match byte {
            0 => return Ok(None),
            1 => Self::Type,
            2 => Self::Import,
            3 => Self::Function,
            4 => Self::Table,
            5 => Self::Memory,
            6 => Self::Global,
            7 => Self::Export,
            8 => Self::Start,
            9 => Self::Element,
            10 => Self::Code,
            11 => Self::Data,
            12 => Self::DataCount,
            _ => return Err(Error::malformed("malformed section id")),
        }))
    }
}

/// Decodes a complete binary module into the raw AST.
pub fn decode_module(bytes: &[u8]) -> Result<ast::Module, Error> {
    let mut r = Reader::new(bytes);
    if r.take(4).map_err(|_| Error::malformed("unexpected end"))? != MAGIC {
        return Err(Error::malformed("magic header not detected"));
    }
    if r.take(4)? != VERSION {
        return Err(Error::malformed("unknown binary version"));
    }

    let mut decoder = ModuleDecoder::default();
    let mut last: Option<SectionId> = None;
    while !r.is_empty() {
        let id_byte = r.byte()?;
        let size = r.u32()? as usize;
        let payload = r.take(size)?;
        let mut section = Reader::new(payload);
        match SectionId::from_byte(id_byte)? {
            None => decoder.custom_section(&mut section)?,
            Some(id) => {
                if last.is_some_and(|prev| prev >= id) {
                    return Err(Error::malformed("unexpected content after last section"));
                }
                last = Some(id);
                decoder.section(id, &mut section)?;
            }
        }
        if !section.is_empty() {
            return Err(Error::malformed("section size mismatch"));
        }
    }
    decoder.finish()
}

/// Accumulates decoded sections and assembles the raw module.
#[derive(Default)]
struct ModuleDecoder {
    types: Vec<TypeDef>,
    imports: Vec<ast::Import>,
    func_types: Vec<u32>,
    tables: Vec<ast::Table>,
    memories: Vec<ast::Memory>,
    globals: Vec<ast::Global>,
    exports: Vec<ast::Export>,
    start: Option<Id>,
    elems: Vec<Elem>,
    data_count: Option<u32>,
    funcs: Vec<ast::Func>,
    datas: Vec<Data>,
    customs: Vec<ast::Custom>,
}

impl ModuleDecoder {
    fn custom_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let name = r.name()?;
        let bytes = r.take(r.remaining())?.to_vec();
        log::debug!("retaining custom section `{name}` ({} bytes)", bytes.len());
        self.customs.push(ast::Custom { name, bytes });
        Ok(())
    }

    fn section(&mut self, id: SectionId, r: &mut Reader<'_>) -> Result<(), Error> {
        match id {
            SectionId::Type => self.type_section(r),
            SectionId::Import => self.import_section(r),
            SectionId::Function => self.function_section(r),
            SectionId::Table => self.table_section(r),
            SectionId::Memory => self.memory_section(r),
            SectionId::Global => self.global_section(r),
            SectionId::Export => self.export_section(r),
            SectionId::Start => self.start_section(r),
            SectionId::Element => self.element_section(r),
            SectionId::DataCount => self.data_count_section(r),
            SectionId::Code => self.code_section(r),
            SectionId::Data => self.data_section(r),
        }
    }

    fn type_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()?;
        for _ in 0..count {
            if r.byte()? != 0x60 {
                return Err(Error::malformed("malformed functype"));
            }
            let params = val_types(r)?;
            let results = val_types(r)?;
            self.types.push(TypeDef {
                id: None,
                ty: FuncType::new(params, results),
            });
        }
        Ok(())
    }

    fn import_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()?;
        for _ in 0..count {
            let module = r.name()?;
            let name = r.name()?;
            let desc = match r.byte()? {
                0x00 => ImportDesc::Func(None, TypeUse::index(r.u32()?)),
                0x01 => ImportDesc::Table(None, table_type(r)?),
                0x02 => ImportDesc::Memory(None, MemType { limits: limits(r)? }),
                0x03 => ImportDesc::Global(None, global_type(r)?),
                _ => return Err(Error::malformed("malformed import kind")),
            };
            self.imports.push(ast::Import { module, name, desc });
        }
        Ok(())
    }

    fn function_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()?;
        for _ in 0..count {
            self.func_types.push(r.u32()?);
        }
        Ok(())
    }

    fn table_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()?;
        for _ in 0..count {
            let ty = table_type(r)?;
            self.tables.push(ast::Table { id: None, ty });
        }
        Ok(())
    }

    fn memory_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()?;
        for _ in 0..count {
            let limits = limits(r)?;
            self.memories.push(ast::Memory {
                id: None,
                ty: MemType { limits },
            });
        }
        Ok(())
    }

    fn global_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()?;
        for _ in 0..count {
            let ty = global_type(r)?;
            let (init, _) = op::expr(r, false)?;
            self.globals.push(ast::Global { id: None, ty, init });
        }
        Ok(())
    }

    fn export_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()?;
        for _ in 0..count {
            let name = r.name()?;
            let kind = match r.byte()? {
                0x00 => ExternKind::Func,
                0x01 => ExternKind::Table,
                0x02 => ExternKind::Memory,
                0x03 => ExternKind::Global,
                _ => return Err(Error::malformed("malformed export kind")),
            };
            let item = Id::Num(r.u32()?);
            self.exports.push(ast::Export { name, kind, item });
        }
        Ok(())
    }

    fn start_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        self.start = Some(Id::Num(r.u32()?));
        Ok(())
    }

    fn element_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()?;
        for _ in 0..count {
            self.elems.push(element_segment(r)?);
        }
        Ok(())
    }

    fn data_count_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        self.data_count = Some(r.u32()?);
        Ok(())
    }

    fn code_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()? as usize;
        if count != self.func_types.len() {
            return Err(Error::malformed(
                "function and code section have inconsistent lengths",
            ));
        }
        for index in 0..count {
            let size = r.u32()? as usize;
            let body_bytes = r.take(size)?;
            let mut body_reader = Reader::new(body_bytes);
            let locals = locals(&mut body_reader)?;
            let (body, _) = op::expr(&mut body_reader, false)?;
            if !body_reader.is_empty() {
                return Err(Error::malformed("section size mismatch"));
            }
            self.funcs.push(ast::Func {
                id: None,
                ty: TypeUse::index(self.func_types[index]),
                locals,
                body,
            });
        }
        Ok(())
    }

    fn data_section(&mut self, r: &mut Reader<'_>) -> Result<(), Error> {
        let count = r.u32()?;
        if let Some(declared) = self.data_count {
            if declared != count {
                return Err(Error::malformed(
                    "data count and data section have inconsistent lengths",
                ));
            }
        }
        for _ in 0..count {
            let mode = match r.u32()? {
                0 => DataMode::Active {
                    memory: Id::Num(0),
                    offset: op::expr(r, false)?.0,
                },
                1 => DataMode::Passive,
                2 => DataMode::Active {
                    memory: Id::Num(r.u32()?),
                    offset: op::expr(r, false)?.0,
                },
                _ => return Err(Error::malformed("malformed data segment kind")),
            };
            let len = r.u32()? as usize;
            let bytes = r.take(len)?.to_vec();
            self.datas.push(Data {
                id: None,
                bytes,
                mode,
            });
        }
        Ok(())
    }

    fn finish(self) -> Result<ast::Module, Error> {
        if self.funcs.len() != self.func_types.len() {
            return Err(Error::malformed(
                "function and code section have inconsistent lengths",
            ));
        }
        if self.data_count.is_none() {
            let uses_data = self
                .funcs
                .iter()
                .any(|f| uses_data_instrs(&f.body));
            if uses_data {
                return Err(Error::malformed("data count section required"));
            }
        }
        if let Some(declared) = self.data_count {
            if declared as usize != self.datas.len() {
                return Err(Error::malformed(
                    "data count and data section have inconsistent lengths",
                ));
            }
        }

        let mut fields = Vec::new();
        fields.extend(self.types.into_iter().map(Field::Type));
        fields.extend(self.imports.into_iter().map(Field::Import));
        fields.extend(self.funcs.into_iter().map(Field::Func));
        fields.extend(self.tables.into_iter().map(Field::Table));
        fields.extend(self.memories.into_iter().map(Field::Memory));
        fields.extend(self.globals.into_iter().map(Field::Global));
        fields.extend(self.exports.into_iter().map(Field::Export));
        fields.extend(self.start.into_iter().map(Field::Start));
        fields.extend(self.elems.into_iter().map(Field::Elem));
        fields.extend(self.datas.into_iter().map(Field::Data));
        fields.extend(self.customs.into_iter().map(Field::Custom));
        Ok(ast::Module { id: None, fields })
    }
}

fn val_types(r: &mut Reader<'_>) -> Result<Vec<weft_core::ValType>, Error> {
    let count = r.u32()?;
    let mut types = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        types.push(op::val_type_of(r.byte()?)?);
    }
    Ok(types)
}

fn limits(r: &mut Reader<'_>) -> Result<Limits, Error> {
    match r.byte()? {
        0x00 => Ok(Limits {
            min: r.u32()?,
            max: None,
        }),
        0x01 => Ok(Limits {
            min: r.u32()?,
            max: Some(r.u32()?),
        }),
        _ => Err(Error::malformed("integer too large")),
    }
}

fn table_type(r: &mut Reader<'_>) -> Result<TableType, Error> {
    let elem = op::ref_type_of(r.byte()?)?;
    let limits = limits(r)?;
    Ok(TableType { limits, elem })
}

fn global_type(r: &mut Reader<'_>) -> Result<GlobalType, Error> {
    let ty = op::val_type_of(r.byte()?)?;
    let mutable = match r.byte()? {
        0x00 => false,
        0x01 => true,
        _ => return Err(Error::malformed("malformed mutability")),
    };
    Ok(GlobalType { ty, mutable })
}

fn locals(r: &mut Reader<'_>) -> Result<Vec<ast::Local>, Error> {
    let group_count = r.u32()?;
    let mut locals = Vec::new();
    let mut total: u64 = 0;
    for _ in 0..group_count {
        let count = r.u32()?;
        total += u64::from(count);
        if total > u64::from(u32::MAX) {
            return Err(Error::malformed("too many locals"));
        }
        let ty = op::val_type_of(r.byte()?)?;
        for _ in 0..count {
            locals.push(ast::Local { id: None, ty });
        }
    }
    Ok(locals)
}

/// Reads one element segment; the leading `u32` selects among the eight
/// encodings of the bulk-memory proposal.
fn element_segment(r: &mut Reader<'_>) -> Result<Elem, Error> {
    let kind = r.u32()?;
    if kind > 7 {
        return Err(Error::malformed("malformed element segment kind"));
    }
    let active = kind & 0b001 == 0;
    let explicit_table = kind & 0b010 != 0;
    let exprs = kind & 0b100 != 0;

    let table = if active && explicit_table {
        Id::Num(r.u32()?)
    } else {
        Id::Num(0)
    };
    let offset = if active {
        Some(op::expr(r, false)?.0)
    } else {
        None
    };
    let ty = if kind & 0b011 == 0 {
        // Implicit funcref in the two short active encodings.
        weft_core::RefType::Func
    } else if exprs {
        op::ref_type_of(r.byte()?)?
    } else {
        match r.byte()? {
            0x00 => weft_core::RefType::Func,
            _ => return Err(Error::malformed("malformed element kind")),
        }
    };

    let count = r.u32()?;
    let mut items: Vec<ast::RawExpr> = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        if exprs {
            items.push(op::expr(r, false)?.0);
        } else {
            let func: RawInstr = Instr::RefFunc(Id::Num(r.u32()?));
            items.push(Rc::from(vec![func]));
        }
    }

    let mode = match (active, kind & 0b011) {
        (true, _) => ElemMode::Active {
            table,
            offset: offset.expect("active segments read an offset above"),
        },
        (false, 0b011) => ElemMode::Declarative,
        (false, _) => ElemMode::Passive,
    };
    Ok(Elem {
        id: None,
        ty,
        items,
        mode,
    })
}

fn uses_data_instrs(body: &[RawInstr]) -> bool {
    body.iter().any(|instr| match instr {
        Instr::MemoryInit(_) | Instr::DataDrop(_) => true,
        Instr::Block(_, inner) | Instr::Loop(_, inner) => uses_data_instrs(inner),
        Instr::If(_, then, alt) => uses_data_instrs(then) || uses_data_instrs(alt),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Field;

    fn module_of(wat: &str) -> ast::Module {
        let bytes = wat::parse_str(wat).expect("test module must be valid wat");
        decode_module(&bytes).expect("test module must decode")
    }

    #[test]
    fn rejects_bad_magic() {
        let err = decode_module(b"\x01asm\x01\x00\x00\x00").unwrap_err();
        assert_eq!(err.to_string(), "magic header not detected");
    }

    #[test]
    fn rejects_bad_version() {
        let err = decode_module(b"\x00asm\x02\x00\x00\x00").unwrap_err();
        assert_eq!(err.to_string(), "unknown binary version");
    }

    #[test]
    fn rejects_truncated_section() {
        // A type section claiming 100 bytes with none following.
        let err = decode_module(b"\x00asm\x01\x00\x00\x00\x01\x64").unwrap_err();
        assert_eq!(err.to_string(), "unexpected end");
    }

    #[test]
    fn rejects_section_with_trailing_bytes() {
        // An empty type vector followed by a stray byte, all inside the
        // declared section size.
        let err =
            decode_module(b"\x00asm\x01\x00\x00\x00\x01\x02\x00\xAA").unwrap_err();
        assert_eq!(err.to_string(), "section size mismatch");
    }

    #[test]
    fn rejects_out_of_order_sections() {
        // A memory section (5) after an export section (7).
        let mut bytes = b"\x00asm\x01\x00\x00\x00".to_vec();
        bytes.extend_from_slice(&[0x07, 0x01, 0x00]); // empty exports
        bytes.extend_from_slice(&[0x05, 0x01, 0x00]); // empty memories
        let err = decode_module(&bytes).unwrap_err();
        assert_eq!(err.to_string(), "unexpected content after last section");
    }

    #[test]
    fn decodes_functions_with_nested_control() {
        let module = module_of(
            r#"
            (module
              (func (param i32) (result i32)
                (if (result i32) (local.get 0)
                  (then (i32.const 1))
                  (else (block (result i32) (i32.const 2))))))
            "#,
        );
        let funcs: Vec<_> = module
            .fields
            .iter()
            .filter(|f| matches!(f, Field::Func(_)))
            .collect();
        assert_eq!(funcs.len(), 1);
        let Field::Func(func) = funcs[0] else {
            unreachable!()
        };
        assert!(matches!(func.body[0], Instr::LocalGet(Id::Num(0))));
        assert!(matches!(func.body[1], Instr::If(..)));
    }

    #[test]
    fn retains_custom_sections_by_name() {
        let mut bytes = wat::parse_str("(module)").unwrap();
        // name-length 5, "hello", payload.
        bytes.extend_from_slice(&[0x00, 0x09, 0x05, b'h', b'e', b'l', b'l', b'o', 1, 2, 3]);
        let module = decode_module(&bytes).unwrap();
        let customs: Vec<_> = module
            .fields
            .iter()
            .filter_map(|f| match f {
                Field::Custom(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(customs.len(), 1);
        assert_eq!(customs[0].name, "hello");
        assert_eq!(customs[0].bytes, vec![1, 2, 3]);
    }

    #[test]
    fn decodes_bulk_memory_segments() {
        let module = module_of(
            r#"
            (module
              (memory 1)
              (data (i32.const 8) "abc")
              (data "passive")
              (func (memory.init 1 (i32.const 0) (i32.const 0) (i32.const 4))))
            "#,
        );
        let datas: Vec<_> = module
            .fields
            .iter()
            .filter_map(|f| match f {
                Field::Data(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(datas.len(), 2);
        assert!(matches!(datas[0].mode, DataMode::Active { .. }));
        assert!(matches!(datas[1].mode, DataMode::Passive));
        assert_eq!(datas[1].bytes, b"passive");
    }

    #[test]
    fn illegal_opcode_is_reported() {
        let mut bytes = b"\x00asm\x01\x00\x00\x00".to_vec();
        // type section: one [] -> [] type
        bytes.extend_from_slice(&[0x01, 0x04, 0x01, 0x60, 0x00, 0x00]);
        // function section
        bytes.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
        // code section: one body with opcode 0xF7
        bytes.extend_from_slice(&[0x0A, 0x05, 0x01, 0x03, 0x00, 0xF7, 0x0B]);
        let err = decode_module(&bytes).unwrap_err();
        assert!(err.to_string().contains("illegal opcode"));
    }
}
