//! The flat opcode table: one leading byte (plus an LEB128 sub-opcode for
//! the `0xFC` family) mapped to an instruction constructor.

use std::rc::Rc;

use weft_core::{RefType, ValType, F32, F64};

use crate::ast::{
    BlockAnnot,
    BlockType,
    FBinOp,
    FRelOp,
    FUnOp,
    IBinOp,
    IRelOp,
    IUnOp,
    Id,
    Instr,
    MemArg,
    NumSize,
    PackSize,
    RawExpr,
    RawInstr,
    Sign,
    TypeUse,
};
use crate::decode::Reader;
use crate::Error;

use NumSize::{S32, S64};
use Sign::{S, U};

/// How an instruction sequence ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum End {
    /// The `0x0B` end byte.
    Block,
    /// The `0x05` else byte.
    Else,
}

/// Reads instructions until an `end` (or, when `in_if` is set, an `else`)
/// delimiter, consuming the delimiter.
pub(super) fn expr(r: &mut Reader<'_>, in_if: bool) -> Result<(RawExpr, End), Error> {
    let mut instrs = Vec::new();
    loop {
        match r.byte()? {
            0x0B => return Ok((Rc::from(instrs), End::Block)),
            0x05 if in_if => return Ok((Rc::from(instrs), End::Else)),
            opcode => instrs.push(instr(r, opcode)?),
        }
    }
}

fn block_type(r: &mut Reader<'_>) -> Result<BlockAnnot, Error> {
    match r.peek()? {
        0x40 => {
            r.byte()?;
            Ok(BlockType::Void.into())
        }
        byte if is_val_type(byte) => {
            r.byte()?;
            Ok(BlockType::Val(val_type_of(byte)?).into())
        }
        _ => {
            let index = r.s33()?;
            if index < 0 {
                return Err(Error::malformed("malformed value type"));
            }
            Ok(BlockType::TypeUse(TypeUse::index(index as u32)).into())
        }
    }
}

fn is_val_type(byte: u8) -> bool {
    matches!(byte, 0x7F | 0x7E | 0x7D | 0x7C | 0x70 | 0x6F)
}

pub(super) fn val_type_of(byte: u8) -> Result<ValType, Error> {
    match byte {
        0x7F => Ok(ValType::I32),
        0x7E => Ok(ValType::I64),
        0x7D => Ok(ValType::F32),
        0x7C => Ok(ValType::F64),
        0x70 => Ok(ValType::Ref(RefType::Func)),
        0x6F => Ok(ValType::Ref(RefType::Extern)),
        _ => Err(Error::malformed("malformed value type")),
    }
}

pub(super) fn ref_type_of(byte: u8) -> Result<RefType, Error> {
    match byte {
        0x70 => Ok(RefType::Func),
        0x6F => Ok(RefType::Extern),
        _ => Err(Error::malformed("malformed reference type")),
    }
}

fn mem_arg(r: &mut Reader<'_>) -> Result<MemArg, Error> {
    let align = r.u32()?;
    let offset = r.u32()?;
    Ok(MemArg { align, offset })
}

fn zero_byte(r: &mut Reader<'_>) -> Result<(), Error> {
    if r.byte()? != 0x00 {
        return Err(Error::malformed("zero byte expected"));
    }
    Ok(())
}

fn id(r: &mut Reader<'_>) -> Result<Id, Error> {
    Ok(Id::Num(r.u32()?))
}

/// Decodes the instruction introduced by `opcode`.
pub(super) fn instr(r: &mut Reader<'_>, opcode: u8) -> Result<RawInstr, Error> {
    let instr = match opcode {
        0x00 => Instr::Unreachable,
        0x01 => Instr::Nop,
        0x02 => {
            let bt = block_type(r)?;
            let (body, _) = expr(r, false)?;
            Instr::Block(bt, body)
        }
        0x03 => {
            let bt = block_type(r)?;
            let (body, _) = expr(r, false)?;
            Instr::Loop(bt, body)
        }
        0x04 => {
            let bt = block_type(r)?;
            let (then, end) = expr(r, true)?;
            let alt = if end == End::Else {
                let (alt, _) = expr(r, false)?;
                alt
            } else {
                Rc::from(Vec::new())
            };
            Instr::If(bt, then, alt)
        }
        0x0C => Instr::Br(id(r)?),
        0x0D => Instr::BrIf(id(r)?),
        0x0E => {
            let count = r.u32()?;
            let mut labels = Vec::with_capacity(count as usize);
            for _ in 0..count {
                labels.push(id(r)?);
            }
            let default = id(r)?;
            Instr::BrTable(labels.into_boxed_slice(), default)
        }
        0x0F => Instr::Return,
        0x10 => Instr::Call(id(r)?),
        0x11 => {
            let ty = TypeUse::index(r.u32()?);
            let table = id(r)?;
            Instr::CallIndirect(table, BlockType::TypeUse(ty).into())
        }
        0x1A => Instr::Drop,
        0x1B => Instr::Select(None),
        0x1C => {
            let count = r.u32()?;
            if count != 1 {
                return Err(Error::malformed("invalid result arity"));
            }
            Instr::Select(Some(val_type_of(r.byte()?)?))
        }
        0x20 => Instr::LocalGet(id(r)?),
        0x21 => Instr::LocalSet(id(r)?),
        0x22 => Instr::LocalTee(id(r)?),
        0x23 => Instr::GlobalGet(id(r)?),
        0x24 => Instr::GlobalSet(id(r)?),
        0x25 => Instr::TableGet(id(r)?),
        0x26 => Instr::TableSet(id(r)?),
        0x28 => Instr::ILoad(S32, mem_arg(r)?),
        0x29 => Instr::ILoad(S64, mem_arg(r)?),
        0x2A => Instr::FLoad(S32, mem_arg(r)?),
        0x2B => Instr::FLoad(S64, mem_arg(r)?),
        0x2C => Instr::ILoadPacked(S32, PackSize::P8, S, mem_arg(r)?),
        0x2D => Instr::ILoadPacked(S32, PackSize::P8, U, mem_arg(r)?),
        0x2E => Instr::ILoadPacked(S32, PackSize::P16, S, mem_arg(r)?),
        0x2F => Instr::ILoadPacked(S32, PackSize::P16, U, mem_arg(r)?),
        0x30 => Instr::ILoadPacked(S64, PackSize::P8, S, mem_arg(r)?),
        0x31 => Instr::ILoadPacked(S64, PackSize::P8, U, mem_arg(r)?),
        0x32 => Instr::ILoadPacked(S64, PackSize::P16, S, mem_arg(r)?),
        0x33 => Instr::ILoadPacked(S64, PackSize::P16, U, mem_arg(r)?),
        0x34 => Instr::ILoadPacked(S64, PackSize::P32, S, mem_arg(r)?),
        0x35 => Instr::ILoadPacked(S64, PackSize::P32, U, mem_arg(r)?),
        0x36 => Instr::IStore(S32, mem_arg(r)?),
        0x37 => Instr::IStore(S64, mem_arg(r)?),
        0x38 => Instr::FStore(S32, mem_arg(r)?),
        0x39 => Instr::FStore(S64, mem_arg(r)?),
        0x3A => Instr::IStorePacked(S32, PackSize::P8, mem_arg(r)?),
        0x3B => Instr::IStorePacked(S32, PackSize::P16, mem_arg(r)?),
        0x3C => Instr::IStorePacked(S64, PackSize::P8, mem_arg(r)?),
        0x3D => Instr::IStorePacked(S64, PackSize::P16, mem_arg(r)?),
        0x3E => Instr::IStorePacked(S64, PackSize::P32, mem_arg(r)?),
        0x3F => {
            zero_byte(r)?;
            Instr::MemorySize
        }
        0x40 => {
            zero_byte(r)?;
            Instr::MemoryGrow
        }
        0x41 => Instr::I32Const(r.s32()?),
        0x42 => Instr::I64Const(r.s64()?),
        0x43 => Instr::F32Const(F32::from_bits(u32::from_le_bytes(
            r.take(4)?.try_into().expect("4 bytes were taken"),
        ))),
        0x44 => Instr::F64Const(F64::from_bits(u64::from_le_bytes(
            r.take(8)?.try_into().expect("8 bytes were taken"),
        ))),
        0x45 => Instr::IEqz(S32),
        0x46 => Instr::IRelop(S32, IRelOp::Eq),
        0x47 => Instr::IRelop(S32, IRelOp::Ne),
        0x48 => Instr::IRelop(S32, IRelOp::Lt(S)),
        0x49 => Instr::IRelop(S32, IRelOp::Lt(U)),
        0x4A => Instr::IRelop(S32, IRelOp::Gt(S)),
        0x4B => Instr::IRelop(S32, IRelOp::Gt(U)),
        0x4C => Instr::IRelop(S32, IRelOp::Le(S)),
        0x4D => Instr::IRelop(S32, IRelOp::Le(U)),
        0x4E => Instr::IRelop(S32, IRelOp::Ge(S)),
        0x4F => Instr::IRelop(S32, IRelOp::Ge(U)),
        0x50 => Instr::IEqz(S64),
        0x51 => Instr::IRelop(S64, IRelOp::Eq),
        0x52 => Instr::IRelop(S64, IRelOp::Ne),
        0x53 => Instr::IRelop(S64, IRelOp::Lt(S)),
        0x54 => Instr::IRelop(S64, IRelOp::Lt(U)),
        0x55 => Instr::IRelop(S64, IRelOp::Gt(S)),
        0x56 => Instr::IRelop(S64, IRelOp::Gt(U)),
        0x57 => Instr::IRelop(S64, IRelOp::Le(S)),
        0x58 => Instr::IRelop(S64, IRelOp::Le(U)),
        0x59 => Instr::IRelop(S64, IRelOp::Ge(S)),
        0x5A => Instr::IRelop(S64, IRelOp::Ge(U)),
        0x5B => Instr::FRelop(S32, FRelOp::Eq),
        0x5C => Instr::FRelop(S32, FRelOp::Ne),
        0x5D => Instr::FRelop(S32, FRelOp::Lt),
        0x5E => Instr::FRelop(S32, FRelOp::Gt),
        0x5F => Instr::FRelop(S32, FRelOp::Le),
        0x60 => Instr::FRelop(S32, FRelOp::Ge),
        0x61 => Instr::FRelop(S64, FRelOp::Eq),
        0x62 => Instr::FRelop(S64, FRelOp::Ne),
        0x63 => Instr::FRelop(S64, FRelOp::Lt),
        0x64 => Instr::FRelop(S64, FRelOp::Gt),
        0x65 => Instr::FRelop(S64, FRelOp::Le),
        0x66 => Instr::FRelop(S64, FRelOp::Ge),
        0x67 => Instr::IUnop(S32, IUnOp::Clz),
        0x68 => Instr::IUnop(S32, IUnOp::Ctz),
        0x69 => Instr::IUnop(S32, IUnOp::Popcnt),
        0x6A => Instr::IBinop(S32, IBinOp::Add),
        0x6B => Instr::IBinop(S32, IBinOp::Sub),
        0x6C => Instr::IBinop(S32, IBinOp::Mul),
        0x6D => Instr::IBinop(S32, IBinOp::Div(S)),
        0x6E => Instr::IBinop(S32, IBinOp::Div(U)),
        0x6F => Instr::IBinop(S32, IBinOp::Rem(S)),
        0x70 => Instr::IBinop(S32, IBinOp::Rem(U)),
        0x71 => Instr::IBinop(S32, IBinOp::And),
        0x72 => Instr::IBinop(S32, IBinOp::Or),
        0x73 => Instr::IBinop(S32, IBinOp::Xor),
        0x74 => Instr::IBinop(S32, IBinOp::Shl),
        0x75 => Instr::IBinop(S32, IBinOp::Shr(S)),
        0x76 => Instr::IBinop(S32, IBinOp::Shr(U)),
        0x77 => Instr::IBinop(S32, IBinOp::Rotl),
        0x78 => Instr::IBinop(S32, IBinOp::Rotr),
        0x79 => Instr::IUnop(S64, IUnOp::Clz),
        0x7A => Instr::IUnop(S64, IUnOp::Ctz),
        0x7B => Instr::IUnop(S64, IUnOp::Popcnt),
        0x7C => Instr::IBinop(S64, IBinOp::Add),
        0x7D => Instr::IBinop(S64, IBinOp::Sub),
        0x7E => Instr::IBinop(S64, IBinOp::Mul),
        0x7F => Instr::IBinop(S64, IBinOp::Div(S)),
        0x80 => Instr::IBinop(S64, IBinOp::Div(U)),
        0x81 => Instr::IBinop(S64, IBinOp::Rem(S)),
        0x82 => Instr::IBinop(S64, IBinOp::Rem(U)),
        0x83 => Instr::IBinop(S64, IBinOp::And),
        0x84 => Instr::IBinop(S64, IBinOp::Or),
        0x85 => Instr::IBinop(S64, IBinOp::Xor),
        0x86 => Instr::IBinop(S64, IBinOp::Shl),
        0x87 => Instr::IBinop(S64, IBinOp::Shr(S)),
        0x88 => Instr::IBinop(S64, IBinOp::Shr(U)),
        0x89 => Instr::IBinop(S64, IBinOp::Rotl),
        0x8A => Instr::IBinop(S64, IBinOp::Rotr),
        0x8B => Instr::FUnop(S32, FUnOp::Abs),
        0x8C => Instr::FUnop(S32, FUnOp::Neg),
        0x8D => Instr::FUnop(S32, FUnOp::Ceil),
        0x8E => Instr::FUnop(S32, FUnOp::Floor),
        0x8F => Instr::FUnop(S32, FUnOp::Trunc),
        0x90 => Instr::FUnop(S32, FUnOp::Nearest),
        0x91 => Instr::FUnop(S32, FUnOp::Sqrt),
        0x92 => Instr::FBinop(S32, FBinOp::Add),
        0x93 => Instr::FBinop(S32, FBinOp::Sub),
        0x94 => Instr::FBinop(S32, FBinOp::Mul),
        0x95 => Instr::FBinop(S32, FBinOp::Div),
        0x96 => Instr::FBinop(S32, FBinOp::Min),
        0x97 => Instr::FBinop(S32, FBinOp::Max),
        0x98 => Instr::FBinop(S32, FBinOp::Copysign),
        0x99 => Instr::FUnop(S64, FUnOp::Abs),
        0x9A => Instr::FUnop(S64, FUnOp::Neg),
        0x9B => Instr::FUnop(S64, FUnOp::Ceil),
        0x9C => Instr::FUnop(S64, FUnOp::Floor),
        0x9D => Instr::FUnop(S64, FUnOp::Trunc),
        0x9E => Instr::FUnop(S64, FUnOp::Nearest),
        0x9F => Instr::FUnop(S64, FUnOp::Sqrt),
        0xA0 => Instr::FBinop(S64, FBinOp::Add),
        0xA1 => Instr::FBinop(S64, FBinOp::Sub),
        0xA2 => Instr::FBinop(S64, FBinOp::Mul),
        0xA3 => Instr::FBinop(S64, FBinOp::Div),
        0xA4 => Instr::FBinop(S64, FBinOp::Min),
        0xA5 => Instr::FBinop(S64, FBinOp::Max),
        0xA6 => Instr::FBinop(S64, FBinOp::Copysign),
        0xA7 => Instr::I32WrapI64,
        0xA8 => Instr::ITrunc(S32, S32, S),
        0xA9 => Instr::ITrunc(S32, S32, U),
        0xAA => Instr::ITrunc(S32, S64, S),
        0xAB => Instr::ITrunc(S32, S64, U),
        0xAC => Instr::I64ExtendI32(S),
        0xAD => Instr::I64ExtendI32(U),
        0xAE => Instr::ITrunc(S64, S32, S),
        0xAF => Instr::ITrunc(S64, S32, U),
        0xB0 => Instr::ITrunc(S64, S64, S),
        0xB1 => Instr::ITrunc(S64, S64, U),
        0xB2 => Instr::FConvertI(S32, S32, S),
        0xB3 => Instr::FConvertI(S32, S32, U),
        0xB4 => Instr::FConvertI(S32, S64, S),
        0xB5 => Instr::FConvertI(S32, S64, U),
        0xB6 => Instr::F32DemoteF64,
        0xB7 => Instr::FConvertI(S64, S32, S),
        0xB8 => Instr::FConvertI(S64, S32, U),
        0xB9 => Instr::FConvertI(S64, S64, S),
        0xBA => Instr::FConvertI(S64, S64, U),
        0xBB => Instr::F64PromoteF32,
        0xBC => Instr::IReinterpretF(S32),
        0xBD => Instr::IReinterpretF(S64),
        0xBE => Instr::FReinterpretI(S32),
        0xBF => Instr::FReinterpretI(S64),
        0xC0 => Instr::IExtend(S32, PackSize::P8),
        0xC1 => Instr::IExtend(S32, PackSize::P16),
        0xC2 => Instr::IExtend(S64, PackSize::P8),
        0xC3 => Instr::IExtend(S64, PackSize::P16),
        0xC4 => Instr::IExtend(S64, PackSize::P32),
        0xD0 => Instr::RefNull(ref_type_of(r.byte()?)?),
        0xD1 => Instr::RefIsNull,
        0xD2 => Instr::RefFunc(id(r)?),
        0xFC => return misc_instr(r),
        _ => return Err(Error::malformed(format!("illegal opcode {opcode:#04x}"))),
    };
    Ok(instr)
}

/// The `0xFC` family: saturating truncations and bulk memory/table ops.
fn misc_instr(r: &mut Reader<'_>) -> Result<RawInstr, Error> {
    let sub = r.u32()?;
    let instr = match sub {
        0 => Instr::ITruncSat(S32, S32, S),
        1 => Instr::ITruncSat(S32, S32, U),
        2 => Instr::ITruncSat(S32, S64, S),
        3 => Instr::ITruncSat(S32, S64, U),
        4 => Instr::ITruncSat(S64, S32, S),
        5 => Instr::ITruncSat(S64, S32, U),
        6 => Instr::ITruncSat(S64, S64, S),
        7 => Instr::ITruncSat(S64, S64, U),
        8 => {
            let data = id(r)?;
            zero_byte(r)?;
            Instr::MemoryInit(data)
        }
        9 => Instr::DataDrop(id(r)?),
        10 => {
            zero_byte(r)?;
            zero_byte(r)?;
            Instr::MemoryCopy
        }
        11 => {
            zero_byte(r)?;
            Instr::MemoryFill
        }
        12 => {
            let elem = id(r)?;
            let table = id(r)?;
            Instr::TableInit { table, elem }
        }
        13 => Instr::ElemDrop(id(r)?),
        14 => {
            let dst = id(r)?;
            let src = id(r)?;
            Instr::TableCopy { dst, src }
        }
        15 => Instr::TableGrow(id(r)?),
        16 => Instr::TableSize(id(r)?),
        17 => Instr::TableFill(id(r)?),
        _ => return Err(Error::malformed(format!("illegal opcode 0xfc {sub}"))),
    };
    Ok(instr)
}
