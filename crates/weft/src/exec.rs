//! The interpreter core.
//!
//! A thread is a value stack, a stack of call frames (each with its own
//! label stack), a path condition, and an owned [`Store`]. The machine is
//! written once against the [`Algebra`] trait: [`Concrete`] computes
//! bit-exact native values, while the symbolic instance in [`crate::sym`]
//! builds solver terms and forks threads at satisfiable branch points.
//!
//! `eval_choice` is the only branching point. `if`, `br_if`, `br_table`
//! and the arithmetic trap predicates (division by zero, signed overflow,
//! float truncation range) all flow through it; everything else is a pure
//! state transformation.

use std::fmt;
use std::rc::Rc;

use weft_core::{
    ArithmeticOps,
    Float,
    FuncType,
    Integer,
    LittleEndianConvert,
    Trap,
    TrapCode,
    TruncSatInto,
    TryTruncateInto,
    Val,
    ValType,
    F32,
    F64,
};

use crate::ast::{FBinOp, FRelOp, FUnOp, IBinOp, IRelOp, IUnOp, MemArg, NumSize, PackSize, Sign};
use crate::module::{Code, Op};
use crate::store::{ExternVal, FuncInst, HostCtx, Instance, Ref, Store, PAGE_SIZE};
use crate::Error;

/// Maximum number of frames on the call stack.
pub const CALL_STACK_LIMIT: usize = 1024;

/// The feasible outcomes of a boolean choice.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Branches {
    /// Exactly one outcome is feasible.
    Taken(bool),
    /// Both outcomes are satisfiable; the caller must fork.
    Either,
}

/// The shape of a memory load.
#[derive(Debug, Copy, Clone)]
pub enum LoadKind {
    /// Whole-width integer.
    I(NumSize),
    /// Float.
    F(NumSize),
    /// Packed integer with sign or zero extension.
    IPacked(NumSize, PackSize, Sign),
}

impl LoadKind {
    /// The access width in bytes.
    pub fn width(self) -> u64 {
        match self {
            Self::I(size) | Self::F(size) => u64::from(size.bytes()),
            Self::IPacked(_, pack, _) => u64::from(pack.bytes()),
        }
    }
}

/// The shape of a memory store.
#[derive(Debug, Copy, Clone)]
pub enum StoreKind {
    /// Whole-width integer.
    I(NumSize),
    /// Float.
    F(NumSize),
    /// Packed integer of the low bits.
    IPacked(NumSize, PackSize),
}

impl StoreKind {
    /// The access width in bytes.
    pub fn width(self) -> u64 {
        match self {
            Self::I(size) | Self::F(size) => u64::from(size.bytes()),
            Self::IPacked(_, pack) => u64::from(pack.bytes()),
        }
    }
}

/// A conversion operator, shared between the interpreter and the algebra.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CvtOp {
    /// `i32.wrap_i64`.
    I32WrapI64,
    /// `i64.extend_i32_s` / `_u`.
    I64ExtendI32(Sign),
    /// Trapping truncation: target width, source width.
    ITrunc(NumSize, NumSize, Sign),
    /// Saturating truncation.
    ITruncSat(NumSize, NumSize, Sign),
    /// Integer to float: target width, source width.
    FConvertI(NumSize, NumSize, Sign),
    /// `f32.demote_f64`.
    F32DemoteF64,
    /// `f64.promote_f32`.
    F64PromoteF32,
    /// Float-to-integer bit cast.
    IReinterpretF(NumSize),
    /// Integer-to-float bit cast.
    FReinterpretI(NumSize),
    /// In-place sign extension from a packed width.
    IExtend(NumSize, PackSize),
}

/// The value/effect algebra the interpreter is parametric over.
///
/// The interface is total: every opcode must be expressible on every
/// algebra. Operations that can trap are split into a boolean *predicate*
/// (routed through [`Algebra::eval_choice`] by the interpreter) and a
/// total operation that assumes the predicate was false.
pub trait Algebra: Clone {
    /// A runtime value.
    type Value: Clone + fmt::Debug;
    /// The contents of one linear memory.
    type Mem: Clone + fmt::Debug + Default;

    /// Injects a concrete value.
    fn from_val(&mut self, val: Val) -> Self::Value;
    /// Projects a ground value of declared type `ty`, if possible.
    fn to_val(&mut self, v: &Self::Value, ty: ValType) -> Option<Val>;
    /// Injects a runtime reference.
    fn from_ref(&mut self, r: Ref) -> Self::Value;
    /// Projects a reference; references are always ground.
    fn as_ref_val(&mut self, v: &Self::Value) -> Option<Ref>;
    /// Projects a ground `i32` as unsigned, e.g. an address or index.
    fn as_u32(&mut self, v: &Self::Value) -> Option<u32>;

    /// Integer unary operator.
    fn iunop(&mut self, size: NumSize, op: IUnOp, a: Self::Value) -> Self::Value;
    /// Integer binary operator; division assumes its guards held.
    fn ibinop(
        &mut self,
        size: NumSize,
        op: IBinOp,
        a: Self::Value,
        b: Self::Value,
    ) -> Result<Self::Value, Trap>;
    /// Integer zero test.
    fn ieqz(&mut self, size: NumSize, a: Self::Value) -> Self::Value;
    /// Integer comparison.
    fn irelop(&mut self, size: NumSize, op: IRelOp, a: Self::Value, b: Self::Value) -> Self::Value;
    /// Float unary operator.
    fn funop(&mut self, size: NumSize, op: FUnOp, a: Self::Value) -> Self::Value;
    /// Float binary operator.
    fn fbinop(&mut self, size: NumSize, op: FBinOp, a: Self::Value, b: Self::Value) -> Self::Value;
    /// Float comparison.
    fn frelop(&mut self, size: NumSize, op: FRelOp, a: Self::Value, b: Self::Value) -> Self::Value;
    /// Conversion; truncation assumes its guards held.
    fn cvtop(&mut self, op: CvtOp, a: Self::Value) -> Result<Self::Value, Trap>;
    /// `select`: not a branching point, both operands are already values.
    fn select(&mut self, cond: Self::Value, then: Self::Value, alt: Self::Value) -> Self::Value;

    /// Boolean negation of a condition value.
    fn not(&mut self, cond: &Self::Value) -> Self::Value;
    /// Predicate: the value equals zero at the given width.
    fn is_zero(&mut self, size: NumSize, v: &Self::Value) -> Self::Value;
    /// Predicate: signed division `a / b` (or remainder) overflows.
    fn div_overflows(&mut self, size: NumSize, a: &Self::Value, b: &Self::Value) -> Self::Value;
    /// Predicate: the truncation operand is a NaN.
    fn trunc_invalid(&mut self, op: CvtOp, v: &Self::Value) -> Self::Value;
    /// Predicate: the truncation operand falls outside the target range.
    fn trunc_overflows(&mut self, op: CvtOp, v: &Self::Value) -> Self::Value;

    /// Allocates zeroed memory contents of the given page count.
    fn mem_new(&mut self, pages: u32) -> Self::Mem;
    /// Grows memory contents to the given page count, zero filled.
    fn mem_grow(&mut self, mem: &mut Self::Mem, new_pages: u32);
    /// Loads a value; bounds were checked by the interpreter.
    fn load(&mut self, mem: &Self::Mem, addr: usize, kind: LoadKind) -> Result<Self::Value, Trap>;
    /// Stores a value; bounds were checked by the interpreter.
    fn store(
        &mut self,
        mem: &mut Self::Mem,
        addr: usize,
        kind: StoreKind,
        v: &Self::Value,
    ) -> Result<(), Trap>;
    /// Fills a byte span with the low byte of `byte`.
    fn mem_fill(
        &mut self,
        mem: &mut Self::Mem,
        dst: usize,
        len: usize,
        byte: &Self::Value,
    ) -> Result<(), Trap>;
    /// Copies a byte span within the memory; spans may overlap.
    fn mem_copy(&mut self, mem: &mut Self::Mem, dst: usize, src: usize, len: usize);
    /// Copies constant bytes into the memory.
    fn mem_init(&mut self, mem: &mut Self::Mem, dst: usize, bytes: &[u8]);

    /// The sole branching point: which outcomes of `cond` are feasible
    /// under the given path condition?
    fn eval_choice(&mut self, path: &[Self::Value], cond: &Self::Value) -> Branches;
}

/// The bit-exact concrete value algebra.
#[derive(Debug, Copy, Clone, Default)]
pub struct Concrete;

impl Algebra for Concrete {
    type Value = Val;
    type Mem = Vec<u8>;

    fn from_val(&mut self, val: Val) -> Val {
        val
    }

    fn to_val(&mut self, v: &Val, _ty: ValType) -> Option<Val> {
        Some(*v)
    }

    fn from_ref(&mut self, r: Ref) -> Val {
        match r {
            Ref::Null(weft_core::RefType::Func) => Val::FuncRef(None),
            Ref::Null(weft_core::RefType::Extern) => Val::ExternRef(None),
            Ref::Func(handle) => Val::FuncRef(Some(handle)),
            Ref::Extern(handle) => Val::ExternRef(Some(handle)),
        }
    }

    fn as_ref_val(&mut self, v: &Val) -> Option<Ref> {
        match v {
            Val::FuncRef(None) => Some(Ref::Null(weft_core::RefType::Func)),
            Val::FuncRef(Some(handle)) => Some(Ref::Func(*handle)),
            Val::ExternRef(None) => Some(Ref::Null(weft_core::RefType::Extern)),
            Val::ExternRef(Some(handle)) => Some(Ref::Extern(*handle)),
            _ => None,
        }
    }

    fn as_u32(&mut self, v: &Val) -> Option<u32> {
        match v {
            Val::I32(v) => Some(*v as u32),
            _ => None,
        }
    }

    fn iunop(&mut self, size: NumSize, op: IUnOp, a: Val) -> Val {
        match size {
            NumSize::S32 => {
                let a: i32 = a.try_into().expect("validated as i32");
                let r = match op {
                    IUnOp::Clz => Integer::leading_zeros(a),
                    IUnOp::Ctz => Integer::trailing_zeros(a),
                    IUnOp::Popcnt => Integer::count_ones(a),
                };
                Val::I32(r)
            }
            NumSize::S64 => {
                let a: i64 = a.try_into().expect("validated as i64");
                let r = match op {
                    IUnOp::Clz => Integer::leading_zeros(a),
                    IUnOp::Ctz => Integer::trailing_zeros(a),
                    IUnOp::Popcnt => Integer::count_ones(a),
                };
                Val::I64(r)
            }
        }
    }

    fn ibinop(&mut self, size: NumSize, op: IBinOp, a: Val, b: Val) -> Result<Val, Trap> {
        macro_rules! run {
            ($signed:ty, $unsigned:ty, $a:expr, $b:expr) => {{
                let a: $signed = $a;
                let b: $signed = $b;
                match op {
                    IBinOp::Add => ArithmeticOps::add(a, b),
                    IBinOp::Sub => ArithmeticOps::sub(a, b),
                    IBinOp::Mul => ArithmeticOps::mul(a, b),
                    IBinOp::Div(Sign::S) => ArithmeticOps::div(a, b)?,
                    IBinOp::Div(Sign::U) => {
                        ArithmeticOps::div(a as $unsigned, b as $unsigned)? as $signed
                    }
                    IBinOp::Rem(Sign::S) => Integer::rem(a, b)?,
                    IBinOp::Rem(Sign::U) => {
                        Integer::rem(a as $unsigned, b as $unsigned)? as $signed
                    }
                    IBinOp::And => a & b,
                    IBinOp::Or => a | b,
                    IBinOp::Xor => a ^ b,
                    IBinOp::Shl => a.wrapping_shl(b as u32),
                    IBinOp::Shr(Sign::S) => a.wrapping_shr(b as u32),
                    IBinOp::Shr(Sign::U) => {
                        (a as $unsigned).wrapping_shr(b as u32) as $signed
                    }
                    IBinOp::Rotl => Integer::rotl(a, b),
                    IBinOp::Rotr => Integer::rotr(a, b),
                }
            }};
        }
        Ok(match size {
            NumSize::S32 => {
                let a: i32 = a.try_into().expect("validated as i32");
                let b: i32 = b.try_into().expect("validated as i32");
                Val::I32(run!(i32, u32, a, b))
            }
            NumSize::S64 => {
                let a: i64 = a.try_into().expect("validated as i64");
                let b: i64 = b.try_into().expect("validated as i64");
                Val::I64(run!(i64, u64, a, b))
            }
        })
    }

    fn ieqz(&mut self, size: NumSize, a: Val) -> Val {
        let zero = match (size, a) {
            (NumSize::S32, Val::I32(v)) => v == 0,
            (NumSize::S64, Val::I64(v)) => v == 0,
            _ => unreachable!("validated operand type"),
        };
        Val::from(zero)
    }

    fn irelop(&mut self, size: NumSize, op: IRelOp, a: Val, b: Val) -> Val {
        fn cmp<S: Ord, U: Ord>(op: IRelOp, s: (S, S), u: (U, U)) -> bool {
            match op {
                IRelOp::Eq => s.0 == s.1,
                IRelOp::Ne => s.0 != s.1,
                IRelOp::Lt(Sign::S) => s.0 < s.1,
                IRelOp::Lt(Sign::U) => u.0 < u.1,
                IRelOp::Gt(Sign::S) => s.0 > s.1,
                IRelOp::Gt(Sign::U) => u.0 > u.1,
                IRelOp::Le(Sign::S) => s.0 <= s.1,
                IRelOp::Le(Sign::U) => u.0 <= u.1,
                IRelOp::Ge(Sign::S) => s.0 >= s.1,
                IRelOp::Ge(Sign::U) => u.0 >= u.1,
            }
        }
        let result = match size {
            NumSize::S32 => {
                let a: i32 = a.try_into().expect("validated as i32");
                let b: i32 = b.try_into().expect("validated as i32");
                cmp(op, (a, b), (a as u32, b as u32))
            }
            NumSize::S64 => {
                let a: i64 = a.try_into().expect("validated as i64");
                let b: i64 = b.try_into().expect("validated as i64");
                cmp(op, (a, b), (a as u64, b as u64))
            }
        };
        Val::from(result)
    }

    fn funop(&mut self, size: NumSize, op: FUnOp, a: Val) -> Val {
        fn run<T: Float<T> + core::ops::Neg<Output = T>>(op: FUnOp, a: T) -> (T, bool) {
            match op {
                // Sign manipulations preserve NaN payloads.
                FUnOp::Abs => (a.abs(), false),
                FUnOp::Neg => (-a, false),
                FUnOp::Ceil => (a.ceil(), true),
                FUnOp::Floor => (a.floor(), true),
                FUnOp::Trunc => (a.trunc(), true),
                FUnOp::Nearest => (a.nearest(), true),
                FUnOp::Sqrt => (a.sqrt(), true),
            }
        }
        match size {
            NumSize::S32 => {
                let a: F32 = a.try_into().expect("validated as f32");
                let (r, canon) = run(op, a);
                Val::F32(if canon { r.canonicalize() } else { r })
            }
            NumSize::S64 => {
                let a: F64 = a.try_into().expect("validated as f64");
                let (r, canon) = run(op, a);
                Val::F64(if canon { r.canonicalize() } else { r })
            }
        }
    }

    fn fbinop(&mut self, size: NumSize, op: FBinOp, a: Val, b: Val) -> Val {
        fn run<T: Float<T>>(op: FBinOp, a: T, b: T) -> (T, bool) {
            match op {
                FBinOp::Add => (a.add(b), true),
                FBinOp::Sub => (a.sub(b), true),
                FBinOp::Mul => (a.mul(b), true),
                FBinOp::Div => (a.div(b).expect("float division is total"), true),
                FBinOp::Min => (a.min(b), true),
                FBinOp::Max => (a.max(b), true),
                FBinOp::Copysign => (a.copysign(b), false),
            }
        }
        match size {
            NumSize::S32 => {
                let a: F32 = a.try_into().expect("validated as f32");
                let b: F32 = b.try_into().expect("validated as f32");
                let (r, canon) = run(op, a, b);
                Val::F32(if canon { r.canonicalize() } else { r })
            }
            NumSize::S64 => {
                let a: F64 = a.try_into().expect("validated as f64");
                let b: F64 = b.try_into().expect("validated as f64");
                let (r, canon) = run(op, a, b);
                Val::F64(if canon { r.canonicalize() } else { r })
            }
        }
    }

    fn frelop(&mut self, size: NumSize, op: FRelOp, a: Val, b: Val) -> Val {
        fn cmp<T: PartialOrd + PartialEq>(op: FRelOp, a: T, b: T) -> bool {
            match op {
                FRelOp::Eq => a == b,
                FRelOp::Ne => a != b,
                FRelOp::Lt => a < b,
                FRelOp::Gt => a > b,
                FRelOp::Le => a <= b,
                FRelOp::Ge => a >= b,
            }
        }
        let result = match size {
            NumSize::S32 => {
                let a: F32 = a.try_into().expect("validated as f32");
                let b: F32 = b.try_into().expect("validated as f32");
                cmp(op, a.to_float(), b.to_float())
            }
            NumSize::S64 => {
                let a: F64 = a.try_into().expect("validated as f64");
                let b: F64 = b.try_into().expect("validated as f64");
                cmp(op, a.to_float(), b.to_float())
            }
        };
        Val::from(result)
    }

    fn cvtop(&mut self, op: CvtOp, a: Val) -> Result<Val, Trap> {
        Ok(match op {
            CvtOp::I32WrapI64 => {
                let v: i64 = a.try_into().expect("validated as i64");
                Val::I32(v as i32)
            }
            CvtOp::I64ExtendI32(Sign::S) => {
                let v: i32 = a.try_into().expect("validated as i32");
                Val::I64(i64::from(v))
            }
            CvtOp::I64ExtendI32(Sign::U) => {
                let v: i32 = a.try_into().expect("validated as i32");
                Val::I64(i64::from(v as u32))
            }
            CvtOp::ITrunc(to, from, sign) => concrete_trunc(to, from, sign, a)?,
            CvtOp::ITruncSat(to, from, sign) => concrete_trunc_sat(to, from, sign, a),
            CvtOp::FConvertI(to, from, sign) => concrete_convert(to, from, sign, a),
            CvtOp::F32DemoteF64 => {
                let v: F64 = a.try_into().expect("validated as f64");
                Val::F32(F32::from(v.to_float() as f32).canonicalize())
            }
            CvtOp::F64PromoteF32 => {
                let v: F32 = a.try_into().expect("validated as f32");
                Val::F64(F64::from(f64::from(v.to_float())).canonicalize())
            }
            CvtOp::IReinterpretF(NumSize::S32) => {
                let v: F32 = a.try_into().expect("validated as f32");
                Val::I32(v.to_bits() as i32)
            }
            CvtOp::IReinterpretF(NumSize::S64) => {
                let v: F64 = a.try_into().expect("validated as f64");
                Val::I64(v.to_bits() as i64)
            }
            CvtOp::FReinterpretI(NumSize::S32) => {
                let v: i32 = a.try_into().expect("validated as i32");
                Val::F32(F32::from_bits(v as u32))
            }
            CvtOp::FReinterpretI(NumSize::S64) => {
                let v: i64 = a.try_into().expect("validated as i64");
                Val::F64(F64::from_bits(v as u64))
            }
            CvtOp::IExtend(NumSize::S32, pack) => {
                let v: i32 = a.try_into().expect("validated as i32");
                Val::I32(match pack {
                    PackSize::P8 => i32::from(v as i8),
                    PackSize::P16 => i32::from(v as i16),
                    PackSize::P32 => v,
                })
            }
            CvtOp::IExtend(NumSize::S64, pack) => {
                let v: i64 = a.try_into().expect("validated as i64");
                Val::I64(match pack {
                    PackSize::P8 => i64::from(v as i8),
                    PackSize::P16 => i64::from(v as i16),
                    PackSize::P32 => i64::from(v as i32),
                })
            }
        })
    }

    fn select(&mut self, cond: Val, then: Val, alt: Val) -> Val {
        let taken: bool = cond.try_into().expect("validated as i32");
        if taken {
            then
        } else {
            alt
        }
    }

    fn not(&mut self, cond: &Val) -> Val {
        let taken: bool = (*cond).try_into().expect("conditions are i32");
        Val::from(!taken)
    }

    fn is_zero(&mut self, size: NumSize, v: &Val) -> Val {
        self.ieqz(size, *v)
    }

    fn div_overflows(&mut self, size: NumSize, a: &Val, b: &Val) -> Val {
        let result = match (size, a, b) {
            (NumSize::S32, Val::I32(a), Val::I32(b)) => *a == i32::MIN && *b == -1,
            (NumSize::S64, Val::I64(a), Val::I64(b)) => *a == i64::MIN && *b == -1,
            _ => unreachable!("validated operand type"),
        };
        Val::from(result)
    }

    fn trunc_invalid(&mut self, op: CvtOp, v: &Val) -> Val {
        let CvtOp::ITrunc(_, from, _) = op else {
            return Val::from(false);
        };
        let nan = match (from, v) {
            (NumSize::S32, Val::F32(v)) => v.is_nan(),
            (NumSize::S64, Val::F64(v)) => v.is_nan(),
            _ => unreachable!("validated operand type"),
        };
        Val::from(nan)
    }

    fn trunc_overflows(&mut self, op: CvtOp, v: &Val) -> Val {
        let CvtOp::ITrunc(to, from, sign) = op else {
            return Val::from(false);
        };
        let overflows = matches!(
            concrete_trunc(to, from, sign, *v),
            Err(ref trap) if trap.code() == Some(TrapCode::IntegerOverflow)
        );
        Val::from(overflows)
    }

    fn mem_new(&mut self, pages: u32) -> Vec<u8> {
        vec![0; pages as usize * PAGE_SIZE]
    }

    fn mem_grow(&mut self, mem: &mut Vec<u8>, new_pages: u32) {
        mem.resize(new_pages as usize * PAGE_SIZE, 0);
    }

    fn load(&mut self, mem: &Vec<u8>, addr: usize, kind: LoadKind) -> Result<Val, Trap> {
        fn read<T: LittleEndianConvert>(mem: &[u8], addr: usize) -> T {
            let mut bytes = T::Bytes::default();
            let width = bytes.as_ref().len();
            bytes
                .as_mut()
                .copy_from_slice(&mem[addr..addr + width]);
            T::from_le_bytes(bytes)
        }
        Ok(match kind {
            LoadKind::I(NumSize::S32) => Val::I32(read::<i32>(mem, addr)),
            LoadKind::I(NumSize::S64) => Val::I64(read::<i64>(mem, addr)),
            LoadKind::F(NumSize::S32) => Val::F32(read::<F32>(mem, addr)),
            LoadKind::F(NumSize::S64) => Val::F64(read::<F64>(mem, addr)),
            LoadKind::IPacked(NumSize::S32, PackSize::P8, Sign::S) => {
                Val::I32(i32::from(read::<i8>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S32, PackSize::P8, Sign::U) => {
                Val::I32(i32::from(read::<u8>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S32, PackSize::P16, Sign::S) => {
                Val::I32(i32::from(read::<i16>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S32, PackSize::P16, Sign::U) => {
                Val::I32(i32::from(read::<u16>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S64, PackSize::P8, Sign::S) => {
                Val::I64(i64::from(read::<i8>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S64, PackSize::P8, Sign::U) => {
                Val::I64(i64::from(read::<u8>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S64, PackSize::P16, Sign::S) => {
                Val::I64(i64::from(read::<i16>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S64, PackSize::P16, Sign::U) => {
                Val::I64(i64::from(read::<u16>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S64, PackSize::P32, Sign::S) => {
                Val::I64(i64::from(read::<i32>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S64, PackSize::P32, Sign::U) => {
                Val::I64(i64::from(read::<u32>(mem, addr)))
            }
            LoadKind::IPacked(NumSize::S32, PackSize::P32, _) => {
                unreachable!("rejected by validation")
            }
        })
    }

    fn store(
        &mut self,
        mem: &mut Vec<u8>,
        addr: usize,
        kind: StoreKind,
        v: &Val,
    ) -> Result<(), Trap> {
        fn write<T: LittleEndianConvert>(mem: &mut [u8], addr: usize, v: T) {
            let bytes = v.to_le_bytes();
            let width = bytes.as_ref().len();
            mem[addr..addr + width].copy_from_slice(bytes.as_ref());
        }
        match kind {
            StoreKind::I(NumSize::S32) => {
                write(mem, addr, Val::try_into::<i32>(*v).expect("validated as i32"))
            }
            StoreKind::I(NumSize::S64) => {
                write(mem, addr, Val::try_into::<i64>(*v).expect("validated as i64"))
            }
            StoreKind::F(NumSize::S32) => {
                write(mem, addr, Val::try_into::<F32>(*v).expect("validated as f32"))
            }
            StoreKind::F(NumSize::S64) => {
                write(mem, addr, Val::try_into::<F64>(*v).expect("validated as f64"))
            }
            StoreKind::IPacked(NumSize::S32, PackSize::P8) => {
                let v: i32 = Val::try_into::<i32>(*v).expect("validated as i32");
                write(mem, addr, v as u8)
            }
            StoreKind::IPacked(NumSize::S32, PackSize::P16) => {
                let v: i32 = Val::try_into::<i32>(*v).expect("validated as i32");
                write(mem, addr, v as u16)
            }
            StoreKind::IPacked(NumSize::S64, PackSize::P8) => {
                let v: i64 = Val::try_into::<i64>(*v).expect("validated as i64");
                write(mem, addr, v as u8)
            }
            StoreKind::IPacked(NumSize::S64, PackSize::P16) => {
                let v: i64 = Val::try_into::<i64>(*v).expect("validated as i64");
                write(mem, addr, v as u16)
            }
            StoreKind::IPacked(NumSize::S64, PackSize::P32) => {
                let v: i64 = Val::try_into::<i64>(*v).expect("validated as i64");
                write(mem, addr, v as u32)
            }
            StoreKind::IPacked(NumSize::S32, PackSize::P32) => {
                unreachable!("rejected by validation")
            }
        }
        Ok(())
    }

    fn mem_fill(
        &mut self,
        mem: &mut Vec<u8>,
        dst: usize,
        len: usize,
        byte: &Val,
    ) -> Result<(), Trap> {
        let byte = self.as_u32(byte).expect("validated as i32") as u8;
        mem[dst..dst + len].fill(byte);
        Ok(())
    }

    fn mem_copy(&mut self, mem: &mut Vec<u8>, dst: usize, src: usize, len: usize) {
        mem.copy_within(src..src + len, dst);
    }

    fn mem_init(&mut self, mem: &mut Vec<u8>, dst: usize, bytes: &[u8]) {
        mem[dst..dst + bytes.len()].copy_from_slice(bytes);
    }

    fn eval_choice(&mut self, _path: &[Val], cond: &Val) -> Branches {
        let taken: bool = (*cond).try_into().expect("conditions are i32");
        Branches::Taken(taken)
    }
}

fn concrete_trunc(to: NumSize, from: NumSize, sign: Sign, a: Val) -> Result<Val, Trap> {
    let val = match (from, to, sign) {
        (NumSize::S32, NumSize::S32, Sign::S) => {
            let v: F32 = a.try_into().expect("validated as f32");
            Val::I32(v.try_truncate_into()?)
        }
        (NumSize::S32, NumSize::S32, Sign::U) => {
            let v: F32 = a.try_into().expect("validated as f32");
            let r: u32 = v.try_truncate_into()?;
            Val::I32(r as i32)
        }
        (NumSize::S64, NumSize::S32, Sign::S) => {
            let v: F64 = a.try_into().expect("validated as f64");
            Val::I32(v.try_truncate_into()?)
        }
        (NumSize::S64, NumSize::S32, Sign::U) => {
            let v: F64 = a.try_into().expect("validated as f64");
            let r: u32 = v.try_truncate_into()?;
            Val::I32(r as i32)
        }
        (NumSize::S32, NumSize::S64, Sign::S) => {
            let v: F32 = a.try_into().expect("validated as f32");
            Val::I64(v.try_truncate_into()?)
        }
        (NumSize::S32, NumSize::S64, Sign::U) => {
            let v: F32 = a.try_into().expect("validated as f32");
            let r: u64 = v.try_truncate_into()?;
            Val::I64(r as i64)
        }
        (NumSize::S64, NumSize::S64, Sign::S) => {
            let v: F64 = a.try_into().expect("validated as f64");
            Val::I64(v.try_truncate_into()?)
        }
        (NumSize::S64, NumSize::S64, Sign::U) => {
            let v: F64 = a.try_into().expect("validated as f64");
            let r: u64 = v.try_truncate_into()?;
            Val::I64(r as i64)
        }
    };
    Ok(val)
}

fn concrete_trunc_sat(to: NumSize, from: NumSize, sign: Sign, a: Val) -> Val {
    match (from, to, sign) {
        (NumSize::S32, NumSize::S32, Sign::S) => {
            let v: F32 = a.try_into().expect("validated as f32");
            Val::I32(v.trunc_sat_into())
        }
        (NumSize::S32, NumSize::S32, Sign::U) => {
            let v: F32 = a.try_into().expect("validated as f32");
            let r: u32 = v.trunc_sat_into();
            Val::I32(r as i32)
        }
        (NumSize::S64, NumSize::S32, Sign::S) => {
            let v: F64 = a.try_into().expect("validated as f64");
            Val::I32(v.trunc_sat_into())
        }
        (NumSize::S64, NumSize::S32, Sign::U) => {
            let v: F64 = a.try_into().expect("validated as f64");
            let r: u32 = v.trunc_sat_into();
            Val::I32(r as i32)
        }
        (NumSize::S32, NumSize::S64, Sign::S) => {
            let v: F32 = a.try_into().expect("validated as f32");
            Val::I64(v.trunc_sat_into())
        }
        (NumSize::S32, NumSize::S64, Sign::U) => {
            let v: F32 = a.try_into().expect("validated as f32");
            let r: u64 = v.trunc_sat_into();
            Val::I64(r as i64)
        }
        (NumSize::S64, NumSize::S64, Sign::S) => {
            let v: F64 = a.try_into().expect("validated as f64");
            Val::I64(v.trunc_sat_into())
        }
        (NumSize::S64, NumSize::S64, Sign::U) => {
            let v: F64 = a.try_into().expect("validated as f64");
            let r: u64 = v.trunc_sat_into();
            Val::I64(r as i64)
        }
    }
}

fn concrete_convert(to: NumSize, from: NumSize, sign: Sign, a: Val) -> Val {
    match (from, sign) {
        (NumSize::S32, Sign::S) => {
            let v: i32 = a.try_into().expect("validated as i32");
            match to {
                NumSize::S32 => Val::F32(F32::from(v as f32)),
                NumSize::S64 => Val::F64(F64::from(f64::from(v))),
            }
        }
        (NumSize::S32, Sign::U) => {
            let v: u32 = a.try_into().expect("validated as i32");
            match to {
                NumSize::S32 => Val::F32(F32::from(v as f32)),
                NumSize::S64 => Val::F64(F64::from(f64::from(v))),
            }
        }
        (NumSize::S64, Sign::S) => {
            let v: i64 = a.try_into().expect("validated as i64");
            match to {
                NumSize::S32 => Val::F32(F32::from(v as f32)),
                NumSize::S64 => Val::F64(F64::from(v as f64)),
            }
        }
        (NumSize::S64, Sign::U) => {
            let v: u64 = a.try_into().expect("validated as i64");
            match to {
                NumSize::S32 => Val::F32(F32::from(v as f32)),
                NumSize::S64 => Val::F64(F64::from(v as f64)),
            }
        }
    }
}

/// One call frame: the owning instance, the locals, and the label stack.
#[derive(Debug, Clone)]
pub struct Frame<A: Algebra> {
    pub(crate) instance: u32,
    pub(crate) locals: Vec<A::Value>,
    pub(crate) blocks: Vec<BlockCtx>,
    pub(crate) base: usize,
    pub(crate) arity: usize,
}

/// One entry of a frame's label stack: a block body and a position in it.
#[derive(Debug, Clone)]
pub(crate) struct BlockCtx {
    code: Code,
    ip: usize,
    is_loop: bool,
    param_arity: usize,
    result_arity: usize,
    height: usize,
}

/// One execution path: machine state plus its own store and path
/// condition. Cloning a thread is how symbolic execution forks.
#[derive(Debug, Clone)]
pub struct Thread<A: Algebra> {
    /// The owned store; memories inside it are copy-on-write.
    pub store: Store<A>,
    /// The value stack.
    pub stack: Vec<A::Value>,
    /// The frame stack.
    pub(crate) frames: Vec<Frame<A>>,
    /// The boolean terms this path has assumed.
    pub path: Vec<A::Value>,
}

impl<A: Algebra> Thread<A> {
    /// Creates an idle thread owning `store`.
    pub fn new(store: Store<A>) -> Self {
        Self {
            store,
            stack: Vec::new(),
            frames: Vec::new(),
            path: Vec::new(),
        }
    }
}

/// Threads and finished paths produced at choice points.
pub struct Forks<A: Algebra> {
    /// Runnable sibling threads, most recent last.
    pub live: Vec<Thread<A>>,
    /// Paths that terminated in a trap at the choice point itself.
    pub trapped: Vec<(Vec<A::Value>, Trap)>,
}

impl<A: Algebra> Default for Forks<A> {
    fn default() -> Self {
        Self {
            live: Vec::new(),
            trapped: Vec::new(),
        }
    }
}

/// Runs `thread` to completion, pushing forked siblings into `forks`.
///
/// On success the returned values are the result stack of the outermost
/// call. A trap terminates only this thread.
pub fn run<A: Algebra>(thread: &mut Thread<A>, forks: &mut Forks<A>) -> Result<Vec<A::Value>, Trap> {
    loop {
        let Some(frame) = thread.frames.last_mut() else {
            return Ok(std::mem::take(&mut thread.stack));
        };
        if frame.blocks.is_empty() {
            // The function fell off its last block: the frame is done and
            // its results already sit on the stack.
            thread.frames.pop();
            continue;
        }
        let block = frame
            .blocks
            .last_mut()
            .expect("checked non-empty just above");
        if block.ip >= block.code.len() {
            frame.blocks.pop();
            continue;
        }
        let op = block.code[block.ip].clone();
        block.ip += 1;
        step(thread, forks, &op)?;
    }
}

fn push_frame<A: Algebra>(
    thread: &mut Thread<A>,
    instance: u32,
    locals: Vec<A::Value>,
    body: Code,
    arity: usize,
) -> Result<(), Trap> {
    if thread.frames.len() >= CALL_STACK_LIMIT {
        return Err(TrapCode::StackOverflow.into());
    }
    let base = thread.stack.len();
    thread.frames.push(Frame {
        instance,
        locals,
        blocks: vec![BlockCtx {
            code: body,
            ip: 0,
            is_loop: false,
            param_arity: 0,
            result_arity: arity,
            height: base,
        }],
        base,
        arity,
    });
    Ok(())
}

/// Calls the function at store handle `handle` with its arguments on the
/// stack.
pub fn call<A: Algebra>(thread: &mut Thread<A>, handle: u32) -> Result<(), Trap> {
    let func = thread.store.funcs[handle as usize].clone();
    match func {
        FuncInst::Wasm { ty, instance, code } => {
            let params = ty.params().len();
            let args_from = thread.stack.len() - params;
            let mut locals: Vec<A::Value> = thread.stack.drain(args_from..).collect();
            for ty in code.locals.iter() {
                let zero = thread.store.alg.from_val(Val::default(*ty));
                locals.push(zero);
            }
            push_frame(thread, instance, locals, code.body.clone(), ty.results().len())
        }
        FuncInst::Host { ty, func } => {
            let params = ty.params().len();
            let args_from = thread.stack.len() - params;
            let args: Vec<A::Value> = thread.stack.drain(args_from..).collect();
            let mut ctx = HostCtx {
                path: &mut thread.path,
            };
            if let Some(result) = func(&mut thread.store.alg, &mut ctx, &args)? {
                thread.stack.push(result);
            }
            Ok(())
        }
    }
}

fn enter_block<A: Algebra>(thread: &mut Thread<A>, ty: &FuncType, code: Code, is_loop: bool) {
    let params = ty.params().len();
    let height = thread.stack.len() - params;
    let frame = thread
        .frames
        .last_mut()
        .expect("blocks are only entered inside a frame");
    frame.blocks.push(BlockCtx {
        code,
        ip: 0,
        is_loop,
        param_arity: params,
        result_arity: ty.results().len(),
        height,
    });
}

fn branch<A: Algebra>(thread: &mut Thread<A>, depth: u32) {
    let frame = thread
        .frames
        .last_mut()
        .expect("branches only occur inside a frame");
    let index = frame.blocks.len() - 1 - depth as usize;
    let target = &frame.blocks[index];
    let arity = if target.is_loop {
        target.param_arity
    } else {
        target.result_arity
    };
    let height = target.height;
    let is_loop = target.is_loop;
    let kept: Vec<A::Value> = thread.stack.drain(thread.stack.len() - arity..).collect();
    thread.stack.truncate(height);
    thread.stack.extend(kept);
    if is_loop {
        frame.blocks.truncate(index + 1);
        frame.blocks[index].ip = 0;
    } else {
        frame.blocks.truncate(index);
    }
}

fn do_return<A: Algebra>(thread: &mut Thread<A>) {
    let frame = thread
        .frames
        .last()
        .expect("return only occurs inside a frame");
    let arity = frame.arity;
    let base = frame.base;
    let kept: Vec<A::Value> = thread.stack.drain(thread.stack.len() - arity..).collect();
    thread.stack.truncate(base);
    thread.stack.extend(kept);
    thread.frames.pop();
}

/// Routes a trap predicate through `eval_choice`: a satisfiable trapping
/// side becomes a finished path, and the current thread assumes the
/// negation.
fn guard<A: Algebra>(
    thread: &mut Thread<A>,
    forks: &mut Forks<A>,
    cond: A::Value,
    code: TrapCode,
) -> Result<(), Trap> {
    match thread.store.alg.eval_choice(&thread.path, &cond) {
        Branches::Taken(true) => Err(code.into()),
        Branches::Taken(false) => Ok(()),
        Branches::Either => {
            let mut trap_path = thread.path.clone();
            trap_path.push(cond.clone());
            forks.trapped.push((trap_path, code.into()));
            let negated = thread.store.alg.not(&cond);
            thread.path.push(negated);
            Ok(())
        }
    }
}

/// Evaluates a two-way condition whose false side simply falls through;
/// when both sides are feasible the fall-through side continues as a
/// forked thread.
fn condition<A: Algebra>(thread: &mut Thread<A>, forks: &mut Forks<A>, cond: A::Value) -> bool {
    match thread.store.alg.eval_choice(&thread.path, &cond) {
        Branches::Taken(taken) => taken,
        Branches::Either => {
            let negated = thread.store.alg.not(&cond);
            let mut other = thread.clone();
            other.path.push(negated);
            forks.live.push(other);
            thread.path.push(cond);
            true
        }
    }
}

fn pop<A: Algebra>(thread: &mut Thread<A>) -> A::Value {
    thread
        .stack
        .pop()
        .expect("the type checker guarantees stack depth")
}

fn instance_of<A: Algebra>(thread: &Thread<A>) -> &Instance {
    let frame = thread
        .frames
        .last()
        .expect("instructions only execute inside a frame");
    &thread.store.instances[frame.instance as usize]
}

fn memory_handle<A: Algebra>(thread: &Thread<A>) -> u32 {
    instance_of(thread).memories[0]
}

fn ground_u32<A: Algebra>(thread: &mut Thread<A>, v: &A::Value) -> Result<u32, Trap> {
    thread
        .store
        .alg
        .as_u32(v)
        .ok_or_else(|| Trap::new("unsupported symbolic pointer"))
}

/// The effective address of a memory access: a 33-bit quantity.
fn effective_addr<A: Algebra>(
    thread: &mut Thread<A>,
    base: &A::Value,
    arg: &MemArg,
) -> Result<u64, Trap> {
    let base = ground_u32(thread, base)?;
    Ok(u64::from(base) + u64::from(arg.offset))
}

fn checked_mem_access<A: Algebra>(
    thread: &mut Thread<A>,
    addr: u64,
    width: u64,
) -> Result<(u32, usize), Trap> {
    let handle = memory_handle(thread);
    let mem = &thread.store.memories[handle as usize];
    if !mem.in_bounds(addr, width) {
        return Err(TrapCode::OutOfBoundsMemoryAccess.into());
    }
    Ok((handle, addr as usize))
}

/// A bulk-memory span: ground base and length, bounds-checked against
/// `limit` before any byte moves.
fn checked_span<A: Algebra>(
    thread: &mut Thread<A>,
    base: &A::Value,
    len: &A::Value,
    limit: usize,
    code: TrapCode,
) -> Result<(usize, usize), Trap> {
    let base = ground_u32(thread, base)? as usize;
    let len = ground_u32(thread, len)? as usize;
    if base.checked_add(len).map_or(true, |end| end > limit) {
        return Err(code.into());
    }
    Ok((base, len))
}

fn step<A: Algebra>(thread: &mut Thread<A>, forks: &mut Forks<A>, op: &Op) -> Result<(), Trap> {
    match op {
        Op::Nop => {}
        Op::Unreachable => return Err(TrapCode::Unreachable.into()),
        Op::Block(ty, body) => enter_block(thread, ty, body.clone(), false),
        Op::Loop(ty, body) => enter_block(thread, ty, body.clone(), true),
        Op::If(ty, then, alt) => {
            let cond = pop(thread);
            match thread.store.alg.eval_choice(&thread.path, &cond) {
                Branches::Taken(true) => enter_block(thread, ty, then.clone(), false),
                Branches::Taken(false) => enter_block(thread, ty, alt.clone(), false),
                Branches::Either => {
                    let negated = thread.store.alg.not(&cond);
                    let mut other = thread.clone();
                    other.path.push(negated);
                    enter_block(&mut other, ty, alt.clone(), false);
                    forks.live.push(other);
                    thread.path.push(cond);
                    enter_block(thread, ty, then.clone(), false);
                }
            }
        }
        Op::Br(depth) => branch(thread, *depth),
        Op::BrIf(depth) => {
            let cond = pop(thread);
            if condition(thread, forks, cond) {
                branch(thread, *depth);
            }
        }
        Op::BrTable(labels, default) => {
            let index = pop(thread);
            br_table(thread, forks, labels, *default, index)?;
        }
        Op::Return => do_return(thread),
        Op::Call(index) => {
            let handle = instance_of(thread).funcs[*index as usize];
            call(thread, handle)?;
        }
        Op::CallIndirect(table, expected) => {
            let index = pop(thread);
            let index = ground_u32(thread, &index)?;
            let table_handle = instance_of(thread).tables[*table as usize];
            let table = &thread.store.tables[table_handle as usize];
            let entry = *table
                .elems
                .get(index as usize)
                .ok_or(TrapCode::UndefinedElement)?;
            let handle = match entry {
                Ref::Null(_) => return Err(TrapCode::UninitializedElement.into()),
                Ref::Func(handle) => handle,
                Ref::Extern(_) => return Err(TrapCode::IndirectCallTypeMismatch.into()),
            };
            if thread.store.funcs[handle as usize].ty() != expected {
                return Err(TrapCode::IndirectCallTypeMismatch.into());
            }
            call(thread, handle)?;
        }
        Op::Drop => {
            pop(thread);
        }
        Op::Select(_) => {
            let cond = pop(thread);
            let alt = pop(thread);
            let then = pop(thread);
            let picked = thread.store.alg.select(cond, then, alt);
            thread.stack.push(picked);
        }
        Op::LocalGet(index) => {
            let frame = thread.frames.last().expect("inside a frame");
            let value = frame.locals[*index as usize].clone();
            thread.stack.push(value);
        }
        Op::LocalSet(index) => {
            let value = pop(thread);
            thread.frames.last_mut().expect("inside a frame").locals[*index as usize] = value;
        }
        Op::LocalTee(index) => {
            let value = thread
                .stack
                .last()
                .expect("the type checker guarantees stack depth")
                .clone();
            thread.frames.last_mut().expect("inside a frame").locals[*index as usize] = value;
        }
        Op::GlobalGet(index) => {
            let handle = instance_of(thread).globals[*index as usize];
            let value = thread.store.globals[handle as usize].value.clone();
            thread.stack.push(value);
        }
        Op::GlobalSet(index) => {
            let value = pop(thread);
            let handle = instance_of(thread).globals[*index as usize];
            thread.store.globals[handle as usize].value = value;
        }
        Op::TableGet(index) => {
            let at = pop(thread);
            let at = ground_u32(thread, &at)?;
            let handle = instance_of(thread).tables[*index as usize];
            let entry = *thread.store.tables[handle as usize]
                .elems
                .get(at as usize)
                .ok_or(TrapCode::OutOfBoundsTableAccess)?;
            let value = thread.store.alg.from_ref(entry);
            thread.stack.push(value);
        }
        Op::TableSet(index) => {
            let value = pop(thread);
            let at = pop(thread);
            let at = ground_u32(thread, &at)?;
            let entry = thread
                .store
                .alg
                .as_ref_val(&value)
                .ok_or_else(|| Trap::new("unsupported symbolic reference"))?;
            let handle = instance_of(thread).tables[*index as usize];
            let slot = thread.store.tables[handle as usize]
                .elems
                .get_mut(at as usize)
                .ok_or(TrapCode::OutOfBoundsTableAccess)?;
            *slot = entry;
        }
        Op::TableSize(index) => {
            let handle = instance_of(thread).tables[*index as usize];
            let size = thread.store.tables[handle as usize].size();
            let value = thread.store.alg.from_val(Val::I32(size as i32));
            thread.stack.push(value);
        }
        Op::TableGrow(index) => {
            let delta = pop(thread);
            let init = pop(thread);
            let delta = ground_u32(thread, &delta)?;
            let init = thread
                .store
                .alg
                .as_ref_val(&init)
                .ok_or_else(|| Trap::new("unsupported symbolic reference"))?;
            let handle = instance_of(thread).tables[*index as usize];
            let result = thread.store.tables[handle as usize]
                .grow(delta, init)
                .map_or(-1i32, |old| old as i32);
            let value = thread.store.alg.from_val(Val::I32(result));
            thread.stack.push(value);
        }
        Op::TableFill(index) => {
            let len = pop(thread);
            let value = pop(thread);
            let at = pop(thread);
            let entry = thread
                .store
                .alg
                .as_ref_val(&value)
                .ok_or_else(|| Trap::new("unsupported symbolic reference"))?;
            let handle = instance_of(thread).tables[*index as usize];
            let size = thread.store.tables[handle as usize].elems.len();
            let (at, len) =
                checked_span(thread, &at, &len, size, TrapCode::OutOfBoundsTableAccess)?;
            thread.store.tables[handle as usize].elems[at..at + len].fill(entry);
        }
        Op::TableCopy { dst, src } => {
            let len = pop(thread);
            let src_at = pop(thread);
            let dst_at = pop(thread);
            let dst_handle = instance_of(thread).tables[*dst as usize];
            let src_handle = instance_of(thread).tables[*src as usize];
            let src_size = thread.store.tables[src_handle as usize].elems.len();
            let dst_size = thread.store.tables[dst_handle as usize].elems.len();
            let (src_at, len) =
                checked_span(thread, &src_at, &len, src_size, TrapCode::OutOfBoundsTableAccess)?;
            let dst_at = ground_u32(thread, &dst_at)? as usize;
            if dst_at.checked_add(len).map_or(true, |end| end > dst_size) {
                return Err(TrapCode::OutOfBoundsTableAccess.into());
            }
            let span: Vec<Ref> =
                thread.store.tables[src_handle as usize].elems[src_at..src_at + len].to_vec();
            thread.store.tables[dst_handle as usize].elems[dst_at..dst_at + len]
                .copy_from_slice(&span);
        }
        Op::TableInit { table, elem } => {
            let len = pop(thread);
            let src = pop(thread);
            let dst = pop(thread);
            let table_handle = instance_of(thread).tables[*table as usize];
            let refs = instance_of(thread).elems[*elem as usize].refs.clone();
            let (src, len) =
                checked_span(thread, &src, &len, refs.len(), TrapCode::OutOfBoundsTableAccess)?;
            let dst = ground_u32(thread, &dst)? as usize;
            let table_size = thread.store.tables[table_handle as usize].elems.len();
            if dst.checked_add(len).map_or(true, |end| end > table_size) {
                return Err(TrapCode::OutOfBoundsTableAccess.into());
            }
            thread.store.tables[table_handle as usize].elems[dst..dst + len]
                .copy_from_slice(&refs[src..src + len]);
        }
        Op::ElemDrop(index) => {
            let frame = thread.frames.last().expect("inside a frame");
            let instance = frame.instance as usize;
            thread.store.instances[instance].elems[*index as usize]
                .refs
                .clear();
        }
        Op::ILoad(size, arg) => {
            let base = pop(thread);
            let kind = LoadKind::I(*size);
            let addr = effective_addr(thread, &base, arg)?;
            let (handle, addr) = checked_mem_access(thread, addr, kind.width())?;
            let Store { alg, memories, .. } = &mut thread.store;
            let value = alg.load(&memories[handle as usize].data, addr, kind)?;
            thread.stack.push(value);
        }
        Op::FLoad(size, arg) => {
            let base = pop(thread);
            let kind = LoadKind::F(*size);
            let addr = effective_addr(thread, &base, arg)?;
            let (handle, addr) = checked_mem_access(thread, addr, kind.width())?;
            let Store { alg, memories, .. } = &mut thread.store;
            let value = alg.load(&memories[handle as usize].data, addr, kind)?;
            thread.stack.push(value);
        }
        Op::ILoadPacked(size, pack, sign, arg) => {
            let base = pop(thread);
            let kind = LoadKind::IPacked(*size, *pack, *sign);
            let addr = effective_addr(thread, &base, arg)?;
            let (handle, addr) = checked_mem_access(thread, addr, kind.width())?;
            let Store { alg, memories, .. } = &mut thread.store;
            let value = alg.load(&memories[handle as usize].data, addr, kind)?;
            thread.stack.push(value);
        }
        Op::IStore(size, arg) => {
            let value = pop(thread);
            let base = pop(thread);
            store_value(thread, StoreKind::I(*size), arg, &base, &value)?;
        }
        Op::FStore(size, arg) => {
            let value = pop(thread);
            let base = pop(thread);
            store_value(thread, StoreKind::F(*size), arg, &base, &value)?;
        }
        Op::IStorePacked(size, pack, arg) => {
            let value = pop(thread);
            let base = pop(thread);
            store_value(thread, StoreKind::IPacked(*size, *pack), arg, &base, &value)?;
        }
        Op::MemorySize => {
            let handle = memory_handle(thread);
            let pages = thread.store.memories[handle as usize].pages;
            let value = thread.store.alg.from_val(Val::I32(pages as i32));
            thread.stack.push(value);
        }
        Op::MemoryGrow => {
            let delta = pop(thread);
            let delta = ground_u32(thread, &delta)?;
            let handle = memory_handle(thread);
            let mem = &thread.store.memories[handle as usize];
            let old = mem.pages;
            let max = mem
                .ty
                .limits
                .max
                .unwrap_or(crate::valid::MAX_PAGES)
                .min(crate::valid::MAX_PAGES);
            let result = match old.checked_add(delta) {
                Some(new) if new <= max => {
                    let mem = &mut thread.store.memories[handle as usize];
                    mem.pages = new;
                    let mut data = std::mem::take(&mut mem.data);
                    thread.store.alg.mem_grow(&mut data, new);
                    thread.store.memories[handle as usize].data = data;
                    old as i32
                }
                _ => -1,
            };
            let value = thread.store.alg.from_val(Val::I32(result));
            thread.stack.push(value);
        }
        Op::MemoryFill => {
            let len = pop(thread);
            let byte = pop(thread);
            let dst = pop(thread);
            let handle = memory_handle(thread);
            let limit = thread.store.memories[handle as usize].byte_len();
            let (dst, len) =
                checked_span(thread, &dst, &len, limit, TrapCode::OutOfBoundsMemoryAccess)?;
            let mut data = std::mem::take(&mut thread.store.memories[handle as usize].data);
            let result = thread.store.alg.mem_fill(&mut data, dst, len, &byte);
            thread.store.memories[handle as usize].data = data;
            result?;
        }
        Op::MemoryCopy => {
            let len = pop(thread);
            let src = pop(thread);
            let dst = pop(thread);
            let handle = memory_handle(thread);
            let limit = thread.store.memories[handle as usize].byte_len();
            let (src, len) =
                checked_span(thread, &src, &len, limit, TrapCode::OutOfBoundsMemoryAccess)?;
            let dst = ground_u32(thread, &dst)? as usize;
            if dst.checked_add(len).map_or(true, |end| end > limit) {
                return Err(TrapCode::OutOfBoundsMemoryAccess.into());
            }
            let mut data = std::mem::take(&mut thread.store.memories[handle as usize].data);
            thread.store.alg.mem_copy(&mut data, dst, src, len);
            thread.store.memories[handle as usize].data = data;
        }
        Op::MemoryInit(index) => {
            let len = pop(thread);
            let src = pop(thread);
            let dst = pop(thread);
            let bytes: Rc<[u8]> = {
                let data = &instance_of(thread).datas[*index as usize];
                if data.dropped {
                    Rc::from(&[][..])
                } else {
                    Rc::clone(&data.bytes)
                }
            };
            let (src, len) =
                checked_span(thread, &src, &len, bytes.len(), TrapCode::OutOfBoundsMemoryAccess)?;
            let handle = memory_handle(thread);
            let limit = thread.store.memories[handle as usize].byte_len();
            let dst = ground_u32(thread, &dst)? as usize;
            if dst.checked_add(len).map_or(true, |end| end > limit) {
                return Err(TrapCode::OutOfBoundsMemoryAccess.into());
            }
            let mut data = std::mem::take(&mut thread.store.memories[handle as usize].data);
            thread.store.alg.mem_init(&mut data, dst, &bytes[src..src + len]);
            thread.store.memories[handle as usize].data = data;
        }
        Op::DataDrop(index) => {
            let frame = thread.frames.last().expect("inside a frame");
            let instance = frame.instance as usize;
            thread.store.instances[instance].datas[*index as usize].dropped = true;
        }
        Op::I32Const(v) => {
            let value = thread.store.alg.from_val(Val::I32(*v));
            thread.stack.push(value);
        }
        Op::I64Const(v) => {
            let value = thread.store.alg.from_val(Val::I64(*v));
            thread.stack.push(value);
        }
        Op::F32Const(v) => {
            let value = thread.store.alg.from_val(Val::F32(*v));
            thread.stack.push(value);
        }
        Op::F64Const(v) => {
            let value = thread.store.alg.from_val(Val::F64(*v));
            thread.stack.push(value);
        }
        Op::IUnop(size, op) => {
            let a = pop(thread);
            let value = thread.store.alg.iunop(*size, *op, a);
            thread.stack.push(value);
        }
        Op::IBinop(size, op) => {
            let b = pop(thread);
            let a = pop(thread);
            if let IBinOp::Div(sign) | IBinOp::Rem(sign) = op {
                let zero = thread.store.alg.is_zero(*size, &b);
                guard(thread, forks, zero, TrapCode::IntegerDivideByZero)?;
                if *sign == Sign::S {
                    let overflow = thread.store.alg.div_overflows(*size, &a, &b);
                    guard(thread, forks, overflow, TrapCode::IntegerOverflow)?;
                }
            }
            let value = thread.store.alg.ibinop(*size, *op, a, b)?;
            thread.stack.push(value);
        }
        Op::IEqz(size) => {
            let a = pop(thread);
            let value = thread.store.alg.ieqz(*size, a);
            thread.stack.push(value);
        }
        Op::IRelop(size, op) => {
            let b = pop(thread);
            let a = pop(thread);
            let value = thread.store.alg.irelop(*size, *op, a, b);
            thread.stack.push(value);
        }
        Op::FUnop(size, op) => {
            let a = pop(thread);
            let value = thread.store.alg.funop(*size, *op, a);
            thread.stack.push(value);
        }
        Op::FBinop(size, op) => {
            let b = pop(thread);
            let a = pop(thread);
            let value = thread.store.alg.fbinop(*size, *op, a, b);
            thread.stack.push(value);
        }
        Op::FRelop(size, op) => {
            let b = pop(thread);
            let a = pop(thread);
            let value = thread.store.alg.frelop(*size, *op, a, b);
            thread.stack.push(value);
        }
        Op::IExtend(size, pack) => {
            cvt(thread, forks, CvtOp::IExtend(*size, *pack))?;
        }
        Op::I32WrapI64 => cvt(thread, forks, CvtOp::I32WrapI64)?,
        Op::I64ExtendI32(sign) => cvt(thread, forks, CvtOp::I64ExtendI32(*sign))?,
        Op::ITrunc(to, from, sign) => cvt(thread, forks, CvtOp::ITrunc(*to, *from, *sign))?,
        Op::ITruncSat(to, from, sign) => cvt(thread, forks, CvtOp::ITruncSat(*to, *from, *sign))?,
        Op::FConvertI(to, from, sign) => cvt(thread, forks, CvtOp::FConvertI(*to, *from, *sign))?,
        Op::F32DemoteF64 => cvt(thread, forks, CvtOp::F32DemoteF64)?,
        Op::F64PromoteF32 => cvt(thread, forks, CvtOp::F64PromoteF32)?,
        Op::IReinterpretF(size) => cvt(thread, forks, CvtOp::IReinterpretF(*size))?,
        Op::FReinterpretI(size) => cvt(thread, forks, CvtOp::FReinterpretI(*size))?,
        Op::RefNull(ty) => {
            let value = thread.store.alg.from_ref(Ref::Null(*ty));
            thread.stack.push(value);
        }
        Op::RefIsNull => {
            let value = pop(thread);
            let entry = thread
                .store
                .alg
                .as_ref_val(&value)
                .ok_or_else(|| Trap::new("unsupported symbolic reference"))?;
            let result = thread.store.alg.from_val(Val::from(entry.is_null()));
            thread.stack.push(result);
        }
        Op::RefFunc(index) => {
            let handle = instance_of(thread).funcs[*index as usize];
            let value = thread.store.alg.from_ref(Ref::Func(handle));
            thread.stack.push(value);
        }
    }
    Ok(())
}

fn store_value<A: Algebra>(
    thread: &mut Thread<A>,
    kind: StoreKind,
    arg: &MemArg,
    base: &A::Value,
    value: &A::Value,
) -> Result<(), Trap> {
    let addr = effective_addr(thread, base, arg)?;
    let (handle, addr) = checked_mem_access(thread, addr, kind.width())?;
    let mut data = std::mem::take(&mut thread.store.memories[handle as usize].data);
    let result = thread.store.alg.store(&mut data, addr, kind, value);
    thread.store.memories[handle as usize].data = data;
    result
}

fn cvt<A: Algebra>(thread: &mut Thread<A>, forks: &mut Forks<A>, op: CvtOp) -> Result<(), Trap> {
    let a = pop(thread);
    if let CvtOp::ITrunc(..) = op {
        let invalid = thread.store.alg.trunc_invalid(op, &a);
        guard(thread, forks, invalid, TrapCode::InvalidConversionToInt)?;
        let overflows = thread.store.alg.trunc_overflows(op, &a);
        guard(thread, forks, overflows, TrapCode::IntegerOverflow)?;
    }
    let value = thread.store.alg.cvtop(op, a)?;
    thread.stack.push(value);
    Ok(())
}

fn br_table<A: Algebra>(
    thread: &mut Thread<A>,
    forks: &mut Forks<A>,
    labels: &[u32],
    default: u32,
    index: A::Value,
) -> Result<(), Trap> {
    if let Some(i) = thread.store.alg.as_u32(&index) {
        let depth = labels.get(i as usize).copied().unwrap_or(default);
        branch(thread, depth);
        return Ok(());
    }
    // A symbolic index: test each label in turn; infeasible cases drop
    // out, feasible ones fork.
    for (i, depth) in labels.iter().enumerate() {
        let i_val = thread.store.alg.from_val(Val::I32(i as i32));
        let cond = thread
            .store
            .alg
            .irelop(NumSize::S32, IRelOp::Eq, index.clone(), i_val);
        match thread.store.alg.eval_choice(&thread.path, &cond) {
            Branches::Taken(true) => {
                branch(thread, *depth);
                return Ok(());
            }
            Branches::Taken(false) => continue,
            Branches::Either => {
                let mut other = thread.clone();
                other.path.push(cond.clone());
                branch(&mut other, *depth);
                forks.live.push(other);
                let negated = thread.store.alg.not(&cond);
                thread.path.push(negated);
            }
        }
    }
    branch(thread, default);
    Ok(())
}

/// Evaluates a const-expression in the context of a (possibly still
/// partial) instance.
pub(crate) fn eval_const<A: Algebra>(
    store: &mut Store<A>,
    instance: &Instance,
    code: &Code,
) -> Result<A::Value, Error> {
    let [op] = code.as_ref() else {
        return Err(Error::instantiation("constant expression required"));
    };
    Ok(match op {
        Op::I32Const(v) => store.alg.from_val(Val::I32(*v)),
        Op::I64Const(v) => store.alg.from_val(Val::I64(*v)),
        Op::F32Const(v) => store.alg.from_val(Val::F32(*v)),
        Op::F64Const(v) => store.alg.from_val(Val::F64(*v)),
        Op::RefNull(ty) => store.alg.from_ref(Ref::Null(*ty)),
        Op::RefFunc(index) => {
            let handle = instance.funcs[*index as usize];
            store.alg.from_ref(Ref::Func(handle))
        }
        Op::GlobalGet(index) => {
            let handle = instance.globals[*index as usize];
            store.globals[handle as usize].value.clone()
        }
        _ => return Err(Error::instantiation("constant expression required")),
    })
}

/// Invokes the export `name` of `instance` with concrete-typed arguments,
/// running the thread to completion on the store in place.
pub fn invoke<A: Algebra>(
    store: &mut Store<A>,
    instance: u32,
    name: &str,
    args: &[Val],
) -> Result<Vec<Val>, Error> {
    let Some(ExternVal::Func(handle)) = store.export(instance, name) else {
        return Err(Error::instantiation(format!("unknown export {name}")));
    };
    let ty = store.funcs[handle as usize].ty().clone();
    if args.len() != ty.params().len()
        || args.iter().zip(ty.params()).any(|(arg, ty)| arg.ty() != *ty)
    {
        return Err(Error::Trap(TrapCode::ExternCallArgTypeMismatch.into()));
    }

    let placeholder = Store::new(store.alg.clone());
    let mut thread = Thread::new(std::mem::replace(store, placeholder));
    for arg in args {
        let value = thread.store.alg.from_val(*arg);
        thread.stack.push(value);
    }
    let mut forks = Forks::default();
    let outcome = call(&mut thread, handle).and_then(|()| run(&mut thread, &mut forks));
    debug_assert!(
        forks.live.is_empty() && forks.trapped.is_empty(),
        "a deterministic algebra never forks"
    );
    let values = match outcome {
        Ok(values) => values,
        Err(trap) => {
            *store = thread.store;
            return Err(Error::Trap(trap));
        }
    };
    let mut results = Vec::with_capacity(values.len());
    for (value, ty) in values.iter().zip(ty.results()) {
        match thread.store.alg.to_val(value, *ty) {
            Some(val) => results.push(val),
            None => {
                *store = thread.store;
                return Err(Error::Trap(Trap::new(
                    "result is not expressible as a concrete value",
                )));
            }
        }
    }
    *store = thread.store;
    log::trace!("invoke {name}: {results:?}");
    Ok(results)
}
