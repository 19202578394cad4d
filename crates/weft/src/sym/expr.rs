//! The symbolic expression algebra: typed terms over constants, named
//! symbols and the numeric operators of the instruction set.
//!
//! Ground terms fold to constants eagerly, using the concrete algebra for
//! bit-exact results, so a term is symbolic only when a symbol actually
//! flows into it.

use std::fmt;
use std::rc::Rc;

use weft_core::{Val, F32, F64};

use crate::ast::{FBinOp, FRelOp, FUnOp, IBinOp, IRelOp, IUnOp, NumSize};
use crate::exec::{Algebra, Concrete, CvtOp};

/// The numeric type of a term.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NumTy {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl NumTy {
    /// Width in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    pub(crate) fn of_size_int(size: NumSize) -> Self {
        match size {
            NumSize::S32 => Self::I32,
            NumSize::S64 => Self::I64,
        }
    }

    pub(crate) fn of_size_float(size: NumSize) -> Self {
        match size {
            NumSize::S32 => Self::F32,
            NumSize::S64 => Self::F64,
        }
    }
}

impl fmt::Display for NumTy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        write!(f, "{name}")
    }
}

/// Unary operators over terms.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnOp {
    /// An integer unary operator at a width.
    I(NumSize, IUnOp),
    /// A float unary operator at a width.
    F(NumSize, FUnOp),
}

/// Binary operators over terms.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BinOp {
    /// An integer binary operator at a width.
    I(NumSize, IBinOp),
    /// A float binary operator at a width.
    F(NumSize, FBinOp),
}

/// Comparison operators over terms; the result is an `i32` boolean.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CmpOp {
    /// Integer comparison at a width.
    I(NumSize, IRelOp),
    /// Integer zero test at a width.
    IEqz(NumSize),
    /// Float comparison at a width.
    F(NumSize, FRelOp),
}

/// A term of the expression algebra.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant, stored as raw bits of its type's width.
    Const(NumTy, u64),
    /// A named symbol.
    Sym(NumTy, String),
    /// A unary operator application.
    Unop(UnOp, Rc<Expr>),
    /// A binary operator application.
    Binop(BinOp, Rc<Expr>, Rc<Expr>),
    /// A comparison; boolean-valued.
    Cmp(CmpOp, Rc<Expr>, Rc<Expr>),
    /// Boolean negation.
    Not(Rc<Expr>),
    /// A conversion.
    Cvt(CvtOp, Rc<Expr>),
    /// `select` on a symbolic condition.
    Ite(Rc<Expr>, Rc<Expr>, Rc<Expr>),
    /// Byte `index` of the value of `arg`, little-endian; used by the
    /// symbolic memory representation.
    Extract(Rc<Expr>, u8),
}

impl Expr {
    /// A constant term from a concrete value.
    pub fn of_val(val: Val) -> Rc<Self> {
        let (ty, bits) = match val {
            Val::I32(v) => (NumTy::I32, v as u32 as u64),
            Val::I64(v) => (NumTy::I64, v as u64),
            Val::F32(v) => (NumTy::F32, u64::from(v.to_bits())),
            Val::F64(v) => (NumTy::F64, v.to_bits()),
            Val::FuncRef(_) | Val::ExternRef(_) => {
                unreachable!("references are not expression terms")
            }
        };
        Rc::new(Self::Const(ty, bits))
    }

    /// The type of the term.
    pub fn ty(&self) -> NumTy {
        match self {
            Self::Const(ty, _) | Self::Sym(ty, _) => *ty,
            Self::Unop(UnOp::I(size, _), _) | Self::Binop(BinOp::I(size, _), _, _) => {
                NumTy::of_size_int(*size)
            }
            Self::Unop(UnOp::F(size, _), _) | Self::Binop(BinOp::F(size, _), _, _) => {
                NumTy::of_size_float(*size)
            }
            Self::Cmp(..) | Self::Not(_) => NumTy::I32,
            Self::Cvt(op, _) => match op {
                CvtOp::I32WrapI64 => NumTy::I32,
                CvtOp::I64ExtendI32(_) => NumTy::I64,
                CvtOp::ITrunc(to, _, _) | CvtOp::ITruncSat(to, _, _) => NumTy::of_size_int(*to),
                CvtOp::FConvertI(to, _, _) => NumTy::of_size_float(*to),
                CvtOp::F32DemoteF64 => NumTy::F32,
                CvtOp::F64PromoteF32 => NumTy::F64,
                CvtOp::IReinterpretF(size) | CvtOp::IExtend(size, _) => {
                    NumTy::of_size_int(*size)
                }
                CvtOp::FReinterpretI(size) => NumTy::of_size_float(*size),
            },
            Self::Ite(_, then, _) => then.ty(),
            Self::Extract(..) => NumTy::I32,
        }
    }

    /// The concrete value of a ground term.
    pub fn as_val(&self) -> Option<Val> {
        match self {
            Self::Const(NumTy::I32, bits) => Some(Val::I32(*bits as u32 as i32)),
            Self::Const(NumTy::I64, bits) => Some(Val::I64(*bits as i64)),
            Self::Const(NumTy::F32, bits) => Some(Val::F32(F32::from_bits(*bits as u32))),
            Self::Const(NumTy::F64, bits) => Some(Val::F64(F64::from_bits(*bits))),
            _ => None,
        }
    }

    /// Whether the term is a constant with the given truth value.
    pub fn is_bool_const(&self, truth: bool) -> bool {
        matches!(self, Self::Const(NumTy::I32, bits) if (*bits != 0) == truth)
    }
}

/// One constant-folding step: an operator applied to ground operands is
/// computed with the concrete algebra. Anything non-ground stays a term.
pub fn fold(expr: Rc<Expr>) -> Rc<Expr> {
    try_fold(&expr).unwrap_or(expr)
}

fn try_fold(expr: &Expr) -> Option<Rc<Expr>> {
    let mut concrete = Concrete;
    let folded = match expr {
        Expr::Unop(op, arg) => {
            let arg = arg.as_val()?;
            match op {
                UnOp::I(size, op) => concrete.iunop(*size, *op, arg),
                UnOp::F(size, op) => concrete.funop(*size, *op, arg),
            }
        }
        Expr::Binop(op, lhs, rhs) => {
            let lhs = lhs.as_val()?;
            let rhs = rhs.as_val()?;
            match op {
                BinOp::I(size, op) => concrete.ibinop(*size, *op, lhs, rhs).ok()?,
                BinOp::F(size, op) => concrete.fbinop(*size, *op, lhs, rhs),
            }
        }
        Expr::Cmp(op, lhs, rhs) => {
            let lhs = lhs.as_val()?;
            match op {
                CmpOp::I(size, op) => concrete.irelop(*size, *op, lhs, rhs.as_val()?),
                CmpOp::IEqz(size) => concrete.ieqz(*size, lhs),
                CmpOp::F(size, op) => concrete.frelop(*size, *op, lhs, rhs.as_val()?),
            }
        }
        Expr::Not(arg) => {
            let arg = arg.as_val()?;
            concrete.not(&arg)
        }
        Expr::Cvt(op, arg) => {
            let arg = arg.as_val()?;
            concrete.cvtop(*op, arg).ok()?
        }
        Expr::Ite(cond, then, alt) => {
            let cond = cond.as_val()?;
            return Some(if concrete.as_u32(&cond)? != 0 {
                Rc::clone(then)
            } else {
                Rc::clone(alt)
            });
        }
        _ => return None,
    };
    Some(Expr::of_val(folded))
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Const(ty, _) => match self.as_val() {
                Some(Val::I32(v)) => write!(f, "({ty} {v})"),
                Some(Val::I64(v)) => write!(f, "({ty} {v})"),
                Some(Val::F32(v)) => write!(f, "({ty} {v})"),
                Some(Val::F64(v)) => write!(f, "({ty} {v})"),
                _ => write!(f, "({ty} ?)"),
            },
            Self::Sym(ty, name) => write!(f, "({ty} ${name})"),
            Self::Unop(op, arg) => write!(f, "({op:?} {arg})"),
            Self::Binop(op, lhs, rhs) => write!(f, "({op:?} {lhs} {rhs})"),
            Self::Cmp(op, lhs, rhs) => write!(f, "({op:?} {lhs} {rhs})"),
            Self::Not(arg) => write!(f, "(not {arg})"),
            Self::Cvt(op, arg) => write!(f, "({op:?} {arg})"),
            Self::Ite(cond, then, alt) => write!(f, "(ite {cond} {then} {alt})"),
            Self::Extract(arg, byte) => write!(f, "(extract {arg} {byte})"),
        }
    }
}
