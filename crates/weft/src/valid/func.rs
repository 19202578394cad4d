//! Stack-polymorphic validation of function bodies.
//!
//! The value stack is tracked as a list of three-valued types: a concrete
//! type, `Any` (the unreachable stack, which absorbs arbitrary pops), or
//! `Something` (present but not yet constrained). Control frames record
//! the stack height at entry and the branch-target types; a branch leaves
//! `[Any]` on the stack for the rest of the block.

use std::collections::HashSet;

use weft_core::{FuncType, RefType, ValType};

use crate::ast::{NumSize, PackSize};
use crate::module::{Func, Module, Op};
use crate::Error;

/// A type on the validation stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum StackTy {
    /// The unreachable stack: matches and absorbs anything.
    Any,
    /// A value is present but its type is not yet constrained.
    Something,
    /// A concrete value type.
    Val(ValType),
}

impl StackTy {
    /// `match_types`: either side being `Any` or `Something` matches.
    fn matches(self, required: ValType) -> bool {
        match self {
            Self::Any | Self::Something => true,
            Self::Val(ty) => ty == required,
        }
    }
}

/// Why a control frame was pushed; a loop branches to its start.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FrameKind {
    Func,
    Block,
    Loop,
    If,
}

#[derive(Debug, Clone)]
struct Frame {
    kind: FrameKind,
    ty: FuncType,
    height: usize,
}

impl Frame {
    /// The types a branch to this frame must provide: the results for a
    /// block or if, the parameters for a loop.
    fn branch_target(&self) -> &[ValType] {
        match self.kind {
            FrameKind::Loop => self.ty.params(),
            _ => self.ty.results(),
        }
    }
}

pub(super) fn validate_function(
    module: &Module,
    declared: &HashSet<u32>,
    function: &Func,
) -> Result<(), Error> {
    let ty = module
        .types
        .get(function.ty)
        .ok_or_else(|| Error::validation(format!("unknown type {}", function.ty)))?;
    let mut locals: Vec<ValType> = ty.params().to_vec();
    locals.extend(function.locals.iter().copied());
    let mut validator = Validator {
        module,
        declared,
        locals,
        stack: Vec::new(),
        frames: Vec::new(),
    };
    let outer = FuncType::new([], ty.results().to_vec());
    validator.check_frame(FrameKind::Func, &outer, &function.body)?;
    Ok(())
}

struct Validator<'a> {
    module: &'a Module,
    declared: &'a HashSet<u32>,
    locals: Vec<ValType>,
    stack: Vec<StackTy>,
    frames: Vec<Frame>,
}

impl Validator<'_> {
    fn frame_height(&self) -> usize {
        self.frames.last().map_or(0, |frame| frame.height)
    }

    fn push(&mut self, ty: ValType) {
        self.stack.push(StackTy::Val(ty));
    }

    /// Pops one type; `Any` stays on the stack and is returned as the
    /// absorbing element.
    fn pop(&mut self) -> Result<StackTy, Error> {
        if self.stack.len() == self.frame_height() {
            return Err(Error::validation("type mismatch"));
        }
        match self.stack.last().copied() {
            Some(StackTy::Any) => Ok(StackTy::Any),
            Some(ty) => {
                self.stack.pop();
                Ok(ty)
            }
            None => Err(Error::validation("type mismatch")),
        }
    }

    fn pop_expect(&mut self, required: ValType) -> Result<(), Error> {
        let got = self.pop()?;
        if !got.matches(required) {
            return Err(Error::validation("type mismatch"));
        }
        Ok(())
    }

    /// Pops a required suffix, right to left, with `Any` absorption.
    fn pop_expect_many(&mut self, required: &[ValType]) -> Result<(), Error> {
        for ty in required.iter().rev() {
            self.pop_expect(*ty)?;
        }
        Ok(())
    }

    /// Non-destructive check that the stack top would satisfy `required`.
    ///
    /// Used by `br_table`, whose labels are all checked against one stack.
    fn peek_matches(&self, required: &[ValType]) -> Result<(), Error> {
        let height = self.frame_height();
        let mut pos = self.stack.len();
        for ty in required.iter().rev() {
            if pos == height {
                return Err(Error::validation("type mismatch"));
            }
            match self.stack[pos - 1] {
                // The absorbing element satisfies this and every deeper
                // requirement.
                StackTy::Any => return Ok(()),
                got => {
                    if !got.matches(*ty) {
                        return Err(Error::validation("type mismatch"));
                    }
                    pos -= 1;
                }
            }
        }
        Ok(())
    }

    /// Marks the rest of the current block unreachable: the stack is reset
    /// to the frame base plus the absorbing element.
    fn poison(&mut self) {
        self.stack.truncate(self.frame_height());
        self.stack.push(StackTy::Any);
    }

    fn frame_at(&self, depth: u32) -> Result<&Frame, Error> {
        self.frames
            .len()
            .checked_sub(1 + depth as usize)
            .and_then(|index| self.frames.get(index))
            .ok_or_else(|| Error::validation(format!("unknown label {depth}")))
    }

    fn local_ty(&self, index: u32) -> Result<ValType, Error> {
        self.locals
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::validation(format!("unknown local {index}")))
    }

    fn func_type_of(&self, index: u32) -> Result<&FuncType, Error> {
        self.module
            .func_type(index)
            .ok_or_else(|| Error::validation(format!("unknown function {index}")))
    }

    fn global_ty(&self, index: u32) -> Result<crate::ast::GlobalType, Error> {
        self.module
            .global_type(index)
            .ok_or_else(|| Error::validation(format!("unknown global {index}")))
    }

    fn table_ty(&self, index: u32) -> Result<crate::ast::TableType, Error> {
        self.module
            .table_type(index)
            .ok_or_else(|| Error::validation(format!("unknown table {index}")))
    }

    /// Validates one structured frame: pops the parameters, runs the body,
    /// checks the results and leaves them on the stack.
    fn check_frame(&mut self, kind: FrameKind, ty: &FuncType, body: &[Op]) -> Result<(), Error> {
        self.pop_expect_many(ty.params())?;
        let height = self.stack.len();
        self.frames.push(Frame {
            kind,
            ty: ty.clone(),
            height,
        });
        for param in ty.params() {
            self.push(*param);
        }
        for op in body {
            self.check_op(op)?;
        }
        self.pop_expect_many(ty.results())?;
        while self.stack.len() > height {
            // Only the absorbing element may remain above the base.
            if self.stack.pop() != Some(StackTy::Any) {
                return Err(Error::validation("type mismatch"));
            }
        }
        self.frames.pop();
        for result in ty.results() {
            self.push(*result);
        }
        Ok(())
    }

    /// Validates an `if` arm against a saved copy of the entry stack.
    fn check_arm(&mut self, ty: &FuncType, body: &[Op], entry: &[StackTy]) -> Result<(), Error> {
        self.stack = entry.to_vec();
        // The parameters are re-materialised for each arm.
        let height = self.stack.len();
        self.frames.push(Frame {
            kind: FrameKind::If,
            ty: ty.clone(),
            height,
        });
        for param in ty.params() {
            self.push(*param);
        }
        for op in body {
            self.check_op(op)?;
        }
        self.pop_expect_many(ty.results())?;
        while self.stack.len() > height {
            if self.stack.pop() != Some(StackTy::Any) {
                return Err(Error::validation("type mismatch"));
            }
        }
        self.frames.pop();
        Ok(())
    }

    fn check_op(&mut self, op: &Op) -> Result<(), Error> {
        match op {
            Op::Nop => {}
            Op::Unreachable => self.poison(),
            Op::Block(ty, body) => self.check_frame(FrameKind::Block, ty, body)?,
            Op::Loop(ty, body) => self.check_frame(FrameKind::Loop, ty, body)?,
            Op::If(ty, then, alt) => {
                self.pop_expect(ValType::I32)?;
                self.pop_expect_many(ty.params())?;
                let entry = self.stack.clone();
                self.check_arm(ty, then, &entry)?;
                self.check_arm(ty, alt, &entry)?;
                self.stack = entry;
                for result in ty.results() {
                    self.push(*result);
                }
            }
            Op::Br(depth) => {
                let target: Vec<ValType> = self.frame_at(*depth)?.branch_target().to_vec();
                self.pop_expect_many(&target)?;
                self.poison();
            }
            Op::BrIf(depth) => {
                self.pop_expect(ValType::I32)?;
                let target: Vec<ValType> = self.frame_at(*depth)?.branch_target().to_vec();
                self.pop_expect_many(&target)?;
                for ty in &target {
                    self.push(*ty);
                }
            }
            Op::BrTable(labels, default) => {
                self.pop_expect(ValType::I32)?;
                let default_target: Vec<ValType> =
                    self.frame_at(*default)?.branch_target().to_vec();
                for label in labels.iter() {
                    let target = self.frame_at(*label)?.branch_target();
                    if target.len() != default_target.len() {
                        return Err(Error::validation("type mismatch"));
                    }
                    self.peek_matches(target)?;
                }
                self.pop_expect_many(&default_target)?;
                self.poison();
            }
            Op::Return => {
                let results: Vec<ValType> = self
                    .frames
                    .first()
                    .expect("the function frame is pushed before any instruction")
                    .ty
                    .results()
                    .to_vec();
                self.pop_expect_many(&results)?;
                self.poison();
            }
            Op::Call(index) => {
                let ty = self.func_type_of(*index)?.clone();
                self.pop_expect_many(ty.params())?;
                for result in ty.results() {
                    self.push(*result);
                }
            }
            Op::CallIndirect(table, ty) => {
                let table_ty = self.table_ty(*table)?;
                if table_ty.elem != RefType::Func {
                    return Err(Error::validation("type mismatch"));
                }
                self.pop_expect(ValType::I32)?;
                let ty = ty.clone();
                self.pop_expect_many(ty.params())?;
                for result in ty.results() {
                    self.push(*result);
                }
            }
            Op::Drop => {
                self.pop()?;
            }
            Op::Select(None) => {
                self.pop_expect(ValType::I32)?;
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                let result = match (lhs, rhs) {
                    (StackTy::Val(a), StackTy::Val(b)) => {
                        if a != b || !a.is_num() {
                            return Err(Error::validation("type mismatch"));
                        }
                        StackTy::Val(a)
                    }
                    (StackTy::Val(a), _) | (_, StackTy::Val(a)) => {
                        if !a.is_num() {
                            return Err(Error::validation("type mismatch"));
                        }
                        StackTy::Val(a)
                    }
                    // Both operands unconstrained: the result is a value of
                    // a type still to be determined.
                    _ => StackTy::Something,
                };
                self.stack.push(result);
            }
            Op::Select(Some(ty)) => {
                self.pop_expect(ValType::I32)?;
                self.pop_expect(*ty)?;
                self.pop_expect(*ty)?;
                self.push(*ty);
            }
            Op::LocalGet(index) => {
                let ty = self.local_ty(*index)?;
                self.push(ty);
            }
            Op::LocalSet(index) => {
                let ty = self.local_ty(*index)?;
                self.pop_expect(ty)?;
            }
            Op::LocalTee(index) => {
                let ty = self.local_ty(*index)?;
                self.pop_expect(ty)?;
                self.push(ty);
            }
            Op::GlobalGet(index) => {
                let ty = self.global_ty(*index)?;
                self.push(ty.ty);
            }
            Op::GlobalSet(index) => {
                let ty = self.global_ty(*index)?;
                self.pop_expect(ty.ty)?;
            }
            Op::TableGet(index) => {
                let ty = self.table_ty(*index)?;
                self.pop_expect(ValType::I32)?;
                self.push(ValType::Ref(ty.elem));
            }
            Op::TableSet(index) => {
                let ty = self.table_ty(*index)?;
                self.pop_expect(ValType::Ref(ty.elem))?;
                self.pop_expect(ValType::I32)?;
            }
            Op::TableSize(index) => {
                self.table_ty(*index)?;
                self.push(ValType::I32);
            }
            Op::TableGrow(index) => {
                let ty = self.table_ty(*index)?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::Ref(ty.elem))?;
                self.push(ValType::I32);
            }
            Op::TableFill(index) => {
                let ty = self.table_ty(*index)?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::Ref(ty.elem))?;
                self.pop_expect(ValType::I32)?;
            }
            Op::TableCopy { dst, src } => {
                let dst_ty = self.table_ty(*dst)?;
                let src_ty = self.table_ty(*src)?;
                if dst_ty.elem != src_ty.elem {
                    return Err(Error::validation("type mismatch"));
                }
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::I32)?;
            }
            Op::TableInit { table, elem } => {
                let table_ty = self.table_ty(*table)?;
                let elem_ty = self
                    .module
                    .elems
                    .get(*elem)
                    .ok_or_else(|| Error::validation(format!("unknown elem segment {elem}")))?
                    .ty;
                if table_ty.elem != elem_ty {
                    return Err(Error::validation("type mismatch"));
                }
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::I32)?;
            }
            Op::ElemDrop(_) => {}
            Op::ILoad(size, _) => {
                self.pop_expect(ValType::I32)?;
                self.push(int_ty(*size));
            }
            Op::FLoad(size, _) => {
                self.pop_expect(ValType::I32)?;
                self.push(float_ty(*size));
            }
            Op::ILoadPacked(size, pack, _, _) => {
                check_pack(*size, *pack)?;
                self.pop_expect(ValType::I32)?;
                self.push(int_ty(*size));
            }
            Op::IStore(size, _) => {
                self.pop_expect(int_ty(*size))?;
                self.pop_expect(ValType::I32)?;
            }
            Op::FStore(size, _) => {
                self.pop_expect(float_ty(*size))?;
                self.pop_expect(ValType::I32)?;
            }
            Op::IStorePacked(size, pack, _) => {
                check_pack(*size, *pack)?;
                self.pop_expect(int_ty(*size))?;
                self.pop_expect(ValType::I32)?;
            }
            Op::MemorySize => self.push(ValType::I32),
            Op::MemoryGrow => {
                self.pop_expect(ValType::I32)?;
                self.push(ValType::I32);
            }
            Op::MemoryFill | Op::MemoryCopy | Op::MemoryInit(_) => {
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::I32)?;
                self.pop_expect(ValType::I32)?;
            }
            Op::DataDrop(_) => {}
            Op::I32Const(_) => self.push(ValType::I32),
            Op::I64Const(_) => self.push(ValType::I64),
            Op::F32Const(_) => self.push(ValType::F32),
            Op::F64Const(_) => self.push(ValType::F64),
            Op::IUnop(size, _) => {
                self.pop_expect(int_ty(*size))?;
                self.push(int_ty(*size));
            }
            Op::IBinop(size, _) => {
                self.pop_expect(int_ty(*size))?;
                self.pop_expect(int_ty(*size))?;
                self.push(int_ty(*size));
            }
            Op::IEqz(size) => {
                self.pop_expect(int_ty(*size))?;
                self.push(ValType::I32);
            }
            Op::IRelop(size, _) => {
                self.pop_expect(int_ty(*size))?;
                self.pop_expect(int_ty(*size))?;
                self.push(ValType::I32);
            }
            Op::FUnop(size, _) => {
                self.pop_expect(float_ty(*size))?;
                self.push(float_ty(*size));
            }
            Op::FBinop(size, _) => {
                self.pop_expect(float_ty(*size))?;
                self.pop_expect(float_ty(*size))?;
                self.push(float_ty(*size));
            }
            Op::FRelop(size, _) => {
                self.pop_expect(float_ty(*size))?;
                self.pop_expect(float_ty(*size))?;
                self.push(ValType::I32);
            }
            Op::IExtend(size, pack) => {
                check_pack(*size, *pack)?;
                self.pop_expect(int_ty(*size))?;
                self.push(int_ty(*size));
            }
            Op::I32WrapI64 => {
                self.pop_expect(ValType::I64)?;
                self.push(ValType::I32);
            }
            Op::I64ExtendI32(_) => {
                self.pop_expect(ValType::I32)?;
                self.push(ValType::I64);
            }
            Op::ITrunc(to, from, _) | Op::ITruncSat(to, from, _) => {
                self.pop_expect(float_ty(*from))?;
                self.push(int_ty(*to));
            }
            Op::FConvertI(to, from, _) => {
                self.pop_expect(int_ty(*from))?;
                self.push(float_ty(*to));
            }
            Op::F32DemoteF64 => {
                self.pop_expect(ValType::F64)?;
                self.push(ValType::F32);
            }
            Op::F64PromoteF32 => {
                self.pop_expect(ValType::F32)?;
                self.push(ValType::F64);
            }
            Op::IReinterpretF(size) => {
                self.pop_expect(float_ty(*size))?;
                self.push(int_ty(*size));
            }
            Op::FReinterpretI(size) => {
                self.pop_expect(int_ty(*size))?;
                self.push(float_ty(*size));
            }
            Op::RefNull(ty) => self.push(ValType::Ref(*ty)),
            Op::RefIsNull => {
                let got = self.pop()?;
                if let StackTy::Val(ty) = got {
                    if ty.is_num() {
                        return Err(Error::validation("type mismatch"));
                    }
                }
                self.push(ValType::I32);
            }
            Op::RefFunc(index) => {
                self.func_type_of(*index)?;
                if !self.declared.contains(index) {
                    return Err(Error::validation("undeclared function reference"));
                }
                self.push(ValType::Ref(RefType::Func));
            }
        }
        Ok(())
    }
}

fn int_ty(size: NumSize) -> ValType {
    match size {
        NumSize::S32 => ValType::I32,
        NumSize::S64 => ValType::I64,
    }
}

fn float_ty(size: NumSize) -> ValType {
    match size {
        NumSize::S32 => ValType::F32,
        NumSize::S64 => ValType::F64,
    }
}

/// A packed width must be narrower than the operand width.
fn check_pack(size: NumSize, pack: PackSize) -> Result<(), Error> {
    if pack.bytes() >= size.bytes() {
        return Err(Error::validation("type mismatch"));
    }
    Ok(())
}
