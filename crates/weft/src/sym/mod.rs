//! Symbolic execution: the term-building value algebra, the exploration
//! driver, and the `symbolic` extern module.
//!
//! The interpreter itself is unchanged; [`Symbolic`] implements
//! [`Algebra`] over solver terms, forking the executing thread whenever
//! both sides of a condition are satisfiable. Each path owns its store;
//! memory pages are shared copy-on-write between siblings.

pub mod expr;
pub mod solver;

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use weft_core::{FuncType, RefType, Trap, Val, ValType};

use crate::ast::{FRelOp, IRelOp, NumSize};
use crate::exec::{self, Algebra, Branches, Concrete, CvtOp, LoadKind, StoreKind, Thread};
use crate::link::ExternModule;
use crate::store::{ExternVal, Ref, Store};
use crate::Error;

use self::expr::{BinOp, CmpOp, Expr, NumTy, UnOp};
use self::solver::{SatResult, Solver};

/// A symbolic runtime value: a numeric term, or a ground reference.
#[derive(Debug, Clone)]
pub enum SymVal {
    /// A term in the expression algebra.
    Num(Rc<Expr>),
    /// References stay concrete.
    Ref(Ref),
}

impl SymVal {
    fn expr(&self) -> Option<&Rc<Expr>> {
        match self {
            Self::Num(expr) => Some(expr),
            Self::Ref(_) => None,
        }
    }
}

impl fmt::Display for SymVal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Num(expr) => write!(f, "{expr}"),
            Self::Ref(Ref::Null(_)) => write!(f, "null"),
            Self::Ref(Ref::Func(handle)) => write!(f, "(funcref {handle})"),
            Self::Ref(Ref::Extern(handle)) => write!(f, "(externref {handle})"),
        }
    }
}

/// One byte of symbolic memory.
#[derive(Debug, Clone)]
enum SymByte {
    /// A concrete byte.
    Byte(u8),
    /// Byte `index` (little-endian) of the value of a term.
    Frag(Rc<Expr>, u8),
}

/// Linear memory with possibly-symbolic contents.
///
/// Pages are allocated lazily and shared between forked paths until
/// written; an absent page reads as zero.
#[derive(Debug, Clone, Default)]
pub struct SymMem {
    pages: BTreeMap<u32, Rc<Vec<SymByte>>>,
}

const PAGE: usize = crate::store::PAGE_SIZE;

impl SymMem {
    fn get(&self, addr: usize) -> SymByte {
        let page = (addr / PAGE) as u32;
        match self.pages.get(&page) {
            Some(page) => page[addr % PAGE].clone(),
            None => SymByte::Byte(0),
        }
    }

    fn set(&mut self, addr: usize, byte: SymByte) {
        let index = (addr / PAGE) as u32;
        let page = self
            .pages
            .entry(index)
            .or_insert_with(|| Rc::new(vec![SymByte::Byte(0); PAGE]));
        Rc::make_mut(page)[addr % PAGE] = byte;
    }
}

/// The symbolic value algebra: terms plus a solver for choice evaluation.
#[derive(Debug, Clone)]
pub struct Symbolic<S: Solver> {
    /// The decision procedure consulted at branch points.
    pub solver: S,
    fresh: u32,
}

impl<S: Solver> Symbolic<S> {
    /// A symbolic algebra over the given solver.
    pub fn new(solver: S) -> Self {
        Self { solver, fresh: 0 }
    }

    /// A fresh symbol of the given type, numbered per creation site order.
    pub fn fresh(&mut self, ty: NumTy) -> SymVal {
        let name = format!("symbol_{}", self.fresh);
        self.fresh += 1;
        SymVal::Num(self.solver.symbol_of_name(&name, ty))
    }

    fn term(&mut self, expr: Expr) -> SymVal {
        SymVal::Num(expr::fold(Rc::new(expr)))
    }

    fn expr_of(value: &SymVal) -> Rc<Expr> {
        match value {
            SymVal::Num(expr) => Rc::clone(expr),
            SymVal::Ref(_) => unreachable!("numeric operation on a reference"),
        }
    }

    fn bool_const(&mut self, truth: bool) -> SymVal {
        SymVal::Num(Expr::of_val(Val::from(truth)))
    }

    fn sat(&mut self, path: &[SymVal], extra: &Rc<Expr>) -> bool {
        let mut assumptions: Vec<Rc<Expr>> = path
            .iter()
            .filter_map(|value| value.expr().cloned())
            .collect();
        assumptions.push(Rc::clone(extra));
        self.solver.check_sat(&assumptions) != SatResult::Unsat
    }
}

impl<S: Solver> Algebra for Symbolic<S> {
    type Value = SymVal;
    type Mem = SymMem;

    fn from_val(&mut self, val: Val) -> SymVal {
        match val {
            Val::FuncRef(None) => SymVal::Ref(Ref::Null(RefType::Func)),
            Val::FuncRef(Some(handle)) => SymVal::Ref(Ref::Func(handle)),
            Val::ExternRef(None) => SymVal::Ref(Ref::Null(RefType::Extern)),
            Val::ExternRef(Some(handle)) => SymVal::Ref(Ref::Extern(handle)),
            _ => SymVal::Num(Expr::of_val(val)),
        }
    }

    fn to_val(&mut self, v: &SymVal, _ty: ValType) -> Option<Val> {
        match v {
            SymVal::Num(expr) => expr.as_val(),
            SymVal::Ref(r) => Some(Concrete.from_ref(*r)),
        }
    }

    fn from_ref(&mut self, r: Ref) -> SymVal {
        SymVal::Ref(r)
    }

    fn as_ref_val(&mut self, v: &SymVal) -> Option<Ref> {
        match v {
            SymVal::Ref(r) => Some(*r),
            SymVal::Num(_) => None,
        }
    }

    fn as_u32(&mut self, v: &SymVal) -> Option<u32> {
        match v.expr()?.as_val()? {
            Val::I32(v) => Some(v as u32),
            _ => None,
        }
    }

    fn iunop(&mut self, size: NumSize, op: crate::ast::IUnOp, a: SymVal) -> SymVal {
        let a = Self::expr_of(&a);
        self.term(Expr::Unop(UnOp::I(size, op), a))
    }

    fn ibinop(
        &mut self,
        size: NumSize,
        op: crate::ast::IBinOp,
        a: SymVal,
        b: SymVal,
    ) -> Result<SymVal, Trap> {
        let a = Self::expr_of(&a);
        let b = Self::expr_of(&b);
        Ok(self.term(Expr::Binop(BinOp::I(size, op), a, b)))
    }

    fn ieqz(&mut self, size: NumSize, a: SymVal) -> SymVal {
        let zero = Expr::of_val(match size {
            NumSize::S32 => Val::I32(0),
            NumSize::S64 => Val::I64(0),
        });
        let a = Self::expr_of(&a);
        self.term(Expr::Cmp(CmpOp::IEqz(size), a, zero))
    }

    fn irelop(&mut self, size: NumSize, op: IRelOp, a: SymVal, b: SymVal) -> SymVal {
        let a = Self::expr_of(&a);
        let b = Self::expr_of(&b);
        self.term(Expr::Cmp(CmpOp::I(size, op), a, b))
    }

    fn funop(&mut self, size: NumSize, op: crate::ast::FUnOp, a: SymVal) -> SymVal {
        let a = Self::expr_of(&a);
        self.term(Expr::Unop(UnOp::F(size, op), a))
    }

    fn fbinop(&mut self, size: NumSize, op: crate::ast::FBinOp, a: SymVal, b: SymVal) -> SymVal {
        let a = Self::expr_of(&a);
        let b = Self::expr_of(&b);
        self.term(Expr::Binop(BinOp::F(size, op), a, b))
    }

    fn frelop(&mut self, size: NumSize, op: FRelOp, a: SymVal, b: SymVal) -> SymVal {
        let a = Self::expr_of(&a);
        let b = Self::expr_of(&b);
        self.term(Expr::Cmp(CmpOp::F(size, op), a, b))
    }

    fn cvtop(&mut self, op: CvtOp, a: SymVal) -> Result<SymVal, Trap> {
        let a = Self::expr_of(&a);
        Ok(self.term(Expr::Cvt(op, a)))
    }

    fn select(&mut self, cond: SymVal, then: SymVal, alt: SymVal) -> SymVal {
        let cond_expr = Self::expr_of(&cond);
        if let Some(val) = expr::fold(Rc::clone(&cond_expr)).as_val() {
            let taken = matches!(val, Val::I32(v) if v != 0);
            return if taken { then } else { alt };
        }
        match (&then, &alt) {
            (SymVal::Num(t), SymVal::Num(a)) => self.term(Expr::Ite(
                cond_expr,
                Rc::clone(t),
                Rc::clone(a),
            )),
            _ => {
                // Symbolic selection between references is not expressible
                // as a term; over-approximate with the first operand.
                log::warn!("select on references with a symbolic condition");
                then
            }
        }
    }

    fn not(&mut self, cond: &SymVal) -> SymVal {
        let cond = Self::expr_of(cond);
        self.term(Expr::Not(cond))
    }

    fn is_zero(&mut self, size: NumSize, v: &SymVal) -> SymVal {
        self.ieqz(size, v.clone())
    }

    fn div_overflows(&mut self, size: NumSize, a: &SymVal, b: &SymVal) -> SymVal {
        let (min, neg_one) = match size {
            NumSize::S32 => (Val::I32(i32::MIN), Val::I32(-1)),
            NumSize::S64 => (Val::I64(i64::MIN), Val::I64(-1)),
        };
        let min = self.from_val(min);
        let neg_one = self.from_val(neg_one);
        let a_is_min = self.irelop(size, IRelOp::Eq, a.clone(), min);
        let b_is_neg_one = self.irelop(size, IRelOp::Eq, b.clone(), neg_one);
        let a_expr = Self::expr_of(&a_is_min);
        let b_expr = Self::expr_of(&b_is_neg_one);
        self.term(Expr::Binop(
            BinOp::I(NumSize::S32, crate::ast::IBinOp::And),
            a_expr,
            b_expr,
        ))
    }

    fn trunc_invalid(&mut self, op: CvtOp, v: &SymVal) -> SymVal {
        match v.expr().and_then(|expr| expr.as_val()) {
            Some(ground) => {
                let result = Concrete.trunc_invalid(op, &ground);
                self.from_val(result)
            }
            // Deciding NaN-ness of a residual float term needs the solver
            // backend; treat the path as non-trapping.
            None => self.bool_const(false),
        }
    }

    fn trunc_overflows(&mut self, op: CvtOp, v: &SymVal) -> SymVal {
        match v.expr().and_then(|expr| expr.as_val()) {
            Some(ground) => {
                let result = Concrete.trunc_overflows(op, &ground);
                self.from_val(result)
            }
            None => self.bool_const(false),
        }
    }

    fn mem_new(&mut self, _pages: u32) -> SymMem {
        SymMem::default()
    }

    fn mem_grow(&mut self, _mem: &mut SymMem, _new_pages: u32) {
        // Absent pages already read as zero.
    }

    fn load(&mut self, mem: &SymMem, addr: usize, kind: LoadKind) -> Result<SymVal, Trap> {
        let width = kind.width() as usize;
        let bytes: Vec<SymByte> = (0..width).map(|i| mem.get(addr + i)).collect();
        if bytes
            .iter()
            .all(|byte| matches!(byte, SymByte::Byte(_)))
        {
            let mut buffer = vec![0u8; width];
            for (slot, byte) in buffer.iter_mut().zip(&bytes) {
                let SymByte::Byte(b) = byte else { unreachable!() };
                *slot = *b;
            }
            let val = Concrete.load(&buffer, 0, kind)?;
            return Ok(self.from_val(val));
        }
        // A whole-width read of an unbroken term is the term itself,
        // reinterpreted when the load's type class differs.
        if let SymByte::Frag(expr, 0) = &bytes[0] {
            let unbroken = bytes.iter().enumerate().all(|(i, byte)| {
                matches!(byte, SymByte::Frag(e, index)
                    if Rc::ptr_eq(e, expr) && *index as usize == i)
            });
            if unbroken && expr.ty().bytes() == width {
                let value = match (kind, expr.ty()) {
                    (LoadKind::I(_), NumTy::I32 | NumTy::I64)
                    | (LoadKind::F(_), NumTy::F32 | NumTy::F64) => SymVal::Num(Rc::clone(expr)),
                    (LoadKind::I(size), NumTy::F32 | NumTy::F64) => {
                        self.term(Expr::Cvt(CvtOp::IReinterpretF(size), Rc::clone(expr)))
                    }
                    (LoadKind::F(size), NumTy::I32 | NumTy::I64) => {
                        self.term(Expr::Cvt(CvtOp::FReinterpretI(size), Rc::clone(expr)))
                    }
                    (LoadKind::IPacked(..), _) => {
                        return Err(Trap::new("unsupported symbolic memory read"))
                    }
                };
                return Ok(value);
            }
        }
        Err(Trap::new("unsupported symbolic memory read"))
    }

    fn store(
        &mut self,
        mem: &mut SymMem,
        addr: usize,
        kind: StoreKind,
        v: &SymVal,
    ) -> Result<(), Trap> {
        let width = kind.width() as usize;
        if let Some(ground) = v.expr().and_then(|expr| expr.as_val()) {
            let mut buffer = vec![0u8; width];
            Concrete.store(&mut buffer, 0, kind, &ground)?;
            for (i, byte) in buffer.into_iter().enumerate() {
                mem.set(addr + i, SymByte::Byte(byte));
            }
            return Ok(());
        }
        let expr = v
            .expr()
            .ok_or_else(|| Trap::new("unsupported symbolic memory write"))?;
        if matches!(kind, StoreKind::IPacked(..)) || expr.ty().bytes() != width {
            return Err(Trap::new("unsupported symbolic memory write"));
        }
        for i in 0..width {
            mem.set(addr + i, SymByte::Frag(Rc::clone(expr), i as u8));
        }
        Ok(())
    }

    fn mem_fill(
        &mut self,
        mem: &mut SymMem,
        dst: usize,
        len: usize,
        byte: &SymVal,
    ) -> Result<(), Trap> {
        match byte.expr().and_then(|expr| expr.as_val()) {
            Some(Val::I32(v)) => {
                for i in 0..len {
                    mem.set(dst + i, SymByte::Byte(v as u8));
                }
                Ok(())
            }
            _ => Err(Trap::new("unsupported symbolic memory write")),
        }
    }

    fn mem_copy(&mut self, mem: &mut SymMem, dst: usize, src: usize, len: usize) {
        let span: Vec<SymByte> = (0..len).map(|i| mem.get(src + i)).collect();
        for (i, byte) in span.into_iter().enumerate() {
            mem.set(dst + i, byte);
        }
    }

    fn mem_init(&mut self, mem: &mut SymMem, dst: usize, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            mem.set(dst + i, SymByte::Byte(*byte));
        }
    }

    fn eval_choice(&mut self, path: &[SymVal], cond: &SymVal) -> Branches {
        let cond = Self::expr_of(cond);
        let folded = expr::fold(Rc::clone(&cond));
        if folded.is_bool_const(true) {
            return Branches::Taken(true);
        }
        if folded.is_bool_const(false) {
            return Branches::Taken(false);
        }
        let negated = expr::fold(Rc::new(Expr::Not(Rc::clone(&cond))));
        let sat_taken = self.sat(path, &cond);
        let sat_fallthrough = self.sat(path, &negated);
        match (sat_taken, sat_fallthrough) {
            (true, true) => Branches::Either,
            (true, false) => Branches::Taken(true),
            (false, true) => Branches::Taken(false),
            (false, false) => {
                log::warn!("path condition became unsatisfiable; pruning to fall-through");
                Branches::Taken(false)
            }
        }
    }
}

/// How one exploration path ended.
#[derive(Debug, Clone)]
pub enum PathOutcome {
    /// The entry function returned these values.
    Returned(Vec<SymVal>),
    /// The path trapped.
    Trapped(Trap),
}

/// One explored path: its outcome and the conditions it assumed.
#[derive(Debug, Clone)]
pub struct PathReport {
    /// The terminal state of the path.
    pub outcome: PathOutcome,
    /// The path condition, in assumption order.
    pub constraints: Vec<SymVal>,
}

impl fmt::Display for PathReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "path [")?;
        for (i, constraint) in self.constraints.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{constraint}")?;
        }
        write!(f, "] -> ")?;
        match &self.outcome {
            PathOutcome::Returned(values) if values.is_empty() => write!(f, "returned"),
            PathOutcome::Returned(values) => {
                write!(f, "returned")?;
                for value in values {
                    write!(f, " {value}")?;
                }
                Ok(())
            }
            PathOutcome::Trapped(trap) => write!(f, "trap: {trap}"),
        }
    }
}

/// Depth-first exploration of all paths through one exported function.
///
/// Forked siblings go onto a LIFO frontier; traps terminate only their
/// own path. The driver stops after `max_paths` terminal paths.
#[derive(Debug, Clone)]
pub struct Explorer {
    /// Bound on the number of reported paths.
    pub max_paths: usize,
}

impl Default for Explorer {
    fn default() -> Self {
        Self { max_paths: 4096 }
    }
}

impl Explorer {
    /// An explorer with the default path bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Explores `name` in `instance`, giving each parameter a fresh
    /// symbol.
    pub fn explore<S: Solver>(
        &self,
        mut store: Store<Symbolic<S>>,
        instance: u32,
        name: &str,
    ) -> Result<Vec<PathReport>, Error> {
        let Some(ExternVal::Func(handle)) = store.export(instance, name) else {
            return Err(Error::instantiation(format!("unknown export {name}")));
        };
        let ty = store.funcs[handle as usize].ty().clone();
        let args = symbolize_params(&mut store.alg, &ty);

        let mut root = Thread::new(store);
        root.stack.extend(args);
        let mut frontier = vec![];
        let mut reports = Vec::new();
        match exec::call(&mut root, handle) {
            Ok(()) => frontier.push(root),
            Err(trap) => reports.push(PathReport {
                outcome: PathOutcome::Trapped(trap),
                constraints: Vec::new(),
            }),
        }

        while let Some(mut thread) = frontier.pop() {
            if reports.len() >= self.max_paths {
                log::warn!(
                    "path bound {} reached; {} threads left unexplored",
                    self.max_paths,
                    frontier.len() + 1
                );
                break;
            }
            let mut forks = exec::Forks::default();
            let outcome = exec::run(&mut thread, &mut forks);
            for (constraints, trap) in forks.trapped {
                reports.push(PathReport {
                    outcome: PathOutcome::Trapped(trap),
                    constraints,
                });
            }
            frontier.extend(forks.live);
            reports.push(PathReport {
                constraints: thread.path.clone(),
                outcome: match outcome {
                    Ok(values) => PathOutcome::Returned(values),
                    Err(trap) => PathOutcome::Trapped(trap),
                },
            });
        }
        log::debug!("explored {} paths of {name}", reports.len());
        Ok(reports)
    }
}

fn symbolize_params<S: Solver>(alg: &mut Symbolic<S>, ty: &FuncType) -> Vec<SymVal> {
    ty.params()
        .iter()
        .map(|param| match param {
            ValType::I32 => alg.fresh(NumTy::I32),
            ValType::I64 => alg.fresh(NumTy::I64),
            ValType::F32 => alg.fresh(NumTy::F32),
            ValType::F64 => alg.fresh(NumTy::F64),
            ValType::Ref(ty) => SymVal::Ref(Ref::Null(*ty)),
        })
        .collect()
}

/// The `symbolic` extern module: fresh symbols plus `assume`/`assert`.
pub fn extern_module<S: Solver + 'static>() -> ExternModule<Symbolic<S>> {
    let sym = |ty: NumTy| {
        move |alg: &mut Symbolic<S>,
              _ctx: &mut crate::store::HostCtx<'_, Symbolic<S>>,
              _args: &[SymVal]| Ok(Some(alg.fresh(ty)))
    };
    ExternModule::new()
        .func("i32", FuncType::new([], [ValType::I32]), sym(NumTy::I32))
        .func("i64", FuncType::new([], [ValType::I64]), sym(NumTy::I64))
        .func("f32", FuncType::new([], [ValType::F32]), sym(NumTy::F32))
        .func("f64", FuncType::new([], [ValType::F64]), sym(NumTy::F64))
        .func(
            "assume",
            FuncType::new([ValType::I32], []),
            |_alg, ctx, args| {
                ctx.path.push(args[0].clone());
                Ok(None)
            },
        )
        .func(
            "assert",
            FuncType::new([ValType::I32], []),
            |alg: &mut Symbolic<S>, ctx, args| {
                let negated = alg.not(&args[0]);
                let negated_expr = Symbolic::<S>::expr_of(&negated);
                if alg.sat(ctx.path, &negated_expr) {
                    return Err(Trap::new("assertion violated"));
                }
                ctx.path.push(args[0].clone());
                Ok(None)
            },
        )
}
