//! The abstract decision procedure the symbolic engine consults.
//!
//! A real SMT backend lives behind this trait; the engine only needs
//! satisfiability of path conditions, term simplification, and named
//! symbol creation. The bundled [`NaiveSolver`] folds ground terms and
//! declares anything residually symbolic satisfiable — sound for path
//! enumeration, deliberately imprecise.

use std::rc::Rc;

use super::expr::{self, Expr, NumTy};

/// The verdict of a satisfiability query.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SatResult {
    /// The assumptions have a model.
    Sat,
    /// The assumptions are contradictory.
    Unsat,
    /// The procedure could not decide.
    Unknown,
}

/// An external decision procedure.
pub trait Solver: Clone {
    /// Is the conjunction of `assumptions` satisfiable?
    fn check_sat(&mut self, assumptions: &[Rc<Expr>]) -> SatResult;

    /// Rewrites a term into a simpler equivalent one.
    fn simplify(&mut self, expr: &Rc<Expr>) -> Rc<Expr>;

    /// The (unique) symbol named `name` of type `ty`.
    fn symbol_of_name(&mut self, name: &str, ty: NumTy) -> Rc<Expr>;
}

/// A solver with no search: constant folding plus optimism.
///
/// A ground-false assumption is [`SatResult::Unsat`]; everything else is
/// [`SatResult::Sat`]. Paths pruned by a precise solver survive here, so
/// exploration over-approximates — acceptable for enumeration, and the
/// interface boundary where a bit-vector backend plugs in.
#[derive(Debug, Copy, Clone, Default)]
pub struct NaiveSolver;

impl Solver for NaiveSolver {
    fn check_sat(&mut self, assumptions: &[Rc<Expr>]) -> SatResult {
        for assumption in assumptions {
            let folded = expr::fold(Rc::clone(assumption));
            if folded.is_bool_const(false) {
                return SatResult::Unsat;
            }
        }
        SatResult::Sat
    }

    fn simplify(&mut self, expr: &Rc<Expr>) -> Rc<Expr> {
        expr::fold(Rc::clone(expr))
    }

    fn symbol_of_name(&mut self, name: &str, ty: NumTy) -> Rc<Expr> {
        Rc::new(Expr::Sym(ty, name.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{IRelOp, NumSize};
    use crate::sym::expr::CmpOp;
    use weft_core::Val;

    #[test]
    fn ground_false_assumptions_are_unsat() {
        let mut solver = NaiveSolver;
        let lhs = Expr::of_val(Val::I32(1));
        let rhs = Expr::of_val(Val::I32(2));
        let eq = Rc::new(Expr::Cmp(CmpOp::I(NumSize::S32, IRelOp::Eq), lhs, rhs));
        assert_eq!(solver.check_sat(&[eq]), SatResult::Unsat);
    }

    #[test]
    fn residually_symbolic_assumptions_are_sat() {
        let mut solver = NaiveSolver;
        let x = solver.symbol_of_name("x", NumTy::I32);
        let zero = Expr::of_val(Val::I32(0));
        let gt = Rc::new(Expr::Cmp(CmpOp::I(NumSize::S32, IRelOp::Gt(crate::ast::Sign::S)), x, zero));
        assert_eq!(solver.check_sat(&[gt]), SatResult::Sat);
    }

    #[test]
    fn simplify_folds_ground_terms() {
        let mut solver = NaiveSolver;
        let lhs = Expr::of_val(Val::I32(40));
        let rhs = Expr::of_val(Val::I32(2));
        let add = Rc::new(Expr::Binop(
            crate::sym::expr::BinOp::I(NumSize::S32, crate::ast::IBinOp::Add),
            lhs,
            rhs,
        ));
        let folded = solver.simplify(&add);
        assert_eq!(folded.as_val(), Some(Val::I32(42)));
    }
}
