//! Symbolic execution tests: forking at data-dependent branches, path
//! condition accumulation, and the `symbolic` extern module.

use weft::sym::{self, solver::NaiveSolver, Explorer, PathOutcome, SymVal, Symbolic};
use weft::{Linker, Store};
use weft_core::Val;

fn explore(wat: &str, entry: &str) -> Vec<sym::PathReport> {
    let bytes = wat::parse_str(wat).expect("test source must be valid wat");
    let module = weft::load(&bytes).expect("test module must validate");
    let mut store = Store::new(Symbolic::new(NaiveSolver));
    let mut linker = Linker::new();
    linker.define_module(&mut store, "symbolic", sym::extern_module());
    let instance = linker
        .instantiate(&mut store, &module)
        .expect("test module must link");
    Explorer::new()
        .explore(store, instance, entry)
        .expect("exploration must not fail")
}

fn returned_i32(report: &sym::PathReport) -> Option<i32> {
    match &report.outcome {
        PathOutcome::Returned(values) => match values.as_slice() {
            [SymVal::Num(expr)] => match expr.as_val() {
                Some(Val::I32(v)) => Some(v),
                _ => None,
            },
            _ => None,
        },
        PathOutcome::Trapped(_) => None,
    }
}

#[test]
fn branch_on_symbol_forks_into_two_paths() {
    let reports = explore(
        r#"
        (module
          (import "symbolic" "i32" (func $any_i32 (result i32)))
          (func (export "main") (result i32)
            (if (result i32) (i32.gt_s (call $any_i32) (i32.const 0))
              (then (i32.const 1))
              (else (i32.const 0)))))
        "#,
        "main",
    );
    assert_eq!(reports.len(), 2, "exactly two terminal paths");
    let mut returned: Vec<i32> = reports
        .iter()
        .map(|report| returned_i32(report).expect("both paths return a ground i32"))
        .collect();
    returned.sort_unstable();
    assert_eq!(returned, vec![0, 1]);
    for report in &reports {
        assert_eq!(report.constraints.len(), 1, "one assumption per path");
    }
    // One path assumed the comparison, the other its negation.
    let rendered: Vec<String> = reports
        .iter()
        .map(|report| report.constraints[0].to_string())
        .collect();
    assert!(rendered.iter().any(|c| c.contains("Gt") && !c.contains("not")));
    assert!(rendered.iter().any(|c| c.contains("not")));
}

#[test]
fn concrete_branches_do_not_fork() {
    let reports = explore(
        r#"
        (module
          (func (export "main") (result i32)
            (if (result i32) (i32.const 1)
              (then (i32.const 10))
              (else (i32.const 20)))))
        "#,
        "main",
    );
    assert_eq!(reports.len(), 1);
    assert_eq!(returned_i32(&reports[0]), Some(10));
    assert!(reports[0].constraints.is_empty());
}

#[test]
fn symbolic_divisor_forks_a_trapping_path() {
    let reports = explore(
        r#"
        (module
          (import "symbolic" "i32" (func $any_i32 (result i32)))
          (func (export "main") (result i32)
            (i32.div_u (i32.const 100) (call $any_i32))))
        "#,
        "main",
    );
    // One path divides, a sibling path hits the zero divisor.
    assert_eq!(reports.len(), 2);
    let trapped: Vec<_> = reports
        .iter()
        .filter_map(|report| match &report.outcome {
            PathOutcome::Trapped(trap) => Some(trap.to_string()),
            PathOutcome::Returned(_) => None,
        })
        .collect();
    assert_eq!(trapped, vec!["integer divide by zero".to_string()]);
}

#[test]
fn assume_extends_the_path_condition() {
    let reports = explore(
        r#"
        (module
          (import "symbolic" "i32" (func $any_i32 (result i32)))
          (import "symbolic" "assume" (func $assume (param i32)))
          (func (export "main") (result i32)
            (local $x i32)
            (local.set $x (call $any_i32))
            (call $assume (i32.ge_s (local.get $x) (i32.const 0)))
            (local.get $x)))
        "#,
        "main",
    );
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].constraints.len(), 1);
    assert!(reports[0].constraints[0].to_string().contains("Ge"));
}

#[test]
fn failing_assert_terminates_the_path() {
    let reports = explore(
        r#"
        (module
          (import "symbolic" "i32" (func $any_i32 (result i32)))
          (import "symbolic" "assert" (func $assert (param i32)))
          (func (export "main")
            (call $assert (i32.gt_s (call $any_i32) (i32.const 0)))))
        "#,
        "main",
    );
    assert_eq!(reports.len(), 1);
    match &reports[0].outcome {
        PathOutcome::Trapped(trap) => {
            assert!(trap.to_string().contains("assertion violated"));
        }
        other => panic!("expected an assertion failure, got {other:?}"),
    }
}

#[test]
fn ground_assert_passes() {
    let reports = explore(
        r#"
        (module
          (import "symbolic" "assert" (func $assert (param i32)))
          (func (export "main")
            (call $assert (i32.const 1))))
        "#,
        "main",
    );
    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0].outcome, PathOutcome::Returned(_)));
}

#[test]
fn parameters_become_fresh_symbols() {
    let reports = explore(
        r#"
        (module
          (func (export "main") (param i32) (result i32)
            (if (result i32) (local.get 0)
              (then (i32.const 1))
              (else (i32.const 0)))))
        "#,
        "main",
    );
    assert_eq!(reports.len(), 2);
}

#[test]
fn forked_paths_have_independent_memories() {
    let reports = explore(
        r#"
        (module
          (import "symbolic" "i32" (func $any_i32 (result i32)))
          (memory 1)
          (func (export "main") (result i32)
            (if (i32.gt_s (call $any_i32) (i32.const 0))
              (then (i32.store8 (i32.const 0) (i32.const 7))))
            (i32.load8_u (i32.const 0))))
        "#,
        "main",
    );
    assert_eq!(reports.len(), 2);
    let mut returned: Vec<i32> = reports
        .iter()
        .map(|report| returned_i32(report).expect("ground results"))
        .collect();
    returned.sort_unstable();
    // The write in one path is invisible to its sibling.
    assert_eq!(returned, vec![0, 7]);
}

#[test]
fn nested_branches_enumerate_all_paths() {
    let reports = explore(
        r#"
        (module
          (import "symbolic" "i32" (func $any_i32 (result i32)))
          (func (export "main") (result i32)
            (local $acc i32)
            (if (i32.gt_s (call $any_i32) (i32.const 0))
              (then (local.set $acc (i32.const 1))))
            (if (i32.gt_s (call $any_i32) (i32.const 10))
              (then (local.set $acc (i32.add (local.get $acc) (i32.const 2)))))
            (local.get $acc)))
        "#,
        "main",
    );
    assert_eq!(reports.len(), 4, "two independent branches, four paths");
    let mut returned: Vec<i32> = reports
        .iter()
        .map(|report| returned_i32(report).expect("ground results"))
        .collect();
    returned.sort_unstable();
    assert_eq!(returned, vec![0, 1, 2, 3]);
    for report in &reports {
        assert_eq!(report.constraints.len(), 2);
    }
}
