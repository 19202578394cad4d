//! Script-runner tests over inline `.wast` sources.

use weft_wast::WastRunner;

fn run(source: &str) -> anyhow::Result<()> {
    WastRunner::new().run_script("inline.wast", source)
}

#[test]
fn invoke_and_assert_return() {
    run(r#"
        (module
          (func (export "add") (param i32 i32) (result i32)
            (i32.add (local.get 0) (local.get 1)))
          (func (export "fma") (param f64 f64 f64) (result f64)
            (f64.add (f64.mul (local.get 0) (local.get 1)) (local.get 2))))
        (assert_return (invoke "add" (i32.const 1) (i32.const 2)) (i32.const 3))
        (assert_return (invoke "add" (i32.const -1) (i32.const 1)) (i32.const 0))
        (assert_return (invoke "fma" (f64.const 2) (f64.const 3) (f64.const 1)) (f64.const 7))
    "#)
    .unwrap();
}

#[test]
fn assert_trap_matches_messages() {
    run(r#"
        (module
          (func (export "div") (param i32 i32) (result i32)
            (i32.div_s (local.get 0) (local.get 1)))
          (func (export "crash") unreachable))
        (assert_trap (invoke "div" (i32.const 1) (i32.const 0)) "integer divide by zero")
        (assert_trap (invoke "div" (i32.const -2147483648) (i32.const -1)) "integer overflow")
        (assert_trap (invoke "crash") "unreachable")
    "#)
    .unwrap();
}

#[test]
fn mismatched_assert_return_fails() {
    let err = run(r#"
        (module (func (export "two") (result i32) (i32.const 2)))
        (assert_return (invoke "two") (i32.const 3))
    "#)
    .unwrap_err();
    assert!(format!("{err:#}").contains("expected"));
}

#[test]
fn assert_invalid_and_malformed() {
    run(r#"
        (assert_invalid
          (module (func (result i32) (i64.const 0)))
          "type mismatch")
        (assert_invalid
          (module (func $s (param i32)) (start $s))
          "start function")
        (assert_malformed
          (module binary "\00asm\02\00\00\00")
          "unknown binary version")
    "#)
    .unwrap();
}

#[test]
fn register_makes_instances_importable() {
    run(r#"
        (module $provider
          (func (export "three") (result i32) (i32.const 3)))
        (register "env" $provider)
        (module
          (import "env" "three" (func $three (result i32)))
          (func (export "six") (result i32)
            (i32.add (call $three) (call $three))))
        (assert_return (invoke "six") (i32.const 6))
    "#)
    .unwrap();
}

#[test]
fn spectest_module_is_available() {
    run(r#"
        (module
          (import "spectest" "global_i32" (global $g i32))
          (import "spectest" "memory" (memory 1))
          (func (export "g") (result i32) (global.get $g)))
        (assert_return (invoke "g") (i32.const 666))
    "#)
    .unwrap();
}

#[test]
fn nan_patterns_match_canonical_nans() {
    run(r#"
        (module
          (func (export "div0") (result f32)
            (f32.div (f32.const 0) (f32.const 0))))
        (assert_return (invoke "div0") (f32.const nan:canonical))
        (assert_return (invoke "div0") (f32.const nan:arithmetic))
    "#)
    .unwrap();
}

#[test]
fn state_persists_across_invocations() {
    run(r#"
        (module
          (memory 1)
          (func (export "set") (param i32 i32)
            (i32.store (local.get 0) (local.get 1)))
          (func (export "get") (param i32) (result i32)
            (i32.load (local.get 0))))
        (invoke "set" (i32.const 16) (i32.const 12345))
        (assert_return (invoke "get" (i32.const 16)) (i32.const 12345))
    "#)
    .unwrap();
}
