//! End-to-end tests: WAT sources are lowered to binary by the `wat`
//! front-end, then decoded, rewritten, validated, linked and executed.

use assert_matches::assert_matches;
use weft::{Concrete, Error, Linker, Store};
use weft_core::{TrapCode, Val};

fn load(wat: &str) -> Result<weft::Module, Error> {
    let bytes = wat::parse_str(wat).expect("test source must be valid wat");
    weft::load(&bytes)
}

fn instantiate(wat: &str) -> (Store<Concrete>, u32) {
    let module = load(wat).expect("test module must validate");
    let mut store = Store::new(Concrete);
    let mut linker = Linker::new();
    let instance = linker
        .instantiate(&mut store, &module)
        .expect("test module must link");
    (store, instance)
}

fn invoke(store: &mut Store<Concrete>, instance: u32, name: &str, args: &[Val]) -> Vec<Val> {
    weft::invoke(store, instance, name, args).expect("invocation must succeed")
}

fn invoke_trap(store: &mut Store<Concrete>, instance: u32, name: &str, args: &[Val]) -> TrapCode {
    match weft::invoke(store, instance, name, args) {
        Err(Error::Trap(trap)) => trap.code().expect("expected an instruction trap"),
        other => panic!("expected a trap, got {other:?}"),
    }
}

#[test]
fn branch_to_loop_counts_down() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "countdown") (param i32) (result i32)
            (loop $continue
              (if (local.get 0)
                (then
                  (local.set 0 (i32.sub (local.get 0) (i32.const 1)))
                  (br $continue))))
            local.get 0)
          (func (export "countup") (param i32) (result i32)
            i32.const 0
            (loop $l (param i32) (result i32)
              i32.const 1
              i32.add
              local.get 0
              i32.const 1
              i32.sub
              local.tee 0
              br_if $l)))
        "#,
    );
    assert_eq!(
        invoke(&mut store, instance, "countdown", &[Val::I32(5)]),
        vec![Val::I32(0)]
    );
    assert_eq!(
        invoke(&mut store, instance, "countdown", &[Val::I32(0)]),
        vec![Val::I32(0)]
    );
    // The loop parameter accumulates one per iteration.
    assert_eq!(
        invoke(&mut store, instance, "countup", &[Val::I32(3)]),
        vec![Val::I32(3)]
    );
}

#[test]
fn passive_data_segment_bounds() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1)
          (data $seg "x")
          (func (export "init") (param i32 i32 i32)
            (memory.init $seg (local.get 0) (local.get 1) (local.get 2)))
          (func (export "drop") (data.drop $seg))
          (func (export "peek") (param i32) (result i32)
            (i32.load8_u (local.get 0))))
        "#,
    );
    // In bounds: one byte from the segment.
    invoke(&mut store, instance, "init", &[Val::I32(7), Val::I32(0), Val::I32(1)]);
    assert_eq!(
        invoke(&mut store, instance, "peek", &[Val::I32(7)]),
        vec![Val::I32(b'x' as i32)]
    );
    // Out of segment bounds.
    assert_eq!(
        invoke_trap(
            &mut store,
            instance,
            "init",
            &[Val::I32(0), Val::I32(0), Val::I32(2)]
        ),
        TrapCode::OutOfBoundsMemoryAccess
    );
    // Zero-length copies are always fine.
    invoke(&mut store, instance, "init", &[Val::I32(0), Val::I32(0), Val::I32(0)]);
    // Once dropped, the segment behaves as zero-length.
    invoke(&mut store, instance, "drop", &[]);
    assert_eq!(
        invoke_trap(
            &mut store,
            instance,
            "init",
            &[Val::I32(0), Val::I32(0), Val::I32(1)]
        ),
        TrapCode::OutOfBoundsMemoryAccess
    );
    invoke(&mut store, instance, "init", &[Val::I32(0), Val::I32(0), Val::I32(0)]);
}

#[test]
fn indirect_call_type_mismatch() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $void (func))
          (func $inc (param i32) (result i32)
            (i32.add (local.get 0) (i32.const 1)))
          (table 2 funcref)
          (elem (i32.const 0) $inc)
          (func (export "mismatch")
            (call_indirect (type $void) (i32.const 0)))
          (func (export "null")
            (call_indirect (type $void) (i32.const 1)))
          (func (export "oob")
            (call_indirect (type $void) (i32.const 9)))
          (func (export "ok") (param i32) (result i32)
            (call_indirect (param i32) (result i32) (local.get 0) (i32.const 0))))
        "#,
    );
    assert_eq!(
        invoke_trap(&mut store, instance, "mismatch", &[]),
        TrapCode::IndirectCallTypeMismatch
    );
    assert_eq!(
        invoke_trap(&mut store, instance, "null", &[]),
        TrapCode::UninitializedElement
    );
    assert_eq!(
        invoke_trap(&mut store, instance, "oob", &[]),
        TrapCode::UndefinedElement
    );
    assert_eq!(
        invoke(&mut store, instance, "ok", &[Val::I32(41)]),
        vec![Val::I32(42)]
    );
}

#[test]
fn memory_access_boundaries() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1)
          (func (export "load8") (param i32) (result i32)
            (i32.load8_u (local.get 0)))
          (func (export "load32") (param i32) (result i32)
            (i32.load (local.get 0)))
          (func (export "store32") (param i32 i32)
            (i32.store (local.get 0) (local.get 1)))
          (func (export "grow") (param i32) (result i32)
            (memory.grow (local.get 0)))
          (func (export "size") (result i32) (memory.size)))
        "#,
    );
    // The very last byte of the page is accessible.
    assert_eq!(
        invoke(&mut store, instance, "load8", &[Val::I32(65535)]),
        vec![Val::I32(0)]
    );
    // One past the end is not.
    assert_eq!(
        invoke_trap(&mut store, instance, "load8", &[Val::I32(65536)]),
        TrapCode::OutOfBoundsMemoryAccess
    );
    // A four-byte access must fit entirely.
    assert_eq!(
        invoke(&mut store, instance, "load32", &[Val::I32(65532)]),
        vec![Val::I32(0)]
    );
    assert_eq!(
        invoke_trap(&mut store, instance, "load32", &[Val::I32(65533)]),
        TrapCode::OutOfBoundsMemoryAccess
    );
    // Negative addresses are large unsigned addresses.
    assert_eq!(
        invoke_trap(&mut store, instance, "load8", &[Val::I32(-1)]),
        TrapCode::OutOfBoundsMemoryAccess
    );
    // Growing extends the accessible range.
    assert_eq!(
        invoke(&mut store, instance, "grow", &[Val::I32(1)]),
        vec![Val::I32(1)]
    );
    assert_eq!(invoke(&mut store, instance, "size", &[]), vec![Val::I32(2)]);
    invoke(&mut store, instance, "store32", &[Val::I32(65536), Val::I32(-1)]);
    assert_eq!(
        invoke(&mut store, instance, "load32", &[Val::I32(65536)]),
        vec![Val::I32(-1)]
    );
}

#[test]
fn trapping_integer_arithmetic() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "div") (param i32 i32) (result i32)
            (i32.div_s (local.get 0) (local.get 1)))
          (func (export "rem") (param i32 i32) (result i32)
            (i32.rem_s (local.get 0) (local.get 1)))
          (func (export "trunc") (param f64) (result i32)
            (i32.trunc_f64_s (local.get 0)))
          (func (export "trunc_sat") (param f64) (result i32)
            (i32.trunc_sat_f64_s (local.get 0))))
        "#,
    );
    assert_eq!(
        invoke(&mut store, instance, "div", &[Val::I32(-7), Val::I32(2)]),
        vec![Val::I32(-3)]
    );
    assert_eq!(
        invoke_trap(&mut store, instance, "div", &[Val::I32(1), Val::I32(0)]),
        TrapCode::IntegerDivideByZero
    );
    assert_eq!(
        invoke_trap(
            &mut store,
            instance,
            "div",
            &[Val::I32(i32::MIN), Val::I32(-1)]
        ),
        TrapCode::IntegerOverflow
    );
    assert_eq!(
        invoke_trap(
            &mut store,
            instance,
            "rem",
            &[Val::I32(i32::MIN), Val::I32(-1)]
        ),
        TrapCode::IntegerOverflow
    );
    assert_eq!(
        invoke_trap(
            &mut store,
            instance,
            "trunc",
            &[Val::F64(2147483648.0f64.into())]
        ),
        TrapCode::IntegerOverflow
    );
    assert_eq!(
        invoke_trap(
            &mut store,
            instance,
            "trunc",
            &[Val::F64(f64::NAN.into())]
        ),
        TrapCode::InvalidConversionToInt
    );
    // The saturating form clamps instead.
    assert_eq!(
        invoke(
            &mut store,
            instance,
            "trunc_sat",
            &[Val::F64(2147483648.0f64.into())]
        ),
        vec![Val::I32(i32::MAX)]
    );
    assert_eq!(
        invoke(
            &mut store,
            instance,
            "trunc_sat",
            &[Val::F64(f64::NAN.into())]
        ),
        vec![Val::I32(0)]
    );
}

#[test]
fn br_table_dispatch() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "classify") (param i32) (result i32)
            (block $default
              (block $two
                (block $one
                  (block $zero
                    (br_table $zero $one $two $default (local.get 0)))
                  (return (i32.const 100)))
                (return (i32.const 101)))
              (return (i32.const 102)))
            i32.const 103))
        "#,
    );
    for (input, expected) in [(0, 100), (1, 101), (2, 102), (3, 103), (-1, 103)] {
        assert_eq!(
            invoke(&mut store, instance, "classify", &[Val::I32(input)]),
            vec![Val::I32(expected)],
            "classify({input})"
        );
    }
}

#[test]
fn globals_and_cross_module_imports() {
    let provider = r#"
        (module
          (global (export "base") i32 (i32.const 40))
          (func (export "offset") (result i32) (i32.const 2)))
    "#;
    let consumer = r#"
        (module
          (import "provider" "base" (global $base i32))
          (import "provider" "offset" (func $offset (result i32)))
          (global $counter (mut i32) (global.get $base))
          (func (export "bump") (result i32)
            (global.set $counter (i32.add (global.get $counter) (call $offset)))
            global.get $counter))
    "#;
    let mut store = Store::new(Concrete);
    let mut linker = Linker::new();
    let provider_module = load(provider).unwrap();
    let provider_instance = linker.instantiate(&mut store, &provider_module).unwrap();
    linker.register("provider", provider_instance);
    let consumer_module = load(consumer).unwrap();
    let consumer_instance = linker.instantiate(&mut store, &consumer_module).unwrap();
    assert_eq!(
        invoke(&mut store, consumer_instance, "bump", &[]),
        vec![Val::I32(42)]
    );
    assert_eq!(
        invoke(&mut store, consumer_instance, "bump", &[]),
        vec![Val::I32(44)]
    );
}

#[test]
fn unknown_imports_fail_to_link() {
    let module = load(r#"(module (import "nowhere" "f" (func)))"#).unwrap();
    let mut store = Store::new(Concrete);
    let mut linker = Linker::new();
    let err = linker.instantiate(&mut store, &module).unwrap_err();
    assert_matches!(err, Error::Instantiation(_));
    assert!(err.to_string().contains("unknown import"));
}

#[test]
fn incompatible_import_type_fails_to_link() {
    let provider = load(r#"(module (func (export "f") (param i32)))"#).unwrap();
    let consumer = load(r#"(module (import "provider" "f" (func (param i64))))"#).unwrap();
    let mut store = Store::new(Concrete);
    let mut linker = Linker::new();
    let instance = linker.instantiate(&mut store, &provider).unwrap();
    linker.register("provider", instance);
    let err = linker.instantiate(&mut store, &consumer).unwrap_err();
    assert_matches!(err, Error::Instantiation(_));
    assert!(err.to_string().contains("incompatible import type"));
}

#[test]
fn start_function_runs_before_first_call() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (global $ready (mut i32) (i32.const 0))
          (func $setup (global.set $ready (i32.const 1)))
          (start $setup)
          (func (export "ready") (result i32) (global.get $ready)))
        "#,
    );
    assert_eq!(invoke(&mut store, instance, "ready", &[]), vec![Val::I32(1)]);
}

#[test]
fn start_function_signature_is_checked() {
    let err = load(r#"(module (func $s (param i32)) (start $s))"#).unwrap_err();
    assert_matches!(err, Error::Validation(_));
    assert_eq!(err.to_string(), "start function");
}

#[test]
fn unreachable_stack_is_polymorphic() {
    load(r#"(module (func (result i32) (block (result i32) unreachable)))"#)
        .expect("the unreachable stack absorbs the required result");
    load(r#"(module (func (result i32) unreachable i64.const 0 i32.add))"#)
        .expect_err("concrete types after unreachable still collide");
    let err = load(r#"(module (func (result i32) (block (result i32))))"#).unwrap_err();
    assert_eq!(err.to_string(), "type mismatch");
}

#[test]
fn table_ops_and_funcrefs() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (table $t (export "table") 4 funcref)
          (elem declare func $f)
          (func $f (result i32) (i32.const 7))
          (func (export "fill") (param i32 i32)
            (table.fill $t (local.get 0) (ref.func $f) (local.get 1)))
          (func (export "call") (param i32) (result i32)
            (call_indirect $t (result i32) (local.get 0)))
          (func (export "size") (result i32) (table.size $t))
          (func (export "grow") (param i32) (result i32)
            (table.grow $t (ref.null func) (local.get 0)))
          (func (export "is_null") (param i32) (result i32)
            (ref.is_null (table.get $t (local.get 0)))))
        "#,
    );
    assert_eq!(invoke(&mut store, instance, "size", &[]), vec![Val::I32(4)]);
    assert_eq!(
        invoke(&mut store, instance, "is_null", &[Val::I32(0)]),
        vec![Val::I32(1)]
    );
    invoke(&mut store, instance, "fill", &[Val::I32(1), Val::I32(2)]);
    assert_eq!(
        invoke(&mut store, instance, "is_null", &[Val::I32(1)]),
        vec![Val::I32(0)]
    );
    assert_eq!(
        invoke(&mut store, instance, "call", &[Val::I32(2)]),
        vec![Val::I32(7)]
    );
    assert_eq!(
        invoke_trap(&mut store, instance, "call", &[Val::I32(0)]),
        TrapCode::UninitializedElement
    );
    assert_eq!(
        invoke(&mut store, instance, "grow", &[Val::I32(2)]),
        vec![Val::I32(4)]
    );
    assert_eq!(invoke(&mut store, instance, "size", &[]), vec![Val::I32(6)]);
}

#[test]
fn active_segments_initialise_in_declaration_order() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1)
          (data (i32.const 0) "aaaa")
          (data (i32.const 2) "bb")
          (func (export "peek") (param i32) (result i32)
            (i32.load8_u (local.get 0))))
        "#,
    );
    assert_eq!(
        invoke(&mut store, instance, "peek", &[Val::I32(1)]),
        vec![Val::I32(b'a' as i32)]
    );
    // The later segment overwrote the earlier one.
    assert_eq!(
        invoke(&mut store, instance, "peek", &[Val::I32(2)]),
        vec![Val::I32(b'b' as i32)]
    );
}

#[test]
fn active_segment_out_of_bounds_traps_at_link_time() {
    let module = load(
        r#"
        (module
          (memory 1)
          (data (i32.const 65535) "xy"))
        "#,
    )
    .unwrap();
    let mut store = Store::new(Concrete);
    let mut linker = Linker::new();
    match linker.instantiate(&mut store, &module) {
        Err(Error::Trap(trap)) => {
            assert_eq!(trap.code(), Some(TrapCode::OutOfBoundsMemoryAccess));
        }
        other => panic!("expected an out-of-bounds trap, got {other:?}"),
    }
}

#[test]
fn float_arithmetic_canonicalises_nans() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "add") (param f32 f32) (result f32)
            (f32.add (local.get 0) (local.get 1)))
          (func (export "neg") (param f32) (result f32)
            (f32.neg (local.get 0))))
        "#,
    );
    let nan_payload = weft_core::F32::from_bits(0x7f80_0001);
    let results = invoke(
        &mut store,
        instance,
        "add",
        &[Val::F32(nan_payload), Val::F32(1.0f32.into())],
    );
    let Val::F32(result) = results[0] else {
        panic!("expected an f32 result")
    };
    assert_eq!(result.to_bits(), weft_core::F32::CANONICAL_NAN.to_bits());
    // Sign manipulation preserves payloads.
    let results = invoke(&mut store, instance, "neg", &[Val::F32(nan_payload)]);
    let Val::F32(result) = results[0] else {
        panic!("expected an f32 result")
    };
    assert_eq!(result.to_bits(), 0xff80_0001);
}

#[test]
fn select_and_locals() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "pick") (param i32 i64 i64) (result i64)
            (select (local.get 1) (local.get 2) (local.get 0))))
        "#,
    );
    assert_eq!(
        invoke(
            &mut store,
            instance,
            "pick",
            &[Val::I32(1), Val::I64(10), Val::I64(20)]
        ),
        vec![Val::I64(10)]
    );
    assert_eq!(
        invoke(
            &mut store,
            instance,
            "pick",
            &[Val::I32(0), Val::I64(10), Val::I64(20)]
        ),
        vec![Val::I64(20)]
    );
}

#[test]
fn call_stack_exhaustion_traps() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func $loop (export "loop") (call $loop)))
        "#,
    );
    assert_eq!(
        invoke_trap(&mut store, instance, "loop", &[]),
        TrapCode::StackOverflow
    );
}
