//! A runner for reference test-suite scripts.
//!
//! Directives are evaluated sequentially: `module` decodes, validates and
//! links a module, `register` makes an instance importable by later
//! modules, `invoke` calls exports, and the `assert_*` directives check
//! results, traps, malformedness and invalidity. The textual front-end is
//! the `wast` crate; module sources are encoded to binary and fed through
//! the regular decoder.

use std::collections::HashMap;

use anyhow::{bail, Context as _, Result};
use weft::{Concrete, ExternModule, Linker, Store};
use weft_core::{FuncType, Val, ValType, F32, F64};
use wast::{
    core::{AbstractHeapType, HeapType, NanPattern, WastArgCore, WastRetCore},
    lexer::Lexer,
    parser::ParseBuffer,
    token::Id,
    QuoteWat,
    WastArg,
    WastDirective,
    WastExecute,
    WastRet,
    Wat,
};

/// The context of a single script run.
pub struct WastRunner {
    /// Resolves imports of later modules against registered instances.
    linker: Linker,
    /// Owns every instance the script creates.
    store: Store<Concrete>,
    /// Instances by `$id`.
    instances: HashMap<String, u32>,
    /// The most recently instantiated module.
    current: Option<u32>,
    /// Results of the last invocation.
    results: Vec<Val>,
}

impl Default for WastRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl WastRunner {
    /// A fresh runner with the `spectest` host module registered.
    pub fn new() -> Self {
        let mut store = Store::new(Concrete);
        let mut linker = Linker::new();
        register_spectest(&mut linker, &mut store);
        Self {
            linker,
            store,
            instances: HashMap::new(),
            current: None,
            results: Vec::new(),
        }
    }

    /// Runs every directive of the given `.wast` source.
    pub fn run_script(&mut self, filename: &str, source: &str) -> Result<()> {
        let enhance = |mut err: wast::Error| {
            err.set_path(filename.as_ref());
            err.set_text(source);
            err
        };
        let mut lexer = Lexer::new(source);
        lexer.allow_confusing_unicode(true);
        let buffer = ParseBuffer::new_with_lexer(lexer).map_err(enhance)?;
        let directives = wast::parser::parse::<wast::Wast>(&buffer)
            .map_err(enhance)?
            .directives;
        for directive in directives {
            let span = directive.span();
            self.directive(directive).with_context(|| {
                let (line, col) = span.linecol_in(source);
                format!("failed directive at {}:{}:{}", filename, line + 1, col + 1)
            })?;
        }
        Ok(())
    }

    fn directive(&mut self, directive: WastDirective) -> Result<()> {
        match directive {
            WastDirective::Module(module) => {
                let (name, bytes) = encode(module)?;
                self.instantiate(name, &bytes)?;
            }
            WastDirective::Register { name, module, .. } => {
                let instance = self.instance_of(module)?;
                self.linker.register(name, instance);
            }
            WastDirective::Invoke(invoke) => {
                self.invoke(invoke)?;
            }
            WastDirective::AssertMalformed {
                module: module @ QuoteWat::Wat(Wat::Module(_)),
                message,
                ..
            } => {
                let (_, bytes) = encode(module)?;
                match weft::load(&bytes) {
                    Ok(_) => bail!("module decoded but should be malformed: {message}"),
                    Err(error) => log::debug!("malformed as expected: {error}"),
                }
            }
            // Quoted modules fail in the text parser itself; nothing for
            // the binary pipeline to check.
            WastDirective::AssertMalformed { .. } => {}
            WastDirective::AssertInvalid {
                module, message, ..
            } => {
                let (_, bytes) = encode(module)?;
                match weft::load(&bytes) {
                    Ok(_) => bail!("module validated but should be invalid: {message}"),
                    Err(error) => log::debug!("invalid as expected: {error}"),
                }
            }
            WastDirective::AssertUnlinkable {
                module: Wat::Module(module),
                message,
                ..
            } => {
                let (name, bytes) = encode(QuoteWat::Wat(Wat::Module(module)))?;
                let module = weft::load(&bytes)?;
                if self
                    .linker
                    .instantiate(&mut self.store, &module)
                    .inspect(|instance| {
                        if let Some(name) = name {
                            self.instances.insert(name, *instance);
                        }
                    })
                    .is_ok()
                {
                    bail!("module linked but should be unlinkable: {message}")
                }
            }
            WastDirective::AssertUnlinkable { .. } => {
                bail!("unsupported assert_unlinkable form")
            }
            WastDirective::AssertTrap { exec, message, .. } => match self.execute(exec) {
                Ok(()) => bail!(
                    "expected a trap with message '{message}' but got: {:?}",
                    self.results
                ),
                Err(error) => check_trap(&error, message)?,
            },
            WastDirective::AssertReturn { exec, results, .. } => {
                self.execute(exec)?;
                self.check_results(&results)?;
            }
            WastDirective::AssertExhaustion { call, message, .. } => match self.invoke(call) {
                Ok(()) => bail!(
                    "expected exhaustion '{message}' but got: {:?}",
                    self.results
                ),
                Err(error) => check_trap(&error, message)?,
            },
            unsupported => bail!("unsupported Wast directive: {unsupported:?}"),
        }
        Ok(())
    }

    fn instantiate(&mut self, name: Option<String>, bytes: &[u8]) -> Result<u32> {
        let module = weft::load(bytes)?;
        let instance = self.linker.instantiate(&mut self.store, &module)?;
        if let Some(name) = name {
            self.instances.insert(name, instance);
        }
        self.current = Some(instance);
        Ok(instance)
    }

    fn instance_of(&self, id: Option<Id>) -> Result<u32> {
        match id {
            Some(id) => self
                .instances
                .get(id.name())
                .copied()
                .with_context(|| format!("unknown module ${}", id.name())),
            None => self.current.context("no module has been instantiated"),
        }
    }

    fn execute(&mut self, exec: WastExecute) -> Result<()> {
        self.results.clear();
        match exec {
            WastExecute::Invoke(invoke) => self.invoke(invoke),
            WastExecute::Wat(Wat::Module(module)) => {
                let (name, bytes) = encode(QuoteWat::Wat(Wat::Module(module)))?;
                self.instantiate(name, &bytes)?;
                Ok(())
            }
            WastExecute::Get { module, global, .. } => {
                let instance = self.instance_of(module)?;
                let value = self.get_global(instance, global)?;
                self.results.push(value);
                Ok(())
            }
            _ => bail!("unsupported execution directive"),
        }
    }

    fn invoke(&mut self, invoke: wast::WastInvoke) -> Result<()> {
        let instance = self.instance_of(invoke.module)?;
        let mut args = Vec::with_capacity(invoke.args.len());
        for arg in &invoke.args {
            args.push(arg_value(arg)?);
        }
        self.results = weft::invoke(&mut self.store, instance, invoke.name, &args)?;
        Ok(())
    }

    fn get_global(&self, instance: u32, name: &str) -> Result<Val> {
        match self.store.export(instance, name) {
            Some(weft::ExternVal::Global(handle)) => {
                Ok(self.store.globals[handle as usize].value)
            }
            _ => bail!("missing global export {name}"),
        }
    }

    fn check_results(&self, expected: &[WastRet]) -> Result<()> {
        anyhow::ensure!(
            self.results.len() == expected.len(),
            "expected {} results but got {}",
            expected.len(),
            self.results.len(),
        );
        for (result, expected) in self.results.iter().zip(expected) {
            let WastRet::Core(expected) = expected else {
                bail!("unsupported Wast result: {expected:?}")
            };
            check_result(result, expected)?;
        }
        Ok(())
    }
}

fn encode(mut module: QuoteWat<'_>) -> Result<(Option<String>, Vec<u8>)> {
    let name = module.name().map(|id| id.name().to_string());
    let bytes = module.encode()?;
    Ok((name, bytes))
}

fn arg_value(arg: &WastArg) -> Result<Val> {
    let WastArg::Core(arg) = arg else {
        bail!("unsupported Wast argument: {arg:?}")
    };
    Ok(match arg {
        WastArgCore::I32(v) => Val::I32(*v),
        WastArgCore::I64(v) => Val::I64(*v),
        WastArgCore::F32(v) => Val::F32(F32::from_bits(v.bits)),
        WastArgCore::F64(v) => Val::F64(F64::from_bits(v.bits)),
        WastArgCore::RefNull(HeapType::Abstract {
            ty: AbstractHeapType::Func,
            ..
        }) => Val::FuncRef(None),
        WastArgCore::RefNull(HeapType::Abstract {
            ty: AbstractHeapType::Extern,
            ..
        }) => Val::ExternRef(None),
        WastArgCore::RefExtern(v) => Val::ExternRef(Some(*v)),
        _ => bail!("unsupported WastArgCore argument: {arg:?}"),
    })
}

fn check_result(result: &Val, expected: &WastRetCore) -> Result<()> {
    let matched = match (result, expected) {
        (Val::I32(result), WastRetCore::I32(expected)) => result == expected,
        (Val::I64(result), WastRetCore::I64(expected)) => result == expected,
        (Val::F32(result), WastRetCore::F32(expected)) => f32_matches(result, expected),
        (Val::F64(result), WastRetCore::F64(expected)) => f64_matches(result, expected),
        (
            Val::FuncRef(result),
            WastRetCore::RefNull(Some(HeapType::Abstract {
                ty: AbstractHeapType::Func,
                ..
            })),
        ) => result.is_none(),
        (
            Val::ExternRef(result),
            WastRetCore::RefNull(Some(HeapType::Abstract {
                ty: AbstractHeapType::Extern,
                ..
            })),
        ) => result.is_none(),
        (Val::FuncRef(result), WastRetCore::RefFunc(None)) => result.is_some(),
        (Val::ExternRef(result), WastRetCore::RefExtern(Some(expected))) => {
            *result == Some(*expected)
        }
        (Val::ExternRef(result), WastRetCore::RefExtern(None)) => result.is_none(),
        _ => false,
    };
    if !matched {
        bail!("expected {expected:?} but found {result:?}")
    }
    Ok(())
}

/// Canonical NaNs have all exponent bits and only the payload MSB set;
/// arithmetic NaNs additionally allow lower payload bits.
fn f32_matches(actual: &F32, expected: &NanPattern<wast::token::F32>) -> bool {
    let bits = actual.to_bits();
    match expected {
        NanPattern::CanonicalNan => (bits & 0x7fff_ffff) == 0x7fc0_0000,
        NanPattern::ArithmeticNan => {
            (bits & 0x7f80_0000) == 0x7f80_0000 && (bits & 0x0040_0000) == 0x0040_0000
        }
        NanPattern::Value(expected) => bits == expected.bits,
    }
}

fn f64_matches(actual: &F64, expected: &NanPattern<wast::token::F64>) -> bool {
    let bits = actual.to_bits();
    match expected {
        NanPattern::CanonicalNan => (bits & 0x7fff_ffff_ffff_ffff) == 0x7ff8_0000_0000_0000,
        NanPattern::ArithmeticNan => {
            (bits & 0x7ff0_0000_0000_0000) == 0x7ff0_0000_0000_0000
                && (bits & 0x0008_0000_0000_0000) == 0x0008_0000_0000_0000
        }
        NanPattern::Value(expected) => bits == expected.bits,
    }
}

fn check_trap(error: &anyhow::Error, message: &str) -> Result<()> {
    let rendered = match error.downcast_ref::<weft::Error>() {
        Some(error) => error.to_string(),
        None => bail!("expected a trap with message '{message}' but got: {error}"),
    };
    if !rendered.contains(message) && !message.contains(&rendered) {
        bail!("trapped with '{rendered}' but expected '{message}'")
    }
    Ok(())
}

/// The `spectest` host module the reference suite imports from.
fn register_spectest(linker: &mut Linker, store: &mut Store<Concrete>) {
    use weft::ast::{GlobalType, Limits, MemType, TableType};
    use weft_core::RefType;

    let print = |name: &'static str, params: &[ValType]| {
        (
            name,
            FuncType::new(params.to_vec(), []),
            move |_alg: &mut Concrete,
                  _ctx: &mut weft::store::HostCtx<'_, Concrete>,
                  args: &[Val]| {
                println!("print: {args:?}");
                Ok(None)
            },
        )
    };

    let mut module = ExternModule::new();
    for (name, ty, func) in [
        print("print", &[]),
        print("print_i32", &[ValType::I32]),
        print("print_i64", &[ValType::I64]),
        print("print_f32", &[ValType::F32]),
        print("print_f64", &[ValType::F64]),
        print("print_i32_f32", &[ValType::I32, ValType::F32]),
        print("print_f64_f64", &[ValType::F64, ValType::F64]),
    ] {
        module = module.func(name, ty, func);
    }
    let module = module
        .global(
            "global_i32",
            GlobalType {
                ty: ValType::I32,
                mutable: false,
            },
            Val::I32(666),
        )
        .global(
            "global_i64",
            GlobalType {
                ty: ValType::I64,
                mutable: false,
            },
            Val::I64(666),
        )
        .global(
            "global_f32",
            GlobalType {
                ty: ValType::F32,
                mutable: false,
            },
            Val::F32(F32::from_bits(0x4426_a666)),
        )
        .global(
            "global_f64",
            GlobalType {
                ty: ValType::F64,
                mutable: false,
            },
            Val::F64(F64::from_bits(0x4084_d4cc_cccc_cccd)),
        )
        .table(
            "table",
            TableType {
                limits: Limits {
                    min: 10,
                    max: Some(20),
                },
                elem: RefType::Func,
            },
        )
        .memory(
            "memory",
            MemType {
                limits: Limits {
                    min: 1,
                    max: Some(2),
                },
            },
        );
    linker.define_module(store, "spectest", module);
}
