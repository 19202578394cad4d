use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, bail, Context as _, Result};
use weft_core::{FuncType, Val, ValType, F32, F64};

/// Reads a module from disk; textual modules are lowered to binary by the
/// `wat` front-end, anything already carrying the binary header is used
/// as-is.
pub fn read_module_bytes(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {path:?}"))?;
    if bytes.starts_with(b"\0asm") {
        return Ok(bytes);
    }
    let source = String::from_utf8(bytes)
        .map_err(|_| anyhow!("{path:?} is neither binary Wasm nor UTF-8 text"))?;
    wat::parse_str(&source).with_context(|| format!("failed to parse {path:?}"))
}

/// Parses positional CLI strings as the invoked function's parameters.
pub fn decode_func_args(ty: &FuncType, args: &[String]) -> Result<Vec<Val>> {
    if args.len() != ty.params().len() {
        bail!(
            "expected {} arguments but got {}",
            ty.params().len(),
            args.len()
        );
    }
    args.iter()
        .zip(ty.params())
        .map(|(arg, param)| {
            Ok(match param {
                ValType::I32 => Val::I32(parse_i32(arg)?),
                ValType::I64 => Val::I64(parse_i64(arg)?),
                ValType::F32 => Val::F32(F32::from(
                    arg.parse::<f32>()
                        .with_context(|| format!("invalid f32 argument: {arg}"))?,
                )),
                ValType::F64 => Val::F64(F64::from(
                    arg.parse::<f64>()
                        .with_context(|| format!("invalid f64 argument: {arg}"))?,
                )),
                ValType::Ref(_) => bail!("reference arguments cannot be passed on the CLI"),
            })
        })
        .collect()
}

/// Accepts both signed and unsigned spellings of an integer argument.
fn parse_i32(arg: &str) -> Result<i32> {
    arg.parse::<i32>()
        .or_else(|_| arg.parse::<u32>().map(|v| v as i32))
        .map_err(|_| anyhow!("invalid i32 argument: {arg}"))
}

fn parse_i64(arg: &str) -> Result<i64> {
    arg.parse::<i64>()
        .or_else(|_| arg.parse::<u64>().map(|v| v as i64))
        .map_err(|_| anyhow!("invalid i64 argument: {arg}"))
}

/// Renders results one per line, the way the suite prints them.
pub fn print_results(results: &[Val]) {
    for result in results {
        match result {
            Val::I32(v) => println!("{v}"),
            Val::I64(v) => println!("{v}"),
            Val::F32(v) => println!("{v}"),
            Val::F64(v) => println!("{v}"),
            Val::FuncRef(None) | Val::ExternRef(None) => println!("null"),
            Val::FuncRef(Some(handle)) => println!("funcref({handle})"),
            Val::ExternRef(Some(handle)) => println!("externref({handle})"),
        }
    }
}

/// Logs the duration of `stage` when profiling is enabled.
pub fn timed<T>(profiling: bool, stage: &str, f: impl FnOnce() -> T) -> T {
    if !profiling {
        return f();
    }
    let started = Instant::now();
    let result = f();
    log::info!("{stage}: {:?}", started.elapsed());
    result
}
