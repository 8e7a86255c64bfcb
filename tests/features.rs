mod common;

use common::*;
use wabc::error_msg::*;
use wabc::{disassemble, Config, Error, Features, ValType};

fn without(f: impl FnOnce(&mut Features)) -> Config {
    let mut config = Config::default();
    f(&mut config.features);
    config
}

const SIMD: &str = "(module (func (result v128) (v128.const i64x2 1 2)))";

#[test]
fn simd_is_gated() {
    let off = without(|f| f.simd = false);
    assert_eq!(try_compile_with(SIMD, &off).unwrap_err(), Error::Feature("simd"));
    assert_invalid_with("(module (func (param v128)))", &off, "simd");

    let m = compile(SIMD);
    assert_eq!(m.function_type(0).unwrap().results[..], [ValType::V128]);
    let code = disassemble(&m, 0).unwrap();
    assert!(code.iter().any(|i| i.opcode == 0xfd), "no vector instruction in {code:?}");
    assert_eq!(m.v128_constant(0), Some(1u128 | (2u128 << 64)));
}

#[test]
fn relaxed_simd_is_gated_separately() {
    let text = "(module (func (result v128) (f32x4.relaxed_min (v128.const i32x4 0 0 0 0) (v128.const i32x4 0 0 0 0))))";
    assert_invalid_with(text, &without(|f| f.relaxed_simd = false), "relaxed simd");
    compile(text);
}

#[test]
fn mvp_rejects_multiple_results() {
    let text = "(module (func (result i32 i32) (i32.const 1) (i32.const 2)))";
    assert_eq!(try_compile_with(text, &Config::mvp()).unwrap_err(), Error::Validation(INVALID_RESULT_ARITY));
    assert!(try_compile_with("(module (func (result i32) (i32.const 1)))", &Config::mvp()).is_ok());
}

#[test]
fn threads() {
    let text = "(module (memory 1) (func (drop (i32.atomic.load (i32.const 0)))))";
    assert_invalid_with(text, &without(|f| f.threads = false), "threads");
    assert_invalid_with("(module (memory 1 2 shared))", &without(|f| f.threads = false), INVALID_LIMITS_FLAGS);
    let shared_without_max = b"\0asm\x01\0\0\0\x05\x03\x01\x02\x01";
    assert_eq!(wabc::Module::compile(shared_without_max).unwrap_err().message(), SHARED_MEMORY_NEEDS_MAX);
    compile(text);
}

#[test]
fn exceptions() {
    let off = without(|f| f.exceptions = false);
    assert_invalid_with("(module (tag (param i32)))", &off, "exception handling");
    assert_invalid_with("(module (func (try_table)))", &off, "exception handling");
    let legacy_off = without(|f| f.legacy_exceptions = false);
    assert_invalid_with("(module (func (try (do))))", &legacy_off, "legacy exception handling");
}

#[test]
fn numeric_extensions() {
    assert_invalid_with(
        "(module (func (result i32) (i32.trunc_sat_f32_s (f32.const 1))))",
        &without(|f| f.saturating_float_to_int = false),
        "saturating float to int",
    );
    assert_invalid_with(
        "(module (func (result i32) (i32.extend8_s (i32.const 1))))",
        &without(|f| f.sign_extension = false),
        "sign extension",
    );
}

#[test]
fn gc_types() {
    let off = without(|f| f.gc = false);
    assert_invalid_with("(module (type (struct (field i32))))", &off, "gc");
    assert_invalid_with("(module (func (result i32) (i31.get_s (ref.i31 (i32.const 1)))))", &off, "gc");
}

#[test]
fn reference_types() {
    let off = without(|f| f.bulk_memory = false);
    assert_invalid_with("(module (func (result funcref) (ref.null func)))", &off, "reference types");
    assert_invalid_with("(module (memory 1) (func (memory.fill (i32.const 0) (i32.const 0) (i32.const 0))))", &off, "bulk memory");
}

#[test]
fn memory64() {
    assert_invalid_with("(module (memory i64 1))", &without(|f| f.memory64 = false), INVALID_LIMITS_FLAGS);
    let m = compile("(module (memory i64 1) (func (result i64) (memory.size)))");
    assert!(m.memories()[0].limits.index64);
}

#[test]
fn multi_memory() {
    assert_invalid_with("(module (memory 1) (memory 1))", &without(|f| f.multi_memory = false), MULTIPLE_MEMORIES);
    assert_eq!(compile("(module (memory 1) (memory 1))").memories().len(), 2);
}

#[test]
fn config_from_json() {
    let config = Config::from_json_str(r#"{ "features": { "gc": false } }"#).unwrap();
    assert_invalid_with("(module (type (struct)))", &config, "gc");
}
