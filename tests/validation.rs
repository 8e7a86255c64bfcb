mod common;

use common::*;
use wabc::error_msg::*;
use wabc::{disassemble, Error, HandlerKind, Module};

#[test]
fn unreachable_makes_the_stack_polymorphic() {
    compile("(module (func (result i32) unreachable i32.add))");
    compile("(module (func (result i32) (br 0 (unreachable))))");
    assert_invalid("(module (func (result i32) unreachable (i64.const 0) i32.add))", TYPE_MISMATCH);
}

#[test]
fn operand_types_are_checked() {
    assert_invalid("(module (func (result i32) (i32.add (i32.const 1) (f32.const 2))))", TYPE_MISMATCH);
    assert_invalid("(module (func (i32.const 1)))", TYPE_MISMATCH);
    assert_invalid("(module (func (result i32)))", TYPE_MISMATCH);
    assert_invalid("(module (func (drop)))", TYPE_MISMATCH);
}

#[test]
fn non_nullable_locals_need_a_set() {
    assert_invalid("(module (func (local (ref func)) (drop (local.get 0))))", UNINITIALIZED_LOCAL);
    compile(
        r#"(module
             (func $f (local $l (ref func))
               (local.set $l (ref.func $f))
               (drop (local.get $l)))
             (elem declare func $f))"#,
    );
}

#[test]
fn local_initialization_ends_with_its_block() {
    compile(
        r#"(module
             (func $f (local $l (ref func))
               (block (local.set $l (ref.func $f)) (drop (local.get $l))))
             (elem declare func $f))"#,
    );
    assert_invalid(
        r#"(module
             (func $f (local $l (ref func))
               (block (local.set $l (ref.func $f)))
               (drop (local.get $l)))
             (elem declare func $f))"#,
        UNINITIALIZED_LOCAL,
    );
}

#[test]
fn function_references_must_be_declared() {
    assert_invalid("(module (func $f (drop (ref.func $f))))", UNDECLARED_FUNC_REF);
    compile(r#"(module (func $f (export "f") (drop (ref.func $f))))"#);
}

#[test]
fn branches() {
    assert_invalid("(module (func (block (result i32) (br 0))))", TYPE_MISMATCH);
    assert_invalid("(module (func (br 1)))", UNKNOWN_LABEL);
    assert_invalid(
        "(module (func (result i32) (block $a (result i32) (block $b (br_table $a $b (i32.const 7) (i32.const 0))) (i32.const 1))))",
        TYPE_MISMATCH,
    );
    compile("(module (func (param i32) (block $a (block $b (br_table $a $b $a (local.get 0))))))");
}

#[test]
fn if_without_else_must_not_produce_values() {
    assert_invalid("(module (func (result i32) (if (result i32) (i32.const 1) (then (i32.const 2)))))", TYPE_MISMATCH);
    compile("(module (func (result i32) (if (result i32) (i32.const 1) (then (i32.const 2)) (else (i32.const 3)))))");
}

#[test]
fn globals() {
    assert_invalid("(module (global i32 (i32.const 0)) (func (global.set 0 (i32.const 1))))", GLOBAL_IS_IMMUTABLE);
    assert_invalid("(module (global i32 (i32.div_s (i32.const 1) (i32.const 2))))", CONST_EXP_REQUIRED);
    assert_invalid("(module (global $m (mut i32) (i32.const 0)) (global i32 (global.get $m)))", CONST_EXP_REQUIRED);
    assert_invalid("(module (global i32 (i64.const 0)))", TYPE_MISMATCH);
    compile("(module (global $m (mut i32) (i32.const 0)) (func (global.set $m (i32.const 1))))");
}

#[test]
fn select_needs_a_type_for_references() {
    assert_invalid(
        "(module (func (result funcref) (select (ref.null func) (ref.null func) (i32.const 0))))",
        TYPE_MISMATCH,
    );
    compile("(module (func (result funcref) (select (result funcref) (ref.null func) (ref.null func) (i32.const 0))))");
    compile("(module (func (result f64) (select (f64.const 1) (f64.const 2) (i32.const 0))))");
}

#[test]
fn memory_access() {
    assert_invalid("(module (memory 1) (func (drop (i32.load align=8 (i32.const 0)))))", ALIGNMENT_TOO_LARGE);
    assert_invalid("(module (func (drop (i32.load (i32.const 0)))))", UNKNOWN_MEMORY);
    compile("(module (memory 1) (func (i64.store16 offset=4 align=2 (i32.const 0) (i64.const 9))))");
}

#[test]
fn multi_value_blocks_track_stack_height() {
    let m = compile(
        r#"(module
             (func (result i32 i32)
               (block (result i32 i32) (i32.const 1) (i32.const 2))))"#,
    );
    assert!(m.code_entry_header(0).unwrap().max_stack_size >= 2);
}

#[test]
fn try_table_builds_exception_table() {
    let m = compile(
        r#"(module
             (tag $e (param i32))
             (func (result i32 exnref)
               (block $h (result i32 exnref)
                 (try_table (catch_ref $e $h) (throw $e (i32.const 1)))
                 (unreachable))))"#,
    );
    let handlers = m.exception_table(0).unwrap();
    assert_eq!(handlers.len(), 1);
    assert_eq!((handlers[0].kind, handlers[0].tag), (HandlerKind::CatchRef, 0));
    assert!(m.code_entry_header(0).unwrap().exception_table.is_some());
}

#[test]
fn catch_label_must_accept_the_tag_payload() {
    assert_invalid(
        r#"(module
             (tag $e (param i64))
             (func (result i32)
               (block $h (result i32)
                 (try_table (catch $e $h) (nop))
                 (i32.const 0))))"#,
        TYPE_MISMATCH,
    );
}

#[test]
fn legacy_try_catch() {
    let m = compile(
        r#"(module
             (tag $e (param i32))
             (func (result i32)
               (try (result i32)
                 (do (throw $e (i32.const 3)))
                 (catch $e)
                 (catch_all (i32.const 0)))))"#,
    );
    let handlers = m.exception_table(0).unwrap();
    let kinds: Vec<_> = handlers.iter().map(|h| h.kind).collect();
    assert_eq!(kinds, [HandlerKind::LegacyCatch, HandlerKind::LegacyCatchAll]);
    let labels: Vec<_> = disassemble(&m, 0).unwrap().into_iter().filter(|i| i.mnemonic == "label").map(|i| i.offset).collect();
    for h in &handlers {
        assert!(labels.contains(&(h.target as usize)), "handler {h:?} does not target a label");
    }
}

#[test]
fn malformed_utf8_name() {
    let bytes = b"\0asm\x01\0\0\0\x02\x08\x01\x01\xff\x01f\x03\x7f\x00";
    assert_eq!(Module::compile(bytes).unwrap_err(), Error::Malformed(INVALID_UTF8));
}

#[test]
fn missing_end_opcode() {
    let bytes = b"\0asm\x01\0\0\0\x01\x04\x01\x60\x00\x00\x03\x02\x01\x00\x0a\x04\x01\x02\x00\x01";
    assert_eq!(Module::compile(bytes).unwrap_err(), Error::Malformed(END_EXPECTED));
}

#[test]
fn duplicate_exports() {
    assert_invalid(r#"(module (func (export "a")) (func (export "a")))"#, DUP_EXPORT_NAME);
}

#[test]
fn gc_struct_access() {
    compile(
        r#"(module
             (type $p (struct (field $x (mut i32)) (field $y i8)))
             (func (param (ref $p)) (result i32)
               (struct.set $p $x (local.get 0) (i32.const 4))
               (i32.add (struct.get $p $x (local.get 0)) (struct.get_u $p $y (local.get 0)))))"#,
    );
    assert_invalid(
        "(module (type $p (struct (field i8))) (func (param (ref $p)) (result i32) (struct.get $p 0 (local.get 0))))",
        PACKED_FIELD,
    );
    assert_invalid(
        "(module (type $p (struct (field i32))) (func (param (ref $p)) (struct.set $p 0 (local.get 0) (i32.const 1))))",
        FIELD_IS_IMMUTABLE,
    );
}

#[test]
fn array_new_fixed_counts_operands() {
    compile(
        r#"(module
             (type $a (array i32))
             (func (result (ref $a)) (array.new_fixed $a 2 (i32.const 1) (i32.const 2)))
             (func unreachable (array.new_fixed $a 4000000000) drop)
             (func unreachable (i32.const 7) (array.new_fixed $a 4000000000) drop))"#,
    );
    assert_invalid(
        "(module (type $a (array i32)) (func (result (ref $a)) (array.new_fixed $a 3 (i32.const 1) (i32.const 2))))",
        TYPE_MISMATCH,
    );
    assert_invalid(
        "(module (type $a (array i32)) (func unreachable (f32.const 1) (array.new_fixed $a 4000000000) drop))",
        TYPE_MISMATCH,
    );
}
