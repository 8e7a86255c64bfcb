mod common;

use common::*;
use wabc::bytecode::HandlerKind;
use wabc::symbol_table::{ElemItems, SegmentMode};
use wabc::{disassemble, Config, ExternKind, FuncType, Module, Operand, ValType};

const SCENARIO: &str = r#"
    (module
      (import "env" "f" (func (param i32) (result i32)))
      (func (export "g") (param i32) (result i32)
        (call 0 (local.get 0))))
"#;

#[test]
fn imported_function_and_caller() {
    let m = compile(SCENARIO);
    assert_eq!(m.num_functions(), 2);
    assert_eq!(m.num_imported_functions(), 1);
    assert_eq!(m.function_type(0).unwrap(), &FuncType::new([ValType::I32], [ValType::I32]));
    assert!(m.function_body(0).is_none());

    let g = m.export("g").unwrap();
    assert_eq!((g.kind, g.index), (ExternKind::Func, 1));

    let calls: Vec<_> = disassemble(&m, 1).unwrap().into_iter().filter(|i| i.mnemonic == "call").collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operands, [Operand::Index(0)]);
    assert_eq!(m.call_sites().len(), 1);
    assert_eq!((m.call_sites()[0].caller, m.call_sites()[0].callee), (1, 0));

    let imports: Vec<_> = m.imports().map(|(k, i, d)| (k, i, d.module.as_str(), d.name.as_str())).collect();
    assert_eq!(imports, [(ExternKind::Func, 0, "env", "f")]);
}

#[test]
fn code_entry_header_describes_body() {
    let m = compile(SCENARIO);
    let body = m.function_body(1).unwrap().clone();
    let header = m.code_entry_header(1).unwrap();
    assert_eq!(header.function_index, 1);
    assert_eq!(header.body_length as usize, body.body.len());
    assert_eq!(body.body.end, body.header);
    assert_eq!(header.results, [ValType::I32]);
    assert!(header.max_stack_size >= 1);
    assert!(header.exception_table.is_none());
    assert_eq!(m.function_bytecode(1).unwrap().len(), body.body.len());
}

#[test]
fn parsing_is_deterministic() {
    let bytes = wasm(
        r#"(module
             (memory 1)
             (global $g (mut i64) (i64.const 5))
             (func $a (param i32) (result i32)
               (block (result i32) (br_if 0 (local.get 0) (local.get 0)) (drop) (i32.const 3)))
             (func $b (loop $l (br_if $l (i32.eqz (i32.load (i32.const 0))))))
             (data (i32.const 0) "\01"))"#,
    );
    let a = Module::compile(&bytes).unwrap();
    let b = Module::compile(&bytes).unwrap();
    assert_eq!(a.bytecode(), b.bytecode());
    assert_eq!(a.function_bodies(), b.function_bodies());
    assert_eq!(a.call_sites(), b.call_sites());
    assert_eq!(a.exports(), b.exports());
    assert_eq!(a.func_type(0).unwrap(), b.func_type(0).unwrap());
}

#[test]
fn background_parse_matches_inline_parse() {
    let bytes = wasm(SCENARIO);
    let config = Config { async_parsing_threshold: 0, async_stack_size: 1 << 20, ..Config::default() };
    let background = Module::compile_with(&bytes, &config).unwrap();
    let inline = Module::compile(&bytes).unwrap();
    assert_eq!(background.bytecode(), inline.bytecode());

    let errors = Module::compile_async(vec![0, 1, 2, 3], Config::default()).unwrap_err();
    assert_eq!(errors.message(), wabc::error_msg::NO_MAGIC_HEADER);
}

#[test]
fn retained_binary() {
    let bytes = wasm("(module)");
    let config = Config { retain_binary: true, ..Config::default() };
    assert_eq!(Module::compile_with(&bytes, &config).unwrap().binary(), Some(&bytes[..]));
    assert!(Module::compile(&bytes).unwrap().binary().is_none());
}

#[test]
fn name_section() {
    let m = compile("(module $demo (func $add (param $lhs i32) (param $rhs i32)))");
    let names = m.names().unwrap();
    assert_eq!(names.module.as_deref(), Some("demo"));
    assert_eq!(names.function(0), Some("add"));
    assert_eq!(names.local(0, 1), Some("rhs"));
}

#[test]
fn tag_names() {
    let payload = [0, 2, 1, b'm', 11, 6, 1, 0, 3, b'e', b'r', b'r'];
    let bytes = with_custom_section(wasm("(module (tag (param i32)))"), "name", &payload);
    let m = Module::compile(&bytes).unwrap();
    let names = m.names().unwrap();
    assert_eq!(names.module.as_deref(), Some("m"));
    assert_eq!(names.tag(0), Some("err"));
    assert!(names.functions.is_empty());
}

#[test]
fn malformed_name_section_is_ignored() {
    let bytes = with_custom_section(wasm("(module (func))"), "name", &[1, 9, 0xff]);
    let m = Module::compile(&bytes).unwrap();
    assert!(m.names().is_none());
    assert_eq!(m.custom_sections().len(), 1);
}

#[test]
fn custom_and_debug_sections() {
    let bytes = with_custom_section(wasm("(module)"), ".debug_info", &[1, 2, 3]);
    let bytes = with_custom_section(bytes, "producers", b"x");
    let m = Module::compile(&bytes).unwrap();
    let debug: Vec<_> = m.debug_sections().collect();
    assert_eq!(debug.len(), 1);
    assert_eq!(m.custom_section_data(debug[0]), [1, 2, 3]);
    assert_eq!(&bytes[debug[0].offset..debug[0].offset + 3], [1, 2, 3]);
    assert_eq!(m.custom_sections()[1].name, "producers");
}

#[test]
fn data_and_element_segments() {
    let m = compile(
        r#"(module
             (memory 1)
             (table 4 funcref)
             (func $a) (func $b)
             (data (i32.const 16) "hi")
             (data "passive")
             (elem (i32.const 1) $a $b)
             (elem declare func $a))"#,
    );
    assert_eq!(m.datas().len(), 2);
    assert_eq!(m.data_bytes(0), Some(&b"hi"[..]));
    assert_eq!(m.data_bytes(1), Some(&b"passive"[..]));
    assert!(matches!(m.datas()[1].mode, SegmentMode::Passive));
    assert!(matches!(m.datas()[0].mode, SegmentMode::Active { index: 0, .. }));

    assert_eq!(m.elems().len(), 2);
    match (&m.elems()[0].mode, &m.elems()[0].items) {
        (SegmentMode::Active { index: 0, .. }, ElemItems::Functions(f)) => assert_eq!(f, &[0, 1]),
        other => panic!("unexpected segment {other:?}"),
    }
    assert!(matches!(m.elems()[1].mode, SegmentMode::Declarative));
    assert!(m.symbols().is_declared_function(0));
}

#[test]
fn globals_fold_constant_initializers() {
    let m = compile(
        r#"(module
             (global $a i32 (i32.const 40))
             (global $b i32 (i32.add (global.get $a) (i32.const 2)))
             (global $c (mut f64) (f64.const 1.5)))"#,
    );
    assert_eq!(m.globals().len(), 3);
    assert_eq!(m.global(0).unwrap().init.as_ref().and_then(|i| i.value()), Some(wabc::ConstValue::I32(40)));
    assert_eq!(m.global(1).unwrap().init.as_ref().unwrap().global_dependencies(), [0]);
    assert!(m.global(2).unwrap().mutable);
}

#[test]
fn start_function() {
    assert_eq!(compile("(module (func $s) (start $s))").start(), Some(0));
    assert_invalid("(module (func $s (param i32)) (start $s))", wabc::error_msg::START_FUNC);
}

#[test]
fn recursive_type_groups() {
    let m = compile(
        r#"(module
             (rec (type $node (struct (field i32) (field (ref null $node))))
                  (type $list (array (ref null $node))))
             (type $base (sub (func)))
             (type $sub (sub $base (func))))"#,
    );
    assert_eq!(m.symbols().type_count(), 4);
    assert_eq!(m.symbols().rec_group_of(1), Some(0..2));
    assert_eq!(m.symbols().rec_group_of(3), Some(3..4));
    assert!(m.symbols().is_subtype(
        ValType::reference(wabc::HeapType::concrete(3), false),
        ValType::reference(wabc::HeapType::concrete(2), true),
    ));
}

#[test]
fn exception_tables_are_attached() {
    let m = compile(
        r#"(module
             (tag $e (param i32))
             (func (result i32)
               (block $h (result i32)
                 (try_table (catch $e $h) (throw $e (i32.const 7)))
                 (i32.const 0))))"#,
    );
    let handlers = m.exception_table(0).unwrap();
    assert_eq!(handlers.len(), 1);
    let h = handlers[0];
    assert_eq!((h.kind, h.tag), (HandlerKind::Catch, 0));
    assert!(h.start <= h.end);
    let at_target = disassemble(&m, 0).unwrap().into_iter().find(|i| i.offset == h.target as usize).unwrap();
    assert_eq!(at_target.mnemonic, "label");
}
