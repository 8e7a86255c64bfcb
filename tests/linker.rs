mod common;

use std::collections::HashMap;
use std::sync::Arc;

use wabc::error_msg::*;
use wabc::{Disassembler, Error, Instance, LinkAction, LinkState, Linker, Module, Operand};

fn module(text: &str) -> Arc<Module> { Arc::new(common::compile(text)) }

const ENV: &str = r#"(module (func (export "f") (param i32) (result i32) (i32.add (local.get 0) (i32.const 1))))"#;
const APP: &str = r#"
    (module
      (import "env" "f" (func (param i32) (result i32)))
      (func (export "g") (param i32) (result i32)
        (call 0 (local.get 0))))
"#;

#[derive(Default)]
struct Recorder {
    actions: Vec<(String, LinkAction)>,
    fail_on: Option<&'static str>,
}

impl wabc::LinkHost for Recorder {
    fn perform(&mut self, instance: &Instance, action: &LinkAction) -> Result<(), Error> {
        self.actions.push((instance.name().to_owned(), action.clone()));
        match self.fail_on {
            Some(name) if name == instance.name() => Err(Error::Link { msg: HOST_ACTION_FAILED, detail: format!("{action:?}") }),
            _ => Ok(()),
        }
    }
}

impl Recorder {
    fn position(&self, f: impl Fn(&(String, LinkAction)) -> bool) -> usize {
        self.actions.iter().position(f).unwrap_or_else(|| panic!("action missing from {:?}", self.actions))
    }

    /// (instance, function) -> (source instance, source function)
    fn bindings(&self) -> HashMap<(String, u32), (String, u32)> {
        self.actions
            .iter()
            .filter_map(|(name, a)| match a {
                LinkAction::BindFunctionImport { function, source, source_function } => {
                    Some(((name.clone(), *function), (source.clone(), *source_function)))
                }
                _ => None,
            })
            .collect()
    }
}

/// Runs the subset of bytecode the test modules use.
fn call(linker: &Linker, bindings: &HashMap<(String, u32), (String, u32)>, instance: &str, func: u32, args: &[i32]) -> i32 {
    let module = linker.instance(instance).unwrap().module().clone();
    if func < module.num_imported_functions() {
        let (source, f) = &bindings[&(instance.to_owned(), func)];
        return call(linker, bindings, source, *f, args);
    }
    let mut stack: Vec<i32> = Vec::new();
    for ins in Disassembler::function(&module, func).unwrap() {
        let ins = ins.unwrap();
        match (ins.mnemonic, ins.operands.as_slice()) {
            ("local.get", [Operand::Index(i)]) => stack.push(args[*i as usize]),
            ("i32.const", [Operand::Int(v)]) => stack.push(*v as i32),
            ("i32.add", []) => {
                let (b, a) = (stack.pop().unwrap(), stack.pop().unwrap());
                stack.push(a.wrapping_add(b));
            }
            ("call", [Operand::Index(callee)]) => {
                let n = module.function_type(*callee).unwrap().params.len();
                let call_args = stack.split_off(stack.len() - n);
                stack.push(call(linker, bindings, instance, *callee, &call_args));
            }
            ("label", _) | ("nop", _) => {}
            ("return", _) => return stack.pop().unwrap(),
            _ => panic!("unsupported instruction {ins}"),
        }
    }
    panic!("function {func} fell off the end")
}

#[test]
fn imported_call_is_bound_before_its_callsite() {
    let linker = Linker::new();
    linker.register("env", module(ENV)).unwrap();
    linker.register("app", module(APP)).unwrap();
    let mut host = Recorder::default();
    linker.link(&mut host).unwrap();

    let bind = host.position(|(n, a)| n == "app" && matches!(a, LinkAction::BindFunctionImport { function: 0, .. }));
    let site = host.position(|(n, a)| n == "app" && matches!(a, LinkAction::BindCallsite { callee: 0, caller: 1, .. }));
    let code = host.position(|(n, a)| n == "env" && matches!(a, LinkAction::InstallCodeEntry { function: 0, .. }));
    assert!(code < bind && bind < site);
    assert_eq!(host.bindings()[&("app".to_owned(), 0)], ("env".to_owned(), 0));
    assert!(linker.instances().iter().all(|i| i.state() == LinkState::Linked));
}

#[test]
fn linked_call_reaches_the_imported_function() {
    let linker = Linker::new();
    linker.register("app", module(APP)).unwrap();
    linker.register("env", module(ENV)).unwrap();
    let mut host = Recorder::default();
    linker.link(&mut host).unwrap();

    let g = linker.instance("app").unwrap().module().export("g").unwrap().index;
    assert_eq!(call(&linker, &host.bindings(), "app", g, &[5]), 6);
}

#[test]
fn cross_module_global_cycle() {
    let linker = Linker::new();
    linker.register("a", module(r#"(module (import "b" "g" (global i32)) (global (export "g") i32 (global.get 0)))"#)).unwrap();
    linker.register("b", module(r#"(module (import "a" "g" (global i32)) (global (export "g") i32 (global.get 0)))"#)).unwrap();
    let mut host = Recorder::default();
    match linker.link(&mut host) {
        Err(Error::CyclicDependency(chain)) => {
            assert_eq!(chain.first(), chain.last());
            assert_eq!(chain.len(), 7);
            assert_eq!(chain[0], "(import global 0 into a)");
            assert!(chain.contains(&"(export global g from b)".to_owned()));
            assert!(chain.contains(&"(init global 1 in a)".to_owned()));
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert!(host.actions.is_empty());
    assert_eq!(linker.instance("a").unwrap().state(), LinkState::Failed);
    assert_eq!(linker.instance("b").unwrap().state(), LinkState::Failed);
    assert_eq!(linker.link_instance("a", &mut host).unwrap_err().message(), LINK_PREVIOUSLY_FAILED);
}

#[test]
fn unresolved_imports() {
    let linker = Linker::new();
    linker.register("env", module(ENV)).unwrap();
    linker.register("a", module(r#"(module (import "env" "nope" (func)))"#)).unwrap();
    let err = linker.link(&mut Recorder::default()).unwrap_err();
    assert_eq!(err, Error::Link { msg: UNKNOWN_IMPORT, detail: "env.nope".into() });
    assert_eq!(linker.instance("a").unwrap().state(), LinkState::Failed);
    assert_eq!(linker.instance("env").unwrap().state(), LinkState::Linked);

    let linker = Linker::new();
    linker.register("a", module(r#"(module (import "missing" "f" (func)))"#)).unwrap();
    assert_eq!(linker.link(&mut Recorder::default()).unwrap_err().message(), MODULE_NOT_FOUND);
    assert_eq!(linker.link_instance("nobody", &mut Recorder::default()).unwrap_err().message(), MODULE_NOT_FOUND);
}

#[test]
fn import_kind_must_match_export_kind() {
    let linker = Linker::new();
    linker.register("env", module(ENV)).unwrap();
    linker.register("a", module(r#"(module (import "env" "f" (global i32)))"#)).unwrap();
    assert_eq!(linker.link(&mut Recorder::default()).unwrap_err().message(), UNKNOWN_IMPORT);
}

#[test]
fn incompatible_imports() {
    let linker = Linker::new();
    linker.register("env", module(ENV)).unwrap();
    linker.register("a", module(r#"(module (import "env" "f" (func (param i64) (result i32))))"#)).unwrap();
    assert_eq!(linker.link(&mut Recorder::default()).unwrap_err(), Error::Link { msg: INCOMPATIBLE_IMPORT, detail: "env.f".into() });

    let linker = Linker::new();
    linker.register("mem", module(r#"(module (memory (export "m") 1))"#)).unwrap();
    linker.register("a", module(r#"(module (import "mem" "m" (memory 2)))"#)).unwrap();
    linker.register("b", module(r#"(module (import "mem" "m" (memory 1)))"#)).unwrap();
    assert_eq!(linker.link(&mut Recorder::default()).unwrap_err().message(), INCOMPATIBLE_IMPORT);
    assert_eq!(linker.instance("a").unwrap().state(), LinkState::Failed);
    assert_eq!(linker.instance("b").unwrap().state(), LinkState::Linked);

    let linker = Linker::new();
    linker.register("g", module(r#"(module (global (export "g") (mut i32) (i32.const 0)))"#)).unwrap();
    linker.register("a", module(r#"(module (import "g" "g" (global i32)))"#)).unwrap();
    assert_eq!(linker.link(&mut Recorder::default()).unwrap_err().message(), INCOMPATIBLE_IMPORT);
}

#[test]
fn failure_spreads_to_dependent_instances() {
    let linker = Linker::new();
    linker.register("bad", module(r#"(module (import "missing" "x" (func)) (func (export "h")))"#)).unwrap();
    linker.register("user", module(r#"(module (import "bad" "h" (func)))"#)).unwrap();
    let err = linker.link(&mut Recorder::default()).unwrap_err();
    assert_eq!(err.message(), MODULE_NOT_FOUND);
    assert_eq!(linker.instance("bad").unwrap().state(), LinkState::Failed);
    assert_eq!(linker.instance("user").unwrap().state(), LinkState::Failed);
}

#[test]
fn host_errors_fail_the_instance() {
    let linker = Linker::new();
    linker.register("m", module(r#"(module (memory 1) (data (i32.const 0) "x"))"#)).unwrap();
    let mut host = Recorder { fail_on: Some("m"), ..Recorder::default() };
    assert_eq!(linker.link(&mut host).unwrap_err().message(), HOST_ACTION_FAILED);
    assert_eq!(linker.instance("m").unwrap().state(), LinkState::Failed);
    assert_eq!(linker.link_instance("m", &mut host).unwrap_err().message(), LINK_PREVIOUSLY_FAILED);
}

#[test]
fn initializers_run_after_what_they_read() {
    let linker = Linker::new();
    linker.register("env", module(r#"(module (global (export "base") i32 (i32.const 64)))"#)).unwrap();
    linker.register(
        "m",
        module(
            r#"(module
                 (import "env" "base" (global $base i32))
                 (global $b i32 (global.get $base))
                 (memory 1)
                 (table 2 funcref)
                 (func $f)
                 (data (global.get $b) "late")
                 (data "passive")
                 (elem (i32.const 0) $f)
                 (start $f))"#,
        ),
    )
    .unwrap();
    let mut host = Recorder::default();
    linker.link(&mut host).unwrap();
    let actions: Vec<_> = host.actions.iter().filter(|(n, _)| n == "m").map(|(_, a)| a.clone()).collect();
    let at = |a: LinkAction| actions.iter().position(|x| *x == a).unwrap_or_else(|| panic!("{a:?} missing from {actions:?}"));
    let import = at(LinkAction::BindGlobalImport { global: 0, source: "env".into(), source_global: 0 });
    let global = at(LinkAction::InitializeGlobal { global: 1 });
    let data = at(LinkAction::InitializeData { segment: 0, memory: 0 });
    let passive = at(LinkAction::RegisterPassiveData { segment: 1 });
    let elem = at(LinkAction::InitializeElem { segment: 0, table: 0 });
    assert!(import < global && global < data && data < passive);
    let code = actions.iter().position(|a| matches!(a, LinkAction::InstallCodeEntry { function: 0, .. })).unwrap();
    assert!(code < elem);
    assert_eq!(actions.last(), Some(&LinkAction::RunStart { function: 0 }));
}

#[test]
fn linking_is_deterministic() {
    let run = || {
        let linker = Linker::new();
        linker.register("env", module(ENV)).unwrap();
        linker.register("app", module(APP)).unwrap();
        let mut host = Recorder::default();
        linker.link(&mut host).unwrap();
        host.actions
    };
    assert_eq!(run(), run());
}

#[test]
fn later_registrations_link_separately() {
    let linker = Linker::new();
    linker.register("env", module(ENV)).unwrap();
    let mut host = Recorder::default();
    linker.link(&mut host).unwrap();
    let before = host.actions.len();

    linker.register("app", module(APP)).unwrap();
    linker.link_instance("app", &mut host).unwrap();
    assert!(host.actions[before..].iter().all(|(n, _)| n == "app"));
    assert_eq!(host.bindings()[&("app".to_owned(), 0)], ("env".to_owned(), 0));
}
