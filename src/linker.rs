//! Cross-module linking. Every instance taking part in a link attempt plans its
//! steps into one `ResolutionDag`; the sorted steps are checked and handed to a
//! `LinkHost`, which owns the runtime state.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::const_expr::ConstInit;
use crate::error::*;
use crate::error_msg::*;
use crate::module::Module;
use crate::resolution::ResolutionDag;
use crate::symbol_table::*;
use crate::types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    NotLinked = 0,
    InProgress = 1,
    Linked = 2,
    Failed = 3,
}

impl LinkState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LinkState::NotLinked,
            1 => LinkState::InProgress,
            2 => LinkState::Linked,
            _ => LinkState::Failed,
        }
    }
}

/// A named use of a module.
#[derive(Debug)]
pub struct Instance {
    name: Arc<str>,
    module: Arc<Module>,
    state: AtomicU8,
}

impl Instance {
    #[inline]
    pub fn name(&self) -> &str { &self.name }
    #[inline]
    pub fn module(&self) -> &Arc<Module> { &self.module }
    #[inline]
    pub fn state(&self) -> LinkState { LinkState::from_u8(self.state.load(Ordering::Acquire)) }

    fn transition(&self, from: LinkState, to: LinkState) -> bool {
        self.state.compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn fail(&self) { self.state.store(LinkState::Failed as u8, Ordering::Release); }
}

/// Work handed to the host, in dependency order. Indices are in the index
/// space of the instance the action is performed for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LinkAction {
    BindFunctionImport { function: u32, source: String, source_function: u32 },
    BindGlobalImport { global: u32, source: String, source_global: u32 },
    BindMemoryImport { memory: u32, source: String, source_memory: u32 },
    BindTableImport { table: u32, source: String, source_table: u32 },
    BindTagImport { tag: u32, source: String, source_tag: u32 },
    /// `header` is the code entry header offset in the module bytecode.
    InstallCodeEntry { function: u32, header: usize },
    /// `offset` is the position of the call opcode in the module bytecode.
    BindCallsite { offset: u32, caller: u32, callee: u32 },
    InitializeGlobal { global: u32 },
    InitializeData { segment: u32, memory: u32 },
    RegisterPassiveData { segment: u32 },
    InitializeElem { segment: u32, table: u32 },
    RegisterPassiveElem { segment: u32 },
    RunStart { function: u32 },
}

/// Performs link actions against runtime state the linker does not own.
pub trait LinkHost {
    fn perform(&mut self, instance: &Instance, action: &LinkAction) -> Result<(), Error>;
}

impl<F: FnMut(&Instance, &LinkAction) -> Result<(), Error>> LinkHost for F {
    fn perform(&mut self, instance: &Instance, action: &LinkAction) -> Result<(), Error> { self(instance, action) }
}

// ---------------- Symbols ----------------
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Sym {
    ImportFunction { instance: Arc<str>, index: u32 },
    ExportFunction { instance: Arc<str>, name: Arc<str> },
    CodeEntry { instance: Arc<str>, function: u32 },
    Callsite { instance: Arc<str>, offset: u32 },
    ImportGlobal { instance: Arc<str>, index: u32 },
    ExportGlobal { instance: Arc<str>, name: Arc<str> },
    InitializeGlobal { instance: Arc<str>, index: u32 },
    ImportMemory { instance: Arc<str>, index: u32 },
    ExportMemory { instance: Arc<str>, name: Arc<str> },
    ImportTable { instance: Arc<str>, index: u32 },
    ExportTable { instance: Arc<str>, name: Arc<str> },
    ImportTag { instance: Arc<str>, index: u32 },
    ExportTag { instance: Arc<str>, name: Arc<str> },
    Data { instance: Arc<str>, index: u32 },
    Elem { instance: Arc<str>, index: u32 },
}

impl Sym {
    pub fn instance(&self) -> &str {
        match self {
            Sym::ImportFunction { instance, .. }
            | Sym::ExportFunction { instance, .. }
            | Sym::CodeEntry { instance, .. }
            | Sym::Callsite { instance, .. }
            | Sym::ImportGlobal { instance, .. }
            | Sym::ExportGlobal { instance, .. }
            | Sym::InitializeGlobal { instance, .. }
            | Sym::ImportMemory { instance, .. }
            | Sym::ExportMemory { instance, .. }
            | Sym::ImportTable { instance, .. }
            | Sym::ExportTable { instance, .. }
            | Sym::ImportTag { instance, .. }
            | Sym::ExportTag { instance, .. }
            | Sym::Data { instance, .. }
            | Sym::Elem { instance, .. } => instance,
        }
    }

    fn import(kind: ExternKind, instance: Arc<str>, index: u32) -> Self {
        match kind {
            ExternKind::Func => Sym::ImportFunction { instance, index },
            ExternKind::Table => Sym::ImportTable { instance, index },
            ExternKind::Memory => Sym::ImportMemory { instance, index },
            ExternKind::Global => Sym::ImportGlobal { instance, index },
            ExternKind::Tag => Sym::ImportTag { instance, index },
        }
    }

    fn export(kind: ExternKind, instance: Arc<str>, name: Arc<str>) -> Self {
        match kind {
            ExternKind::Func => Sym::ExportFunction { instance, name },
            ExternKind::Table => Sym::ExportTable { instance, name },
            ExternKind::Memory => Sym::ExportMemory { instance, name },
            ExternKind::Global => Sym::ExportGlobal { instance, name },
            ExternKind::Tag => Sym::ExportTag { instance, name },
        }
    }
}

impl fmt::Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sym::ImportFunction { instance, index } => write!(f, "(import func {index} into {instance})"),
            Sym::ExportFunction { instance, name } => write!(f, "(export func {name} from {instance})"),
            Sym::CodeEntry { instance, function } => write!(f, "(code entry {function} in {instance})"),
            Sym::Callsite { instance, offset } => write!(f, "(call site @{offset} in {instance})"),
            Sym::ImportGlobal { instance, index } => write!(f, "(import global {index} into {instance})"),
            Sym::ExportGlobal { instance, name } => write!(f, "(export global {name} from {instance})"),
            Sym::InitializeGlobal { instance, index } => write!(f, "(init global {index} in {instance})"),
            Sym::ImportMemory { instance, index } => write!(f, "(import memory {index} into {instance})"),
            Sym::ExportMemory { instance, name } => write!(f, "(export memory {name} from {instance})"),
            Sym::ImportTable { instance, index } => write!(f, "(import table {index} into {instance})"),
            Sym::ExportTable { instance, name } => write!(f, "(export table {name} from {instance})"),
            Sym::ImportTag { instance, index } => write!(f, "(import tag {index} into {instance})"),
            Sym::ExportTag { instance, name } => write!(f, "(export tag {name} from {instance})"),
            Sym::Data { instance, index } => write!(f, "(data {index} in {instance})"),
            Sym::Elem { instance, index } => write!(f, "(elem {index} in {instance})"),
        }
    }
}

enum Step {
    /// Checked against the exporting instance when it runs.
    Import { kind: ExternKind, index: u32 },
    Action(LinkAction),
    Nothing,
}

struct Planned {
    instance: usize,
    step: Step,
}

// ---------------- Cross-module type matching ----------------
/// Structural type equality between two modules. Pairs under comparison are
/// assumed equal, which terminates recursive types.
struct TypeMatcher<'m> {
    a: &'m SymbolTable,
    b: &'m SymbolTable,
    assumed: HashSet<(u32, u32)>,
}

impl<'m> TypeMatcher<'m> {
    fn new(a: &'m SymbolTable, b: &'m SymbolTable) -> Self { Self { a, b, assumed: HashSet::new() } }

    fn types_equal(&mut self, x: u32, y: u32) -> bool {
        if !self.assumed.insert((x, y)) { return true; }
        let (Some(sx), Some(sy)) = (self.a.sub_type(x), self.b.sub_type(y)) else { return false };
        if sx.is_final != sy.is_final { return false; }
        let supers = match (sx.supertype, sy.supertype) {
            (None, None) => true,
            (Some(px), Some(py)) => self.types_equal(px, py),
            _ => false,
        };
        supers && self.composite_equal(&sx.composite, &sy.composite)
    }

    fn composite_equal(&mut self, x: &CompositeType, y: &CompositeType) -> bool {
        match (x, y) {
            (CompositeType::Func(fx), CompositeType::Func(fy)) => self.func_equal(fx, fy),
            (CompositeType::Struct(fx), CompositeType::Struct(fy)) => {
                fx.len() == fy.len() && fx.iter().zip(fy.iter()).all(|(a, b)| self.field_equal(a, b))
            }
            (CompositeType::Array(fx), CompositeType::Array(fy)) => self.field_equal(fx, fy),
            _ => false,
        }
    }

    fn func_equal(&mut self, x: &FuncType, y: &FuncType) -> bool {
        x.params.len() == y.params.len()
            && x.results.len() == y.results.len()
            && x.params.iter().zip(y.params.iter()).all(|(a, b)| self.val_equal(*a, *b))
            && x.results.iter().zip(y.results.iter()).all(|(a, b)| self.val_equal(*a, *b))
    }

    fn field_equal(&mut self, x: &FieldType, y: &FieldType) -> bool {
        if x.mutable != y.mutable { return false; }
        match (x.storage, y.storage) {
            (StorageType::Val(a), StorageType::Val(b)) => self.val_equal(a, b),
            (a, b) => a == b,
        }
    }

    fn val_equal(&mut self, x: ValType, y: ValType) -> bool {
        match (x.heap_type(), y.heap_type()) {
            (Some(hx), Some(hy)) => {
                x.is_nullable() == y.is_nullable()
                    && match (hx.index(), hy.index()) {
                        (Some(i), Some(j)) => self.types_equal(i, j),
                        (None, None) => hx == hy,
                        _ => false,
                    }
            }
            _ => x == y,
        }
    }

    /// True when `exported` (in `a`) or one of its declared supertypes equals `imported` (in `b`).
    fn func_matches(&mut self, exported: u32, imported: u32) -> bool {
        let mut cur = Some(exported);
        while let Some(t) = cur {
            if self.types_equal(t, imported) { return true; }
            self.assumed.clear();
            cur = self.a.sub_type(t).and_then(|st| st.supertype);
        }
        false
    }
}

fn import_desc(symbols: &SymbolTable, kind: ExternKind, index: u32) -> Option<&ImportDesc> {
    let i = index as usize;
    match kind {
        ExternKind::Func => symbols.functions.get(i)?.import.as_ref(),
        ExternKind::Table => symbols.tables.get(i)?.import.as_ref(),
        ExternKind::Memory => symbols.memories.get(i)?.import.as_ref(),
        ExternKind::Global => symbols.globals.get(i)?.import.as_ref(),
        ExternKind::Tag => symbols.tags.get(i)?.import.as_ref(),
    }
}

// ---------------- Linker ----------------
#[derive(Default)]
struct Registry {
    instances: Vec<Arc<Instance>>,
    by_name: HashMap<Arc<str>, usize>,
}

impl Registry {
    fn get(&self, name: &str) -> Option<&Arc<Instance>> { self.by_name.get(name).map(|i| &self.instances[*i]) }
}

/// Named instances and the lock that serializes link attempts.
#[derive(Default)]
pub struct Linker {
    registry: Mutex<Registry>,
}

impl Linker {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, Registry> { self.registry.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Adds an instance of `module` named `name`. Imports name instances by this name.
    pub fn register(&self, name: &str, module: Arc<Module>) -> Result<Arc<Instance>, Error> {
        let mut registry = self.lock();
        if registry.by_name.contains_key(name) { return link(DUPLICATE_INSTANCE, name); }
        let name: Arc<str> = Arc::from(name);
        let instance = Arc::new(Instance { name: name.clone(), module, state: AtomicU8::new(LinkState::NotLinked as u8) });
        let idx = registry.instances.len();
        registry.instances.push(instance.clone());
        registry.by_name.insert(name, idx);
        debug!(target: "wabc::linker", instance = %instance.name, "registered instance");
        Ok(instance)
    }

    pub fn instance(&self, name: &str) -> Option<Arc<Instance>> { self.lock().get(name).cloned() }

    pub fn instances(&self) -> Vec<Arc<Instance>> { self.lock().instances.clone() }

    /// Links `name` together with every other instance that is not linked yet.
    pub fn link_instance(&self, name: &str, host: &mut impl LinkHost) -> Result<(), Error> {
        let instance = self.instance(name).ok_or_else(|| Error::Link { msg: MODULE_NOT_FOUND, detail: name.to_owned() })?;
        match instance.state() {
            LinkState::Failed => link(LINK_PREVIOUSLY_FAILED, name),
            LinkState::Linked => Ok(()),
            _ => {
                self.link(host)?;
                if instance.state() == LinkState::Failed { return link(LINK_PREVIOUSLY_FAILED, name); }
                Ok(())
            }
        }
    }

    /// Links every registered instance that is not linked yet. Failed instances
    /// are left failed; the first failure is returned.
    pub fn link(&self, host: &mut impl LinkHost) -> Result<(), Error> {
        let registry = self.lock();
        let pending: Vec<usize> = (0..registry.instances.len())
            .filter(|&i| registry.instances[i].transition(LinkState::NotLinked, LinkState::InProgress))
            .collect();
        if pending.is_empty() { return Ok(()); }
        info!(target: "wabc::linker", instances = pending.len(), "linking");

        let mut dag = ResolutionDag::new();
        let planned = pending.iter().try_for_each(|&i| plan(&registry, &mut dag, i));
        let sorted = match planned.and_then(|()| dag.toposort()) {
            Ok(sorted) => sorted,
            Err(e) => {
                warn!(target: "wabc::linker", error = %e, "link failed");
                pending.iter().for_each(|&i| registry.instances[i].fail());
                return Err(e);
            }
        };

        let mut first_error: Option<Error> = None;
        for resolver in sorted {
            let instance = &registry.instances[resolver.action.instance];
            if instance.state() == LinkState::Failed { continue; }
            let failed_dep = resolver.dependencies.iter().find_map(|d| registry.get(d.instance()).filter(|x| x.state() == LinkState::Failed));
            if let Some(dep) = failed_dep {
                debug!(target: "wabc::linker", sym = %resolver.sym, dependency = dep.name(), "dependency failed");
                instance.fail();
                first_error.get_or_insert_with(|| Error::Link { msg: LINK_PREVIOUSLY_FAILED, detail: dep.name().to_owned() });
                continue;
            }
            debug!(target: "wabc::linker", sym = %resolver.sym, "resolving");
            if let Err(e) = run_step(&registry, instance, &resolver.action.step, host) {
                warn!(target: "wabc::linker", instance = instance.name(), sym = %resolver.sym, error = %e, "link step failed");
                instance.fail();
                first_error.get_or_insert(e);
            }
        }

        for &i in &pending {
            let instance = &registry.instances[i];
            let Some(function) = instance.module.start() else { continue };
            if instance.state() == LinkState::Failed { continue; }
            if let Err(e) = host.perform(instance, &LinkAction::RunStart { function }) {
                warn!(target: "wabc::linker", instance = instance.name(), error = %e, "start function failed");
                instance.fail();
                first_error.get_or_insert(e);
            }
        }
        for &i in &pending {
            registry.instances[i].transition(LinkState::InProgress, LinkState::Linked);
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn function_sym(instance: &Arc<str>, module: &Module, function: u32) -> Sym {
    if function < module.num_imported_functions() {
        Sym::ImportFunction { instance: instance.clone(), index: function }
    } else {
        Sym::CodeEntry { instance: instance.clone(), function }
    }
}

fn global_sym(instance: &Arc<str>, module: &Module, global: u32) -> Sym {
    if global < module.symbols().num_imported_globals {
        Sym::ImportGlobal { instance: instance.clone(), index: global }
    } else {
        Sym::InitializeGlobal { instance: instance.clone(), index: global }
    }
}

fn init_deps(instance: &Arc<str>, module: &Module, init: &ConstInit, deps: &mut Vec<Sym>) {
    deps.extend(init.global_dependencies().iter().map(|g| global_sym(instance, module, *g)));
    deps.extend(init.function_dependencies().iter().map(|f| function_sym(instance, module, *f)));
}

/// Registers the resolvers of one instance.
fn plan(registry: &Registry, dag: &mut ResolutionDag<Sym, Planned>, idx: usize) -> Result<(), Error> {
    let instance = &registry.instances[idx];
    let module = instance.module.as_ref();
    let name = &instance.name;
    let symbols = module.symbols();
    let planned = |step| Planned { instance: idx, step };

    for (kind, index, desc) in module.imports() {
        let export = Sym::export(kind, Arc::from(desc.module.as_str()), Arc::from(desc.name.as_str()));
        dag.resolve_later(Sym::import(kind, name.clone(), index), vec![export], planned(Step::Import { kind, index }))?;
    }

    for body in module.function_bodies() {
        let action = LinkAction::InstallCodeEntry { function: body.index, header: body.header };
        dag.resolve_later(Sym::CodeEntry { instance: name.clone(), function: body.index }, Vec::new(), planned(Step::Action(action)))?;
    }

    for export in module.exports() {
        let imported = |n: u32| export.index < n;
        let dep = match export.kind {
            ExternKind::Func => Some(function_sym(name, module, export.index)),
            ExternKind::Global => Some(global_sym(name, module, export.index)),
            ExternKind::Memory if imported(symbols.num_imported_memories) => Some(Sym::ImportMemory { instance: name.clone(), index: export.index }),
            ExternKind::Table if imported(symbols.num_imported_tables) => Some(Sym::ImportTable { instance: name.clone(), index: export.index }),
            ExternKind::Tag if imported(symbols.num_imported_tags) => Some(Sym::ImportTag { instance: name.clone(), index: export.index }),
            _ => None,
        };
        let sym = Sym::export(export.kind, name.clone(), Arc::from(export.name.as_str()));
        dag.resolve_later(sym, dep.into_iter().collect(), planned(Step::Nothing))?;
    }

    for (g, global) in module.globals().iter().enumerate().skip(symbols.num_imported_globals as usize) {
        let mut deps = Vec::new();
        if let Some(init) = &global.init { init_deps(name, module, init, &mut deps); }
        let action = LinkAction::InitializeGlobal { global: g as u32 };
        dag.resolve_later(Sym::InitializeGlobal { instance: name.clone(), index: g as u32 }, deps, planned(Step::Action(action)))?;
    }

    for site in module.call_sites() {
        let deps = vec![function_sym(name, module, site.callee)];
        let action = LinkAction::BindCallsite { offset: site.offset, caller: site.caller, callee: site.callee };
        dag.resolve_later(Sym::Callsite { instance: name.clone(), offset: site.offset }, deps, planned(Step::Action(action)))?;
    }

    for (n, seg) in module.datas().iter().enumerate() {
        let segment = n as u32;
        let mut deps = Vec::new();
        if segment > 0 { deps.push(Sym::Data { instance: name.clone(), index: segment - 1 }); }
        let step = match &seg.mode {
            SegmentMode::Active { index, offset } => {
                if *index < symbols.num_imported_memories { deps.push(Sym::ImportMemory { instance: name.clone(), index: *index }); }
                init_deps(name, module, offset, &mut deps);
                Step::Action(LinkAction::InitializeData { segment, memory: *index })
            }
            SegmentMode::Passive => Step::Action(LinkAction::RegisterPassiveData { segment }),
            SegmentMode::Declarative => Step::Nothing,
        };
        dag.resolve_later(Sym::Data { instance: name.clone(), index: segment }, deps, planned(step))?;
    }

    for (n, seg) in module.elems().iter().enumerate() {
        let segment = n as u32;
        let mut deps = Vec::new();
        if segment > 0 { deps.push(Sym::Elem { instance: name.clone(), index: segment - 1 }); }
        match &seg.items {
            ElemItems::Functions(funcs) => deps.extend(funcs.iter().map(|f| function_sym(name, module, *f))),
            ElemItems::Exprs(exprs) => exprs.iter().for_each(|e| init_deps(name, module, e, &mut deps)),
        }
        let step = match &seg.mode {
            SegmentMode::Active { index, offset } => {
                if *index < symbols.num_imported_tables { deps.push(Sym::ImportTable { instance: name.clone(), index: *index }); }
                init_deps(name, module, offset, &mut deps);
                Step::Action(LinkAction::InitializeElem { segment, table: *index })
            }
            SegmentMode::Passive => Step::Action(LinkAction::RegisterPassiveElem { segment }),
            SegmentMode::Declarative => Step::Nothing,
        };
        dag.resolve_later(Sym::Elem { instance: name.clone(), index: segment }, deps, planned(step))?;
    }
    Ok(())
}

fn run_step(registry: &Registry, instance: &Instance, step: &Step, host: &mut impl LinkHost) -> Result<(), Error> {
    match step {
        Step::Nothing => Ok(()),
        Step::Action(action) => host.perform(instance, action),
        Step::Import { kind, index } => {
            let action = resolve_import(registry, instance, *kind, *index)?;
            host.perform(instance, &action)
        }
    }
}

/// Finds the export an import names and checks that it fits the import's declaration.
fn resolve_import(registry: &Registry, instance: &Instance, kind: ExternKind, index: u32) -> Result<LinkAction, Error> {
    let importer = instance.module.symbols();
    let desc = import_desc(importer, kind, index).ok_or(Error::Validation(UNKNOWN_IMPORT))?;
    let qualified = || format!("{}.{}", desc.module, desc.name);
    let source = registry.get(&desc.module).ok_or_else(|| Error::Link { msg: MODULE_NOT_FOUND, detail: desc.module.clone() })?;
    if source.state() == LinkState::Failed { return link(LINK_PREVIOUSLY_FAILED, source.name()); }
    let exporter = source.module.symbols();
    let export = exporter
        .export(&desc.name)
        .filter(|e| e.kind == kind)
        .ok_or_else(|| Error::Link { msg: UNKNOWN_IMPORT, detail: qualified() })?;
    let mut types = TypeMatcher::new(exporter, importer);
    let i = index as usize;
    let e = export.index as usize;
    let source_name = source.name().to_owned();
    let (compatible, action) = match kind {
        ExternKind::Func => {
            let ok = exporter.functions.get(e).zip(importer.functions.get(i)).is_some_and(|(ef, imf)| types.func_matches(ef.type_idx, imf.type_idx));
            (ok, LinkAction::BindFunctionImport { function: index, source: source_name, source_function: export.index })
        }
        ExternKind::Global => {
            let ok = exporter.globals.get(e).zip(importer.globals.get(i)).is_some_and(|(eg, ig)| {
                let abstract_only = eg.ty.heap_type().map_or(true, |h| h.is_abstract()) && ig.ty.heap_type().map_or(true, |h| h.is_abstract());
                eg.mutable == ig.mutable
                    && (types.val_equal(eg.ty, ig.ty) || (!ig.mutable && abstract_only && importer.is_subtype(eg.ty, ig.ty)))
            });
            (ok, LinkAction::BindGlobalImport { global: index, source: source_name, source_global: export.index })
        }
        ExternKind::Memory => {
            let ok = exporter.memories.get(e).zip(importer.memories.get(i)).is_some_and(|(em, im)| em.limits.matches(&im.limits));
            (ok, LinkAction::BindMemoryImport { memory: index, source: source_name, source_memory: export.index })
        }
        ExternKind::Table => {
            let ok = exporter.tables.get(e).zip(importer.tables.get(i)).is_some_and(|(et, it)| {
                types.val_equal(et.elem_type, it.elem_type) && et.limits.matches(&it.limits)
            });
            (ok, LinkAction::BindTableImport { table: index, source: source_name, source_table: export.index })
        }
        ExternKind::Tag => {
            let ok = exporter.tags.get(e).zip(importer.tags.get(i)).is_some_and(|(et, it)| types.types_equal(et.type_idx, it.type_idx));
            (ok, LinkAction::BindTagImport { tag: index, source: source_name, source_tag: export.index })
        }
    };
    if !compatible { return link(INCOMPATIBLE_IMPORT, qualified()); }
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(wat: &str) -> Arc<Module> { Arc::new(Module::compile(&wat::parse_str(wat).unwrap()).unwrap()) }

    #[test]
    fn duplicate_instance_names_are_rejected() {
        let linker = Linker::new();
        let m = module("(module)");
        linker.register("a", m.clone()).unwrap();
        assert_eq!(linker.register("a", m).unwrap_err().message(), DUPLICATE_INSTANCE);
    }

    #[test]
    fn recursive_types_match_across_modules() {
        let a = module("(module (rec (type $l (struct (field (ref null $l))))))");
        let b = module("(module (type (func)) (rec (type $l (struct (field (ref null $l))))))");
        let mut m = TypeMatcher::new(a.symbols(), b.symbols());
        assert!(m.types_equal(0, 1));
        let mut m = TypeMatcher::new(a.symbols(), b.symbols());
        assert!(!m.types_equal(0, 0));
    }

    #[test]
    fn closure_hosts_receive_actions() {
        let linker = Linker::new();
        linker.register("solo", module("(module (func) (start 0))")).unwrap();
        let mut seen = Vec::new();
        linker.link(&mut |_: &Instance, a: &LinkAction| {
            seen.push(a.clone());
            Ok::<(), Error>(())
        }).unwrap();
        assert!(matches!(seen[0], LinkAction::InstallCodeEntry { function: 0, .. }));
        assert_eq!(seen.last(), Some(&LinkAction::RunStart { function: 0 }));
        assert_eq!(linker.instance("solo").unwrap().state(), LinkState::Linked);
    }
}
