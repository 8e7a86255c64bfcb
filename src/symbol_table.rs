use std::collections::HashMap;
use std::ops::Range;

use nohash_hasher::IntSet;
use serde::Serialize;

use crate::const_expr::ConstInit;
use crate::error::*;
use crate::error_msg::*;
use crate::types::*;

// ---------------- Import/Export related ----------------
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ImportDesc { pub module: String, pub name: String }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternKind {
    Func = 0,
    Table = 1,
    Memory = 2,
    Global = 3,
    Tag = 4,
}

impl ExternKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ExternKind::Func),
            1 => Some(ExternKind::Table),
            2 => Some(ExternKind::Memory),
            3 => Some(ExternKind::Global),
            4 => Some(ExternKind::Tag),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExternKind::Func => "func",
            ExternKind::Table => "table",
            ExternKind::Memory => "memory",
            ExternKind::Global => "global",
            ExternKind::Tag => "tag",
        }
    }
}

// ---------------- Structures ----------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub min: u64,
    pub max: Option<u64>,
    pub shared: bool,
    pub index64: bool,
}

impl Limits {
    /// Index (address) type of a table or memory with these limits.
    #[inline]
    pub fn index_type(&self) -> ValType { if self.index64 { ValType::I64 } else { ValType::I32 } }

    /// Import matching: the provided limits must be at least as strict as the declared ones.
    pub fn matches(&self, declared: &Limits) -> bool {
        if self.shared != declared.shared || self.index64 != declared.index64 { return false; }
        if self.min < declared.min { return false; }
        match (declared.max, self.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(d), Some(a)) => a <= d,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Function { pub type_idx: u32, pub import: Option<ImportDesc> }

#[derive(Clone, Debug)]
pub struct Table { pub elem_type: ValType, pub limits: Limits, pub init: Option<ConstInit>, pub import: Option<ImportDesc> }

#[derive(Clone, Debug)]
pub struct Memory { pub limits: Limits, pub import: Option<ImportDesc> }

#[derive(Clone, Debug)]
pub struct Global { pub ty: ValType, pub mutable: bool, pub init: Option<ConstInit>, pub import: Option<ImportDesc> }

#[derive(Clone, Debug)]
pub struct Tag { pub type_idx: u32, pub import: Option<ImportDesc> }

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Export { pub name: String, pub kind: ExternKind, pub index: u32 }

#[derive(Clone, Debug)]
pub enum SegmentMode {
    Passive,
    /// Target table (element segments) or memory (data segments), and offset.
    Active { index: u32, offset: ConstInit },
    Declarative,
}

#[derive(Clone, Debug)]
pub enum ElemItems {
    Functions(Vec<u32>),
    Exprs(Vec<ConstInit>),
}

impl ElemItems {
    pub fn len(&self) -> usize {
        match self {
            ElemItems::Functions(v) => v.len(),
            ElemItems::Exprs(v) => v.len(),
        }
    }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[derive(Clone, Debug)]
pub struct ElemSegment { pub elem_type: ValType, pub mode: SegmentMode, pub items: ElemItems }

#[derive(Clone, Debug)]
pub struct DataSegment { pub mode: SegmentMode, pub bytes: Range<usize> }

// ---------------- Symbol table ----------------
/// Per-kind entity vectors of one module, in index order (imports first).
/// Filled by the parser; read-only once the module is built.
#[derive(Default)]
pub struct SymbolTable {
    pub(crate) types: Vec<SubType>,
    rec_groups: Vec<Range<u32>>,
    type_group: Vec<u32>,
    canonical: Vec<u32>,
    canonical_groups: HashMap<Vec<i64>, u32>,
    next_canonical: u32,
    pub(crate) functions: Vec<Function>,
    pub(crate) tables: Vec<Table>,
    pub(crate) memories: Vec<Memory>,
    pub(crate) globals: Vec<Global>,
    pub(crate) tags: Vec<Tag>,
    pub(crate) exports: Vec<Export>,
    export_names: HashMap<String, usize>,
    pub(crate) start: Option<u32>,
    pub(crate) elems: Vec<ElemSegment>,
    pub(crate) datas: Vec<DataSegment>,
    pub(crate) data_count: Option<u32>,
    pub(crate) declared_funcs: IntSet<u32>,
    pub(crate) num_imported_functions: u32,
    pub(crate) num_imported_tables: u32,
    pub(crate) num_imported_memories: u32,
    pub(crate) num_imported_globals: u32,
    pub(crate) num_imported_tags: u32,
    pub(crate) imports: Vec<(ExternKind, u32)>,
}

const REC_INTERNAL: i64 = 1 << 40;
const TOKEN_REF_NULL: i64 = -1000;
const TOKEN_REF: i64 = -1001;

impl SymbolTable {
    pub fn new() -> Self { Self::default() }

    // ---------------- Types ----------------
    #[inline]
    pub fn type_count(&self) -> u32 { self.types.len() as u32 }
    #[inline]
    pub fn sub_type(&self, idx: u32) -> Option<&SubType> { self.types.get(idx as usize) }

    pub fn func_type(&self, idx: u32) -> Result<&FuncType, Error> {
        match self.types.get(idx as usize).map(|t| &t.composite) {
            Some(CompositeType::Func(ft)) => Ok(ft),
            Some(_) => validation(NOT_A_FUNC_TYPE),
            None => validation(UNKNOWN_TYPE),
        }
    }

    pub fn struct_type(&self, idx: u32) -> Result<&[FieldType], Error> {
        match self.types.get(idx as usize).map(|t| &t.composite) {
            Some(CompositeType::Struct(fields)) => Ok(fields),
            Some(_) => validation(NOT_A_STRUCT_TYPE),
            None => validation(UNKNOWN_TYPE),
        }
    }

    pub fn array_type(&self, idx: u32) -> Result<FieldType, Error> {
        match self.types.get(idx as usize).map(|t| &t.composite) {
            Some(CompositeType::Array(field)) => Ok(*field),
            Some(_) => validation(NOT_AN_ARRAY_TYPE),
            None => validation(UNKNOWN_TYPE),
        }
    }

    pub fn rec_group_of(&self, idx: u32) -> Option<Range<u32>> {
        let g = *self.type_group.get(idx as usize)?;
        self.rec_groups.get(g as usize).cloned()
    }

    /// Canonical id: equal ids mean the two indices denote the same type.
    #[inline]
    pub fn canonical_id(&self, idx: u32) -> Option<u32> { self.canonical.get(idx as usize).copied() }

    fn ref_token(&self, ht: HeapType, group: &Range<u32>) -> i64 {
        match ht.index() {
            Some(i) if group.contains(&i) => REC_INTERNAL | (i - group.start) as i64,
            Some(i) => self.canonical[i as usize] as i64,
            None => ht.raw() as i64,
        }
    }

    fn val_tokens(&self, t: ValType, group: &Range<u32>, out: &mut Vec<i64>) {
        match t.heap_type() {
            Some(ht) if !ht.is_abstract() => {
                out.push(if t.is_nullable() { TOKEN_REF_NULL } else { TOKEN_REF });
                out.push(self.ref_token(ht, group));
            }
            _ => out.push(t.raw() as i64),
        }
    }

    fn field_tokens(&self, f: &FieldType, group: &Range<u32>, out: &mut Vec<i64>) {
        out.push(f.mutable as i64);
        match f.storage {
            StorageType::I8 => out.push(-8),
            StorageType::I16 => out.push(-9),
            StorageType::Val(t) => self.val_tokens(t, group, out),
        }
    }

    /// Structural key of a rec group. References into the group are relative,
    /// references out of it use canonical ids of earlier groups.
    fn group_key(&self, subtypes: &[SubType], group: &Range<u32>) -> Vec<i64> {
        let mut key = Vec::new();
        for st in subtypes {
            key.push(st.is_final as i64);
            key.push(st.supertype.map_or(-1, |s| self.ref_token(HeapType::concrete(s), group)));
            match &st.composite {
                CompositeType::Func(ft) => {
                    key.push(0);
                    key.push(ft.params.len() as i64);
                    ft.params.iter().for_each(|t| self.val_tokens(*t, group, &mut key));
                    key.push(ft.results.len() as i64);
                    ft.results.iter().for_each(|t| self.val_tokens(*t, group, &mut key));
                }
                CompositeType::Struct(fields) => {
                    key.push(1);
                    key.push(fields.len() as i64);
                    fields.iter().for_each(|f| self.field_tokens(f, group, &mut key));
                }
                CompositeType::Array(f) => {
                    key.push(2);
                    self.field_tokens(f, group, &mut key);
                }
            }
        }
        key
    }

    /// Registers a rec group, canonicalizes it and checks declared supertypes.
    pub(crate) fn add_rec_group(&mut self, subtypes: Vec<SubType>) -> Result<(), Error> {
        let start = self.type_count();
        let group = start..start + subtypes.len() as u32;
        let key = self.group_key(&subtypes, &group);
        let base = match self.canonical_groups.get(&key) {
            Some(base) => *base,
            None => {
                let base = self.next_canonical;
                self.next_canonical += subtypes.len() as u32;
                self.canonical_groups.insert(key, base);
                base
            }
        };
        let group_id = self.rec_groups.len() as u32;
        for (i, st) in subtypes.into_iter().enumerate() {
            self.types.push(st);
            self.type_group.push(group_id);
            self.canonical.push(base + i as u32);
        }
        self.rec_groups.push(group.clone());
        for idx in group {
            self.check_supertype(idx)?;
        }
        Ok(())
    }

    fn check_supertype(&self, idx: u32) -> Result<(), Error> {
        let st = &self.types[idx as usize];
        let Some(sup) = st.supertype else { return Ok(()) };
        if sup >= idx { return validation(UNKNOWN_TYPE); }
        let parent = &self.types[sup as usize];
        if parent.is_final { return validation(FINAL_SUPERTYPE); }
        if !self.composite_subtype(&st.composite, &parent.composite) { return validation(INVALID_SUPERTYPE); }
        Ok(())
    }

    fn composite_subtype(&self, a: &CompositeType, b: &CompositeType) -> bool {
        match (a, b) {
            (CompositeType::Func(a), CompositeType::Func(b)) => self.func_subtype(a, b),
            (CompositeType::Struct(a), CompositeType::Struct(b)) => {
                a.len() >= b.len() && a.iter().zip(b.iter()).all(|(fa, fb)| self.field_subtype(fa, fb))
            }
            (CompositeType::Array(a), CompositeType::Array(b)) => self.field_subtype(a, b),
            _ => false,
        }
    }

    pub fn func_subtype(&self, a: &FuncType, b: &FuncType) -> bool {
        a.params.len() == b.params.len()
            && a.results.len() == b.results.len()
            && b.params.iter().zip(a.params.iter()).all(|(pb, pa)| self.is_subtype(*pb, *pa))
            && a.results.iter().zip(b.results.iter()).all(|(ra, rb)| self.is_subtype(*ra, *rb))
    }

    fn field_subtype(&self, a: &FieldType, b: &FieldType) -> bool {
        if a.mutable != b.mutable { return false; }
        match (a.storage, b.storage) {
            (StorageType::Val(ta), StorageType::Val(tb)) => {
                if a.mutable { self.is_subtype(ta, tb) && self.is_subtype(tb, ta) } else { self.is_subtype(ta, tb) }
            }
            (sa, sb) => sa == sb,
        }
    }

    // ---------------- Subtyping ----------------
    pub fn is_subtype(&self, a: ValType, b: ValType) -> bool {
        if a == b || a == ValType::BOTTOM || b == ValType::TOP { return true; }
        match (a.heap_type(), b.heap_type()) {
            (Some(ha), Some(hb)) => (!a.is_nullable() || b.is_nullable()) && self.heap_subtype(ha, hb),
            _ => false,
        }
    }

    pub fn is_subtype_all(&self, a: &[ValType], b: &[ValType]) -> bool {
        a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| self.is_subtype(*x, *y))
    }

    /// Abstract heap type at the top of the hierarchy `ht` belongs to.
    pub fn heap_top(&self, ht: HeapType) -> HeapType {
        match ht {
            HeapType::FUNC | HeapType::NOFUNC => HeapType::FUNC,
            HeapType::EXTERN | HeapType::NOEXTERN => HeapType::EXTERN,
            HeapType::EXN | HeapType::NOEXN => HeapType::EXN,
            HeapType::BOTTOM => HeapType::BOTTOM,
            _ => match ht.index().and_then(|i| self.sub_type(i)) {
                Some(SubType { composite: CompositeType::Func(_), .. }) => HeapType::FUNC,
                _ => HeapType::ANY,
            },
        }
    }

    /// Bottom heap type of the hierarchy `ht` belongs to.
    pub fn heap_bottom(&self, ht: HeapType) -> HeapType {
        match self.heap_top(ht) {
            HeapType::FUNC => HeapType::NOFUNC,
            HeapType::EXTERN => HeapType::NOEXTERN,
            HeapType::EXN => HeapType::NOEXN,
            HeapType::BOTTOM => HeapType::BOTTOM,
            _ => HeapType::NONE,
        }
    }

    pub fn heap_subtype(&self, a: HeapType, b: HeapType) -> bool {
        if a == b || a == HeapType::BOTTOM { return true; }
        match (a.index(), b.index()) {
            (Some(ia), Some(ib)) => self.concrete_subtype(ia, ib),
            (Some(ia), None) => match self.sub_type(ia).map(|t| t.composite.top()) {
                Some(HeapType::FUNC) => b == HeapType::FUNC,
                Some(HeapType::STRUCT) => matches!(b, HeapType::STRUCT | HeapType::EQ | HeapType::ANY),
                Some(HeapType::ARRAY) => matches!(b, HeapType::ARRAY | HeapType::EQ | HeapType::ANY),
                _ => false,
            },
            (None, Some(_)) => a == self.heap_bottom(b),
            (None, None) => match b {
                HeapType::ANY => matches!(a, HeapType::EQ | HeapType::I31 | HeapType::STRUCT | HeapType::ARRAY | HeapType::NONE),
                HeapType::EQ => matches!(a, HeapType::I31 | HeapType::STRUCT | HeapType::ARRAY | HeapType::NONE),
                HeapType::I31 | HeapType::STRUCT | HeapType::ARRAY => a == HeapType::NONE,
                HeapType::FUNC => a == HeapType::NOFUNC,
                HeapType::EXTERN => a == HeapType::NOEXTERN,
                HeapType::EXN => a == HeapType::NOEXN,
                _ => false,
            },
        }
    }

    fn concrete_subtype(&self, a: u32, b: u32) -> bool {
        let Some(target) = self.canonical_id(b) else { return false };
        let mut cur = Some(a);
        while let Some(idx) = cur {
            if self.canonical_id(idx) == Some(target) { return true; }
            cur = self.sub_type(idx).and_then(|t| t.supertype);
        }
        false
    }

    // ---------------- Entities ----------------
    #[inline]
    pub fn function_type(&self, func: u32) -> Result<&FuncType, Error> {
        let f = self.functions.get(func as usize).ok_or(Error::Validation(UNKNOWN_FUNC))?;
        self.func_type(f.type_idx)
    }
    #[inline]
    pub fn table(&self, idx: u32) -> Result<&Table, Error> { self.tables.get(idx as usize).ok_or(Error::Validation(UNKNOWN_TABLE)) }
    #[inline]
    pub fn memory(&self, idx: u32) -> Result<&Memory, Error> { self.memories.get(idx as usize).ok_or(Error::Validation(UNKNOWN_MEMORY)) }
    #[inline]
    pub fn global(&self, idx: u32) -> Result<&Global, Error> { self.globals.get(idx as usize).ok_or(Error::Validation(UNKNOWN_GLOBAL)) }
    #[inline]
    pub fn tag_type(&self, idx: u32) -> Result<&FuncType, Error> {
        let t = self.tags.get(idx as usize).ok_or(Error::Validation(UNKNOWN_TAG))?;
        self.func_type(t.type_idx)
    }
    #[inline]
    pub fn elem(&self, idx: u32) -> Result<&ElemSegment, Error> { self.elems.get(idx as usize).ok_or(Error::Validation(UNKNOWN_ELEM)) }

    pub fn check_data_index(&self, idx: u32) -> Result<(), Error> {
        match self.data_count {
            None => malformed(DATA_COUNT_REQUIRED),
            Some(n) if idx >= n => validation(UNKNOWN_DATA),
            Some(_) => Ok(()),
        }
    }

    #[inline]
    pub fn is_declared_function(&self, func: u32) -> bool { self.declared_funcs.contains(&func) }

    pub fn export(&self, name: &str) -> Option<&Export> { self.export_names.get(name).map(|i| &self.exports[*i]) }

    pub(crate) fn add_import(&mut self, kind: ExternKind, index: u32) { self.imports.push((kind, index)); }

    pub(crate) fn add_export(&mut self, export: Export) -> Result<(), Error> {
        if self.export_names.contains_key(&export.name) { return validation(DUP_EXPORT_NAME); }
        let count = match export.kind {
            ExternKind::Func => self.functions.len(),
            ExternKind::Table => self.tables.len(),
            ExternKind::Memory => self.memories.len(),
            ExternKind::Global => self.globals.len(),
            ExternKind::Tag => self.tags.len(),
        };
        if export.index as usize >= count {
            return validation(match export.kind {
                ExternKind::Func => UNKNOWN_FUNC,
                ExternKind::Table => UNKNOWN_TABLE,
                ExternKind::Memory => UNKNOWN_MEMORY,
                ExternKind::Global => UNKNOWN_GLOBAL,
                ExternKind::Tag => UNKNOWN_TAG,
            });
        }
        if export.kind == ExternKind::Func { self.declared_funcs.insert(export.index); }
        self.export_names.insert(export.name.clone(), self.exports.len());
        self.exports.push(export);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(params: &[ValType], results: &[ValType]) -> SubType {
        SubType { is_final: true, supertype: None, composite: CompositeType::Func(FuncType::new(params, results)) }
    }

    fn open_struct(supertype: Option<u32>, fields: &[ValType]) -> SubType {
        let fields = fields.iter().map(|t| FieldType { storage: StorageType::Val(*t), mutable: false }).collect::<Vec<_>>();
        SubType { is_final: false, supertype, composite: CompositeType::Struct(fields.into()) }
    }

    #[test]
    fn identical_groups_share_canonical_ids() {
        let mut st = SymbolTable::new();
        st.add_rec_group(vec![func(&[ValType::I32], &[])]).unwrap();
        st.add_rec_group(vec![func(&[ValType::I64], &[])]).unwrap();
        st.add_rec_group(vec![func(&[ValType::I32], &[])]).unwrap();
        assert_eq!(st.canonical_id(0), st.canonical_id(2));
        assert_ne!(st.canonical_id(0), st.canonical_id(1));
        let r0 = ValType::reference(HeapType::concrete(0), false);
        let r2 = ValType::reference(HeapType::concrete(2), true);
        assert!(st.is_subtype(r0, r2));
        assert!(!st.is_subtype(r2, r0));
        assert!(st.is_subtype(r0, ValType::FUNCREF));
        assert!(st.is_subtype(ValType::reference(HeapType::NOFUNC, true), r2));
    }

    #[test]
    fn declared_supertype_chain() {
        let mut st = SymbolTable::new();
        st.add_rec_group(vec![open_struct(None, &[ValType::I32])]).unwrap();
        st.add_rec_group(vec![open_struct(Some(0), &[ValType::I32, ValType::F64])]).unwrap();
        let sub = ValType::reference(HeapType::concrete(1), false);
        let sup = ValType::reference(HeapType::concrete(0), false);
        assert!(st.is_subtype(sub, sup));
        assert!(!st.is_subtype(sup, sub));
        assert!(st.is_subtype(sub, ValType::EQREF));
        assert!(st.is_subtype(sub, ValType::STRUCTREF));
        assert!(!st.is_subtype(sub, ValType::ARRAYREF));
        assert!(!st.is_subtype(sub, ValType::FUNCREF));
    }

    #[test]
    fn bad_supertypes() {
        let mut st = SymbolTable::new();
        st.add_rec_group(vec![func(&[], &[])]).unwrap();
        let err = st.add_rec_group(vec![open_struct(Some(0), &[])]);
        assert_eq!(err, Err(Error::Validation(FINAL_SUPERTYPE)));

        let mut st = SymbolTable::new();
        st.add_rec_group(vec![open_struct(None, &[ValType::I32])]).unwrap();
        let err = st.add_rec_group(vec![open_struct(Some(0), &[ValType::I64])]);
        assert_eq!(err, Err(Error::Validation(INVALID_SUPERTYPE)));
    }

    #[test]
    fn abstract_hierarchy() {
        let st = SymbolTable::new();
        assert!(st.is_subtype(ValType::I31REF, ValType::ANYREF));
        assert!(st.is_subtype(ValType::NULLREF, ValType::I31REF));
        assert!(!st.is_subtype(ValType::ANYREF, ValType::EQREF));
        assert!(!st.is_subtype(ValType::EXTERNREF, ValType::ANYREF));
        assert!(!st.is_subtype(ValType::FUNCREF, ValType::reference(HeapType::FUNC, false)));
        assert!(st.is_subtype(ValType::BOTTOM, ValType::F32));
        assert!(st.is_subtype(ValType::reference(HeapType::BOTTOM, false), ValType::EXNREF));
        assert!(!st.is_subtype(ValType::I32, ValType::I64));
    }

    #[test]
    fn limits_matching() {
        let declared = Limits { min: 1, max: Some(10), shared: false, index64: false };
        assert!(Limits { min: 2, max: Some(5), ..declared }.matches(&declared));
        assert!(!Limits { min: 0, max: Some(5), ..declared }.matches(&declared));
        assert!(!Limits { min: 2, max: None, ..declared }.matches(&declared));
        assert!(!Limits { shared: true, ..declared }.matches(&declared));
    }
}
