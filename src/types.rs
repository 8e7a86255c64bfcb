use std::fmt::{Display, Formatter};

use crate::byte_iter::ByteIter;
use crate::config::Features;
use crate::error::*;
use crate::error_msg::*;

/// Heap type of a reference. Negative values are the abstract heap types,
/// using their binary s33 codes; non-negative values are type indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeapType(i32);

impl HeapType {
    pub const FUNC: HeapType = HeapType(-0x10);
    pub const EXTERN: HeapType = HeapType(-0x11);
    pub const ANY: HeapType = HeapType(-0x12);
    pub const EQ: HeapType = HeapType(-0x13);
    pub const I31: HeapType = HeapType(-0x14);
    pub const STRUCT: HeapType = HeapType(-0x15);
    pub const ARRAY: HeapType = HeapType(-0x16);
    pub const EXN: HeapType = HeapType(-0x17);
    pub const NONE: HeapType = HeapType(-0x0f);
    pub const NOEXTERN: HeapType = HeapType(-0x0e);
    pub const NOFUNC: HeapType = HeapType(-0x0d);
    pub const NOEXN: HeapType = HeapType(-0x0c);
    /// Unknown heap type of a reference popped from a polymorphic stack.
    pub const BOTTOM: HeapType = HeapType(-0x40);

    /// Largest type index that fits the encoding.
    pub const MAX_INDEX: u32 = (1 << 29) - 1;

    #[inline]
    pub fn concrete(idx: u32) -> Self {
        debug_assert!(idx <= Self::MAX_INDEX);
        HeapType(idx as i32)
    }
    #[inline]
    pub fn index(self) -> Option<u32> { if self.0 >= 0 { Some(self.0 as u32) } else { None } }
    #[inline]
    pub fn is_abstract(self) -> bool { self.0 < 0 }
    #[inline]
    pub fn raw(self) -> i32 { self.0 }

    /// Abstract heap type named by a single binary byte.
    pub fn from_abstract_byte(b: u8) -> Option<Self> {
        let ht = HeapType((b as i32) - 0x80);
        match ht {
            Self::FUNC | Self::EXTERN | Self::ANY | Self::EQ | Self::I31 | Self::STRUCT | Self::ARRAY | Self::EXN
            | Self::NONE | Self::NOEXTERN | Self::NOFUNC | Self::NOEXN => Some(ht),
            _ => None,
        }
    }

    /// The extension that introduced this abstract heap type.
    fn required_feature(self, f: &Features) -> Result<(), Error> {
        match self {
            Self::FUNC | Self::EXTERN => if f.bulk_memory { Ok(()) } else { disabled("reference types") },
            Self::EXN | Self::NOEXN => if f.exceptions { Ok(()) } else { disabled("exception handling") },
            _ if self.is_abstract() => if f.gc { Ok(()) } else { disabled("gc") },
            _ => if f.typed_references() { Ok(()) } else { disabled("function references") },
        }
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::FUNC => "func",
            Self::EXTERN => "extern",
            Self::ANY => "any",
            Self::EQ => "eq",
            Self::I31 => "i31",
            Self::STRUCT => "struct",
            Self::ARRAY => "array",
            Self::EXN => "exn",
            Self::NONE => "none",
            Self::NOEXTERN => "noextern",
            Self::NOFUNC => "nofunc",
            Self::NOEXN => "noexn",
            Self::BOTTOM => "bot",
            _ => return None,
        })
    }
}

impl Display for HeapType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(n) => f.write_str(n),
            None => write!(f, "{}", self.0),
        }
    }
}

/// A value type packed into an `i32`: bit 0 is nullability, the remaining bits
/// (arithmetic shift) hold the type code. Negative codes are primitive or
/// abstract types, non-negative codes are concrete type indices.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValType(i32);

const NULLABLE: i32 = 1;
const CODE_I32: i32 = -0x01;
const CODE_I64: i32 = -0x02;
const CODE_F32: i32 = -0x03;
const CODE_F64: i32 = -0x04;
const CODE_V128: i32 = -0x05;
const CODE_TOP: i32 = -0x60;
const CODE_BOTTOM: i32 = -0x61;

impl ValType {
    pub const I32: ValType = ValType(CODE_I32 << 1);
    pub const I64: ValType = ValType(CODE_I64 << 1);
    pub const F32: ValType = ValType(CODE_F32 << 1);
    pub const F64: ValType = ValType(CODE_F64 << 1);
    pub const V128: ValType = ValType(CODE_V128 << 1);
    /// Supertype of every value type.
    pub const TOP: ValType = ValType(CODE_TOP << 1);
    /// Unknown value from a polymorphic stack; subtype of every value type.
    pub const BOTTOM: ValType = ValType(CODE_BOTTOM << 1);

    pub const FUNCREF: ValType = ValType::reference(HeapType::FUNC, true);
    pub const EXTERNREF: ValType = ValType::reference(HeapType::EXTERN, true);
    pub const ANYREF: ValType = ValType::reference(HeapType::ANY, true);
    pub const EQREF: ValType = ValType::reference(HeapType::EQ, true);
    pub const I31REF: ValType = ValType::reference(HeapType::I31, true);
    pub const STRUCTREF: ValType = ValType::reference(HeapType::STRUCT, true);
    pub const ARRAYREF: ValType = ValType::reference(HeapType::ARRAY, true);
    pub const EXNREF: ValType = ValType::reference(HeapType::EXN, true);
    pub const NULLREF: ValType = ValType::reference(HeapType::NONE, true);

    #[inline]
    pub const fn reference(heap: HeapType, nullable: bool) -> Self {
        ValType((heap.0 << 1) | if nullable { NULLABLE } else { 0 })
    }
    #[inline]
    pub fn raw(self) -> i32 { self.0 }
    /// Inverse of `raw`, for encodings written by this crate.
    #[inline]
    pub fn from_raw(raw: i32) -> Self { ValType(raw) }
    #[inline]
    fn code(self) -> i32 { self.0 >> 1 }
    #[inline]
    pub fn is_reference(self) -> bool {
        let c = self.code();
        c >= 0 || (c <= HeapType::NOEXN.0 && c >= HeapType::BOTTOM.0)
    }
    #[inline]
    pub fn heap_type(self) -> Option<HeapType> {
        if self.is_reference() { Some(HeapType(self.code())) } else { None }
    }
    #[inline]
    pub fn is_nullable(self) -> bool { self.0 & NULLABLE != 0 }
    #[inline]
    pub fn as_non_null(self) -> Self { if self.is_reference() { ValType(self.0 & !NULLABLE) } else { self } }
    #[inline]
    pub fn as_nullable(self) -> Self { if self.is_reference() { ValType(self.0 | NULLABLE) } else { self } }
    #[inline]
    pub fn is_numeric(self) -> bool { matches!(self.code(), CODE_I32 | CODE_I64 | CODE_F32 | CODE_F64) }
    #[inline]
    pub fn is_num_or_vec(self) -> bool { self.is_numeric() || self == Self::V128 }
    #[inline]
    pub fn is_defaultable(self) -> bool { !self.is_reference() || self.is_nullable() }

    /// Stack slots the value occupies in the encoded operand stack.
    #[inline]
    pub fn slots(self) -> u32 { 1 }
}

impl std::fmt::Debug for ValType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Display::fmt(self, f) }
}

impl Display for ValType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::V128 => f.write_str("v128"),
            Self::TOP => f.write_str("top"),
            Self::BOTTOM => f.write_str("bot"),
            _ => match self.heap_type() {
                Some(ht) if self.is_nullable() && ht.is_abstract() && ht != HeapType::BOTTOM => write!(f, "{ht}ref"),
                Some(ht) if self.is_nullable() => write!(f, "(ref null {ht})"),
                Some(ht) => write!(f, "(ref {ht})"),
                None => write!(f, "<invalid {}>", self.0),
            },
        }
    }
}

impl serde::Serialize for ValType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.collect_str(self) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageType {
    Val(ValType),
    I8,
    I16,
}

impl StorageType {
    /// Operand type used when reading or writing a field.
    #[inline]
    pub fn unpacked(self) -> ValType {
        match self {
            StorageType::Val(t) => t,
            StorageType::I8 | StorageType::I16 => ValType::I32,
        }
    }
    #[inline]
    pub fn is_packed(self) -> bool { !matches!(self, StorageType::Val(_)) }
    #[inline]
    pub fn is_defaultable(self) -> bool { self.unpacked().is_defaultable() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FieldType {
    pub storage: StorageType,
    pub mutable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct FuncType {
    pub params: Box<[ValType]>,
    pub results: Box<[ValType]>,
}

impl FuncType {
    pub fn new(params: impl Into<Box<[ValType]>>, results: impl Into<Box<[ValType]>>) -> Self {
        Self { params: params.into(), results: results.into() }
    }
}

impl Display for FuncType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let join = |ts: &[ValType]| ts.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ");
        write!(f, "[{}] -> [{}]", join(&self.params), join(&self.results))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompositeType {
    Func(FuncType),
    Struct(Box<[FieldType]>),
    Array(FieldType),
}

impl CompositeType {
    /// Abstract heap type that every type of this kind is a subtype of.
    pub fn top(&self) -> HeapType {
        match self {
            CompositeType::Func(_) => HeapType::FUNC,
            CompositeType::Struct(_) => HeapType::STRUCT,
            CompositeType::Array(_) => HeapType::ARRAY,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubType {
    pub is_final: bool,
    pub supertype: Option<u32>,
    pub composite: CompositeType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValType),
    Func(u32),
}

/// Decodes types while a given number of type indices is visible.
#[derive(Clone, Copy)]
pub struct TypeReader<'f> {
    pub features: &'f Features,
    pub type_count: u32,
}

impl<'f> TypeReader<'f> {
    pub fn new(features: &'f Features, type_count: u32) -> Self { Self { features, type_count } }

    fn concrete(&self, idx: i64) -> Result<HeapType, Error> {
        if idx < 0 { return malformed(INVALID_HEAP_TYPE); }
        if idx >= self.type_count as i64 || idx > HeapType::MAX_INDEX as i64 { return validation(UNKNOWN_TYPE); }
        Ok(HeapType::concrete(idx as u32))
    }

    pub fn heap_type(&self, it: &mut ByteIter) -> Result<HeapType, Error> {
        if let Some(ht) = HeapType::from_abstract_byte(it.peek_u8()?) {
            it.read_u8()?;
            ht.required_feature(self.features)?;
            return Ok(ht);
        }
        let idx = it.read_s33()?;
        let ht = self.concrete(idx)?;
        ht.required_feature(self.features)?;
        Ok(ht)
    }

    fn decode_val_type(&self, b: u8, it: &mut ByteIter) -> Result<ValType, Error> {
        match b {
            0x7f => Ok(ValType::I32),
            0x7e => Ok(ValType::I64),
            0x7d => Ok(ValType::F32),
            0x7c => Ok(ValType::F64),
            0x7b => if self.features.simd { Ok(ValType::V128) } else { disabled("simd") },
            0x63 | 0x64 => {
                if !self.features.typed_references() { return disabled("function references"); }
                let ht = self.heap_type(it)?;
                Ok(ValType::reference(ht, b == 0x63))
            }
            _ => {
                let ht = HeapType::from_abstract_byte(b).ok_or(Error::Malformed(INVALID_VALUE_TYPE))?;
                ht.required_feature(self.features)?;
                Ok(ValType::reference(ht, true))
            }
        }
    }

    pub fn val_type(&self, it: &mut ByteIter) -> Result<ValType, Error> {
        let b = it.read_u8()?;
        self.decode_val_type(b, it)
    }

    /// Reference type of a table or element segment. `funcref` is always legal here.
    pub fn ref_type(&self, it: &mut ByteIter) -> Result<ValType, Error> {
        let b = it.read_u8()?;
        if b == 0x70 { return Ok(ValType::FUNCREF); }
        let t = self.decode_val_type(b, it).map_err(|e| match e {
            Error::Malformed(INVALID_VALUE_TYPE) => Error::Malformed(INVALID_HEAP_TYPE),
            e => e,
        })?;
        if !t.is_reference() { return malformed(INVALID_HEAP_TYPE); }
        Ok(t)
    }

    pub fn block_type(&self, it: &mut ByteIter) -> Result<BlockType, Error> {
        let b = it.peek_u8()?;
        if b == 0x40 {
            it.read_u8()?;
            return Ok(BlockType::Empty);
        }
        if matches!(b, 0x7b..=0x7f | 0x63 | 0x64) || HeapType::from_abstract_byte(b).is_some() {
            return Ok(BlockType::Value(self.val_type(it)?));
        }
        let idx = it.read_s33()?;
        if idx < 0 { return malformed(INVALID_VALUE_TYPE); }
        if !self.features.multi_value { return disabled("multi-value"); }
        if idx >= self.type_count as i64 { return validation(UNKNOWN_TYPE); }
        Ok(BlockType::Func(idx as u32))
    }

    pub fn storage_type(&self, it: &mut ByteIter) -> Result<StorageType, Error> {
        match it.peek_u8()? {
            0x78 => { it.read_u8()?; Ok(StorageType::I8) }
            0x77 => { it.read_u8()?; Ok(StorageType::I16) }
            _ => Ok(StorageType::Val(self.val_type(it)?)),
        }
    }

    pub fn field_type(&self, it: &mut ByteIter) -> Result<FieldType, Error> {
        let storage = self.storage_type(it)?;
        let mutable = read_mutability(it)?;
        Ok(FieldType { storage, mutable })
    }

    pub fn func_type(&self, it: &mut ByteIter) -> Result<FuncType, Error> {
        let n = it.read_vec_len(1)?;
        let params = (0..n).map(|_| self.val_type(it)).collect::<Result<Vec<_>, _>>()?;
        let n = it.read_vec_len(1)?;
        if n > 1 && !self.features.multi_value { return validation(INVALID_RESULT_ARITY); }
        let results = (0..n).map(|_| self.val_type(it)).collect::<Result<Vec<_>, _>>()?;
        Ok(FuncType::new(params, results))
    }

    pub fn composite_type(&self, it: &mut ByteIter) -> Result<CompositeType, Error> {
        match it.read_u8()? {
            0x60 => Ok(CompositeType::Func(self.func_type(it)?)),
            0x5f => {
                if !self.features.gc { return disabled("gc"); }
                let n = it.read_vec_len(2)?;
                let fields = (0..n).map(|_| self.field_type(it)).collect::<Result<Vec<_>, _>>()?;
                Ok(CompositeType::Struct(fields.into()))
            }
            0x5e => {
                if !self.features.gc { return disabled("gc"); }
                Ok(CompositeType::Array(self.field_type(it)?))
            }
            _ => malformed(INVALID_COMPOSITE_TYPE),
        }
    }

    /// `sub`, `sub final` or a bare composite type (implicitly final).
    pub fn sub_type(&self, it: &mut ByteIter) -> Result<SubType, Error> {
        let b = it.peek_u8()?;
        if b == 0x50 || b == 0x4f {
            if !self.features.gc { return disabled("gc"); }
            it.read_u8()?;
            let n = it.read_vec_len(1)?;
            if n > 1 { return validation(TOO_MANY_SUPERTYPES); }
            let mut supertype = None;
            for _ in 0..n {
                let idx = it.read_u32()?;
                if idx >= self.type_count { return validation(UNKNOWN_TYPE); }
                supertype = Some(idx);
            }
            let composite = self.composite_type(it)?;
            return Ok(SubType { is_final: b == 0x4f, supertype, composite });
        }
        Ok(SubType { is_final: true, supertype: None, composite: self.composite_type(it)? })
    }
}

pub fn read_mutability(it: &mut ByteIter) -> Result<bool, Error> {
    match it.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        _ => malformed(INVALID_MUTABILITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_keeps_sign_and_nullability() {
        let r = ValType::reference(HeapType::concrete(7), false);
        assert!(r.is_reference());
        assert!(!r.is_nullable());
        assert!(r.raw() >= 0);
        assert_eq!(r.heap_type(), Some(HeapType::concrete(7)));
        assert_eq!(r.as_nullable().heap_type(), Some(HeapType::concrete(7)));
        assert!(ValType::I32.raw() < 0);
        assert!(!ValType::I32.is_reference());
        assert!(!ValType::BOTTOM.is_reference());
        assert!(ValType::FUNCREF.is_nullable());
        assert_eq!(ValType::FUNCREF.heap_type(), Some(HeapType::FUNC));
        assert!(ValType::reference(HeapType::BOTTOM, false).is_reference());
    }

    #[test]
    fn defaultability() {
        assert!(ValType::I64.is_defaultable());
        assert!(ValType::EXTERNREF.is_defaultable());
        assert!(!ValType::reference(HeapType::FUNC, false).is_defaultable());
    }

    #[test]
    fn display_names() {
        assert_eq!(ValType::FUNCREF.to_string(), "funcref");
        assert_eq!(ValType::reference(HeapType::concrete(2), true).to_string(), "(ref null 2)");
        assert_eq!(ValType::reference(HeapType::EQ, false).to_string(), "(ref eq)");
    }

    #[test]
    fn value_type_bytes() {
        let f = Features::default();
        let r = TypeReader::new(&f, 4);
        let bytes = [0x7f, 0x70, 0x64, 0x03, 0x63, 0x6e, 0x64, 0x05];
        let mut it = ByteIter::new(&bytes, 0);
        assert_eq!(r.val_type(&mut it), Ok(ValType::I32));
        assert_eq!(r.val_type(&mut it), Ok(ValType::FUNCREF));
        assert_eq!(r.val_type(&mut it), Ok(ValType::reference(HeapType::concrete(3), false)));
        assert_eq!(r.val_type(&mut it), Ok(ValType::ANYREF));
        assert_eq!(r.val_type(&mut it), Err(Error::Validation(UNKNOWN_TYPE)));
    }

    #[test]
    fn features_gate_type_bytes() {
        let f = Features::mvp();
        let r = TypeReader::new(&f, 0);
        assert_eq!(r.val_type(&mut ByteIter::new(&[0x7b], 0)), Err(Error::Feature("simd")));
        assert_eq!(r.val_type(&mut ByteIter::new(&[0x6f], 0)), Err(Error::Feature("reference types")));
        assert_eq!(r.ref_type(&mut ByteIter::new(&[0x70], 0)), Ok(ValType::FUNCREF));
        assert_eq!(r.val_type(&mut ByteIter::new(&[0x55], 0)), Err(Error::Malformed(INVALID_VALUE_TYPE)));
    }
}
