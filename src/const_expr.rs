use std::ops::Range;

use paste::paste;

use crate::byte_iter::ByteIter;
use crate::bytecode::{op, BytecodeWriter, Immediates};
use crate::config::Features;
use crate::error::*;
use crate::error_msg::*;
use crate::symbol_table::SymbolTable;
use crate::types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    /// Raw bits.
    F32(u32),
    /// Raw bits.
    F64(u64),
    V128(u128),
    Null(HeapType),
    FuncRef(u32),
}

/// Initializer of a global, table, or segment offset. Expressions made only of
/// literals fold to a value; anything else is kept as bytecode together with
/// the globals and functions it reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConstInit {
    Value(ConstValue),
    Bytecode { range: Range<usize>, globals: Vec<u32>, functions: Vec<u32> },
}

impl ConstInit {
    pub fn value(&self) -> Option<ConstValue> {
        match self {
            ConstInit::Value(v) => Some(*v),
            ConstInit::Bytecode { .. } => None,
        }
    }

    pub fn global_dependencies(&self) -> &[u32] {
        match self {
            ConstInit::Bytecode { globals, .. } => globals,
            ConstInit::Value(_) => &[],
        }
    }

    pub fn function_dependencies(&self) -> &[u32] {
        match self {
            ConstInit::Value(ConstValue::FuncRef(f)) => std::slice::from_ref(f),
            ConstInit::Bytecode { functions, .. } => functions,
            ConstInit::Value(_) => &[],
        }
    }
}

pub(crate) struct ConstExprReader<'a> {
    pub symbols: &'a SymbolTable,
    pub features: &'a Features,
    /// Globals that `global.get` may name.
    pub visible_globals: u32,
}

macro_rules! fold_binary {
    ($stack:expr, $variant:ident, $op:ident) => {{
        let b = $stack.pop();
        let a = $stack.pop();
        match (a, b) {
            (Some(Some(ConstValue::$variant(a))), Some(Some(ConstValue::$variant(b)))) => {
                paste! { $stack.push(Some(ConstValue::$variant(a.[<wrapping_ $op>](b)))) }
            }
            _ => $stack.push(None),
        }
    }};
}

impl ConstExprReader<'_> {
    fn pop(&self, types: &mut Vec<ValType>, folded: &mut Vec<Option<ConstValue>>, expected: ValType) -> Result<Option<ConstValue>, Error> {
        let actual = types.pop().ok_or(Error::Validation(TYPE_MISMATCH))?;
        if !self.symbols.is_subtype(actual, expected) { return validation(TYPE_MISMATCH); }
        Ok(folded.pop().flatten())
    }

    /// Validates a constant expression of type `expected` up to and including its `end`.
    pub fn read(&self, it: &mut ByteIter, expected: ValType, w: &mut BytecodeWriter) -> Result<ConstInit, Error> {
        let start = w.position();
        let mut types: Vec<ValType> = Vec::new();
        let mut folded: Vec<Option<ConstValue>> = Vec::new();
        let mut globals = Vec::new();
        let mut functions = Vec::new();
        loop {
            let opcode = it.read_u8()?;
            match opcode {
                0x0b => break,
                0x41 => {
                    let v = it.read_s32()?;
                    w.add_i32_const(v);
                    types.push(ValType::I32);
                    folded.push(Some(ConstValue::I32(v)));
                }
                0x42 => {
                    let v = it.read_s64()?;
                    w.add_i64_const(v);
                    types.push(ValType::I64);
                    folded.push(Some(ConstValue::I64(v)));
                }
                0x43 => {
                    let v = it.read_f32_bits()?;
                    w.add_f32_const(v);
                    types.push(ValType::F32);
                    folded.push(Some(ConstValue::F32(v)));
                }
                0x44 => {
                    let v = it.read_f64_bits()?;
                    w.add_f64_const(v);
                    types.push(ValType::F64);
                    folded.push(Some(ConstValue::F64(v)));
                }
                0xd0 => {
                    if !self.features.bulk_memory { return disabled("reference types"); }
                    let ht = TypeReader::new(self.features, self.symbols.type_count()).heap_type(it)?;
                    w.add_op(op::REF_NULL);
                    types.push(ValType::reference(ht, true));
                    folded.push(Some(ConstValue::Null(ht)));
                }
                0xd2 => {
                    if !self.features.bulk_memory { return disabled("reference types"); }
                    let f = it.read_u32()?;
                    let ty = self.symbols.functions.get(f as usize).ok_or(Error::Validation(UNKNOWN_FUNC))?.type_idx;
                    w.add_op(op::REF_FUNC);
                    w.add_u32(f);
                    types.push(if self.features.typed_references() {
                        ValType::reference(HeapType::concrete(ty), false)
                    } else {
                        ValType::FUNCREF
                    });
                    folded.push(Some(ConstValue::FuncRef(f)));
                    functions.push(f);
                }
                0x23 => {
                    let g = it.read_u32()?;
                    if g >= self.visible_globals { return validation(UNKNOWN_GLOBAL); }
                    let global = self.symbols.global(g)?;
                    if global.mutable { return validation(CONST_EXP_REQUIRED); }
                    w.add_index(op::GLOBAL_GET_U8, op::GLOBAL_GET_I32, g);
                    types.push(global.ty);
                    folded.push(None);
                    globals.push(g);
                }
                0x6a..=0x6c | 0x7c..=0x7e => {
                    if !self.features.extended_const { return validation(CONST_EXP_REQUIRED); }
                    let t = if opcode <= 0x6c { ValType::I32 } else { ValType::I64 };
                    for _ in 0..2 {
                        let ty = types.pop().ok_or(Error::Validation(TYPE_MISMATCH))?;
                        if ty != t && ty != ValType::BOTTOM { return validation(TYPE_MISMATCH); }
                    }
                    match opcode {
                        0x6a => fold_binary!(folded, I32, add),
                        0x6b => fold_binary!(folded, I32, sub),
                        0x6c => fold_binary!(folded, I32, mul),
                        0x7c => fold_binary!(folded, I64, add),
                        0x7d => fold_binary!(folded, I64, sub),
                        _ => fold_binary!(folded, I64, mul),
                    }
                    w.add_op(opcode);
                    types.push(t);
                }
                0xfd => {
                    let sub = it.read_u32()?;
                    if sub != 12 { return validation(CONST_EXP_REQUIRED); }
                    if !self.features.simd { return disabled("simd"); }
                    let v = it.read_v128()?;
                    let idx = w.add_v128_constant(v);
                    w.add_prefixed(op::VECTOR, sub, Immediates::new().u32(idx));
                    types.push(ValType::V128);
                    folded.push(Some(ConstValue::V128(v)));
                }
                0xfb => {
                    if !self.features.gc { return disabled("gc"); }
                    let result = self.read_gc(it, &mut types, &mut folded, w)?;
                    types.push(result);
                    folded.push(None);
                }
                _ => return validation(CONST_EXP_REQUIRED),
            }
        }
        if types.len() != 1 || !self.symbols.is_subtype(types[0], expected) { return validation(TYPE_MISMATCH); }
        match folded.pop().flatten() {
            Some(v) => {
                w.truncate(start);
                Ok(ConstInit::Value(v))
            }
            None => Ok(ConstInit::Bytecode { range: start..w.position(), globals, functions }),
        }
    }

    fn read_gc(&self, it: &mut ByteIter, types: &mut Vec<ValType>, folded: &mut Vec<Option<ConstValue>>, w: &mut BytecodeWriter) -> Result<ValType, Error> {
        let sub = it.read_u32()?;
        let mut imm = Immediates::new();
        let result = match sub {
            0 | 1 => {
                let x = it.read_u32()?;
                let fields = self.symbols.struct_type(x)?;
                if sub == 0 {
                    for f in fields.iter().rev() {
                        self.pop(types, folded, f.storage.unpacked())?;
                    }
                } else if !fields.iter().all(|f| f.storage.is_defaultable()) {
                    return validation(NON_DEFAULTABLE);
                }
                imm.u32(x);
                ValType::reference(HeapType::concrete(x), false)
            }
            6 | 7 => {
                let x = it.read_u32()?;
                let field = self.symbols.array_type(x)?;
                self.pop(types, folded, ValType::I32)?;
                if sub == 6 {
                    self.pop(types, folded, field.storage.unpacked())?;
                } else if !field.storage.is_defaultable() {
                    return validation(NON_DEFAULTABLE);
                }
                imm.u32(x);
                ValType::reference(HeapType::concrete(x), false)
            }
            8 => {
                let x = it.read_u32()?;
                let n = it.read_u32()?;
                let field = self.symbols.array_type(x)?;
                for _ in 0..n {
                    self.pop(types, folded, field.storage.unpacked())?;
                }
                imm.u32(x).u32(n);
                ValType::reference(HeapType::concrete(x), false)
            }
            28 => {
                self.pop(types, folded, ValType::I32)?;
                ValType::reference(HeapType::I31, false)
            }
            26 | 27 => {
                let (from, to) = if sub == 26 { (HeapType::EXTERN, HeapType::ANY) } else { (HeapType::ANY, HeapType::EXTERN) };
                let actual = *types.last().ok_or(Error::Validation(TYPE_MISMATCH))?;
                self.pop(types, folded, ValType::reference(from, true))?;
                ValType::reference(to, actual.is_nullable())
            }
            _ => return validation(CONST_EXP_REQUIRED),
        };
        w.add_prefixed(op::AGGREGATE, sub, &imm);
        Ok(result)
    }
}
