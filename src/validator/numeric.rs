use crate::byte_iter::ByteIter;
use crate::bytecode::{op, Immediates};
use crate::error::*;
use crate::error_msg::*;
use crate::types::ValType;

use super::FuncValidator;

const I32: &[ValType] = &[ValType::I32];
const I64: &[ValType] = &[ValType::I64];
const F32: &[ValType] = &[ValType::F32];
const F64: &[ValType] = &[ValType::F64];
const I32_I32: &[ValType] = &[ValType::I32, ValType::I32];
const I64_I64: &[ValType] = &[ValType::I64, ValType::I64];
const F32_F32: &[ValType] = &[ValType::F32, ValType::F32];
const F64_F64: &[ValType] = &[ValType::F64, ValType::F64];

/// Operand and result types of the plain numeric operators `0x45..=0xc4`.
pub(super) fn core_signature(opcode: u8) -> Option<(&'static [ValType], ValType)> {
    use ValType as T;
    Some(match opcode {
        0x45 => (I32, T::I32),
        0x46..=0x4f => (I32_I32, T::I32),
        0x50 => (I64, T::I32),
        0x51..=0x5a => (I64_I64, T::I32),
        0x5b..=0x60 => (F32_F32, T::I32),
        0x61..=0x66 => (F64_F64, T::I32),
        0x67..=0x69 => (I32, T::I32),
        0x6a..=0x78 => (I32_I32, T::I32),
        0x79..=0x7b => (I64, T::I64),
        0x7c..=0x8a => (I64_I64, T::I64),
        0x8b..=0x91 => (F32, T::F32),
        0x92..=0x98 => (F32_F32, T::F32),
        0x99..=0x9f => (F64, T::F64),
        0xa0..=0xa6 => (F64_F64, T::F64),
        0xa7 => (I64, T::I32),
        0xa8 | 0xa9 | 0xbc => (F32, T::I32),
        0xaa | 0xab => (F64, T::I32),
        0xac | 0xad => (I32, T::I64),
        0xae | 0xaf => (F32, T::I64),
        0xb0 | 0xb1 | 0xbd => (F64, T::I64),
        0xb2 | 0xb3 | 0xbe => (I32, T::F32),
        0xb4 | 0xb5 => (I64, T::F32),
        0xb6 => (F64, T::F32),
        0xb7 | 0xb8 => (I32, T::F64),
        0xb9 | 0xba | 0xbf => (I64, T::F64),
        0xbb => (F32, T::F64),
        0xc0 | 0xc1 => (I32, T::I32),
        0xc2..=0xc4 => (I64, T::I64),
        _ => return None,
    })
}

/// Saturating truncations, `0xfc 0..=7`.
fn trunc_sat_signature(sub: u32) -> (&'static [ValType], ValType) {
    match sub {
        0 | 1 => (F32, ValType::I32),
        2 | 3 => (F64, ValType::I32),
        4 | 5 => (F32, ValType::I64),
        _ => (F64, ValType::I64),
    }
}

#[inline]
fn narrower(a: ValType, b: ValType) -> ValType { if a == ValType::I64 && b == ValType::I64 { a } else { ValType::I32 } }

impl FuncValidator<'_> {
    /// `0xfc` group: saturating truncation, bulk memory and table operators.
    pub(super) fn visit_misc(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let sub = it.read_u32()?;
        let mut imm = Immediates::new();
        match sub {
            0..=7 => {
                self.require(self.features.saturating_float_to_int, "saturating float to int")?;
                let (params, result) = trunc_sat_signature(sub);
                self.pop_all(params)?;
                self.push(result);
            }
            8 => {
                self.require(self.features.bulk_memory, "bulk memory")?;
                let data = it.read_u32()?;
                let memory = self.memory_index(it)?;
                let addr = self.memory_index_type(memory)?;
                self.symbols.check_data_index(data)?;
                self.pop_all(&[addr, ValType::I32, ValType::I32])?;
                imm.u32(data).u32(memory);
            }
            9 => {
                self.require(self.features.bulk_memory, "bulk memory")?;
                let data = it.read_u32()?;
                self.symbols.check_data_index(data)?;
                imm.u32(data);
            }
            10 => {
                self.require(self.features.bulk_memory, "bulk memory")?;
                let dst = self.memory_index(it)?;
                let src = self.memory_index(it)?;
                let (dt, st) = (self.memory_index_type(dst)?, self.memory_index_type(src)?);
                self.pop_all(&[dt, st, narrower(dt, st)])?;
                imm.u32(dst).u32(src);
            }
            11 => {
                self.require(self.features.bulk_memory, "bulk memory")?;
                let memory = self.memory_index(it)?;
                let addr = self.memory_index_type(memory)?;
                self.pop_all(&[addr, ValType::I32, addr])?;
                imm.u32(memory);
            }
            12 => {
                self.require(self.features.bulk_memory, "bulk memory")?;
                let elem = it.read_u32()?;
                let table = it.read_u32()?;
                let t = self.symbols.table(table)?;
                let (elem_type, addr) = (t.elem_type, t.limits.index_type());
                if !self.symbols.is_subtype(self.symbols.elem(elem)?.elem_type, elem_type) { return validation(TYPE_MISMATCH); }
                self.pop_all(&[addr, ValType::I32, ValType::I32])?;
                imm.u32(elem).u32(table);
            }
            13 => {
                self.require(self.features.bulk_memory, "bulk memory")?;
                let elem = it.read_u32()?;
                self.symbols.elem(elem)?;
                imm.u32(elem);
            }
            14 => {
                self.require(self.features.bulk_memory, "bulk memory")?;
                let dst = it.read_u32()?;
                let src = it.read_u32()?;
                let (d, s) = (self.symbols.table(dst)?, self.symbols.table(src)?);
                if !self.symbols.is_subtype(s.elem_type, d.elem_type) { return validation(TYPE_MISMATCH); }
                let (dt, st) = (d.limits.index_type(), s.limits.index_type());
                self.pop_all(&[dt, st, narrower(dt, st)])?;
                imm.u32(dst).u32(src);
            }
            15..=17 => {
                self.require(self.features.bulk_memory, "reference types")?;
                let table = it.read_u32()?;
                let t = self.symbols.table(table)?;
                let (elem_type, addr) = (t.elem_type, t.limits.index_type());
                match sub {
                    15 => {
                        self.pop_all(&[elem_type, addr])?;
                        self.push(addr);
                    }
                    16 => self.push(addr),
                    _ => self.pop_all(&[addr, elem_type, addr])?,
                }
                imm.u32(table);
            }
            _ => return malformed(UNKNOWN_INSTRUCTION),
        }
        self.w.add_prefixed(op::MISC, sub, &imm);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_signatures() {
        assert_eq!(core_signature(0x6a), Some((I32_I32, ValType::I32)));
        assert_eq!(core_signature(0x50), Some((I64, ValType::I32)));
        assert_eq!(core_signature(0xa7), Some((I64, ValType::I32)));
        assert_eq!(core_signature(0xbf), Some((I64, ValType::F64)));
        assert_eq!(core_signature(0xc4), Some((I64, ValType::I64)));
        assert_eq!(core_signature(0x44), None);
    }
}
