//! Decoder for the internal bytecode, used by inspection tooling and tests.

use std::fmt;

use serde::Serialize;

use crate::bytecode::{mem_access, op};
use crate::error::*;
use crate::error_msg::*;
use crate::module::Module;

const NUMERIC: [&str; 128] = [
    "i32.eqz", "i32.eq", "i32.ne", "i32.lt_s", "i32.lt_u", "i32.gt_s",
    "i32.gt_u", "i32.le_s", "i32.le_u", "i32.ge_s", "i32.ge_u", "i64.eqz",
    "i64.eq", "i64.ne", "i64.lt_s", "i64.lt_u", "i64.gt_s", "i64.gt_u",
    "i64.le_s", "i64.le_u", "i64.ge_s", "i64.ge_u", "f32.eq", "f32.ne",
    "f32.lt", "f32.gt", "f32.le", "f32.ge", "f64.eq", "f64.ne",
    "f64.lt", "f64.gt", "f64.le", "f64.ge", "i32.clz", "i32.ctz",
    "i32.popcnt", "i32.add", "i32.sub", "i32.mul", "i32.div_s", "i32.div_u",
    "i32.rem_s", "i32.rem_u", "i32.and", "i32.or", "i32.xor", "i32.shl",
    "i32.shr_s", "i32.shr_u", "i32.rotl", "i32.rotr", "i64.clz", "i64.ctz",
    "i64.popcnt", "i64.add", "i64.sub", "i64.mul", "i64.div_s", "i64.div_u",
    "i64.rem_s", "i64.rem_u", "i64.and", "i64.or", "i64.xor", "i64.shl",
    "i64.shr_s", "i64.shr_u", "i64.rotl", "i64.rotr", "f32.abs", "f32.neg",
    "f32.ceil", "f32.floor", "f32.trunc", "f32.nearest", "f32.sqrt", "f32.add",
    "f32.sub", "f32.mul", "f32.div", "f32.min", "f32.max", "f32.copysign",
    "f64.abs", "f64.neg", "f64.ceil", "f64.floor", "f64.trunc", "f64.nearest",
    "f64.sqrt", "f64.add", "f64.sub", "f64.mul", "f64.div", "f64.min",
    "f64.max", "f64.copysign", "i32.wrap_i64", "i32.trunc_f32_s", "i32.trunc_f32_u", "i32.trunc_f64_s",
    "i32.trunc_f64_u", "i64.extend_i32_s", "i64.extend_i32_u", "i64.trunc_f32_s", "i64.trunc_f32_u", "i64.trunc_f64_s",
    "i64.trunc_f64_u", "f32.convert_i32_s", "f32.convert_i32_u", "f32.convert_i64_s", "f32.convert_i64_u", "f32.demote_f64",
    "f64.convert_i32_s", "f64.convert_i32_u", "f64.convert_i64_s", "f64.convert_i64_u", "f64.promote_f32", "i32.reinterpret_f32",
    "i64.reinterpret_f64", "f32.reinterpret_i32", "f64.reinterpret_i64", "i32.extend8_s", "i32.extend16_s", "i64.extend8_s",
    "i64.extend16_s", "i64.extend32_s",
];

const MEMORY_ACCESS: [&str; 23] = [
    "i32.load", "i64.load", "f32.load", "f64.load", "i32.load8_s", "i32.load8_u",
    "i32.load16_s", "i32.load16_u", "i64.load8_s", "i64.load8_u", "i64.load16_s", "i64.load16_u",
    "i64.load32_s", "i64.load32_u", "i32.store", "i64.store", "f32.store", "f64.store",
    "i32.store8", "i32.store16", "i64.store8", "i64.store16", "i64.store32",
];

const MISC: [&str; 18] = [
    "i32.trunc_sat_f32_s", "i32.trunc_sat_f32_u", "i32.trunc_sat_f64_s", "i32.trunc_sat_f64_u",
    "i64.trunc_sat_f32_s", "i64.trunc_sat_f32_u", "i64.trunc_sat_f64_s", "i64.trunc_sat_f64_u",
    "memory.init", "data.drop", "memory.copy", "memory.fill", "table.init", "elem.drop",
    "table.copy", "table.grow", "table.size", "table.fill",
];

const AGGREGATE: [&str; 31] = [
    "struct.new", "struct.new_default", "struct.get", "struct.get_s", "struct.get_u", "struct.set",
    "array.new", "array.new_default", "array.new_fixed", "array.new_data", "array.new_elem",
    "array.get", "array.get_s", "array.get_u", "array.set", "array.len", "array.fill", "array.copy",
    "array.init_data", "array.init_elem", "ref.test", "ref.test_null", "ref.cast", "ref.cast_null",
    "br_on_cast", "br_on_cast_fail", "any.convert_extern", "extern.convert_any", "ref.i31",
    "i31.get_s", "i31.get_u",
];

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Index(u32),
    Int(i64),
    F32(f32),
    F64(f64),
    /// Absolute bytecode position of a label or handler.
    Target(u32),
    Label { results: u32, height: u32 },
    Memory { memory: u32, offset: u64 },
    /// Packed immediates of a prefixed instruction.
    Raw(Vec<u8>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Index(i) => write!(f, "{i}"),
            Operand::Int(v) => write!(f, "{v}"),
            Operand::F32(v) => write!(f, "{v}"),
            Operand::F64(v) => write!(f, "{v}"),
            Operand::Target(t) => write!(f, "@{t}"),
            Operand::Label { results, height } => write!(f, "results={results} height={height}"),
            Operand::Memory { memory, offset } => write!(f, "mem={memory} offset={offset}"),
            Operand::Raw(bytes) => {
                f.write_str("[")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 { f.write_str(" ")?; }
                    write!(f, "{b:02x}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: u8,
    /// Sub-opcode of a prefixed instruction.
    pub sub: Option<u16>,
    pub mnemonic: &'static str,
    pub operands: Vec<Operand>,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>6}: {}", self.offset, self.mnemonic)?;
        if let (Some(sub), "") = (self.sub, self.mnemonic) { write!(f, "{:#04x}.{sub}", self.opcode)?; }
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

/// Walks the instructions in `bytes[start..end]`.
pub struct Disassembler<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Disassembler<'a> {
    pub fn new(bytes: &'a [u8], start: usize, end: usize) -> Self { Self { bytes, pos: start, end: end.min(bytes.len()) } }

    /// Instructions of defined function `func`.
    pub fn function(module: &'a Module, func: u32) -> Result<Self, Error> {
        let body = module.function_body(func).ok_or(Error::Validation(UNKNOWN_FUNC))?;
        Ok(Self::new(module.bytecode(), body.body.start, body.body.end))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).filter(|e| *e <= self.end).ok_or(Error::Malformed(UNEXPECTED_END))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, Error> { Ok(self.take(1)?[0]) }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    fn mem_access(&mut self) -> Result<Operand, Error> {
        let flags = self.u8()?;
        let offset = match flags & mem_access::OFFSET_WIDTH_MASK {
            mem_access::OFFSET_U8 => self.u8()? as u64,
            mem_access::OFFSET_U32 => self.u32()? as u64,
            mem_access::OFFSET_U64 => self.u64()?,
            _ => 0,
        };
        let memory = if flags & mem_access::HAS_MEMORY_INDEX != 0 { self.u32()? } else { 0 };
        Ok(Operand::Memory { memory, offset })
    }

    fn decode(&mut self) -> Result<Instruction, Error> {
        let offset = self.pos;
        let opcode = self.u8()?;
        let mut sub = None;
        let mut operands = Vec::new();
        let mnemonic = match opcode {
            op::UNREACHABLE => "unreachable",
            op::NOP => "nop",
            op::LABEL_U8 | op::LABEL_U16 | op::LABEL_I32 => {
                let (results, height) = match opcode {
                    op::LABEL_U8 => (self.u8()? as u32, self.u8()? as u32),
                    op::LABEL_U16 => (self.u16()? as u32, self.u16()? as u32),
                    _ => (self.u32()?, self.u32()?),
                };
                operands.push(Operand::Label { results, height });
                "label"
            }
            op::IF => {
                operands.push(Operand::Target(self.u32()?));
                "if"
            }
            op::BR_U8 | op::BR_IF_U8 => {
                let distance = self.u8()? as usize;
                operands.push(Operand::Target((offset - distance.min(offset)) as u32));
                if opcode == op::BR_U8 { "br" } else { "br_if" }
            }
            op::BR_I32 | op::BR_IF_I32 => {
                operands.push(Operand::Target(self.u32()?));
                if opcode == op::BR_I32 { "br" } else { "br_if" }
            }
            op::BR_TABLE => {
                let n = self.u32()?;
                for _ in 0..=n {
                    operands.push(Operand::Target(self.u32()?));
                }
                "br_table"
            }
            op::RETURN => "return",
            op::CALL_U8 | op::CALL_I32 => {
                let callee = if opcode == op::CALL_U8 { self.u8()? as u32 } else { self.u32()? };
                operands.push(Operand::Index(callee));
                "call"
            }
            op::CALL_INDIRECT => {
                operands.push(Operand::Index(self.u32()?));
                operands.push(Operand::Index(self.u32()?));
                "call_indirect"
            }
            op::CALL_REF => {
                operands.push(Operand::Index(self.u32()?));
                "call_ref"
            }
            op::THROW => {
                operands.push(Operand::Index(self.u32()?));
                "throw"
            }
            op::THROW_REF => "throw_ref",
            op::RETHROW => {
                operands.push(Operand::Index(self.u32()?));
                "rethrow"
            }
            op::LOCAL_GET_U8..=op::GLOBAL_GET_U8 | op::GLOBAL_GET_I32..=op::GLOBAL_SET_I32 => {
                let narrow = matches!(
                    opcode,
                    op::LOCAL_GET_U8 | op::LOCAL_SET_U8 | op::LOCAL_TEE_U8 | op::GLOBAL_GET_U8 | op::GLOBAL_SET_U8
                );
                operands.push(Operand::Index(if narrow { self.u8()? as u32 } else { self.u32()? }));
                match opcode {
                    op::LOCAL_GET_U8 | op::LOCAL_GET_I32 => "local.get",
                    op::LOCAL_SET_U8 | op::LOCAL_SET_I32 => "local.set",
                    op::LOCAL_TEE_U8 | op::LOCAL_TEE_I32 => "local.tee",
                    op::GLOBAL_GET_U8 | op::GLOBAL_GET_I32 => "global.get",
                    _ => "global.set",
                }
            }
            op::DROP => "drop",
            op::SELECT => "select",
            op::TABLE_GET | op::TABLE_SET => {
                operands.push(Operand::Index(self.u32()?));
                if opcode == op::TABLE_GET { "table.get" } else { "table.set" }
            }
            op::FIRST_MEMORY_ACCESS..=op::LAST_MEMORY_ACCESS => {
                operands.push(self.mem_access()?);
                MEMORY_ACCESS[(opcode - op::FIRST_MEMORY_ACCESS) as usize]
            }
            op::MEMORY_SIZE | op::MEMORY_GROW => {
                operands.push(Operand::Index(self.u32()?));
                if opcode == op::MEMORY_SIZE { "memory.size" } else { "memory.grow" }
            }
            op::I32_CONST_I32 => {
                operands.push(Operand::Int(self.u32()? as i32 as i64));
                "i32.const"
            }
            op::I64_CONST_I64 => {
                operands.push(Operand::Int(self.u64()? as i64));
                "i64.const"
            }
            op::I32_CONST_I8 | op::I64_CONST_I8 => {
                operands.push(Operand::Int(self.u8()? as i8 as i64));
                if opcode == op::I32_CONST_I8 { "i32.const" } else { "i64.const" }
            }
            op::F32_CONST => {
                operands.push(Operand::F32(f32::from_bits(self.u32()?)));
                "f32.const"
            }
            op::F64_CONST => {
                operands.push(Operand::F64(f64::from_bits(self.u64()?)));
                "f64.const"
            }
            op::FIRST_NUMERIC..=op::LAST_NUMERIC => NUMERIC[(opcode - op::FIRST_NUMERIC) as usize],
            op::REF_NULL => "ref.null",
            op::REF_IS_NULL => "ref.is_null",
            op::REF_FUNC => {
                operands.push(Operand::Index(self.u32()?));
                "ref.func"
            }
            op::REF_EQ => "ref.eq",
            op::REF_AS_NON_NULL => "ref.as_non_null",
            op::BR_ON_NULL | op::BR_ON_NON_NULL => {
                operands.push(Operand::Target(self.u32()?));
                if opcode == op::BR_ON_NULL { "br_on_null" } else { "br_on_non_null" }
            }
            op::AGGREGATE | op::MISC | op::VECTOR | op::ATOMIC => {
                let s = self.u16()?;
                let len = self.u8()? as usize;
                sub = Some(s);
                let imm = self.take(len)?;
                if !imm.is_empty() { operands.push(Operand::Raw(imm.to_vec())); }
                let table: &[&'static str] = match opcode {
                    op::AGGREGATE => &AGGREGATE,
                    op::MISC => &MISC,
                    _ => &[],
                };
                table.get(s as usize).copied().unwrap_or("")
            }
            _ => return malformed(UNKNOWN_INSTRUCTION),
        };
        Ok(Instruction { offset, opcode, sub, mnemonic, operands })
    }
}

impl Iterator for Disassembler<'_> {
    type Item = Result<Instruction, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end { return None; }
        let item = self.decode();
        // Stop after the first undecodable byte.
        if item.is_err() { self.pos = self.end; }
        Some(item)
    }
}

/// Decodes the body of defined function `func` into a list.
pub fn disassemble(module: &Module, func: u32) -> Result<Vec<Instruction>, Error> {
    Disassembler::function(module, func)?.collect()
}
