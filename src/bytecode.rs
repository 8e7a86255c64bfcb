//! Internal bytecode. Instructions are written to one append-only buffer per
//! module. Numeric operators keep their WebAssembly opcode byte; everything
//! else uses the opcodes below with fixed-width little-endian immediates.
//!
//! Per function the layout is `[body][code entry header][exception table]`.
//! The header records the body length, so the body is the `length` bytes
//! before the header offset.

use std::ops::Range;

use serde::Serialize;

use crate::error::*;
use crate::error_msg::*;
use crate::types::ValType;

pub mod op {
    pub const UNREACHABLE: u8 = 0x00;
    pub const NOP: u8 = 0x01;
    /// `[results u8][stack height u8]`
    pub const LABEL_U8: u8 = 0x02;
    /// `[results u16][stack height u16]`
    pub const LABEL_U16: u8 = 0x03;
    /// `[results u32][stack height u32]`
    pub const LABEL_I32: u8 = 0x04;
    /// `[else or end target i32]`, jumps when the condition is zero.
    pub const IF: u8 = 0x05;
    /// `[backward distance u8]`
    pub const BR_U8: u8 = 0x06;
    /// `[target i32]`
    pub const BR_I32: u8 = 0x07;
    pub const BR_IF_U8: u8 = 0x08;
    pub const BR_IF_I32: u8 = 0x09;
    /// `[count u32][target i32; count + 1]`, default target last.
    pub const BR_TABLE: u8 = 0x0a;
    pub const RETURN: u8 = 0x0b;
    pub const CALL_U8: u8 = 0x0c;
    pub const CALL_I32: u8 = 0x0d;
    /// `[type u32][table u32]`
    pub const CALL_INDIRECT: u8 = 0x0e;
    /// `[type u32]`
    pub const CALL_REF: u8 = 0x0f;
    /// `[tag u32]`
    pub const THROW: u8 = 0x10;
    pub const THROW_REF: u8 = 0x11;
    /// `[label depth u32]`
    pub const RETHROW: u8 = 0x12;
    pub const LOCAL_GET_U8: u8 = 0x13;
    pub const LOCAL_SET_U8: u8 = 0x14;
    pub const LOCAL_TEE_U8: u8 = 0x15;
    pub const LOCAL_GET_I32: u8 = 0x16;
    pub const LOCAL_SET_I32: u8 = 0x17;
    pub const LOCAL_TEE_I32: u8 = 0x18;
    pub const GLOBAL_GET_U8: u8 = 0x19;
    pub const DROP: u8 = 0x1a;
    pub const SELECT: u8 = 0x1b;
    pub const GLOBAL_GET_I32: u8 = 0x1c;
    pub const GLOBAL_SET_U8: u8 = 0x1d;
    pub const GLOBAL_SET_I32: u8 = 0x1e;
    pub const TABLE_GET: u8 = 0x25;
    pub const TABLE_SET: u8 = 0x26;
    /// Loads and stores keep their opcodes (0x28..=0x3e) and carry a memory access descriptor.
    pub const FIRST_MEMORY_ACCESS: u8 = 0x28;
    pub const LAST_MEMORY_ACCESS: u8 = 0x3e;
    pub const MEMORY_SIZE: u8 = 0x3f;
    pub const MEMORY_GROW: u8 = 0x40;
    pub const I32_CONST_I32: u8 = 0x41;
    pub const I64_CONST_I64: u8 = 0x42;
    pub const F32_CONST: u8 = 0x43;
    pub const F64_CONST: u8 = 0x44;
    pub const FIRST_NUMERIC: u8 = 0x45;
    pub const LAST_NUMERIC: u8 = 0xc4;
    pub const I32_CONST_I8: u8 = 0xc5;
    pub const I64_CONST_I8: u8 = 0xc6;
    pub const REF_NULL: u8 = 0xd0;
    pub const REF_IS_NULL: u8 = 0xd1;
    pub const REF_FUNC: u8 = 0xd2;
    pub const REF_EQ: u8 = 0xd3;
    pub const REF_AS_NON_NULL: u8 = 0xd4;
    pub const BR_ON_NULL: u8 = 0xd5;
    pub const BR_ON_NON_NULL: u8 = 0xd6;
    /// Prefixed groups: `[prefix][sub u16][immediate length u8][immediates]`.
    pub const AGGREGATE: u8 = 0xfb;
    pub const MISC: u8 = 0xfc;
    pub const VECTOR: u8 = 0xfd;
    pub const ATOMIC: u8 = 0xfe;
}

/// Memory access descriptor flags, following the opcode of a load or store.
pub mod mem_access {
    pub const OFFSET_WIDTH_MASK: u8 = 0b011;
    pub const OFFSET_ZERO: u8 = 0;
    pub const OFFSET_U8: u8 = 1;
    pub const OFFSET_U32: u8 = 2;
    pub const OFFSET_U64: u8 = 3;
    /// A `u32` memory index follows the offset; otherwise memory 0.
    pub const HAS_MEMORY_INDEX: u8 = 0b100;
}

/// Width codes used by the code entry header.
pub mod width {
    pub const ZERO: u8 = 0;
    pub const U8: u8 = 1;
    pub const U16: u8 = 2;
    pub const I32: u8 = 3;
}

pub mod header_flags {
    pub const LOCALS: u8 = 0x01;
    pub const RESULTS: u8 = 0x02;
    pub const EXCEPTION_TABLE: u8 = 0x04;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CallSite {
    /// Position of the call opcode in the module bytecode.
    pub offset: u32,
    pub caller: u32,
    pub callee: u32,
}

/// Where one function's bytecode lives in the module buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FunctionBody {
    pub index: u32,
    pub body: Range<usize>,
    pub header: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum HandlerKind {
    Catch = 0,
    CatchRef = 1,
    CatchAll = 2,
    CatchAllRef = 3,
    LegacyCatch = 4,
    LegacyCatchAll = 5,
    Delegate = 6,
}

impl HandlerKind {
    fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => HandlerKind::Catch,
            1 => HandlerKind::CatchRef,
            2 => HandlerKind::CatchAll,
            3 => HandlerKind::CatchAllRef,
            4 => HandlerKind::LegacyCatch,
            5 => HandlerKind::LegacyCatchAll,
            6 => HandlerKind::Delegate,
            _ => return None,
        })
    }
}

/// One row of a function's exception table. The handler covers bytecode in
/// `[start, end)`. `target` is a label position, or the label depth for `Delegate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ExceptionHandler {
    pub start: u32,
    pub end: u32,
    pub kind: HandlerKind,
    pub tag: u32,
    pub target: u32,
}

pub const NO_TAG: u32 = u32::MAX;
pub const UNRESOLVED: u32 = u32::MAX;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CodeEntryHeader {
    pub function_index: u32,
    pub max_stack_size: u32,
    pub body_length: u32,
    pub exception_table: Option<u32>,
    pub locals: Vec<ValType>,
    pub results: Vec<ValType>,
}

#[inline]
fn width_of(v: u32) -> u8 {
    match v {
        0 => width::ZERO,
        1..=0xff => width::U8,
        0x100..=0xffff => width::U16,
        _ => width::I32,
    }
}

/// Extra immediates of a prefixed instruction.
#[derive(Default)]
pub struct Immediates { bytes: Vec<u8> }

impl Immediates {
    pub fn new() -> Self { Self::default() }
    pub fn u8(&mut self, v: u8) -> &mut Self { self.bytes.push(v); self }
    pub fn u32(&mut self, v: u32) -> &mut Self { self.bytes.extend_from_slice(&v.to_le_bytes()); self }
    pub fn i32(&mut self, v: i32) -> &mut Self { self.bytes.extend_from_slice(&v.to_le_bytes()); self }
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self { self.bytes.extend_from_slice(v); self }
    pub fn mem_access(&mut self, memory: u32, offset: u64) -> &mut Self {
        write_mem_access(&mut self.bytes, memory, offset);
        self
    }
    pub fn len(&self) -> usize { self.bytes.len() }
    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }
}

fn write_mem_access(out: &mut Vec<u8>, memory: u32, offset: u64) {
    let mut flags = if offset == 0 {
        mem_access::OFFSET_ZERO
    } else if offset <= u8::MAX as u64 {
        mem_access::OFFSET_U8
    } else if offset <= u32::MAX as u64 {
        mem_access::OFFSET_U32
    } else {
        mem_access::OFFSET_U64
    };
    if memory != 0 { flags |= mem_access::HAS_MEMORY_INDEX; }
    out.push(flags);
    match flags & mem_access::OFFSET_WIDTH_MASK {
        mem_access::OFFSET_U8 => out.push(offset as u8),
        mem_access::OFFSET_U32 => out.extend_from_slice(&(offset as u32).to_le_bytes()),
        mem_access::OFFSET_U64 => out.extend_from_slice(&offset.to_le_bytes()),
        _ => {}
    }
    if memory != 0 { out.extend_from_slice(&memory.to_le_bytes()); }
}

#[derive(Default)]
pub struct BytecodeWriter {
    buf: Vec<u8>,
    pub(crate) v128_pool: Vec<u128>,
    pub(crate) call_sites: Vec<CallSite>,
}

impl BytecodeWriter {
    pub fn new() -> Self { Self::default() }

    #[inline]
    pub fn position(&self) -> usize { self.buf.len() }
    #[inline]
    pub fn bytes(&self) -> &[u8] { &self.buf }
    #[inline]
    pub fn add_op(&mut self, op: u8) { self.buf.push(op); }
    #[inline]
    pub fn add_u8(&mut self, v: u8) { self.buf.push(v); }
    #[inline]
    pub fn add_u16(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    #[inline]
    pub fn add_u32(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    #[inline]
    pub fn add_i32(&mut self, v: i32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    #[inline]
    pub fn add_u64(&mut self, v: u64) { self.buf.extend_from_slice(&v.to_le_bytes()); }

    /// Opcode with one index immediate, narrow form when the index fits a byte.
    pub fn add_index(&mut self, op_u8: u8, op_i32: u8, idx: u32) {
        if idx <= u8::MAX as u32 {
            self.add_op(op_u8);
            self.add_u8(idx as u8);
        } else {
            self.add_op(op_i32);
            self.add_u32(idx);
        }
    }

    pub fn add_call(&mut self, caller: u32, callee: u32) {
        let offset = self.position() as u32;
        self.add_index(op::CALL_U8, op::CALL_I32, callee);
        self.call_sites.push(CallSite { offset, caller, callee });
    }

    pub fn add_i32_const(&mut self, v: i32) {
        if let Ok(small) = i8::try_from(v) {
            self.add_op(op::I32_CONST_I8);
            self.add_u8(small as u8);
        } else {
            self.add_op(op::I32_CONST_I32);
            self.add_i32(v);
        }
    }

    pub fn add_i64_const(&mut self, v: i64) {
        if let Ok(small) = i8::try_from(v) {
            self.add_op(op::I64_CONST_I8);
            self.add_u8(small as u8);
        } else {
            self.add_op(op::I64_CONST_I64);
            self.add_u64(v as u64);
        }
    }

    pub fn add_f32_const(&mut self, bits: u32) {
        self.add_op(op::F32_CONST);
        self.add_u32(bits);
    }

    pub fn add_f64_const(&mut self, bits: u64) {
        self.add_op(op::F64_CONST);
        self.add_u64(bits);
    }

    pub fn add_mem_access(&mut self, opcode: u8, memory: u32, offset: u64) {
        self.add_op(opcode);
        write_mem_access(&mut self.buf, memory, offset);
    }

    /// Branch target. Returns the label position.
    pub fn add_label(&mut self, results: u32, height: u32) -> usize {
        let pos = self.position();
        match width_of(results.max(height)) {
            width::ZERO | width::U8 => {
                self.add_op(op::LABEL_U8);
                self.add_u8(results as u8);
                self.add_u8(height as u8);
            }
            width::U16 => {
                self.add_op(op::LABEL_U16);
                self.add_u16(results as u16);
                self.add_u16(height as u16);
            }
            _ => {
                self.add_op(op::LABEL_I32);
                self.add_u32(results);
                self.add_u32(height);
            }
        }
        pos
    }

    /// Writes `op` with a placeholder target and returns the position to patch.
    pub fn add_forward_branch(&mut self, opcode: u8) -> usize {
        self.add_op(opcode);
        let pos = self.position();
        self.add_u32(UNRESOLVED);
        pos
    }

    /// Branch to an already placed label, narrow form when the distance fits a byte.
    pub fn add_backward_branch(&mut self, op_u8: u8, op_i32: u8, target: usize) {
        let distance = self.position() - target;
        if distance <= u8::MAX as usize {
            self.add_op(op_u8);
            self.add_u8(distance as u8);
        } else {
            self.add_op(op_i32);
            self.add_u32(target as u32);
        }
    }

    /// Drops everything written after `pos`.
    pub fn truncate(&mut self, pos: usize) { self.buf.truncate(pos); }

    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Prefixed instruction. Returns the position of the first immediate byte.
    pub fn add_prefixed(&mut self, prefix: u8, sub: u32, imm: &Immediates) -> usize {
        debug_assert!(sub <= u16::MAX as u32 && imm.len() <= u8::MAX as usize);
        self.add_op(prefix);
        self.add_u16(sub as u16);
        self.add_u8(imm.len() as u8);
        let pos = self.position();
        self.buf.extend_from_slice(&imm.bytes);
        pos
    }

    pub fn add_v128_constant(&mut self, v: u128) -> u32 {
        self.v128_pool.push(v);
        (self.v128_pool.len() - 1) as u32
    }

    pub fn add_code_entry(&mut self, header: &CodeEntryHeader) -> usize {
        let pos = self.position();
        let w_stack = width_of(header.max_stack_size);
        let w_len = width_of(header.body_length);
        let w_func = width_of(header.function_index);
        self.add_u8(w_stack | (w_len << 2) | (w_func << 4));
        let mut flags = 0;
        if !header.locals.is_empty() { flags |= header_flags::LOCALS; }
        if !header.results.is_empty() { flags |= header_flags::RESULTS; }
        if header.exception_table.is_some() { flags |= header_flags::EXCEPTION_TABLE; }
        self.add_u8(flags);
        self.add_width(w_stack, header.max_stack_size);
        self.add_width(w_len, header.body_length);
        self.add_width(w_func, header.function_index);
        if let Some(offset) = header.exception_table { self.add_u32(offset); }
        for list in [&header.locals, &header.results] {
            if list.is_empty() { continue; }
            self.add_u32(list.len() as u32);
            list.iter().for_each(|t| self.add_i32(t.raw()));
        }
        pos
    }

    fn add_width(&mut self, w: u8, v: u32) {
        match w {
            width::U8 => self.add_u8(v as u8),
            width::U16 => self.add_u16(v as u16),
            width::I32 => self.add_u32(v),
            _ => {}
        }
    }

    pub fn add_exception_table(&mut self, handlers: &[ExceptionHandler]) -> usize {
        let pos = self.position();
        self.add_u32(handlers.len() as u32);
        for h in handlers {
            self.add_u32(h.start);
            self.add_u32(h.end);
            self.add_u8(h.kind as u8);
            self.add_u32(h.tag);
            self.add_u32(h.target);
        }
        pos
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u128>, Vec<CallSite>) { (self.buf, self.v128_pool, self.call_sites) }
}

// ---------------- Reading back ----------------
struct Reader<'a> { bytes: &'a [u8], pos: usize }

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let end = self.pos.checked_add(n).ok_or(Error::Malformed(UNEXPECTED_END))?;
        let out = self.bytes.get(self.pos..end).ok_or(Error::Malformed(UNEXPECTED_END))?;
        self.pos = end;
        Ok(out)
    }
    fn u8(&mut self) -> Result<u8, Error> { Ok(self.take(1)?[0]) }
    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    fn width(&mut self, w: u8) -> Result<u32, Error> {
        Ok(match w {
            width::U8 => self.u8()? as u32,
            width::U16 => {
                let b = self.take(2)?;
                u16::from_le_bytes([b[0], b[1]]) as u32
            }
            width::I32 => self.u32()?,
            _ => 0,
        })
    }
    fn types(&mut self) -> Result<Vec<ValType>, Error> {
        let n = self.u32()?;
        (0..n).map(|_| Ok(ValType::from_raw(self.u32()? as i32))).collect()
    }
}

impl CodeEntryHeader {
    /// Number of bytes `BytecodeWriter::add_code_entry` writes for this header.
    pub fn encoded_len(&self) -> usize {
        let bytes = |v: u32| match width_of(v) {
            width::ZERO => 0,
            width::U8 => 1,
            width::U16 => 2,
            _ => 4,
        };
        let list = |l: &[ValType]| if l.is_empty() { 0 } else { 4 + 4 * l.len() };
        2 + bytes(self.max_stack_size)
            + bytes(self.body_length)
            + bytes(self.function_index)
            + self.exception_table.map_or(0, |_| 4)
            + list(&self.locals)
            + list(&self.results)
    }

    pub fn read(bytecode: &[u8], offset: usize) -> Result<Self, Error> {
        let mut r = Reader { bytes: bytecode, pos: offset };
        let widths = r.u8()?;
        let flags = r.u8()?;
        let max_stack_size = r.width(widths & 0b11)?;
        let body_length = r.width((widths >> 2) & 0b11)?;
        let function_index = r.width((widths >> 4) & 0b11)?;
        let exception_table = if flags & header_flags::EXCEPTION_TABLE != 0 { Some(r.u32()?) } else { None };
        let locals = if flags & header_flags::LOCALS != 0 { r.types()? } else { Vec::new() };
        let results = if flags & header_flags::RESULTS != 0 { r.types()? } else { Vec::new() };
        Ok(Self { function_index, max_stack_size, body_length, exception_table, locals, results })
    }
}

pub fn read_exception_table(bytecode: &[u8], offset: usize) -> Result<Vec<ExceptionHandler>, Error> {
    let mut r = Reader { bytes: bytecode, pos: offset };
    let n = r.u32()?;
    let mut out = Vec::new();
    for _ in 0..n {
        let start = r.u32()?;
        let end = r.u32()?;
        let kind = HandlerKind::from_byte(r.u8()?).ok_or(Error::Malformed(INVALID_CATCH_KIND))?;
        let tag = r.u32()?;
        let target = r.u32()?;
        out.push(ExceptionHandler { start, end, kind, tag, target });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_and_wide_immediates() {
        let mut w = BytecodeWriter::new();
        w.add_index(op::LOCAL_GET_U8, op::LOCAL_GET_I32, 3);
        w.add_index(op::LOCAL_GET_U8, op::LOCAL_GET_I32, 300);
        w.add_i32_const(-5);
        w.add_i32_const(1000);
        assert_eq!(w.bytes(), &[
            op::LOCAL_GET_U8, 3,
            op::LOCAL_GET_I32, 0x2c, 0x01, 0, 0,
            op::I32_CONST_I8, 0xfb,
            op::I32_CONST_I32, 0xe8, 0x03, 0, 0,
        ]);
    }

    #[test]
    fn memory_access_descriptor() {
        let mut w = BytecodeWriter::new();
        w.add_mem_access(0x28, 0, 0);
        w.add_mem_access(0x28, 0, 16);
        w.add_mem_access(0x28, 2, 0x1_0000);
        assert_eq!(w.bytes(), &[
            0x28, 0,
            0x28, 1, 16,
            0x28, 2 | 4, 0, 0, 1, 0, 2, 0, 0, 0,
        ]);
    }

    #[test]
    fn forward_branch_patch() {
        let mut w = BytecodeWriter::new();
        let fix = w.add_forward_branch(op::BR_I32);
        let label = w.add_label(1, 0);
        w.patch_u32(fix, label as u32);
        assert_eq!(w.bytes(), &[op::BR_I32, 5, 0, 0, 0, op::LABEL_U8, 1, 0]);
    }

    #[test]
    fn backward_branch_width() {
        let mut w = BytecodeWriter::new();
        let label = w.add_label(0, 0);
        w.add_backward_branch(op::BR_U8, op::BR_I32, label);
        assert_eq!(&w.bytes()[3..], &[op::BR_U8, 3]);
        for _ in 0..300 { w.add_op(op::NOP); }
        w.add_backward_branch(op::BR_U8, op::BR_I32, label);
        assert_eq!(&w.bytes()[w.position() - 5..], &[op::BR_I32, 0, 0, 0, 0]);
    }

    #[test]
    fn header_reads_back() {
        let mut w = BytecodeWriter::new();
        for _ in 0..7 { w.add_op(op::NOP); }
        let header = CodeEntryHeader {
            function_index: 300,
            max_stack_size: 4,
            body_length: 7,
            exception_table: Some(99),
            locals: vec![ValType::I64, ValType::FUNCREF],
            results: vec![ValType::I32],
        };
        let at = w.add_code_entry(&header);
        assert_eq!(w.position() - at, header.encoded_len());
        assert_eq!(CodeEntryHeader::read(w.bytes(), at), Ok(header));
        let empty = CodeEntryHeader {
            function_index: 0,
            max_stack_size: 0,
            body_length: 0,
            exception_table: None,
            locals: vec![],
            results: vec![],
        };
        let at = w.add_code_entry(&empty);
        assert_eq!(w.position() - at, 2);
        assert_eq!(CodeEntryHeader::read(w.bytes(), at), Ok(empty));
    }

    #[test]
    fn exception_table_reads_back() {
        let mut w = BytecodeWriter::new();
        let handlers = vec![
            ExceptionHandler { start: 1, end: 9, kind: HandlerKind::Catch, tag: 0, target: 12 },
            ExceptionHandler { start: 1, end: 9, kind: HandlerKind::CatchAllRef, tag: NO_TAG, target: 20 },
        ];
        let at = w.add_exception_table(&handlers);
        assert_eq!(read_exception_table(w.bytes(), at), Ok(handlers));
    }
}
