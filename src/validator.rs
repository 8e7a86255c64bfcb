use std::ops::Range;
use std::rc::Rc;

use tracing::trace;

use crate::byte_iter::ByteIter;
use crate::bytecode::{op, BytecodeWriter, CodeEntryHeader, ExceptionHandler, FunctionBody, HandlerKind, NO_TAG, UNRESOLVED};
use crate::config::Features;
use crate::error::*;
use crate::error_msg::*;
use crate::limits::{check_nesting_depth, ModuleLimits};
use crate::symbol_table::SymbolTable;
use crate::types::*;

mod atomic;
mod gc;
mod numeric;
mod simd;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKind {
    Function,
    Block,
    Loop,
    If,
    Else,
    TryTable,
    Try,
    Catch,
    CatchAll,
}

#[derive(Clone, Copy, Debug)]
enum Fixup {
    /// A 4-byte branch target in the bytecode.
    Code(usize),
    /// Target of an exception handler row.
    Handler(usize),
}

struct ControlFrame {
    kind: ControlKind,
    params: Rc<[ValType]>,
    results: Rc<[ValType]>,
    height: usize,
    init_height: usize,
    unreachable: bool,
    /// Label position when it is already known (loops).
    label: Option<usize>,
    fixups: Vec<Fixup>,
    if_fixup: Option<usize>,
    try_start: usize,
    try_end: Option<usize>,
    handlers: Range<usize>,
}

impl ControlFrame {
    #[inline]
    fn label_types(&self) -> Rc<[ValType]> {
        if self.kind == ControlKind::Loop { self.params.clone() } else { self.results.clone() }
    }
}

/// Type checks one function body and emits its bytecode.
pub(crate) struct FuncValidator<'a> {
    symbols: &'a SymbolTable,
    features: &'a Features,
    limits: &'a ModuleLimits,
    w: &'a mut BytecodeWriter,
    func_index: u32,
    num_params: usize,
    locals: Vec<ValType>,
    local_inited: Vec<bool>,
    inits: Vec<u32>,
    vals: Vec<ValType>,
    ctrls: Vec<ControlFrame>,
    max_height: usize,
    handlers: Vec<ExceptionHandler>,
}

/// Natural alignment (log2) and value type of the core loads and stores.
fn memory_access_type(opcode: u8) -> (u32, ValType) {
    use ValType as T;
    match opcode {
        0x28 | 0x36 => (2, T::I32),
        0x29 | 0x37 => (3, T::I64),
        0x2a | 0x38 => (2, T::F32),
        0x2b | 0x39 => (3, T::F64),
        0x2c | 0x2d | 0x3a => (0, T::I32),
        0x2e | 0x2f | 0x3b => (1, T::I32),
        0x30 | 0x31 | 0x3c => (0, T::I64),
        0x32 | 0x33 | 0x3d => (1, T::I64),
        _ => (2, T::I64),
    }
}

impl<'a> FuncValidator<'a> {
    pub(crate) fn new(
        symbols: &'a SymbolTable,
        features: &'a Features,
        limits: &'a ModuleLimits,
        w: &'a mut BytecodeWriter,
        func_index: u32,
        params: &[ValType],
        declared_locals: Vec<ValType>,
    ) -> Self {
        let mut locals = params.to_vec();
        locals.extend(declared_locals);
        let local_inited = locals.iter().enumerate().map(|(i, t)| i < params.len() || t.is_defaultable()).collect();
        Self {
            symbols,
            features,
            limits,
            w,
            func_index,
            num_params: params.len(),
            locals,
            local_inited,
            inits: Vec::new(),
            vals: Vec::new(),
            ctrls: Vec::new(),
            max_height: 0,
            handlers: Vec::new(),
        }
    }

    // ---------------- Operand stack ----------------
    #[inline]
    fn push(&mut self, t: ValType) {
        self.vals.push(t);
        self.max_height = self.max_height.max(self.vals.len());
    }

    #[inline]
    fn push_all(&mut self, ts: &[ValType]) { ts.iter().for_each(|t| self.push(*t)); }

    fn frame(&self) -> Result<&ControlFrame, Error> { self.ctrls.last().ok_or(Error::Validation(TYPE_MISMATCH)) }

    fn pop_any(&mut self) -> Result<ValType, Error> {
        let frame = self.frame()?;
        if self.vals.len() == frame.height {
            if frame.unreachable { return Ok(ValType::BOTTOM); }
            return validation(TYPE_MISMATCH);
        }
        self.vals.pop().ok_or(Error::Validation(TYPE_MISMATCH))
    }

    fn pop(&mut self, expected: ValType) -> Result<ValType, Error> {
        let actual = self.pop_any()?;
        if !self.symbols.is_subtype(actual, expected) { return validation(TYPE_MISMATCH); }
        Ok(actual)
    }

    fn pop_all(&mut self, ts: &[ValType]) -> Result<(), Error> {
        for t in ts.iter().rev() {
            self.pop(*t)?;
        }
        Ok(())
    }

    /// Pops a reference of any type. An unknown operand reads as `(ref bot)`.
    fn pop_ref(&mut self) -> Result<ValType, Error> {
        let t = self.pop_any()?;
        if t == ValType::BOTTOM { return Ok(ValType::reference(HeapType::BOTTOM, false)); }
        if !t.is_reference() { return validation(TYPE_MISMATCH); }
        Ok(t)
    }

    fn set_unreachable(&mut self) -> Result<(), Error> {
        let frame = self.ctrls.last_mut().ok_or(Error::Validation(TYPE_MISMATCH))?;
        self.vals.truncate(frame.height);
        frame.unreachable = true;
        Ok(())
    }

    // ---------------- Control stack ----------------
    fn push_ctrl(&mut self, kind: ControlKind, params: Rc<[ValType]>, results: Rc<[ValType]>) -> Result<(), Error> {
        check_nesting_depth(self.ctrls.len() + 1, self.limits.nesting_depth)?;
        let height = self.vals.len();
        let pos = self.w.position();
        self.ctrls.push(ControlFrame {
            kind,
            params: params.clone(),
            results,
            height,
            init_height: self.inits.len(),
            unreachable: false,
            label: None,
            fixups: Vec::new(),
            if_fixup: None,
            try_start: pos,
            try_end: None,
            handlers: self.handlers.len()..self.handlers.len(),
        });
        self.push_all(&params);
        Ok(())
    }

    /// Checks that the innermost frame ended with exactly its results.
    fn check_frame_end(&mut self) -> Result<(), Error> {
        let results = self.frame()?.results.clone();
        self.pop_all(&results)?;
        if self.vals.len() != self.frame()?.height { return validation(TYPE_MISMATCH); }
        Ok(())
    }

    fn reset_locals(&mut self, init_height: usize) {
        while self.inits.len() > init_height {
            if let Some(i) = self.inits.pop() {
                self.local_inited[i as usize] = false;
            }
        }
    }

    fn pop_ctrl(&mut self) -> Result<ControlFrame, Error> {
        self.check_frame_end()?;
        let frame = self.ctrls.pop().ok_or(Error::Validation(TYPE_MISMATCH))?;
        self.reset_locals(frame.init_height);
        Ok(frame)
    }

    fn frame_at(&self, depth: u32) -> Result<&ControlFrame, Error> {
        let n = self.ctrls.len();
        if depth as usize >= n { return validation(UNKNOWN_LABEL); }
        Ok(&self.ctrls[n - 1 - depth as usize])
    }

    fn frame_at_mut(&mut self, depth: u32) -> Result<&mut ControlFrame, Error> {
        let n = self.ctrls.len();
        if depth as usize >= n { return validation(UNKNOWN_LABEL); }
        Ok(&mut self.ctrls[n - 1 - depth as usize])
    }

    fn label_types(&self, depth: u32) -> Result<Rc<[ValType]>, Error> { Ok(self.frame_at(depth)?.label_types()) }

    fn block_type(&self, it: &mut ByteIter) -> Result<(Rc<[ValType]>, Rc<[ValType]>), Error> {
        let reader = TypeReader::new(self.features, self.symbols.type_count());
        Ok(match reader.block_type(it)? {
            BlockType::Empty => (Rc::from([]), Rc::from([])),
            BlockType::Value(t) => (Rc::from([]), Rc::from([t])),
            BlockType::Func(idx) => {
                let ft = self.symbols.func_type(idx).map_err(|_| Error::Validation(UNKNOWN_TYPE))?;
                (Rc::from(&ft.params[..]), Rc::from(&ft.results[..]))
            }
        })
    }

    fn heap_type(&self, it: &mut ByteIter) -> Result<HeapType, Error> {
        TypeReader::new(self.features, self.symbols.type_count()).heap_type(it)
    }

    fn require(&self, enabled: bool, name: &'static str) -> Result<(), Error> {
        if enabled { Ok(()) } else { disabled(name) }
    }

    // ---------------- Encoding helpers ----------------
    /// Writes a 4-byte branch target for the frame at `depth`.
    fn emit_target(&mut self, depth: u32) -> Result<(), Error> {
        let pos = self.w.position();
        match self.frame_at(depth)?.label {
            Some(label) => self.w.add_u32(label as u32),
            None => {
                self.w.add_u32(UNRESOLVED);
                self.frame_at_mut(depth)?.fixups.push(Fixup::Code(pos));
            }
        }
        Ok(())
    }

    fn emit_branch(&mut self, depth: u32, op_u8: u8, op_i32: u8) -> Result<(), Error> {
        match self.frame_at(depth)?.label {
            Some(label) => self.w.add_backward_branch(op_u8, op_i32, label),
            None => {
                let pos = self.w.add_forward_branch(op_i32);
                self.frame_at_mut(depth)?.fixups.push(Fixup::Code(pos));
            }
        }
        Ok(())
    }

    /// Registers a forward target at an already written position.
    fn add_fixup(&mut self, depth: u32, pos: usize) -> Result<(), Error> {
        let frame = self.frame_at_mut(depth)?;
        match frame.label {
            Some(label) => self.w.patch_u32(pos, label as u32),
            None => frame.fixups.push(Fixup::Code(pos)),
        }
        Ok(())
    }

    fn resolve_fixups(&mut self, fixups: &[Fixup], label: usize) {
        for f in fixups {
            match *f {
                Fixup::Code(pos) => self.w.patch_u32(pos, label as u32),
                Fixup::Handler(h) => self.handlers[h].target = label as u32,
            }
        }
    }

    /// Places the end label of a closed frame and resolves everything that targets it.
    fn close_frame(&mut self, frame: &ControlFrame) {
        if frame.kind == ControlKind::Loop { return; }
        let end = self.w.position() as u32;
        for h in frame.handlers.clone() {
            if self.handlers[h].end == UNRESOLVED { self.handlers[h].end = end; }
        }
        if frame.fixups.is_empty() && frame.if_fixup.is_none() { return; }
        let label = self.w.add_label(frame.results.len() as u32, frame.height as u32);
        if let Some(pos) = frame.if_fixup { self.w.patch_u32(pos, label as u32); }
        self.resolve_fixups(&frame.fixups, label);
        trace!(target: "wabc::bytecode", label, fixups = frame.fixups.len(), "placed label");
    }

    fn add_handler(&mut self, depth: u32, kind: HandlerKind, tag: u32, start: usize) -> Result<(), Error> {
        let idx = self.handlers.len();
        let target = self.frame_at(depth)?.label;
        self.handlers.push(ExceptionHandler {
            start: start as u32,
            end: UNRESOLVED,
            kind,
            tag,
            target: target.map_or(UNRESOLVED, |l| l as u32),
        });
        if target.is_none() { self.frame_at_mut(depth)?.fixups.push(Fixup::Handler(idx)); }
        Ok(())
    }

    // ---------------- Memory ----------------
    /// Reads a memarg and returns (memory index, offset, address type).
    fn memarg(&mut self, it: &mut ByteIter, natural: u32, exact: bool) -> Result<(u32, u64, ValType), Error> {
        let mut align = it.read_u32()?;
        let mut memory = 0;
        if align & 0x40 != 0 && self.features.multi_memory {
            align &= !0x40;
            memory = it.read_u32()?;
        }
        let mem = self.symbols.memory(memory)?;
        let offset = if mem.limits.index64 { it.read_u64()? } else { it.read_u32()? as u64 };
        if exact && align != natural { return validation(ALIGNMENT_NOT_NATURAL); }
        if align > natural { return validation(ALIGNMENT_TOO_LARGE); }
        Ok((memory, offset, mem.limits.index_type()))
    }

    /// Memory index immediate of `memory.size`, `memory.grow` and similar.
    fn memory_index(&mut self, it: &mut ByteIter) -> Result<u32, Error> {
        if self.features.multi_memory { return it.read_u32(); }
        if it.read_u8()? != 0 { return malformed(ZERO_BYTE_EXPECTED); }
        Ok(0)
    }

    fn memory_index_type(&self, memory: u32) -> Result<ValType, Error> { Ok(self.symbols.memory(memory)?.limits.index_type()) }

    // ---------------- Driver ----------------
    pub(crate) fn validate(mut self, it: &mut ByteIter) -> Result<(FunctionBody, CodeEntryHeader), Error> {
        let ft = self.symbols.function_type(self.func_index)?;
        let results: Rc<[ValType]> = Rc::from(&ft.results[..]);
        let body_start = self.w.position();
        self.push_ctrl(ControlKind::Function, Rc::from([]), results.clone())?;
        while !self.ctrls.is_empty() {
            if it.empty() { return malformed(END_EXPECTED); }
            let opcode = it.read_u8()?;
            self.visit(opcode, it)?;
        }
        if !it.empty() { return malformed(SECTION_SIZE_MISMATCH); }
        let body = body_start..self.w.position();
        let table_len = if self.handlers.is_empty() { 0 } else { 4 + self.handlers.len() * 17 };
        let mut header = CodeEntryHeader {
            function_index: self.func_index,
            max_stack_size: self.max_height as u32,
            body_length: body.len() as u32,
            exception_table: if table_len > 0 { Some(UNRESOLVED) } else { None },
            locals: self.locals[self.num_params..].to_vec(),
            results: results.to_vec(),
        };
        let header_at = self.w.position();
        if header.exception_table.is_some() {
            header.exception_table = Some((header_at + header.encoded_len()) as u32);
        }
        let written = self.w.add_code_entry(&header);
        if !self.handlers.is_empty() { self.w.add_exception_table(&self.handlers); }
        trace!(target: "wabc::validator", func = self.func_index, max_stack = self.max_height, len = body.len(), "validated function");
        Ok((FunctionBody { index: self.func_index, body, header: written }, header))
    }

    fn visit(&mut self, opcode: u8, it: &mut ByteIter) -> Result<(), Error> {
        match opcode {
            0x00 => {
                self.w.add_op(op::UNREACHABLE);
                self.set_unreachable()?;
            }
            0x01 => {}
            0x02 | 0x03 => {
                let (params, results) = self.block_type(it)?;
                self.pop_all(&params)?;
                let kind = if opcode == 0x02 { ControlKind::Block } else { ControlKind::Loop };
                self.push_ctrl(kind, params.clone(), results)?;
                if kind == ControlKind::Loop {
                    let height = self.frame()?.height as u32;
                    let label = self.w.add_label(params.len() as u32, height);
                    if let Some(f) = self.ctrls.last_mut() { f.label = Some(label); }
                }
            }
            0x04 => {
                let (params, results) = self.block_type(it)?;
                self.pop(ValType::I32)?;
                self.pop_all(&params)?;
                let fixup = self.w.add_forward_branch(op::IF);
                self.push_ctrl(ControlKind::If, params, results)?;
                if let Some(f) = self.ctrls.last_mut() { f.if_fixup = Some(fixup); }
            }
            0x05 => {
                if self.frame()?.kind != ControlKind::If { return validation(ELSE_MUST_CLOSE_IF); }
                self.check_frame_end()?;
                let skip = self.w.add_forward_branch(op::BR_I32);
                let else_start = self.w.position();
                let frame = self.ctrls.last_mut().ok_or(Error::Validation(ELSE_MUST_CLOSE_IF))?;
                frame.fixups.push(Fixup::Code(skip));
                let if_fixup = frame.if_fixup.take();
                frame.kind = ControlKind::Else;
                frame.unreachable = false;
                let (init_height, params) = (frame.init_height, frame.params.clone());
                if let Some(pos) = if_fixup { self.w.patch_u32(pos, else_start as u32); }
                self.reset_locals(init_height);
                self.push_all(&params);
            }
            0x06 => {
                self.require(self.features.legacy_exceptions, "legacy exception handling")?;
                let (params, results) = self.block_type(it)?;
                self.pop_all(&params)?;
                self.push_ctrl(ControlKind::Try, params, results)?;
            }
            0x07 | 0x19 => self.visit_legacy_catch(opcode, it)?,
            0x08 => {
                self.require(self.features.exceptions, "exception handling")?;
                let tag = it.read_u32()?;
                let params = self.symbols.tag_type(tag)?.params.clone();
                self.pop_all(&params)?;
                self.w.add_op(op::THROW);
                self.w.add_u32(tag);
                self.set_unreachable()?;
            }
            0x09 => {
                self.require(self.features.legacy_exceptions, "legacy exception handling")?;
                let depth = it.read_u32()?;
                if !matches!(self.frame_at(depth)?.kind, ControlKind::Catch | ControlKind::CatchAll) {
                    return validation(RETHROW_NOT_IN_CATCH);
                }
                self.w.add_op(op::RETHROW);
                self.w.add_u32(depth);
                self.set_unreachable()?;
            }
            0x0a => {
                self.require(self.features.exceptions, "exception handling")?;
                self.pop(ValType::EXNREF)?;
                self.w.add_op(op::THROW_REF);
                self.set_unreachable()?;
            }
            0x0b => {
                let kind = self.frame()?.kind;
                if kind == ControlKind::If {
                    let f = self.frame()?;
                    if !self.symbols.is_subtype_all(&f.params, &f.results) { return validation(TYPE_MISMATCH); }
                }
                let frame = self.pop_ctrl()?;
                self.close_frame(&frame);
                if frame.kind == ControlKind::Function {
                    self.w.add_op(op::RETURN);
                } else {
                    self.push_all(&frame.results);
                }
            }
            0x0c => {
                let depth = it.read_u32()?;
                let lt = self.label_types(depth)?;
                self.pop_all(&lt)?;
                self.emit_branch(depth, op::BR_U8, op::BR_I32)?;
                self.set_unreachable()?;
            }
            0x0d => {
                let depth = it.read_u32()?;
                self.pop(ValType::I32)?;
                let lt = self.label_types(depth)?;
                self.pop_all(&lt)?;
                self.push_all(&lt);
                self.emit_branch(depth, op::BR_IF_U8, op::BR_IF_I32)?;
            }
            0x0e => self.visit_br_table(it)?,
            0x0f => {
                let results = self.ctrls.first().map(|f| f.results.clone()).ok_or(Error::Validation(TYPE_MISMATCH))?;
                self.pop_all(&results)?;
                self.w.add_op(op::RETURN);
                self.set_unreachable()?;
            }
            0x10 => {
                let f = it.read_u32()?;
                let ft = self.symbols.function_type(f)?;
                self.pop_all(&ft.params)?;
                self.push_all(&ft.results);
                self.w.add_call(self.func_index, f);
            }
            0x11 => {
                let ty = it.read_u32()?;
                let table = if self.features.bulk_memory {
                    it.read_u32()?
                } else {
                    if it.read_u8()? != 0 { return malformed(ZERO_BYTE_EXPECTED); }
                    0
                };
                let t = self.symbols.table(table)?;
                if !self.symbols.is_subtype(t.elem_type, ValType::FUNCREF) { return validation(TYPE_MISMATCH); }
                let index_type = t.limits.index_type();
                let ft = self.symbols.func_type(ty).map_err(|_| Error::Validation(UNKNOWN_TYPE))?;
                self.pop(index_type)?;
                self.pop_all(&ft.params)?;
                self.push_all(&ft.results);
                self.w.add_op(op::CALL_INDIRECT);
                self.w.add_u32(ty);
                self.w.add_u32(table);
            }
            0x14 => {
                self.require(self.features.typed_references(), "function references")?;
                let ty = it.read_u32()?;
                let ft = self.symbols.func_type(ty)?;
                self.pop(ValType::reference(HeapType::concrete(ty), true))?;
                self.pop_all(&ft.params)?;
                self.push_all(&ft.results);
                self.w.add_op(op::CALL_REF);
                self.w.add_u32(ty);
            }
            0x18 => self.visit_delegate(it)?,
            0x1a => {
                self.pop_any()?;
                self.w.add_op(op::DROP);
            }
            0x1b => {
                self.pop(ValType::I32)?;
                let t1 = self.pop_any()?;
                let t2 = self.pop_any()?;
                let ok = |t: ValType| t == ValType::BOTTOM || t.is_num_or_vec();
                if !ok(t1) || !ok(t2) { return validation(TYPE_MISMATCH); }
                if t1 != t2 && t1 != ValType::BOTTOM && t2 != ValType::BOTTOM { return validation(TYPE_MISMATCH); }
                self.push(if t1 == ValType::BOTTOM { t2 } else { t1 });
                self.w.add_op(op::SELECT);
            }
            0x1c => {
                self.require(self.features.bulk_memory, "reference types")?;
                if it.read_u32()? != 1 { return validation(INVALID_RESULT_ARITY); }
                let t = TypeReader::new(self.features, self.symbols.type_count()).val_type(it)?;
                self.pop(ValType::I32)?;
                self.pop(t)?;
                self.pop(t)?;
                self.push(t);
                self.w.add_op(op::SELECT);
            }
            0x1f => self.visit_try_table(it)?,
            0x20 => {
                let x = it.read_u32()?;
                let t = *self.locals.get(x as usize).ok_or(Error::Validation(UNKNOWN_LOCAL))?;
                if !self.local_inited[x as usize] { return validation(UNINITIALIZED_LOCAL); }
                self.push(t);
                self.w.add_index(op::LOCAL_GET_U8, op::LOCAL_GET_I32, x);
            }
            0x21 | 0x22 => {
                let x = it.read_u32()?;
                let t = *self.locals.get(x as usize).ok_or(Error::Validation(UNKNOWN_LOCAL))?;
                self.pop(t)?;
                if !self.local_inited[x as usize] {
                    self.local_inited[x as usize] = true;
                    self.inits.push(x);
                }
                if opcode == 0x22 {
                    self.push(t);
                    self.w.add_index(op::LOCAL_TEE_U8, op::LOCAL_TEE_I32, x);
                } else {
                    self.w.add_index(op::LOCAL_SET_U8, op::LOCAL_SET_I32, x);
                }
            }
            0x23 => {
                let x = it.read_u32()?;
                let g = self.symbols.global(x)?;
                self.push(g.ty);
                self.w.add_index(op::GLOBAL_GET_U8, op::GLOBAL_GET_I32, x);
            }
            0x24 => {
                let x = it.read_u32()?;
                let g = self.symbols.global(x)?;
                if !g.mutable { return validation(GLOBAL_IS_IMMUTABLE); }
                self.pop(g.ty)?;
                self.w.add_index(op::GLOBAL_SET_U8, op::GLOBAL_SET_I32, x);
            }
            0x25 | 0x26 => {
                self.require(self.features.bulk_memory, "reference types")?;
                let x = it.read_u32()?;
                let t = self.symbols.table(x)?;
                let (elem, index_type) = (t.elem_type, t.limits.index_type());
                if opcode == 0x25 {
                    self.pop(index_type)?;
                    self.push(elem);
                    self.w.add_op(op::TABLE_GET);
                } else {
                    self.pop(elem)?;
                    self.pop(index_type)?;
                    self.w.add_op(op::TABLE_SET);
                }
                self.w.add_u32(x);
            }
            0x28..=0x35 => {
                let (natural, t) = memory_access_type(opcode);
                let (memory, offset, addr) = self.memarg(it, natural, false)?;
                self.pop(addr)?;
                self.push(t);
                self.w.add_mem_access(opcode, memory, offset);
            }
            0x36..=0x3e => {
                let (natural, t) = memory_access_type(opcode);
                let (memory, offset, addr) = self.memarg(it, natural, false)?;
                self.pop(t)?;
                self.pop(addr)?;
                self.w.add_mem_access(opcode, memory, offset);
            }
            0x3f | 0x40 => {
                let memory = self.memory_index(it)?;
                let addr = self.memory_index_type(memory)?;
                if opcode == 0x40 { self.pop(addr)?; }
                self.push(addr);
                self.w.add_op(if opcode == 0x3f { op::MEMORY_SIZE } else { op::MEMORY_GROW });
                self.w.add_u32(memory);
            }
            0x41 => {
                let v = it.read_s32()?;
                self.push(ValType::I32);
                self.w.add_i32_const(v);
            }
            0x42 => {
                let v = it.read_s64()?;
                self.push(ValType::I64);
                self.w.add_i64_const(v);
            }
            0x43 => {
                let v = it.read_f32_bits()?;
                self.push(ValType::F32);
                self.w.add_f32_const(v);
            }
            0x44 => {
                let v = it.read_f64_bits()?;
                self.push(ValType::F64);
                self.w.add_f64_const(v);
            }
            0x45..=0xc4 => {
                if opcode >= 0xc0 { self.require(self.features.sign_extension, "sign extension")?; }
                let (params, result) = numeric::core_signature(opcode).ok_or(Error::Malformed(UNKNOWN_INSTRUCTION))?;
                self.pop_all(params)?;
                self.push(result);
                self.w.add_op(opcode);
            }
            0xd0 => {
                self.require(self.features.bulk_memory, "reference types")?;
                let ht = self.heap_type(it)?;
                self.push(ValType::reference(ht, true));
                self.w.add_op(op::REF_NULL);
            }
            0xd1 => {
                self.require(self.features.bulk_memory, "reference types")?;
                self.pop_ref()?;
                self.push(ValType::I32);
                self.w.add_op(op::REF_IS_NULL);
            }
            0xd2 => {
                self.require(self.features.bulk_memory, "reference types")?;
                let f = it.read_u32()?;
                let type_idx = self.symbols.functions.get(f as usize).ok_or(Error::Validation(UNKNOWN_FUNC))?.type_idx;
                if !self.symbols.is_declared_function(f) { return validation(UNDECLARED_FUNC_REF); }
                self.push(if self.features.typed_references() {
                    ValType::reference(HeapType::concrete(type_idx), false)
                } else {
                    ValType::FUNCREF
                });
                self.w.add_op(op::REF_FUNC);
                self.w.add_u32(f);
            }
            0xd3 => {
                self.require(self.features.gc, "gc")?;
                self.pop(ValType::EQREF)?;
                self.pop(ValType::EQREF)?;
                self.push(ValType::I32);
                self.w.add_op(op::REF_EQ);
            }
            0xd4 => {
                self.require(self.features.typed_references(), "function references")?;
                let t = self.pop_ref()?;
                self.push(t.as_non_null());
                self.w.add_op(op::REF_AS_NON_NULL);
            }
            0xd5 => {
                self.require(self.features.typed_references(), "function references")?;
                let depth = it.read_u32()?;
                let t = self.pop_ref()?;
                let lt = self.label_types(depth)?;
                self.pop_all(&lt)?;
                self.push_all(&lt);
                self.push(t.as_non_null());
                self.w.add_op(op::BR_ON_NULL);
                self.emit_target(depth)?;
            }
            0xd6 => {
                self.require(self.features.typed_references(), "function references")?;
                let depth = it.read_u32()?;
                let lt = self.label_types(depth)?;
                let (last, rest) = lt.split_last().ok_or(Error::Validation(TYPE_MISMATCH))?;
                let t = self.pop_ref()?;
                if !self.symbols.is_subtype(t.as_non_null(), *last) { return validation(TYPE_MISMATCH); }
                self.pop_all(rest)?;
                self.push_all(rest);
                self.w.add_op(op::BR_ON_NON_NULL);
                self.emit_target(depth)?;
            }
            0xfb => {
                self.require(self.features.gc, "gc")?;
                self.visit_gc(it)?;
            }
            0xfc => self.visit_misc(it)?,
            0xfd => self.visit_simd(it)?,
            0xfe => {
                self.require(self.features.threads, "threads")?;
                self.visit_atomic(it)?;
            }
            _ => return malformed(UNKNOWN_INSTRUCTION),
        }
        Ok(())
    }

    fn visit_br_table(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n = it.read_vec_len(1)?;
        let mut depths = Vec::with_capacity(n as usize + 1);
        for _ in 0..=n {
            depths.push(it.read_u32()?);
        }
        self.pop(ValType::I32)?;
        let default = *depths.last().ok_or(Error::Validation(UNKNOWN_LABEL))?;
        let arity = self.label_types(default)?.len();
        for &d in &depths[..n as usize] {
            let lt = self.label_types(d)?;
            if lt.len() != arity { return validation(TYPE_MISMATCH); }
            // Re-push what was popped so every arm sees the same operands.
            let mut popped = Vec::with_capacity(lt.len());
            for t in lt.iter().rev() {
                popped.push(self.pop(*t)?);
            }
            popped.reverse();
            self.push_all(&popped);
        }
        let lt = self.label_types(default)?;
        self.pop_all(&lt)?;
        self.w.add_op(op::BR_TABLE);
        self.w.add_u32(n);
        for d in depths {
            self.emit_target(d)?;
        }
        self.set_unreachable()
    }

    fn visit_try_table(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        self.require(self.features.exceptions, "exception handling")?;
        let (params, results) = self.block_type(it)?;
        let n = it.read_vec_len(2)?;
        let mut catches = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let kind = match it.read_u8()? {
                0 => HandlerKind::Catch,
                1 => HandlerKind::CatchRef,
                2 => HandlerKind::CatchAll,
                3 => HandlerKind::CatchAllRef,
                _ => return malformed(INVALID_CATCH_KIND),
            };
            let tag = if matches!(kind, HandlerKind::Catch | HandlerKind::CatchRef) { it.read_u32()? } else { NO_TAG };
            let depth = it.read_u32()?;
            let mut sent: Vec<ValType> = if tag != NO_TAG { self.symbols.tag_type(tag)?.params.to_vec() } else { Vec::new() };
            if matches!(kind, HandlerKind::CatchRef | HandlerKind::CatchAllRef) {
                sent.push(ValType::reference(HeapType::EXN, false));
            }
            let lt = self.label_types(depth)?;
            if !self.symbols.is_subtype_all(&sent, &lt) { return validation(TYPE_MISMATCH); }
            catches.push((kind, tag, depth));
        }
        self.pop_all(&params)?;
        let start = self.w.position();
        // Handler labels are relative to the enclosing frames.
        let first = self.handlers.len();
        for (kind, tag, depth) in catches {
            self.add_handler(depth, kind, tag, start)?;
        }
        let last = self.handlers.len();
        self.push_ctrl(ControlKind::TryTable, params, results)?;
        if let Some(f) = self.ctrls.last_mut() { f.handlers = first..last; }
        Ok(())
    }

    fn visit_legacy_catch(&mut self, opcode: u8, it: &mut ByteIter) -> Result<(), Error> {
        self.require(self.features.legacy_exceptions, "legacy exception handling")?;
        let kind = self.frame()?.kind;
        if !matches!(kind, ControlKind::Try | ControlKind::Catch) { return validation(CATCH_MUST_CLOSE_TRY); }
        let tag_params: Rc<[ValType]> = if opcode == 0x07 {
            let tag = it.read_u32()?;
            let params = Rc::from(&self.symbols.tag_type(tag)?.params[..]);
            self.visit_catch_clause(HandlerKind::LegacyCatch, tag, &params)?;
            params
        } else {
            let params = Rc::from([]);
            self.visit_catch_clause(HandlerKind::LegacyCatchAll, NO_TAG, &params)?;
            params
        };
        let frame = self.ctrls.last_mut().ok_or(Error::Validation(CATCH_MUST_CLOSE_TRY))?;
        frame.kind = if opcode == 0x07 { ControlKind::Catch } else { ControlKind::CatchAll };
        frame.unreachable = false;
        let init_height = frame.init_height;
        self.reset_locals(init_height);
        self.push_all(&tag_params);
        Ok(())
    }

    /// Ends the current try or catch body and starts a handler body.
    fn visit_catch_clause(&mut self, kind: HandlerKind, tag: u32, tag_params: &[ValType]) -> Result<(), Error> {
        self.check_frame_end()?;
        let skip = self.w.add_forward_branch(op::BR_I32);
        let pos = self.w.position();
        let height = self.frame()?.height;
        let frame = self.ctrls.last_mut().ok_or(Error::Validation(CATCH_MUST_CLOSE_TRY))?;
        frame.fixups.push(Fixup::Code(skip));
        let try_end = *frame.try_end.get_or_insert(pos);
        let try_start = frame.try_start;
        let label = self.w.add_label(tag_params.len() as u32, height as u32);
        self.handlers.push(ExceptionHandler { start: try_start as u32, end: try_end as u32, kind, tag, target: label as u32 });
        Ok(())
    }

    fn visit_delegate(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        self.require(self.features.legacy_exceptions, "legacy exception handling")?;
        if self.frame()?.kind != ControlKind::Try { return validation(DELEGATE_MUST_CLOSE_TRY); }
        let depth = it.read_u32()?;
        let frame = self.pop_ctrl()?;
        self.frame_at(depth)?;
        let end = self.w.position();
        self.handlers.push(ExceptionHandler {
            start: frame.try_start as u32,
            end: end as u32,
            kind: HandlerKind::Delegate,
            tag: NO_TAG,
            target: depth,
        });
        self.close_frame(&frame);
        self.push_all(&frame.results);
        Ok(())
    }
}
