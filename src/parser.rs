use std::sync::Arc;

use tracing::{debug, warn};

use crate::byte_iter::ByteIter;
use crate::bytecode::{BytecodeWriter, FunctionBody};
use crate::config::Config;
use crate::const_expr::{ConstExprReader, ConstInit};
use crate::error::*;
use crate::error_msg::*;
use crate::limits::*;
use crate::module::{CustomSection, Module};
use crate::names::NameSection;
use crate::symbol_table::*;
use crate::types::*;
use crate::validator::FuncValidator;

pub const MAGIC_HEADER: &[u8; 4] = b"\0asm";
pub const VERSION: u32 = 1;
pub const MAX_PAGES: u64 = 1 << 16;
pub const MAX_PAGES_64: u64 = 1 << 48;
pub const MAX_LOCALS: u64 = 50_000;

pub mod section_id {
    pub const CUSTOM: u8 = 0;
    pub const TYPE: u8 = 1;
    pub const IMPORT: u8 = 2;
    pub const FUNCTION: u8 = 3;
    pub const TABLE: u8 = 4;
    pub const MEMORY: u8 = 5;
    pub const GLOBAL: u8 = 6;
    pub const EXPORT: u8 = 7;
    pub const START: u8 = 8;
    pub const ELEMENT: u8 = 9;
    pub const CODE: u8 = 10;
    pub const DATA: u8 = 11;
    pub const DATA_COUNT: u8 = 12;
    pub const TAG: u8 = 13;
}

/// Position of a section in the required order.
fn section_rank(id: u8) -> Option<u8> {
    use section_id::*;
    Some(match id {
        TYPE => 1,
        IMPORT => 2,
        FUNCTION => 3,
        TABLE => 4,
        MEMORY => 5,
        TAG => 6,
        GLOBAL => 7,
        EXPORT => 8,
        START => 9,
        ELEMENT => 10,
        DATA_COUNT => 11,
        CODE => 12,
        DATA => 13,
        _ => return None,
    })
}

/// Reads one binary module into a `Module`.
pub(crate) struct Parser<'a> {
    bytes: &'a [u8],
    config: &'a Config,
    symbols: SymbolTable,
    w: BytecodeWriter,
    bodies: Vec<FunctionBody>,
    data: Vec<u8>,
    custom_data: Vec<u8>,
    custom_sections: Vec<CustomSection>,
    names: Option<NameSection>,
    declared_functions: u32,
    code_seen: bool,
    data_seen: bool,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(bytes: &'a [u8], config: &'a Config) -> Self {
        Self {
            bytes,
            config,
            symbols: SymbolTable::new(),
            w: BytecodeWriter::new(),
            bodies: Vec::new(),
            data: Vec::new(),
            custom_data: Vec::new(),
            custom_sections: Vec::new(),
            names: None,
            declared_functions: 0,
            code_seen: false,
            data_seen: false,
        }
    }

    #[inline]
    fn types(&self) -> TypeReader<'a> { TypeReader::new(&self.config.features, self.symbols.type_count()) }

    #[inline]
    fn limits(&self) -> &'a ModuleLimits { &self.config.limits }

    pub(crate) fn parse(mut self) -> Result<Module, Error> {
        let bytes = self.bytes;
        check_module_size(bytes.len(), self.limits().module_size)?;
        if bytes.len() < 4 { return malformed(UNEXPECTED_END); }
        if &bytes[0..4] != MAGIC_HEADER { return malformed(NO_MAGIC_HEADER); }
        let mut it = ByteIter::new(bytes, 4);
        if it.read_fixed_u32().map_err(|_| Error::Malformed(UNEXPECTED_END))? != VERSION {
            return malformed(UNKNOWN_BINARY_VERSION);
        }

        let mut last_rank = 0;
        while !it.empty() {
            let id = it.read_u8()?;
            let size = it.read_u32()? as usize;
            let start = it.cur();
            let mut body = it.split(size).map_err(|_| Error::Malformed(UNEXPECTED_END))?;
            if id == section_id::CUSTOM {
                self.parse_custom_section(&mut body)?;
                continue;
            }
            let rank = section_rank(id).ok_or(Error::Malformed(INVALID_SECTION_ID))?;
            if rank <= last_rank { return malformed(JUNK_AFTER_LAST); }
            last_rank = rank;
            debug!(target: "wabc::parser", id, offset = start, size, "section");
            match id {
                section_id::TYPE => self.parse_type_section(&mut body)?,
                section_id::IMPORT => self.parse_import_section(&mut body)?,
                section_id::FUNCTION => self.parse_function_section(&mut body)?,
                section_id::TABLE => self.parse_table_section(&mut body)?,
                section_id::MEMORY => self.parse_memory_section(&mut body)?,
                section_id::TAG => self.parse_tag_section(&mut body)?,
                section_id::GLOBAL => self.parse_global_section(&mut body)?,
                section_id::EXPORT => self.parse_export_section(&mut body)?,
                section_id::START => self.parse_start_section(&mut body)?,
                section_id::ELEMENT => self.parse_element_section(&mut body)?,
                section_id::DATA_COUNT => self.symbols.data_count = Some(body.read_u32()?),
                section_id::CODE => self.parse_code_section(&mut body)?,
                _ => self.parse_data_section(&mut body)?,
            }
            if !body.empty() { return malformed(SECTION_SIZE_MISMATCH); }
        }

        if self.declared_functions > 0 && !self.code_seen { return malformed(FUNC_CODE_INCONSISTENT); }
        if !self.data_seen && self.symbols.data_count.is_some_and(|n| n != 0) { return malformed(DATA_COUNT_MISMATCH); }

        let binary = self.config.retain_binary.then(|| Arc::from(bytes));
        let (bytecode, v128_pool, call_sites) = self.w.into_parts();
        debug!(target: "wabc::parser", functions = self.symbols.functions.len(), bytecode = bytecode.len(), "module parsed");
        Ok(Module {
            symbols: self.symbols,
            bytecode,
            v128_pool,
            call_sites,
            bodies: self.bodies,
            data: self.data,
            custom_data: self.custom_data,
            custom_sections: self.custom_sections,
            names: self.names,
            binary,
        })
    }

    // ---------------- Custom ----------------
    fn parse_custom_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let name = it.read_name()?;
        let offset = it.cur();
        let payload = it.read_bytes(it.remaining())?;
        let start = self.custom_data.len();
        self.custom_data.extend_from_slice(payload);
        self.custom_sections.push(CustomSection { name: name.to_owned(), data: start..self.custom_data.len(), offset });
        if name == "name" {
            match NameSection::parse(payload) {
                Ok(names) => self.names = Some(names),
                Err(e) => warn!(target: "wabc::parser", offset, error = %e, "ignoring malformed name section"),
            }
        }
        Ok(())
    }

    // ---------------- Types ----------------
    fn parse_type_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n = it.read_vec_len(1)?;
        for _ in 0..n {
            let count = if it.peek_u8()? == 0x4e {
                self.config.require(self.config.features.gc, "gc")?;
                it.read_u8()?;
                it.read_vec_len(1)?
            } else {
                1
            };
            check_type_count(self.symbols.type_count().saturating_add(count), self.limits().type_count)?;
            let reader = TypeReader::new(&self.config.features, self.symbols.type_count() + count);
            let mut group = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let st = reader.sub_type(it)?;
                if let CompositeType::Func(ft) = &st.composite {
                    check_param_count(ft.params.len(), self.limits().param_count)?;
                    check_result_count(ft.results.len(), self.limits().result_count)?;
                }
                group.push(st);
            }
            self.symbols.add_rec_group(group)?;
        }
        Ok(())
    }

    // ---------------- Imports ----------------
    fn parse_import_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n = it.read_vec_len(3)?;
        check_import_count(n, self.limits().import_count)?;
        for _ in 0..n {
            let module = it.read_name()?.to_owned();
            let name = it.read_name()?.to_owned();
            let kind = ExternKind::from_byte(it.read_u8()?).ok_or(Error::Malformed(MALFORMED_IMPORT_KIND))?;
            let import = Some(ImportDesc { module, name });
            let index = match kind {
                ExternKind::Func => {
                    let type_idx = it.read_u32()?;
                    self.symbols.func_type(type_idx)?;
                    self.symbols.functions.push(Function { type_idx, import });
                    self.symbols.num_imported_functions += 1;
                    check_function_count(self.symbols.functions.len() as u32, self.limits().function_count)?;
                    self.symbols.functions.len() - 1
                }
                ExternKind::Table => {
                    let elem_type = self.types().ref_type(it)?;
                    let limits = self.read_table_limits(it)?;
                    self.push_table(Table { elem_type, limits, init: None, import })?;
                    self.symbols.num_imported_tables += 1;
                    self.symbols.tables.len() - 1
                }
                ExternKind::Memory => {
                    let limits = self.read_memory_limits(it)?;
                    self.push_memory(Memory { limits, import })?;
                    self.symbols.num_imported_memories += 1;
                    self.symbols.memories.len() - 1
                }
                ExternKind::Global => {
                    let ty = self.types().val_type(it)?;
                    let mutable = read_mutability(it)?;
                    self.symbols.globals.push(Global { ty, mutable, init: None, import });
                    self.symbols.num_imported_globals += 1;
                    check_global_count(self.symbols.globals.len() as u32, self.limits().global_count)?;
                    self.symbols.globals.len() - 1
                }
                ExternKind::Tag => {
                    self.config.require(self.config.features.exceptions, "exception handling")?;
                    let type_idx = self.read_tag_type(it)?;
                    self.symbols.tags.push(Tag { type_idx, import });
                    self.symbols.num_imported_tags += 1;
                    check_tag_count(self.symbols.tags.len() as u32, self.limits().tag_count)?;
                    self.symbols.tags.len() - 1
                }
            };
            self.symbols.add_import(kind, index as u32);
        }
        Ok(())
    }

    // ---------------- Functions ----------------
    fn parse_function_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n = it.read_vec_len(1)?;
        check_function_count(self.symbols.num_imported_functions.saturating_add(n), self.limits().function_count)?;
        self.declared_functions = n;
        for _ in 0..n {
            let type_idx = it.read_u32()?;
            self.symbols.func_type(type_idx)?;
            self.symbols.functions.push(Function { type_idx, import: None });
        }
        Ok(())
    }

    // ---------------- Tables & memories ----------------
    /// Limits flags: bit 0 has max, bit 1 shared, bit 2 64-bit index.
    fn read_limits(&self, it: &mut ByteIter, allow_shared: bool) -> Result<Limits, Error> {
        let flags = it.read_u8()?;
        let features = &self.config.features;
        if flags & !0x07 != 0 { return malformed(INVALID_LIMITS_FLAGS); }
        let shared = flags & 0x02 != 0;
        let index64 = flags & 0x04 != 0;
        if shared && !(allow_shared && features.threads) { return malformed(INVALID_LIMITS_FLAGS); }
        if index64 && !features.memory64 { return malformed(INVALID_LIMITS_FLAGS); }
        let read = |it: &mut ByteIter| if index64 { it.read_u64() } else { it.read_u32().map(u64::from) };
        let min = read(it)?;
        let max = if flags & 0x01 != 0 { Some(read(it)?) } else { None };
        if max.is_some_and(|m| min > m) { return validation(MIN_GREATER_THAN_MAX); }
        Ok(Limits { min, max, shared, index64 })
    }

    fn read_table_limits(&self, it: &mut ByteIter) -> Result<Limits, Error> {
        let limits = self.read_limits(it, false)?;
        if !limits.index64 && (limits.min > u32::MAX as u64 || limits.max.is_some_and(|m| m > u32::MAX as u64)) {
            return validation(TABLE_SIZE_LIMIT);
        }
        check_table_size(limits.min, self.limits().table_size)?;
        Ok(limits)
    }

    fn read_memory_limits(&self, it: &mut ByteIter) -> Result<Limits, Error> {
        let limits = self.read_limits(it, true)?;
        let (cap, msg) = if limits.index64 { (MAX_PAGES_64, MEMORY64_SIZE_LIMIT) } else { (MAX_PAGES, MEMORY_SIZE_LIMIT) };
        if limits.min > cap || limits.max.is_some_and(|m| m > cap) { return validation(msg); }
        if limits.shared && limits.max.is_none() { return validation(SHARED_MEMORY_NEEDS_MAX); }
        check_memory_pages(limits.min, self.limits().memory_pages)?;
        Ok(limits)
    }

    fn push_table(&mut self, table: Table) -> Result<(), Error> {
        if !self.config.features.bulk_memory && !self.symbols.tables.is_empty() { return validation(MULTIPLE_TABLES); }
        self.symbols.tables.push(table);
        check_table_count(self.symbols.tables.len() as u32, self.limits().table_count)
    }

    fn push_memory(&mut self, memory: Memory) -> Result<(), Error> {
        self.symbols.memories.push(memory);
        let features = &self.config.features;
        check_memory_count(self.symbols.memories.len() as u32, self.limits().memory_count_for(features.multi_memory), features.multi_memory)
    }

    fn parse_table_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n = it.read_vec_len(2)?;
        for _ in 0..n {
            let has_init = it.peek_u8()? == 0x40;
            if has_init {
                self.config.require(self.config.features.typed_references(), "function references")?;
                it.read_u8()?;
                if it.read_u8()? != 0 { return malformed(INVALID_TABLE_PREFIX); }
            }
            let elem_type = self.types().ref_type(it)?;
            let limits = self.read_table_limits(it)?;
            let init = if has_init {
                Some(self.read_const_expr(it, elem_type, self.symbols.globals.len() as u32)?)
            } else {
                if !elem_type.is_nullable() { return validation(UNINITIALIZED_TABLE); }
                None
            };
            self.push_table(Table { elem_type, limits, init, import: None })?;
        }
        Ok(())
    }

    fn parse_memory_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n = it.read_vec_len(2)?;
        for _ in 0..n {
            let limits = self.read_memory_limits(it)?;
            self.push_memory(Memory { limits, import: None })?;
        }
        Ok(())
    }

    // ---------------- Tags ----------------
    fn read_tag_type(&self, it: &mut ByteIter) -> Result<u32, Error> {
        if it.read_u8()? != 0 { return malformed(INVALID_TAG_ATTRIBUTE); }
        let type_idx = it.read_u32()?;
        if !self.symbols.func_type(type_idx)?.results.is_empty() { return validation(INVALID_TAG_TYPE); }
        Ok(type_idx)
    }

    fn parse_tag_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        self.config.require(self.config.features.exceptions, "exception handling")?;
        let n = it.read_vec_len(2)?;
        check_tag_count(self.symbols.tags.len() as u32 + n, self.limits().tag_count)?;
        for _ in 0..n {
            let type_idx = self.read_tag_type(it)?;
            self.symbols.tags.push(Tag { type_idx, import: None });
        }
        Ok(())
    }

    // ---------------- Globals ----------------
    /// Globals that constant expressions outside the global section may read.
    #[inline]
    fn visible_globals(&self) -> u32 {
        if self.config.features.gc { self.symbols.globals.len() as u32 } else { self.symbols.num_imported_globals }
    }

    fn read_const_expr(&mut self, it: &mut ByteIter, expected: ValType, visible_globals: u32) -> Result<ConstInit, Error> {
        let reader = ConstExprReader { symbols: &self.symbols, features: &self.config.features, visible_globals };
        let init = reader.read(it, expected, &mut self.w)?;
        init.function_dependencies().iter().for_each(|f| {
            self.symbols.declared_funcs.insert(*f);
        });
        Ok(init)
    }

    fn parse_global_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n = it.read_vec_len(3)?;
        check_global_count(self.symbols.globals.len() as u32 + n, self.limits().global_count)?;
        for _ in 0..n {
            let ty = self.types().val_type(it)?;
            let mutable = read_mutability(it)?;
            let visible = self.visible_globals();
            let init = self.read_const_expr(it, ty, visible)?;
            self.symbols.globals.push(Global { ty, mutable, init: Some(init), import: None });
        }
        Ok(())
    }

    // ---------------- Exports & start ----------------
    fn parse_export_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n = it.read_vec_len(3)?;
        check_export_count(n, self.limits().export_count)?;
        for _ in 0..n {
            let name = it.read_name()?.to_owned();
            let kind = ExternKind::from_byte(it.read_u8()?).ok_or(Error::Malformed(MALFORMED_EXPORT_KIND))?;
            let index = it.read_u32()?;
            self.symbols.add_export(Export { name, kind, index })?;
        }
        Ok(())
    }

    fn parse_start_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let func = it.read_u32()?;
        let ft = self.symbols.function_type(func)?;
        if !ft.params.is_empty() || !ft.results.is_empty() { return validation(START_FUNC); }
        self.symbols.start = Some(func);
        Ok(())
    }

    // ---------------- Elements ----------------
    fn read_elem_kind(&self, it: &mut ByteIter) -> Result<ValType, Error> {
        if it.read_u8()? != 0x00 { return malformed(INVALID_ELEM_KIND); }
        Ok(ValType::FUNCREF)
    }

    fn parse_element_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        let n = it.read_vec_len(1)?;
        check_element_segment_count(n, self.limits().element_segment_count)?;
        for _ in 0..n {
            let flags = it.read_u32()?;
            if flags > 7 { return malformed(INVALID_ELEM_FLAGS); }
            if flags != 0 { self.config.require(self.config.features.bulk_memory, "bulk memory")?; }
            let passive_or_declarative = flags & 0x01 != 0;
            let explicit_table = flags & 0x02 != 0;
            let uses_exprs = flags & 0x04 != 0;

            let mut active = None;
            if !passive_or_declarative {
                let table = if explicit_table { it.read_u32()? } else { 0 };
                let index_type = self.symbols.table(table)?.limits.index_type();
                let visible = self.visible_globals();
                let offset = self.read_const_expr(it, index_type, visible)?;
                active = Some((table, offset));
            }
            let elem_type = match (uses_exprs, flags & 0x03 != 0) {
                (false, false) => ValType::FUNCREF,
                (false, true) => self.read_elem_kind(it)?,
                (true, false) => ValType::FUNCREF,
                (true, true) => self.types().ref_type(it)?,
            };
            let count = it.read_vec_len(1)?;
            let items = if uses_exprs {
                let mut exprs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let visible = self.visible_globals();
                    exprs.push(self.read_const_expr(it, elem_type, visible)?);
                }
                ElemItems::Exprs(exprs)
            } else {
                let mut funcs = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let f = it.read_u32()?;
                    if f as usize >= self.symbols.functions.len() { return validation(UNKNOWN_FUNC); }
                    self.symbols.declared_funcs.insert(f);
                    funcs.push(f);
                }
                ElemItems::Functions(funcs)
            };
            let mode = match active {
                Some((index, offset)) => {
                    if !self.symbols.is_subtype(elem_type, self.symbols.table(index)?.elem_type) { return validation(TYPE_MISMATCH); }
                    SegmentMode::Active { index, offset }
                }
                None if flags & 0x02 != 0 => SegmentMode::Declarative,
                None => SegmentMode::Passive,
            };
            self.symbols.elems.push(ElemSegment { elem_type, mode, items });
        }
        Ok(())
    }

    // ---------------- Code ----------------
    fn parse_code_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        self.code_seen = true;
        let n = it.read_vec_len(2)?;
        if n != self.declared_functions { return malformed(FUNC_CODE_INCONSISTENT); }
        let features = &self.config.features;
        let limits = self.limits();
        for i in 0..n {
            let func_index = self.symbols.num_imported_functions + i;
            let size = it.read_u32()?;
            check_function_size(size, limits.function_size)?;
            let mut body = it.split(size as usize)?;

            let groups = body.read_vec_len(2)?;
            let mut locals = Vec::new();
            let mut total: u64 = 0;
            for _ in 0..groups {
                let count = body.read_u32()?;
                total += count as u64;
                check_local_count(total, limits.local_count)?;
                if limits.local_count == u32::MAX && total > MAX_LOCALS { return malformed(TOO_MANY_LOCALS); }
                let t = TypeReader::new(features, self.symbols.type_count()).val_type(&mut body)?;
                locals.extend(std::iter::repeat(t).take(count as usize));
            }

            let params = self.symbols.function_type(func_index)?.params.clone();
            let validator = FuncValidator::new(&self.symbols, features, limits, &mut self.w, func_index, &params, locals);
            let (entry, _) = validator.validate(&mut body)?;
            self.bodies.push(entry);
        }
        Ok(())
    }

    // ---------------- Data ----------------
    fn parse_data_section(&mut self, it: &mut ByteIter) -> Result<(), Error> {
        self.data_seen = true;
        let n = it.read_vec_len(1)?;
        check_data_segment_count(n, self.limits().data_segment_count)?;
        if self.symbols.data_count.is_some_and(|c| c != n) { return malformed(DATA_COUNT_MISMATCH); }
        for _ in 0..n {
            let flags = it.read_u32()?;
            let mode = match flags {
                0 | 2 => {
                    let memory = if flags == 2 { it.read_u32()? } else { 0 };
                    let index_type = self.symbols.memory(memory)?.limits.index_type();
                    let visible = self.visible_globals();
                    let offset = self.read_const_expr(it, index_type, visible)?;
                    SegmentMode::Active { index: memory, offset }
                }
                1 => {
                    self.config.require(self.config.features.bulk_memory, "bulk memory")?;
                    SegmentMode::Passive
                }
                _ => return malformed(INVALID_DATA_FLAGS),
            };
            let len = it.read_u32()? as usize;
            if !it.has_n_left(len) { return malformed(UNEXPECTED_END_SHORT); }
            let bytes = it.read_bytes(len)?;
            let start = self.data.len();
            self.data.extend_from_slice(bytes);
            self.symbols.datas.push(DataSegment { mode, bytes: start..self.data.len() });
        }
        Ok(())
    }
}
