use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::bytecode::{read_exception_table, CallSite, CodeEntryHeader, ExceptionHandler, FunctionBody};
use crate::config::Config;
use crate::error::*;
use crate::error_msg::*;
use crate::names::NameSection;
use crate::parser::Parser;
use crate::symbol_table::*;
use crate::types::FuncType;

/// A custom section copied out of the binary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CustomSection {
    pub name: String,
    /// Payload range in the module's custom-data blob.
    pub data: Range<usize>,
    /// Offset of the payload in the original binary.
    pub offset: usize,
}

impl CustomSection {
    #[inline]
    pub fn is_debug(&self) -> bool { self.name.starts_with(".debug_") }
}

/// A decoded, validated and encoded module. Immutable; share it as `Arc<Module>`.
pub struct Module {
    pub(crate) symbols: SymbolTable,
    pub(crate) bytecode: Vec<u8>,
    pub(crate) v128_pool: Vec<u128>,
    pub(crate) call_sites: Vec<CallSite>,
    /// Defined functions, in index order after the imports.
    pub(crate) bodies: Vec<FunctionBody>,
    pub(crate) data: Vec<u8>,
    pub(crate) custom_data: Vec<u8>,
    pub(crate) custom_sections: Vec<CustomSection>,
    pub(crate) names: Option<NameSection>,
    pub(crate) binary: Option<Arc<[u8]>>,
}

impl Module {
    pub fn compile(bytes: &[u8]) -> Result<Self, Error> { Self::compile_with(bytes, &Config::default()) }

    /// Parses with `config`. Inputs over the async threshold go through `compile_async`.
    pub fn compile_with(bytes: &[u8], config: &Config) -> Result<Self, Error> {
        if bytes.len() >= config.async_parsing_threshold {
            return Self::compile_async(bytes.to_vec(), config.clone());
        }
        Parser::new(bytes, config).parse()
    }

    /// Parses on a dedicated thread with `config.async_stack_size` of stack.
    pub fn compile_async(bytes: Vec<u8>, config: Config) -> Result<Self, Error> {
        debug!(target: "wabc::module", len = bytes.len(), stack = config.async_stack_size, "parsing on background thread");
        let handle = std::thread::Builder::new()
            .name("wabc-parse".into())
            .stack_size(config.async_stack_size)
            .spawn(move || Parser::new(&bytes, &config).parse())
            .map_err(|_| Error::Limit(PARSE_THREAD_FAILED))?;
        handle.join().map_err(|_| Error::Limit(PARSE_THREAD_FAILED))?
    }

    // ---------------- Symbols ----------------
    #[inline]
    pub fn symbols(&self) -> &SymbolTable { &self.symbols }
    #[inline]
    pub fn num_functions(&self) -> u32 { self.symbols.functions.len() as u32 }
    #[inline]
    pub fn num_imported_functions(&self) -> u32 { self.symbols.num_imported_functions }
    #[inline]
    pub fn function_type(&self, func: u32) -> Result<&FuncType, Error> { self.symbols.function_type(func) }
    #[inline]
    pub fn func_type(&self, type_idx: u32) -> Result<&FuncType, Error> { self.symbols.func_type(type_idx) }
    pub fn functions(&self) -> &[Function] { &self.symbols.functions }
    pub fn tables(&self) -> &[Table] { &self.symbols.tables }
    pub fn memories(&self) -> &[Memory] { &self.symbols.memories }
    pub fn globals(&self) -> &[Global] { &self.symbols.globals }
    pub fn global(&self, idx: u32) -> Option<&Global> { self.symbols.globals.get(idx as usize) }
    pub fn tags(&self) -> &[Tag] { &self.symbols.tags }
    pub fn exports(&self) -> &[Export] { &self.symbols.exports }
    pub fn export(&self, name: &str) -> Option<&Export> { self.symbols.export(name) }
    pub fn elems(&self) -> &[ElemSegment] { &self.symbols.elems }
    pub fn datas(&self) -> &[DataSegment] { &self.symbols.datas }
    #[inline]
    pub fn start(&self) -> Option<u32> { self.symbols.start }

    /// Imports in declaration order as (kind, index in that kind's space, descriptor).
    pub fn imports(&self) -> impl Iterator<Item = (ExternKind, u32, &ImportDesc)> + '_ {
        self.symbols.imports.iter().filter_map(move |&(kind, idx)| {
            let i = idx as usize;
            let desc = match kind {
                ExternKind::Func => self.symbols.functions.get(i)?.import.as_ref(),
                ExternKind::Table => self.symbols.tables.get(i)?.import.as_ref(),
                ExternKind::Memory => self.symbols.memories.get(i)?.import.as_ref(),
                ExternKind::Global => self.symbols.globals.get(i)?.import.as_ref(),
                ExternKind::Tag => self.symbols.tags.get(i)?.import.as_ref(),
            }?;
            Some((kind, idx, desc))
        })
    }

    // ---------------- Bytecode ----------------
    #[inline]
    pub fn bytecode(&self) -> &[u8] { &self.bytecode }

    /// Where function `func` lives in the bytecode. `None` for imports.
    pub fn function_body(&self, func: u32) -> Option<&FunctionBody> {
        let defined = func.checked_sub(self.symbols.num_imported_functions)?;
        self.bodies.get(defined as usize)
    }

    pub fn function_bodies(&self) -> &[FunctionBody] { &self.bodies }

    pub fn function_bytecode(&self, func: u32) -> Option<&[u8]> {
        self.function_body(func).map(|b| &self.bytecode[b.body.clone()])
    }

    pub fn code_entry_header(&self, func: u32) -> Result<CodeEntryHeader, Error> {
        let body = self.function_body(func).ok_or(Error::Validation(UNKNOWN_FUNC))?;
        CodeEntryHeader::read(&self.bytecode, body.header)
    }

    pub fn exception_table(&self, func: u32) -> Result<Vec<ExceptionHandler>, Error> {
        match self.code_entry_header(func)?.exception_table {
            Some(offset) => read_exception_table(&self.bytecode, offset as usize),
            None => Ok(Vec::new()),
        }
    }

    #[inline]
    pub fn v128_constant(&self, idx: u32) -> Option<u128> { self.v128_pool.get(idx as usize).copied() }
    #[inline]
    pub fn call_sites(&self) -> &[CallSite] { &self.call_sites }

    /// Bytes of a data segment.
    pub fn data_bytes(&self, segment: u32) -> Option<&[u8]> {
        self.symbols.datas.get(segment as usize).map(|d| &self.data[d.bytes.clone()])
    }

    // ---------------- Custom data ----------------
    pub fn custom_sections(&self) -> &[CustomSection] { &self.custom_sections }

    pub fn custom_section_data(&self, section: &CustomSection) -> &[u8] { &self.custom_data[section.data.clone()] }

    pub fn debug_sections(&self) -> impl Iterator<Item = &CustomSection> + '_ {
        self.custom_sections.iter().filter(|s| s.is_debug())
    }

    pub fn names(&self) -> Option<&NameSection> { self.names.as_ref() }

    /// Input binary, kept when `Config::retain_binary` is set.
    pub fn binary(&self) -> Option<&[u8]> { self.binary.as_deref() }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("functions", &self.symbols.functions.len())
            .field("exports", &self.symbols.exports.len())
            .field("bytecode_len", &self.bytecode.len())
            .finish()
    }
}
