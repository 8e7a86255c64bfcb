#![deny(unsafe_code)]

mod byte_iter;
pub mod bytecode;
pub mod config;
mod const_expr;
pub mod disasm;
mod error;
pub mod error_msg;
mod leb128;
pub mod limits;
pub mod linker;
pub mod module;
pub mod names;
mod parser;
pub mod resolution;
pub mod symbol_table;
pub mod types;
mod validator;

pub use bytecode::{CallSite, CodeEntryHeader, ExceptionHandler, FunctionBody, HandlerKind};
pub use config::{Config, Features};
pub use const_expr::{ConstInit, ConstValue};
pub use disasm::{disassemble, Disassembler, Instruction, Operand};
pub use error::Error;
pub use limits::ModuleLimits;
pub use linker::{Instance, LinkAction, LinkHost, LinkState, Linker};
pub use module::{CustomSection, Module};
pub use names::NameSection;
pub use symbol_table::{ExternKind, ImportDesc, Limits};
pub use types::{FuncType, HeapType, ValType};
