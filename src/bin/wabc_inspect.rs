mod utils;

use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use wabc::{disassemble, ExternKind, Instruction, Module};

#[derive(Parser, Debug)]
#[command(name = "wabc-inspect")]
#[command(about = "Inspect WebAssembly modules to understand their structure")]
#[command(long_about = "
wabc-inspect - WebAssembly Module Inspector

This tool parses a WebAssembly module and displays its imports, exports,
functions, memories, tables, globals and custom sections. With --bytecode it
also lists the internal bytecode of every defined function.

Examples:
  # Basic inspection
  wabc-inspect module.wasm

  # Show only exports
  wabc-inspect module.wasm --exports-only

  # Dump everything as JSON
  wabc-inspect module.wasm --bytecode --json
")]
struct Args {
    /// Path to the WebAssembly module file
    wasm_file: PathBuf,

    /// Show only exports
    #[arg(long)]
    exports_only: bool,

    /// Show only imports
    #[arg(long)]
    imports_only: bool,

    /// List the bytecode of each defined function
    #[arg(long)]
    bytecode: bool,

    /// Print a JSON document instead of text
    #[arg(long)]
    json: bool,

    /// Show verbose output with internal details
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with features and limits
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Serialize)]
struct ImportInfo {
    module: String,
    name: String,
    kind: ExternKind,
    index: u32,
}

#[derive(Serialize)]
struct ExportInfo {
    name: String,
    kind: ExternKind,
    index: u32,
}

#[derive(Serialize)]
struct FunctionInfo {
    index: u32,
    name: Option<String>,
    signature: String,
    imported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_stack_size: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bytecode: Vec<Instruction>,
}

#[derive(Serialize)]
struct Summary {
    size: usize,
    imports: Vec<ImportInfo>,
    exports: Vec<ExportInfo>,
    functions: Vec<FunctionInfo>,
    memories: usize,
    tables: usize,
    globals: usize,
    start: Option<u32>,
    custom_sections: Vec<String>,
}

fn summarize(module: &Module, size: usize, with_bytecode: bool) -> Result<Summary, wabc::Error> {
    let imports = module
        .imports()
        .map(|(kind, index, desc)| ImportInfo { module: desc.module.clone(), name: desc.name.clone(), kind, index })
        .collect();
    let exports = module.exports().iter().map(|e| ExportInfo { name: e.name.clone(), kind: e.kind, index: e.index }).collect();
    let mut functions = Vec::new();
    for index in 0..module.num_functions() {
        let imported = index < module.num_imported_functions();
        let (max_stack_size, bytecode) = if imported {
            (None, Vec::new())
        } else {
            let header = module.code_entry_header(index)?;
            let code = if with_bytecode { disassemble(module, index)? } else { Vec::new() };
            (Some(header.max_stack_size), code)
        };
        functions.push(FunctionInfo {
            index,
            name: module.names().and_then(|n| n.function(index)).map(str::to_owned),
            signature: module.function_type(index)?.to_string(),
            imported,
            max_stack_size,
            bytecode,
        });
    }
    Ok(Summary {
        size,
        imports,
        exports,
        functions,
        memories: module.memories().len(),
        tables: module.tables().len(),
        globals: module.globals().len(),
        start: module.start(),
        custom_sections: module.custom_sections().iter().map(|s| s.name.clone()).collect(),
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    utils::init_logging(args.verbose);

    let bytes = utils::read_module(&args.wasm_file)?;
    let config = utils::load_config(args.config.as_deref(), false)?;
    let module = Module::compile_with(&bytes, &config).map_err(|e| format!("Failed to compile module: {}", e))?;
    let summary = summarize(&module, bytes.len(), args.bytecode)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Module: {}", args.wasm_file.display());
    println!("Size: {} bytes", summary.size);
    println!();

    if !args.exports_only {
        if summary.imports.is_empty() {
            println!("Imports: none");
        } else {
            println!("Imports:");
            for i in &summary.imports {
                println!("  {}.{} ({} {})", i.module, i.name, i.kind.name(), i.index);
            }
        }
        println!();
    }
    if args.imports_only {
        return Ok(());
    }

    if summary.exports.is_empty() {
        println!("Exports: none");
    } else {
        println!("Exports:");
        for e in &summary.exports {
            println!("  {} ({} {})", e.name, e.kind.name(), e.index);
        }
    }
    println!();
    if args.exports_only {
        return Ok(());
    }

    println!("Functions:");
    for f in &summary.functions {
        let name = f.name.as_deref().map(|n| format!(" ${}", n)).unwrap_or_default();
        let origin = if f.imported { " (imported)" } else { "" };
        println!("  [{}]{} {}{}", f.index, name, f.signature, origin);
        if args.verbose {
            if let Some(max) = f.max_stack_size {
                println!("      max stack: {}", max);
            }
        }
        for instr in &f.bytecode {
            println!("    {}", instr);
        }
    }
    println!();
    println!("Memories: {}", summary.memories);
    println!("Tables: {}", summary.tables);
    println!("Globals: {}", summary.globals);
    if let Some(start) = summary.start {
        println!("Start function: {}", start);
    }
    if !summary.custom_sections.is_empty() {
        println!("Custom sections: {}", summary.custom_sections.join(", "));
    }
    if args.verbose {
        println!();
        println!("Bytecode: {} bytes, {} call sites", module.bytecode().len(), module.call_sites().len());
    }
    Ok(())
}
