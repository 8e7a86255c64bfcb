mod utils;

use clap::Parser;
use std::path::PathBuf;
use wabc::{Config, Module};

#[derive(Parser, Debug)]
#[command(name = "wabc-validate")]
#[command(about = "Validate WebAssembly modules for correctness")]
#[command(long_about = "
wabc-validate - WebAssembly Module Validator

Decodes and type-checks WebAssembly modules, including the enabled extensions,
without executing them. Text modules (.wat) are assembled first.

Examples:
  # Validate a single module
  wabc-validate module.wasm

  # Validate several modules against the 1.0 feature set
  wabc-validate a.wasm b.wasm --mvp

  # Use custom features and limits
  wabc-validate module.wasm --config limits.json
")]
struct Args {
    /// Path(s) to WebAssembly module file(s)
    wasm_files: Vec<PathBuf>,

    /// Show verbose validation details
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode - only show errors
    #[arg(short, long)]
    quiet: bool,

    /// Disable every extension
    #[arg(long)]
    mvp: bool,

    /// JSON file with features and limits
    #[arg(long)]
    config: Option<PathBuf>,
}

fn validate_file(path: &PathBuf, config: &Config, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = utils::read_module(path)?;
    if verbose {
        println!("Validating: {}", path.display());
        println!("  Size: {} bytes", bytes.len());
    }
    let module = Module::compile_with(&bytes, config).map_err(|e| format!("INVALID: {} - {}", path.display(), e))?;
    if verbose {
        println!("  Functions: {} ({} imported)", module.num_functions(), module.num_imported_functions());
        println!("  Exports: {}", module.exports().len());
        println!("  Bytecode: {} bytes", module.bytecode().len());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    utils::init_logging(args.verbose);

    if args.wasm_files.is_empty() {
        eprintln!("Error: No WebAssembly files specified");
        eprintln!("Usage: wabc-validate <WASM_FILES>...");
        std::process::exit(1);
    }
    let config = utils::load_config(args.config.as_deref(), args.mvp)?;

    let mut failures = 0usize;
    for path in &args.wasm_files {
        match validate_file(path, &config, args.verbose) {
            Ok(()) if !args.quiet => println!("VALID: {}", path.display()),
            Ok(()) => {}
            Err(e) => {
                eprintln!("{e}");
                failures += 1;
            }
        }
    }

    let total = args.wasm_files.len();
    if total > 1 && !args.quiet {
        println!("\n{} of {} modules valid", total - failures, total);
    }
    if failures > 0 { std::process::exit(1); }
    Ok(())
}
