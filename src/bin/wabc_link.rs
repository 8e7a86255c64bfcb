mod utils;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use wabc::{Instance, LinkAction, Linker, Module};

#[derive(Parser, Debug)]
#[command(name = "wabc-link")]
#[command(about = "Resolve imports between WebAssembly modules")]
#[command(long_about = "
wabc-link - WebAssembly Link Planner

Registers each module under a name, resolves imports against the exports of
the other modules and prints the link actions in the order a runtime would
perform them. Nothing is executed.

Examples:
  # env.wasm provides the imports of main.wasm
  wabc-link env=env.wasm main=main.wasm

  # Emit the actions as JSON lines
  wabc-link env=env.wat main=main.wat --json
")]
struct Args {
    /// Instances as name=path
    #[arg(required = true, value_parser = parse_instance)]
    instances: Vec<(String, PathBuf)>,

    /// Print one JSON object per action
    #[arg(long)]
    json: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON file with features and limits
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_instance(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s.split_once('=').ok_or_else(|| format!("expected name=path, got `{}`", s))?;
    if name.is_empty() {
        return Err(format!("missing instance name in `{}`", s));
    }
    Ok((name.to_owned(), PathBuf::from(path)))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    utils::init_logging(args.verbose);
    let config = utils::load_config(args.config.as_deref(), false)?;

    let linker = Linker::new();
    for (name, path) in &args.instances {
        let bytes = utils::read_module(path)?;
        let module = Module::compile_with(&bytes, &config).map_err(|e| format!("{}: {}", path.display(), e))?;
        linker.register(name, Arc::new(module))?;
    }

    let json = args.json;
    let mut step = 0usize;
    let mut host = |instance: &Instance, action: &LinkAction| -> Result<(), wabc::Error> {
        step += 1;
        if json {
            let line = serde_json::json!({ "step": step, "instance": instance.name(), "action": action });
            println!("{}", line);
        } else {
            println!("{:>4}  {:<12} {:?}", step, instance.name(), action);
        }
        Ok(())
    };
    let result = linker.link(&mut host);

    if args.verbose || result.is_err() {
        for instance in linker.instances() {
            eprintln!("{}: {:?}", instance.name(), instance.state());
        }
    }
    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("Link failed: {}", e);
            std::process::exit(1);
        }
    }
}
