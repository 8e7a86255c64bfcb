#![allow(dead_code)]

use std::fs;
use std::path::Path;

use tracing_subscriber::EnvFilter;
use wabc::{Config, Features};

/// Reads a module from disk. Files ending in `.wat` are assembled first.
pub fn read_module(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    if path.extension().is_some_and(|e| e == "wat") {
        return Ok(wat::parse_file(path)?);
    }
    fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e).into())
}

/// Config from `--config <file.json>` if given, otherwise the defaults.
pub fn load_config(path: Option<&Path>, mvp: bool) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(p) => Config::from_json_str(&fs::read_to_string(p)?)?,
        None => Config::default(),
    };
    if mvp { config.features = Features::mvp(); }
    Ok(config)
}

/// Logs to stderr. `RUST_LOG` wins over `--verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "wabc=debug" } else { "wabc=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
