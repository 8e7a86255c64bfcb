use serde::Deserialize;

use crate::error::Error;
use crate::limits::ModuleLimits;

/// WebAssembly extensions accepted by the parser and the validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Features {
    pub multi_value: bool,
    /// Bulk memory operations together with reference types.
    pub bulk_memory: bool,
    pub saturating_float_to_int: bool,
    pub sign_extension: bool,
    pub simd: bool,
    pub relaxed_simd: bool,
    pub threads: bool,
    pub exceptions: bool,
    pub legacy_exceptions: bool,
    pub function_references: bool,
    pub gc: bool,
    pub multi_memory: bool,
    pub memory64: bool,
    pub extended_const: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            multi_value: true,
            bulk_memory: true,
            saturating_float_to_int: true,
            sign_extension: true,
            simd: true,
            relaxed_simd: true,
            threads: true,
            exceptions: true,
            legacy_exceptions: true,
            function_references: true,
            gc: true,
            multi_memory: true,
            memory64: true,
            extended_const: true,
        }
    }
}

impl Features {
    /// The 1.0 feature set: every extension off.
    pub fn mvp() -> Self {
        Self {
            multi_value: false,
            bulk_memory: false,
            saturating_float_to_int: false,
            sign_extension: false,
            simd: false,
            relaxed_simd: false,
            threads: false,
            exceptions: false,
            legacy_exceptions: false,
            function_references: false,
            gc: false,
            multi_memory: false,
            memory64: false,
            extended_const: false,
        }
    }

    /// True when typed references (non-nullable types, concrete heap types) may appear.
    #[inline]
    pub fn typed_references(&self) -> bool { self.function_references || self.gc }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub features: Features,
    pub limits: ModuleLimits,
    /// Keep a copy of the input binary on the parsed module.
    pub retain_binary: bool,
    /// Inputs at least this large are parsed on a background thread by `Module::compile_with`.
    pub async_parsing_threshold: usize,
    pub async_stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            features: Features::default(),
            limits: ModuleLimits::default(),
            retain_binary: false,
            async_parsing_threshold: usize::MAX,
            async_stack_size: 16 << 20,
        }
    }
}

impl Config {
    pub fn mvp() -> Self { Self { features: Features::mvp(), ..Self::default() } }

    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> { serde_json::from_str(s) }

    pub(crate) fn require(&self, enabled: bool, name: &'static str) -> Result<(), Error> {
        if enabled { Ok(()) } else { Err(Error::Feature(name)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_overrides_single_feature() {
        let cfg = Config::from_json_str(r#"{ "features": { "simd": false }, "limits": { "function_count": 5 } }"#).unwrap();
        assert!(!cfg.features.simd);
        assert!(cfg.features.gc);
        assert_eq!(cfg.limits.function_count, 5);
        assert!(!cfg.retain_binary);
    }

    #[test]
    fn mvp_gates_everything() {
        let cfg = Config::mvp();
        assert_eq!(cfg.require(cfg.features.simd, "simd"), Err(Error::Feature("simd")));
        assert!(!cfg.features.typed_references());
    }
}
