use serde::Deserialize;

use crate::error::*;
use crate::error_msg::*;

/// Upper bounds applied while parsing. Every bound defaults to unbounded;
/// `ModuleLimits::web()` gives the conventional embedder caps.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModuleLimits {
    pub module_size: usize,
    pub type_count: u32,
    pub function_count: u32,
    pub import_count: u32,
    pub export_count: u32,
    pub table_count: u32,
    pub memory_count: u32,
    pub multi_memory_count: u32,
    pub global_count: u32,
    pub data_segment_count: u32,
    pub element_segment_count: u32,
    pub tag_count: u32,
    pub function_size: u32,
    pub param_count: u32,
    pub result_count: u32,
    pub local_count: u32,
    pub nesting_depth: u32,
    pub table_size: u64,
    pub memory_pages: u64,
}

impl Default for ModuleLimits {
    fn default() -> Self {
        Self {
            module_size: usize::MAX,
            type_count: u32::MAX,
            function_count: u32::MAX,
            import_count: u32::MAX,
            export_count: u32::MAX,
            table_count: u32::MAX,
            memory_count: 1,
            multi_memory_count: u32::MAX,
            global_count: u32::MAX,
            data_segment_count: u32::MAX,
            element_segment_count: u32::MAX,
            tag_count: u32::MAX,
            function_size: u32::MAX,
            param_count: u32::MAX,
            result_count: u32::MAX,
            local_count: u32::MAX,
            nesting_depth: u32::MAX,
            table_size: u64::MAX,
            memory_pages: u64::MAX,
        }
    }
}

impl ModuleLimits {
    pub fn web() -> Self {
        Self {
            module_size: 1 << 30,
            type_count: 1_000_000,
            function_count: 1_000_000,
            import_count: 100_000,
            export_count: 100_000,
            table_count: 100_000,
            memory_count: 1,
            multi_memory_count: 100,
            global_count: 1_000_000,
            data_segment_count: 100_000,
            element_segment_count: 10_000_000,
            tag_count: 1_000_000,
            function_size: 7_654_321,
            param_count: 1_000,
            result_count: 1_000,
            local_count: 50_000,
            nesting_depth: 10_000,
            table_size: 10_000_000,
            memory_pages: 65_536,
        }
    }

    /// Memory count cap, which depends on whether multi-memory is on.
    pub fn memory_count_for(&self, multi_memory: bool) -> u32 {
        if multi_memory { self.multi_memory_count } else { self.memory_count }
    }
}

#[inline]
fn check(value: u64, max: u64, msg: &'static str) -> Result<(), Error> {
    if value > max { return limit(msg); }
    Ok(())
}

pub fn check_module_size(size: usize, max: usize) -> Result<(), Error> { check(size as u64, max as u64, MODULE_SIZE_LIMIT) }
pub fn check_type_count(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, TYPE_COUNT_LIMIT) }
pub fn check_function_count(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, FUNCTION_COUNT_LIMIT) }
pub fn check_import_count(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, IMPORT_COUNT_LIMIT) }
pub fn check_export_count(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, EXPORT_COUNT_LIMIT) }
pub fn check_table_count(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, TABLE_COUNT_LIMIT) }
pub fn check_global_count(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, GLOBAL_COUNT_LIMIT) }
pub fn check_data_segment_count(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, DATA_SEGMENT_COUNT_LIMIT) }
pub fn check_element_segment_count(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, ELEMENT_SEGMENT_COUNT_LIMIT) }
pub fn check_tag_count(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, TAG_COUNT_LIMIT) }
pub fn check_function_size(n: u32, max: u32) -> Result<(), Error> { check(n as u64, max as u64, FUNCTION_SIZE_LIMIT) }
pub fn check_param_count(n: usize, max: u32) -> Result<(), Error> { check(n as u64, max as u64, PARAM_COUNT_LIMIT) }
pub fn check_result_count(n: usize, max: u32) -> Result<(), Error> { check(n as u64, max as u64, RESULT_COUNT_LIMIT) }
pub fn check_local_count(n: u64, max: u32) -> Result<(), Error> { check(n, max as u64, LOCAL_COUNT_LIMIT) }
pub fn check_nesting_depth(depth: usize, max: u32) -> Result<(), Error> { check(depth as u64, max as u64, NESTING_DEPTH_LIMIT) }
pub fn check_table_size(min: u64, max: u64) -> Result<(), Error> { check(min, max, TABLE_SIZE_POLICY_LIMIT) }
pub fn check_memory_pages(min: u64, max: u64) -> Result<(), Error> { check(min, max, MEMORY_PAGES_POLICY_LIMIT) }

pub fn check_memory_count(n: u32, max: u32, multi_memory: bool) -> Result<(), Error> {
    if n > max {
        if !multi_memory { return validation(MULTIPLE_MEMORIES); }
        return limit(MEMORY_COUNT_LIMIT);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_inclusive() {
        assert!(check_function_count(10, 10).is_ok());
        assert_eq!(check_function_count(11, 10), Err(Error::Limit(FUNCTION_COUNT_LIMIT)));
        assert!(check_module_size(usize::MAX, usize::MAX).is_ok());
    }

    #[test]
    fn single_memory_without_multi_memory() {
        let limits = ModuleLimits::default();
        assert!(check_memory_count(1, limits.memory_count_for(false), false).is_ok());
        assert_eq!(check_memory_count(2, limits.memory_count_for(false), false), Err(Error::Validation(MULTIPLE_MEMORIES)));
        assert!(check_memory_count(2, limits.memory_count_for(true), true).is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let limits: ModuleLimits = serde_json::from_str(r#"{ "function_count": 3 }"#).unwrap();
        assert_eq!(limits.function_count, 3);
        assert_eq!(limits.type_count, u32::MAX);
    }
}
