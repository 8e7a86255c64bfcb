//! Decoder for the `name` custom section. The module, function, local and tag
//! subsections are kept; other subsections are skipped.

use nohash_hasher::IntMap;
use serde::Serialize;

use crate::byte_iter::ByteIter;
use crate::error::*;
use crate::error_msg::*;

const MODULE: u8 = 0;
const FUNCTIONS: u8 = 1;
const LOCALS: u8 = 2;
const TAGS: u8 = 11;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NameSection {
    pub module: Option<String>,
    pub functions: IntMap<u32, String>,
    pub locals: IntMap<u32, IntMap<u32, String>>,
    pub tags: IntMap<u32, String>,
}

fn read_name_map(it: &mut ByteIter) -> Result<IntMap<u32, String>, Error> {
    let n = it.read_vec_len(2)?;
    let mut map = IntMap::default();
    let mut last = None;
    for _ in 0..n {
        let idx = it.read_u32()?;
        if last.is_some_and(|l| idx <= l) { return malformed(SECTION_SIZE_MISMATCH); }
        last = Some(idx);
        map.insert(idx, it.read_name()?.to_owned());
    }
    Ok(map)
}

impl NameSection {
    /// Decodes the payload of a `name` section (the bytes after the section name).
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        let mut it = ByteIter::new(payload, 0);
        let mut names = NameSection::default();
        let mut last_id = None;
        while !it.empty() {
            let id = it.read_u8()?;
            if last_id.is_some_and(|l| id <= l) { return malformed(JUNK_AFTER_LAST); }
            last_id = Some(id);
            let len = it.read_u32()? as usize;
            let mut sub = it.split(len)?;
            match id {
                MODULE => names.module = Some(sub.read_name()?.to_owned()),
                FUNCTIONS => names.functions = read_name_map(&mut sub)?,
                LOCALS => {
                    let n = sub.read_vec_len(2)?;
                    for _ in 0..n {
                        let func = sub.read_u32()?;
                        names.locals.insert(func, read_name_map(&mut sub)?);
                    }
                }
                TAGS => names.tags = read_name_map(&mut sub)?,
                _ => sub.idx = sub.bytes.len(),
            }
            if !sub.empty() { return malformed(SECTION_SIZE_MISMATCH); }
        }
        Ok(names)
    }

    pub fn function(&self, idx: u32) -> Option<&str> { self.functions.get(&idx).map(String::as_str) }

    pub fn local(&self, func: u32, idx: u32) -> Option<&str> {
        self.locals.get(&func)?.get(&idx).map(String::as_str)
    }

    pub fn tag(&self, idx: u32) -> Option<&str> { self.tags.get(&idx).map(String::as_str) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_and_function_names() {
        let payload = [
            0, 4, 3, b'm', b'o', b'd',
            1, 8, 2, 0, 1, b'a', 3, 2, b'b', b'c',
            2, 6, 1, 3, 1, 0, 1, b'x',
            7, 3, 1, 0, 0,
            11, 5, 1, 2, 2, b'e', b'x',
        ];
        let names = NameSection::parse(&payload).unwrap();
        assert_eq!(names.module.as_deref(), Some("mod"));
        assert_eq!(names.function(0), Some("a"));
        assert_eq!(names.function(3), Some("bc"));
        assert_eq!(names.local(3, 0), Some("x"));
        assert_eq!(names.local(0, 0), None);
        assert_eq!(names.tag(2), Some("ex"));
        assert_eq!(names.tag(0), None);
    }

    #[test]
    fn out_of_order_subsections_fail() {
        let payload = [1, 1, 0, 0, 1, 0];
        assert!(NameSection::parse(&payload).is_err());
    }
}
