#![allow(dead_code)]

use wabc::{Config, Error, Module};

pub fn wasm(text: &str) -> Vec<u8> { wat::parse_str(text).unwrap() }

pub fn compile(text: &str) -> Module { Module::compile(&wasm(text)).unwrap() }

pub fn try_compile(text: &str) -> Result<Module, Error> { Module::compile(&wasm(text)) }

pub fn try_compile_with(text: &str, config: &Config) -> Result<Module, Error> { Module::compile_with(&wasm(text), config) }

#[track_caller]
pub fn assert_invalid(text: &str, msg: &str) {
    match try_compile(text) {
        Ok(_) => panic!("expected `{msg}`, module compiled"),
        Err(e) => assert_eq!(e.message(), msg, "unexpected error {e:?}"),
    }
}

#[track_caller]
pub fn assert_invalid_with(text: &str, config: &Config, msg: &str) {
    match try_compile_with(text, config) {
        Ok(_) => panic!("expected `{msg}`, module compiled"),
        Err(e) => assert_eq!(e.message(), msg, "unexpected error {e:?}"),
    }
}

/// Appends a custom section to a binary module.
pub fn with_custom_section(mut bytes: Vec<u8>, name: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    leb(&mut body, name.len() as u32);
    body.extend_from_slice(name.as_bytes());
    body.extend_from_slice(payload);
    bytes.push(0);
    leb(&mut bytes, body.len() as u32);
    bytes.extend_from_slice(&body);
    bytes
}

pub fn leb(out: &mut Vec<u8>, mut v: u32) {
    loop {
        let b = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(b);
            return;
        }
        out.push(b | 0x80);
    }
}
