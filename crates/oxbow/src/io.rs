//! Reading and writing modules by filename.
//!
//! Dispatch is by suffix, with a magic-number sniff for anything
//! unrecognized: `.wast` reads as text and `.wasm` as binary; any other
//! file is binary iff it starts with the `\0asm` marker, text otherwise.
//! Writing mirrors this, with text as the default for every suffix but
//! `.wasm`. Text input goes through the `wat` crate into binary form and
//! then through the binary reader.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::ast::Module;
use crate::codegen;
use crate::parser;

/// The binary format's magic marker: `\0asm`.
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];

fn suffix(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}

fn read_text(path: &Path) -> Result<Module> {
    let wasm = wat::parse_file(path)
        .with_context(|| format!("failed to parse text module {}", path.display()))?;
    parser::parse_module(&wasm)
}

fn read_binary(path: &Path) -> Result<Module> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    parser::parse_module(&bytes)
}

/// Read a module from a file, choosing the reader by suffix or content.
pub fn read_module(path: &Path) -> Result<Module> {
    match suffix(path) {
        Some("wast") => read_text(path),
        Some("wasm") => read_binary(path),
        _ => {
            let bytes =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            if bytes.len() >= 4 && bytes[0..4] == WASM_MAGIC {
                parser::parse_module(&bytes)
            } else {
                let text = std::str::from_utf8(&bytes)
                    .with_context(|| format!("{} is neither binary nor text", path.display()))?;
                let wasm = wat::parse_str(text)
                    .with_context(|| format!("failed to parse text module {}", path.display()))?;
                parser::parse_module(&wasm)
            }
        }
    }
}

/// Write a module to a file: binary for `.wasm`, text for anything else.
pub fn write_module(module: &Module, path: &Path) -> Result<()> {
    let output = match suffix(path) {
        Some("wasm") => codegen::encode_module(module)?,
        _ => codegen::print_module(module).into_bytes(),
    };
    fs::write(path, output).with_context(|| format!("failed to write {}", path.display()))
}
