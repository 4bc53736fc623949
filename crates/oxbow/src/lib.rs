//! oxbow — dead code elimination for WebAssembly modules.
//!
//! This crate reads a module (text or binary), rewrites every function
//! body so no unreachable code survives, and writes the result back out.

pub mod ast;
pub mod codegen;
pub mod io;
pub mod optimizer;
pub mod parser;

// Re-export key types for convenience
pub use anyhow::{Context, Result};

use ast::Module;

/// Parse a binary module and run dead code elimination over it.
///
/// This is the main entry point for in-memory use; the CLI goes through
/// [`io`] for filename dispatch and output instead.
///
/// # Example
/// ```no_run
/// let wasm_bytes = std::fs::read("input.wasm").unwrap();
/// let module = oxbow::optimize(&wasm_bytes).unwrap();
/// let output = oxbow::codegen::encode_module(&module).unwrap();
/// std::fs::write("output.wasm", output).unwrap();
/// ```
pub fn optimize(wasm_bytes: &[u8]) -> Result<Module> {
    let mut module =
        parser::parse_module(wasm_bytes).context("failed to parse WebAssembly module")?;
    optimizer::optimize_module(&mut module).context("failed to eliminate dead code")?;
    Ok(module)
}
