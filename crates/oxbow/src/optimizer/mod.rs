//! Optimization passes over the tree IR.
//!
//! There is one pass: dead code elimination. Each function is optimized
//! independently (the pass owns no state that crosses function
//! boundaries), so the driver is a plain loop over the module's functions.

use anyhow::{Context, Result};

use crate::ast::Module;

pub(crate) mod utils;

mod dce;
mod type_updater;

pub use dce::eliminate;

/// Run dead code elimination over every function in the module.
pub fn optimize_module(module: &mut Module) -> Result<()> {
    for func in &mut module.functions {
        dce::eliminate(func)
            .with_context(|| format!("eliminating dead code in function {}", func.name))?;
    }
    Ok(())
}
