//! Tree-form IR for WebAssembly modules.
//!
//! Function bodies are trees of typed [`Expr`] nodes rather than flat
//! instruction sequences; structured control flow (blocks, loops, ifs,
//! labeled branches) is represented directly, which is what the dead-code
//! elimination pass operates on.
//!
//! - **Per-function IR** ([`Expr`], [`ExprKind`]): typed expression trees
//! - **Module-level IR** ([`Module`] and related types): signatures,
//!   imports, memory/table layout, globals, exports, segments

mod expr;
mod module;
mod ops;
mod types;

pub use expr::{Expr, ExprKind};
pub use module::{
    DataSegment, ElementSegment, ExportInfo, ExportKind, FuncImport, FuncSignature, Function,
    GlobalDef, ImportedGlobal, MemoryInfo, Module, TableInfo,
};
pub use ops::{BinOp, HostOp, UnOp};
pub use types::{Literal, Type};
