//! Module-level model.
//!
//! [`Module`] holds everything needed to round-trip a WebAssembly MVP
//! module: type signatures, imports, function bodies in tree form, memory
//! and table declarations with their initializer segments, globals,
//! exports, and the optional start function.
//!
//! Index spaces follow the binary format: imported functions precede local
//! functions in the unified function index space, and imported globals
//! precede local globals in the unified global index space.

use super::expr::Expr;
use super::types::{Literal, Type};

/// Signature of a function type. `result` is `Type::None` for void.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncSignature {
    pub params: Vec<Type>,
    pub result: Type,
}

/// An imported function. `name` is the generated internal name that
/// `CallImport` expressions target.
#[derive(Debug, Clone)]
pub struct FuncImport {
    pub module_name: String,
    pub field_name: String,
    pub name: String,
    pub type_idx: u32,
}

/// An imported global variable.
#[derive(Debug, Clone)]
pub struct ImportedGlobal {
    pub module_name: String,
    pub field_name: String,
    pub ty: Type,
    pub mutable: bool,
}

/// A locally defined global variable.
#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub mutable: bool,
    pub init: Literal,
}

/// Linear memory declaration, in 64 KiB pages.
#[derive(Debug, Clone, Copy)]
pub struct MemoryInfo {
    pub initial: u64,
    pub maximum: Option<u64>,
}

/// Function table declaration.
#[derive(Debug, Clone, Copy)]
pub struct TableInfo {
    pub initial: u64,
    pub maximum: Option<u64>,
}

/// An active data segment for memory 0.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub offset: u32,
    pub data: Vec<u8>,
}

/// An active element segment for table 0. Function indices are in the
/// unified index space (imports first).
#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub offset: u32,
    pub func_indices: Vec<u32>,
}

/// Kind of export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

/// An export entry. `index` is into the unified index space of its kind.
#[derive(Debug, Clone)]
pub struct ExportInfo {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// A locally defined function. Parameters live in the signature; `locals`
/// are the declared (and any builder-appended) locals beyond them.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub type_idx: u32,
    pub locals: Vec<Type>,
    pub body: Expr,
}

/// A parsed WebAssembly module with tree-form function bodies.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: Vec<FuncSignature>,
    pub func_imports: Vec<FuncImport>,
    pub imported_globals: Vec<ImportedGlobal>,
    pub functions: Vec<Function>,
    pub memory: Option<MemoryInfo>,
    pub table: Option<TableInfo>,
    pub globals: Vec<GlobalDef>,
    pub exports: Vec<ExportInfo>,
    pub data_segments: Vec<DataSegment>,
    pub element_segments: Vec<ElementSegment>,
    pub start: Option<u32>,
}

impl Module {
    /// Number of imported functions (indices `0..n` of the unified space).
    pub fn num_imported_functions(&self) -> usize {
        self.func_imports.len()
    }

    /// Signature of a local function.
    pub fn signature_of(&self, func: &Function) -> &FuncSignature {
        &self.types[func.type_idx as usize]
    }

    /// Internal name of a function in the unified index space.
    pub fn function_name(&self, unified_index: u32) -> Option<&str> {
        let i = unified_index as usize;
        if i < self.func_imports.len() {
            Some(&self.func_imports[i].name)
        } else {
            self.functions
                .get(i - self.func_imports.len())
                .map(|f| f.name.as_str())
        }
    }

    /// Unified index of a function by internal name.
    pub fn function_index(&self, name: &str) -> Option<u32> {
        if let Some(i) = self.func_imports.iter().position(|f| f.name == name) {
            return Some(i as u32);
        }
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| (i + self.func_imports.len()) as u32)
    }

    /// Value type of a global in the unified index space.
    pub fn global_type(&self, index: u32) -> Option<Type> {
        let i = index as usize;
        if i < self.imported_globals.len() {
            Some(self.imported_globals[i].ty)
        } else {
            self.globals
                .get(i - self.imported_globals.len())
                .map(|g| g.init.ty())
        }
    }

    /// Whether a global in the unified index space is mutable.
    pub fn global_mutable(&self, index: u32) -> Option<bool> {
        let i = index as usize;
        if i < self.imported_globals.len() {
            Some(self.imported_globals[i].mutable)
        } else {
            self.globals
                .get(i - self.imported_globals.len())
                .map(|g| g.mutable)
        }
    }
}
