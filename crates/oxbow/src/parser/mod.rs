//! WebAssembly binary reader.
//!
//! Wraps the `wasmparser` crate to materialize a [`Module`] with tree-form
//! function bodies. Section payloads populate the module skeleton; code
//! entries are handed to [`body`] which rebuilds structured expressions
//! from the flat operator stream.

use anyhow::{bail, Context, Result};
use wasmparser::{ExternalKind, Parser, Payload, TypeRef, ValType};

use crate::ast::{
    DataSegment, ElementSegment, ExportInfo, ExportKind, FuncImport, FuncSignature, Function,
    GlobalDef, ImportedGlobal, Literal, MemoryInfo, Module, TableInfo, Type,
};

mod body;

use body::{CallTarget, ModuleEnv};

/// Convert a wasmparser value type. Reference and vector types are outside
/// the MVP model this tool works on.
fn value_type(vt: ValType) -> Result<Type> {
    match vt {
        ValType::I32 => Ok(Type::I32),
        ValType::I64 => Ok(Type::I64),
        ValType::F32 => Ok(Type::F32),
        ValType::F64 => Ok(Type::F64),
        other => bail!("unsupported value type: {:?}", other),
    }
}

/// Evaluate a constant initializer expression.
/// MVP globals and segment offsets use a single const instruction.
fn eval_const_expr(const_expr: wasmparser::ConstExpr) -> Result<Literal> {
    let mut reader = const_expr.get_operators_reader();
    let op = reader.read().context("reading const expr operator")?;
    match op {
        wasmparser::Operator::I32Const { value } => Ok(Literal::I32(value)),
        wasmparser::Operator::I64Const { value } => Ok(Literal::I64(value)),
        wasmparser::Operator::F32Const { value } => {
            Ok(Literal::F32(f32::from_bits(value.bits())))
        }
        wasmparser::Operator::F64Const { value } => {
            Ok(Literal::F64(f64::from_bits(value.bits())))
        }
        _ => bail!("unsupported const expression operator: {:?}", op),
    }
}

/// Parse an active element segment, or return None for passive/declared
/// segments, which have no place in the static table model.
fn parse_element_segment(element: wasmparser::Element) -> Result<Option<ElementSegment>> {
    match element.kind {
        wasmparser::ElementKind::Active {
            table_index,
            offset_expr,
        } => {
            let tidx = table_index.unwrap_or(0);
            if tidx != 0 {
                bail!(
                    "multi-table element segments not supported (table_index={})",
                    tidx
                );
            }
            let offset = match eval_const_expr(offset_expr)? {
                Literal::I32(v) => v as u32,
                _ => bail!("element segment offset must be i32"),
            };
            let mut func_indices = Vec::new();
            match element.items {
                wasmparser::ElementItems::Functions(funcs) => {
                    for func_idx in funcs {
                        func_indices.push(func_idx.context("reading element func index")?);
                    }
                }
                wasmparser::ElementItems::Expressions(..) => {
                    bail!("expression-based element segments not supported");
                }
            }
            Ok(Some(ElementSegment {
                offset,
                func_indices,
            }))
        }
        wasmparser::ElementKind::Passive | wasmparser::ElementKind::Declared => Ok(None),
    }
}

/// Parse an active data segment, or return None for passive segments.
fn parse_data_segment(data: wasmparser::Data) -> Result<Option<DataSegment>> {
    match data.kind {
        wasmparser::DataKind::Active {
            memory_index: 0,
            offset_expr,
        } => {
            let offset = match eval_const_expr(offset_expr)? {
                Literal::I32(v) => v as u32,
                _ => bail!("data segment offset must be i32"),
            };
            Ok(Some(DataSegment {
                offset,
                data: data.data.to_vec(),
            }))
        }
        wasmparser::DataKind::Passive => Ok(None),
        wasmparser::DataKind::Active { memory_index, .. } => {
            bail!(
                "multi-memory data segments not supported (memory_index={})",
                memory_index
            );
        }
    }
}

/// Parse a WebAssembly binary into a [`Module`] with tree-form bodies.
pub fn parse_module(wasm_bytes: &[u8]) -> Result<Module> {
    let parser = Parser::new(0);

    let mut module = Module::default();
    let mut function_types: Vec<u32> = Vec::new();
    // Built lazily at the first code entry, once all metadata sections
    // (which precede the code section) are in.
    let mut call_targets: Option<Vec<CallTarget>> = None;
    let mut global_types: Option<Vec<Type>> = None;

    for payload in parser.parse_all(wasm_bytes) {
        let payload = payload.context("parsing wasm payload")?;

        match payload {
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    let rec_group = rec_group.context("reading rec group")?;
                    for sub_type in rec_group.types() {
                        match &sub_type.composite_type.inner {
                            wasmparser::CompositeInnerType::Func(func_ty) => {
                                let params = func_ty
                                    .params()
                                    .iter()
                                    .map(|vt| value_type(*vt))
                                    .collect::<Result<Vec<_>>>()?;
                                let result = match func_ty.results() {
                                    [] => Type::None,
                                    [single] => value_type(*single)?,
                                    more => {
                                        bail!(
                                            "multi-value results not supported ({} results)",
                                            more.len()
                                        )
                                    }
                                };
                                module.types.push(FuncSignature { params, result });
                            }
                            other => bail!("unsupported composite type: {:?}", other),
                        }
                    }
                }
            }

            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.context("reading import")?;
                    match import.ty {
                        TypeRef::Func(type_idx) => {
                            let name = format!("import{}", module.func_imports.len());
                            module.func_imports.push(FuncImport {
                                module_name: import.module.to_string(),
                                field_name: import.name.to_string(),
                                name,
                                type_idx,
                            });
                        }
                        TypeRef::Global(global_ty) => {
                            module.imported_globals.push(ImportedGlobal {
                                module_name: import.module.to_string(),
                                field_name: import.name.to_string(),
                                ty: value_type(global_ty.content_type)?,
                                mutable: global_ty.mutable,
                            });
                        }
                        TypeRef::Memory(_) => {
                            bail!("imported memories not supported ({})", import.name)
                        }
                        TypeRef::Table(_) => {
                            bail!("imported tables not supported ({})", import.name)
                        }
                        other => bail!("unsupported import kind: {:?}", other),
                    }
                }
            }

            Payload::FunctionSection(reader) => {
                for func_type_idx in reader {
                    function_types.push(func_type_idx.context("reading function type index")?);
                }
            }

            Payload::TableSection(reader) => {
                if let Some(tbl) = reader.into_iter().next() {
                    let tbl = tbl.context("reading table type")?;
                    module.table = Some(TableInfo {
                        initial: tbl.ty.initial,
                        maximum: tbl.ty.maximum,
                    });
                }
            }

            Payload::MemorySection(reader) => {
                if let Some(mem) = reader.into_iter().next() {
                    let memory_type = mem.context("reading memory type")?;
                    module.memory = Some(MemoryInfo {
                        initial: memory_type.initial,
                        maximum: memory_type.maximum,
                    });
                }
            }

            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global.context("reading global")?;
                    let init = eval_const_expr(global.init_expr)?;
                    module.globals.push(GlobalDef {
                        mutable: global.ty.mutable,
                        init,
                    });
                }
            }

            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.context("reading export")?;
                    let kind = match export.kind {
                        ExternalKind::Func => ExportKind::Func,
                        ExternalKind::Table => ExportKind::Table,
                        ExternalKind::Memory => ExportKind::Memory,
                        ExternalKind::Global => ExportKind::Global,
                        ExternalKind::Tag => continue,
                    };
                    module.exports.push(ExportInfo {
                        name: export.name.to_string(),
                        kind,
                        index: export.index,
                    });
                }
            }

            Payload::StartSection { func, .. } => {
                module.start = Some(func);
            }

            Payload::ElementSection(reader) => {
                for element in reader {
                    let element = element.context("reading element segment")?;
                    if let Some(segment) = parse_element_segment(element)? {
                        module.element_segments.push(segment);
                    }
                }
            }

            Payload::CodeSectionEntry(code) => {
                let targets: &[CallTarget] = call_targets.get_or_insert_with(|| {
                    module
                        .func_imports
                        .iter()
                        .map(|imp| CallTarget {
                            name: imp.name.clone(),
                            type_idx: imp.type_idx,
                            imported: true,
                        })
                        .chain(function_types.iter().enumerate().map(|(i, type_idx)| {
                            CallTarget {
                                name: format!("func{}", i),
                                type_idx: *type_idx,
                                imported: false,
                            }
                        }))
                        .collect()
                });
                let globals: &[Type] = global_types.get_or_insert_with(|| {
                    module
                        .imported_globals
                        .iter()
                        .map(|g| g.ty)
                        .chain(module.globals.iter().map(|g| g.init.ty()))
                        .collect()
                });

                let local_index = module.functions.len();
                let type_idx = *function_types.get(local_index).with_context(|| {
                    format!("code entry {} has no function section entry", local_index)
                })?;
                let sig = module
                    .types
                    .get(type_idx as usize)
                    .with_context(|| format!("function type index {} out of range", type_idx))?;

                let mut locals = Vec::new();
                let locals_reader = code.get_locals_reader().context("getting locals reader")?;
                for local in locals_reader {
                    let (count, val_type) = local.context("reading local")?;
                    let ty = value_type(val_type)?;
                    for _ in 0..count {
                        locals.push(ty);
                    }
                }

                let operators_reader = code
                    .get_operators_reader()
                    .context("getting operators reader")?;
                let mut operators = Vec::new();
                for op in operators_reader {
                    operators.push(op.context("reading operator")?);
                }

                let env = ModuleEnv {
                    types: &module.types,
                    call_targets: targets,
                    global_types: globals,
                };
                let name = format!("func{}", local_index);
                let function_body =
                    body::build_function_body(&operators, sig, &mut locals, &env)
                        .with_context(|| format!("building body of {}", name))?;

                module.functions.push(Function {
                    name,
                    type_idx,
                    locals,
                    body: function_body,
                });
            }

            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data.context("reading data segment")?;
                    if let Some(segment) = parse_data_segment(data)? {
                        module.data_segments.push(segment);
                    }
                }
            }

            _ => {}
        }
    }

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_wat(wat: &str) -> Module {
        let wasm = wat::parse_str(wat).unwrap();
        parse_module(&wasm).unwrap()
    }

    #[test]
    fn parse_minimal_module() {
        let module = parse_wat("(module)");
        assert_eq!(module.types.len(), 0);
        assert_eq!(module.functions.len(), 0);
        assert!(module.memory.is_none());
    }

    #[test]
    fn parse_add_function() {
        let module = parse_wat(
            r#"
            (module
                (func (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add
                )
            )
        "#,
        );
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.types[0].params, vec![Type::I32, Type::I32]);
        assert_eq!(module.types[0].result, Type::I32);
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].name, "func0");
    }

    #[test]
    fn parse_memory_section() {
        let module = parse_wat("(module (memory 2 10))");
        let memory = module.memory.expect("module should have memory");
        assert_eq!(memory.initial, 2);
        assert_eq!(memory.maximum, Some(10));
    }

    #[test]
    fn parse_globals() {
        let module = parse_wat(
            r#"
            (module
                (global (mut i32) (i32.const 42))
                (global i64 (i64.const 999))
            )
        "#,
        );
        assert_eq!(module.globals.len(), 2);
        assert!(module.globals[0].mutable);
        assert_eq!(module.globals[0].init, Literal::I32(42));
        assert!(!module.globals[1].mutable);
        assert_eq!(module.globals[1].init, Literal::I64(999));
    }

    #[test]
    fn parse_exports_and_imports() {
        let module = parse_wat(
            r#"
            (module
                (import "env" "log" (func (param i32)))
                (import "env" "base" (global i32))
                (func (result i32) i32.const 1)
                (export "one" (func 1))
            )
        "#,
        );
        assert_eq!(module.func_imports.len(), 1);
        assert_eq!(module.func_imports[0].module_name, "env");
        assert_eq!(module.func_imports[0].field_name, "log");
        assert_eq!(module.func_imports[0].name, "import0");
        assert_eq!(module.imported_globals.len(), 1);
        assert_eq!(module.imported_globals[0].ty, Type::I32);
        assert_eq!(module.exports.len(), 1);
        assert_eq!(module.exports[0].name, "one");
        assert_eq!(module.exports[0].kind, ExportKind::Func);
        assert_eq!(module.exports[0].index, 1);
    }

    #[test]
    fn parse_table_and_elements() {
        let module = parse_wat(
            r#"
            (module
                (table 4 4 funcref)
                (func)
                (elem (i32.const 1) 0)
            )
        "#,
        );
        let table = module.table.expect("module should have a table");
        assert_eq!(table.initial, 4);
        assert_eq!(module.element_segments.len(), 1);
        assert_eq!(module.element_segments[0].offset, 1);
        assert_eq!(module.element_segments[0].func_indices, vec![0]);
    }

    #[test]
    fn parse_data_segments() {
        let module = parse_wat(
            r#"
            (module
                (memory 1)
                (data (i32.const 16) "Hello")
            )
        "#,
        );
        assert_eq!(module.data_segments.len(), 1);
        assert_eq!(module.data_segments[0].offset, 16);
        assert_eq!(module.data_segments[0].data, b"Hello");
    }

    #[test]
    fn parse_start_section() {
        let module = parse_wat("(module (func) (start 0))");
        assert_eq!(module.start, Some(0));
    }

    #[test]
    fn imported_memory_is_rejected() {
        let wasm = wat::parse_str(r#"(module (import "env" "mem" (memory 1)))"#).unwrap();
        assert!(parse_module(&wasm).is_err());
    }
}
