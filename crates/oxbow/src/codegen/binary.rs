//! Binary writer: emits a module with `wasm-encoder`.
//!
//! Section layout mirrors the reader. Bodies are emitted by walking the
//! expression tree in evaluation order; label names resolve back to
//! relative depths through a frame stack that tracks every open control
//! construct (an `if` occupies a depth slot even though it carries no
//! label in the IR).
//!
//! The IR's bottom type has no wasm block type. A control construct typed
//! `unreachable` is emitted with an empty block type and followed by one
//! `unreachable` opcode; control never leaves the construct normally, so
//! the extra opcode never executes, but it keeps whatever follows in the
//! enclosing frame stack-polymorphic and therefore valid.

use std::borrow::Cow;

use anyhow::{bail, Context, Result};
use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, ElementSection, Elements, EntityType,
    ExportSection, Function, FunctionSection, GlobalSection, GlobalType, ImportSection,
    Instruction, MemArg, MemorySection, MemoryType, Module as EncodedModule, RefType,
    StartSection, TableSection, TableType, TypeSection, ValType,
};

use crate::ast::{BinOp, Expr, ExprKind, HostOp, Literal, Module, Type, UnOp};

fn val_type(ty: Type) -> Result<ValType> {
    match ty {
        Type::I32 => Ok(ValType::I32),
        Type::I64 => Ok(ValType::I64),
        Type::F32 => Ok(ValType::F32),
        Type::F64 => Ok(ValType::F64),
        Type::None | Type::Unreachable => {
            bail!("IR invariant violated: {} is not a value type", ty)
        }
    }
}

fn block_type(ty: Type) -> BlockType {
    match ty {
        Type::I32 => BlockType::Result(ValType::I32),
        Type::I64 => BlockType::Result(ValType::I64),
        Type::F32 => BlockType::Result(ValType::F32),
        Type::F64 => BlockType::Result(ValType::F64),
        Type::None | Type::Unreachable => BlockType::Empty,
    }
}

fn const_expr(value: &Literal) -> ConstExpr {
    match value {
        Literal::I32(v) => ConstExpr::i32_const(*v),
        Literal::I64(v) => ConstExpr::i64_const(*v),
        Literal::F32(v) => ConstExpr::f32_const((*v).into()),
        Literal::F64(v) => ConstExpr::f64_const((*v).into()),
    }
}

/// Encode the whole module to binary form.
pub fn encode_module(module: &Module) -> Result<Vec<u8>> {
    let mut encoded = EncodedModule::new();

    if !module.types.is_empty() {
        let mut types = TypeSection::new();
        for sig in &module.types {
            let params = sig
                .params
                .iter()
                .map(|p| val_type(*p))
                .collect::<Result<Vec<_>>>()?;
            let results = if sig.result.is_concrete() {
                vec![val_type(sig.result)?]
            } else {
                vec![]
            };
            types.ty().function(params, results);
        }
        encoded.section(&types);
    }

    if !module.func_imports.is_empty() || !module.imported_globals.is_empty() {
        let mut imports = ImportSection::new();
        for imp in &module.func_imports {
            imports.import(
                &imp.module_name,
                &imp.field_name,
                EntityType::Function(imp.type_idx),
            );
        }
        for g in &module.imported_globals {
            imports.import(
                &g.module_name,
                &g.field_name,
                EntityType::Global(GlobalType {
                    val_type: val_type(g.ty)?,
                    mutable: g.mutable,
                    shared: false,
                }),
            );
        }
        encoded.section(&imports);
    }

    if !module.functions.is_empty() {
        let mut functions = FunctionSection::new();
        for func in &module.functions {
            functions.function(func.type_idx);
        }
        encoded.section(&functions);
    }

    if let Some(table) = &module.table {
        let mut tables = TableSection::new();
        tables.table(TableType {
            element_type: RefType::FUNCREF,
            table64: false,
            minimum: table.initial,
            maximum: table.maximum,
            shared: false,
        });
        encoded.section(&tables);
    }

    if let Some(memory) = &module.memory {
        let mut memories = MemorySection::new();
        memories.memory(MemoryType {
            minimum: memory.initial,
            maximum: memory.maximum,
            memory64: false,
            shared: false,
            page_size_log2: None,
        });
        encoded.section(&memories);
    }

    if !module.globals.is_empty() {
        let mut globals = GlobalSection::new();
        for g in &module.globals {
            globals.global(
                GlobalType {
                    val_type: val_type(g.init.ty())?,
                    mutable: g.mutable,
                    shared: false,
                },
                &const_expr(&g.init),
            );
        }
        encoded.section(&globals);
    }

    if !module.exports.is_empty() {
        let mut exports = ExportSection::new();
        for export in &module.exports {
            let kind = match export.kind {
                crate::ast::ExportKind::Func => wasm_encoder::ExportKind::Func,
                crate::ast::ExportKind::Table => wasm_encoder::ExportKind::Table,
                crate::ast::ExportKind::Memory => wasm_encoder::ExportKind::Memory,
                crate::ast::ExportKind::Global => wasm_encoder::ExportKind::Global,
            };
            exports.export(&export.name, kind, export.index);
        }
        encoded.section(&exports);
    }

    if let Some(function_index) = module.start {
        encoded.section(&StartSection { function_index });
    }

    if !module.element_segments.is_empty() {
        let mut elements = ElementSection::new();
        for seg in &module.element_segments {
            elements.active(
                None,
                &ConstExpr::i32_const(seg.offset as i32),
                Elements::Functions(Cow::Borrowed(&seg.func_indices)),
            );
        }
        encoded.section(&elements);
    }

    if !module.functions.is_empty() {
        let mut code = CodeSection::new();
        for func in &module.functions {
            let encoded_func = encode_function(module, func)
                .with_context(|| format!("encoding body of {}", func.name))?;
            code.function(&encoded_func);
        }
        encoded.section(&code);
    }

    if !module.data_segments.is_empty() {
        let mut data = DataSection::new();
        for seg in &module.data_segments {
            data.active(
                0,
                &ConstExpr::i32_const(seg.offset as i32),
                seg.data.iter().copied(),
            );
        }
        encoded.section(&data);
    }

    Ok(encoded.finish())
}

fn encode_function(module: &Module, func: &crate::ast::Function) -> Result<Function> {
    let mut groups: Vec<(u32, ValType)> = Vec::new();
    for ty in &func.locals {
        let vt = val_type(*ty)?;
        match groups.last_mut() {
            Some((count, t)) if *t == vt => *count += 1,
            _ => groups.push((1, vt)),
        }
    }
    let mut out = Function::new(groups);
    let mut encoder = BodyEncoder {
        module,
        labels: Vec::new(),
    };
    encoder.expr(&func.body, &mut out)?;
    out.instruction(&Instruction::End);
    Ok(out)
}

struct BodyEncoder<'a> {
    module: &'a Module,
    /// One entry per open control construct, innermost last.
    labels: Vec<Option<&'a str>>,
}

impl<'a> BodyEncoder<'a> {
    fn depth_of(&self, name: &str) -> Result<u32> {
        self.labels
            .iter()
            .rev()
            .position(|l| *l == Some(name))
            .map(|d| d as u32)
            .with_context(|| {
                format!("IR invariant violated: branch target {:?} not in scope", name)
            })
    }

    fn function_index(&self, name: &str) -> Result<u32> {
        self.module
            .function_index(name)
            .with_context(|| format!("IR invariant violated: unknown call target {:?}", name))
    }

    fn expr(&mut self, e: &'a Expr, out: &mut Function) -> Result<()> {
        match &e.kind {
            ExprKind::Block { name, list } => {
                self.labels.push(name.as_deref());
                out.instruction(&Instruction::Block(block_type(e.ty)));
                for item in list {
                    self.expr(item, out)?;
                }
                out.instruction(&Instruction::End);
                self.labels.pop();
                if e.ty == Type::Unreachable {
                    out.instruction(&Instruction::Unreachable);
                }
            }
            ExprKind::If {
                condition,
                if_true,
                if_false,
            } => {
                self.expr(condition, out)?;
                self.labels.push(None);
                out.instruction(&Instruction::If(block_type(e.ty)));
                self.expr(if_true, out)?;
                if let Some(f) = if_false {
                    out.instruction(&Instruction::Else);
                    self.expr(f, out)?;
                }
                out.instruction(&Instruction::End);
                self.labels.pop();
                if e.ty == Type::Unreachable {
                    out.instruction(&Instruction::Unreachable);
                }
            }
            ExprKind::Loop { name, body } => {
                self.labels.push(name.as_deref());
                out.instruction(&Instruction::Loop(block_type(e.ty)));
                self.expr(body, out)?;
                out.instruction(&Instruction::End);
                self.labels.pop();
                if e.ty == Type::Unreachable {
                    out.instruction(&Instruction::Unreachable);
                }
            }
            ExprKind::Break {
                name,
                value,
                condition,
            } => {
                if let Some(v) = value {
                    self.expr(v, out)?;
                }
                if let Some(c) = condition {
                    self.expr(c, out)?;
                }
                let depth = self.depth_of(name)?;
                if condition.is_some() {
                    out.instruction(&Instruction::BrIf(depth));
                } else {
                    out.instruction(&Instruction::Br(depth));
                }
            }
            ExprKind::Switch {
                targets,
                default,
                value,
                condition,
            } => {
                if let Some(v) = value {
                    self.expr(v, out)?;
                }
                self.expr(condition, out)?;
                let depths = targets
                    .iter()
                    .map(|t| self.depth_of(t))
                    .collect::<Result<Vec<_>>>()?;
                let default_depth = self.depth_of(default)?;
                out.instruction(&Instruction::BrTable(Cow::Owned(depths), default_depth));
            }
            ExprKind::Call { target, operands } | ExprKind::CallImport { target, operands } => {
                for op in operands {
                    self.expr(op, out)?;
                }
                let index = self.function_index(target)?;
                out.instruction(&Instruction::Call(index));
            }
            ExprKind::CallIndirect {
                type_idx,
                operands,
                target,
            } => {
                for op in operands {
                    self.expr(op, out)?;
                }
                self.expr(target, out)?;
                out.instruction(&Instruction::CallIndirect {
                    type_index: *type_idx,
                    table_index: 0,
                });
            }
            ExprKind::GetLocal { index } => {
                out.instruction(&Instruction::LocalGet(*index));
            }
            ExprKind::SetLocal { index, value } => {
                self.expr(value, out)?;
                if e.ty.is_concrete() {
                    out.instruction(&Instruction::LocalTee(*index));
                } else {
                    out.instruction(&Instruction::LocalSet(*index));
                }
            }
            ExprKind::GetGlobal { index } => {
                out.instruction(&Instruction::GlobalGet(*index));
            }
            ExprKind::SetGlobal { index, value } => {
                self.expr(value, out)?;
                out.instruction(&Instruction::GlobalSet(*index));
            }
            ExprKind::Load {
                bytes,
                signed,
                offset,
                align,
                ptr,
            } => {
                self.expr(ptr, out)?;
                if e.ty.is_concrete() {
                    let memarg = MemArg {
                        offset: *offset,
                        align: *align as u32,
                        memory_index: 0,
                    };
                    out.instruction(&load_instruction(e.ty, *bytes, *signed, memarg)?);
                } else {
                    // The loaded type was lost to dead code; the access
                    // never runs, so terminate the region instead.
                    out.instruction(&Instruction::Unreachable);
                }
            }
            ExprKind::Store {
                bytes,
                offset,
                align,
                value_ty,
                ptr,
                value,
            } => {
                self.expr(ptr, out)?;
                self.expr(value, out)?;
                let memarg = MemArg {
                    offset: *offset,
                    align: *align as u32,
                    memory_index: 0,
                };
                out.instruction(&store_instruction(*value_ty, *bytes, memarg)?);
            }
            ExprKind::Const { value } => {
                let instr = match value {
                    Literal::I32(v) => Instruction::I32Const(*v),
                    Literal::I64(v) => Instruction::I64Const(*v),
                    Literal::F32(v) => Instruction::F32Const((*v).into()),
                    Literal::F64(v) => Instruction::F64Const((*v).into()),
                };
                out.instruction(&instr);
            }
            ExprKind::Unary { op, value } => {
                self.expr(value, out)?;
                out.instruction(&unop_instruction(*op));
            }
            ExprKind::Binary { op, left, right } => {
                self.expr(left, out)?;
                self.expr(right, out)?;
                out.instruction(&binop_instruction(*op));
            }
            ExprKind::Select {
                if_true,
                if_false,
                condition,
            } => {
                self.expr(if_true, out)?;
                self.expr(if_false, out)?;
                self.expr(condition, out)?;
                out.instruction(&Instruction::Select);
            }
            ExprKind::Drop { value } => {
                self.expr(value, out)?;
                out.instruction(&Instruction::Drop);
            }
            ExprKind::Return { value } => {
                if let Some(v) = value {
                    self.expr(v, out)?;
                }
                out.instruction(&Instruction::Return);
            }
            ExprKind::Host { op, operands } => {
                for operand in operands {
                    self.expr(operand, out)?;
                }
                match op {
                    HostOp::MemorySize => out.instruction(&Instruction::MemorySize(0)),
                    HostOp::MemoryGrow => out.instruction(&Instruction::MemoryGrow(0)),
                };
            }
            ExprKind::Nop => {
                out.instruction(&Instruction::Nop);
            }
            ExprKind::Unreachable => {
                out.instruction(&Instruction::Unreachable);
            }
        }
        Ok(())
    }
}

fn load_instruction(ty: Type, bytes: u8, signed: bool, memarg: MemArg) -> Result<Instruction<'static>> {
    let instr = match (ty, bytes, signed) {
        (Type::I32, 4, _) => Instruction::I32Load(memarg),
        (Type::I32, 1, true) => Instruction::I32Load8S(memarg),
        (Type::I32, 1, false) => Instruction::I32Load8U(memarg),
        (Type::I32, 2, true) => Instruction::I32Load16S(memarg),
        (Type::I32, 2, false) => Instruction::I32Load16U(memarg),
        (Type::I64, 8, _) => Instruction::I64Load(memarg),
        (Type::I64, 1, true) => Instruction::I64Load8S(memarg),
        (Type::I64, 1, false) => Instruction::I64Load8U(memarg),
        (Type::I64, 2, true) => Instruction::I64Load16S(memarg),
        (Type::I64, 2, false) => Instruction::I64Load16U(memarg),
        (Type::I64, 4, true) => Instruction::I64Load32S(memarg),
        (Type::I64, 4, false) => Instruction::I64Load32U(memarg),
        (Type::F32, 4, _) => Instruction::F32Load(memarg),
        (Type::F64, 8, _) => Instruction::F64Load(memarg),
        _ => bail!("invalid load: {} with width {}", ty, bytes),
    };
    Ok(instr)
}

fn store_instruction(ty: Type, bytes: u8, memarg: MemArg) -> Result<Instruction<'static>> {
    let instr = match (ty, bytes) {
        (Type::I32, 4) => Instruction::I32Store(memarg),
        (Type::I32, 1) => Instruction::I32Store8(memarg),
        (Type::I32, 2) => Instruction::I32Store16(memarg),
        (Type::I64, 8) => Instruction::I64Store(memarg),
        (Type::I64, 1) => Instruction::I64Store8(memarg),
        (Type::I64, 2) => Instruction::I64Store16(memarg),
        (Type::I64, 4) => Instruction::I64Store32(memarg),
        (Type::F32, 4) => Instruction::F32Store(memarg),
        (Type::F64, 8) => Instruction::F64Store(memarg),
        _ => bail!("invalid store: {} with width {}", ty, bytes),
    };
    Ok(instr)
}

fn unop_instruction(op: UnOp) -> Instruction<'static> {
    use UnOp::*;
    match op {
        I32Clz => Instruction::I32Clz,
        I32Ctz => Instruction::I32Ctz,
        I32Popcnt => Instruction::I32Popcnt,
        I32Eqz => Instruction::I32Eqz,
        I64Clz => Instruction::I64Clz,
        I64Ctz => Instruction::I64Ctz,
        I64Popcnt => Instruction::I64Popcnt,
        I64Eqz => Instruction::I64Eqz,
        F32Abs => Instruction::F32Abs,
        F32Neg => Instruction::F32Neg,
        F32Ceil => Instruction::F32Ceil,
        F32Floor => Instruction::F32Floor,
        F32Trunc => Instruction::F32Trunc,
        F32Nearest => Instruction::F32Nearest,
        F32Sqrt => Instruction::F32Sqrt,
        F64Abs => Instruction::F64Abs,
        F64Neg => Instruction::F64Neg,
        F64Ceil => Instruction::F64Ceil,
        F64Floor => Instruction::F64Floor,
        F64Trunc => Instruction::F64Trunc,
        F64Nearest => Instruction::F64Nearest,
        F64Sqrt => Instruction::F64Sqrt,
        I32WrapI64 => Instruction::I32WrapI64,
        I64ExtendI32S => Instruction::I64ExtendI32S,
        I64ExtendI32U => Instruction::I64ExtendI32U,
        I32TruncF32S => Instruction::I32TruncF32S,
        I32TruncF32U => Instruction::I32TruncF32U,
        I32TruncF64S => Instruction::I32TruncF64S,
        I32TruncF64U => Instruction::I32TruncF64U,
        I64TruncF32S => Instruction::I64TruncF32S,
        I64TruncF32U => Instruction::I64TruncF32U,
        I64TruncF64S => Instruction::I64TruncF64S,
        I64TruncF64U => Instruction::I64TruncF64U,
        F32ConvertI32S => Instruction::F32ConvertI32S,
        F32ConvertI32U => Instruction::F32ConvertI32U,
        F32ConvertI64S => Instruction::F32ConvertI64S,
        F32ConvertI64U => Instruction::F32ConvertI64U,
        F64ConvertI32S => Instruction::F64ConvertI32S,
        F64ConvertI32U => Instruction::F64ConvertI32U,
        F64ConvertI64S => Instruction::F64ConvertI64S,
        F64ConvertI64U => Instruction::F64ConvertI64U,
        F32DemoteF64 => Instruction::F32DemoteF64,
        F64PromoteF32 => Instruction::F64PromoteF32,
        I32ReinterpretF32 => Instruction::I32ReinterpretF32,
        I64ReinterpretF64 => Instruction::I64ReinterpretF64,
        F32ReinterpretI32 => Instruction::F32ReinterpretI32,
        F64ReinterpretI64 => Instruction::F64ReinterpretI64,
    }
}

fn binop_instruction(op: BinOp) -> Instruction<'static> {
    use BinOp::*;
    match op {
        I32Add => Instruction::I32Add,
        I32Sub => Instruction::I32Sub,
        I32Mul => Instruction::I32Mul,
        I32DivS => Instruction::I32DivS,
        I32DivU => Instruction::I32DivU,
        I32RemS => Instruction::I32RemS,
        I32RemU => Instruction::I32RemU,
        I32And => Instruction::I32And,
        I32Or => Instruction::I32Or,
        I32Xor => Instruction::I32Xor,
        I32Shl => Instruction::I32Shl,
        I32ShrS => Instruction::I32ShrS,
        I32ShrU => Instruction::I32ShrU,
        I32Rotl => Instruction::I32Rotl,
        I32Rotr => Instruction::I32Rotr,
        I32Eq => Instruction::I32Eq,
        I32Ne => Instruction::I32Ne,
        I32LtS => Instruction::I32LtS,
        I32LtU => Instruction::I32LtU,
        I32GtS => Instruction::I32GtS,
        I32GtU => Instruction::I32GtU,
        I32LeS => Instruction::I32LeS,
        I32LeU => Instruction::I32LeU,
        I32GeS => Instruction::I32GeS,
        I32GeU => Instruction::I32GeU,
        I64Add => Instruction::I64Add,
        I64Sub => Instruction::I64Sub,
        I64Mul => Instruction::I64Mul,
        I64DivS => Instruction::I64DivS,
        I64DivU => Instruction::I64DivU,
        I64RemS => Instruction::I64RemS,
        I64RemU => Instruction::I64RemU,
        I64And => Instruction::I64And,
        I64Or => Instruction::I64Or,
        I64Xor => Instruction::I64Xor,
        I64Shl => Instruction::I64Shl,
        I64ShrS => Instruction::I64ShrS,
        I64ShrU => Instruction::I64ShrU,
        I64Rotl => Instruction::I64Rotl,
        I64Rotr => Instruction::I64Rotr,
        I64Eq => Instruction::I64Eq,
        I64Ne => Instruction::I64Ne,
        I64LtS => Instruction::I64LtS,
        I64LtU => Instruction::I64LtU,
        I64GtS => Instruction::I64GtS,
        I64GtU => Instruction::I64GtU,
        I64LeS => Instruction::I64LeS,
        I64LeU => Instruction::I64LeU,
        I64GeS => Instruction::I64GeS,
        I64GeU => Instruction::I64GeU,
        F32Add => Instruction::F32Add,
        F32Sub => Instruction::F32Sub,
        F32Mul => Instruction::F32Mul,
        F32Div => Instruction::F32Div,
        F32Min => Instruction::F32Min,
        F32Max => Instruction::F32Max,
        F32Copysign => Instruction::F32Copysign,
        F32Eq => Instruction::F32Eq,
        F32Ne => Instruction::F32Ne,
        F32Lt => Instruction::F32Lt,
        F32Gt => Instruction::F32Gt,
        F32Le => Instruction::F32Le,
        F32Ge => Instruction::F32Ge,
        F64Add => Instruction::F64Add,
        F64Sub => Instruction::F64Sub,
        F64Mul => Instruction::F64Mul,
        F64Div => Instruction::F64Div,
        F64Min => Instruction::F64Min,
        F64Max => Instruction::F64Max,
        F64Copysign => Instruction::F64Copysign,
        F64Eq => Instruction::F64Eq,
        F64Ne => Instruction::F64Ne,
        F64Lt => Instruction::F64Lt,
        F64Gt => Instruction::F64Gt,
        F64Le => Instruction::F64Le,
        F64Ge => Instruction::F64Ge,
    }
}
