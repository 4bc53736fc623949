//! Text writer: renders a module as folded s-expressions.
//!
//! The output is standard `.wat` syntax. One wrinkle comes from the IR's
//! bottom type: wasm has no block type for `unreachable`, so a control
//! construct typed that way is printed with no result annotation and an
//! extra `(unreachable)` right after it. Folded expressions are pure
//! linearization sugar, so the sibling is legal in any position; control
//! cannot leave the construct normally, so it never runs and only keeps
//! whatever follows stack-polymorphic for the validator.

use std::fmt::Write;

use crate::ast::{Expr, ExprKind, Literal, Module, Type};

/// Render the whole module as text.
pub fn print_module(module: &Module) -> String {
    let mut p = Printer {
        module,
        out: String::new(),
        indent: 1,
    };
    p.out.push_str("(module\n");
    p.header();
    for func in &module.functions {
        p.function(func);
    }
    p.out.push_str(")\n");
    p.out
}

struct Printer<'a> {
    module: &'a Module,
    out: String,
    indent: usize,
}

impl<'a> Printer<'a> {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn func_ref(&self, index: u32) -> String {
        match self.module.function_name(index) {
            Some(name) => format!("${}", name),
            None => index.to_string(),
        }
    }

    fn header(&mut self) {
        for (i, sig) in self.module.types.iter().enumerate() {
            let mut s = format!("(type $t{} (func", i);
            if !sig.params.is_empty() {
                s.push_str(" (param");
                for p in &sig.params {
                    let _ = write!(s, " {}", p);
                }
                s.push(')');
            }
            if sig.result.is_concrete() {
                let _ = write!(s, " (result {})", sig.result);
            }
            s.push_str("))");
            self.line(&s);
        }
        for imp in &self.module.func_imports {
            self.line(&format!(
                "(import {} {} (func ${} (type $t{})))",
                quote(&imp.module_name),
                quote(&imp.field_name),
                imp.name,
                imp.type_idx
            ));
        }
        for g in &self.module.imported_globals {
            let ty = if g.mutable {
                format!("(mut {})", g.ty)
            } else {
                g.ty.to_string()
            };
            self.line(&format!(
                "(import {} {} (global {}))",
                quote(&g.module_name),
                quote(&g.field_name),
                ty
            ));
        }
        if let Some(memory) = &self.module.memory {
            let mut s = format!("(memory {}", memory.initial);
            if let Some(max) = memory.maximum {
                let _ = write!(s, " {}", max);
            }
            s.push(')');
            self.line(&s);
        }
        for seg in &self.module.data_segments {
            self.line(&format!(
                "(data (i32.const {}) {})",
                seg.offset,
                quote_bytes(&seg.data)
            ));
        }
        if let Some(table) = &self.module.table {
            let mut s = format!("(table {}", table.initial);
            if let Some(max) = table.maximum {
                let _ = write!(s, " {}", max);
            }
            s.push_str(" funcref)");
            self.line(&s);
        }
        for seg in &self.module.element_segments {
            let mut s = format!("(elem (i32.const {})", seg.offset);
            for idx in &seg.func_indices {
                let _ = write!(s, " {}", self.func_ref(*idx));
            }
            s.push(')');
            self.line(&s);
        }
        for g in &self.module.globals {
            let ty = if g.mutable {
                format!("(mut {})", g.init.ty())
            } else {
                g.init.ty().to_string()
            };
            self.line(&format!(
                "(global {} ({}.const {}))",
                ty,
                g.init.ty(),
                literal(&g.init)
            ));
        }
        for export in &self.module.exports {
            let target = match export.kind {
                crate::ast::ExportKind::Func => format!("(func {})", self.func_ref(export.index)),
                crate::ast::ExportKind::Table => format!("(table {})", export.index),
                crate::ast::ExportKind::Memory => format!("(memory {})", export.index),
                crate::ast::ExportKind::Global => format!("(global {})", export.index),
            };
            self.line(&format!("(export {} {})", quote(&export.name), target));
        }
        if let Some(start) = self.module.start {
            self.line(&format!("(start {})", self.func_ref(start)));
        }
    }

    fn function(&mut self, func: &crate::ast::Function) {
        let sig = self.module.signature_of(func);
        let mut s = format!("(func ${} (type $t{})", func.name, func.type_idx);
        if !sig.params.is_empty() {
            s.push_str(" (param");
            for p in &sig.params {
                let _ = write!(s, " {}", p);
            }
            s.push(')');
        }
        if sig.result.is_concrete() {
            let _ = write!(s, " (result {})", sig.result);
        }
        if !func.locals.is_empty() {
            s.push_str(" (local");
            for l in &func.locals {
                let _ = write!(s, " {}", l);
            }
            s.push(')');
        }
        self.line(&s);
        self.indent += 1;
        self.expr(&func.body);
        self.indent -= 1;
        self.line(")");
    }

    /// Print one expression. Unreachable-typed control constructs get the
    /// trailing marker described in the module docs.
    fn expr(&mut self, e: &Expr) {
        self.construct(e);
        if e.ty == Type::Unreachable
            && matches!(
                e.kind,
                ExprKind::Block { .. } | ExprKind::If { .. } | ExprKind::Loop { .. }
            )
        {
            self.line("(unreachable)");
        }
    }

    fn result_annotation(ty: Type) -> String {
        if ty.is_concrete() {
            format!(" (result {})", ty)
        } else {
            String::new()
        }
    }

    fn construct(&mut self, e: &Expr) {
        match &e.kind {
            ExprKind::Block { name, list } => {
                let label = name.as_deref().map(|n| format!(" ${}", n)).unwrap_or_default();
                self.line(&format!("(block{}{}", label, Self::result_annotation(e.ty)));
                self.indent += 1;
                for item in list {
                    self.expr(item);
                }
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::If {
                condition,
                if_true,
                if_false,
            } => {
                self.line(&format!("(if{}", Self::result_annotation(e.ty)));
                self.indent += 1;
                self.expr(condition);
                self.line("(then");
                self.indent += 1;
                self.expr(if_true);
                self.indent -= 1;
                self.line(")");
                if let Some(f) = if_false {
                    self.line("(else");
                    self.indent += 1;
                    self.expr(f);
                    self.indent -= 1;
                    self.line(")");
                }
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Loop { name, body } => {
                let label = name.as_deref().map(|n| format!(" ${}", n)).unwrap_or_default();
                self.line(&format!("(loop{}{}", label, Self::result_annotation(e.ty)));
                self.indent += 1;
                self.expr(body);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Break {
                name,
                value,
                condition,
            } => {
                let op = if condition.is_some() { "br_if" } else { "br" };
                if value.is_none() && condition.is_none() {
                    self.line(&format!("({} ${})", op, name));
                } else {
                    self.line(&format!("({} ${}", op, name));
                    self.indent += 1;
                    if let Some(v) = value {
                        self.expr(v);
                    }
                    if let Some(c) = condition {
                        self.expr(c);
                    }
                    self.indent -= 1;
                    self.line(")");
                }
            }
            ExprKind::Switch {
                targets,
                default,
                value,
                condition,
            } => {
                let mut s = String::from("(br_table");
                for t in targets {
                    let _ = write!(s, " ${}", t);
                }
                let _ = write!(s, " ${}", default);
                self.line(&s);
                self.indent += 1;
                if let Some(v) = value {
                    self.expr(v);
                }
                self.expr(condition);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Call { target, operands } | ExprKind::CallImport { target, operands } => {
                if operands.is_empty() {
                    self.line(&format!("(call ${})", target));
                } else {
                    self.line(&format!("(call ${}", target));
                    self.indent += 1;
                    for op in operands {
                        self.expr(op);
                    }
                    self.indent -= 1;
                    self.line(")");
                }
            }
            ExprKind::CallIndirect {
                type_idx,
                operands,
                target,
            } => {
                self.line(&format!("(call_indirect (type $t{})", type_idx));
                self.indent += 1;
                for op in operands {
                    self.expr(op);
                }
                self.expr(target);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::GetLocal { index } => {
                self.line(&format!("(local.get {})", index));
            }
            ExprKind::SetLocal { index, value } => {
                let op = if e.ty.is_concrete() {
                    "local.tee"
                } else {
                    "local.set"
                };
                self.line(&format!("({} {}", op, index));
                self.indent += 1;
                self.expr(value);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::GetGlobal { index } => {
                self.line(&format!("(global.get {})", index));
            }
            ExprKind::SetGlobal { index, value } => {
                self.line(&format!("(global.set {}", index));
                self.indent += 1;
                self.expr(value);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Load {
                bytes,
                signed,
                offset,
                align,
                ptr,
            } => {
                // A load in dead code can lose its value type; nothing
                // here ever runs, so an i32 access stands in.
                let loaded = if e.ty.is_concrete() { e.ty } else { Type::I32 };
                self.line(&format!(
                    "({}{}",
                    access_name(loaded, *bytes, Some(*signed), "load"),
                    memarg(*offset, *align, *bytes)
                ));
                self.indent += 1;
                self.expr(ptr);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Store {
                bytes,
                offset,
                align,
                value_ty,
                ptr,
                value,
            } => {
                self.line(&format!(
                    "({}{}",
                    access_name(*value_ty, *bytes, None, "store"),
                    memarg(*offset, *align, *bytes)
                ));
                self.indent += 1;
                self.expr(ptr);
                self.expr(value);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Const { value } => {
                self.line(&format!("({}.const {})", value.ty(), literal(value)));
            }
            ExprKind::Unary { op, value } => {
                self.line(&format!("({}", op.mnemonic()));
                self.indent += 1;
                self.expr(value);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Binary { op, left, right } => {
                self.line(&format!("({}", op.mnemonic()));
                self.indent += 1;
                self.expr(left);
                self.expr(right);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Select {
                if_true,
                if_false,
                condition,
            } => {
                self.line("(select");
                self.indent += 1;
                self.expr(if_true);
                self.expr(if_false);
                self.expr(condition);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Drop { value } => {
                self.line("(drop");
                self.indent += 1;
                self.expr(value);
                self.indent -= 1;
                self.line(")");
            }
            ExprKind::Return { value } => match value {
                Some(v) => {
                    self.line("(return");
                    self.indent += 1;
                    self.expr(v);
                    self.indent -= 1;
                    self.line(")");
                }
                None => self.line("(return)"),
            },
            ExprKind::Host { op, operands } => {
                if operands.is_empty() {
                    self.line(&format!("({})", op.mnemonic()));
                } else {
                    self.line(&format!("({}", op.mnemonic()));
                    self.indent += 1;
                    for operand in operands {
                        self.expr(operand);
                    }
                    self.indent -= 1;
                    self.line(")");
                }
            }
            ExprKind::Nop => self.line("(nop)"),
            ExprKind::Unreachable => self.line("(unreachable)"),
        }
    }
}

/// Memory access mnemonic: `i32.load`, `i64.load8_s`, `i32.store16`, ...
fn access_name(ty: Type, bytes: u8, signed: Option<bool>, verb: &str) -> String {
    if bytes >= ty.byte_size() {
        return format!("{}.{}", ty, verb);
    }
    let width = match bytes {
        1 => "8",
        2 => "16",
        _ => "32",
    };
    match signed {
        Some(true) => format!("{}.{}{}_s", ty, verb, width),
        Some(false) => format!("{}.{}{}_u", ty, verb, width),
        None => format!("{}.{}{}", ty, verb, width),
    }
}

fn memarg(offset: u64, align: u8, bytes: u8) -> String {
    let mut s = String::new();
    if offset > 0 {
        let _ = write!(s, " offset={}", offset);
    }
    let align_bytes = 1u32 << align;
    if align_bytes != bytes as u32 {
        let _ = write!(s, " align={}", align_bytes);
    }
    s
}

fn literal(value: &Literal) -> String {
    match value {
        Literal::I32(v) => v.to_string(),
        Literal::I64(v) => v.to_string(),
        Literal::F32(v) => f32_token(*v),
        Literal::F64(v) => f64_token(*v),
    }
}

fn f32_token(v: f32) -> String {
    if v.is_nan() {
        let bits = v.to_bits();
        let sign = if bits >> 31 == 1 { "-" } else { "" };
        let payload = bits & 0x7f_ffff;
        if payload == 0x40_0000 {
            format!("{}nan", sign)
        } else {
            format!("{}nan:0x{:x}", sign, payload)
        }
    } else if v.is_infinite() {
        if v < 0.0 { "-inf".to_string() } else { "inf".to_string() }
    } else {
        format!("{:?}", v)
    }
}

fn f64_token(v: f64) -> String {
    if v.is_nan() {
        let bits = v.to_bits();
        let sign = if bits >> 63 == 1 { "-" } else { "" };
        let payload = bits & 0xf_ffff_ffff_ffff;
        if payload == 0x8_0000_0000_0000 {
            format!("{}nan", sign)
        } else {
            format!("{}nan:0x{:x}", sign, payload)
        }
    } else if v.is_infinite() {
        if v < 0.0 { "-inf".to_string() } else { "inf".to_string() }
    } else {
        format!("{:?}", v)
    }
}

fn quote(s: &str) -> String {
    quote_bytes(s.as_bytes())
}

/// Quote a byte string the way the text format expects: printable ASCII
/// stays literal, everything else becomes a `\xx` escape.
fn quote_bytes(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() + 2);
    s.push('"');
    for &b in bytes {
        match b {
            b'"' => s.push_str("\\\""),
            b'\\' => s.push_str("\\\\"),
            0x20..=0x7e => s.push(b as char),
            _ => {
                let _ = write!(s, "\\{:02x}", b);
            }
        }
    }
    s.push('"');
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ExportInfo, ExportKind, Expr, FuncSignature, Function, GlobalDef, MemoryInfo,
    };

    #[test]
    fn prints_minimal_module() {
        let module = Module::default();
        assert_eq!(print_module(&module), "(module\n)\n");
    }

    #[test]
    fn prints_function_with_body() {
        let module = Module {
            types: vec![FuncSignature {
                params: vec![Type::I32],
                result: Type::I32,
            }],
            functions: vec![Function {
                name: "func0".to_string(),
                type_idx: 0,
                locals: vec![Type::I64],
                body: Expr::get_local(0, Type::I32),
            }],
            ..Default::default()
        };
        let text = print_module(&module);
        assert!(text.contains("(type $t0 (func (param i32) (result i32)))"));
        assert!(text.contains("(func $func0 (type $t0) (param i32) (result i32) (local i64)"));
        assert!(text.contains("(local.get 0)"));
    }

    #[test]
    fn prints_memory_data_and_exports() {
        let module = Module {
            memory: Some(MemoryInfo {
                initial: 1,
                maximum: Some(4),
            }),
            data_segments: vec![crate::ast::DataSegment {
                offset: 8,
                data: b"hi\x00".to_vec(),
            }],
            exports: vec![ExportInfo {
                name: "mem".to_string(),
                kind: ExportKind::Memory,
                index: 0,
            }],
            ..Default::default()
        };
        let text = print_module(&module);
        assert!(text.contains("(memory 1 4)"));
        assert!(text.contains(r#"(data (i32.const 8) "hi\00")"#));
        assert!(text.contains(r#"(export "mem" (memory 0))"#));
    }

    #[test]
    fn prints_globals() {
        let module = Module {
            globals: vec![GlobalDef {
                mutable: true,
                init: Literal::I32(42),
            }],
            ..Default::default()
        };
        let text = print_module(&module);
        assert!(text.contains("(global (mut i32) (i32.const 42))"));
    }

    #[test]
    fn unreachable_block_gets_trailing_marker() {
        let module = Module {
            types: vec![FuncSignature {
                params: vec![],
                result: Type::None,
            }],
            functions: vec![Function {
                name: "func0".to_string(),
                type_idx: 0,
                locals: vec![],
                body: Expr::block_of(vec![Expr::unreachable()], Type::Unreachable),
            }],
            ..Default::default()
        };
        let text = print_module(&module);
        // no result annotation, one marker inside and one right after
        assert!(text.contains("(block\n"));
        assert_eq!(text.matches("(unreachable)").count(), 2);
    }

    #[test]
    fn float_tokens() {
        assert_eq!(f32_token(1.5), "1.5");
        assert_eq!(f32_token(f32::NAN), "nan");
        assert_eq!(f32_token(f32::INFINITY), "inf");
        assert_eq!(f32_token(f32::NEG_INFINITY), "-inf");
        assert_eq!(f64_token(-0.0), "-0.0");
        assert_eq!(f64_token(f64::NAN), "nan");
    }

    #[test]
    fn access_names() {
        assert_eq!(access_name(Type::I32, 4, Some(false), "load"), "i32.load");
        assert_eq!(
            access_name(Type::I32, 1, Some(true), "load"),
            "i32.load8_s"
        );
        assert_eq!(
            access_name(Type::I64, 4, Some(false), "load"),
            "i64.load32_u"
        );
        assert_eq!(access_name(Type::I64, 2, None, "store"), "i64.store16");
        assert_eq!(access_name(Type::F64, 8, None, "store"), "f64.store");
    }

    #[test]
    fn memarg_annotations() {
        assert_eq!(memarg(0, 2, 4), "");
        assert_eq!(memarg(16, 2, 4), " offset=16");
        assert_eq!(memarg(0, 0, 4), " align=1");
        assert_eq!(memarg(8, 1, 4), " offset=8 align=2");
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("env"), "\"env\"");
        assert_eq!(quote_bytes(b"a\"b\\c\n"), r#""a\"b\\c\0a""#);
    }
}
