//! Function body decoding: flat operator stream → expression tree.
//!
//! The builder simulates the Wasm evaluation stack per control frame. Each
//! frame accumulates decoded expressions in program order; popping an
//! operand takes the most recent one. Structured operators open and close
//! frames; branches resolve relative depths to generated frame labels
//! (`label$N`), and only labels that are actually targeted survive on the
//! emitted `Block`/`Loop` nodes.
//!
//! Code after an unconditional transfer (`br`, `br_table`, `return`,
//! `unreachable`) is stack-polymorphic in the binary format. The builder
//! mirrors that with a per-frame dead-code flag: operand pops with an
//! empty stack synthesize `unreachable` markers instead of failing.

use anyhow::{bail, Context, Result};
use wasmparser::Operator;

use crate::ast::{BinOp, Expr, ExprKind, FuncSignature, HostOp, Literal, Type, UnOp};

/// One entry of the unified function index space.
pub(crate) struct CallTarget {
    pub name: String,
    pub type_idx: u32,
    pub imported: bool,
}

/// Module-level context a body needs while decoding.
pub(crate) struct ModuleEnv<'a> {
    pub types: &'a [FuncSignature],
    pub call_targets: &'a [CallTarget],
    pub global_types: &'a [Type],
}

/// Decode `operators` into a body expression. Scratch locals allocated to
/// preserve evaluation order are appended to `locals`.
pub(crate) fn build_function_body(
    operators: &[Operator],
    sig: &FuncSignature,
    locals: &mut Vec<Type>,
    env: &ModuleEnv,
) -> Result<Expr> {
    let num_declared = sig.params.len() + locals.len();
    let mut builder = BodyBuilder {
        env,
        local_types: sig.params.iter().chain(locals.iter()).copied().collect(),
        result: sig.result,
        frames: Vec::new(),
        next_label: 0,
        body: None,
    };
    let func_label = builder.new_label();
    builder.frames.push(ControlFrame {
        kind: FrameKind::Func,
        label: func_label,
        label_used: false,
        result: sig.result,
        items: Vec::new(),
        unreachable: false,
        entry_unreachable: false,
    });
    for op in operators {
        builder
            .translate_operator(op)
            .with_context(|| format!("translating operator {:?}", op))?;
    }
    let body = match builder.body {
        Some(body) => body,
        None => bail!("function body missing final end"),
    };
    locals.extend(builder.local_types.split_off(num_declared));
    Ok(body)
}

enum FrameKind {
    /// The implicit function-level frame; branches to it act like a branch
    /// to the end of a block.
    Func,
    Block,
    Loop,
    /// `condition` was popped when the frame opened; `then_items` is filled
    /// in when the `else` operator arrives.
    If {
        condition: Expr,
        then_items: Option<Vec<Expr>>,
    },
}

struct ControlFrame {
    kind: FrameKind,
    label: String,
    label_used: bool,
    result: Type,
    items: Vec<Expr>,
    unreachable: bool,
    entry_unreachable: bool,
}

/// Resolved branch target.
struct BranchTarget {
    label: String,
    result: Type,
    is_loop: bool,
}

struct BodyBuilder<'a> {
    env: &'a ModuleEnv<'a>,
    /// Params, declared locals, then any scratch locals.
    local_types: Vec<Type>,
    /// Function result type.
    result: Type,
    frames: Vec<ControlFrame>,
    next_label: u32,
    /// Set once the function-level frame is closed.
    body: Option<Expr>,
}

impl<'a> BodyBuilder<'a> {
    fn new_label(&mut self) -> String {
        let label = format!("label${}", self.next_label);
        self.next_label += 1;
        label
    }

    fn frame(&mut self) -> Result<&mut ControlFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| anyhow::anyhow!("control frame stack underflow"))
    }

    fn push(&mut self, expr: Expr) -> Result<()> {
        self.frame()?.items.push(expr);
        Ok(())
    }

    fn mark_unreachable(&mut self) -> Result<()> {
        self.frame()?.unreachable = true;
        Ok(())
    }

    /// Pop the most recent expression. In dead code, an exhausted stack
    /// yields a synthesized `unreachable` marker.
    fn pop(&mut self) -> Result<Expr> {
        let frame = self.frame()?;
        match frame.items.pop() {
            Some(e) => Ok(e),
            None if frame.unreachable => Ok(Expr::unreachable()),
            None => bail!("value stack underflow"),
        }
    }

    /// Pop a value operand. If the value is buried beneath none-typed
    /// statements, it is spilled to a scratch local so evaluation order
    /// survives the reassociation into a tree.
    fn pop_value(&mut self) -> Result<Expr> {
        let top = self.pop()?;
        if top.ty != Type::None {
            return Ok(top);
        }
        let mut stmts = vec![top];
        let value = loop {
            let e = self.pop()?;
            if e.ty != Type::None {
                break e;
            }
            stmts.push(e);
        };
        if value.ty == Type::Unreachable {
            // Nothing after the value runs anyway; keep everything in
            // original order without a spill.
            let mut list = vec![value];
            list.extend(stmts.into_iter().rev());
            return Ok(Expr::block_of(list, Type::Unreachable));
        }
        let ty = value.ty;
        let scratch = self.new_scratch_local(ty);
        let mut list = vec![Expr {
            kind: ExprKind::SetLocal {
                index: scratch,
                value: Box::new(value),
            },
            ty: Type::None,
        }];
        list.extend(stmts.into_iter().rev());
        list.push(Expr::get_local(scratch, ty));
        Ok(Expr::block_of(list, ty))
    }

    fn new_scratch_local(&mut self, ty: Type) -> u32 {
        self.local_types.push(ty);
        (self.local_types.len() - 1) as u32
    }

    fn local_type(&self, index: u32) -> Result<Type> {
        self.local_types
            .get(index as usize)
            .copied()
            .with_context(|| format!("local index {} out of range", index))
    }

    fn global_type(&self, index: u32) -> Result<Type> {
        self.env
            .global_types
            .get(index as usize)
            .copied()
            .with_context(|| format!("global index {} out of range", index))
    }

    /// Resolve a relative branch depth and mark the target label used.
    fn branch_target(&mut self, depth: u32) -> Result<BranchTarget> {
        let idx = self
            .frames
            .len()
            .checked_sub(depth as usize + 1)
            .with_context(|| {
                format!(
                    "branch depth {} exceeds control stack depth {}",
                    depth,
                    self.frames.len()
                )
            })?;
        let frame = &mut self.frames[idx];
        frame.label_used = true;
        Ok(BranchTarget {
            label: frame.label.clone(),
            result: frame.result,
            is_loop: matches!(frame.kind, FrameKind::Loop),
        })
    }

    /// Whether a branch to `target` carries a value. Back edges never do.
    fn branch_value(&mut self, target: &BranchTarget) -> Result<Option<Box<Expr>>> {
        if !target.is_loop && target.result.is_concrete() {
            Ok(Some(Box::new(self.pop_value()?)))
        } else {
            Ok(None)
        }
    }

    fn open_frame(&mut self, kind: FrameKind, result: Type) -> Result<()> {
        let entry_unreachable = self.frame()?.unreachable;
        let label = self.new_label();
        self.frames.push(ControlFrame {
            kind,
            label,
            label_used: false,
            result,
            items: Vec::new(),
            unreachable: entry_unreachable,
            entry_unreachable,
        });
        Ok(())
    }

    fn block_type(&self, blockty: &wasmparser::BlockType) -> Result<Type> {
        match blockty {
            wasmparser::BlockType::Empty => Ok(Type::None),
            wasmparser::BlockType::Type(vt) => match vt {
                wasmparser::ValType::I32 => Ok(Type::I32),
                wasmparser::ValType::I64 => Ok(Type::I64),
                wasmparser::ValType::F32 => Ok(Type::F32),
                wasmparser::ValType::F64 => Ok(Type::F64),
                other => bail!("unsupported block value type: {:?}", other),
            },
            wasmparser::BlockType::FuncType(idx) => {
                bail!("multi-value block types not supported (type {})", idx)
            }
        }
    }

    /// Close the innermost frame into an expression and push it onto the
    /// parent, or finish the function when the outermost frame closes.
    fn finish_end(&mut self) -> Result<()> {
        let frame = match self.frames.pop() {
            Some(f) => f,
            None => bail!("end without an open control frame"),
        };
        let expr = Self::finish_frame(frame)?;
        if self.frames.is_empty() {
            self.body = Some(expr);
        } else {
            self.push(expr)?;
        }
        Ok(())
    }

    fn finish_frame(frame: ControlFrame) -> Result<Expr> {
        match frame.kind {
            FrameKind::Func | FrameKind::Block => {
                let name = frame.label_used.then_some(frame.label);
                Ok(make_block(name, frame.items, frame.result))
            }
            FrameKind::Loop => {
                let body = body_from_items(frame.items);
                let ty = if frame.result.is_concrete() {
                    frame.result
                } else if body.ty == Type::Unreachable {
                    Type::Unreachable
                } else {
                    frame.result
                };
                let name = frame.label_used.then_some(frame.label);
                Ok(Expr {
                    kind: ExprKind::Loop {
                        name,
                        body: Box::new(body),
                    },
                    ty,
                })
            }
            FrameKind::If {
                condition,
                then_items,
            } => {
                let (then_items, else_items) = match then_items {
                    Some(then_items) => (then_items, Some(frame.items)),
                    None => (frame.items, None),
                };
                let if_true = body_from_items(then_items);
                let if_false = else_items.map(body_from_items);
                let ty = if condition.ty == Type::Unreachable {
                    Type::Unreachable
                } else if frame.result.is_concrete() {
                    frame.result
                } else if if_false
                    .as_ref()
                    .is_some_and(|f| if_true.ty == Type::Unreachable && f.ty == Type::Unreachable)
                {
                    Type::Unreachable
                } else {
                    Type::None
                };
                let expr = Expr {
                    kind: ExprKind::If {
                        condition: Box::new(condition),
                        if_true: Box::new(if_true),
                        if_false: if_false.map(Box::new),
                    },
                    ty,
                };
                // Branches to an if land past it; a labeled wrapper block
                // gives them somewhere to go. Flow can resume at the
                // label, so the wrapper never takes the unreachable type.
                if frame.label_used {
                    let wrapper_ty = if expr.ty == Type::Unreachable {
                        Type::None
                    } else {
                        expr.ty
                    };
                    Ok(Expr {
                        ty: wrapper_ty,
                        kind: ExprKind::Block {
                            name: Some(frame.label),
                            list: vec![expr],
                        },
                    })
                } else {
                    Ok(expr)
                }
            }
        }
    }

    fn push_binary(&mut self, op: BinOp) -> Result<()> {
        let right = self.pop_value()?;
        let left = self.pop_value()?;
        let ty = if left.ty == Type::Unreachable || right.ty == Type::Unreachable {
            Type::Unreachable
        } else {
            op.result_type()
        };
        self.push(Expr {
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ty,
        })
    }

    fn push_unary(&mut self, op: UnOp) -> Result<()> {
        let value = self.pop_value()?;
        let ty = if value.ty == Type::Unreachable {
            Type::Unreachable
        } else {
            op.result_type()
        };
        self.push(Expr {
            kind: ExprKind::Unary {
                op,
                value: Box::new(value),
            },
            ty,
        })
    }

    fn push_load(
        &mut self,
        ty: Type,
        bytes: u8,
        signed: bool,
        memarg: &wasmparser::MemArg,
    ) -> Result<()> {
        let ptr = self.pop_value()?;
        let node_ty = if ptr.ty == Type::Unreachable {
            Type::Unreachable
        } else {
            ty
        };
        self.push(Expr {
            kind: ExprKind::Load {
                bytes,
                signed,
                offset: memarg.offset,
                align: memarg.align,
                ptr: Box::new(ptr),
            },
            ty: node_ty,
        })
    }

    fn push_store(&mut self, value_ty: Type, bytes: u8, memarg: &wasmparser::MemArg) -> Result<()> {
        let value = self.pop_value()?;
        let ptr = self.pop_value()?;
        let ty = if ptr.ty == Type::Unreachable || value.ty == Type::Unreachable {
            Type::Unreachable
        } else {
            Type::None
        };
        self.push(Expr {
            kind: ExprKind::Store {
                bytes,
                offset: memarg.offset,
                align: memarg.align,
                value_ty,
                ptr: Box::new(ptr),
                value: Box::new(value),
            },
            ty,
        })
    }

    fn push_call(&mut self, function_index: u32) -> Result<()> {
        let target = self
            .env
            .call_targets
            .get(function_index as usize)
            .with_context(|| format!("function index {} out of range", function_index))?;
        let sig = self
            .env
            .types
            .get(target.type_idx as usize)
            .with_context(|| format!("type index {} out of range", target.type_idx))?;
        let name = target.name.clone();
        let imported = target.imported;
        let result = sig.result;
        let num_params = sig.params.len();

        let mut operands = Vec::with_capacity(num_params);
        for _ in 0..num_params {
            operands.push(self.pop_value()?);
        }
        operands.reverse();
        let kind = if imported {
            ExprKind::CallImport {
                target: name,
                operands,
            }
        } else {
            ExprKind::Call {
                target: name,
                operands,
            }
        };
        self.push(Expr { kind, ty: result })
    }

    fn translate_operator(&mut self, op: &Operator) -> Result<()> {
        if self.body.is_some() {
            bail!("operator after function end");
        }
        match op {
            // Constants
            Operator::I32Const { value } => {
                self.push(Expr::const_of(Literal::I32(*value)))?;
            }
            Operator::I64Const { value } => {
                self.push(Expr::const_of(Literal::I64(*value)))?;
            }
            Operator::F32Const { value } => {
                self.push(Expr::const_of(Literal::F32(f32::from_bits(value.bits()))))?;
            }
            Operator::F64Const { value } => {
                self.push(Expr::const_of(Literal::F64(f64::from_bits(value.bits()))))?;
            }

            // Locals
            Operator::LocalGet { local_index } => {
                let ty = self.local_type(*local_index)?;
                self.push(Expr::get_local(*local_index, ty))?;
            }
            Operator::LocalSet { local_index } => {
                self.local_type(*local_index)?;
                let value = self.pop_value()?;
                let ty = if value.ty == Type::Unreachable {
                    Type::Unreachable
                } else {
                    Type::None
                };
                self.push(Expr {
                    kind: ExprKind::SetLocal {
                        index: *local_index,
                        value: Box::new(value),
                    },
                    ty,
                })?;
            }
            Operator::LocalTee { local_index } => {
                let local_ty = self.local_type(*local_index)?;
                let value = self.pop_value()?;
                let ty = if value.ty == Type::Unreachable {
                    Type::Unreachable
                } else {
                    local_ty
                };
                self.push(Expr {
                    kind: ExprKind::SetLocal {
                        index: *local_index,
                        value: Box::new(value),
                    },
                    ty,
                })?;
            }

            // Globals
            Operator::GlobalGet { global_index } => {
                let ty = self.global_type(*global_index)?;
                self.push(Expr {
                    kind: ExprKind::GetGlobal {
                        index: *global_index,
                    },
                    ty,
                })?;
            }
            Operator::GlobalSet { global_index } => {
                self.global_type(*global_index)?;
                let value = self.pop_value()?;
                let ty = if value.ty == Type::Unreachable {
                    Type::Unreachable
                } else {
                    Type::None
                };
                self.push(Expr {
                    kind: ExprKind::SetGlobal {
                        index: *global_index,
                        value: Box::new(value),
                    },
                    ty,
                })?;
            }

            // Structured control flow
            Operator::Block { blockty } => {
                let result = self.block_type(blockty)?;
                self.open_frame(FrameKind::Block, result)?;
            }
            Operator::Loop { blockty } => {
                let result = self.block_type(blockty)?;
                self.open_frame(FrameKind::Loop, result)?;
            }
            Operator::If { blockty } => {
                let result = self.block_type(blockty)?;
                let condition = self.pop_value()?;
                self.open_frame(
                    FrameKind::If {
                        condition,
                        then_items: None,
                    },
                    result,
                )?;
            }
            Operator::Else => {
                let frame = self.frame()?;
                match &mut frame.kind {
                    FrameKind::If { then_items, .. } if then_items.is_none() => {
                        *then_items = Some(std::mem::take(&mut frame.items));
                        frame.unreachable = frame.entry_unreachable;
                    }
                    _ => bail!("else outside of an if"),
                }
            }
            Operator::End => {
                self.finish_end()?;
            }

            // Branches
            Operator::Br { relative_depth } => {
                let target = self.branch_target(*relative_depth)?;
                let value = self.branch_value(&target)?;
                self.push(Expr {
                    kind: ExprKind::Break {
                        name: target.label,
                        value,
                        condition: None,
                    },
                    ty: Type::Unreachable,
                })?;
                self.mark_unreachable()?;
            }
            Operator::BrIf { relative_depth } => {
                let condition = self.pop_value()?;
                let target = self.branch_target(*relative_depth)?;
                let value = self.branch_value(&target)?;
                let ty = if condition.ty == Type::Unreachable
                    || value.as_deref().is_some_and(|v| v.ty == Type::Unreachable)
                {
                    Type::Unreachable
                } else {
                    value.as_deref().map(|v| v.ty).unwrap_or(Type::None)
                };
                self.push(Expr {
                    kind: ExprKind::Break {
                        name: target.label,
                        value,
                        condition: Some(Box::new(condition)),
                    },
                    ty,
                })?;
            }
            Operator::BrTable { targets } => {
                let condition = self.pop_value()?;
                let mut labels = Vec::new();
                for depth in targets.targets() {
                    let depth = depth.context("reading br_table target")?;
                    labels.push(self.branch_target(depth)?.label);
                }
                let default = self.branch_target(targets.default())?;
                let value = self.branch_value(&default)?;
                self.push(Expr {
                    kind: ExprKind::Switch {
                        targets: labels,
                        default: default.label,
                        value,
                        condition: Box::new(condition),
                    },
                    ty: Type::Unreachable,
                })?;
                self.mark_unreachable()?;
            }

            // Calls
            Operator::Call { function_index } => {
                self.push_call(*function_index)?;
            }
            Operator::CallIndirect {
                type_index,
                table_index,
            } => {
                if *table_index != 0 {
                    bail!("call_indirect through table {} not supported", table_index);
                }
                let sig = self
                    .env
                    .types
                    .get(*type_index as usize)
                    .with_context(|| format!("type index {} out of range", type_index))?;
                let result = sig.result;
                let num_params = sig.params.len();
                let target = self.pop_value()?;
                let mut operands = Vec::with_capacity(num_params);
                for _ in 0..num_params {
                    operands.push(self.pop_value()?);
                }
                operands.reverse();
                self.push(Expr {
                    kind: ExprKind::CallIndirect {
                        type_idx: *type_index,
                        operands,
                        target: Box::new(target),
                    },
                    ty: result,
                })?;
            }

            // Parametric
            Operator::Drop => {
                let value = self.pop_value()?;
                let ty = if value.ty == Type::Unreachable {
                    Type::Unreachable
                } else {
                    Type::None
                };
                self.push(Expr {
                    kind: ExprKind::Drop {
                        value: Box::new(value),
                    },
                    ty,
                })?;
            }
            Operator::Select => {
                let condition = self.pop_value()?;
                let if_false = self.pop_value()?;
                let if_true = self.pop_value()?;
                let ty = if if_true.ty == Type::Unreachable
                    || if_false.ty == Type::Unreachable
                    || condition.ty == Type::Unreachable
                {
                    Type::Unreachable
                } else {
                    if_true.ty
                };
                self.push(Expr {
                    kind: ExprKind::Select {
                        if_true: Box::new(if_true),
                        if_false: Box::new(if_false),
                        condition: Box::new(condition),
                    },
                    ty,
                })?;
            }
            Operator::Nop => {
                self.push(Expr::nop())?;
            }
            Operator::Return => {
                let value = if self.result.is_concrete() {
                    Some(Box::new(self.pop_value()?))
                } else {
                    None
                };
                self.push(Expr {
                    kind: ExprKind::Return { value },
                    ty: Type::Unreachable,
                })?;
                self.mark_unreachable()?;
            }
            Operator::Unreachable => {
                self.push(Expr::unreachable())?;
                self.mark_unreachable()?;
            }

            // Host operations
            Operator::MemorySize { .. } => {
                self.push(Expr {
                    kind: ExprKind::Host {
                        op: HostOp::MemorySize,
                        operands: vec![],
                    },
                    ty: Type::I32,
                })?;
            }
            Operator::MemoryGrow { .. } => {
                let delta = self.pop_value()?;
                self.push(Expr {
                    kind: ExprKind::Host {
                        op: HostOp::MemoryGrow,
                        operands: vec![delta],
                    },
                    ty: Type::I32,
                })?;
            }

            // Memory loads
            Operator::I32Load { memarg } => self.push_load(Type::I32, 4, false, memarg)?,
            Operator::I64Load { memarg } => self.push_load(Type::I64, 8, false, memarg)?,
            Operator::F32Load { memarg } => self.push_load(Type::F32, 4, false, memarg)?,
            Operator::F64Load { memarg } => self.push_load(Type::F64, 8, false, memarg)?,
            Operator::I32Load8S { memarg } => self.push_load(Type::I32, 1, true, memarg)?,
            Operator::I32Load8U { memarg } => self.push_load(Type::I32, 1, false, memarg)?,
            Operator::I32Load16S { memarg } => self.push_load(Type::I32, 2, true, memarg)?,
            Operator::I32Load16U { memarg } => self.push_load(Type::I32, 2, false, memarg)?,
            Operator::I64Load8S { memarg } => self.push_load(Type::I64, 1, true, memarg)?,
            Operator::I64Load8U { memarg } => self.push_load(Type::I64, 1, false, memarg)?,
            Operator::I64Load16S { memarg } => self.push_load(Type::I64, 2, true, memarg)?,
            Operator::I64Load16U { memarg } => self.push_load(Type::I64, 2, false, memarg)?,
            Operator::I64Load32S { memarg } => self.push_load(Type::I64, 4, true, memarg)?,
            Operator::I64Load32U { memarg } => self.push_load(Type::I64, 4, false, memarg)?,

            // Memory stores
            Operator::I32Store { memarg } => self.push_store(Type::I32, 4, memarg)?,
            Operator::I64Store { memarg } => self.push_store(Type::I64, 8, memarg)?,
            Operator::F32Store { memarg } => self.push_store(Type::F32, 4, memarg)?,
            Operator::F64Store { memarg } => self.push_store(Type::F64, 8, memarg)?,
            Operator::I32Store8 { memarg } => self.push_store(Type::I32, 1, memarg)?,
            Operator::I32Store16 { memarg } => self.push_store(Type::I32, 2, memarg)?,
            Operator::I64Store8 { memarg } => self.push_store(Type::I64, 1, memarg)?,
            Operator::I64Store16 { memarg } => self.push_store(Type::I64, 2, memarg)?,
            Operator::I64Store32 { memarg } => self.push_store(Type::I64, 4, memarg)?,

            // i32 binary
            Operator::I32Add => self.push_binary(BinOp::I32Add)?,
            Operator::I32Sub => self.push_binary(BinOp::I32Sub)?,
            Operator::I32Mul => self.push_binary(BinOp::I32Mul)?,
            Operator::I32DivS => self.push_binary(BinOp::I32DivS)?,
            Operator::I32DivU => self.push_binary(BinOp::I32DivU)?,
            Operator::I32RemS => self.push_binary(BinOp::I32RemS)?,
            Operator::I32RemU => self.push_binary(BinOp::I32RemU)?,
            Operator::I32And => self.push_binary(BinOp::I32And)?,
            Operator::I32Or => self.push_binary(BinOp::I32Or)?,
            Operator::I32Xor => self.push_binary(BinOp::I32Xor)?,
            Operator::I32Shl => self.push_binary(BinOp::I32Shl)?,
            Operator::I32ShrS => self.push_binary(BinOp::I32ShrS)?,
            Operator::I32ShrU => self.push_binary(BinOp::I32ShrU)?,
            Operator::I32Rotl => self.push_binary(BinOp::I32Rotl)?,
            Operator::I32Rotr => self.push_binary(BinOp::I32Rotr)?,

            // i32 comparisons
            Operator::I32Eq => self.push_binary(BinOp::I32Eq)?,
            Operator::I32Ne => self.push_binary(BinOp::I32Ne)?,
            Operator::I32LtS => self.push_binary(BinOp::I32LtS)?,
            Operator::I32LtU => self.push_binary(BinOp::I32LtU)?,
            Operator::I32GtS => self.push_binary(BinOp::I32GtS)?,
            Operator::I32GtU => self.push_binary(BinOp::I32GtU)?,
            Operator::I32LeS => self.push_binary(BinOp::I32LeS)?,
            Operator::I32LeU => self.push_binary(BinOp::I32LeU)?,
            Operator::I32GeS => self.push_binary(BinOp::I32GeS)?,
            Operator::I32GeU => self.push_binary(BinOp::I32GeU)?,

            // i32 unary
            Operator::I32Eqz => self.push_unary(UnOp::I32Eqz)?,
            Operator::I32Clz => self.push_unary(UnOp::I32Clz)?,
            Operator::I32Ctz => self.push_unary(UnOp::I32Ctz)?,
            Operator::I32Popcnt => self.push_unary(UnOp::I32Popcnt)?,

            // i64 binary
            Operator::I64Add => self.push_binary(BinOp::I64Add)?,
            Operator::I64Sub => self.push_binary(BinOp::I64Sub)?,
            Operator::I64Mul => self.push_binary(BinOp::I64Mul)?,
            Operator::I64DivS => self.push_binary(BinOp::I64DivS)?,
            Operator::I64DivU => self.push_binary(BinOp::I64DivU)?,
            Operator::I64RemS => self.push_binary(BinOp::I64RemS)?,
            Operator::I64RemU => self.push_binary(BinOp::I64RemU)?,
            Operator::I64And => self.push_binary(BinOp::I64And)?,
            Operator::I64Or => self.push_binary(BinOp::I64Or)?,
            Operator::I64Xor => self.push_binary(BinOp::I64Xor)?,
            Operator::I64Shl => self.push_binary(BinOp::I64Shl)?,
            Operator::I64ShrS => self.push_binary(BinOp::I64ShrS)?,
            Operator::I64ShrU => self.push_binary(BinOp::I64ShrU)?,
            Operator::I64Rotl => self.push_binary(BinOp::I64Rotl)?,
            Operator::I64Rotr => self.push_binary(BinOp::I64Rotr)?,

            // i64 comparisons
            Operator::I64Eq => self.push_binary(BinOp::I64Eq)?,
            Operator::I64Ne => self.push_binary(BinOp::I64Ne)?,
            Operator::I64LtS => self.push_binary(BinOp::I64LtS)?,
            Operator::I64LtU => self.push_binary(BinOp::I64LtU)?,
            Operator::I64GtS => self.push_binary(BinOp::I64GtS)?,
            Operator::I64GtU => self.push_binary(BinOp::I64GtU)?,
            Operator::I64LeS => self.push_binary(BinOp::I64LeS)?,
            Operator::I64LeU => self.push_binary(BinOp::I64LeU)?,
            Operator::I64GeS => self.push_binary(BinOp::I64GeS)?,
            Operator::I64GeU => self.push_binary(BinOp::I64GeU)?,

            // i64 unary
            Operator::I64Eqz => self.push_unary(UnOp::I64Eqz)?,
            Operator::I64Clz => self.push_unary(UnOp::I64Clz)?,
            Operator::I64Ctz => self.push_unary(UnOp::I64Ctz)?,
            Operator::I64Popcnt => self.push_unary(UnOp::I64Popcnt)?,

            // f32 binary
            Operator::F32Add => self.push_binary(BinOp::F32Add)?,
            Operator::F32Sub => self.push_binary(BinOp::F32Sub)?,
            Operator::F32Mul => self.push_binary(BinOp::F32Mul)?,
            Operator::F32Div => self.push_binary(BinOp::F32Div)?,
            Operator::F32Min => self.push_binary(BinOp::F32Min)?,
            Operator::F32Max => self.push_binary(BinOp::F32Max)?,
            Operator::F32Copysign => self.push_binary(BinOp::F32Copysign)?,

            // f32 comparisons
            Operator::F32Eq => self.push_binary(BinOp::F32Eq)?,
            Operator::F32Ne => self.push_binary(BinOp::F32Ne)?,
            Operator::F32Lt => self.push_binary(BinOp::F32Lt)?,
            Operator::F32Gt => self.push_binary(BinOp::F32Gt)?,
            Operator::F32Le => self.push_binary(BinOp::F32Le)?,
            Operator::F32Ge => self.push_binary(BinOp::F32Ge)?,

            // f32 unary
            Operator::F32Abs => self.push_unary(UnOp::F32Abs)?,
            Operator::F32Neg => self.push_unary(UnOp::F32Neg)?,
            Operator::F32Ceil => self.push_unary(UnOp::F32Ceil)?,
            Operator::F32Floor => self.push_unary(UnOp::F32Floor)?,
            Operator::F32Trunc => self.push_unary(UnOp::F32Trunc)?,
            Operator::F32Nearest => self.push_unary(UnOp::F32Nearest)?,
            Operator::F32Sqrt => self.push_unary(UnOp::F32Sqrt)?,

            // f64 binary
            Operator::F64Add => self.push_binary(BinOp::F64Add)?,
            Operator::F64Sub => self.push_binary(BinOp::F64Sub)?,
            Operator::F64Mul => self.push_binary(BinOp::F64Mul)?,
            Operator::F64Div => self.push_binary(BinOp::F64Div)?,
            Operator::F64Min => self.push_binary(BinOp::F64Min)?,
            Operator::F64Max => self.push_binary(BinOp::F64Max)?,
            Operator::F64Copysign => self.push_binary(BinOp::F64Copysign)?,

            // f64 comparisons
            Operator::F64Eq => self.push_binary(BinOp::F64Eq)?,
            Operator::F64Ne => self.push_binary(BinOp::F64Ne)?,
            Operator::F64Lt => self.push_binary(BinOp::F64Lt)?,
            Operator::F64Gt => self.push_binary(BinOp::F64Gt)?,
            Operator::F64Le => self.push_binary(BinOp::F64Le)?,
            Operator::F64Ge => self.push_binary(BinOp::F64Ge)?,

            // f64 unary
            Operator::F64Abs => self.push_unary(UnOp::F64Abs)?,
            Operator::F64Neg => self.push_unary(UnOp::F64Neg)?,
            Operator::F64Ceil => self.push_unary(UnOp::F64Ceil)?,
            Operator::F64Floor => self.push_unary(UnOp::F64Floor)?,
            Operator::F64Trunc => self.push_unary(UnOp::F64Trunc)?,
            Operator::F64Nearest => self.push_unary(UnOp::F64Nearest)?,
            Operator::F64Sqrt => self.push_unary(UnOp::F64Sqrt)?,

            // Conversions
            Operator::I32WrapI64 => self.push_unary(UnOp::I32WrapI64)?,
            Operator::I64ExtendI32S => self.push_unary(UnOp::I64ExtendI32S)?,
            Operator::I64ExtendI32U => self.push_unary(UnOp::I64ExtendI32U)?,
            Operator::I32TruncF32S => self.push_unary(UnOp::I32TruncF32S)?,
            Operator::I32TruncF32U => self.push_unary(UnOp::I32TruncF32U)?,
            Operator::I32TruncF64S => self.push_unary(UnOp::I32TruncF64S)?,
            Operator::I32TruncF64U => self.push_unary(UnOp::I32TruncF64U)?,
            Operator::I64TruncF32S => self.push_unary(UnOp::I64TruncF32S)?,
            Operator::I64TruncF32U => self.push_unary(UnOp::I64TruncF32U)?,
            Operator::I64TruncF64S => self.push_unary(UnOp::I64TruncF64S)?,
            Operator::I64TruncF64U => self.push_unary(UnOp::I64TruncF64U)?,
            Operator::F32ConvertI32S => self.push_unary(UnOp::F32ConvertI32S)?,
            Operator::F32ConvertI32U => self.push_unary(UnOp::F32ConvertI32U)?,
            Operator::F32ConvertI64S => self.push_unary(UnOp::F32ConvertI64S)?,
            Operator::F32ConvertI64U => self.push_unary(UnOp::F32ConvertI64U)?,
            Operator::F64ConvertI32S => self.push_unary(UnOp::F64ConvertI32S)?,
            Operator::F64ConvertI32U => self.push_unary(UnOp::F64ConvertI32U)?,
            Operator::F64ConvertI64S => self.push_unary(UnOp::F64ConvertI64S)?,
            Operator::F64ConvertI64U => self.push_unary(UnOp::F64ConvertI64U)?,
            Operator::F32DemoteF64 => self.push_unary(UnOp::F32DemoteF64)?,
            Operator::F64PromoteF32 => self.push_unary(UnOp::F64PromoteF32)?,
            Operator::I32ReinterpretF32 => self.push_unary(UnOp::I32ReinterpretF32)?,
            Operator::I64ReinterpretF64 => self.push_unary(UnOp::I64ReinterpretF64)?,
            Operator::F32ReinterpretI32 => self.push_unary(UnOp::F32ReinterpretI32)?,
            Operator::F64ReinterpretI64 => self.push_unary(UnOp::F64ReinterpretI64)?,

            other => bail!("unsupported operator: {:?}", other),
        }
        Ok(())
    }
}

/// A block frame's items as a block expression. The declared type sticks
/// when concrete; an unlabeled block ending dead narrows to unreachable.
fn make_block(name: Option<String>, mut list: Vec<Expr>, declared: Type) -> Expr {
    if name.is_none() && list.len() == 1 {
        return list.remove(0);
    }
    let ty = if declared.is_concrete() {
        declared
    } else if name.is_none() && list.last().is_some_and(|c| c.ty == Type::Unreachable) {
        Type::Unreachable
    } else {
        Type::None
    };
    Expr {
        kind: ExprKind::Block { name, list },
        ty,
    }
}

/// A loop body or if arm from accumulated items.
fn body_from_items(mut items: Vec<Expr>) -> Expr {
    match items.len() {
        0 => Expr::nop(),
        1 => items.remove(0),
        _ => {
            let ty = items.last().map(|e| e.ty).unwrap_or(Type::None);
            Expr::block_of(items, ty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    fn body_of(wat: &str) -> Expr {
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_module(&wasm).unwrap();
        module.functions[0].body.clone()
    }

    #[test]
    fn add_function_builds_binary_tree() {
        let body = body_of(
            r#"
            (module (func (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
        "#,
        );
        assert_eq!(body.ty, Type::I32);
        let ExprKind::Binary { op, left, right } = &body.kind else {
            panic!("expected Binary, got {body:?}");
        };
        assert_eq!(*op, BinOp::I32Add);
        assert!(matches!(left.kind, ExprKind::GetLocal { index: 0 }));
        assert!(matches!(right.kind, ExprKind::GetLocal { index: 1 }));
    }

    #[test]
    fn nested_operands_fold_into_subtrees() {
        // (a + b) * c
        let body = body_of(
            r#"
            (module (func (param i32 i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add
                local.get 2
                i32.mul))
        "#,
        );
        let ExprKind::Binary { op, left, .. } = &body.kind else {
            panic!("expected Binary, got {body:?}");
        };
        assert_eq!(*op, BinOp::I32Mul);
        assert!(matches!(
            left.kind,
            ExprKind::Binary {
                op: BinOp::I32Add,
                ..
            }
        ));
    }

    #[test]
    fn unused_label_is_dropped() {
        let body = body_of(
            r#"
            (module (func
                (block (nop))))
        "#,
        );
        // The inner block held a single nop and collapsed to it; the
        // function-level frame kept nothing else.
        assert!(matches!(body.kind, ExprKind::Nop));
    }

    #[test]
    fn targeted_label_is_kept() {
        let body = body_of(
            r#"
            (module (func
                (block (br 0))))
        "#,
        );
        let ExprKind::Block { name, list } = &body.kind else {
            panic!("expected Block, got {body:?}");
        };
        let label = name.as_deref().expect("targeted block keeps its label");
        let ExprKind::Break { name: target, .. } = &list[0].kind else {
            panic!("expected Break, got {:?}", list[0]);
        };
        assert_eq!(target, label);
    }

    #[test]
    fn branch_to_loop_is_a_back_edge() {
        let body = body_of(
            r#"
            (module (func
                (loop (br 0))))
        "#,
        );
        let ExprKind::Loop { name, body: inner } = &body.kind else {
            panic!("expected Loop, got {body:?}");
        };
        let label = name.as_deref().expect("targeted loop keeps its label");
        let ExprKind::Break {
            name: target,
            value,
            ..
        } = &inner.kind
        else {
            panic!("expected Break, got {inner:?}");
        };
        assert_eq!(target, label);
        // Back edges carry no value even though the loop has none to give.
        assert!(value.is_none());
    }

    #[test]
    fn branch_out_of_function_targets_wrapper_block() {
        let body = body_of(
            r#"
            (module (func (result i32)
                (br 0 (i32.const 3))))
        "#,
        );
        let ExprKind::Block { name, list } = &body.kind else {
            panic!("expected Block, got {body:?}");
        };
        assert!(name.is_some());
        let ExprKind::Break { value, .. } = &list[0].kind else {
            panic!("expected Break, got {:?}", list[0]);
        };
        assert_eq!(value.as_deref().unwrap().ty, Type::I32);
    }

    #[test]
    fn if_else_with_result() {
        let body = body_of(
            r#"
            (module (func (param i32) (result i32)
                local.get 0
                (if (result i32)
                    (then (i32.const 1))
                    (else (i32.const 2)))))
        "#,
        );
        let ExprKind::If {
            condition,
            if_true,
            if_false,
        } = &body.kind
        else {
            panic!("expected If, got {body:?}");
        };
        assert_eq!(body.ty, Type::I32);
        assert_eq!(condition.ty, Type::I32);
        assert!(matches!(if_true.kind, ExprKind::Const { .. }));
        assert!(matches!(
            if_false.as_deref().unwrap().kind,
            ExprKind::Const { .. }
        ));
    }

    #[test]
    fn code_after_unreachable_decodes_with_synthesized_operands() {
        // The add after unreachable is stack-polymorphic in the binary;
        // the pushed marker becomes one operand and the other is
        // synthesized from the empty stack.
        let body = body_of(
            r#"
            (module (func (result i32)
                unreachable
                i32.add))
        "#,
        );
        let ExprKind::Binary { left, right, .. } = &body.kind else {
            panic!("expected Binary, got {body:?}");
        };
        assert!(left.is_unreachable_node());
        assert!(right.is_unreachable_node());
        assert_eq!(body.ty, Type::Unreachable);
    }

    #[test]
    fn dead_code_after_return_still_decodes() {
        let body = body_of(
            r#"
            (module (func (result i32)
                i32.const 1
                return
                i32.const 2))
        "#,
        );
        let ExprKind::Block { list, .. } = &body.kind else {
            panic!("expected Block, got {body:?}");
        };
        assert!(matches!(list[0].kind, ExprKind::Return { .. }));
        assert!(matches!(list[1].kind, ExprKind::Const { .. }));
    }

    #[test]
    fn buried_value_is_spilled_to_a_scratch_local() {
        // The store's address is computed before the void call, so the
        // reassociation must spill it to keep evaluation order.
        let wasm = wat::parse_str(
            r#"
            (module
                (import "env" "tick" (func))
                (memory 1)
                (func
                    i32.const 8
                    call 0
                    i32.const 5
                    i32.store))
        "#,
        )
        .unwrap();
        let module = parse_module(&wasm).unwrap();
        let func = &module.functions[0];
        assert_eq!(func.locals, vec![Type::I32]);
        let ExprKind::Store { ptr, .. } = &func.body.kind else {
            panic!("expected Store, got {:?}", func.body);
        };
        let ExprKind::Block { list, .. } = &ptr.kind else {
            panic!("expected spill block, got {ptr:?}");
        };
        assert!(matches!(list[0].kind, ExprKind::SetLocal { .. }));
        assert!(matches!(list[1].kind, ExprKind::CallImport { .. }));
        assert!(matches!(list[2].kind, ExprKind::GetLocal { .. }));
        assert_eq!(ptr.ty, Type::I32);
    }

    #[test]
    fn call_import_and_local_call_are_distinguished() {
        let wasm = wat::parse_str(
            r#"
            (module
                (import "env" "log" (func (param i32)))
                (func (param i32)
                    local.get 0
                    call 0
                    local.get 0
                    call 1))
        "#,
        )
        .unwrap();
        let module = parse_module(&wasm).unwrap();
        let ExprKind::Block { list, .. } = &module.functions[0].body.kind else {
            panic!("expected Block");
        };
        assert!(
            matches!(&list[0].kind, ExprKind::CallImport { target, .. } if target == "import0")
        );
        assert!(matches!(&list[1].kind, ExprKind::Call { target, .. } if target == "func0"));
    }

    #[test]
    fn memory_grow_becomes_host_op() {
        let body = body_of(
            r#"
            (module (memory 1) (func (result i32)
                i32.const 1
                memory.grow))
        "#,
        );
        let ExprKind::Host { op, operands } = &body.kind else {
            panic!("expected Host, got {body:?}");
        };
        assert_eq!(*op, HostOp::MemoryGrow);
        assert_eq!(operands.len(), 1);
        assert_eq!(body.ty, Type::I32);
    }

    #[test]
    fn sub_width_load_records_width_and_sign() {
        let body = body_of(
            r#"
            (module (memory 1) (func (result i32)
                i32.const 0
                i32.load8_s offset=4))
        "#,
        );
        let ExprKind::Load {
            bytes,
            signed,
            offset,
            ..
        } = &body.kind
        else {
            panic!("expected Load, got {body:?}");
        };
        assert_eq!(*bytes, 1);
        assert!(*signed);
        assert_eq!(*offset, 4);
    }

    #[test]
    fn local_tee_keeps_value_type() {
        let body = body_of(
            r#"
            (module (func (param i32) (result i32)
                i32.const 7
                local.tee 0))
        "#,
        );
        let ExprKind::SetLocal { index, .. } = &body.kind else {
            panic!("expected SetLocal, got {body:?}");
        };
        assert_eq!(*index, 0);
        assert_eq!(body.ty, Type::I32);
    }

    #[test]
    fn br_table_decodes_to_switch() {
        let body = body_of(
            r#"
            (module (func (param i32)
                (block
                    (block
                        local.get 0
                        br_table 0 1 1))))
        "#,
        );
        // Outermost decoded construct is the outer labeled block.
        let ExprKind::Block { list, .. } = &body.kind else {
            panic!("expected Block, got {body:?}");
        };
        let ExprKind::Block { list: inner, .. } = &list[0].kind else {
            panic!("expected inner Block, got {:?}", list[0]);
        };
        let ExprKind::Switch {
            targets, default, ..
        } = &inner[0].kind
        else {
            panic!("expected Switch, got {:?}", inner[0]);
        };
        assert_eq!(targets.len(), 2);
        assert_ne!(targets[0], targets[1]);
        assert_eq!(default, &targets[1]);
    }
}
