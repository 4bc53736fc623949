//! Dead code elimination.
//!
//! The pass keeps a record of when control flow is reachable. When it is
//! not, whole subtrees are collapsed in place to a single `unreachable`
//! marker. When dead code keeps an operation from happening (a store, a
//! call, an add whose operand never completes), the operation is replaced
//! by a block holding only what does happen: the already-evaluated operands
//! are kept (wrapped in `drop`) in their evaluation order, followed by the
//! unreachable operand itself.
//!
//! Structured control flow needs bookkeeping on top of the single
//! `reachable` flag: labeled blocks rejoin reachability from branches that
//! target them, loops discard their back-edge label on exit, and
//! conditionals track each arm's reachability separately so one dead arm
//! does not poison the other.

use std::collections::HashSet;

use anyhow::{bail, Result};

use super::type_updater::TypeUpdater;
use super::utils::has_branch_to;
use crate::ast::{Expr, ExprKind, Function, Type};

/// Rewrite `func`'s body so no unreachable code survives.
///
/// Fails only on malformed input trees (a branch targeting a label that
/// does not enclose it); any well-formed tree is rewritten completely.
pub fn eliminate(func: &mut Function) -> Result<()> {
    let mut pass = Dce {
        reachable: true,
        reachable_breaks: HashSet::new(),
        updater: TypeUpdater::new(&func.body),
    };
    pass.walk(&mut func.body);
    if let Some(name) = pass.reachable_breaks.iter().next() {
        bail!(
            "IR invariant violated: branch to label {:?} never reached an enclosing block",
            name
        );
    }
    Ok(())
}

struct Dce {
    /// Whether the code currently being visited can execute.
    reachable: bool,
    /// Labels with at least one still-reachable branch targeting them.
    reachable_breaks: HashSet<String>,
    updater: TypeUpdater,
}

impl Dce {
    /// Visit `expr` post-order. If control cannot reach it at all, it is
    /// converted in place to an `unreachable` marker without descending;
    /// a node that already is the marker is left intact.
    fn walk(&mut self, expr: &mut Expr) {
        if !self.reachable {
            if !expr.is_unreachable_node() {
                self.updater.note_recursive_removal(expr);
                *expr = Expr::unreachable();
            }
            return;
        }
        match &mut expr.kind {
            // Conditionals fork reachability per arm and rejoin after:
            // the post-if flag is true iff at least one arm can fall
            // through (a missing else falls through implicitly).
            ExprKind::If {
                condition,
                if_true,
                if_false,
            } => {
                self.walk(condition);
                let fork = self.reachable;
                self.walk(if_true);
                if let Some(if_false) = if_false {
                    let after_true = self.reachable;
                    self.reachable = fork;
                    self.walk(if_false);
                    self.reachable = self.reachable || after_true;
                } else {
                    self.reachable = self.reachable || fork;
                }
            }
            ExprKind::Block { list, .. } => {
                for item in list.iter_mut() {
                    self.walk(item);
                }
            }
            ExprKind::Loop { body, .. } => self.walk(body),
            ExprKind::Break {
                value, condition, ..
            } => {
                if let Some(v) = value {
                    self.walk(v);
                }
                if let Some(c) = condition {
                    self.walk(c);
                }
            }
            ExprKind::Switch {
                value, condition, ..
            } => {
                if let Some(v) = value {
                    self.walk(v);
                }
                self.walk(condition);
            }
            ExprKind::Call { operands, .. }
            | ExprKind::CallImport { operands, .. }
            | ExprKind::Host { operands, .. } => {
                for op in operands.iter_mut() {
                    self.walk(op);
                }
            }
            ExprKind::CallIndirect {
                operands, target, ..
            } => {
                for op in operands.iter_mut() {
                    self.walk(op);
                }
                self.walk(target);
            }
            ExprKind::SetLocal { value, .. }
            | ExprKind::SetGlobal { value, .. }
            | ExprKind::Drop { value }
            | ExprKind::Unary { value, .. } => self.walk(value),
            ExprKind::Load { ptr, .. } => self.walk(ptr),
            ExprKind::Store { ptr, value, .. } => {
                self.walk(ptr);
                self.walk(value);
            }
            ExprKind::Binary { left, right, .. } => {
                self.walk(left);
                self.walk(right);
            }
            ExprKind::Select {
                if_true,
                if_false,
                condition,
            } => {
                self.walk(if_true);
                self.walk(if_false);
                self.walk(condition);
            }
            ExprKind::Return { value } => {
                if let Some(v) = value {
                    self.walk(v);
                }
            }
            ExprKind::GetLocal { .. }
            | ExprKind::GetGlobal { .. }
            | ExprKind::Const { .. }
            | ExprKind::Nop
            | ExprKind::Unreachable => {}
        }
        self.visit(expr);
    }

    fn visit(&mut self, expr: &mut Expr) {
        match expr.kind {
            ExprKind::Block { .. } => self.visit_block(expr),
            ExprKind::If { .. } => self.visit_if(expr),
            ExprKind::Loop { .. } => self.visit_loop(expr),
            ExprKind::Break { .. } => self.visit_break(expr),
            ExprKind::Switch { .. } => self.visit_switch(expr),
            ExprKind::Call { .. } | ExprKind::CallImport { .. } | ExprKind::Host { .. } => {
                self.rewrite_dead_operand_list(expr);
            }
            ExprKind::CallIndirect { .. } => self.visit_call_indirect(expr),
            ExprKind::SetLocal { .. }
            | ExprKind::SetGlobal { .. }
            | ExprKind::Drop { .. }
            | ExprKind::Unary { .. }
            | ExprKind::Load { .. } => self.replace_with_dead_sole_operand(expr),
            ExprKind::Store { .. } => self.visit_store(expr),
            ExprKind::Binary { .. } => self.visit_binary(expr),
            ExprKind::Select { .. } => self.visit_select(expr),
            ExprKind::Return { .. } => self.visit_return(expr),
            ExprKind::Unreachable => self.reachable = false,
            ExprKind::GetLocal { .. }
            | ExprKind::GetGlobal { .. }
            | ExprKind::Const { .. }
            | ExprKind::Nop => {}
        }
    }

    fn add_break(&mut self, name: &str) {
        // Normally dead branches were already pruned upstream, but a block
        // like (block (result i32) (call $x) (unreachable)) keeps its
        // concrete type while turning the flag off, so a branch visited
        // after it must not be recorded.
        if self.reachable {
            self.reachable_breaks.insert(name.to_string());
        }
    }

    fn visit_block(&mut self, expr: &mut Expr) {
        let ExprKind::Block { name, list } = &mut expr.kind else {
            unreachable!()
        };
        // A dead tail can only exist when the flag is already off; cut the
        // list at the first unreachable child.
        if !self.reachable && list.len() > 1 {
            if let Some(pos) = list.iter().position(|c| c.ty == Type::Unreachable) {
                list.truncate(pos + 1);
            }
        }
        if let Some(n) = name {
            let joined = self.reachable_breaks.remove(n.as_str());
            self.reachable = self.reachable || joined;
        }
        let collapse = list.len() == 1
            && list[0].ty == Type::Unreachable
            && !name.as_deref().is_some_and(|n| has_branch_to(&list[0], n));
        if collapse {
            let ExprKind::Block { mut list, .. } =
                std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = list.remove(0);
        } else {
            self.updater.maybe_update_type_to_unreachable(expr);
        }
    }

    fn visit_if(&mut self, expr: &mut Expr) {
        // Arm reachability was already rejoined during the walk.
        let ExprKind::If { condition, .. } = &expr.kind else {
            unreachable!()
        };
        if condition.ty == Type::Unreachable {
            // Both arms were gated down to bare markers; only the
            // condition's effects remain.
            let ExprKind::If { condition, .. } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = *condition;
        } else {
            self.updater.maybe_update_type_to_unreachable(expr);
        }
    }

    fn visit_loop(&mut self, expr: &mut Expr) {
        let ExprKind::Loop { name, body } = &mut expr.kind else {
            unreachable!()
        };
        if let Some(n) = name {
            // A back-edge branch does not rejoin straight-line flow.
            self.reachable_breaks.remove(n.as_str());
        }
        let replace = body.ty == Type::Unreachable
            && !name.as_deref().is_some_and(|n| has_branch_to(body, n));
        if replace {
            let ExprKind::Loop { body, .. } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = *body;
        }
    }

    fn visit_break(&mut self, expr: &mut Expr) {
        let ExprKind::Break {
            name,
            value,
            condition,
        } = &expr.kind
        else {
            unreachable!()
        };
        // The condition is evaluated last, so an unreachable value takes
        // the whole branch with it.
        if value.as_deref().is_some_and(|v| v.ty == Type::Unreachable) {
            self.updater.note_replacement(&expr.kind);
            let ExprKind::Break {
                value: Some(value), ..
            } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = *value;
            return;
        }
        if condition.as_deref().is_some_and(|c| c.ty == Type::Unreachable) {
            self.updater.note_replacement(&expr.kind);
            let ty = expr.ty;
            let ExprKind::Break {
                value,
                condition: Some(condition),
                ..
            } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            let condition = *condition;
            *expr = match value {
                // The carried value was evaluated first; keep its effects.
                Some(v) => Expr::block_of(vec![Expr::drop_of(*v), condition], ty),
                None => condition,
            };
            return;
        }
        self.add_break(name);
        if condition.is_none() {
            self.reachable = false;
        }
    }

    fn visit_switch(&mut self, expr: &mut Expr) {
        let ExprKind::Switch {
            value, condition, ..
        } = &expr.kind
        else {
            unreachable!()
        };
        if value.as_deref().is_some_and(|v| v.ty == Type::Unreachable) {
            self.updater.note_replacement(&expr.kind);
            let ExprKind::Switch {
                value: Some(value), ..
            } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = *value;
            return;
        }
        if condition.ty == Type::Unreachable {
            self.updater.note_replacement(&expr.kind);
            let ty = expr.ty;
            let ExprKind::Switch {
                value, condition, ..
            } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = match value {
                Some(v) => Expr::block_of(vec![Expr::drop_of(*v), *condition], ty),
                None => *condition,
            };
            return;
        }
        let ExprKind::Switch {
            targets, default, ..
        } = &expr.kind
        else {
            unreachable!()
        };
        for t in targets {
            self.add_break(t);
        }
        self.add_break(default);
        self.reachable = false;
    }

    fn visit_return(&mut self, expr: &mut Expr) {
        let ExprKind::Return { value } = &expr.kind else {
            unreachable!()
        };
        if value.as_deref().is_some_and(|v| v.ty == Type::Unreachable) {
            let ExprKind::Return {
                value: Some(value), ..
            } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = *value;
            return;
        }
        self.reachable = false;
    }

    /// Shared rule for `Call`, `CallImport`, and `Host`: the first
    /// unreachable operand ends the call. Earlier operands were evaluated,
    /// so they are kept under drops; later operands never happen.
    /// Returns whether a rewrite took place.
    fn rewrite_dead_operand_list(&mut self, expr: &mut Expr) -> bool {
        let operands = call_operands(&expr.kind);
        let Some(i) = operands.iter().position(|o| o.ty == Type::Unreachable) else {
            return false;
        };
        self.updater.note_replacement(&expr.kind);
        let ty = expr.ty;
        let mut operands = take_call_operands(std::mem::replace(&mut expr.kind, ExprKind::Nop));
        if i == 0 {
            *expr = operands.remove(0);
        } else {
            operands.truncate(i + 1);
            let list = operands.into_iter().map(Expr::drop_of).collect();
            *expr = Expr::block_of(list, ty);
        }
        true
    }

    fn visit_call_indirect(&mut self, expr: &mut Expr) {
        if self.rewrite_dead_operand_list(expr) {
            return;
        }
        let ExprKind::CallIndirect { target, .. } = &expr.kind else {
            unreachable!()
        };
        // The table index is evaluated after the operands, so all of them
        // are preserved when it cannot complete.
        if target.ty == Type::Unreachable {
            self.updater.note_replacement(&expr.kind);
            let ty = expr.ty;
            let ExprKind::CallIndirect {
                operands, target, ..
            } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            let mut list: Vec<Expr> = operands.into_iter().map(Expr::drop_of).collect();
            list.push(*target);
            *expr = Expr::block_of(list, ty);
        }
    }

    fn visit_store(&mut self, expr: &mut Expr) {
        let ExprKind::Store { ptr, value, .. } = &expr.kind else {
            unreachable!()
        };
        if ptr.ty == Type::Unreachable {
            let ExprKind::Store { ptr, .. } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = *ptr;
            return;
        }
        if value.ty == Type::Unreachable {
            let ty = expr.ty;
            let ExprKind::Store { ptr, value, .. } =
                std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = Expr::block_of(vec![Expr::drop_of(*ptr), *value], ty);
        }
    }

    fn visit_binary(&mut self, expr: &mut Expr) {
        let ExprKind::Binary { left, right, .. } = &expr.kind else {
            unreachable!()
        };
        if left.ty == Type::Unreachable {
            let ExprKind::Binary { left, .. } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = *left;
            return;
        }
        if right.ty == Type::Unreachable {
            let ty = expr.ty;
            let ExprKind::Binary { left, right, .. } =
                std::mem::replace(&mut expr.kind, ExprKind::Nop)
            else {
                unreachable!()
            };
            *expr = Expr::block_of(vec![Expr::drop_of(*left), *right], ty);
        }
    }

    fn visit_select(&mut self, expr: &mut Expr) {
        let ExprKind::Select {
            if_true,
            if_false,
            condition,
        } = &expr.kind
        else {
            unreachable!()
        };
        let (t, f, c) = (if_true.ty, if_false.ty, condition.ty);
        if t != Type::Unreachable && f != Type::Unreachable && c != Type::Unreachable {
            return;
        }
        let ty = expr.ty;
        let ExprKind::Select {
            if_true,
            if_false,
            condition,
        } = std::mem::replace(&mut expr.kind, ExprKind::Nop)
        else {
            unreachable!()
        };
        *expr = if t == Type::Unreachable {
            *if_true
        } else if f == Type::Unreachable {
            Expr::block_of(vec![Expr::drop_of(*if_true), *if_false], ty)
        } else {
            Expr::block_of(
                vec![
                    Expr::drop_of(*if_true),
                    Expr::drop_of(*if_false),
                    *condition,
                ],
                ty,
            )
        };
    }

    /// `Unary`, `SetLocal`, `SetGlobal`, `Drop`, `Load`: a single consumed
    /// operand (the pointer, for loads). If it cannot complete, the whole
    /// node is just that operand.
    fn replace_with_dead_sole_operand(&mut self, expr: &mut Expr) {
        let operand = match &expr.kind {
            ExprKind::SetLocal { value, .. }
            | ExprKind::SetGlobal { value, .. }
            | ExprKind::Drop { value }
            | ExprKind::Unary { value, .. } => value,
            ExprKind::Load { ptr, .. } => ptr,
            _ => unreachable!(),
        };
        if operand.ty != Type::Unreachable {
            return;
        }
        let kind = std::mem::replace(&mut expr.kind, ExprKind::Nop);
        *expr = match kind {
            ExprKind::SetLocal { value, .. }
            | ExprKind::SetGlobal { value, .. }
            | ExprKind::Drop { value }
            | ExprKind::Unary { value, .. } => *value,
            ExprKind::Load { ptr, .. } => *ptr,
            _ => unreachable!(),
        };
    }
}

/// Operand list of a call-like node.
fn call_operands(kind: &ExprKind) -> &[Expr] {
    match kind {
        ExprKind::Call { operands, .. }
        | ExprKind::CallImport { operands, .. }
        | ExprKind::CallIndirect { operands, .. }
        | ExprKind::Host { operands, .. } => operands,
        _ => unreachable!(),
    }
}

fn take_call_operands(kind: ExprKind) -> Vec<Expr> {
    match kind {
        ExprKind::Call { operands, .. }
        | ExprKind::CallImport { operands, .. }
        | ExprKind::CallIndirect { operands, .. }
        | ExprKind::Host { operands, .. } => operands,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Literal};

    fn func(body: Expr) -> Function {
        Function {
            name: "f".to_string(),
            type_idx: 0,
            locals: vec![],
            body,
        }
    }

    fn run(body: Expr) -> Expr {
        let mut f = func(body);
        eliminate(&mut f).unwrap();
        f.body
    }

    fn call_none(target: &str) -> Expr {
        Expr {
            kind: ExprKind::Call {
                target: target.to_string(),
                operands: vec![],
            },
            ty: Type::None,
        }
    }

    fn const_i32(v: i32) -> Expr {
        Expr::const_of(Literal::I32(v))
    }

    fn labeled_block(name: &str, list: Vec<Expr>, ty: Type) -> Expr {
        Expr {
            kind: ExprKind::Block {
                name: Some(name.to_string()),
                list,
            },
            ty,
        }
    }

    fn br(name: &str) -> Expr {
        Expr {
            kind: ExprKind::Break {
                name: name.to_string(),
                value: None,
                condition: None,
            },
            ty: Type::Unreachable,
        }
    }

    fn br_if(name: &str, condition: Expr) -> Expr {
        Expr {
            kind: ExprKind::Break {
                name: name.to_string(),
                value: None,
                condition: Some(Box::new(condition)),
            },
            ty: Type::None,
        }
    }

    fn if_else(condition: Expr, if_true: Expr, if_false: Option<Expr>, ty: Type) -> Expr {
        Expr {
            kind: ExprKind::If {
                condition: Box::new(condition),
                if_true: Box::new(if_true),
                if_false: if_false.map(Box::new),
            },
            ty,
        }
    }

    // ── Block truncation and narrowing ───────────────────────────────────

    #[test]
    fn trailing_statements_after_unreachable_are_cut() {
        // Block(i32)[call $x, unreachable, const 7]
        let body = Expr::block_of(
            vec![call_none("x"), Expr::unreachable(), const_i32(7)],
            Type::I32,
        );
        let out = run(body);
        assert_eq!(out.ty, Type::Unreachable);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(list.len(), 2);
        assert!(matches!(list[0].kind, ExprKind::Call { .. }));
        assert!(list[1].is_unreachable_node());
    }

    #[test]
    fn statements_after_return_are_removed() {
        // The deep subtree behind the return is never descended into; it
        // collapses to a single marker, which truncation then cuts away.
        let dead = Expr {
            ty: Type::None,
            kind: ExprKind::Drop {
                value: Box::new(Expr {
                    ty: Type::I32,
                    kind: ExprKind::Binary {
                        op: BinOp::I32Add,
                        left: Box::new(const_i32(1)),
                        right: Box::new(const_i32(2)),
                    },
                }),
            },
        };
        let body = Expr::block_of(
            vec![
                call_none("x"),
                Expr {
                    kind: ExprKind::Return { value: None },
                    ty: Type::Unreachable,
                },
                dead,
            ],
            Type::None,
        );
        let out = run(body);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(list.len(), 2);
        assert!(matches!(list[0].kind, ExprKind::Call { .. }));
        assert!(matches!(list[1].kind, ExprKind::Return { .. }));
    }

    #[test]
    fn single_unreachable_child_block_collapses() {
        let body = Expr::block_of(vec![Expr::unreachable()], Type::None);
        let out = run(body);
        assert!(out.is_unreachable_node());
    }

    #[test]
    fn labeled_block_with_branch_into_child_does_not_collapse() {
        // block $l [ if c then br $l else unreachable ] — the single child
        // is unreachable-typed but still branches to $l, so the block must
        // survive to keep the label in scope.
        let child = if_else(
            Expr::get_local(0, Type::I32),
            br("l"),
            Some(Expr::unreachable()),
            Type::Unreachable,
        );
        let body = labeled_block("l", vec![child], Type::None);
        let out = run(body);
        assert!(matches!(&out.kind, ExprKind::Block { name: Some(n), .. } if n == "l"));
    }

    // ── Operator rewrites ────────────────────────────────────────────────

    #[test]
    fn binary_with_unreachable_right_keeps_left_effects() {
        // Binary(add, const 1, unreachable) → Block(i32)[drop(const 1), unreachable]
        let body = Expr {
            ty: Type::I32,
            kind: ExprKind::Binary {
                op: BinOp::I32Add,
                left: Box::new(const_i32(1)),
                right: Box::new(Expr::unreachable()),
            },
        };
        let out = run(body);
        assert_eq!(out.ty, Type::I32);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(list.len(), 2);
        assert!(matches!(list[0].kind, ExprKind::Drop { .. }));
        assert!(list[1].is_unreachable_node());
    }

    #[test]
    fn binary_with_unreachable_left_is_replaced_by_it() {
        let body = Expr {
            ty: Type::I32,
            kind: ExprKind::Binary {
                op: BinOp::I32Add,
                left: Box::new(Expr::unreachable()),
                right: Box::new(const_i32(2)),
            },
        };
        let out = run(body);
        assert!(out.is_unreachable_node());
    }

    #[test]
    fn call_with_dead_middle_operand_drops_the_tail() {
        // Call $f (const 1, unreachable, const 3) : i64
        //   → Block(i64)[drop(const 1), unreachable]
        let body = Expr {
            ty: Type::I64,
            kind: ExprKind::Call {
                target: "f".to_string(),
                operands: vec![const_i32(1), Expr::unreachable(), const_i32(3)],
            },
        };
        let out = run(body);
        assert_eq!(out.ty, Type::I64);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(list.len(), 2);
        assert!(matches!(list[0].kind, ExprKind::Drop { .. }));
        assert!(list[1].is_unreachable_node());
    }

    #[test]
    fn call_with_dead_first_operand_becomes_it() {
        let body = Expr {
            ty: Type::I64,
            kind: ExprKind::Call {
                target: "f".to_string(),
                operands: vec![Expr::unreachable(), const_i32(3)],
            },
        };
        let out = run(body);
        assert!(out.is_unreachable_node());
    }

    #[test]
    fn call_indirect_with_dead_target_preserves_all_operands() {
        let body = Expr {
            ty: Type::None,
            kind: ExprKind::CallIndirect {
                type_idx: 0,
                operands: vec![const_i32(1), const_i32(2)],
                target: Box::new(Expr::unreachable()),
            },
        };
        let out = run(body);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(list.len(), 3);
        assert!(matches!(list[0].kind, ExprKind::Drop { .. }));
        assert!(matches!(list[1].kind, ExprKind::Drop { .. }));
        assert!(list[2].is_unreachable_node());
    }

    #[test]
    fn select_with_dead_condition_drops_both_values() {
        let body = Expr {
            ty: Type::I32,
            kind: ExprKind::Select {
                if_true: Box::new(const_i32(1)),
                if_false: Box::new(const_i32(2)),
                condition: Box::new(Expr::unreachable()),
            },
        };
        let out = run(body);
        assert_eq!(out.ty, Type::I32);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(list.len(), 3);
        assert!(matches!(list[0].kind, ExprKind::Drop { .. }));
        assert!(matches!(list[1].kind, ExprKind::Drop { .. }));
        assert!(list[2].is_unreachable_node());
    }

    #[test]
    fn store_with_dead_value_keeps_pointer_effects() {
        let body = Expr {
            ty: Type::None,
            kind: ExprKind::Store {
                bytes: 4,
                offset: 0,
                align: 2,
                value_ty: Type::I32,
                ptr: Box::new(const_i32(16)),
                value: Box::new(Expr::unreachable()),
            },
        };
        let out = run(body);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(list.len(), 2);
        assert!(matches!(list[0].kind, ExprKind::Drop { .. }));
    }

    #[test]
    fn drop_of_unreachable_operand_is_unwrapped() {
        let body = Expr {
            ty: Type::None,
            kind: ExprKind::Drop {
                value: Box::new(Expr::unreachable()),
            },
        };
        assert!(run(body).is_unreachable_node());
    }

    // ── Conditionals ─────────────────────────────────────────────────────

    #[test]
    fn if_with_unreachable_condition_becomes_condition() {
        let body = if_else(
            Expr::unreachable(),
            const_i32(1),
            Some(const_i32(2)),
            Type::I32,
        );
        let out = run(body);
        assert!(out.is_unreachable_node());
    }

    #[test]
    fn fallthrough_else_keeps_following_code_alive() {
        // if c { return 5 } else { nop }; const 9 — the else arm falls
        // through, so the trailing constant survives.
        let cond = if_else(
            Expr::get_local(0, Type::I32),
            Expr {
                kind: ExprKind::Return {
                    value: Some(Box::new(const_i32(5))),
                },
                ty: Type::Unreachable,
            },
            Some(Expr::nop()),
            Type::None,
        );
        let body = Expr::block_of(vec![cond, const_i32(9)], Type::I32);
        let out = run(body);
        assert_eq!(out.ty, Type::I32);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(list.len(), 2);
        assert!(matches!(list[1].kind, ExprKind::Const { .. }));
    }

    #[test]
    fn both_dead_arms_kill_following_code() {
        let both_dead = if_else(
            Expr::get_local(0, Type::I32),
            Expr {
                kind: ExprKind::Return { value: None },
                ty: Type::Unreachable,
            },
            Some(Expr::unreachable()),
            Type::None,
        );
        let body = Expr::block_of(vec![both_dead, call_none("x")], Type::None);
        let out = run(body);
        // The trailing call is truncated away behind the narrowed if, and
        // the now-singleton block collapses to the if itself.
        assert_eq!(out.ty, Type::Unreachable);
        assert!(matches!(out.kind, ExprKind::If { .. }));
    }

    #[test]
    fn one_dead_arm_does_not_poison_the_other() {
        let body = if_else(
            Expr::get_local(0, Type::I32),
            Expr::unreachable(),
            Some(Expr::drop_of(const_i32(1))),
            Type::None,
        );
        let out = run(body);
        let ExprKind::If {
            if_true, if_false, ..
        } = &out.kind
        else {
            panic!("expected If, got {out:?}");
        };
        assert!(if_true.is_unreachable_node());
        assert!(matches!(
            if_false.as_deref().unwrap().kind,
            ExprKind::Drop { .. }
        ));
    }

    // ── Loops ────────────────────────────────────────────────────────────

    #[test]
    fn loop_with_unreachable_body_and_no_back_edge_is_replaced() {
        let body = Expr {
            ty: Type::None,
            kind: ExprKind::Loop {
                name: Some("l".to_string()),
                body: Box::new(Expr::unreachable()),
            },
        };
        let out = run(body);
        assert!(out.is_unreachable_node());
    }

    #[test]
    fn loop_with_back_edge_survives() {
        // loop $l { br $l } — the body is unreachable-typed but branches
        // back to the loop's own label.
        let body = Expr {
            ty: Type::None,
            kind: ExprKind::Loop {
                name: Some("l".to_string()),
                body: Box::new(br("l")),
            },
        };
        let out = run(body);
        assert!(matches!(&out.kind, ExprKind::Loop { .. }));
    }

    // ── Branches ─────────────────────────────────────────────────────────

    #[test]
    fn unconditional_break_kills_following_code() {
        let body = labeled_block("out", vec![br("out"), call_none("x")], Type::None);
        let out = run(body);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        // The dead call is truncated away entirely; the branch rejoins at
        // the block exit, so the block itself is not narrowed.
        assert_eq!(list.len(), 1);
        assert!(matches!(list[0].kind, ExprKind::Break { .. }));
        assert_eq!(out.ty, Type::None);
    }

    #[test]
    fn conditional_break_falls_through() {
        let body = labeled_block(
            "out",
            vec![br_if("out", Expr::get_local(0, Type::I32)), call_none("x")],
            Type::None,
        );
        let out = run(body);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(list.len(), 2);
        assert!(matches!(list[1].kind, ExprKind::Call { .. }));
    }

    #[test]
    fn break_with_unreachable_condition_keeps_value_effects() {
        let brk = Expr {
            ty: Type::I32,
            kind: ExprKind::Break {
                name: "out".to_string(),
                value: Some(Box::new(const_i32(3))),
                condition: Some(Box::new(Expr::unreachable())),
            },
        };
        let body = labeled_block("out", vec![brk], Type::I32);
        let out = run(body);
        let ExprKind::Block { list, name } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        assert_eq!(name.as_deref(), Some("out"));
        // The br_if became {drop(value), condition} typed i32.
        let ExprKind::Block {
            list: inner,
            name: None,
        } = &list[0].kind
        else {
            panic!("expected inner block, got {:?}", list[0]);
        };
        assert_eq!(list[0].ty, Type::I32);
        assert!(matches!(inner[0].kind, ExprKind::Drop { .. }));
        assert!(inner[1].is_unreachable_node());
    }

    #[test]
    fn switch_records_all_targets_and_stops_flow() {
        let sw = Expr {
            ty: Type::Unreachable,
            kind: ExprKind::Switch {
                targets: vec!["a".to_string(), "b".to_string()],
                default: "b".to_string(),
                value: None,
                condition: Box::new(Expr::get_local(0, Type::I32)),
            },
        };
        let inner = labeled_block("a", vec![sw, call_none("dead")], Type::None);
        let body = labeled_block("b", vec![inner, call_none("after_a")], Type::None);
        let out = run(body);
        let ExprKind::Block { list, .. } = &out.kind else {
            panic!("expected Block, got {out:?}");
        };
        // Code after the switch inside $a is gone; code after $a (a branch
        // target) is alive.
        let ExprKind::Block { list: a_list, .. } = &list[0].kind else {
            panic!("expected inner block, got {:?}", list[0]);
        };
        assert_eq!(a_list.len(), 1);
        assert!(matches!(a_list[0].kind, ExprKind::Switch { .. }));
        assert!(matches!(list[1].kind, ExprKind::Call { .. }));
    }

    #[test]
    fn break_to_unknown_label_is_an_error() {
        let body = Expr::block_of(vec![br("nowhere")], Type::None);
        let mut f = func(body);
        assert!(eliminate(&mut f).is_err());
    }

    // ── Pass-level properties ────────────────────────────────────────────

    #[test]
    fn idempotent_on_rewritten_trees() {
        let build = || {
            Expr::block_of(
                vec![
                    call_none("x"),
                    Expr::unreachable(),
                    const_i32(7),
                    call_none("y"),
                ],
                Type::None,
            )
        };
        let once = run(build());
        let mut f = func(once.clone());
        eliminate(&mut f).unwrap();
        assert_eq!(f.body, once);
    }

    #[test]
    fn clean_code_is_untouched() {
        let body = Expr::block_of(
            vec![
                Expr::drop_of(Expr {
                    ty: Type::I32,
                    kind: ExprKind::Binary {
                        op: BinOp::I32Add,
                        left: Box::new(const_i32(1)),
                        right: Box::new(const_i32(2)),
                    },
                }),
                call_none("x"),
            ],
            Type::None,
        );
        let out = run(body.clone());
        assert_eq!(out, body);
    }

    #[test]
    fn no_block_keeps_children_past_an_unreachable_one() {
        // Deeply mixed input; afterwards, no block may contain an
        // unreachable-typed child followed by anything else.
        let body = Expr::block_of(
            vec![
                labeled_block(
                    "a",
                    vec![br_if("a", Expr::get_local(0, Type::I32)), call_none("x")],
                    Type::None,
                ),
                Expr {
                    kind: ExprKind::Return { value: None },
                    ty: Type::Unreachable,
                },
                call_none("y"),
                call_none("z"),
            ],
            Type::None,
        );
        fn check(e: &Expr) {
            if let ExprKind::Block { list, .. } = &e.kind {
                for (i, c) in list.iter().enumerate() {
                    assert!(
                        c.ty != Type::Unreachable || i == list.len() - 1,
                        "unreachable child not last: {e:?}"
                    );
                }
            }
            match &e.kind {
                ExprKind::Block { list, .. } => list.iter().for_each(check),
                ExprKind::Loop { body, .. } => check(body),
                _ => {}
            }
        }
        let out = run(body);
        check(&out);
    }
}
