//! Incremental type maintenance for in-place tree edits.
//!
//! The updater keeps one piece of derived state: for each label, how many
//! `Break`/`Switch` nodes in the tree structurally target it. That count
//! decides whether a labeled block can be narrowed to the unreachable type
//! (a block with live branch targets can still be entered from the side,
//! so it must keep its declared type).
//!
//! Three operations keep the state and the cached node types consistent
//! while the walker rewrites the tree:
//!
//! - [`note_recursive_removal`](TypeUpdater::note_recursive_removal):
//!   a whole subtree is about to be overwritten; forget every branch in it.
//! - [`note_replacement`](TypeUpdater::note_replacement): a node is being
//!   dismantled and replaced by a new node built from its own operands;
//!   the operands keep their counts, only the node's own targets go away.
//!   Upward propagation of the resulting type change happens as the
//!   walker's recursion unwinds, where each composite ancestor re-derives
//!   its own type.
//! - [`maybe_update_type_to_unreachable`](TypeUpdater::maybe_update_type_to_unreachable):
//!   after an in-place mutation, narrow the node's own type if its
//!   children now force it. Types are only ever narrowed, never widened.

use std::collections::HashMap;

use crate::ast::{Expr, ExprKind, Type};

/// Branch-target bookkeeping plus type narrowing for one function body.
pub struct TypeUpdater {
    /// label → number of `Break`/`Switch` nodes targeting it.
    branch_counts: HashMap<String, usize>,
}

impl TypeUpdater {
    /// Scan `body` and record every branch target.
    pub fn new(body: &Expr) -> Self {
        let mut updater = TypeUpdater {
            branch_counts: HashMap::new(),
        };
        updater.scan(body);
        updater
    }

    fn scan(&mut self, expr: &Expr) {
        self.for_each_target(&expr.kind, |counts, name| {
            *counts.entry(name.to_string()).or_insert(0) += 1;
        });
        each_child(expr, |child| self.scan(child));
    }

    /// Whether any branch still targets `name`.
    pub fn has_branches_to(&self, name: &str) -> bool {
        self.branch_counts.contains_key(name)
    }

    /// A subtree is about to be overwritten in place; drop the counts of
    /// every branch inside it.
    pub fn note_recursive_removal(&mut self, expr: &Expr) {
        self.for_each_target(&expr.kind, |counts, name| {
            Self::decrement(counts, name);
        });
        each_child(expr, |child| self.note_recursive_removal(child));
    }

    /// A node is being replaced by a rewrite that reuses its operands.
    /// Only the dismantled node's own branch targets are dropped; anything
    /// inside the operands lives on in the replacement.
    pub fn note_replacement(&mut self, replaced: &ExprKind) {
        self.for_each_target(replaced, |counts, name| {
            Self::decrement(counts, name);
        });
    }

    /// Narrow `expr`'s cached type to `unreachable` if its children force
    /// it: a block whose final child is unreachable with no branch still
    /// targeting its label, an if whose condition is unreachable or whose
    /// both arms are, or a loop whose body is unreachable with no
    /// back-edge.
    pub fn maybe_update_type_to_unreachable(&mut self, expr: &mut Expr) {
        if expr.ty == Type::Unreachable {
            return;
        }
        let narrow = match &expr.kind {
            ExprKind::Block { name, list } => {
                let joined = name.as_deref().is_some_and(|n| self.has_branches_to(n));
                !joined && list.last().is_some_and(|c| c.ty == Type::Unreachable)
            }
            ExprKind::If {
                condition,
                if_true,
                if_false,
            } => {
                condition.ty == Type::Unreachable
                    || if_false.as_deref().is_some_and(|f| {
                        if_true.ty == Type::Unreachable && f.ty == Type::Unreachable
                    })
            }
            ExprKind::Loop { name, body } => {
                let back_edge = name.as_deref().is_some_and(|n| self.has_branches_to(n));
                !back_edge && body.ty == Type::Unreachable
            }
            _ => false,
        };
        if narrow {
            expr.ty = Type::Unreachable;
        }
    }

    /// Apply `f` to every label the node itself targets (not its children).
    fn for_each_target<F>(&mut self, kind: &ExprKind, mut f: F)
    where
        F: FnMut(&mut HashMap<String, usize>, &str),
    {
        match kind {
            ExprKind::Break { name, .. } => f(&mut self.branch_counts, name),
            ExprKind::Switch {
                targets, default, ..
            } => {
                for t in targets {
                    f(&mut self.branch_counts, t);
                }
                f(&mut self.branch_counts, default);
            }
            _ => {}
        }
    }

    fn decrement(counts: &mut HashMap<String, usize>, name: &str) {
        match counts.get_mut(name) {
            Some(c) if *c > 1 => *c -= 1,
            Some(_) => {
                counts.remove(name);
            }
            None => debug_assert!(false, "branch count underflow for label {name}"),
        }
    }
}

/// Apply `f` to each direct child, in evaluation order.
fn each_child<F: FnMut(&Expr)>(expr: &Expr, mut f: F) {
    match &expr.kind {
        ExprKind::Block { list, .. } => list.iter().for_each(f),
        ExprKind::If {
            condition,
            if_true,
            if_false,
        } => {
            f(condition);
            f(if_true);
            if let Some(e) = if_false {
                f(e);
            }
        }
        ExprKind::Loop { body, .. } => f(body),
        ExprKind::Break {
            value, condition, ..
        } => {
            if let Some(v) = value {
                f(v);
            }
            if let Some(c) = condition {
                f(c);
            }
        }
        ExprKind::Switch {
            value, condition, ..
        } => {
            if let Some(v) = value {
                f(v);
            }
            f(condition);
        }
        ExprKind::Call { operands, .. }
        | ExprKind::CallImport { operands, .. }
        | ExprKind::Host { operands, .. } => operands.iter().for_each(f),
        ExprKind::CallIndirect {
            operands, target, ..
        } => {
            operands.iter().for_each(&mut f);
            f(target);
        }
        ExprKind::SetLocal { value, .. }
        | ExprKind::SetGlobal { value, .. }
        | ExprKind::Drop { value }
        | ExprKind::Unary { value, .. } => f(value),
        ExprKind::Load { ptr, .. } => f(ptr),
        ExprKind::Store { ptr, value, .. } => {
            f(ptr);
            f(value);
        }
        ExprKind::Binary { left, right, .. } => {
            f(left);
            f(right);
        }
        ExprKind::Select {
            if_true,
            if_false,
            condition,
        } => {
            f(if_true);
            f(if_false);
            f(condition);
        }
        ExprKind::Return { value } => {
            if let Some(v) = value {
                f(v);
            }
        }
        ExprKind::GetLocal { .. }
        | ExprKind::GetGlobal { .. }
        | ExprKind::Const { .. }
        | ExprKind::Nop
        | ExprKind::Unreachable => {}
    }
}
