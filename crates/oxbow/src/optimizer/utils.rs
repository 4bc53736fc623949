//! Shared helpers for optimization passes.

use crate::ast::{Expr, ExprKind};

/// Whether any `Break` or `Switch` anywhere inside `expr` targets `name`.
///
/// Used to guard structural rewrites that would remove a label from the
/// ancestor chain: a labeled construct may only be dissolved when nothing
/// inside it still branches to that label.
pub fn has_branch_to(expr: &Expr, name: &str) -> bool {
    match &expr.kind {
        ExprKind::Break {
            name: target,
            value,
            condition,
        } => {
            target == name
                || value.as_deref().is_some_and(|v| has_branch_to(v, name))
                || condition.as_deref().is_some_and(|c| has_branch_to(c, name))
        }
        ExprKind::Switch {
            targets,
            default,
            value,
            condition,
        } => {
            default == name
                || targets.iter().any(|t| t == name)
                || value.as_deref().is_some_and(|v| has_branch_to(v, name))
                || has_branch_to(condition, name)
        }
        ExprKind::Block { list, .. } => list.iter().any(|c| has_branch_to(c, name)),
        ExprKind::If {
            condition,
            if_true,
            if_false,
        } => {
            has_branch_to(condition, name)
                || has_branch_to(if_true, name)
                || if_false.as_deref().is_some_and(|f| has_branch_to(f, name))
        }
        ExprKind::Loop { body, .. } => has_branch_to(body, name),
        ExprKind::Call { operands, .. }
        | ExprKind::CallImport { operands, .. }
        | ExprKind::Host { operands, .. } => operands.iter().any(|o| has_branch_to(o, name)),
        ExprKind::CallIndirect {
            operands, target, ..
        } => operands.iter().any(|o| has_branch_to(o, name)) || has_branch_to(target, name),
        ExprKind::SetLocal { value, .. }
        | ExprKind::SetGlobal { value, .. }
        | ExprKind::Drop { value }
        | ExprKind::Unary { value, .. } => has_branch_to(value, name),
        ExprKind::Load { ptr, .. } => has_branch_to(ptr, name),
        ExprKind::Store { ptr, value, .. } => {
            has_branch_to(ptr, name) || has_branch_to(value, name)
        }
        ExprKind::Binary { left, right, .. } => {
            has_branch_to(left, name) || has_branch_to(right, name)
        }
        ExprKind::Select {
            if_true,
            if_false,
            condition,
        } => {
            has_branch_to(if_true, name)
                || has_branch_to(if_false, name)
                || has_branch_to(condition, name)
        }
        ExprKind::Return { value } => value.as_deref().is_some_and(|v| has_branch_to(v, name)),
        ExprKind::GetLocal { .. }
        | ExprKind::GetGlobal { .. }
        | ExprKind::Const { .. }
        | ExprKind::Nop
        | ExprKind::Unreachable => false,
    }
}
