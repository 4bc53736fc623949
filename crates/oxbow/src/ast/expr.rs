//! Tree-form expression IR.
//!
//! A function body is a single [`Expr`] tree. Every node pairs a kind with
//! a cached static type; the type is maintained by construction and, during
//! optimization, by the type updater (which may narrow a type to
//! `unreachable` but never widens it).
//!
//! Children are listed in evaluation order everywhere: the traversal in the
//! optimizer, the text writer, and the binary writer all agree on it, which
//! is what makes effect preservation a purely structural property.

use super::ops::{BinOp, HostOp, UnOp};
use super::types::{Literal, Type};

/// An expression node: a kind plus its cached static type.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

/// The closed set of node kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A sequence of expressions, optionally labeled as a forward branch
    /// target. The last child provides the block's value, if any.
    Block {
        name: Option<String>,
        list: Vec<Expr>,
    },
    /// Conditional. A missing `if_false` arm implicitly falls through.
    If {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Option<Box<Expr>>,
    },
    /// A backward branch target; branches to `name` re-enter the body.
    Loop {
        name: Option<String>,
        body: Box<Expr>,
    },
    /// Branch to an enclosing label. With a `condition` this is `br_if`
    /// (falls through when the condition is zero); `value` is carried to
    /// the target label.
    Break {
        name: String,
        value: Option<Box<Expr>>,
        condition: Option<Box<Expr>>,
    },
    /// Multi-way branch (`br_table`); always transfers control.
    Switch {
        targets: Vec<String>,
        default: String,
        value: Option<Box<Expr>>,
        condition: Box<Expr>,
    },
    /// Call of a function defined in this module.
    Call {
        target: String,
        operands: Vec<Expr>,
    },
    /// Call of an imported function.
    CallImport {
        target: String,
        operands: Vec<Expr>,
    },
    /// Indirect call through the table; `target` is the table index and is
    /// evaluated after the operands.
    CallIndirect {
        type_idx: u32,
        operands: Vec<Expr>,
        target: Box<Expr>,
    },
    GetLocal {
        index: u32,
    },
    /// `local.set` when typed `none`, `local.tee` when typed like `value`.
    SetLocal {
        index: u32,
        value: Box<Expr>,
    },
    GetGlobal {
        index: u32,
    },
    SetGlobal {
        index: u32,
        value: Box<Expr>,
    },
    /// Memory load. `bytes` below the type's width selects a sub-width
    /// access; `align` is the log2 byte alignment hint.
    Load {
        bytes: u8,
        signed: bool,
        offset: u64,
        align: u8,
        ptr: Box<Expr>,
    },
    Store {
        bytes: u8,
        offset: u64,
        align: u8,
        value_ty: Type,
        ptr: Box<Expr>,
        value: Box<Expr>,
    },
    Const {
        value: Literal,
    },
    Unary {
        op: UnOp,
        value: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `if_true` and `if_false` are both evaluated; the condition picks one.
    Select {
        if_true: Box<Expr>,
        if_false: Box<Expr>,
        condition: Box<Expr>,
    },
    /// Evaluate for side effects and discard the value.
    Drop {
        value: Box<Expr>,
    },
    Return {
        value: Option<Box<Expr>>,
    },
    /// Host environment operation (`memory.size` / `memory.grow`).
    Host {
        op: HostOp,
        operands: Vec<Expr>,
    },
    Nop,
    Unreachable,
}

impl Expr {
    /// A bare `unreachable` marker.
    pub fn unreachable() -> Expr {
        Expr {
            kind: ExprKind::Unreachable,
            ty: Type::Unreachable,
        }
    }

    pub fn nop() -> Expr {
        Expr {
            kind: ExprKind::Nop,
            ty: Type::None,
        }
    }

    pub fn const_of(value: Literal) -> Expr {
        Expr {
            ty: value.ty(),
            kind: ExprKind::Const { value },
        }
    }

    pub fn get_local(index: u32, ty: Type) -> Expr {
        Expr {
            kind: ExprKind::GetLocal { index },
            ty,
        }
    }

    /// Wrap `value` so it is evaluated for effects only. An
    /// unreachable-typed operand is passed through verbatim: control never
    /// returns from it, so there is no value to discard.
    pub fn drop_of(value: Expr) -> Expr {
        if value.ty == Type::Unreachable {
            return value;
        }
        Expr {
            kind: ExprKind::Drop {
                value: Box::new(value),
            },
            ty: Type::None,
        }
    }

    /// An unlabeled block with the given children, finalized to `ty`.
    pub fn block_of(list: Vec<Expr>, ty: Type) -> Expr {
        Expr {
            kind: ExprKind::Block { name: None, list },
            ty,
        }
    }

    /// Whether this node is the `Unreachable` marker itself (as opposed to
    /// merely having the unreachable type).
    pub fn is_unreachable_node(&self) -> bool {
        matches!(self.kind, ExprKind::Unreachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_marker() {
        let e = Expr::unreachable();
        assert!(e.is_unreachable_node());
        assert_eq!(e.ty, Type::Unreachable);
    }

    #[test]
    fn drop_wraps_values() {
        let wrapped = Expr::drop_of(Expr::const_of(Literal::I32(1)));
        assert_eq!(wrapped.ty, Type::None);
        match wrapped.kind {
            ExprKind::Drop { value } => assert_eq!(value.ty, Type::I32),
            other => panic!("expected Drop, got {other:?}"),
        }
    }

    #[test]
    fn drop_passes_unreachable_through() {
        let passed = Expr::drop_of(Expr::unreachable());
        assert!(passed.is_unreachable_node());
    }

    #[test]
    fn block_of_takes_given_type() {
        let b = Expr::block_of(
            vec![
                Expr::drop_of(Expr::const_of(Literal::I32(1))),
                Expr::unreachable(),
            ],
            Type::I32,
        );
        assert_eq!(b.ty, Type::I32);
        match b.kind {
            ExprKind::Block { name, list } => {
                assert!(name.is_none());
                assert_eq!(list.len(), 2);
            }
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn typed_marker_vs_marker_node() {
        // A return is unreachable-typed but is not the marker node.
        let ret = Expr {
            kind: ExprKind::Return { value: None },
            ty: Type::Unreachable,
        };
        assert!(!ret.is_unreachable_node());
        assert_eq!(ret.ty, Type::Unreachable);
    }
}
