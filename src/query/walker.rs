//! AST traversal
//!
//! [`walk`] drives an [`AstVisitor`] depth-first and emits nodes in source
//! order: left operand, operator, right operand. Explicit parentheses become
//! `enter_group`/`exit_group` pairs. When the tree shape itself implies
//! grouping (a lower-precedence child, or a right child of equal
//! precedence) the walker emits an implicit group so a precedence-driven
//! visitor rebuilds exactly the same tree.

use crate::query::ast::{AstNode, BinaryOp};

/// Callbacks invoked by [`walk`]
pub trait AstVisitor {
    type Error;

    /// `left op right` where `op` is `=` or `!=`
    fn comparison(
        &mut self,
        op: BinaryOp,
        left: &AstNode,
        right: &AstNode,
    ) -> Result<(), Self::Error>;

    /// `and`/`or` between the operand just emitted and the next one
    fn logical(&mut self, op: BinaryOp) -> Result<(), Self::Error>;

    /// A terminal reached where a condition was expected
    fn operand(&mut self, node: &AstNode) -> Result<(), Self::Error>;

    fn enter_group(&mut self) -> Result<(), Self::Error>;

    fn exit_group(&mut self) -> Result<(), Self::Error>;
}

/// Visit `node` and all of its descendants
pub fn walk<V: AstVisitor>(node: &AstNode, visitor: &mut V) -> Result<(), V::Error> {
    match node {
        AstNode::Group(inner) => {
            visitor.enter_group()?;
            walk(inner, visitor)?;
            visitor.exit_group()
        }
        AstNode::Binary { op, left, right } if op.is_comparison() => {
            visitor.comparison(*op, left, right)
        }
        AstNode::Binary { op, left, right } => {
            walk_child(left, *op, false, visitor)?;
            visitor.logical(*op)?;
            walk_child(right, *op, true, visitor)
        }
        AstNode::Variable(_) | AstNode::Value(_) | AstNode::Integer(_) | AstNode::Null => {
            visitor.operand(node)
        }
    }
}

fn walk_child<V: AstVisitor>(
    child: &AstNode,
    parent: BinaryOp,
    is_right: bool,
    visitor: &mut V,
) -> Result<(), V::Error> {
    if needs_implicit_group(child, parent, is_right) {
        visitor.enter_group()?;
        walk(child, visitor)?;
        visitor.exit_group()
    } else {
        walk(child, visitor)
    }
}

fn needs_implicit_group(child: &AstNode, parent: BinaryOp, is_right: bool) -> bool {
    match child.op() {
        Some(op) if op.is_logical() => {
            op.precedence() < parent.precedence()
                || (is_right && op.precedence() == parent.precedence())
        }
        _ => false,
    }
}
