//! Query AST
//!
//! A closed set of node variants produced by the parser. Comparisons and
//! boolean combinators share one `Binary` node distinguished by [`BinaryOp`].

use std::fmt;

/// Operator of a binary node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    /// Binding strength, higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::NotEqual => 3,
            BinaryOp::Equal => 4,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Equal | BinaryOp::NotEqual)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Equal => write!(f, "="),
            BinaryOp::NotEqual => write!(f, "!="),
            BinaryOp::And => write!(f, "and"),
            BinaryOp::Or => write!(f, "or"),
        }
    }
}

/// Node of a parsed query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstNode {
    /// Bare identifier, e.g. `LOG_LEVEL`
    Variable(String),
    /// Double-quoted string, quotes stripped
    Value(String),
    Integer(i64),
    Null,
    /// Parenthesized expression
    Group(Box<AstNode>),
    Binary {
        op: BinaryOp,
        left: Box<AstNode>,
        right: Box<AstNode>,
    },
}

impl AstNode {
    pub fn variable(name: impl Into<String>) -> Self {
        AstNode::Variable(name.into())
    }

    pub fn value(value: impl Into<String>) -> Self {
        AstNode::Value(value.into())
    }

    pub fn group(inner: AstNode) -> Self {
        AstNode::Group(Box::new(inner))
    }

    pub fn binary(op: BinaryOp, left: AstNode, right: AstNode) -> Self {
        AstNode::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: AstNode, right: AstNode) -> Self {
        Self::binary(BinaryOp::Equal, left, right)
    }

    pub fn ne(left: AstNode, right: AstNode) -> Self {
        Self::binary(BinaryOp::NotEqual, left, right)
    }

    pub fn and(left: AstNode, right: AstNode) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: AstNode, right: AstNode) -> Self {
        Self::binary(BinaryOp::Or, left, right)
    }

    /// Whether this node is a terminal operand
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            AstNode::Variable(_) | AstNode::Value(_) | AstNode::Integer(_) | AstNode::Null
        )
    }

    /// Text a leaf contributes to an index key; `null` is the empty string
    pub fn operand_text(&self) -> Option<String> {
        match self {
            AstNode::Variable(s) | AstNode::Value(s) => Some(s.clone()),
            AstNode::Integer(i) => Some(i.to_string()),
            AstNode::Null => Some(String::new()),
            AstNode::Group(_) | AstNode::Binary { .. } => None,
        }
    }

    /// Operator of a binary node
    pub fn op(&self) -> Option<BinaryOp> {
        match self {
            AstNode::Binary { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Nesting depth, leaves are 1
    pub fn depth(&self) -> usize {
        match self {
            AstNode::Group(inner) => 1 + inner.depth(),
            AstNode::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            _ => 1,
        }
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstNode::Variable(name) => write!(f, "{}", name),
            AstNode::Value(value) => write!(f, "\"{}\"", value),
            AstNode::Integer(i) => write!(f, "{}", i),
            AstNode::Null => write!(f, "null"),
            AstNode::Group(inner) => write!(f, "({})", inner),
            AstNode::Binary { op, left, right } if op.is_comparison() => {
                write!(f, "{}{}{}", left, op, right)
            }
            AstNode::Binary { op, left, right } => write!(f, "{} {} {}", left, op, right),
        }
    }
}
