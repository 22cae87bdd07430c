//! Criteria compiler
//!
//! Lowers an AST into a [`Criteria`] tree by visiting it in source order.
//! Every group scope owns its own operand/operator frame, so an operator
//! read right after a group opens or closes is always combined at the
//! nesting level it was written at.

use crate::index::Criteria;
use crate::query::ast::{AstNode, BinaryOp};
use crate::query::error::{QueryError, QueryResult};
use crate::query::parser::parse_expression;
use crate::query::walker::{walk, AstVisitor};

/// Operands and pending operators of one nesting level
#[derive(Debug, Default)]
struct Frame {
    operands: Vec<Criteria>,
    operators: Vec<BinaryOp>,
}

impl Frame {
    fn push_operand(&mut self, criteria: Criteria) -> QueryResult<()> {
        if self.operands.len() != self.operators.len() {
            return Err(QueryError::Compile(
                "two conditions without an operator between them".to_string(),
            ));
        }
        self.operands.push(criteria);
        Ok(())
    }

    fn push_operator(&mut self, op: BinaryOp) -> QueryResult<()> {
        if self.operands.len() != self.operators.len() + 1 {
            return Err(QueryError::Compile(format!(
                "'{}' has no left-hand condition",
                op
            )));
        }
        while let Some(&top) = self.operators.last() {
            if top.precedence() < op.precedence() {
                break;
            }
            self.reduce()?;
        }
        self.operators.push(op);
        Ok(())
    }

    fn reduce(&mut self) -> QueryResult<()> {
        let op = self
            .operators
            .pop()
            .ok_or_else(|| QueryError::Compile("no operator to apply".to_string()))?;
        let right = self.operands.pop();
        let left = self.operands.pop();

        let (left, right) = match (left, right) {
            (Some(left), Some(right)) => (left, right),
            _ => {
                return Err(QueryError::Compile(format!(
                    "'{}' is missing an operand",
                    op
                )))
            }
        };

        let combined = match op {
            BinaryOp::And => left.and(right),
            BinaryOp::Or => left.or(right),
            other => {
                return Err(QueryError::Compile(format!(
                    "'{}' cannot combine conditions",
                    other
                )))
            }
        };
        self.operands.push(combined);
        Ok(())
    }

    fn finish(mut self) -> QueryResult<Criteria> {
        while !self.operators.is_empty() {
            self.reduce()?;
        }
        match self.operands.len() {
            1 => self
                .operands
                .pop()
                .ok_or_else(|| QueryError::Compile("empty expression".to_string())),
            0 => Err(QueryError::Compile("empty expression".to_string())),
            n => Err(QueryError::Compile(format!(
                "{} conditions left without operators",
                n
            ))),
        }
    }
}

/// [`AstVisitor`] that builds a [`Criteria`] tree
#[derive(Debug)]
pub struct CriteriaCompiler {
    frames: Vec<Frame>,
}

impl CriteriaCompiler {
    pub fn new() -> Self {
        Self {
            frames: vec![Frame::default()],
        }
    }

    /// Current group nesting depth, 0 at top level
    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    /// Close the top-level frame and return the compiled tree
    pub fn finish(mut self) -> QueryResult<Criteria> {
        if self.frames.len() != 1 {
            return Err(QueryError::Compile(format!(
                "{} group(s) left open",
                self.depth()
            )));
        }
        let root = self
            .frames
            .pop()
            .ok_or_else(|| QueryError::Compile("missing top-level scope".to_string()))?;
        root.finish()
    }

    fn current(&mut self) -> QueryResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| QueryError::Compile("missing top-level scope".to_string()))
    }
}

impl Default for CriteriaCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl AstVisitor for CriteriaCompiler {
    type Error = QueryError;

    fn comparison(&mut self, op: BinaryOp, left: &AstNode, right: &AstNode) -> QueryResult<()> {
        let field = left.operand_text().ok_or_else(|| {
            QueryError::Compile(format!("left side of '{}' must be a field, found {}", op, left))
        })?;
        let value = right.operand_text().ok_or_else(|| {
            QueryError::Compile(format!("right side of '{}' must be a value, found {}", op, right))
        })?;

        let criteria = match op {
            BinaryOp::Equal => Criteria::equals(&field, value),
            BinaryOp::NotEqual => Criteria::not_equals(&field, value),
            other => {
                return Err(QueryError::Compile(format!(
                    "'{}' is not a comparison",
                    other
                )))
            }
        };
        self.current()?.push_operand(criteria)
    }

    fn logical(&mut self, op: BinaryOp) -> QueryResult<()> {
        if !op.is_logical() {
            return Err(QueryError::Compile(format!("'{}' is not a boolean operator", op)));
        }
        self.current()?.push_operator(op)
    }

    fn operand(&mut self, node: &AstNode) -> QueryResult<()> {
        Err(QueryError::Compile(format!(
            "'{}' is not a condition; expected a comparison such as {}=\"value\"",
            node, node
        )))
    }

    fn enter_group(&mut self) -> QueryResult<()> {
        self.frames.push(Frame::default());
        Ok(())
    }

    fn exit_group(&mut self) -> QueryResult<()> {
        if self.frames.len() < 2 {
            return Err(QueryError::Compile(
                "group closed without being opened".to_string(),
            ));
        }
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| QueryError::Compile("group stack underflow".to_string()))?;
        let grouped = frame.finish()?;
        self.current()?.push_operand(grouped)
    }
}

/// Lower an AST into criteria
pub fn compile(ast: &AstNode) -> QueryResult<Criteria> {
    let mut compiler = CriteriaCompiler::new();
    walk(ast, &mut compiler)?;
    compiler.finish()
}

/// Parse and lower a query string
///
/// An empty or blank query matches every event.
pub fn compile_query(query: &str) -> QueryResult<Criteria> {
    if query.trim().is_empty() {
        return Ok(Criteria::all());
    }
    let ast = parse_expression(query)?;
    compile(&ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BitmapIndex, PositionIndex};

    /// Direct recursive lowering used as the reference result
    fn fold(ast: &AstNode) -> Criteria {
        match ast {
            AstNode::Group(inner) => fold(inner),
            AstNode::Binary { op, left, right } => {
                let text = |n: &AstNode| n.operand_text().unwrap();
                match op {
                    BinaryOp::Equal => Criteria::equals(&text(left), text(right)),
                    BinaryOp::NotEqual => Criteria::not_equals(&text(left), text(right)),
                    BinaryOp::And => fold(left).and(fold(right)),
                    BinaryOp::Or => fold(left).or(fold(right)),
                }
            }
            leaf => panic!("bare leaf {}", leaf),
        }
    }

    fn eq(field: &str, value: &str) -> Criteria {
        Criteria::equals(field, value)
    }

    #[test]
    fn test_single_comparison() {
        assert_eq!(compile_query(r#"A="1""#).unwrap(), eq("A", "1"));
        assert_eq!(
            compile_query(r#"A!="1""#).unwrap(),
            Criteria::not_equals("A", "1")
        );
    }

    #[test]
    fn test_empty_query_matches_everything() {
        assert_eq!(compile_query("").unwrap(), Criteria::all());
        assert_eq!(compile_query("  \t").unwrap(), Criteria::all());
    }

    #[test]
    fn test_precedence() {
        let criteria = compile_query(r#"A="1" or B="2" and C="3""#).unwrap();
        assert_eq!(criteria, eq("A", "1").or(eq("B", "2").and(eq("C", "3"))));
    }

    #[test]
    fn test_group_then_or() {
        let criteria = compile_query(r#"(A="1" and B="2") or C="3""#).unwrap();
        assert_eq!(criteria, eq("A", "1").and(eq("B", "2")).or(eq("C", "3")));
    }

    #[test]
    fn test_operator_after_group_open_belongs_to_parent() {
        let criteria = compile_query(r#"A="1" and (B="2" or C="3")"#).unwrap();
        assert_eq!(criteria, eq("A", "1").and(eq("B", "2").or(eq("C", "3"))));
    }

    #[test]
    fn test_sibling_groups_are_independent() {
        let criteria = compile_query(r#"(A="1" or B="2") and (C="3" or D="4")"#).unwrap();
        assert_eq!(
            criteria,
            eq("A", "1")
                .or(eq("B", "2"))
                .and(eq("C", "3").or(eq("D", "4")))
        );
    }

    #[test]
    fn test_nested_groups_match_reference_fold() {
        let queries = [
            r#"((A="1" or B="2") and C="3") or (D="4" and (E="5" or F="6"))"#,
            r#"(A="1" or (B="2" and (C="3" or (D="4" and E="5"))))"#,
            r#"((((A="1"))))"#,
            r#"(A="1") and (B="2") or (C="3") and (D="4")"#,
            r#"A="1" or (B="2" or C="3") and D!="4" or (E="5")"#,
            r#"((A="1" and B="2") or (C="3" and D="4")) and ((E="5" or F="6") and G="7")"#,
            r#"A=null and (B=5 or (C!="x" and D="y")) or E="z""#,
        ];

        for query in queries {
            let ast = parse_expression(query).unwrap();
            assert_eq!(compile(&ast).unwrap(), fold(&ast), "query: {}", query);
        }
    }

    #[test]
    fn test_hand_built_tree_without_groups() {
        // Shape implies grouping that has no parentheses in the tree
        let ast = AstNode::and(
            AstNode::or(
                AstNode::eq(AstNode::variable("A"), AstNode::value("1")),
                AstNode::eq(AstNode::variable("B"), AstNode::value("2")),
            ),
            AstNode::or(
                AstNode::eq(AstNode::variable("C"), AstNode::value("3")),
                AstNode::eq(AstNode::variable("D"), AstNode::value("4")),
            ),
        );
        assert_eq!(compile(&ast).unwrap(), fold(&ast));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let query = r#"(A="1" or B="2") and C!="3""#;
        assert_eq!(compile_query(query).unwrap(), compile_query(query).unwrap());
    }

    #[test]
    fn test_grouped_results_against_index() {
        let mut index = BitmapIndex::new();
        // id: A, B, C
        let rows = [(1, "1", "x", "3"), (2, "1", "2", "x"), (3, "x", "x", "3"), (4, "x", "2", "x")];
        for (id, a, b, c) in rows {
            index.set(crate::index::IndexKey::new("A", a), id);
            index.set(crate::index::IndexKey::new("B", b), id);
            index.set(crate::index::IndexKey::new("C", c), id);
        }

        let grouped = compile_query(r#"(A="1" and B="2") or C="3""#).unwrap();
        assert_eq!(index.positions(&index.evaluate(&grouped)), vec![1, 2, 3]);

        let ungrouped = compile_query(r#"A="1" and (B="2" or C="3")"#).unwrap();
        assert_eq!(index.positions(&index.evaluate(&ungrouped)), vec![1, 2]);
    }

    #[test]
    fn test_bare_operand_fails_loudly() {
        assert!(matches!(compile_query("A"), Err(QueryError::Compile(_))));
        assert!(matches!(
            compile_query(r#"A and B="1""#),
            Err(QueryError::Compile(_))
        ));
    }

    #[test]
    fn test_non_leaf_comparison_operand_fails_loudly() {
        assert!(matches!(
            compile_query(r#"A="1"="2""#),
            Err(QueryError::Compile(_))
        ));
        assert!(matches!(
            compile_query(r#"(A)="1""#),
            Err(QueryError::Compile(_))
        ));
    }

    #[test]
    fn test_syntax_errors_pass_through() {
        assert!(matches!(
            compile_query(r#"A="1" and"#),
            Err(QueryError::Syntax { .. })
        ));
    }

    #[test]
    fn test_unbalanced_visitor_calls() {
        let mut compiler = CriteriaCompiler::new();
        assert!(compiler.exit_group().is_err());

        let mut compiler = CriteriaCompiler::new();
        compiler.enter_group().unwrap();
        assert_eq!(compiler.depth(), 1);
        assert!(compiler.finish().is_err());

        let mut compiler = CriteriaCompiler::new();
        assert!(compiler.logical(BinaryOp::And).is_err());
        assert!(compiler.logical(BinaryOp::Equal).is_err());
    }
}
