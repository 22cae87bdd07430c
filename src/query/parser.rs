//! Query Parser
//!
//! Parses Optics filter expressions into an [`AstNode`].
//!
//! # Grammar
//!
//! ```text
//! Expression := Or
//! Or         := And ("or" And)*
//! And        := NotEq ("and" NotEq)*
//! NotEq      := Eq (("!=" | "!") Eq)*
//! Eq         := Primary ("=" Primary)*
//! Primary    := "(" Expression ")" | QuotedValue | Integer | "null" | Variable
//! ```
//!
//! Keywords are case-insensitive and only match at a word boundary. All
//! chains are left-associative.
//!
//! # Examples
//!
//! ```text
//! LOG_LEVEL="ERROR"
//! host="a" or host="b" and LOG_LEVEL!="DEBUG"
//! (host="a" or host="b") and status=500
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{cut, map, map_res, not, opt, recognize},
    multi::many0,
    sequence::{pair, preceded, terminated},
    IResult,
};

use crate::query::ast::{AstNode, BinaryOp};
use crate::query::error::{QueryError, QueryResult};

/// Parse a query string into an AST
pub fn parse_expression(input: &str) -> QueryResult<AstNode> {
    if input.trim().is_empty() {
        return Err(QueryError::syntax(0, "empty query"));
    }

    match expression(input) {
        Ok((remaining, ast)) => {
            let trailing = remaining.trim_start();
            if trailing.is_empty() {
                Ok(ast)
            } else {
                Err(QueryError::syntax(
                    input.len() - trailing.len(),
                    format!("unexpected input '{}'", trailing),
                ))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(QueryError::syntax(
            input.len() - e.input.len(),
            describe_failure(e.input, e.code),
        )),
        Err(nom::Err::Incomplete(_)) => {
            Err(QueryError::syntax(input.len(), "unexpected end of query"))
        }
    }
}

fn describe_failure(at: &str, code: nom::error::ErrorKind) -> String {
    match at.chars().next() {
        None => "unexpected end of query".to_string(),
        Some(c) => format!("unexpected '{}' ({})", c, code.description()),
    }
}

/// Characters allowed inside a bare variable name
fn is_variable_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | '=' | '!')
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag_no_case(word), not(satisfy(is_variable_char)))
}

fn fold_chain(op: BinaryOp, first: AstNode, rest: Vec<AstNode>) -> AstNode {
    rest.into_iter()
        .fold(first, |left, right| AstNode::binary(op, left, right))
}

fn expression(input: &str) -> IResult<&str, AstNode> {
    or_expr(input)
}

fn or_expr(input: &str) -> IResult<&str, AstNode> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(
        preceded(multispace0, keyword("or")),
        cut(and_expr),
    ))(input)?;
    Ok((input, fold_chain(BinaryOp::Or, first, rest)))
}

fn and_expr(input: &str) -> IResult<&str, AstNode> {
    let (input, first) = not_eq_expr(input)?;
    let (input, rest) = many0(preceded(
        preceded(multispace0, keyword("and")),
        cut(not_eq_expr),
    ))(input)?;
    Ok((input, fold_chain(BinaryOp::And, first, rest)))
}

fn not_eq_expr(input: &str) -> IResult<&str, AstNode> {
    let (input, first) = eq_expr(input)?;
    let (input, rest) = many0(preceded(
        preceded(multispace0, alt((tag("!="), tag("!")))),
        cut(eq_expr),
    ))(input)?;
    Ok((input, fold_chain(BinaryOp::NotEqual, first, rest)))
}

fn eq_expr(input: &str) -> IResult<&str, AstNode> {
    let (input, first) = primary(input)?;
    let (input, rest) = many0(preceded(preceded(multispace0, char('=')), cut(primary)))(input)?;
    Ok((input, fold_chain(BinaryOp::Equal, first, rest)))
}

fn primary(input: &str) -> IResult<&str, AstNode> {
    preceded(
        multispace0,
        alt((group, quoted_value, integer, null, variable)),
    )(input)
}

fn group(input: &str) -> IResult<&str, AstNode> {
    map(
        preceded(
            char('('),
            cut(terminated(expression, preceded(multispace0, char(')')))),
        ),
        AstNode::group,
    )(input)
}

/// Double-quoted string, no escape processing
fn quoted_value(input: &str) -> IResult<&str, AstNode> {
    map(
        preceded(char('"'), cut(terminated(take_while(|c| c != '"'), char('"')))),
        |value: &str| AstNode::Value(value.to_string()),
    )(input)
}

fn integer(input: &str) -> IResult<&str, AstNode> {
    map_res(
        terminated(
            recognize(pair(opt(char('-')), digit1)),
            not(satisfy(is_variable_char)),
        ),
        |digits: &str| digits.parse::<i64>().map(AstNode::Integer),
    )(input)
}

fn null(input: &str) -> IResult<&str, AstNode> {
    map(keyword("null"), |_| AstNode::Null)(input)
}

/// Run of variable characters that does not start with a digit
fn variable(input: &str) -> IResult<&str, AstNode> {
    map(
        recognize(pair(
            satisfy(|c| is_variable_char(c) && !c.is_ascii_digit()),
            take_while(is_variable_char),
        )),
        |name: &str| AstNode::Variable(name.to_string()),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> AstNode {
        AstNode::variable(name)
    }

    fn val(value: &str) -> AstNode {
        AstNode::value(value)
    }

    #[test]
    fn test_single_comparison() {
        let ast = parse_expression(r#"LOG_LEVEL="ERROR""#).unwrap();
        assert_eq!(ast, AstNode::eq(var("LOG_LEVEL"), val("ERROR")));

        let ast = parse_expression(r#"  host = "a b c"  "#).unwrap();
        assert_eq!(ast, AstNode::eq(var("host"), val("a b c")));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let ast = parse_expression(r#"A="1" or B="2" and C="3""#).unwrap();
        assert_eq!(
            ast,
            AstNode::or(
                AstNode::eq(var("A"), val("1")),
                AstNode::and(
                    AstNode::eq(var("B"), val("2")),
                    AstNode::eq(var("C"), val("3"))
                ),
            )
        );
    }

    #[test]
    fn test_group_overrides_precedence() {
        let ast = parse_expression(r#"(A="1" and B="2") or C="3""#).unwrap();
        assert_eq!(
            ast,
            AstNode::or(
                AstNode::group(AstNode::and(
                    AstNode::eq(var("A"), val("1")),
                    AstNode::eq(var("B"), val("2"))
                )),
                AstNode::eq(var("C"), val("3")),
            )
        );
    }

    #[test]
    fn test_chains_are_left_associative() {
        let ast = parse_expression(r#"A="1" and B="2" and C="3""#).unwrap();
        assert_eq!(
            ast,
            AstNode::and(
                AstNode::and(
                    AstNode::eq(var("A"), val("1")),
                    AstNode::eq(var("B"), val("2"))
                ),
                AstNode::eq(var("C"), val("3")),
            )
        );
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let lower = parse_expression(r#"A="1" and B="2" or C=null"#).unwrap();
        let mixed = parse_expression(r#"A="1" AND B="2" Or C=NULL"#).unwrap();
        assert_eq!(lower, mixed);
    }

    #[test]
    fn test_not_equal_forms() {
        let bang_eq = parse_expression(r#"A != "x""#).unwrap();
        let bang = parse_expression(r#"A!"x""#).unwrap();
        assert_eq!(bang_eq, AstNode::ne(var("A"), val("x")));
        assert_eq!(bang, bang_eq);
    }

    #[test]
    fn test_integer_and_null_literals() {
        let ast = parse_expression("status=500 and parent=null and delta=-3").unwrap();
        assert_eq!(
            ast,
            AstNode::and(
                AstNode::and(
                    AstNode::eq(var("status"), AstNode::Integer(500)),
                    AstNode::eq(var("parent"), AstNode::Null)
                ),
                AstNode::eq(var("delta"), AstNode::Integer(-3)),
            )
        );
    }

    #[test]
    fn test_variable_charset() {
        let ast = parse_expression(r#"service.name="api" and k8s:pod-id="p1""#).unwrap();
        assert_eq!(
            ast,
            AstNode::and(
                AstNode::eq(var("service.name"), val("api")),
                AstNode::eq(var("k8s:pod-id"), val("p1"))
            )
        );

        // keyword prefix is still a variable
        let ast = parse_expression(r#"order="1""#).unwrap();
        assert_eq!(ast, AstNode::eq(var("order"), val("1")));

        let ast = parse_expression(r#"nullable=null"#).unwrap();
        assert_eq!(ast, AstNode::eq(var("nullable"), AstNode::Null));
    }

    #[test]
    fn test_quoted_value_keeps_operators() {
        let ast = parse_expression(r#"msg="a=b and (c)""#).unwrap();
        assert_eq!(ast, AstNode::eq(var("msg"), val("a=b and (c)")));
    }

    #[test]
    fn test_empty_query_is_error() {
        assert_eq!(parse_expression("   ").unwrap_err().position(), Some(0));
    }

    #[test]
    fn test_unterminated_quote() {
        let err = parse_expression(r#"A="abc"#).unwrap_err();
        assert!(matches!(err, QueryError::Syntax { position: 6, .. }));
    }

    #[test]
    fn test_trailing_input() {
        let err = parse_expression(r#"A="1")"#).unwrap_err();
        assert_eq!(err.position(), Some(5));

        // "order" is not the "or" keyword
        let err = parse_expression(r#"A="1" order="2""#).unwrap_err();
        assert_eq!(err.position(), Some(6));
    }

    #[test]
    fn test_dangling_operator() {
        let err = parse_expression(r#"A="1" and"#).unwrap_err();
        assert_eq!(err.position(), Some(9));

        let err = parse_expression(r#"A="#).unwrap_err();
        assert_eq!(err.position(), Some(2));
    }

    #[test]
    fn test_unclosed_group() {
        let err = parse_expression(r#"(A="1" or B="2""#).unwrap_err();
        assert_eq!(err.position(), Some(15));
    }

    #[test]
    fn test_leading_operator() {
        let err = parse_expression(r#"= "1""#).unwrap_err();
        assert_eq!(err.position(), Some(0));
    }

    #[test]
    fn test_integer_followed_by_letters() {
        assert!(parse_expression("A=12abc").is_err());
    }
}
