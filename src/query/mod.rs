//! Optics Query Engine
//!
//! Turns filter expressions into criteria trees the bitmap index can run:
//!
//! - **AST**: node types for comparisons, boolean combinators and groups
//! - **Parser**: nom-based parser with `=`/`!=` over `and` over `or`
//! - **Walker**: source-order traversal driving an [`AstVisitor`]
//! - **Compiler**: per-group stack frames lowering the AST to [`Criteria`]
//! - **Cache**: TTL cache of compiled trees keyed by query text
//!
//! # Query Language
//!
//! ```text
//! field="value"            equality
//! field!="value"           inequality (also `field!"value"`)
//! a="1" and b="2"          intersection
//! a="1" or b="2"           union
//! (a="1" or b="2") and c=3 grouping
//! ```
//!
//! # Example
//!
//! ```rust
//! use optics::index::{BitmapIndex, IndexKey, PositionIndex};
//! use optics::query::compile_query;
//!
//! let mut index = BitmapIndex::new();
//! index.set(IndexKey::new("LOG_LEVEL", "ERROR"), 1);
//! index.set(IndexKey::new("LOG_LEVEL", "INFO"), 2);
//!
//! let criteria = compile_query(r#"LOG_LEVEL!="INFO""#).unwrap();
//! assert_eq!(index.positions(&index.evaluate(&criteria)), vec![1]);
//! ```
//!
//! [`Criteria`]: crate::index::Criteria

mod ast;
mod cache;
mod compiler;
mod error;
mod parser;
mod walker;

pub use ast::{AstNode, BinaryOp};
pub use cache::{CacheStats, CriteriaCache, DEFAULT_CACHE_ENTRIES, DEFAULT_CACHE_TTL};
pub use compiler::{compile, compile_query, CriteriaCompiler};
pub use error::{QueryError, QueryResult};
pub use parser::parse_expression;
pub use walker::{walk, AstVisitor};
