//! Compiled query criteria
//!
//! A `Criteria` tree stores key references and set-operation topology only.
//! It is realized into a position set when evaluated against an index, so a
//! compiled tree can be cached and replayed against an index that keeps
//! growing.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Composite index key: hash of the property name plus the property value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    pub field_hash: u64,
    pub value: String,
}

impl IndexKey {
    pub fn new(field: &str, value: impl Into<String>) -> Self {
        Self {
            field_hash: field_hash(field),
            value: value.into(),
        }
    }

    /// Key that never matches a real property
    ///
    /// `NotEquals(sentinel)` realizes to every known position.
    pub fn sentinel() -> Self {
        Self {
            field_hash: 0,
            value: String::new(),
        }
    }
}

/// Stable within a process, which is all the index needs since it is
/// rebuilt on every start.
fn field_hash(field: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    field.hash(&mut hasher);
    hasher.finish()
}

/// Node of a compiled query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Criteria {
    Equals(IndexKey),
    NotEquals(IndexKey),
    And(Box<Criteria>, Box<Criteria>),
    Or(Box<Criteria>, Box<Criteria>),
}

impl Criteria {
    pub fn equals(field: &str, value: impl Into<String>) -> Self {
        Criteria::Equals(IndexKey::new(field, value))
    }

    pub fn not_equals(field: &str, value: impl Into<String>) -> Self {
        Criteria::NotEquals(IndexKey::new(field, value))
    }

    /// Criteria matching every event
    pub fn all() -> Self {
        Criteria::NotEquals(IndexKey::sentinel())
    }

    pub fn and(self, other: Criteria) -> Self {
        Criteria::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Criteria) -> Self {
        Criteria::Or(Box::new(self), Box::new(other))
    }

    /// Number of key lookups needed to realize this tree
    pub fn leaf_count(&self) -> usize {
        match self {
            Criteria::Equals(_) | Criteria::NotEquals(_) => 1,
            Criteria::And(a, b) | Criteria::Or(a, b) => a.leaf_count() + b.leaf_count(),
        }
    }
}

impl fmt::Display for Criteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criteria::Equals(k) => write!(f, "eq({:016x}, {:?})", k.field_hash, k.value),
            Criteria::NotEquals(k) => write!(f, "ne({:016x}, {:?})", k.field_hash, k.value),
            Criteria::And(a, b) => write!(f, "and({}, {})", a, b),
            Criteria::Or(a, b) => write!(f, "or({}, {})", a, b),
        }
    }
}
