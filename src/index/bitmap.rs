//! Compressed-bitmap position index
//!
//! Maps `(property name hash, property value)` to the set of event ids that
//! carry that pair. A separate universe bitmap holds every id ever indexed,
//! so `NotEquals` is a complement against known positions rather than the
//! whole u32 space.
//!
//! # Performance Characteristics
//!
//! - set: O(1) amortized
//! - equals: O(1) lookup + clone of one bitmap
//! - and/or/not: O(n/64) over container words

use roaring::RoaringBitmap;
use std::collections::{BTreeMap, HashMap};

use crate::index::criteria::{Criteria, IndexKey};

/// Operations a position index must support to evaluate criteria
pub trait PositionIndex {
    /// Realized set of positions
    type Set;

    /// Bind `position` to `key`. Idempotent.
    fn set(&mut self, key: IndexKey, position: u32);

    /// Positions bound to `key`, empty if absent
    fn query_equals(&self, key: &IndexKey) -> Self::Set;

    /// Known positions not bound to `key`
    fn query_not_equals(&self, key: &IndexKey) -> Self::Set;

    /// Intersection, leaving inputs untouched
    fn and(&self, a: &Self::Set, b: &Self::Set) -> Self::Set;

    /// Union, leaving inputs untouched
    fn or(&self, a: &Self::Set, b: &Self::Set) -> Self::Set;

    /// Positions in ascending order
    fn positions(&self, set: &Self::Set) -> Vec<u32>;

    /// Realize a criteria tree against the current index contents
    fn evaluate(&self, criteria: &Criteria) -> Self::Set {
        match criteria {
            Criteria::Equals(key) => self.query_equals(key),
            Criteria::NotEquals(key) => self.query_not_equals(key),
            Criteria::And(a, b) => {
                let left = self.evaluate(a);
                let right = self.evaluate(b);
                self.and(&left, &right)
            }
            Criteria::Or(a, b) => {
                let left = self.evaluate(a);
                let right = self.evaluate(b);
                self.or(&left, &right)
            }
        }
    }
}

/// Roaring-bitmap implementation of [`PositionIndex`]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BitmapIndex {
    bitmaps: HashMap<IndexKey, RoaringBitmap>,
    universe: RoaringBitmap,
}

impl BitmapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a position with no key bindings
    pub fn insert_position(&mut self, position: u32) {
        self.universe.insert(position);
    }

    /// Index every property of an event under its id
    pub fn index_event(&mut self, position: u32, properties: &BTreeMap<String, String>) {
        self.insert_position(position);
        for (field, value) in properties {
            self.set(IndexKey::new(field, value.as_str()), position);
        }
    }

    /// Number of known positions
    pub fn len(&self) -> u64 {
        self.universe.len()
    }

    pub fn is_empty(&self) -> bool {
        self.universe.is_empty()
    }

    /// Number of distinct keys
    pub fn key_count(&self) -> usize {
        self.bitmaps.len()
    }

    /// Highest known position
    pub fn max_position(&self) -> Option<u32> {
        self.universe.max()
    }

    /// Every known position
    pub fn universe(&self) -> &RoaringBitmap {
        &self.universe
    }

    /// Approximate heap footprint of the compressed bitmaps in bytes
    pub fn serialized_size(&self) -> usize {
        self.bitmaps
            .values()
            .map(|b| b.serialized_size())
            .sum::<usize>()
            + self.universe.serialized_size()
    }

    pub fn clear(&mut self) {
        self.bitmaps.clear();
        self.universe.clear();
    }
}

impl PositionIndex for BitmapIndex {
    type Set = RoaringBitmap;

    fn set(&mut self, key: IndexKey, position: u32) {
        self.universe.insert(position);
        self.bitmaps.entry(key).or_default().insert(position);
    }

    fn query_equals(&self, key: &IndexKey) -> RoaringBitmap {
        self.bitmaps.get(key).cloned().unwrap_or_default()
    }

    fn query_not_equals(&self, key: &IndexKey) -> RoaringBitmap {
        match self.bitmaps.get(key) {
            Some(bitmap) => &self.universe - bitmap,
            None => self.universe.clone(),
        }
    }

    fn and(&self, a: &RoaringBitmap, b: &RoaringBitmap) -> RoaringBitmap {
        a & b
    }

    fn or(&self, a: &RoaringBitmap, b: &RoaringBitmap) -> RoaringBitmap {
        a | b
    }

    fn positions(&self, set: &RoaringBitmap) -> Vec<u32> {
        set.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(field: &str, value: &str) -> IndexKey {
        IndexKey::new(field, value)
    }

    fn sample_index() -> BitmapIndex {
        let mut index = BitmapIndex::new();
        // host=a on 1..=6, host=b on 7..=10, level=ERROR on evens
        for id in 1..=10u32 {
            let host = if id <= 6 { "a" } else { "b" };
            index.set(key("host", host), id);
            if id % 2 == 0 {
                index.set(key("level", "ERROR"), id);
            }
        }
        index
    }

    #[test]
    fn test_set_is_idempotent() {
        let mut index = BitmapIndex::new();
        index.set(key("host", "a"), 3);
        index.set(key("host", "a"), 3);

        assert_eq!(index.len(), 1);
        assert_eq!(index.positions(&index.query_equals(&key("host", "a"))), vec![3]);
    }

    #[test]
    fn test_missing_key_is_empty() {
        let index = sample_index();
        assert!(index.query_equals(&key("host", "zzz")).is_empty());
        assert_eq!(index.query_not_equals(&key("host", "zzz")).len(), 10);
    }

    #[test]
    fn test_and_is_true_intersection() {
        let index = sample_index();
        let a = index.query_equals(&key("host", "a"));
        let err = index.query_equals(&key("level", "ERROR"));

        let both = index.and(&a, &err);
        assert_eq!(index.positions(&both), vec![2, 4, 6]);
        // inputs untouched
        assert_eq!(a.len(), 6);
        assert_eq!(err.len(), 5);
    }

    #[test]
    fn test_or_is_true_union() {
        let index = sample_index();
        let b = index.query_equals(&key("host", "b"));
        let err = index.query_equals(&key("level", "ERROR"));

        let either = index.or(&b, &err);
        assert_eq!(index.positions(&either), vec![2, 4, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_not_equals_is_universe_minus_equals() {
        let mut index = sample_index();
        // position with no properties still belongs to the universe
        index.insert_position(11);

        let not_err = index.query_not_equals(&key("level", "ERROR"));
        let err = index.query_equals(&key("level", "ERROR"));

        assert_eq!(index.positions(&not_err), vec![1, 3, 5, 7, 9, 11]);
        assert!(index.and(&not_err, &err).is_empty());
        assert_eq!(index.or(&not_err, &err), *index.universe());
    }

    #[test]
    fn test_evaluate_criteria_tree() {
        let index = sample_index();

        let criteria = Criteria::equals("host", "a")
            .and(Criteria::equals("level", "ERROR"))
            .or(Criteria::equals("host", "b").and(Criteria::not_equals("level", "ERROR")));

        assert_eq!(index.positions(&index.evaluate(&criteria)), vec![2, 4, 6, 7, 9]);
        assert_eq!(index.evaluate(&Criteria::all()).len(), 10);
    }

    #[test]
    fn test_evaluation_sees_later_positions() {
        let mut index = sample_index();
        let criteria = Criteria::equals("host", "b");
        assert_eq!(index.evaluate(&criteria).len(), 4);

        index.set(key("host", "b"), 11);
        assert_eq!(index.evaluate(&criteria).len(), 5);
    }

    #[test]
    fn test_index_event() {
        let mut index = BitmapIndex::new();
        let mut props = BTreeMap::new();
        props.insert("host".to_string(), "a".to_string());
        props.insert("level".to_string(), "INFO".to_string());

        index.index_event(1, &props);
        index.index_event(2, &BTreeMap::new());

        assert_eq!(index.len(), 2);
        assert_eq!(index.key_count(), 2);
        assert_eq!(index.max_position(), Some(2));
        assert_eq!(index.query_equals(&key("level", "INFO")).len(), 1);
    }
}
