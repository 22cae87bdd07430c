//! Optics Index Structures
//!
//! - **Criteria**: compiled, bucket-independent query trees
//! - **BitmapIndex**: per-bucket `(property, value) → event ids` bitmaps
//!
//! # Architecture
//!
//! ```text
//! Query: host="a" and level!="DEBUG"
//!        ↓
//! Criteria: and(eq(host, a), ne(level, DEBUG))
//!        ↓
//! BitmapIndex: bitmap[host=a] & (universe - bitmap[level=DEBUG])
//!        ↓
//! Sorted event ids → durable lookup by id
//! ```
//!
//! The index is never persisted. Each bucket rebuilds it from its durable
//! event log when it opens.

mod bitmap;
mod criteria;

pub use bitmap::{BitmapIndex, PositionIndex};
pub use criteria::{Criteria, IndexKey};
