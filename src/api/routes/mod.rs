//! API Routes
//!
//! Route handlers organized by functionality.

pub mod admin;
pub mod events;
pub mod health;
pub mod query;
pub mod stats;
