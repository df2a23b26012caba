//! Domain model for outline items, their rules and computed occurrences.
//!
//! # Invariants
//! - Every item is identified by a stable `ItemId`.
//! - Rules are a closed tagged enumeration; order inside an item's list is
//!   semantically significant.
//! - Occurrences are computed values and are never persisted.

pub mod item;
pub mod occurrence;
pub mod rule;
