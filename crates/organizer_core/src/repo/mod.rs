//! Repository layer: SQL details of one store file.
//!
//! # Responsibility
//! - Keep table layout and query text out of store/session orchestration.
//! - Express every item mutation as a replayable statement pair.
//!
//! # Invariants
//! - Functions take a borrowed connection and never open or close one.
//! - Persisted rule arrays are validated before they reach this layer.

pub mod history_repo;
pub mod item_repo;
pub mod store_repo;
