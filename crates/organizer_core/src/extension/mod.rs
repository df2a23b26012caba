//! Compatibility contracts between store files and running components.
//!
//! A store records the core version and every active extension, interface
//! and plugin at creation time; it can only be opened again by a process
//! running exactly the same set.

pub mod compatibility;
pub mod manifest;
