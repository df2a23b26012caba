//! Hand-rolled mutual exclusion primitives.
//!
//! - `ExclusiveGate` serializes logical operations system-wide.
//! - `HandleQueue` serializes access to one store connection, independently
//!   of the gate.

mod gate;
mod handle_queue;

pub use gate::{ExclusiveGate, GateGuard};
pub use handle_queue::{HandleLease, HandleQueue};
