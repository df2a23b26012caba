//! System-wide exclusive access gate.
//!
//! # Responsibility
//! - Serialize whole logical operations coming from the foreground context
//!   and the background alarm timer.
//! - Own the state those operations mutate, so holding the gate is the only
//!   way to reach it.
//!
//! # Invariants
//! - At most one `GateGuard` exists at any instant.
//! - The gate is held around an entire operation, never around sub-steps.
//! - Not reentrant: acquiring again while holding a guard on the same thread
//!   deadlocks.

use super::handle_queue::{HandleLease, HandleQueue};
use log::debug;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// Single-token gate that owns the state it protects.
pub struct ExclusiveGate<T> {
    token: HandleQueue<T>,
}

impl<T> ExclusiveGate<T> {
    /// Creates a gate around `state` with the token available.
    pub fn new(state: T) -> Self {
        Self {
            token: HandleQueue::new(state),
        }
    }

    /// Blocks until the token is free and takes it.
    pub fn acquire(&self) -> GateGuard<'_, T> {
        let lease = self.token.acquire();
        debug!("event=gate_acquire module=lock status=ok");
        GateGuard { lease }
    }

    /// Takes the token only if nobody holds it.
    pub fn try_acquire(&self) -> Option<GateGuard<'_, T>> {
        let lease = self.token.try_acquire()?;
        debug!("event=gate_acquire module=lock status=ok mode=try");
        Some(GateGuard { lease })
    }

    /// Returns the token. Same as dropping the guard.
    pub fn release(guard: GateGuard<'_, T>) {
        drop(guard);
    }

    /// Returns whether the token is currently free.
    pub fn is_free(&self) -> bool {
        self.token.is_available()
    }
}

impl<T> fmt::Debug for ExclusiveGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveGate")
            .field("free", &self.is_free())
            .finish()
    }
}

/// Proof of holding the gate; dereferences to the protected state.
pub struct GateGuard<'g, T> {
    lease: HandleLease<'g, T>,
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.lease
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.lease
    }
}

impl<T> Drop for GateGuard<'_, T> {
    fn drop(&mut self) {
        debug!("event=gate_release module=lock status=ok");
    }
}
