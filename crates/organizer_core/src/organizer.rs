//! Owning handle of one organizer instance.
//!
//! # Responsibility
//! - Own the exclusive gate around the session.
//! - Hand out the environment and event bus without taking the gate.
//!
//! # Invariants
//! - The session is only reachable through `session()`, which blocks until
//!   the gate is free.
//! - Dropping the organizer cancels the armed alarm timer.

use crate::events::EventBus;
use crate::lock::{ExclusiveGate, GateGuard};
use crate::session::{Environment, Session};
use log::info;
use std::sync::Arc;

/// Registry of open stores with its alarm scheduler.
#[derive(Debug)]
pub struct Organizer {
    gate: Arc<ExclusiveGate<Session>>,
    env: Arc<Environment>,
}

impl Organizer {
    pub fn new(env: Environment) -> Self {
        let env = Arc::new(env);
        let gate = Arc::new_cyclic(|gate| {
            ExclusiveGate::new(Session::new(Arc::clone(&env), gate.clone()))
        });
        info!("event=organizer_start module=organizer status=ok");
        Self { gate, env }
    }

    /// Takes the gate for one logical operation.
    ///
    /// Not reentrant: calling it again before the guard is dropped, or from
    /// an event subscriber, deadlocks.
    pub fn session(&self) -> GateGuard<'_, Session> {
        self.gate.acquire()
    }

    /// Takes the gate only if it is free.
    pub fn try_session(&self) -> Option<GateGuard<'_, Session>> {
        self.gate.try_acquire()
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn events(&self) -> &EventBus {
        &self.env.events
    }
}

impl Default for Organizer {
    fn default() -> Self {
        Self::new(Environment::default())
    }
}

impl Drop for Organizer {
    fn drop(&mut self) {
        self.gate.acquire().cancel_timer();
        info!("event=organizer_stop module=organizer status=ok");
    }
}
