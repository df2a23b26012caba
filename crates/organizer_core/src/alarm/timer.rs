//! One-shot background timer.
//!
//! # Invariants
//! - The callback runs at most once, on the timer thread.
//! - `cancel` never blocks: the timer thread may itself be waiting for the
//!   gate held by the cancelling caller.
//! - Dropping an `AlarmTimer` disconnects its channel, which also cancels a
//!   waiting timer.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

const TIMER_THREAD_NAME: &str = "organizer-alarm-timer";

/// Armed timer firing a callback after a delay unless cancelled.
#[derive(Debug)]
pub struct AlarmTimer {
    generation: u64,
    fire_at: i64,
    cancel: Sender<()>,
    thread: JoinHandle<()>,
}

impl AlarmTimer {
    /// Spawns the timer thread.
    ///
    /// `generation` and `fire_at` are carried for the scheduler to match the
    /// callback against the timer it armed last.
    pub fn start(
        generation: u64,
        fire_at: i64,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<Self> {
        let (cancel, cancelled) = bounded::<()>(1);
        let thread = Builder::new()
            .name(TIMER_THREAD_NAME.to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(delay) {
                    callback();
                }
            })?;
        Ok(Self {
            generation,
            fire_at,
            cancel,
            thread,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Unix seconds the timer was armed for.
    pub fn fire_at(&self) -> i64 {
        self.fire_at
    }

    /// Whether the timer thread is still waiting or running its callback.
    pub fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Stops a waiting timer. A callback already running is not interrupted.
    pub fn cancel(self) {
        if self.is_alive() {
            // A full channel means cancel was already requested.
            let _ = self.cancel.try_send(());
        }
    }
}
