//! Alarm scheduling across open stores.
//!
//! - `book` holds watermarks and activated alarm records.
//! - `timer` is the one-shot background timer.
//! - `scheduler` drives search, arming and activation on the session.

pub mod book;
pub mod scheduler;
pub mod timer;

pub use book::{AlarmBook, AlarmRecord, AlarmStatus};
pub use scheduler::{NextAlarm, TimerOutcome};
pub use timer::AlarmTimer;
