//! Runtime configuration and time source.
//!
//! # Responsibility
//! - Carry the defaults an embedding application may override.
//! - Supply "now" in unix epoch seconds to stores and the alarm scheduler.
//!
//! File parsing is left to the embedding application; `CoreConfig` only
//! derives serde traits so any format can be used.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default number of history groups kept per store.
pub const DEFAULT_HISTORY_LIMIT: u32 = 60;

/// Core configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// History limit written into newly created stores.
    pub default_history_limit: u32,
    /// Log level used by `init_logging_from_config`.
    pub log_level: String,
    /// File basename of the rolling log files.
    pub log_file_basename: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_history_limit: DEFAULT_HISTORY_LIMIT,
            log_level: crate::logging::default_log_level().to_string(),
            log_file_basename: crate::logging::DEFAULT_LOG_FILE_BASENAME.to_string(),
        }
    }
}

/// Source of the current time in unix epoch seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
            Err(before_epoch) => {
                -i64::try_from(before_epoch.duration().as_secs()).unwrap_or(i64::MAX)
            }
        }
    }
}

/// Manually driven clock for deterministic scheduling.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
