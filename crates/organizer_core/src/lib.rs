//! Persistence and scheduling core of an outliner.
//! Stores are SQLite files holding an item tree with per-item time rules;
//! the scheduler turns those rules into alarms.

pub mod alarm;
pub mod config;
pub mod db;
pub mod events;
pub mod extension;
pub mod lock;
pub mod logging;
pub mod model;
pub mod occurrence;
pub mod organizer;
pub mod repo;
pub mod session;
pub mod store;

pub use alarm::{AlarmRecord, AlarmStatus, NextAlarm, TimerOutcome};
pub use config::{Clock, CoreConfig, ManualClock, SystemClock, DEFAULT_HISTORY_LIMIT};
pub use events::{
    AlarmCleared, AlarmFired, EventBus, ItemsDeleted, Publisher, StoreClosed, StoreCopied,
    StoreCreated, StoreOpened, SubscriptionId,
};
pub use extension::compatibility::{CompatibilityError, CompatibilitySet};
pub use extension::manifest::{ComponentEntry, ComponentKind, ComponentValidationError};
pub use lock::{ExclusiveGate, GateGuard, HandleLease, HandleQueue};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::item::{Item, ItemId};
pub use model::occurrence::{AlarmId, Occurrence};
pub use model::rule::{Rule, RuleError, RuleTag, SECONDS_PER_DAY};
pub use occurrence::accumulator::{AlarmCandidates, OccurrenceAccumulator};
pub use occurrence::resolver::{
    ResolverRegistry, ResolverRegistryError, RuleContext, RuleResolver,
};
pub use organizer::Organizer;
pub use session::{Environment, Session};
pub use store::{HistoryGroup, Store, StoreError, StoreResult};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
