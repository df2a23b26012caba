//! Alarm search, timer arming and activation.
//!
//! # Responsibility
//! - Find the nearest alarm after each open store's watermark.
//! - Keep at most one timer armed for it and activate its alarms when it
//!   fires.
//! - Move snoozed and dismissed alarms through their statuses.
//!
//! # Invariants
//! - Every method runs with the exclusive gate held, including timer
//!   callbacks, which acquire the gate before touching the session.
//! - A timer callback whose generation is not the armed one does nothing.
//! - Activating non-stale alarms advances every open store's watermark to
//!   the activation time; stale activation leaves watermarks alone.

use super::book::{AlarmBook, AlarmRecord, AlarmStatus};
use super::timer::AlarmTimer;
use crate::events::{AlarmCleared, AlarmFired};
use crate::lock::ExclusiveGate;
use crate::model::occurrence::AlarmId;
use crate::occurrence::next_store_alarms;
use crate::session::Session;
use crate::store::StoreResult;
use log::{debug, error, info};
use std::path::Path;
use std::sync::Weak;
use std::time::Duration;

/// Result of one `restart_timer` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// A timer is waiting for the next alarm.
    Armed,
    /// The next alarm was already due and got activated; search again.
    Rescan,
    /// Nothing left to wait for.
    Idle,
}

/// Nearest alarm time with every alarm ringing at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextAlarm {
    pub time: i64,
    pub alarms: Vec<AlarmRecord>,
}

impl NextAlarm {
    fn merge(next: &mut Option<NextAlarm>, time: i64, alarms: Vec<AlarmRecord>) {
        if alarms.is_empty() {
            return;
        }
        match next.as_mut() {
            Some(current) if current.time == time => current.alarms.extend(alarms),
            Some(current) if current.time < time => {}
            _ => *next = Some(NextAlarm { time, alarms }),
        }
    }
}

/// Scheduler state kept inside the session.
#[derive(Debug)]
pub(crate) struct AlarmScheduler {
    pub(crate) book: AlarmBook,
    timer: Option<AlarmTimer>,
    generation: u64,
    /// Alarms the armed timer activates.
    pending: Vec<AlarmRecord>,
    enabled: bool,
    gate: Weak<ExclusiveGate<Session>>,
}

impl AlarmScheduler {
    pub(crate) fn new(gate: Weak<ExclusiveGate<Session>>) -> Self {
        Self {
            book: AlarmBook::new(),
            timer: None,
            generation: 0,
            pending: Vec::new(),
            enabled: false,
            gate,
        }
    }
}

impl Session {
    /// Enables the scheduler and runs a first search.
    pub fn start_alarms(&mut self) -> StoreResult<()> {
        self.scheduler.enabled = true;
        info!("event=alarms_start module=alarm status=ok");
        self.search_alarms()
    }

    /// Disables the scheduler and cancels the armed timer.
    pub fn stop_alarms(&mut self) {
        self.scheduler.enabled = false;
        self.cancel_timer();
        info!("event=alarms_stop module=alarm status=ok");
    }

    pub fn alarms_enabled(&self) -> bool {
        self.scheduler.enabled
    }

    /// Searches every open store and re-arms the timer.
    ///
    /// Loops while the nearest alarm is already due, so a single call
    /// catches up with every alarm up to now.
    pub fn search_alarms(&mut self) -> StoreResult<()> {
        loop {
            let now = self.env.now();
            let overdue = self.scheduler.book.overdue_snoozes(now);
            let next = self.find_next_alarm(now)?;
            if self.restart_timer(overdue, next) != TimerOutcome::Rescan {
                return Ok(());
            }
        }
    }

    fn find_next_alarm(&self, now: i64) -> StoreResult<Option<NextAlarm>> {
        let mut next = None;
        for (path, store) in &self.stores {
            let after = self.scheduler.book.watermark(path).unwrap_or(now);
            if let Some((time, occurrences)) =
                next_store_alarms(store, &self.env.resolvers, after)?
            {
                let alarms = occurrences
                    .into_iter()
                    .filter_map(AlarmRecord::pending)
                    .collect();
                NextAlarm::merge(&mut next, time, alarms);
            }
        }
        for (until, record) in self.scheduler.book.future_snoozes(now) {
            NextAlarm::merge(&mut next, until, vec![record]);
        }
        Ok(next)
    }

    /// Replaces the armed timer.
    ///
    /// `overdue` alarms are activated right away as stale. A `next` alarm
    /// that is already due is activated too and `Rescan` is returned.
    pub fn restart_timer(
        &mut self,
        overdue: Vec<AlarmRecord>,
        next: Option<NextAlarm>,
    ) -> TimerOutcome {
        self.cancel_timer();
        let now = self.env.now();
        if !overdue.is_empty() {
            self.activate_alarms(now, overdue, true);
        }

        let Some(next) = next else {
            // Only moves watermarks up to now.
            self.activate_alarms(now, Vec::new(), false);
            return TimerOutcome::Idle;
        };

        let delay = next.time.saturating_sub(now);
        if delay <= 0 {
            self.activate_alarms(next.time, next.alarms, false);
            return TimerOutcome::Rescan;
        }

        match self.arm_timer(next.time, delay, next.alarms) {
            Ok(()) => TimerOutcome::Armed,
            Err(err) => {
                error!(
                    "event=timer_arm module=alarm status=error error_code=spawn_failed error={err}"
                );
                TimerOutcome::Idle
            }
        }
    }

    fn arm_timer(
        &mut self,
        fire_at: i64,
        delay_secs: i64,
        alarms: Vec<AlarmRecord>,
    ) -> std::io::Result<()> {
        self.scheduler.generation += 1;
        let generation = self.scheduler.generation;
        let gate = Weak::clone(&self.scheduler.gate);
        let delay = Duration::from_secs(u64::try_from(delay_secs).unwrap_or(0));

        let timer = AlarmTimer::start(generation, fire_at, delay, move || {
            let Some(gate) = gate.upgrade() else {
                return;
            };
            let mut session = gate.acquire();
            session.fire_timer(generation);
        })?;

        debug!(
            "event=timer_arm module=alarm status=ok generation={generation} fire_at={fire_at} alarms={}",
            alarms.len()
        );
        self.scheduler.pending = alarms;
        self.scheduler.timer = Some(timer);
        Ok(())
    }

    /// Activates the alarms of the timer identified by `generation`, then
    /// searches again.
    pub(crate) fn fire_timer(&mut self, generation: u64) {
        let armed = self
            .scheduler
            .timer
            .as_ref()
            .is_some_and(|timer| timer.generation() == generation);
        if !armed {
            debug!("event=timer_fire module=alarm status=skipped generation={generation}");
            return;
        }
        let Some(timer) = self.scheduler.timer.take() else {
            return;
        };
        let fire_at = timer.fire_at();
        let alarms = std::mem::take(&mut self.scheduler.pending);
        self.activate_alarms(fire_at, alarms, false);
        if let Err(err) = self.search_alarms() {
            error!("event=alarm_search module=alarm status=error error={err}");
        }
    }

    /// Marks `alarms` active and announces them.
    ///
    /// Alarms whose store is closed or whose item is gone are dropped.
    /// Returns how many alarms fired.
    pub fn activate_alarms(&mut self, time: i64, alarms: Vec<AlarmRecord>, stale: bool) -> usize {
        let mut fired = 0;
        for mut alarm in alarms {
            let live = self
                .stores
                .get(&alarm.store)
                .is_some_and(|store| store.contains_item(alarm.item));
            if !live {
                debug!(
                    "event=alarm_activate module=alarm status=skipped item={}",
                    alarm.item
                );
                self.scheduler.book.remove(alarm.id);
                continue;
            }
            alarm.status = AlarmStatus::Active;
            self.scheduler.book.upsert(alarm.clone());
            self.env
                .events
                .alarm_fired
                .publish(&AlarmFired { alarm, stale });
            fired += 1;
        }

        if !stale {
            for path in self.stores.keys() {
                self.scheduler.book.advance_watermark(path, time);
            }
        }
        if fired > 0 {
            info!("event=alarm_activate module=alarm status=ok count={fired} stale={stale}");
        }
        fired
    }

    /// Cancels the armed timer, if any. Safe to call repeatedly.
    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.scheduler.timer.take() {
            if timer.is_alive() {
                debug!(
                    "event=timer_cancel module=alarm status=ok generation={}",
                    timer.generation()
                );
            }
            timer.cancel();
        }
        self.scheduler.pending.clear();
    }

    /// Re-runs the search when the scheduler is enabled, logging failures.
    pub(crate) fn refresh_alarms(&mut self) {
        if !self.scheduler.enabled {
            return;
        }
        if let Err(err) = self.search_alarms() {
            error!("event=alarm_search module=alarm status=error error={err}");
        }
    }

    /// Snoozes active alarms for `seconds`; returns how many changed.
    pub fn snooze_alarms(&mut self, ids: &[AlarmId], seconds: i64) -> usize {
        let until = self.env.now().saturating_add(seconds);
        let mut snoozed = 0;
        for id in ids {
            if let Some(record) = self.scheduler.book.get_mut(*id) {
                if record.status == AlarmStatus::Active {
                    record.status = AlarmStatus::Snoozed { until };
                    snoozed += 1;
                }
            }
        }
        if snoozed > 0 {
            info!("event=alarm_snooze module=alarm status=ok count={snoozed} until={until}");
            self.refresh_alarms();
        }
        snoozed
    }

    /// Dismisses active or snoozed alarms; returns how many changed.
    pub fn dismiss_alarms(&mut self, ids: &[AlarmId]) -> usize {
        let mut dismissed = Vec::new();
        for id in ids {
            if let Some(record) = self.scheduler.book.get_mut(*id) {
                if matches!(
                    record.status,
                    AlarmStatus::Active | AlarmStatus::Snoozed { .. }
                ) {
                    record.status = AlarmStatus::Dismissed;
                    dismissed.push(*id);
                }
            }
        }
        for alarm in &dismissed {
            self.env
                .events
                .alarm_cleared
                .publish(&AlarmCleared { alarm: *alarm });
        }
        if !dismissed.is_empty() {
            info!(
                "event=alarm_dismiss module=alarm status=ok count={}",
                dismissed.len()
            );
            self.refresh_alarms();
        }
        dismissed.len()
    }

    pub fn active_alarms(&self) -> Vec<AlarmRecord> {
        self.scheduler.book.active_records().cloned().collect()
    }

    pub fn active_alarm_count(&self) -> usize {
        self.scheduler.book.active_records().count()
    }

    pub fn alarm_status(&self, id: AlarmId) -> Option<AlarmStatus> {
        self.scheduler.book.get(id).map(|record| record.status)
    }

    /// Alarms waiting for the armed timer.
    pub fn pending_alarms(&self) -> &[AlarmRecord] {
        &self.scheduler.pending
    }

    /// Time the armed timer fires at.
    pub fn armed_alarm_time(&self) -> Option<i64> {
        self.scheduler.timer.as_ref().map(AlarmTimer::fire_at)
    }

    /// Time of the last completed alarm search of an open store.
    pub fn alarm_watermark(&self, path: impl AsRef<Path>) -> Option<i64> {
        let path = crate::store::normalize_path(path.as_ref());
        self.scheduler.book.watermark(&path)
    }
}
