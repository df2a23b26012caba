//! Shared sinks that rule resolvers contribute to.

use crate::model::item::ItemId;
use crate::model::occurrence::Occurrence;
use std::path::Path;

/// Occurrences intersecting one `[min_t, max_t]` query window.
#[derive(Debug, Clone)]
pub struct OccurrenceAccumulator {
    min_t: i64,
    max_t: i64,
    tracked: Vec<Occurrence>,
}

impl OccurrenceAccumulator {
    pub fn new(min_t: i64, max_t: i64) -> Self {
        Self {
            min_t,
            max_t,
            tracked: Vec::new(),
        }
    }

    pub fn min_t(&self) -> i64 {
        self.min_t
    }

    pub fn max_t(&self) -> i64 {
        self.max_t
    }

    /// Whether `occ` starts in the window, spans its lower bound, or rings in
    /// it.
    pub fn in_window(&self, occ: &Occurrence) -> bool {
        let window = self.min_t..=self.max_t;
        window.contains(&occ.start)
            || (occ.start < self.min_t && occ.effective_end() >= self.min_t)
            || occ.alarm.is_some_and(|alarm| window.contains(&alarm))
    }

    /// Tracks `occ` if it intersects the window. Returns whether it was kept.
    pub fn add(&mut self, occ: Occurrence) -> bool {
        if !self.in_window(&occ) {
            return false;
        }
        self.tracked.push(occ);
        true
    }

    /// Replaces the tracked occurrence describing the same slot as `occ`.
    ///
    /// Without a match `occ` goes through `add`, or is tracked
    /// unconditionally when `force` is set.
    pub fn update(&mut self, occ: Occurrence, force: bool) -> bool {
        if let Some(existing) = self.tracked.iter_mut().find(|other| other.same_slot(&occ)) {
            *existing = occ;
            return true;
        }
        if force {
            self.tracked.push(occ);
            return true;
        }
        self.add(occ)
    }

    /// Removes occurrences of one item starting in `[start, end]`, or
    /// overlapping it when `inclusive`.
    pub fn except_(&mut self, store: &Path, item: ItemId, start: i64, end: i64, inclusive: bool) {
        self.tracked.retain(|occ| {
            occ.item != item || occ.store.as_path() != store || !excepted(occ, start, end, inclusive)
        });
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn into_occurrences(self) -> Vec<Occurrence> {
        self.tracked
    }
}

pub(crate) fn excepted(occ: &Occurrence, start: i64, end: i64, inclusive: bool) -> bool {
    if inclusive {
        occ.start <= end && occ.effective_end() >= start
    } else {
        (start..=end).contains(&occ.start)
    }
}

/// Earliest alarm offered by each rule of one item after a watermark.
///
/// Occurrence rules offer the first occurrence whose alarm is strictly later
/// than `after`; exception rules remove offered occurrences.
#[derive(Debug, Clone)]
pub struct AlarmCandidates {
    after: i64,
    offered: Vec<Occurrence>,
    earliest: Option<i64>,
    /// Lowest alarm a removed offer's rule can ring at outside the
    /// exception that removed it.
    resume: Option<i64>,
}

impl AlarmCandidates {
    pub fn new(after: i64) -> Self {
        Self {
            after,
            offered: Vec::new(),
            earliest: None,
            resume: None,
        }
    }

    /// Alarms at or before this time are not offered.
    pub fn after(&self) -> i64 {
        self.after
    }

    pub fn offer(&mut self, occ: Occurrence) -> bool {
        let Some(alarm) = occ.alarm else {
            return false;
        };
        if alarm <= self.after {
            return false;
        }
        self.earliest = Some(self.earliest.map_or(alarm, |earliest| earliest.min(alarm)));
        self.offered.push(occ);
        true
    }

    /// Same matching as `OccurrenceAccumulator::except_`, for one item.
    pub fn except_(&mut self, start: i64, end: i64, inclusive: bool) {
        let resume = &mut self.resume;
        self.offered.retain(|occ| {
            if !excepted(occ, start, end, inclusive) {
                return true;
            }
            // Later starts up to `end` fall under the same exception.
            if let Some(alarm) = occ.alarm {
                let skip = alarm.saturating_add(end.saturating_sub(occ.start));
                *resume = Some(resume.map_or(skip, |current| current.min(skip)));
            }
            false
        });
    }

    /// Earliest alarm offered, including offers removed by exceptions.
    pub fn earliest_offered(&self) -> Option<i64> {
        self.earliest
    }

    /// Watermark for the next pass when nothing survived at
    /// `earliest_offered`.
    ///
    /// Skips past the exceptions that removed offers, but never beyond a
    /// surviving offer. Always at or after `earliest_offered`.
    pub fn next_after(&self) -> Option<i64> {
        let earliest = self.earliest?;
        let mut next = self.resume.unwrap_or(earliest);
        if let Some(surviving) = self.offered.iter().filter_map(|occ| occ.alarm).min() {
            next = next.min(surviving - 1);
        }
        Some(next.max(earliest))
    }

    /// Surviving offers ringing at `time`.
    pub fn take_at(&mut self, time: i64) -> Vec<Occurrence> {
        let (at, rest) = std::mem::take(&mut self.offered)
            .into_iter()
            .partition(|occ| occ.alarm == Some(time));
        self.offered = rest;
        at
    }
}

#[cfg(test)]
mod tests {
    use super::{AlarmCandidates, OccurrenceAccumulator};
    use crate::model::occurrence::Occurrence;
    use std::path::Path;
    use uuid::Uuid;

    const STORE: &str = "/tmp/store.organizer";

    fn occ(item: Uuid, start: i64, end: Option<i64>, alarm: Option<i64>) -> Occurrence {
        Occurrence::new(STORE, item, start, end, alarm)
    }

    #[test]
    fn add_checks_start_straddle_and_alarm() {
        let item = Uuid::new_v4();
        let mut acc = OccurrenceAccumulator::new(100, 200);
        assert!(acc.add(occ(item, 150, None, None)));
        assert!(acc.add(occ(item, 50, Some(100), None)));
        assert!(acc.add(occ(item, 500, None, Some(180))));
        assert!(!acc.add(occ(item, 50, Some(99), None)));
        assert!(!acc.add(occ(item, 201, None, Some(99))));
        assert_eq!(acc.len(), 3);
    }

    #[test]
    fn update_replaces_same_slot_and_forces_outside_window() {
        let item = Uuid::new_v4();
        let mut acc = OccurrenceAccumulator::new(100, 200);
        acc.add(occ(item, 150, Some(160), Some(140)));

        let mut fired = occ(item, 150, Some(160), Some(140));
        fired.alarm_id = Some(Uuid::new_v4());
        assert!(acc.update(fired.clone(), true));
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.clone().into_occurrences()[0].alarm_id, fired.alarm_id);

        assert!(!acc.update(occ(item, 900, None, Some(800)), false));
        assert!(acc.update(occ(item, 900, None, Some(800)), true));
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn except_without_tracked_occurrences_is_a_no_op() {
        let mut acc = OccurrenceAccumulator::new(0, 10);
        acc.except_(Path::new(STORE), Uuid::new_v4(), 0, 10, true);
        assert!(acc.is_empty());
    }

    #[test]
    fn except_removes_by_start_or_overlap() {
        let item = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut acc = OccurrenceAccumulator::new(0, 1_000);
        acc.add(occ(item, 100, Some(300), None));
        acc.add(occ(item, 250, None, None));
        acc.add(occ(other, 250, None, None));

        acc.except_(Path::new(STORE), item, 200, 260, false);
        let left = acc.clone().into_occurrences();
        assert_eq!(left.len(), 2);
        assert!(left.iter().any(|o| o.item == item && o.start == 100));

        acc.except_(Path::new(STORE), item, 200, 260, true);
        let left = acc.into_occurrences();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].item, other);
    }

    #[test]
    fn candidates_track_earliest_offer_even_when_excepted() {
        let item = Uuid::new_v4();
        let mut candidates = AlarmCandidates::new(100);
        assert!(!candidates.offer(occ(item, 200, None, Some(100))));
        assert!(candidates.offer(occ(item, 300, None, Some(150))));
        assert!(candidates.offer(occ(item, 400, None, Some(350))));
        candidates.except_(300, 300, false);

        assert_eq!(candidates.earliest_offered(), Some(150));
        assert!(candidates.take_at(150).is_empty());
        assert_eq!(candidates.take_at(350).len(), 1);
    }

    #[test]
    fn next_after_skips_the_removing_exception_up_to_survivors() {
        let item = Uuid::new_v4();
        let mut candidates = AlarmCandidates::new(0);
        candidates.offer(occ(item, 100, None, Some(90)));
        candidates.except_(0, 5_000, false);
        // Starts up to 5_000 are excepted, so alarms up to 4_990 are too.
        assert_eq!(candidates.next_after(), Some(4_990));

        candidates.offer(occ(item, 700, None, Some(600)));
        assert_eq!(candidates.next_after(), Some(599));
    }
}
