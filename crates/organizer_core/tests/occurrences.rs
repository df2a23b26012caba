use organizer_core::{Environment, ManualClock, Organizer, Rule, SECONDS_PER_DAY};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const T: i64 = 1_700_000_000;

fn organizer_at(now: i64) -> (Organizer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let organizer = Organizer::new(Environment::default().with_clock(clock.clone()));
    (organizer, clock)
}

fn open_new_store(organizer: &Organizer, dir: &Path, name: &str) -> PathBuf {
    let mut session = organizer.session();
    let path = session.create_store(dir.join(name)).unwrap();
    session.open_store(&path).unwrap();
    path
}

#[test]
fn single_alarm_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (organizer, clock) = organizer_at(T - 5_000);
    let path = open_new_store(&organizer, dir.path(), "scenario.organizer");
    let mut session = organizer.session();

    let group = session.begin_history_group();
    let item = session.create_item(&path, None, "Dentist", group).unwrap();
    let rules = [Rule::occur_once(T, None, Some(3_600)).unwrap()];
    session.update_item_rules(&path, item, &rules, group).unwrap();

    let around_start = session.get_occurrences(T - 10, T + 10).unwrap();
    assert_eq!(around_start.len(), 1);
    assert_eq!(around_start[0].item, item);
    assert_eq!(around_start[0].start, T);
    assert_eq!(around_start[0].alarm, Some(T - 3_600));
    assert_eq!(around_start[0].alarm_id, None);

    // Found through its alarm only.
    let around_alarm = session.get_occurrences(T - 3_700, T - 3_500).unwrap();
    assert_eq!(around_alarm.len(), 1);
    assert_eq!(around_alarm[0].start, T);

    assert!(session.get_occurrences(T - 7_200, T - 7_100).unwrap().is_empty());

    session.start_alarms().unwrap();
    assert_eq!(session.armed_alarm_time(), Some(T - 3_600));

    clock.set(T - 3_600);
    session.search_alarms().unwrap();
    let active = session.active_alarms();
    assert_eq!(active.len(), 1);

    // Active alarms are forced into any window.
    let forced = session.get_occurrences(T - 7_200, T - 7_100).unwrap();
    assert_eq!(forced.len(), 1);
    assert_eq!(forced[0].start, T);
    assert_eq!(forced[0].alarm, Some(T - 3_600));
    assert_eq!(forced[0].alarm_id, Some(active[0].id));

    // The forced entry replaces the computed one instead of duplicating it.
    let around_start = session.get_occurrences(T - 10, T + 10).unwrap();
    assert_eq!(around_start.len(), 1);
    assert_eq!(around_start[0].alarm_id, Some(active[0].id));
}

#[test]
fn straddling_occurrence_is_included() {
    let dir = tempfile::tempdir().unwrap();
    let (organizer, _clock) = organizer_at(T);
    let path = open_new_store(&organizer, dir.path(), "straddle.organizer");
    let mut session = organizer.session();

    let group = session.begin_history_group();
    let item = session.create_item(&path, None, "Conference", group).unwrap();
    let rules = [Rule::occur_once(T, Some(T + 3 * SECONDS_PER_DAY), None).unwrap()];
    session.update_item_rules(&path, item, &rules, group).unwrap();

    let found = session
        .get_occurrences(T + SECONDS_PER_DAY, T + SECONDS_PER_DAY + 10)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert!(session
        .get_occurrences(T + 4 * SECONDS_PER_DAY, T + 5 * SECONDS_PER_DAY)
        .unwrap()
        .is_empty());
}

#[test]
fn exceptions_only_cancel_earlier_rules() {
    let dir = tempfile::tempdir().unwrap();
    let (organizer, _clock) = organizer_at(T);
    let path = open_new_store(&organizer, dir.path(), "except.organizer");
    let mut session = organizer.session();

    let day = SECONDS_PER_DAY;
    let group = session.begin_history_group();
    let daily = session.create_item(&path, None, "Walk", group).unwrap();
    session
        .update_item_rules(
            &path,
            daily,
            &[
                Rule::every_day(T, Some(1_800), None).unwrap(),
                Rule::except_once(T + day, T + 2 * day, false).unwrap(),
            ],
            group,
        )
        .unwrap();

    let reordered = session.create_item(&path, None, "Read", group).unwrap();
    session
        .update_item_rules(
            &path,
            reordered,
            &[
                Rule::except_once(T + day, T + 2 * day, false).unwrap(),
                Rule::every_day(T, None, None).unwrap(),
            ],
            group,
        )
        .unwrap();

    let found = session.get_occurrences(T, T + 4 * day - 1).unwrap();
    let mut walk = found
        .iter()
        .filter(|occ| occ.item == daily)
        .map(|occ| occ.start)
        .collect::<Vec<_>>();
    walk.sort();
    assert_eq!(walk, vec![T, T + 3 * day]);

    let read = found.iter().filter(|occ| occ.item == reordered).count();
    assert_eq!(read, 4);
}

#[test]
fn every_open_store_contributes() {
    let dir = tempfile::tempdir().unwrap();
    let (organizer, _clock) = organizer_at(T);
    let first = open_new_store(&organizer, dir.path(), "first.organizer");
    let second = open_new_store(&organizer, dir.path(), "second.organizer");
    let mut session = organizer.session();

    let group = session.begin_history_group();
    for path in [&first, &second] {
        let item = session.create_item(path, None, "Event", group).unwrap();
        session
            .update_item_rules(
                path,
                item,
                &[Rule::occur_once(T + 60, None, None).unwrap()],
                group,
            )
            .unwrap();
    }

    let found = session.get_occurrences(T, T + 120).unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().any(|occ| occ.store == first));
    assert!(found.iter().any(|occ| occ.store == second));

    session.close_store(&second).unwrap();
    let found = session.get_occurrences(T, T + 120).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].store, first);
}

#[test]
fn deleted_items_stop_occurring() {
    let dir = tempfile::tempdir().unwrap();
    let (organizer, _clock) = organizer_at(T);
    let path = open_new_store(&organizer, dir.path(), "deleted.organizer");
    let mut session = organizer.session();

    let group = session.begin_history_group();
    let item = session.create_item(&path, None, "Gone", group).unwrap();
    session
        .update_item_rules(
            &path,
            item,
            &[Rule::occur_once(T + 60, None, None).unwrap()],
            group,
        )
        .unwrap();

    let group = session.begin_history_group();
    session.delete_items(&path, &[item], group).unwrap();
    assert!(session.get_occurrences(T, T + 120).unwrap().is_empty());
}
