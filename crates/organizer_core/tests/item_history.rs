use organizer_core::{
    CoreConfig, Environment, ItemsDeleted, Organizer, Rule, StoreError,
};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn open_new_store(organizer: &Organizer, dir: &Path, name: &str) -> PathBuf {
    let mut session = organizer.session();
    let path = session.create_store(dir.join(name)).unwrap();
    session.open_store(&path).unwrap();
    path
}

fn history_groups(path: &Path) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row("SELECT COUNT(DISTINCT group_id) FROM history;", [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[test]
fn undo_and_redo_replay_whole_groups() {
    let dir = tempfile::tempdir().unwrap();
    let organizer = Organizer::default();
    let path = open_new_store(&organizer, dir.path(), "undo.organizer");
    let mut session = organizer.session();

    let first = session.begin_history_group();
    let parent = session.create_item(&path, None, "Trip", first).unwrap();
    let child = session.create_item(&path, Some(parent), "Pack", first).unwrap();

    let second = session.begin_history_group();
    session
        .update_item_text(&path, child, "Pack bags", second)
        .unwrap();
    assert_eq!(session.item_text(&path, child).unwrap(), "Pack bags");

    assert!(session.undo(&path).unwrap());
    assert_eq!(session.item_text(&path, child).unwrap(), "Pack");

    // The first group created both items, so both go away together.
    assert!(session.undo(&path).unwrap());
    assert_eq!(session.store(&path).unwrap().item_count(), 0);
    assert!(!session.undo(&path).unwrap());

    assert!(session.redo(&path).unwrap());
    assert_eq!(session.store(&path).unwrap().item_count(), 2);
    assert_eq!(session.item_text(&path, child).unwrap(), "Pack");

    assert!(session.redo(&path).unwrap());
    assert_eq!(session.item_text(&path, child).unwrap(), "Pack bags");
    assert!(!session.redo(&path).unwrap());
}

#[test]
fn new_edit_discards_redo_branch() {
    let dir = tempfile::tempdir().unwrap();
    let organizer = Organizer::default();
    let path = open_new_store(&organizer, dir.path(), "branch.organizer");
    let mut session = organizer.session();

    let group = session.begin_history_group();
    let item = session.create_item(&path, None, "a", group).unwrap();
    let group = session.begin_history_group();
    session.update_item_text(&path, item, "b", group).unwrap();

    assert!(session.undo(&path).unwrap());
    let group = session.begin_history_group();
    session.update_item_text(&path, item, "c", group).unwrap();

    assert!(!session.redo(&path).unwrap());
    assert_eq!(session.item_text(&path, item).unwrap(), "c");
}

#[test]
fn group_kept_across_gate_releases_is_one_undo_step() {
    let dir = tempfile::tempdir().unwrap();
    let organizer = Organizer::default();
    let path = open_new_store(&organizer, dir.path(), "group.organizer");

    let group = organizer.session().begin_history_group();
    let first = organizer
        .session()
        .create_item(&path, None, "first", group)
        .unwrap();
    let second = organizer
        .session()
        .create_item(&path, None, "second", group)
        .unwrap();

    let mut session = organizer.session();
    assert!(session.undo(&path).unwrap());
    let store = session.store(&path).unwrap();
    assert!(!store.contains_item(first));
    assert!(!store.contains_item(second));
}

#[test]
fn rule_edits_are_undoable() {
    let dir = tempfile::tempdir().unwrap();
    let organizer = Organizer::default();
    let path = open_new_store(&organizer, dir.path(), "rules.organizer");
    let mut session = organizer.session();

    let group = session.begin_history_group();
    let item = session.create_item(&path, None, "Standup", group).unwrap();
    assert!(session.item_rules(&path, item).unwrap().is_empty());

    let rules = vec![
        Rule::every_day(9 * 3_600, Some(900), Some(300)).unwrap(),
        Rule::except_once(86_400, 2 * 86_400, false).unwrap(),
    ];
    let group = session.begin_history_group();
    session.update_item_rules(&path, item, &rules, group).unwrap();
    assert_eq!(session.item_rules(&path, item).unwrap(), rules);

    assert!(session.undo(&path).unwrap());
    assert!(session.item_rules(&path, item).unwrap().is_empty());
}

#[test]
fn history_survives_save_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let organizer = Organizer::default();
    let path = open_new_store(&organizer, dir.path(), "reopen.organizer");
    let mut session = organizer.session();

    let group = session.begin_history_group();
    let item = session.create_item(&path, None, "kept", group).unwrap();
    session.save_store(&path).unwrap();
    session.close_store(&path).unwrap();

    session.open_store(&path).unwrap();
    assert!(session.store(&path).unwrap().contains_item(item));

    // Group ids keep growing past the ones already stored.
    let next = session.begin_history_group();
    assert!(next.id() > group.id());

    assert!(session.undo(&path).unwrap());
    assert!(!session.store(&path).unwrap().contains_item(item));
}

#[test]
fn history_is_pruned_to_the_limit_in_groups() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig {
        default_history_limit: 2,
        ..CoreConfig::default()
    };
    let organizer = Organizer::new(Environment::new(
        config,
        organizer_core::CompatibilitySet::for_current_core(),
    ));
    let path = open_new_store(&organizer, dir.path(), "prune.organizer");
    let mut session = organizer.session();

    for text in ["one", "two", "three", "four"] {
        let group = session.begin_history_group();
        // Two entries per group; pruning never splits them.
        session.create_item(&path, None, text, group).unwrap();
    }
    session.save_store(&path).unwrap();
    session.close_store(&path).unwrap();

    assert_eq!(history_groups(&path), 2);
}

#[test]
fn delete_items_removes_children_before_parents() {
    let dir = tempfile::tempdir().unwrap();
    let organizer = Organizer::default();
    let deleted_events = Arc::new(Mutex::new(Vec::<ItemsDeleted>::new()));
    {
        let deleted_events = Arc::clone(&deleted_events);
        organizer
            .events()
            .items_deleted
            .subscribe(move |event| deleted_events.lock().push(event.clone()));
    }
    let path = open_new_store(&organizer, dir.path(), "delete.organizer");
    let mut session = organizer.session();

    let group = session.begin_history_group();
    let root = session.create_item(&path, None, "root", group).unwrap();
    let middle = session.create_item(&path, Some(root), "middle", group).unwrap();
    let leaf = session.create_item(&path, Some(middle), "leaf", group).unwrap();
    let other = session.create_item(&path, None, "other", group).unwrap();

    let group = session.begin_history_group();
    let order = session
        .delete_items(&path, &[root, middle, leaf], group)
        .unwrap();
    assert_eq!(order, vec![leaf, middle, root]);

    let store = session.store(&path).unwrap();
    assert_eq!(store.item_ids(), vec![other]);

    let events = deleted_events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].items, order);

    // One undo restores the whole deletion.
    drop(events);
    assert!(session.undo(&path).unwrap());
    assert_eq!(session.store(&path).unwrap().item_count(), 4);
    assert_eq!(session.item_text(&path, leaf).unwrap(), "leaf");
}

#[test]
fn delete_items_rejects_sets_that_are_not_closed() {
    let dir = tempfile::tempdir().unwrap();
    let organizer = Organizer::default();
    let path = open_new_store(&organizer, dir.path(), "reject.organizer");
    let mut session = organizer.session();

    let group = session.begin_history_group();
    let parent = session.create_item(&path, None, "parent", group).unwrap();
    let child = session.create_item(&path, Some(parent), "child", group).unwrap();

    let group = session.begin_history_group();
    let err = session.delete_items(&path, &[parent], group).unwrap_err();
    match err {
        StoreError::UndeletableItems(items) => assert_eq!(items, vec![child]),
        other => panic!("unexpected error: {other}"),
    }

    let missing = uuid::Uuid::new_v4();
    let err = session.delete_items(&path, &[missing], group).unwrap_err();
    assert!(matches!(err, StoreError::ItemNotFound(id) if id == missing));

    // Nothing outside the rejected calls changed.
    assert_eq!(session.store(&path).unwrap().item_count(), 2);
}
