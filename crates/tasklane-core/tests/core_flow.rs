use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tasklane_core::activity::ActivityKind;
use tasklane_core::auth::UserIdentity;
use tasklane_core::backend::{NoticeLevel, TaskBackend};
use tasklane_core::commands::Session;
use tasklane_core::datastore::DataStore;
use tasklane_core::task::{Attachment, TaskDraft, TaskPatch, TaskStatus};
use tempfile::tempdir;

fn user(uid: &str) -> UserIdentity {
    UserIdentity {
        uid: uid.to_string(),
        display_name: None,
    }
}

fn titles(session: &Session) -> Vec<String> {
    session
        .store
        .read(|c| c.tasks().iter().map(|task| task.title.clone()).collect())
}

#[tokio::test]
async fn writes_reach_the_datastore_and_survive_a_new_session() {
    let temp = tempdir().expect("tempdir");
    let backend = Arc::new(DataStore::open(temp.path()).expect("open datastore"));
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

    let mut session = Session::open(backend.clone(), user("ada"), 200).expect("open session");
    let ids: Vec<_> = ["one", "two", "three"]
        .iter()
        .map(|title| {
            session
                .store
                .update(|c| c.create(TaskDraft::titled(*title), now))
                .expect("create")
        })
        .collect();
    session.store.update(|c| c.reorder(ids[2], ids[0], now));
    let notices = session.settle().await.expect("settle");
    assert!(notices.is_empty());

    let stored = backend.load_owned("ada").expect("load");
    let by_order: Vec<_> = stored.iter().map(|task| (task.order, task.title.as_str())).collect();
    assert_eq!(by_order, vec![(0, "three"), (1, "one"), (2, "two")]);

    let reopened = Session::open(backend.clone(), user("ada"), 200).expect("reopen");
    assert_eq!(reopened.store.read(|c| c.len()), 3);

    let other = Session::open(backend, user("grace"), 200).expect("other user");
    assert!(other.store.read(|c| c.is_empty()));
}

#[tokio::test]
async fn moves_survive_the_snapshot_round_trip() {
    let temp = tempdir().expect("tempdir");
    let backend = Arc::new(DataStore::open(temp.path()).expect("open datastore"));
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

    let mut session = Session::open(backend.clone(), user("ada"), 200).expect("open session");
    let ids: Vec<_> = ["one", "two", "three"]
        .iter()
        .map(|title| {
            session
                .store
                .update(|c| c.create(TaskDraft::titled(*title), now))
                .expect("create")
        })
        .collect();
    session.store.update(|c| c.reorder(ids[2], ids[0], now));
    session.settle().await.expect("settle");

    assert_eq!(titles(&session), vec!["three", "one", "two"]);
    let orders: Vec<i64> = session.store.read(|c| c.tasks().iter().map(|task| task.order).collect());
    assert_eq!(orders, vec![0, 1, 2]);

    let mut next = Session::open(backend.clone(), user("ada"), 200).expect("second session");
    assert_eq!(titles(&next), vec!["three", "one", "two"]);
    next.store.update(|c| c.reorder(ids[1], ids[0], now));
    next.settle().await.expect("settle");

    assert_eq!(titles(&next), vec!["three", "two", "one"]);
    let stored: Vec<_> = backend
        .load_owned("ada")
        .expect("load")
        .into_iter()
        .map(|task| (task.order, task.title))
        .collect();
    assert_eq!(
        stored,
        vec![
            (0, "three".to_string()),
            (1, "two".to_string()),
            (2, "one".to_string()),
        ]
    );
}

#[tokio::test]
async fn failed_write_is_reported_and_next_snapshot_wins() {
    let temp = tempdir().expect("tempdir");
    let backend = Arc::new(DataStore::open(temp.path()).expect("open datastore"));
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

    let mut seed = Session::open(backend.clone(), user("ada"), 200).expect("seed session");
    let doomed = seed
        .store
        .update(|c| c.create(TaskDraft::titled("doomed"), now))
        .expect("create");
    seed.store
        .update(|c| c.create(TaskDraft::titled("kept"), now))
        .expect("create");
    seed.settle().await.expect("settle seed");

    let mut session = Session::open(backend.clone(), user("ada"), 200).expect("open session");
    // Another client removes the task behind this session's back.
    backend.delete(doomed).expect("remote delete");

    // The local edit still applies optimistically.
    session
        .store
        .update(|c| c.update(doomed, TaskPatch::status(TaskStatus::Completed), now).map(|_| ()))
        .expect("local update");
    assert_eq!(session.store.read(|c| c.len()), 2);

    let notices = session.settle().await.expect("settle");

    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert!(notices[0].message.contains("task not found"));
    assert_eq!(titles(&session), vec!["kept".to_string()]);
}

#[tokio::test]
async fn selection_persists_and_stale_ids_clear_it() {
    let temp = tempdir().expect("tempdir");
    let backend = Arc::new(DataStore::open(temp.path()).expect("open datastore"));
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

    let mut session = Session::open(backend.clone(), user("ada"), 200).expect("open session");
    let a = session.store.update(|c| c.create(TaskDraft::titled("a"), now)).expect("create");
    let b = session.store.update(|c| c.create(TaskDraft::titled("b"), now)).expect("create");
    session.store.update(|c| {
        c.toggle_selection(a);
        c.toggle_selection(b);
    });
    session.settle().await.expect("settle");

    let mut again = Session::open(backend.clone(), user("ada"), 200).expect("reopen");
    assert_eq!(again.store.read(|c| c.selection().len()), 2);
    let updated = again
        .store
        .update(|c| c.bulk_status_change_selected(TaskStatus::InProgress, now));
    assert_eq!(updated, 2);
    again.settle().await.expect("settle");

    let statuses: Vec<_> = backend
        .load_owned("ada")
        .expect("load")
        .iter()
        .map(|task| task.status)
        .collect();
    assert_eq!(statuses, vec![TaskStatus::InProgress, TaskStatus::InProgress]);

    let mut third = Session::open(backend.clone(), user("ada"), 200).expect("third");
    assert!(third.store.read(|c| c.selection().is_empty()));
    third.store.update(|c| c.toggle_selection(a));
    third.settle().await.expect("settle");
    backend.delete(a).expect("remote delete");

    let fourth = Session::open(backend, user("ada"), 200).expect("fourth");
    assert!(fourth.store.read(|c| c.selection().is_empty()));
}

#[tokio::test]
async fn attachments_are_uploaded_and_activity_is_appended() {
    let temp = tempdir().expect("tempdir");
    let backend = Arc::new(DataStore::open(temp.path()).expect("open datastore"));
    let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();

    let mut session = Session::open(backend.clone(), user("ada"), 200).expect("open session");
    let id = session
        .store
        .update(|c| c.create(TaskDraft::titled("receipts"), now))
        .expect("create");
    let locator = backend
        .upload_attachment("ada", b"total: 12.50", "march.txt")
        .expect("upload");
    assert!(locator.starts_with("file://"));
    let on_disk = locator.trim_start_matches("file://");
    assert_eq!(std::fs::read_to_string(on_disk).expect("read blob"), "total: 12.50");

    session
        .store
        .update(|c| {
            c.add_attachment(
                id,
                Attachment {
                    name: "march.txt".to_string(),
                    locator: locator.clone(),
                },
                now,
            )
        })
        .expect("attach");
    session.settle().await.expect("settle");

    let stored = backend.load_owned("ada").expect("load");
    assert_eq!(stored[0].attachments.len(), 1);
    assert_eq!(stored[0].attachments[0].locator, locator);

    let kinds: Vec<_> = backend
        .load_activity("ada")
        .expect("activity")
        .iter()
        .map(|entry| entry.kind)
        .collect();
    assert_eq!(kinds, vec![ActivityKind::Create, ActivityKind::AttachmentAdded]);
}
