use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use super::*;

const H: Ms = 3_600_000;
const T0: Ms = 1_750_000_000_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("shareit_test_store");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Owner 1 with item 10; booker 2.
async fn seeded(name: &str) -> (MemoryStore, PathBuf) {
    let path = test_wal_path(name);
    let store = MemoryStore::open(&path).unwrap();
    store.register_user(1).await.unwrap();
    store.register_user(2).await.unwrap();
    store.list_item(10, 1, true).await.unwrap();
    (store, path)
}

fn new_booking(item_id: ItemId, start: Ms, end: Ms) -> NewBooking {
    NewBooking {
        item_id,
        booker_id: 2,
        span: Span::new(start, end),
    }
}

async fn insert(store: &MemoryStore, item_id: ItemId, start: Ms, end: Ms) -> Booking {
    let lock = store.lock_item(item_id).await.unwrap();
    store
        .insert_booking(&lock, new_booking(item_id, start, end))
        .await
        .unwrap()
}

async fn decide(store: &MemoryStore, b: &Booking, status: BookingStatus) -> Booking {
    let lock = store.lock_item(b.item_id).await.unwrap();
    store.update_booking_status(&lock, b.id, status).await.unwrap()
}

// ── Directory ────────────────────────────────────────────

#[tokio::test]
async fn directory_lookups() {
    let (store, _) = seeded("directory_lookups.wal").await;
    store.list_item(11, 1, false).await.unwrap();

    assert!(store.user_exists(1).await.unwrap());
    assert!(!store.user_exists(99).await.unwrap());
    assert_eq!(
        store.get_item(11).await.unwrap(),
        Some(ItemRecord { id: 11, owner_id: 1, available: false })
    );
    assert_eq!(store.get_item(99).await.unwrap(), None);
    assert_eq!(store.find_owned_item_ids(1).await.unwrap(), vec![10, 11]);
    assert!(store.find_owned_item_ids(2).await.unwrap().is_empty());
}

#[tokio::test]
async fn directory_rejects_duplicates_and_unknown_owner() {
    let (store, _) = seeded("directory_dupes.wal").await;
    assert!(matches!(store.register_user(1).await, Err(StoreError::DuplicateUser(1))));
    assert!(matches!(store.list_item(10, 1, true).await, Err(StoreError::DuplicateItem(10))));
    assert!(matches!(store.list_item(20, 77, true).await, Err(StoreError::UnknownUser(77))));
}

#[tokio::test]
async fn set_item_available_toggles() {
    let (store, _) = seeded("set_available.wal").await;
    let rec = store.set_item_available(10, false).await.unwrap();
    assert!(!rec.available);
    assert!(!store.get_item(10).await.unwrap().unwrap().available);
    assert_err!(store.set_item_available(99, true).await);
}

// ── Locks ────────────────────────────────────────────────

#[tokio::test]
async fn lock_unknown_item_fails() {
    let (store, _) = seeded("lock_unknown.wal").await;
    assert!(matches!(store.lock_item(99).await, Err(StoreError::UnknownItem(99))));
}

#[tokio::test]
async fn lock_for_other_item_is_rejected() {
    let (store, _) = seeded("lock_mismatch.wal").await;
    store.list_item(11, 1, true).await.unwrap();
    let b = insert(&store, 10, T0, T0 + H).await;

    let wrong = store.lock_item(11).await.unwrap();
    assert!(matches!(
        store.insert_booking(&wrong, new_booking(10, T0, T0 + H)).await,
        Err(StoreError::LockMismatch { held: 11, requested: 10 })
    ));
    assert!(matches!(
        store
            .update_booking_status(&wrong, b.id, BookingStatus::Approved)
            .await,
        Err(StoreError::LockMismatch { .. })
    ));
    // Nothing changed.
    assert_eq!(store.find_booking_by_id(b.id).await.unwrap(), Some(b));
}

#[tokio::test]
async fn item_lock_is_exclusive() {
    let (store, _) = seeded("lock_exclusive.wal").await;
    let store = Arc::new(store);
    let held = store.lock_item(10).await.unwrap();

    let contender = {
        let store = store.clone();
        tokio::spawn(async move { store.lock_item(10).await.map(|l| l.item_id()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!contender.is_finished());

    drop(held);
    assert_eq!(contender.await.unwrap().unwrap(), 10);
}

// ── Bookings ─────────────────────────────────────────────

#[tokio::test]
async fn insert_and_find_booking() {
    let (store, _) = seeded("insert_find.wal").await;
    let b = insert(&store, 10, T0, T0 + H).await;
    assert_eq!(b.status, BookingStatus::Waiting);
    assert_eq!(b.booker_id, 2);
    assert_eq!(store.find_booking_by_id(b.id).await.unwrap(), Some(b));
    assert_eq!(store.find_booking_by_id(Ulid::new()).await.unwrap(), None);
}

#[tokio::test]
async fn overlap_only_counts_approved() {
    let (store, _) = seeded("overlap_approved.wal").await;
    let waiting = insert(&store, 10, T0, T0 + 2 * H).await;
    let rejected = insert(&store, 10, T0, T0 + 2 * H).await;
    decide(&store, &rejected, BookingStatus::Rejected).await;

    let lock = store.lock_item(10).await.unwrap();
    assert!(!store
        .exists_overlapping_approved(&lock, Span::new(T0 + H, T0 + 3 * H))
        .await
        .unwrap());
    drop(lock);

    decide(&store, &waiting, BookingStatus::Approved).await;
    let lock = store.lock_item(10).await.unwrap();
    assert!(store
        .exists_overlapping_approved(&lock, Span::new(T0 + H, T0 + 3 * H))
        .await
        .unwrap());
    // Touching the end is not an overlap.
    assert!(!store
        .exists_overlapping_approved(&lock, Span::new(T0 + 2 * H, T0 + 3 * H))
        .await
        .unwrap());
}

#[tokio::test]
async fn update_status_of_unknown_booking() {
    let (store, _) = seeded("update_unknown.wal").await;
    let lock = store.lock_item(10).await.unwrap();
    let id = Ulid::new();
    let err = store
        .update_booking_status(&lock, id, BookingStatus::Approved)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingBooking(got) if got == id));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn query_by_booker_orders_newest_start_first() {
    let (store, _) = seeded("query_booker.wal").await;
    store.list_item(11, 1, true).await.unwrap();
    let a = insert(&store, 10, T0, T0 + H).await;
    let b = insert(&store, 11, T0 + 5 * H, T0 + 6 * H).await;
    let c = insert(&store, 10, T0 + 2 * H, T0 + 3 * H).await;

    let got = store
        .query_bookings(&BookingQuery::new(Scope::Booker(2)), Order::StartDesc)
        .await
        .unwrap();
    let ids: Vec<_> = got.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![b.id, c.id, a.id]);

    let none = store
        .query_bookings(&BookingQuery::new(Scope::Booker(1)), Order::StartDesc)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn query_start_ties_break_by_newest_id() {
    let (store, _) = seeded("query_ties.wal").await;
    let first = insert(&store, 10, T0, T0 + H).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = insert(&store, 10, T0, T0 + 2 * H).await;

    let got = store
        .query_bookings(&BookingQuery::new(Scope::Items(vec![10])), Order::StartDesc)
        .await
        .unwrap();
    assert_eq!(got[0].id, second.id);
    assert_eq!(got[1].id, first.id);
}

#[tokio::test]
async fn query_windows_and_status() {
    let (store, _) = seeded("query_windows.wal").await;
    let now = T0 + 10 * H;
    let past = insert(&store, 10, T0, T0 + H).await;
    let current = insert(&store, 10, now - H, now + H).await;
    let future = insert(&store, 10, now + 2 * H, now + 3 * H).await;
    decide(&store, &future, BookingStatus::Rejected).await;

    let scope = || Scope::Items(vec![10]);
    let run = |q: BookingQuery| {
        let store = &store;
        async move {
            store
                .query_bookings(&q, Order::StartDesc)
                .await
                .unwrap()
                .into_iter()
                .map(|b| b.id)
                .collect::<Vec<_>>()
        }
    };

    assert_eq!(run(BookingQuery::for_state(scope(), BookingState::Past, now)).await, vec![past.id]);
    assert_eq!(
        run(BookingQuery::for_state(scope(), BookingState::Current, now)).await,
        vec![current.id]
    );
    assert_eq!(
        run(BookingQuery::for_state(scope(), BookingState::Future, now)).await,
        vec![future.id]
    );
    assert_eq!(
        run(BookingQuery::for_state(scope(), BookingState::Rejected, now)).await,
        vec![future.id]
    );
    assert_eq!(
        run(BookingQuery::for_state(scope(), BookingState::Waiting, now)).await,
        vec![current.id, past.id]
    );
    assert_eq!(run(BookingQuery::for_state(scope(), BookingState::All, now)).await.len(), 3);
}

#[tokio::test]
async fn current_window_includes_both_edges() {
    let (store, _) = seeded("query_current_edges.wal").await;
    let b = insert(&store, 10, T0, T0 + H).await;
    for now in [T0, T0 + H] {
        let got = store
            .query_bookings(
                &BookingQuery::for_state(Scope::Booker(2), BookingState::Current, now),
                Order::StartDesc,
            )
            .await
            .unwrap();
        assert_eq!(got.len(), 1, "booking {} should be current at {now}", b.id);
    }
}

#[tokio::test]
async fn query_limit_and_alternate_orders() {
    let (store, _) = seeded("query_limit.wal").await;
    let long = insert(&store, 10, T0, T0 + 5 * H).await;
    let short = insert(&store, 10, T0 + H, T0 + 2 * H).await;

    let by_end = store
        .query_bookings(&BookingQuery::new(Scope::Items(vec![10])).limit(1), Order::EndDesc)
        .await
        .unwrap();
    assert_eq!(by_end.len(), 1);
    assert_eq!(by_end[0].id, long.id);

    let by_start = store
        .query_bookings(&BookingQuery::new(Scope::Items(vec![10])), Order::StartAsc)
        .await
        .unwrap();
    assert_eq!(by_start[0].id, long.id);
    assert_eq!(by_start[1].id, short.id);
}

#[tokio::test]
async fn query_booker_on_item() {
    let (store, _) = seeded("query_booker_on_item.wal").await;
    store.list_item(11, 1, true).await.unwrap();
    let on_ten = insert(&store, 10, T0, T0 + H).await;
    insert(&store, 11, T0, T0 + H).await;

    let got = store
        .query_bookings(&BookingQuery::new(Scope::BookerOnItem(2, 10)), Order::StartDesc)
        .await
        .unwrap();
    assert_eq!(got, vec![on_ten]);
    let other = store
        .query_bookings(&BookingQuery::new(Scope::BookerOnItem(1, 10)), Order::StartDesc)
        .await
        .unwrap();
    assert!(other.is_empty());
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_state() {
    let (store, path) = seeded("replay.wal").await;
    let approved = insert(&store, 10, T0, T0 + H).await;
    let approved = decide(&store, &approved, BookingStatus::Approved).await;
    let waiting = insert(&store, 10, T0 + 2 * H, T0 + 3 * H).await;
    store.set_item_available(10, false).await.unwrap();
    drop(store);

    let reopened = MemoryStore::open(&path).unwrap();
    assert!(reopened.user_exists(2).await.unwrap());
    assert!(!reopened.get_item(10).await.unwrap().unwrap().available);
    assert_eq!(reopened.find_booking_by_id(approved.id).await.unwrap(), Some(approved));
    assert_eq!(reopened.find_booking_by_id(waiting.id).await.unwrap(), Some(waiting));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let (store, path) = seeded("compaction.wal").await;
    let b = insert(&store, 10, T0, T0 + H).await;
    for i in 0..10 {
        store.set_item_available(10, i % 2 == 0).await.unwrap();
    }
    let b = decide(&store, &b, BookingStatus::Rejected).await;
    assert_eq!(store.wal_appends_since_compact().await, 15);

    let before = std::fs::metadata(&path).unwrap().len();
    assert_ok!(store.compact_wal().await);
    assert_eq!(store.wal_appends_since_compact().await, 0);
    let after = std::fs::metadata(&path).unwrap().len();
    assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

    let extra = insert(&store, 10, T0 + 4 * H, T0 + 5 * H).await;
    drop(store);

    let reopened = MemoryStore::open(&path).unwrap();
    assert_eq!(reopened.find_booking_by_id(b.id).await.unwrap(), Some(b));
    assert_eq!(reopened.find_booking_by_id(extra.id).await.unwrap(), Some(extra));
    assert!(!reopened.get_item(10).await.unwrap().unwrap().available);
}
