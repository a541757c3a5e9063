mod common;

use common::{snapshot_store, CountingStore};
use opdash::loader::{LoaderEvent, LoaderPhase, StatsLoader};
use opdash::permissions::{CapabilityResolver, EntityType, Permissions};
use opdash::state::DashboardState;
use opdash::tabs::Placeholder;
use opdash::{AppConfig, DashboardSession, RecordStore, Stores, Tab, TabContent};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

fn stores_for(store: &opdash::SnapshotStore) -> Stores {
    let trips = store
        .query_trip_statistics(None, "UTC", &BTreeSet::new())
        .unwrap();
    Stores::from_snapshot(store.snapshot(), trips, BTreeSet::new())
}

fn session_with(store: Arc<CountingStore>) -> DashboardSession {
    let mut session = DashboardSession::new(
        store.clone(),
        Arc::new(Permissions::allow_all()),
        &AppConfig::default(),
    );
    session.set_stores(stores_for(&store.inner));
    session
}

fn loaded_ids(state: &DashboardState) -> Vec<String> {
    state
        .accumulator()
        .records()
        .iter()
        .filter_map(|r| r.get("user_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[test]
fn test_twenty_five_ids_publish_ten_twenty_twenty_five() {
    let store = Arc::new(snapshot_store(25));
    let ids: Vec<String> = (0..25).map(|i| format!("u{:02}", i)).collect();
    let loader = StatsLoader::new(store, 10);
    let (tx, rx) = channel();

    let mut state = DashboardState::new();
    let cycle = state.begin_cycle(ids.len());
    loader.spawn(cycle, ids.clone(), tx).join();

    let mut lengths = Vec::new();
    let mut completions = 0;
    for event in rx.iter() {
        let is_chunk = matches!(event, LoaderEvent::Chunk { .. });
        if matches!(event, LoaderEvent::Complete { .. }) {
            completions += 1;
        }
        assert!(state.apply_loader_event(event));
        if is_chunk {
            lengths.push(state.accumulator().len());
        }
    }

    assert_eq!(lengths, vec![10, 20, 25]);
    assert_eq!(completions, 1);
    assert!(state.loader_complete());
    assert_eq!(loaded_ids(&state), ids);
}

#[test]
fn test_session_loads_every_user_in_order() {
    let store = Arc::new(CountingStore::new(snapshot_store(25)));
    let mut session = session_with(store.clone());
    session.select_tab(Tab::Uuids);

    assert_eq!(session.wait_for_loader(), LoaderPhase::Complete);
    assert_eq!(store.uuid_calls(), 3);

    let ids = loaded_ids(session.state());
    assert_eq!(ids, session.stores().identifiers());
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), 25);

    let Some(TabContent::Table(table)) = session.render() else {
        panic!("expected the uuids table");
    };
    assert_eq!(table.total_rows(), 25);
    assert_eq!(table.current_page().len(), 25);
    let allowed = Permissions::allow_all().allowed_columns(EntityType::Uuids);
    assert!(table.table().column_set().is_subset_of(&allowed));
    assert!(!table.columns().contains(&"internal_note".to_string()));
}

#[test]
fn test_loading_placeholder_until_complete() {
    let store = Arc::new(CountingStore {
        delay: Some(Duration::from_millis(30)),
        ..CountingStore::new(snapshot_store(25))
    });
    let mut session = session_with(store);
    session.select_tab(Tab::Uuids);

    match session.render() {
        Some(TabContent::Placeholder(Placeholder::Loading { loaded, total })) => {
            assert!(loaded < 25);
            assert_eq!(total, 25);
        }
        other => panic!("expected loading placeholder, got {:?}", other),
    }

    session.wait_for_loader();
    assert!(matches!(session.render(), Some(TabContent::Table(_))));
}

#[test]
fn test_reentering_tab_resets_accumulator() {
    let store = Arc::new(CountingStore::new(snapshot_store(25)));
    let mut session = session_with(store.clone());
    session.select_tab(Tab::Uuids);
    session.wait_for_loader();
    assert_eq!(session.state().accumulator().len(), 25);

    session.select_tab(Tab::Trips);
    assert_eq!(session.state().accumulator().len(), 25);

    session.select_tab(Tab::Uuids);
    assert!(session.state().accumulator().is_empty());
    assert_eq!(session.wait_for_loader(), LoaderPhase::Complete);
    assert_eq!(session.state().accumulator().len(), 25);
    assert_eq!(store.uuid_calls(), 6);
}

#[test]
fn test_tab_change_cancels_loading() {
    let store = Arc::new(CountingStore {
        delay: Some(Duration::from_millis(40)),
        ..CountingStore::new(snapshot_store(25))
    });
    let mut session = session_with(store.clone());
    session.select_tab(Tab::Uuids);
    session.select_tab(Tab::Trips);
    assert_eq!(session.state().loader_phase(), LoaderPhase::Cancelled);

    let before = session.state().accumulator().len();
    std::thread::sleep(Duration::from_millis(200));
    session.pump_events();
    assert_eq!(session.state().accumulator().len(), before);
    assert_eq!(session.state().loader_phase(), LoaderPhase::Cancelled);
    assert!(store.uuid_calls() < 3);
}

#[test]
fn test_identifier_change_restarts_loading() {
    let store = Arc::new(CountingStore::new(snapshot_store(25)));
    let mut session = session_with(store.clone());
    session.select_tab(Tab::Uuids);
    session.wait_for_loader();

    let smaller = snapshot_store(5);
    session.set_stores(stores_for(&smaller));
    assert_eq!(session.state().loader_phase(), LoaderPhase::Loading);
    assert_eq!(session.wait_for_loader(), LoaderPhase::Complete);
    assert_eq!(session.state().accumulator().len(), 5);
}

#[test]
fn test_loader_failure_keeps_whole_chunks_and_previous_content() {
    let store = Arc::new(CountingStore {
        fail_uuid_from: Some(1),
        ..CountingStore::new(snapshot_store(25))
    });
    let mut session = session_with(store);
    session.select_tab(Tab::Uuids);

    assert_eq!(session.wait_for_loader(), LoaderPhase::Failed);
    assert_eq!(session.state().accumulator().len(), 10);
    assert!(session
        .state()
        .loader_error()
        .is_some_and(|m| m.contains("statistics backend unavailable")));

    // Nothing rendered successfully before the failure
    assert_eq!(session.render(), None);
    assert!(session.last_error().is_some());
}

#[test]
fn test_denied_uuids_never_start_loading() {
    let store = Arc::new(CountingStore::new(snapshot_store(25)));
    let mut session = DashboardSession::new(
        store.clone(),
        Arc::new(Permissions::allow_all().with_capability("data_uuids", false)),
        &AppConfig::default(),
    );
    session.set_stores(stores_for(&store.inner));
    session.select_tab(Tab::Uuids);
    assert_eq!(session.wait_for_loader(), LoaderPhase::Idle);
    assert_eq!(store.uuid_calls(), 0);
}

#[test]
fn test_record_without_user_id_does_not_hold_back_the_table() {
    let store = Arc::new(CountingStore::new(snapshot_store(2)));
    let mut session = session_with(store);
    let mut stores = stores_for(&snapshot_store(2));
    stores.uuids = json!([
        {"user_id": "u00"},
        {"user_id": "u01"},
        {"user_token": "orphan"}
    ]);
    session.set_stores(stores);
    session.select_tab(Tab::Uuids);

    assert_eq!(session.wait_for_loader(), LoaderPhase::Complete);
    assert_eq!(session.state().accumulator().len(), 2);
    for _ in 0..2 {
        let Some(TabContent::Table(table)) = session.render() else {
            panic!("expected the uuids table");
        };
        assert_eq!(table.total_rows(), 2);
    }
}

#[test]
fn test_short_store_results_still_render_once_complete() {
    let store = Arc::new(CountingStore {
        uuid_rows_per_batch: Some(8),
        ..CountingStore::new(snapshot_store(25))
    });
    let mut session = session_with(store);
    session.select_tab(Tab::Uuids);

    assert_eq!(session.wait_for_loader(), LoaderPhase::Complete);
    assert_eq!(session.state().accumulator().len(), 8 + 8 + 5);
    let Some(TabContent::Table(table)) = session.render() else {
        panic!("expected the uuids table");
    };
    assert_eq!(table.total_rows(), 21);
}

#[test]
fn test_empty_identifier_source_renders_nothing() {
    let store = Arc::new(CountingStore::new(snapshot_store(0)));
    let mut session = session_with(store.clone());
    session.select_tab(Tab::Uuids);

    assert_eq!(session.wait_for_loader(), LoaderPhase::Complete);
    assert_eq!(session.render(), None);
    assert_eq!(store.uuid_calls(), 0);
}

#[test]
fn test_failure_after_loading_placeholder_does_not_show_loading() {
    let store = Arc::new(CountingStore {
        delay: Some(Duration::from_millis(30)),
        fail_uuid_from: Some(1),
        ..CountingStore::new(snapshot_store(25))
    });
    let mut session = session_with(store);
    session.select_tab(Tab::Uuids);
    assert!(matches!(
        session.render(),
        Some(TabContent::Placeholder(Placeholder::Loading { .. }))
    ));

    assert_eq!(session.wait_for_loader(), LoaderPhase::Failed);
    assert_eq!(session.render(), None);
    assert!(session.last_error().is_some());
}
