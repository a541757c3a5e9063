mod common;

use common::{snapshot_store, CountingStore};
use opdash::permissions::{CapabilityResolver, EntityType, Permissions};
use opdash::reconcile::{reconcile, Projection};
use opdash::state::DashboardState;
use opdash::store::DateRange;
use opdash::tabs::Placeholder;
use opdash::timing::StageTimer;
use opdash::{
    AppConfig, DashboardSession, Filters, RecordStore, Rendered, RetryingStore, Stores, Tab,
    TabContent, TabContentResolver,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

fn stores_for(store: &opdash::SnapshotStore) -> Stores {
    let trips = store
        .query_trip_statistics(None, "UTC", &BTreeSet::new())
        .unwrap();
    Stores::from_snapshot(store.snapshot(), trips, BTreeSet::new())
}

fn trajectory_filters() -> Filters {
    Filters {
        date_range: Some(DateRange::parse("2024-01-01", "2024-01-02").unwrap()),
        timezone: "UTC".to_string(),
        key_list: vec!["analysis/recreated_location".to_string()],
    }
}

fn render(
    resolver: &TabContentResolver,
    tab: Tab,
    stores: &Stores,
    filters: &Filters,
    state: &mut DashboardState,
    store: &dyn RecordStore,
) -> Rendered {
    resolver
        .render(tab, stores, filters, state, store, &mut StageTimer::disabled())
        .expect("render should not fail")
}

#[test]
fn test_trips_denied_renders_nothing() {
    let store = snapshot_store(6);
    let stores = stores_for(&store);
    assert!(!stores.trips.as_array().unwrap().is_empty());

    let perms = Permissions::allow_all().with_capability("data_trips", false);
    let resolver = TabContentResolver::new(Arc::new(perms), 50);
    let out = render(
        &resolver,
        Tab::Trips,
        &stores,
        &Filters::default(),
        &mut DashboardState::new(),
        &store,
    );
    assert_eq!(out, Rendered::Content(None));
}

#[test]
fn test_trips_columns_are_within_permitted_set() {
    let store = snapshot_store(6);
    let stores = stores_for(&store);
    let resolver = TabContentResolver::new(Arc::new(Permissions::allow_all()), 50);
    let allowed = resolver.trip_columns(&stores.user_input_columns);

    let Rendered::Content(Some(TabContent::Table(table))) = render(
        &resolver,
        Tab::Trips,
        &stores,
        &Filters::default(),
        &mut DashboardState::new(),
        &store,
    ) else {
        panic!("expected a trips table");
    };

    assert!(table.table().column_set().is_subset_of(&allowed));
    assert_eq!(
        table.columns(),
        &[
            "user_id",
            "trip_start_time_str",
            "trip_end_time_str",
            "start_coordinates",
            "end_coordinates",
            "Mode Confirm",
            "survey_answer",
        ]
    );
    // Coordinates formatted on every row
    assert!(table
        .table()
        .rows
        .iter()
        .all(|r| r["start_coordinates"] == json!("(-122.08, 37.39)")));
}

#[test]
fn test_coordinate_column_dropped_when_any_row_unformattable() {
    let source = json!([
        {"user_id": "a", "start_coordinates": [1.0, 2.0]},
        {"user_id": "b", "start_coordinates": "somewhere"}
    ]);
    let columns = ["user_id", "start_coordinates"].into_iter().collect();
    let Projection::Table(table) = reconcile(&source, &columns, None) else {
        panic!("expected a table");
    };
    assert_eq!(table.columns, vec!["user_id".to_string()]);
    assert!(table.rows.iter().all(|r| !r.contains_key("start_coordinates")));
}

#[test]
fn test_reconcile_is_idempotent() {
    let source = json!([
        {"user_id": "a", "end_coordinates": [3, 4], "extra": true},
        {"end_coordinates": [5.5, -6], "user_id": "b"}
    ]);
    let columns = ["user_id", "end_coordinates"].into_iter().collect();
    let Projection::Table(first) = reconcile(&source, &columns, None) else {
        panic!("expected a table");
    };
    let again = Value::Array(first.rows.iter().cloned().map(Value::Object).collect());
    let Projection::Table(second) = reconcile(&again, &columns, None) else {
        panic!("expected a table");
    };
    assert_eq!(first, second);
}

#[test]
fn test_two_surveys_paginate_independently() {
    let store = snapshot_store(2);
    let mut stores = stores_for(&store);
    let many: Vec<Value> = (0..120).map(|i| json!({"_id": i, "age": 20 + i})).collect();
    stores.demographics = json!({"survey_a": many, "survey_b": [{"_id": 1, "income": "low"}]});

    let resolver = TabContentResolver::new(Arc::new(Permissions::allow_all()), 50);
    let mut state = DashboardState::new();
    state.set_page("demographics/survey_a", 2);

    let Rendered::Content(Some(TabContent::SubTabs(sub_tabs))) = render(
        &resolver,
        Tab::Demographics,
        &stores,
        &Filters::default(),
        &mut state,
        &store,
    ) else {
        panic!("expected sub-tabs");
    };
    assert_eq!(sub_tabs.len(), 2);
    assert_eq!(sub_tabs[0].label, "survey_a");
    assert_eq!(sub_tabs[0].table.page_current(), 2);
    assert_eq!(sub_tabs[0].table.page_count(), 3);
    assert_eq!(sub_tabs[0].table.current_page().len(), 20);
    assert_eq!(sub_tabs[1].label, "survey_b");
    assert_eq!(sub_tabs[1].table.page_current(), 0);
    assert_eq!(sub_tabs[1].table.columns(), &["income"]);
}

#[test]
fn test_demographics_denied_or_empty() {
    let store = snapshot_store(2);
    let stores = stores_for(&store);
    let denied = TabContentResolver::new(
        Arc::new(Permissions::allow_all().with_capability("data_demographics", false)),
        50,
    );
    assert_eq!(
        render(
            &denied,
            Tab::Demographics,
            &stores,
            &Filters::default(),
            &mut DashboardState::new(),
            &store
        ),
        Rendered::Content(None)
    );

    let allowed = TabContentResolver::new(Arc::new(Permissions::allow_all()), 50);
    let empty = Stores {
        demographics: json!({}),
        ..stores
    };
    assert_eq!(
        render(
            &allowed,
            Tab::Demographics,
            &empty,
            &Filters::default(),
            &mut DashboardState::new(),
            &store
        ),
        Rendered::Content(None)
    );
}

#[test]
fn test_trajectories_query_once_then_cached() {
    let store = CountingStore::new(snapshot_store(2));
    let stores = Stores::default();
    let filters = trajectory_filters();
    let resolver = TabContentResolver::new(Arc::new(Permissions::allow_all()), 50);
    let mut state = DashboardState::new();

    let first = render(&resolver, Tab::Trajectories, &stores, &filters, &mut state, &store);
    assert_eq!(store.trajectory_calls(), 1);
    let Rendered::Content(Some(TabContent::Table(table))) = &first else {
        panic!("expected a trajectory table");
    };
    assert_eq!(table.total_rows(), 2);
    let allowed = Permissions::allow_all().allowed_columns(EntityType::Trajectories);
    assert!(table.table().column_set().is_subset_of(&allowed));

    let second = render(&resolver, Tab::Trajectories, &stores, &filters, &mut state, &store);
    assert_eq!(store.trajectory_calls(), 1);
    assert_eq!(first, second);

    // Different filters miss the cache
    let mut narrower = filters.clone();
    narrower.date_range = Some(DateRange::parse("2024-01-02", "2024-01-02").unwrap());
    render(&resolver, Tab::Trajectories, &stores, &narrower, &mut state, &store);
    assert_eq!(store.trajectory_calls(), 2);
}

#[test]
fn test_empty_trajectory_result_renders_nothing() {
    let store = CountingStore::new(snapshot_store(2));
    let mut filters = trajectory_filters();
    filters.key_list = vec!["no/such_key".to_string()];
    let resolver = TabContentResolver::new(Arc::new(Permissions::allow_all()), 50);
    let out = render(
        &resolver,
        Tab::Trajectories,
        &Stores::default(),
        &filters,
        &mut DashboardState::new(),
        &store,
    );
    assert_eq!(out, Rendered::Content(None));
    assert_eq!(store.trajectory_calls(), 1);
}

#[test]
fn test_adapter_failure_keeps_previous_content() {
    let store = Arc::new(CountingStore {
        fail_trajectories_from: Some(1),
        ..CountingStore::new(snapshot_store(2))
    });
    let mut session = DashboardSession::new(
        store.clone(),
        Arc::new(Permissions::allow_all()),
        &AppConfig::default(),
    );
    session.set_filters(trajectory_filters());
    session.select_tab(Tab::Trajectories);
    let first = session.render().expect("trajectories render");
    assert!(session.last_error().is_none());

    // New filters force a second query, which fails
    let mut narrower = trajectory_filters();
    narrower.date_range = Some(DateRange::parse("2024-01-02", "2024-01-02").unwrap());
    session.set_filters(narrower);
    assert_eq!(session.render(), Some(first));
    assert_eq!(store.trajectory_calls(), 2);
    assert!(session
        .last_error()
        .is_some_and(|m| m.contains("timeseries backend unavailable")));
}

#[test]
fn test_retrying_store_recovers_from_transient_failures() {
    let inner = CountingStore {
        fail_trajectories_until: 2,
        ..CountingStore::new(snapshot_store(2))
    };
    let config = opdash::retry::RetryConfig {
        max_retries: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
    };
    let store = RetryingStore::new(inner, config);
    let resolver = TabContentResolver::new(Arc::new(Permissions::allow_all()), 50);
    let out = render(
        &resolver,
        Tab::Trajectories,
        &Stores::default(),
        &trajectory_filters(),
        &mut DashboardState::new(),
        &store,
    );
    assert!(matches!(out, Rendered::Content(Some(TabContent::Table(_)))));
}

#[test]
fn test_uuids_denied_placeholder_in_session() {
    let store = Arc::new(snapshot_store(5));
    let mut session = DashboardSession::new(
        store.clone(),
        Arc::new(Permissions::allow_all().with_capability("data_uuids", false)),
        &AppConfig::default(),
    );
    session.set_stores(stores_for(&store));
    session.select_tab(Tab::Uuids);
    assert!(matches!(
        session.render(),
        Some(TabContent::Placeholder(Placeholder::PermissionDenied(_)))
    ));
}

#[test]
fn test_malformed_trips_keep_previous_table() {
    let store = Arc::new(snapshot_store(4));
    let mut session = DashboardSession::new(
        store.clone(),
        Arc::new(Permissions::allow_all()),
        &AppConfig::default(),
    );
    session.set_stores(stores_for(&store));
    session.select_tab(Tab::Trips);
    let good = session.render().expect("trips table");

    let mut broken = stores_for(&store);
    broken.trips = json!("not a table");
    session.set_stores(broken);
    assert_eq!(session.render(), Some(good));
}
