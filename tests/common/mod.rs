#![allow(dead_code)]

use color_eyre::Result;
use opdash::store::{DateRange, TrajectoryQuery};
use opdash::{Record, RecordStore, SnapshotStore};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Snapshot with `users` users, two trips for every even user, two surveys and a few
/// location points on 2024-01-01 and 2024-01-02 (UTC).
pub fn snapshot_json(users: usize) -> Value {
    let uuids: Vec<Value> = (0..users)
        .map(|i| {
            json!({
                "user_id": format!("u{:02}", i),
                "user_token": format!("token-{}", i),
                "update_ts": format!("2024-01-{:02}T09:00:00+00:00", 1 + i % 3),
                "internal_note": "never shown"
            })
        })
        .collect();

    let mut trips = Vec::new();
    for i in (0..users).step_by(2) {
        for day in [5, 6] {
            trips.push(json!({
                "user_id": format!("u{:02}", i),
                "trip_start_time_str": format!("2024-01-{:02}T08:00:00-08:00", day),
                "trip_end_time_str": format!("2024-01-{:02}T08:30:00-08:00", day),
                "start_coordinates": [-122.08, 37.39],
                "end_coordinates": [-122.1, 37.4],
                "Mode Confirm": "walk",
                "survey_answer": "yes",
                "raw_secret": 42,
                "user_input": {"mode_confirm": "walk"}
            }));
        }
    }

    json!({
        "uuids": uuids,
        "trips": trips,
        "user_input_columns": ["survey_answer"],
        "demographics": {
            "survey_a": [{"_id": 1, "age": 30}, {"_id": 2, "age": 45}],
            "survey_b": [{"_id": 3, "income": "low"}]
        },
        "timeseries": [
            {"user_id": "u00", "metadata": {"key": "stats/server_api_time", "write_ts": 1704067200.0},
             "data": {"name": "POST_/usercache/get", "ts": 1704067200.0}},
            {"user_id": "u00", "metadata": {"key": "analysis/recreated_location", "write_ts": 1},
             "data": {"ts": 1704070000.0, "latitude": 37.4, "longitude": -122.1, "fmt_time": "2024-01-01T00:46:40"}},
            {"user_id": "u01", "metadata": {"key": "analysis/recreated_location", "write_ts": 1},
             "data": {"ts": 1704160000.0, "latitude": 37.5, "longitude": -122.2, "fmt_time": "2024-01-02T01:46:40"}},
            {"user_id": "u01", "metadata": {"key": "background/location", "write_ts": 1},
             "data": {"ts": 1704160100.0}}
        ],
        "profiles": {"u00": {"platform": "android", "app_version": "1.9.0"}}
    })
}

pub fn snapshot_store(users: usize) -> SnapshotStore {
    SnapshotStore::from_json_str(&snapshot_json(users).to_string()).unwrap()
}

pub fn records(value: Value) -> Vec<Record> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect()
}

/// Wraps a store, counting calls and optionally slowing down or failing them.
#[derive(Default)]
pub struct CountingStore {
    pub inner: SnapshotStore,
    pub uuid_calls: AtomicUsize,
    pub trajectory_calls: AtomicUsize,
    pub delay: Option<Duration>,
    /// Trajectory queries fail until this many calls were made.
    pub fail_trajectories_until: usize,
    /// Trajectory queries from this call index on fail.
    pub fail_trajectories_from: Option<usize>,
    /// Uuid statistics calls from this index on fail.
    pub fail_uuid_from: Option<usize>,
    /// Uuid statistics calls return at most this many records.
    pub uuid_rows_per_batch: Option<usize>,
}

impl CountingStore {
    pub fn new(inner: SnapshotStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn trajectory_calls(&self) -> usize {
        self.trajectory_calls.load(Ordering::SeqCst)
    }

    pub fn uuid_calls(&self) -> usize {
        self.uuid_calls.load(Ordering::SeqCst)
    }
}

impl RecordStore for CountingStore {
    fn query_uuid_statistics(&self, batch: &[String], batch_size: usize) -> Result<Vec<Record>> {
        let call = self.uuid_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_uuid_from.is_some_and(|n| call >= n) {
            return Err(color_eyre::eyre::eyre!("statistics backend unavailable"));
        }
        let mut records = self.inner.query_uuid_statistics(batch, batch_size)?;
        if let Some(limit) = self.uuid_rows_per_batch {
            records.truncate(limit);
        }
        Ok(records)
    }

    fn query_trip_statistics(
        &self,
        range: Option<&DateRange>,
        timezone: &str,
        excluded_uuids: &BTreeSet<String>,
    ) -> Result<Vec<Record>> {
        self.inner
            .query_trip_statistics(range, timezone, excluded_uuids)
    }

    fn query_trajectories(&self, query: &TrajectoryQuery) -> Result<Vec<Record>> {
        let call = self.trajectory_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_trajectories_until
            || self.fail_trajectories_from.is_some_and(|n| call >= n)
        {
            return Err(color_eyre::eyre::eyre!("timeseries backend unavailable"));
        }
        self.inner.query_trajectories(query)
    }

    fn last_server_call(&self, user_id: &str) -> Result<Option<f64>> {
        self.inner.last_server_call(user_id)
    }
}
