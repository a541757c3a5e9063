//! Record store adapter: the query contract over the time-series / entity database.

use crate::record::{flatten_record, Record};
use crate::retry::{retry_blocking, RetryConfig};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, TimeZone, Utc};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Time-series key of the server API call statistics.
pub const SERVER_API_TIME_KEY: &str = "stats/server_api_time";
/// API call that marks a phone as active.
pub const USERCACHE_GET_CALL: &str = "POST_/usercache/get";

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(eyre!("Date range end {} is before start {}", end, start));
        }
        Ok(Self { start, end })
    }

    /// Parse both ends, dropping any time of day.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_day(start)?, parse_day(end)?)
    }

    /// `[start of first day, start of the day after the last day)` as Unix seconds in `tz`.
    pub fn to_timestamps(&self, tz: &FixedOffset) -> Result<(f64, f64)> {
        let day_start = |d: NaiveDate| -> Result<f64> {
            let local = d
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| eyre!("Invalid day {}", d))?;
            let at = tz
                .from_local_datetime(&local)
                .single()
                .ok_or_else(|| eyre!("Ambiguous local time for {}", d))?;
            Ok(at.timestamp() as f64)
        };
        let after_end = self
            .end
            .checked_add_days(Days::new(1))
            .ok_or_else(|| eyre!("Date range end {} out of bounds", self.end))?;
        Ok((day_start(self.start)?, day_start(after_end)?))
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// `YYYY-MM-DD`, or an RFC 3339 timestamp truncated to its date.
pub fn parse_day(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(day);
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.date_naive())
        .map_err(|e| eyre!("Invalid date '{}': {}", s, e))
}

/// `"UTC"`, `"Z"` or a fixed offset such as `"-07:00"` / `"+0530"`.
pub fn parse_timezone(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("utc") || s == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| eyre!("Invalid UTC offset"));
    }
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(eyre!("Unsupported timezone '{}': use UTC or an offset like -07:00", s)),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(eyre!("Unsupported timezone '{}': use UTC or an offset like -07:00", s));
    }
    let hours: i32 = digits[..2].parse()?;
    let minutes: i32 = digits[2..].parse()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| eyre!("Timezone offset '{}' out of range", s))
}

/// Filters of one trajectory query. Identical filters hit the trajectory cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrajectoryQuery {
    pub range: DateRange,
    pub timezone: String,
    pub excluded_uuids: BTreeSet<String>,
    pub key_list: Vec<String>,
}

/// Query contract of the backing data store.
pub trait RecordStore: Send + Sync {
    /// Enriched statistics for each identifier of `batch`, in `batch` order.
    /// `batch_size` is the number of identifiers the caller fetches per round trip.
    fn query_uuid_statistics(&self, batch: &[String], batch_size: usize) -> Result<Vec<Record>>;

    /// Confirmed trips, optionally limited to a date range, without excluded users.
    fn query_trip_statistics(
        &self,
        range: Option<&DateRange>,
        timezone: &str,
        excluded_uuids: &BTreeSet<String>,
    ) -> Result<Vec<Record>>;

    /// Flattened time-series entries matching the query, ordered by `data.ts`.
    fn query_trajectories(&self, query: &TrajectoryQuery) -> Result<Vec<Record>>;

    /// Write timestamp (Unix seconds) of the user's latest usercache pull.
    fn last_server_call(&self, user_id: &str) -> Result<Option<f64>>;
}

/// Snapshot file layout. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub uuids: Vec<Record>,
    pub trips: Vec<Record>,
    /// Names of the user-input columns present on trips.
    pub user_input_columns: Vec<String>,
    /// Survey key -> responses.
    pub demographics: Map<String, Value>,
    pub timeseries: Vec<Record>,
    /// Per-user device profile (platform, manufacturer, app_version, ...).
    pub profiles: HashMap<String, Record>,
}

/// In-memory store backed by a JSON snapshot of the database.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    snapshot: Snapshot,
    timeseries: Vec<Record>,
}

const PROFILE_FIELDS: &[&str] = &[
    "platform",
    "manufacturer",
    "app_version",
    "os_version",
    "phone_lang",
];

impl SnapshotStore {
    pub fn new(snapshot: Snapshot) -> Self {
        let timeseries = snapshot.timeseries.iter().map(flatten_record).collect();
        Self {
            snapshot,
            timeseries,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let snapshot: Snapshot =
            serde_json::from_str(json).map_err(|e| eyre!("Failed to parse snapshot: {}", e))?;
        Ok(Self::new(snapshot))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre!("Failed to read snapshot at {}: {}", path.display(), e))?;
        Self::from_json_str(&content)
            .map_err(|e| eyre!("{} ({})", e, path.display()))
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn trips_of<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.snapshot
            .trips
            .iter()
            .filter(move |t| t.get("user_id").and_then(Value::as_str) == Some(user_id))
    }

    fn user_stats(&self, user_id: &str) -> Result<Record> {
        let mut record = self
            .snapshot
            .uuids
            .iter()
            .find(|u| u.get("user_id").and_then(Value::as_str) == Some(user_id))
            .cloned()
            .unwrap_or_else(|| {
                let mut r = Record::new();
                r.insert("user_id".into(), Value::String(user_id.to_string()));
                r
            });

        let mut total = 0u64;
        let mut labeled = 0u64;
        let mut first: Option<&str> = None;
        let mut last: Option<&str> = None;
        for trip in self.trips_of(user_id) {
            total += 1;
            if trip
                .get("user_input")
                .and_then(Value::as_object)
                .is_some_and(|m| !m.is_empty())
            {
                labeled += 1;
            }
            if let Some(start) = trip.get("trip_start_time_str").and_then(Value::as_str) {
                first = Some(first.map_or(start, |f| f.min(start)));
                last = Some(last.map_or(start, |l| l.max(start)));
            }
        }
        record.insert("total_trips".into(), Value::from(total));
        record.insert("labeled_trips".into(), Value::from(labeled));
        record.insert("first_trip".into(), first.map_or(Value::Null, Value::from));
        record.insert("last_trip".into(), last.map_or(Value::Null, Value::from));

        let last_call = self
            .last_server_call(user_id)?
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0))
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::Null);
        record.insert("last_call".into(), last_call);

        let profile = self.snapshot.profiles.get(user_id);
        for field in PROFILE_FIELDS {
            let value = profile
                .and_then(|p| p.get(*field))
                .cloned()
                .unwrap_or(Value::Null);
            record.insert(field.to_string(), value);
        }
        Ok(record)
    }
}

fn trip_start(trip: &Record) -> Option<DateTime<FixedOffset>> {
    trip.get("trip_start_time_str")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

fn user_of(record: &Record) -> Option<&str> {
    record.get("user_id").and_then(Value::as_str)
}

impl RecordStore for SnapshotStore {
    fn query_uuid_statistics(&self, batch: &[String], batch_size: usize) -> Result<Vec<Record>> {
        tracing::trace!(ids = batch.len(), batch_size, "querying uuid statistics");
        batch.iter().map(|id| self.user_stats(id)).collect()
    }

    fn query_trip_statistics(
        &self,
        range: Option<&DateRange>,
        timezone: &str,
        excluded_uuids: &BTreeSet<String>,
    ) -> Result<Vec<Record>> {
        let tz = parse_timezone(timezone)?;
        Ok(self
            .snapshot
            .trips
            .iter()
            .filter(|t| !user_of(t).is_some_and(|u| excluded_uuids.contains(u)))
            .filter(|t| match range {
                None => true,
                Some(r) => trip_start(t)
                    .map(|start| r.contains(start.with_timezone(&tz).date_naive()))
                    .unwrap_or(false),
            })
            .cloned()
            .collect())
    }

    fn query_trajectories(&self, query: &TrajectoryQuery) -> Result<Vec<Record>> {
        let tz = parse_timezone(&query.timezone)?;
        let (start_ts, end_ts) = query.range.to_timestamps(&tz)?;
        let mut out: Vec<Record> = self
            .timeseries
            .iter()
            .filter(|e| {
                e.get("metadata.key")
                    .and_then(Value::as_str)
                    .is_some_and(|k| query.key_list.iter().any(|q| q == k))
            })
            .filter(|e| !user_of(e).is_some_and(|u| query.excluded_uuids.contains(u)))
            .filter(|e| {
                e.get("data.ts")
                    .and_then(Value::as_f64)
                    .is_some_and(|ts| start_ts <= ts && ts < end_ts)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            let ts = |r: &Record| r.get("data.ts").and_then(Value::as_f64).unwrap_or(0.0);
            ts(a).total_cmp(&ts(b))
        });
        Ok(out)
    }

    fn last_server_call(&self, user_id: &str) -> Result<Option<f64>> {
        Ok(self
            .timeseries
            .iter()
            .filter(|e| user_of(e) == Some(user_id))
            .filter(|e| e.get("metadata.key").and_then(Value::as_str) == Some(SERVER_API_TIME_KEY))
            .filter(|e| e.get("data.name").and_then(Value::as_str) == Some(USERCACHE_GET_CALL))
            .filter_map(|e| e.get("metadata.write_ts").and_then(Value::as_f64))
            .max_by(f64::total_cmp))
    }
}

/// Decorator retrying every call of the wrapped store with exponential backoff.
pub struct RetryingStore<S> {
    inner: S,
    config: RetryConfig,
}

impl<S: RecordStore> RetryingStore<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

impl<S: RecordStore> RecordStore for RetryingStore<S> {
    fn query_uuid_statistics(&self, batch: &[String], batch_size: usize) -> Result<Vec<Record>> {
        retry_blocking(&self.config, "query_uuid_statistics", || {
            self.inner.query_uuid_statistics(batch, batch_size)
        })
    }

    fn query_trip_statistics(
        &self,
        range: Option<&DateRange>,
        timezone: &str,
        excluded_uuids: &BTreeSet<String>,
    ) -> Result<Vec<Record>> {
        retry_blocking(&self.config, "query_trip_statistics", || {
            self.inner
                .query_trip_statistics(range, timezone, excluded_uuids)
        })
    }

    fn query_trajectories(&self, query: &TrajectoryQuery) -> Result<Vec<Record>> {
        retry_blocking(&self.config, "query_trajectories", || {
            self.inner.query_trajectories(query)
        })
    }

    fn last_server_call(&self, user_id: &str) -> Result<Option<f64>> {
        retry_blocking(&self.config, "last_server_call", || {
            self.inner.last_server_call(user_id)
        })
    }
}
