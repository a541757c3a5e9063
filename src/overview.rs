//! Overview page: summary cards and daily trends.

use crate::config::OverviewConfig;
use crate::permissions::CapabilityResolver;
use crate::record::Record;
use crate::store::RecordStore;
use crate::timing::StageTimer;
use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use polars::prelude::*;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverviewCards {
    pub users: usize,
    pub active_users: usize,
    pub trips: usize,
}

/// Number of records on one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Overview {
    pub cards: OverviewCards,
    /// `None` when denied or there are no users.
    pub signup_trend: Option<Vec<TrendPoint>>,
    /// `None` when denied or there are no trips.
    pub trips_trend: Option<Vec<TrendPoint>>,
}

/// Compute every card and trend the viewer is allowed to see. Denied cards read zero.
pub fn build_overview(
    uuids: &[Record],
    trips: &[Record],
    resolver: &dyn CapabilityResolver,
    store: &dyn RecordStore,
    config: &OverviewConfig,
    now: DateTime<Utc>,
    timer: &mut StageTimer,
) -> Result<Overview> {
    timer.time("overview", |timer| {
        let users = if resolver.has_permission("overview_users") {
            uuids.len()
        } else {
            0
        };
        let trip_count = if resolver.has_permission("overview_trips") {
            trips.len()
        } else {
            0
        };
        let active_users = if resolver.has_permission("overview_active_users") {
            timer.time("active_users", |_| {
                count_active_users(uuids, store, config.active_user_threshold_secs, now)
            })?
        } else {
            0
        };

        let signup_trend = if resolver.has_permission("overview_signup_trends") {
            timer.time("signup_trend", |_| {
                daily_trend(uuids, &config.signup_date_column, DayOf::Local)
            })?
        } else {
            None
        };
        let trips_trend = if resolver.has_permission("overview_trips_trend") {
            timer.time("trips_trend", |_| {
                daily_trend(trips, &config.trips_date_column, DayOf::Utc)
            })?
        } else {
            None
        };

        Ok(Overview {
            cards: OverviewCards {
                users,
                active_users,
                trips: trip_count,
            },
            signup_trend,
            trips_trend,
        })
    })
}

/// Users whose latest usercache pull is no older than `threshold_secs`.
pub fn count_active_users(
    uuids: &[Record],
    store: &dyn RecordStore,
    threshold_secs: u64,
    now: DateTime<Utc>,
) -> Result<usize> {
    let now = now.timestamp() as f64;
    let mut active = 0;
    for user_id in uuids
        .iter()
        .filter_map(|u| u.get("user_id").and_then(Value::as_str))
    {
        if let Some(last) = store.last_server_call(user_id)? {
            if now - last <= threshold_secs as f64 {
                active += 1;
            }
        }
    }
    Ok(active)
}

/// Which calendar day a timestamp with an offset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayOf {
    /// The day as written, ignoring the offset.
    Local,
    /// The day after converting to UTC.
    Utc,
}

fn day_of(value: &Value, mode: DayOf) -> Option<NaiveDate> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(match mode {
                    DayOf::Local => dt.date_naive(),
                    DayOf::Utc => dt.with_timezone(&Utc).date_naive(),
                });
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
        }
        Value::Number(n) => n
            .as_f64()
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0))
            .map(|dt| dt.date_naive()),
        _ => None,
    }
}

/// Count records per day of `date_column`, ascending by day.
///
/// Rows whose date cannot be read are skipped. Returns `None` for an empty input.
pub fn daily_trend(
    records: &[Record],
    date_column: &str,
    mode: DayOf,
) -> Result<Option<Vec<TrendPoint>>> {
    if records.is_empty() {
        return Ok(None);
    }
    let days: Vec<String> = records
        .iter()
        .filter_map(|r| r.get(date_column))
        .filter_map(|v| day_of(v, mode))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect();
    if days.len() < records.len() {
        tracing::debug!(
            column = date_column,
            skipped = records.len() - days.len(),
            "rows without a readable date left out of trend"
        );
    }

    let df = DataFrame::new(vec![Series::new("date".into(), days).into()])?;
    let counts = df
        .lazy()
        .group_by([col("date")])
        .agg([len().cast(DataType::Int64).alias("count")])
        .sort(["date"], SortMultipleOptions::default())
        .collect()?;

    let dates = counts.column("date")?.str()?;
    let totals = counts.column("count")?.i64()?;
    let mut points = Vec::with_capacity(counts.height());
    for (date, count) in dates.into_iter().zip(totals.into_iter()) {
        let (Some(date), Some(count)) = (date, count) else {
            continue;
        };
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| eyre!("Invalid trend date '{}': {}", date, e))?;
        points.push(TrendPoint {
            date,
            count: count.max(0) as u64,
        });
    }
    Ok(Some(points))
}

impl fmt::Display for Overview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Users: {} users", self.cards.users)?;
        writeln!(f, "# Active users: {} users", self.cards.active_users)?;
        writeln!(f, "# Confirmed trips: {} trips", self.cards.trips)?;
        for (title, trend) in [
            ("Sign-ups trend", &self.signup_trend),
            ("Trips trend", &self.trips_trend),
        ] {
            writeln!(f)?;
            writeln!(f, "{}", title)?;
            match trend {
                Some(points) => {
                    for p in points {
                        writeln!(f, "  {}  {}", p.date, p.count)?;
                    }
                }
                None => writeln!(f, "  (no data)")?,
            }
        }
        Ok(())
    }
}
