//! Column reconciliation: heterogeneous records in, one rectangular table out.

use crate::permissions::ColumnSet;
use crate::record::{discover_columns, parse_records, Record};
use serde_json::Value;

/// Fields holding an `[x, y]` coordinate pair that are shown as `"(x, y)"`.
pub const COORDINATE_FIELDS: &[&str] = &[
    "start_coordinates",
    "end_coordinates",
    "data.start_loc.coordinates",
    "data.end_loc.coordinates",
];

/// Rectangular table: every row carries exactly `columns`, missing cells are null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Record>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// No rows, or rows with no permitted column left to show.
    pub fn is_blank(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    pub fn column_set(&self) -> ColumnSet {
        self.columns.iter().cloned().collect()
    }
}

/// Outcome of reconciling a store payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Table(Table),
    /// Input is empty but the source is known to hold rows.
    Loading,
    /// Input is not a tabular collection. Callers keep whatever they displayed before.
    Malformed,
}

/// Reconcile a raw store payload against `columns`.
///
/// `expected_rows` is the size of the source the payload was derived from, when known.
pub fn reconcile(source: &Value, columns: &ColumnSet, expected_rows: Option<usize>) -> Projection {
    let Some(records) = parse_records(source) else {
        return Projection::Malformed;
    };
    if records.is_empty() && expected_rows.is_some_and(|n| n > 0) {
        return Projection::Loading;
    }
    Projection::Table(project(&records, columns))
}

/// Project records onto the allowed columns and normalize coordinate fields.
///
/// Columns outside `columns` are dropped silently. Running this on its own output
/// returns the same table.
pub fn project(records: &[Record], columns: &ColumnSet) -> Table {
    let mut kept = Vec::new();
    let mut formatted: Vec<Option<Vec<Value>>> = Vec::new();

    for column in discover_columns(records) {
        if !columns.contains(&column) {
            continue;
        }
        if COORDINATE_FIELDS.contains(&column.as_str()) {
            match format_coordinate_column(records, &column) {
                Some(values) => formatted.push(Some(values)),
                None => {
                    tracing::debug!(column = %column, "dropping coordinate column with unformattable values");
                    continue;
                }
            }
        } else {
            formatted.push(None);
        }
        kept.push(column);
    }

    let rows = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            kept.iter()
                .zip(&formatted)
                .map(|(column, coords)| {
                    let value = match coords {
                        Some(values) => values[i].clone(),
                        None => record.get(column).cloned().unwrap_or(Value::Null),
                    };
                    (column.clone(), value)
                })
                .collect::<Record>()
        })
        .collect();

    Table {
        columns: kept,
        rows,
    }
}

/// Format every row's coordinate value, or `None` if any row cannot be formatted.
fn format_coordinate_column(records: &[Record], column: &str) -> Option<Vec<Value>> {
    records
        .iter()
        .map(|r| r.get(column).and_then(format_coordinate).map(Value::String))
        .collect()
}

/// `[x, y]` -> `"(x, y)"`. Already formatted strings pass through unchanged.
pub fn format_coordinate(value: &Value) -> Option<String> {
    match value {
        Value::Array(pair) if pair.len() == 2 => match (&pair[0], &pair[1]) {
            (Value::Number(x), Value::Number(y)) => Some(format!("({}, {})", x, y)),
            _ => None,
        },
        Value::String(s) if is_formatted_coordinate(s) => Some(s.clone()),
        _ => None,
    }
}

fn is_formatted_coordinate(s: &str) -> bool {
    let Some(inner) = s.strip_prefix('(').and_then(|s| s.strip_suffix(')')) else {
        return false;
    };
    let mut parts = inner.split(", ");
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(x), Some(y), None) if x.parse::<f64>().is_ok() && y.parse::<f64>().is_ok()
    )
}
