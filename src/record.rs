//! Entity records: flat field maps with no fixed schema.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};

/// One row of source data. Field sets vary by record and by permission tier.
pub type Record = Map<String, Value>;

/// Interpret a store payload as a tabular collection.
///
/// Returns `None` unless `value` is a JSON array whose elements are all objects.
/// An empty array is tabular (zero rows).
pub fn parse_records(value: &Value) -> Option<Vec<Record>> {
    let items = value.as_array()?;
    items
        .iter()
        .map(|item| item.as_object().cloned())
        .collect()
}

/// Column names across all records, in first-seen order.
pub fn discover_columns(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for record in records {
        for key in record.keys() {
            if seen.insert(key.as_str()) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// Flatten nested objects into dotted keys (`{"data": {"ts": 1}}` -> `{"data.ts": 1}`).
///
/// Arrays are kept as values so coordinate pairs survive flattening.
pub fn flatten_record(record: &Record) -> Record {
    let mut out = Record::new();
    flatten_into(&mut out, None, record);
    out
}

fn flatten_into(out: &mut Record, prefix: Option<&str>, record: &Record) {
    for (key, value) in record {
        let name = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_into(out, Some(&name), inner),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}

/// Render a cell for display, filtering and CSV export. Null renders empty.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cheap identity of a record set, used to detect that the rows behind a cursor changed.
pub fn fingerprint(records: &[Record]) -> u64 {
    let mut hasher = DefaultHasher::new();
    records.len().hash(&mut hasher);
    for record in records {
        for (key, value) in record {
            key.hash(&mut hasher);
            value.to_string().hash(&mut hasher);
        }
    }
    hasher.finish()
}
