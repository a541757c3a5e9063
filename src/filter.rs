//! Client-side row filters in `{column} operator value` form.
//!
//! Matching is case-sensitive. Ordering operators compare numerically when both sides
//! parse as numbers and lexically otherwise.

use crate::record::{display_value, Record};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq, Copy, serde::Serialize, serde::Deserialize)]
pub enum FilterOperator {
    Eq,
    NotEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    Contains,
    NotContains,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::NotEq => "!=",
            FilterOperator::Gt => ">",
            FilterOperator::Lt => "<",
            FilterOperator::GtEq => ">=",
            FilterOperator::LtEq => "<=",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "!contains",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "=" | "eq" => FilterOperator::Eq,
            "!=" | "ne" => FilterOperator::NotEq,
            ">" | "gt" => FilterOperator::Gt,
            "<" | "lt" => FilterOperator::Lt,
            ">=" | "ge" => FilterOperator::GtEq,
            "<=" | "le" => FilterOperator::LtEq,
            "contains" => FilterOperator::Contains,
            "!contains" => FilterOperator::NotContains,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FilterStatement {
    pub column: String,
    pub operator: FilterOperator,
    pub value: String,
}

fn statement_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:\{(?P<braced>[^}]+)\}|(?P<bare>\S+))\s+(?P<op>!contains|contains|!=|>=|<=|=|>|<|eq|ne|gt|lt|ge|le)\s+(?P<value>.*?)\s*$",
        )
        .expect("filter regex is valid")
    })
}

impl FilterStatement {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    /// Parse `"{trip start} contains 2024"` or `"total_trips > 3"`.
    ///
    /// Values may be wrapped in double quotes to keep surrounding spaces.
    pub fn parse(input: &str) -> Result<Self> {
        let caps = statement_regex()
            .captures(input)
            .ok_or_else(|| eyre!("Invalid filter '{}': expected `{{column}} operator value`", input))?;
        let column = caps
            .name("braced")
            .or_else(|| caps.name("bare"))
            .map(|m| m.as_str().trim().to_string())
            .ok_or_else(|| eyre!("Invalid filter '{}': missing column", input))?;
        let operator = FilterOperator::parse(&caps["op"])
            .ok_or_else(|| eyre!("Invalid filter '{}': unknown operator", input))?;
        let raw = &caps["value"];
        let value = raw
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(raw);
        Ok(Self::new(column, operator, value))
    }

    /// Rows lacking the column never match.
    pub fn matches(&self, row: &Record) -> bool {
        let Some(cell) = row.get(&self.column) else {
            return false;
        };
        let text = display_value(cell);
        match self.operator {
            FilterOperator::Contains => text.contains(&self.value),
            FilterOperator::NotContains => !text.contains(&self.value),
            FilterOperator::Eq => compare(cell, &text, &self.value) == Ordering::Equal,
            FilterOperator::NotEq => compare(cell, &text, &self.value) != Ordering::Equal,
            FilterOperator::Gt => compare(cell, &text, &self.value) == Ordering::Greater,
            FilterOperator::Lt => compare(cell, &text, &self.value) == Ordering::Less,
            FilterOperator::GtEq => compare(cell, &text, &self.value) != Ordering::Less,
            FilterOperator::LtEq => compare(cell, &text, &self.value) != Ordering::Greater,
        }
    }
}

fn compare(cell: &Value, text: &str, value: &str) -> Ordering {
    let lhs = match cell {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    match (lhs, value.parse::<f64>().ok()) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => text.cmp(value),
    }
}
