//! Render boundary: a reconciled table plus pagination, sort and filter state.

use crate::filter::FilterStatement;
use crate::reconcile::Table;
use crate::record::{display_value, Record};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

/// A render-ready table. Sorting and filtering only change the view, never the rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderableTable {
    table: Table,
    page_size: usize,
    page_current: usize,
    sort: Option<SortSpec>,
    filters: Vec<FilterStatement>,
}

impl RenderableTable {
    pub fn new(table: Table, page_size: usize) -> Self {
        Self {
            table,
            page_size: page_size.max(1),
            page_current: 0,
            sort: None,
            filters: Vec::new(),
        }
    }

    /// Place the cursor, clamped to the last page.
    pub fn with_page(mut self, page: usize) -> Self {
        self.set_page(page);
        self
    }

    pub fn set_page(&mut self, page: usize) {
        self.page_current = page.min(self.page_count().saturating_sub(1));
    }

    /// Single-column sort; replaces any previous sort.
    pub fn sort_by(&mut self, column: impl Into<String>, direction: SortDirection) {
        self.sort = Some(SortSpec {
            column: column.into(),
            direction,
        });
    }

    /// Replaces the filters. The cursor is clamped to the filtered page count.
    pub fn set_filters(&mut self, filters: Vec<FilterStatement>) {
        self.filters = filters;
        self.set_page(self.page_current);
    }

    pub fn columns(&self) -> &[String] {
        &self.table.columns
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_current(&self) -> usize {
        self.page_current
    }

    pub fn sort(&self) -> Option<&SortSpec> {
        self.sort.as_ref()
    }

    pub fn total_rows(&self) -> usize {
        self.table.len()
    }

    /// Rows surviving the filters, in sort order.
    pub fn visible_rows(&self) -> Vec<&Record> {
        let mut rows: Vec<&Record> = self
            .table
            .rows
            .iter()
            .filter(|r| self.filters.iter().all(|f| f.matches(r)))
            .collect();
        if let Some(spec) = &self.sort {
            // Stable: ties keep source order.
            rows.sort_by(|a, b| {
                let ord = compare_cells(a.get(&spec.column), b.get(&spec.column));
                match spec.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            });
        }
        rows
    }

    /// At least one page, even when empty.
    pub fn page_count(&self) -> usize {
        let n = self.visible_rows().len();
        n.div_ceil(self.page_size).max(1)
    }

    pub fn current_page(&self) -> Vec<&Record> {
        self.visible_rows()
            .into_iter()
            .skip(self.page_current * self.page_size)
            .take(self.page_size)
            .collect()
    }
}

/// Nulls sort last; numbers numerically; everything else by display text.
fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => display_value(x).cmp(&display_value(y)),
    }
}

impl fmt::Display for RenderableTable {
    /// Plain-text rendering of the current page.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let page = self.current_page();
        let cells: Vec<Vec<String>> = page
            .iter()
            .map(|row| {
                self.columns()
                    .iter()
                    .map(|c| row.get(c).map(display_value).unwrap_or_default())
                    .collect()
            })
            .collect();
        let widths: Vec<usize> = self
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(c.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header: Vec<String> = self
            .columns()
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = w))
            .collect();
        writeln!(f, "{}", header.join("  ").trim_end())?;
        for row in &cells {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:<w$}", c, w = w))
                .collect();
            writeln!(f, "{}", line.join("  ").trim_end())?;
        }
        write!(
            f,
            "page {}/{} ({} rows)",
            self.page_current + 1,
            self.page_count(),
            self.visible_rows().len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOperator;
    use crate::permissions::ColumnSet;
    use crate::reconcile::project;
    use crate::record::parse_records;
    use serde_json::json;

    fn table(n: usize) -> Table {
        let rows: Vec<Value> = (0..n)
            .map(|i| json!({"user_id": format!("u{:03}", i), "total_trips": i % 7}))
            .collect();
        let records = parse_records(&Value::Array(rows)).unwrap();
        let columns: ColumnSet = ["user_id", "total_trips"].into_iter().collect();
        project(&records, &columns)
    }

    #[test]
    fn test_pagination_at_fifty() {
        let t = RenderableTable::new(table(120), DEFAULT_PAGE_SIZE);
        assert_eq!(t.page_count(), 3);
        assert_eq!(t.current_page().len(), 50);
        let last = t.clone().with_page(2);
        assert_eq!(last.current_page().len(), 20);
        assert_eq!(last.current_page()[0]["user_id"], json!("u100"));
    }

    #[test]
    fn test_cursor_clamped_to_last_page() {
        let t = RenderableTable::new(table(10), DEFAULT_PAGE_SIZE).with_page(7);
        assert_eq!(t.page_current(), 0);
        assert_eq!(RenderableTable::new(Table::default(), 50).page_count(), 1);
    }

    #[test]
    fn test_sort_descending_numbers_with_nulls_last() {
        let records = parse_records(&json!([
            {"n": 1}, {"n": null}, {"n": 10}, {"n": 2}
        ]))
        .unwrap();
        let columns: ColumnSet = ["n"].into_iter().collect();
        let mut t = RenderableTable::new(project(&records, &columns), 50);
        t.sort_by("n", SortDirection::Descending);
        let values: Vec<Value> = t.current_page().iter().map(|r| r["n"].clone()).collect();
        assert_eq!(values, vec![json!(10), json!(2), json!(1), Value::Null]);
        t.sort_by("n", SortDirection::Ascending);
        assert_eq!(t.current_page()[0]["n"], json!(1));
        assert_eq!(t.current_page()[3]["n"], Value::Null);
    }

    #[test]
    fn test_filter_narrows_view_not_rows() {
        let mut t = RenderableTable::new(table(100), 50).with_page(1);
        t.set_filters(vec![FilterStatement::new(
            "user_id",
            FilterOperator::Contains,
            "u00",
        )]);
        assert_eq!(t.visible_rows().len(), 10);
        assert_eq!(t.page_current(), 0);
        assert_eq!(t.total_rows(), 100);
    }

    #[test]
    fn test_display_renders_header_and_footer() {
        let t = RenderableTable::new(table(2), 50);
        let text = t.to_string();
        assert!(text.starts_with("user_id  total_trips"));
        assert!(text.ends_with("page 1/1 (2 rows)"));
    }
}
