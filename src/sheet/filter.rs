//! Filter pipeline over the rows of one partition.
//!
//! Filtering never touches rows. It produces a new sequence of indices into
//! the dataset, the same way a sort does.

use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::columns::ColumnDescriptor;
use super::dataset::Row;
use super::value::{CellValue, normalize};

/// Committed selection for one column. `None` passes every value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnFilter {
    pub selected_values: Option<BTreeSet<String>>,
}

impl ColumnFilter {
    pub fn is_active(&self) -> bool {
        self.selected_values.is_some()
    }

    fn matches(&self, value: &CellValue) -> bool {
        match &self.selected_values {
            None => true,
            Some(selected) => selected.contains(&normalize(value)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    pub global_text: String,
    pub per_column: BTreeMap<String, ColumnFilter>,
}

impl FilterState {
    /// Commits a selection for a column. `None` removes the column filter.
    pub fn update_column_filter(
        mut self,
        column_id: &str,
        selected: Option<BTreeSet<String>>,
    ) -> Self {
        match selected {
            None => {
                self.per_column.remove(column_id);
            }
            Some(values) => {
                self.per_column.insert(
                    column_id.to_string(),
                    ColumnFilter {
                        selected_values: Some(values),
                    },
                );
            }
        }
        self
    }

    pub fn set_global_text(mut self, text: impl Into<String>) -> Self {
        self.global_text = text.into();
        self
    }

    pub fn clear(self) -> Self {
        FilterState::default()
    }

    pub fn column_filter(&self, column_id: &str) -> Option<&BTreeSet<String>> {
        self.per_column
            .get(column_id)
            .and_then(|f| f.selected_values.as_ref())
    }

    pub fn has_global_text(&self) -> bool {
        !self.global_text.trim().is_empty()
    }

    pub fn active_column_count(&self) -> usize {
        self.per_column.values().filter(|f| f.is_active()).count()
    }

    pub fn is_active(&self) -> bool {
        self.has_global_text() || self.active_column_count() > 0
    }
}

/// Searches the described columns only. A key missing from the row reads
/// as blank, so it matches "blank" like an empty cell does.
fn matches_global(row: &Row, columns: &[ColumnDescriptor], needle: &str) -> bool {
    columns.iter().any(|column| {
        let value = normalize(row.get(&column.accessor_key));
        value.to_lowercase().contains(needle)
    })
}

fn matches_columns(row: &Row, state: &FilterState) -> bool {
    state
        .per_column
        .iter()
        .all(|(key, filter)| filter.matches(row.get(key)))
}

/// Whether one row passes the global text AND every active column filter.
pub fn row_matches(row: &Row, columns: &[ColumnDescriptor], state: &FilterState) -> bool {
    let global_ok = if state.has_global_text() {
        matches_global(row, columns, &state.global_text.trim().to_lowercase())
    } else {
        true
    };
    global_ok && matches_columns(row, state)
}

/// Indices of the rows passing the filter state, in dataset order.
pub fn apply(rows: &[Row], columns: &[ColumnDescriptor], state: &FilterState) -> Vec<usize> {
    if !state.is_active() {
        return (0..rows.len()).collect();
    }
    rows.par_iter()
        .enumerate()
        .filter(|(_, row)| row_matches(row, columns, state))
        .map(|(idx, _)| idx)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Every normalized value of a column over the unfiltered rows, with counts.
pub fn distinct_values(rows: &[Row], column_id: &str) -> Vec<ValueCount> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in rows {
        *counts.entry(normalize(row.get(column_id))).or_insert(0) += 1;
    }
    let mut values: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();
    values.sort_unstable_by(|a, b| a.value.cmp(&b.value));
    values
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub ascending: bool,
}

fn type_rank(value: &CellValue) -> u8 {
    match value {
        CellValue::Number(_) => 0,
        CellValue::Date(_) => 1,
        CellValue::Bool(_) => 2,
        CellValue::Text(_) => 3,
        CellValue::Null => 4,
    }
}

fn compare_cells(a: &CellValue, b: &CellValue) -> Ordering {
    match (a, b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (CellValue::Date(x), CellValue::Date(y)) => x.cmp(y),
        (CellValue::Bool(x), CellValue::Bool(y)) => x.cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Stable sort of a row index sequence. Blank cells stay at the end in both directions.
pub fn sort_indices(rows: &[Row], indices: &mut [usize], key: &SortKey) {
    indices.sort_by(|&a, &b| {
        let va = rows[a].get(&key.column);
        let vb = rows[b].get(&key.column);
        match (va.is_blank(), vb.is_blank()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if key.ascending => compare_cells(va, vb),
            (false, false) => compare_cells(vb, va),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> Option<BTreeSet<String>> {
        Some(values.iter().map(|s| s.to_string()).collect())
    }

    fn described(keys: &[&str]) -> Vec<ColumnDescriptor> {
        keys.iter().map(|k| ColumnDescriptor::new(*k, *k)).collect()
    }

    fn by_column(column_id: &str, values: &[&str]) -> FilterState {
        FilterState::default().update_column_filter(column_id, set(values))
    }

    fn count(value: &str, count: usize) -> ValueCount {
        ValueCount {
            value: value.to_string(),
            count,
        }
    }

    fn occupants() -> Vec<Row> {
        let statuses = ["Active", "Inactive", "On leave"];
        let blocks = ["A", "B", "C", "D"];
        (0..120)
            .map(|i| {
                let row = Row::new()
                    .with("name", format!("Occupant {i}").as_str())
                    .with("status", statuses[i % 3])
                    .with("block", blocks[i % 4])
                    .with("fees_paid", i % 5 != 0)
                    .with("floor", (i % 6) as i64);
                if i % 7 == 0 {
                    row
                } else {
                    row.with("remarks", "ok")
                }
            })
            .collect()
    }

    fn occupant_columns() -> Vec<ColumnDescriptor> {
        described(&["name", "status", "block", "fees_paid", "floor", "remarks"])
    }

    #[test]
    fn column_filter_keeps_selected_values() {
        let rows = vec![
            Row::new().with("status", "Active"),
            Row::new().with("status", "Inactive"),
            Row::new().with("status", "Active"),
        ];
        let state = by_column("status", &["Active"]);
        let filtered = apply(&rows, &described(&["status"]), &state);
        assert_eq!(filtered, vec![0, 2]);
        let active = CellValue::from("Active");
        assert!(filtered.iter().all(|&i| rows[i].get("status") == &active));
    }

    #[test]
    fn global_text_is_case_insensitive_substring() {
        let rows = vec![
            Row::new().with("name", "Jane Doe"),
            Row::new().with("name", "John Roe"),
        ];
        let state = FilterState::default().set_global_text("jane");
        assert_eq!(apply(&rows, &described(&["name"]), &state), vec![0]);
    }

    #[test]
    fn global_text_reads_missing_cells_as_blank() {
        let rows = vec![
            Row::new().with("name", "Jane Doe"),
            Row::new().with("name", "John Roe").with("remarks", "late"),
        ];
        let columns = described(&["name", "remarks"]);
        let state = FilterState::default().set_global_text("blank");
        assert_eq!(apply(&rows, &columns, &state), vec![0]);
    }

    #[test]
    fn global_text_skips_undescribed_keys() {
        let rows = vec![
            Row::new()
                .with("name", "Jane Doe")
                .with("internal_id", "x-991"),
            Row::new().with("name", "Room x-991 guest"),
        ];
        let state = FilterState::default().set_global_text("x-991");
        assert_eq!(apply(&rows, &described(&["name"]), &state), vec![1]);
    }

    #[test]
    fn filters_match_normalized_values() {
        let rows = vec![
            Row::new().with("paid", true),
            Row::new().with("paid", false),
            Row::new(),
            Row::new().with("paid", ""),
        ];
        let state = by_column("paid", &["Yes", "(Blank)"]);
        assert_eq!(apply(&rows, &described(&["paid"]), &state), vec![0, 2, 3]);
    }

    #[test]
    fn distinct_values_ignore_other_filters_and_sort() {
        let rows = occupants();
        let values = distinct_values(&rows, "status");
        assert_eq!(
            values,
            vec![
                count("Active", 40),
                count("Inactive", 40),
                count("On leave", 40),
            ]
        );
        let remarks = distinct_values(&rows, "remarks");
        assert_eq!(remarks[0], count("(Blank)", 18));
        assert_eq!(remarks[1].count, 102);
    }

    #[test]
    fn empty_dataset_yields_nothing() {
        let state = FilterState::default().set_global_text("x");
        assert!(apply(&[], &described(&["status"]), &state).is_empty());
        assert!(distinct_values(&[], "status").is_empty());
    }

    #[test]
    fn clearing_a_column_filter_restores_all_rows() {
        let rows = occupants();
        let state = by_column("block", &["A"]).update_column_filter("block", None);
        assert!(!state.is_active());
        assert_eq!(apply(&rows, &occupant_columns(), &state).len(), rows.len());
        let state = state.set_global_text("Occupant 1").clear();
        assert_eq!(state, FilterState::default());
    }

    #[test]
    fn shrinking_a_selection_never_grows_the_result() {
        let rows = occupants();
        let columns = occupant_columns();
        let base = FilterState::default().set_global_text("occupant 1");
        let mut selected: Vec<&str> = vec!["A", "B", "C", "D"];
        let mut previous = usize::MAX;
        while !selected.is_empty() {
            let state = base.clone().update_column_filter("block", set(&selected));
            let n = apply(&rows, &columns, &state).len();
            assert!(n <= previous);
            previous = n;
            selected.pop();
        }
    }

    #[test]
    fn combined_filter_equals_intersection_of_single_filters() {
        let rows = occupants();
        let columns = occupant_columns();
        let global = FilterState::default().set_global_text("2");
        let status = by_column("status", &["Active", "On leave"]);
        let paid = by_column("fees_paid", &["Yes"]);
        let combined = FilterState::default()
            .set_global_text("2")
            .update_column_filter("status", set(&["Active", "On leave"]))
            .update_column_filter("fees_paid", set(&["Yes"]));

        let indices = |state: &FilterState| -> BTreeSet<usize> {
            apply(&rows, &columns, state).into_iter().collect()
        };
        let a = indices(&global);
        let b = indices(&status);
        let c = indices(&paid);
        let expected: BTreeSet<usize> = a
            .intersection(&b)
            .copied()
            .collect::<BTreeSet<usize>>()
            .intersection(&c)
            .copied()
            .collect();
        let actual = indices(&combined);
        assert!(!actual.is_empty());
        assert_eq!(actual, expected);
    }

    #[test]
    fn sort_orders_numbers_and_keeps_blanks_last() {
        let rows = vec![
            Row::new().with("beds", 3_i64),
            Row::new(),
            Row::new().with("beds", 10_i64),
            Row::new().with("beds", 1_i64),
        ];
        let mut idx: Vec<usize> = (0..rows.len()).collect();
        let mut key = SortKey {
            column: "beds".into(),
            ascending: true,
        };
        sort_indices(&rows, &mut idx, &key);
        assert_eq!(idx, vec![3, 0, 2, 1]);
        key.ascending = false;
        sort_indices(&rows, &mut idx, &key);
        assert_eq!(idx, vec![2, 0, 3, 1]);
    }
}
