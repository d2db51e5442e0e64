//! Cross-tabulated occupancy summary (dimension x hostel).
//!
//! The counts are computed upstream. This module only indexes them, links
//! hostel columns to partitions for drill-down and reports rows or columns
//! whose totals disagree with their parts.

use std::collections::HashMap;

use tracing::warn;

use super::columns::{ColumnCategory, ColumnDescriptor};
use super::dataset::{Partition, PartitionId, Row, SummaryData};
use super::value::{CellValue, normalize};

pub const TOTAL_LABEL: &str = "Total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryMismatch {
    RowTotal {
        label: String,
        expected: i64,
        actual: i64,
    },
    ColumnTotal {
        column: String,
        expected: i64,
        actual: i64,
    },
}

#[derive(Debug, Clone)]
pub struct SummaryTable {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Row>,
    total_row: Option<usize>,
    hostel_partitions: HashMap<String, PartitionId>,
}

impl SummaryTable {
    /// Indexes the aggregate table. Hostel columns are linked to the partition
    /// whose id matches the accessor key, or whose name matches the header.
    /// A hostel column matching neither has no drill-down.
    pub fn new(data: SummaryData, partitions: &[Partition]) -> Self {
        let SummaryData { columns, rows } = data;
        let hostel_partitions = columns
            .iter()
            .filter(|c| c.category == ColumnCategory::Hostel)
            .filter_map(|c| {
                let partition = partitions
                    .iter()
                    .find(|p| p.id == c.accessor_key)
                    .or_else(|| {
                        partitions
                            .iter()
                            .find(|p| p.name.eq_ignore_ascii_case(c.header.trim()))
                    });
                match partition {
                    Some(p) => Some((c.accessor_key.clone(), p.id.clone())),
                    None => {
                        warn!("Summary column '{}' matches no hostel", c.header);
                        None
                    }
                }
            })
            .collect();

        let label_key = columns
            .iter()
            .find(|c| c.category == ColumnCategory::Label)
            .map(|c| c.accessor_key.clone());
        let total_row = label_key.and_then(|key| {
            rows.iter()
                .position(|r| normalize(r.get(&key)).eq_ignore_ascii_case(TOTAL_LABEL))
        });

        SummaryTable {
            columns,
            rows,
            total_row,
            hostel_partitions,
        }
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn is_total_row(&self, idx: usize) -> bool {
        self.total_row == Some(idx)
    }

    pub fn total_row(&self) -> Option<&Row> {
        self.total_row.map(|idx| &self.rows[idx])
    }

    /// Rows other than the grand-total row.
    pub fn body_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.is_total_row(*idx))
            .map(|(_, row)| row)
    }

    pub fn cell_value<'a>(&self, row: &'a Row, column: &ColumnDescriptor) -> &'a CellValue {
        row.get(&column.accessor_key)
    }

    pub fn count(&self, row: &Row, column: &ColumnDescriptor) -> Option<i64> {
        self.cell_value(row, column)
            .as_number()
            .map(|n| n.round() as i64)
    }

    fn total_column(&self) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.category == ColumnCategory::Total)
    }

    fn hostel_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| c.category == ColumnCategory::Hostel)
    }

    /// Value of the total column in the grand-total row.
    pub fn grand_total(&self) -> Option<i64> {
        let column = self.total_column()?;
        self.count(self.total_row()?, column)
    }

    pub fn partition_count(&self) -> usize {
        self.hostel_partitions.len()
    }

    /// Partition behind a hostel column. Label and total columns have none.
    pub fn drill_down(&self, column_id: &str) -> Option<&PartitionId> {
        self.hostel_partitions.get(column_id)
    }

    fn row_label(&self, row: &Row) -> String {
        self.columns
            .iter()
            .find(|c| c.category == ColumnCategory::Label)
            .map(|c| normalize(row.get(&c.accessor_key)))
            .unwrap_or_default()
    }

    /// Contract checks on the upstream counts. Missing cells count as zero.
    pub fn verify(&self) -> Vec<SummaryMismatch> {
        let mut mismatches = Vec::new();

        if let Some(total) = self.total_column() {
            for row in &self.rows {
                let expected: i64 = self
                    .hostel_columns()
                    .map(|c| self.count(row, c).unwrap_or(0))
                    .sum();
                let actual = self.count(row, total).unwrap_or(0);
                if expected != actual {
                    mismatches.push(SummaryMismatch::RowTotal {
                        label: self.row_label(row),
                        expected,
                        actual,
                    });
                }
            }
        }

        if let Some(total_row) = self.total_row() {
            let numeric = self
                .columns
                .iter()
                .filter(|c| c.category != ColumnCategory::Label);
            for column in numeric {
                let expected: i64 = self
                    .body_rows()
                    .map(|r| self.count(r, column).unwrap_or(0))
                    .sum();
                let actual = self.count(total_row, column).unwrap_or(0);
                if expected != actual {
                    mismatches.push(SummaryMismatch::ColumnTotal {
                        column: column.header.clone(),
                        expected,
                        actual,
                    });
                }
            }
        }

        mismatches
    }
}

/// Tags summary columns when the source delivers bare headers: the first
/// column is the label, a column named "total" is the total, the rest are hostels.
pub fn infer_summary_columns(keys: &[String]) -> Vec<ColumnDescriptor> {
    keys.iter()
        .enumerate()
        .map(|(idx, key)| {
            let category = if idx == 0 {
                ColumnCategory::Label
            } else if key.trim().eq_ignore_ascii_case(TOTAL_LABEL) {
                ColumnCategory::Total
            } else {
                ColumnCategory::Hostel
            };
            ColumnDescriptor::new(key.clone(), key.clone()).with_category(category)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(total_row: Row) -> SummaryTable {
        let columns = infer_summary_columns(&[
            "dimension".to_string(),
            "h1".to_string(),
            "Narmada".to_string(),
            "total".to_string(),
        ]);
        let rows = vec![
            Row::new()
                .with("dimension", "First year")
                .with("h1", 4_i64)
                .with("Narmada", 6_i64)
                .with("total", 10_i64),
            Row::new()
                .with("dimension", "Second year")
                .with("h1", 6_i64)
                .with("Narmada", 9_i64)
                .with("total", 15_i64),
            total_row,
        ];
        let partitions = vec![
            Partition::new("h1", "Aravali"),
            Partition::new("h2", "Narmada"),
        ];
        SummaryTable::new(SummaryData { columns, rows }, &partitions)
    }

    fn consistent_total() -> Row {
        Row::new()
            .with("dimension", "Total")
            .with("h1", 10_i64)
            .with("Narmada", 15_i64)
            .with("total", 25_i64)
    }

    #[test]
    fn grand_total_row_is_detected() {
        let t = table(consistent_total());
        assert!(t.is_total_row(2));
        assert_eq!(t.grand_total(), Some(25));
        assert_eq!(t.body_rows().count(), 2);
        assert_eq!(t.partition_count(), 2);
    }

    #[test]
    fn total_row_equals_column_sums() {
        let t = table(consistent_total());
        assert!(t.verify().is_empty());
        let total_col = &t.columns()[3];
        let sum: i64 = t.body_rows().map(|r| t.count(r, total_col).unwrap()).sum();
        assert_eq!(sum, 25);
    }

    #[test]
    fn mismatches_are_reported_not_fixed() {
        let t = table(
            Row::new()
                .with("dimension", "Total")
                .with("h1", 10_i64)
                .with("Narmada", 14_i64)
                .with("total", 25_i64),
        );
        let issues = t.verify();
        assert!(issues.contains(&SummaryMismatch::RowTotal {
            label: "Total".into(),
            expected: 24,
            actual: 25
        }));
        assert!(issues.contains(&SummaryMismatch::ColumnTotal {
            column: "Narmada".into(),
            expected: 15,
            actual: 14
        }));
        assert_eq!(t.count(t.total_row().unwrap(), &t.columns()[2]), Some(14));
    }

    #[test]
    fn drill_down_links_hostel_columns() {
        let t = table(consistent_total());
        assert_eq!(t.drill_down("h1").map(String::as_str), Some("h1"));
        assert_eq!(t.drill_down("Narmada").map(String::as_str), Some("h2"));
        assert_eq!(t.drill_down("total"), None);
        assert_eq!(t.drill_down("dimension"), None);
    }

    #[test]
    fn unmatched_hostel_column_has_no_drill_down() {
        let columns = infer_summary_columns(&[
            "dimension".to_string(),
            "h1".to_string(),
            "Ganga".to_string(),
            "total".to_string(),
        ]);
        let rows = vec![
            Row::new()
                .with("dimension", "First year")
                .with("h1", 4_i64)
                .with("Ganga", 2_i64)
                .with("total", 6_i64),
        ];
        let partitions = vec![Partition::new("h1", "Aravali")];
        let t = SummaryTable::new(SummaryData { columns, rows }, &partitions);
        assert_eq!(t.drill_down("Ganga"), None);
        assert_eq!(t.drill_down("h1").map(String::as_str), Some("h1"));
        assert_eq!(t.partition_count(), 1);
        assert!(t.verify().is_empty());
    }
}
