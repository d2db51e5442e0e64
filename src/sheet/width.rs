use rayon::prelude::*;
use std::collections::HashMap;

use super::columns::{ColumnDescriptor, ColumnSize};
use super::dataset::Row;
use super::value::CellValue;

/// Rows inspected per column, taken from the head of the unfiltered dataset.
pub const WIDTH_SAMPLE_SIZE: usize = 250;
/// Terminal cells per character of text.
pub const CHAR_WIDTH_FACTOR: f64 = 1.0;
/// Spacing around the cell text, including the filter marker in the header.
pub const COLUMN_WIDTH_MARGIN: f64 = 3.0;

pub const AVATAR_COLUMN: &str = "avatar";
pub const AVATAR_LABEL: &str = "Photo";

impl ColumnSize {
    pub fn clamp_range(self) -> (u16, u16) {
        match self {
            ColumnSize::Compact => (6, 14),
            ColumnSize::Regular => (8, 28),
            ColumnSize::Identifier => (10, 22),
            ColumnSize::Wide => (12, 42),
        }
    }
}

fn cell_len(column: &ColumnDescriptor, value: &CellValue) -> usize {
    if column.accessor_key == AVATAR_COLUMN {
        return AVATAR_LABEL.chars().count();
    }
    value.short_display().chars().count()
}

/// Width of one column from its header and the sampled cells.
pub fn estimate_width(column: &ColumnDescriptor, sample: &[Row]) -> u16 {
    let header_len = column.header.chars().count();
    let max_len = sample
        .iter()
        .map(|row| cell_len(column, row.get(&column.accessor_key)))
        .fold(header_len, usize::max);

    let raw = (max_len as f64 * CHAR_WIDTH_FACTOR + COLUMN_WIDTH_MARGIN).ceil();
    let (min, max) = column.size.clamp_range();
    (raw.min(u16::MAX as f64) as u16).clamp(min, max)
}

/// Widths for every column, keyed by accessor key.
pub fn estimate_widths(
    columns: &[ColumnDescriptor],
    rows: &[Row],
    sample_size: usize,
) -> HashMap<String, u16> {
    let sample = &rows[..rows.len().min(sample_size)];
    columns
        .par_iter()
        .map(|c| (c.accessor_key.clone(), estimate_width(c, sample)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn header_sets_the_floor() {
        let col = ColumnDescriptor::new("room", "Room allocation");
        let rows = vec![Row::new().with("room", "A1")];
        assert_eq!(estimate_width(&col, &rows), 18);
    }

    #[test]
    fn long_values_are_clamped_by_size_class() {
        let long = "x".repeat(80);
        let rows = vec![Row::new().with("addr", long.as_str())];
        let wide = ColumnDescriptor::new("addr", "Address").with_size(ColumnSize::Wide);
        let regular = ColumnDescriptor::new("addr", "Address");
        let compact = ColumnDescriptor::new("addr", "Address").with_size(ColumnSize::Compact);
        assert_eq!(estimate_width(&wide, &rows), 42);
        assert_eq!(estimate_width(&regular, &rows), 28);
        assert_eq!(estimate_width(&compact, &rows), 14);
    }

    #[test]
    fn short_values_are_raised_to_the_minimum() {
        let col = ColumnDescriptor::new("ok", "OK").with_size(ColumnSize::Compact);
        let rows = vec![Row::new().with("ok", true)];
        assert_eq!(estimate_width(&col, &rows), 6);
    }

    #[test]
    fn avatar_and_dates_use_fixed_forms() {
        let avatar = ColumnDescriptor::new(AVATAR_COLUMN, "");
        let url = "https://cdn.example.org/p/very/long/path.png";
        let rows = vec![Row::new().with(AVATAR_COLUMN, url)];
        assert_eq!(estimate_width(&avatar, &rows), 8);

        let date = ColumnDescriptor::new("since", "In");
        let since = NaiveDate::from_ymd_opt(2024, 2, 3).unwrap();
        let rows = vec![Row::new().with("since", since)];
        assert_eq!(estimate_width(&date, &rows), 13);
    }

    #[test]
    fn only_the_sample_is_inspected() {
        let col = ColumnDescriptor::new("name", "Name").with_size(ColumnSize::Wide);
        let mut rows: Vec<Row> = (0..300).map(|_| Row::new().with("name", "Al")).collect();
        rows.push(Row::new().with("name", "A very very long trailing name"));
        let widths = estimate_widths(&[col], &rows, WIDTH_SAMPLE_SIZE);
        assert_eq!(widths["name"], 12);
    }
}
