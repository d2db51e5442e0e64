//! Boundary to the services that deliver partitions, rows and the summary.

use polars::prelude::*;
use rayon::prelude::*;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::domain::SheetError;
use crate::sheet::summary::infer_summary_columns;
use crate::sheet::value::parse_date;
use crate::sheet::width::AVATAR_COLUMN;
use crate::sheet::{
    CellValue, ColumnDescriptor, ColumnSize, Dataset, Partition, Row, SummaryData,
};

const PARTITIONS_FILE: &str = "partitions.json";
const COLUMNS_FILE: &str = "columns.json";
const ROWS_FILE: &str = "rows.csv";
const SUMMARY_DIR: &str = "summary";

pub trait DataSource: Send + Sync {
    fn list_partitions(&self) -> Result<Vec<Partition>, SheetError>;
    fn fetch_partition(&self, id: &str) -> Result<Dataset, SheetError>;
    fn fetch_summary(&self) -> Result<SummaryData, SheetError>;
}

/// Reads partitions from a directory tree:
///
/// ```text
/// <root>/partitions.json        [{"id": .., "name": ..}]   (optional)
/// <root>/<id>/rows.csv
/// <root>/<id>/columns.json      column descriptors          (optional)
/// <root>/summary/rows.csv
/// <root>/summary/columns.json                               (optional)
/// ```
#[derive(Debug)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn open(root: PathBuf) -> Result<Self, SheetError> {
        let metadata = fs::metadata(&root).map_err(map_io_error)?;
        if !metadata.is_dir() {
            let message = format!("{} is not a directory", root.display());
            return Err(SheetError::LoadingFailed(message));
        }
        Ok(DirectorySource { root })
    }

    fn read_descriptors(dir: &Path) -> Result<Option<Vec<ColumnDescriptor>>, SheetError> {
        let path = dir.join(COLUMNS_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn scan_partitions(&self) -> Result<Vec<Partition>, SheetError> {
        let mut partitions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.path().join(ROWS_FILE).is_file() && name != SUMMARY_DIR {
                partitions.push(Partition::new(name.clone(), name));
            }
        }
        partitions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(partitions)
    }
}

impl DataSource for DirectorySource {
    fn list_partitions(&self) -> Result<Vec<Partition>, SheetError> {
        let path = self.root.join(PARTITIONS_FILE);
        if path.is_file() {
            let content = fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            self.scan_partitions()
        }
    }

    #[instrument(skip(self))]
    fn fetch_partition(&self, id: &str) -> Result<Dataset, SheetError> {
        let partition = self
            .list_partitions()?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or_else(|| SheetError::UnknownPartition(id.to_string()))?;

        let dir = self.root.join(&partition.id);
        let (names, rows) = load_table(&dir.join(ROWS_FILE))?;
        let columns = match Self::read_descriptors(&dir)? {
            Some(columns) => columns,
            None => names.iter().map(|n| describe(n)).collect(),
        };
        Ok(Dataset::new(partition, columns, rows))
    }

    #[instrument(skip(self))]
    fn fetch_summary(&self) -> Result<SummaryData, SheetError> {
        let dir = self.root.join(SUMMARY_DIR);
        let (names, rows) = load_table(&dir.join(ROWS_FILE))?;
        let columns = match Self::read_descriptors(&dir)? {
            Some(columns) => columns,
            None => infer_summary_columns(&names),
        };
        Ok(SummaryData { columns, rows })
    }
}

fn map_io_error(e: std::io::Error) -> SheetError {
    match e.kind() {
        ErrorKind::NotFound => SheetError::FileNotFound,
        ErrorKind::PermissionDenied => SheetError::PermissionDenied,
        _ => SheetError::IoError(e),
    }
}

/// Descriptor for a column that came without one: "check_in" becomes "Check in".
fn describe(key: &str) -> ColumnDescriptor {
    let words = key.replace(['_', '-'], " ");
    let mut chars = words.trim().chars();
    let header = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => key.to_string(),
    };
    let column = ColumnDescriptor::new(key, header);
    if key == AVATAR_COLUMN {
        column.with_size(ColumnSize::Compact)
    } else {
        column
    }
}

fn load_table(path: &Path) -> Result<(Vec<String>, Vec<Row>), SheetError> {
    fs::metadata(path).map_err(map_io_error)?;
    let start_time = Instant::now();

    // Every column arrives as text so codes like "007" keep their zeros.
    let df = LazyCsvReader::new(PlPath::Local(path.into()))
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()?
        .collect()?;

    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();

    // Each column is converted on its own thread.
    let columns: Result<Vec<Vec<CellValue>>, PolarsError> = names
        .par_iter()
        .map(|name| load_column(&df, name))
        .collect();
    let mut columns: Vec<_> = columns?.into_iter().map(Vec::into_iter).collect();

    let rows: Vec<Row> = (0..df.height())
        .map(|_| {
            names
                .iter()
                .zip(columns.iter_mut())
                .map(|(name, cells)| (name.clone(), cells.next().unwrap_or_default()))
                .collect()
        })
        .collect();

    info!(
        "Loaded {} rows x {} columns from {} in {}ms",
        rows.len(),
        names.len(),
        path.display(),
        start_time.elapsed().as_millis()
    );
    Ok((names, rows))
}

fn load_column(df: &DataFrame, name: &str) -> Result<Vec<CellValue>, PolarsError> {
    let as_text = df.column(name)?.cast(&DataType::String)?;
    let raw: Vec<Option<&str>> = as_text.str()?.into_iter().collect();
    let present: Vec<&str> = raw.iter().flatten().copied().collect();
    let kind = ColumnKind::infer(&present);
    debug!("Column \"{name}\": {kind:?}");
    Ok(raw
        .into_iter()
        .map(|value| match value {
            None => CellValue::Null,
            Some(s) => kind.cell(s),
        })
        .collect())
}

/// Type shared by every non-empty cell of a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Date,
    Number,
    Text,
}

impl ColumnKind {
    fn infer(values: &[&str]) -> Self {
        if values.is_empty() {
            ColumnKind::Text
        } else if values.iter().all(|s| parse_bool(s).is_some()) {
            ColumnKind::Bool
        } else if values.iter().all(|s| parse_date(s).is_some()) {
            ColumnKind::Date
        } else if values.iter().all(|s| parse_number(s).is_some()) {
            ColumnKind::Number
        } else {
            ColumnKind::Text
        }
    }

    fn cell(self, s: &str) -> CellValue {
        let typed = match self {
            ColumnKind::Bool => parse_bool(s).map(CellValue::Bool),
            ColumnKind::Date => parse_date(s).map(CellValue::Date),
            ColumnKind::Number => parse_number(s).map(CellValue::Number),
            ColumnKind::Text => None,
        };
        typed.unwrap_or_else(|| CellValue::Text(s.to_string()))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// "007" and "09876500001" are codes. "0" and "0.5" are numbers.
fn has_leading_zero(s: &str) -> bool {
    let digits = s.trim_start_matches(['+', '-']).as_bytes();
    digits.len() > 1 && digits[0] == b'0' && digits[1].is_ascii_digit()
}

fn parse_number(s: &str) -> Option<f64> {
    if has_leading_zero(s) {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}
