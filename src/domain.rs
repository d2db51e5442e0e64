use derive_setters::Setters;
use polars::error::PolarsError;
use ratatui::crossterm::event::KeyEvent;
use std::fmt;
use std::io::Error;
use std::path::PathBuf;

use crate::sheet::ExportFormat;

pub const HELP_TEXT: &str = "\
Navigation
  Arrows / hjkl      move          PgUp / PgDn     page
  g / G              first / last  Tab / S-Tab     next / previous tab
  m                  summary tab   Enter           drill into hostel column
Filtering
  /                  search all columns
  f                  value filter for the current column
  F                  clear all filters
  s / S              sort ascending / descending
Columns
  v                  column panel (space toggles, a all, n none)
Export (visible columns, filtered rows)
  e  csv    t  tsv    J  json    x  spreadsheet xml
Other
  c / C              copy cell / row     r  reload     ?  help     q  quit";

#[derive(Debug, Clone, Setters)]
pub struct SheetConfig {
    pub event_poll_time: u64,
    pub row_height: f64,
    pub overscan: usize,
    pub width_sample_size: usize,
    pub data_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl Default for SheetConfig {
    fn default() -> Self {
        SheetConfig {
            event_poll_time: 100,
            row_height: 1.0,
            overscan: 20,
            width_sample_size: crate::sheet::width::WIDTH_SAMPLE_SIZE,
            data_dir: PathBuf::from("."),
            export_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Quit,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    MovePageUp,
    MovePageDown,
    MoveBeginning,
    MoveEnd,
    NextTab,
    PrevTab,
    SummaryTab,
    Enter,
    Exit,
    Help,
    Resize(usize, usize),
    RawKey(KeyEvent),
    GlobalFilter,
    ColumnFilter,
    ClearFilters,
    ColumnPanel,
    ToggleItem,
    SelectAll,
    SelectNone,
    SortAscending,
    SortDescending,
    Export(ExportFormat),
    CopyCell,
    CopyRow,
    Reload,
}

#[derive(Debug)]
pub enum SheetError {
    IoError(Error),
    PolarsError(PolarsError),
    JsonError(serde_json::Error),
    CsvError(csv::Error),
    LoadingFailed(String),
    FileNotFound,
    PermissionDenied,
    UnknownPartition(String),
    InvalidArgument(String),
}

impl fmt::Display for SheetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetError::IoError(e) => write!(f, "i/o error: {e}"),
            SheetError::PolarsError(e) => write!(f, "could not read table: {e}"),
            SheetError::JsonError(e) => write!(f, "invalid json: {e}"),
            SheetError::CsvError(e) => write!(f, "csv error: {e}"),
            SheetError::LoadingFailed(msg) => write!(f, "loading failed: {msg}"),
            SheetError::FileNotFound => write!(f, "file not found"),
            SheetError::PermissionDenied => write!(f, "permission denied"),
            SheetError::UnknownPartition(id) => write!(f, "unknown hostel '{id}'"),
            SheetError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for SheetError {}

impl From<Error> for SheetError {
    fn from(err: Error) -> Self {
        SheetError::IoError(err)
    }
}

impl From<PolarsError> for SheetError {
    fn from(err: PolarsError) -> Self {
        SheetError::PolarsError(err)
    }
}

impl From<serde_json::Error> for SheetError {
    fn from(err: serde_json::Error) -> Self {
        SheetError::JsonError(err)
    }
}

impl From<csv::Error> for SheetError {
    fn from(err: csv::Error) -> Self {
        SheetError::CsvError(err)
    }
}
