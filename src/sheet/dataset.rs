use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::columns::ColumnDescriptor;
use super::value::CellValue;

pub type PartitionId = String;

static NULL_CELL: CellValue = CellValue::Null;

/// A dataset partition (one hostel) as listed by the data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub name: String,
}

impl Partition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Partition {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One immutable record keyed by accessor key. Missing keys read as Null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: HashMap<String, CellValue>,
}

impl Row {
    pub fn new() -> Self {
        Row::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.cells.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> &CellValue {
        self.cells.get(key).unwrap_or(&NULL_CELL)
    }
}

impl FromIterator<(String, CellValue)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, CellValue)>>(iter: T) -> Self {
        Row {
            cells: iter.into_iter().collect(),
        }
    }
}

/// Schema and rows of one loaded partition. Replaced wholesale on every fetch.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub partition: Partition,
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Arc<Vec<Row>>,
}

impl Dataset {
    pub fn new(partition: Partition, columns: Vec<ColumnDescriptor>, rows: Vec<Row>) -> Self {
        Dataset {
            partition,
            columns,
            rows: Arc::new(rows),
        }
    }

    pub fn column(&self, key: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.accessor_key == key)
    }
}

/// Raw aggregate table as delivered by the summary service.
#[derive(Debug, Clone, Default)]
pub struct SummaryData {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
}
