// Local engine behind the occupancy sheet: filtering, windowing, sizing,
// summary indexing and export over one resident partition.

pub mod columns;
pub mod dataset;
pub mod export;
pub mod filter;
pub mod summary;
pub mod value;
pub mod virtualizer;
pub mod width;

pub use columns::{ColumnCategory, ColumnDescriptor, ColumnSize};
pub use dataset::{Dataset, Partition, PartitionId, Row, SummaryData};
pub use export::{ExportFile, ExportFormat, ExportJob};
pub use summary::SummaryTable;
pub use value::CellValue;
