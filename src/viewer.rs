//! Owner of the per-partition viewer state.
//!
//! Fetches run elsewhere. The controller hands out a ticket per request and
//! only accepts the result carrying the latest ticket, so a slow response
//! for a hostel the user already left can never overwrite the current one.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::domain::SheetError;
use crate::sheet::columns::{self, VisibilityState};
use crate::sheet::filter::{self, FilterState, SortKey, ValueCount};
use crate::sheet::virtualizer::{self, VirtualWindow};
use crate::sheet::width::estimate_widths;
use crate::sheet::{
    ColumnDescriptor, Dataset, ExportFile, ExportFormat, ExportJob, Partition, PartitionId, Row,
    SummaryData, SummaryTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Summary,
    Detail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    Partition(PartitionId),
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub seq: u64,
    pub target: FetchTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    Failed,
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading(PartitionId),
    Ready(PartitionId),
    Failed {
        partition: PartitionId,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryState {
    Idle,
    Loading,
    Ready,
    Failed(String),
}

/// What the detail grid has to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowsState {
    Idle,
    Loading,
    Failed(String),
    NoData,
    NoMatches,
    Rows(usize),
}

pub struct ViewerController {
    partitions: Vec<Partition>,
    view: View,
    load: LoadState,
    seq: u64,
    pending_partition: Option<u64>,
    pending_summary: Option<u64>,
    dataset: Option<Dataset>,
    filter: FilterState,
    visibility: VisibilityState,
    sort: Option<SortKey>,
    filtered: Arc<Vec<usize>>,
    widths: HashMap<String, u16>,
    summary: Option<SummaryTable>,
    summary_state: SummaryState,
    width_sample_size: usize,
}

impl ViewerController {
    pub fn new(width_sample_size: usize) -> Self {
        ViewerController {
            partitions: Vec::new(),
            view: View::Summary,
            load: LoadState::Idle,
            seq: 0,
            pending_partition: None,
            pending_summary: None,
            dataset: None,
            filter: FilterState::default(),
            visibility: VisibilityState::default(),
            sort: None,
            filtered: Arc::new(Vec::new()),
            widths: HashMap::new(),
            summary: None,
            summary_state: SummaryState::Idle,
            width_sample_size,
        }
    }

    // -------------------- Partitions and fetch sequencing -------------------- //

    pub fn set_partitions(&mut self, partitions: Vec<Partition>) {
        self.partitions = partitions;
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn view(&self) -> View {
        self.view
    }

    /// Partition the detail view is showing or waiting for.
    pub fn selected_partition(&self) -> Option<&str> {
        match &self.load {
            LoadState::Idle => None,
            LoadState::Loading(id) | LoadState::Ready(id) => Some(id),
            LoadState::Failed { partition, .. } => Some(partition),
        }
    }

    fn next_ticket(&mut self, target: FetchTarget) -> FetchTicket {
        self.seq += 1;
        FetchTicket {
            seq: self.seq,
            target,
        }
    }

    /// Switches the detail view to a partition and returns the fetch to run.
    /// The previous dataset is dropped right away so two schemas never mix.
    pub fn select_partition(&mut self, id: &str) -> FetchTicket {
        let ticket = self.next_ticket(FetchTarget::Partition(id.to_string()));
        info!("Selecting hostel {id} (fetch #{})", ticket.seq);
        self.pending_partition = Some(ticket.seq);
        self.load = LoadState::Loading(id.to_string());
        self.view = View::Detail;
        self.clear_dataset();
        ticket
    }

    fn clear_dataset(&mut self) {
        self.dataset = None;
        self.filtered = Arc::new(Vec::new());
        self.widths.clear();
        self.reset_view_state();
    }

    fn reset_view_state(&mut self) {
        self.filter = FilterState::default();
        self.visibility = VisibilityState::default();
        self.sort = None;
    }

    pub fn complete_partition(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Dataset, SheetError>,
    ) -> FetchOutcome {
        let FetchTarget::Partition(id) = &ticket.target else {
            return FetchOutcome::Discarded;
        };
        let still_selected = self.selected_partition() == Some(id.as_str());
        if self.pending_partition != Some(ticket.seq) || !still_selected {
            debug!("Discarding stale fetch #{} for hostel {id}", ticket.seq);
            return FetchOutcome::Discarded;
        }
        self.pending_partition = None;

        match result {
            Ok(dataset) => {
                let start_time = Instant::now();
                let sample = self.width_sample_size;
                self.widths = estimate_widths(&dataset.columns, &dataset.rows, sample);
                self.dataset = Some(dataset);
                self.reset_view_state();
                self.rederive();
                self.load = LoadState::Ready(id.clone());
                info!(
                    "Hostel {id} ready: {} rows, {} columns, prepared in {}ms",
                    self.total_rows(),
                    self.columns().len(),
                    start_time.elapsed().as_millis()
                );
                FetchOutcome::Applied
            }
            Err(e) => {
                error!("Loading hostel {id} failed: {e}");
                self.clear_dataset();
                self.load = LoadState::Failed {
                    partition: id.clone(),
                    message: e.to_string(),
                };
                FetchOutcome::Failed
            }
        }
    }

    pub fn request_summary(&mut self) -> FetchTicket {
        let ticket = self.next_ticket(FetchTarget::Summary);
        self.pending_summary = Some(ticket.seq);
        self.summary_state = SummaryState::Loading;
        self.summary = None;
        ticket
    }

    pub fn complete_summary(
        &mut self,
        ticket: &FetchTicket,
        result: Result<SummaryData, SheetError>,
    ) -> FetchOutcome {
        if ticket.target != FetchTarget::Summary || self.pending_summary != Some(ticket.seq) {
            debug!("Discarding stale summary fetch #{}", ticket.seq);
            return FetchOutcome::Discarded;
        }
        self.pending_summary = None;

        match result {
            Ok(data) => {
                let table = SummaryTable::new(data, &self.partitions);
                for mismatch in table.verify() {
                    warn!("Summary totals disagree: {mismatch:?}");
                }
                info!(
                    "Summary ready: {} hostels, grand total {:?}",
                    table.partition_count(),
                    table.grand_total()
                );
                self.summary = Some(table);
                self.summary_state = SummaryState::Ready;
                FetchOutcome::Applied
            }
            Err(e) => {
                error!("Loading summary failed: {e}");
                self.summary = None;
                self.summary_state = SummaryState::Failed(e.to_string());
                FetchOutcome::Failed
            }
        }
    }

    pub fn show_summary(&mut self) {
        self.view = View::Summary;
    }

    pub fn summary(&self) -> Option<&SummaryTable> {
        self.summary.as_ref()
    }

    pub fn summary_state(&self) -> &SummaryState {
        &self.summary_state
    }

    /// Summary -> Detail for the hostel behind a summary column.
    pub fn drill_down(&mut self, column_id: &str) -> Option<FetchTicket> {
        let id = self.summary.as_ref()?.drill_down(column_id)?.clone();
        Some(self.select_partition(&id))
    }

    /// Refetches whatever the current view shows.
    pub fn reload(&mut self) -> Option<FetchTicket> {
        match self.view {
            View::Summary => Some(self.request_summary()),
            View::Detail => {
                let id = self.selected_partition()?.to_string();
                Some(self.select_partition(&id))
            }
        }
    }

    // -------------------- Derived rows -------------------- //

    fn rederive(&mut self) {
        let Some(dataset) = &self.dataset else {
            self.filtered = Arc::new(Vec::new());
            return;
        };
        let start_time = Instant::now();
        let mut indices = filter::apply(&dataset.rows, &dataset.columns, &self.filter);
        if let Some(key) = &self.sort {
            filter::sort_indices(&dataset.rows, &mut indices, key);
        }
        trace!(
            "Filtered {} of {} rows in {}ms",
            indices.len(),
            dataset.rows.len(),
            start_time.elapsed().as_millis()
        );
        self.filtered = Arc::new(indices);
    }

    pub fn filter_state(&self) -> &FilterState {
        &self.filter
    }

    fn set_filter(&mut self, filter: FilterState) {
        if filter != self.filter {
            self.filter = filter;
            self.rederive();
        }
    }

    pub fn set_global_text(&mut self, text: &str) {
        let next = self.filter.clone().set_global_text(text);
        self.set_filter(next);
    }

    pub fn set_column_filter(&mut self, column_id: &str, selected: Option<BTreeSet<String>>) {
        let current = self.filter.clone();
        self.set_filter(current.update_column_filter(column_id, selected));
    }

    pub fn clear_filters(&mut self) {
        let next = self.filter.clone().clear();
        self.set_filter(next);
    }

    pub fn sort(&self) -> Option<&SortKey> {
        self.sort.as_ref()
    }

    pub fn sort_by(&mut self, column_id: &str, ascending: bool) {
        let key = SortKey {
            column: column_id.to_string(),
            ascending,
        };
        if self.sort.as_ref() != Some(&key) {
            self.sort = Some(key);
            self.rederive();
        }
    }

    pub fn filtered_count(&self) -> usize {
        self.filtered.len()
    }

    pub fn total_rows(&self) -> usize {
        self.dataset.as_ref().map(|d| d.rows.len()).unwrap_or(0)
    }

    /// Row at a position of the filtered sequence.
    pub fn row_at(&self, position: usize) -> Option<&Row> {
        let dataset = self.dataset.as_ref()?;
        self.filtered.get(position).map(|&idx| &dataset.rows[idx])
    }

    pub fn distinct_values(&self, column_id: &str) -> Vec<ValueCount> {
        self.dataset
            .as_ref()
            .map(|d| filter::distinct_values(&d.rows, column_id))
            .unwrap_or_default()
    }

    pub fn window(
        &self,
        row_height: f64,
        scroll_top: f64,
        viewport_height: f64,
        overscan: usize,
    ) -> VirtualWindow {
        virtualizer::compute_window(
            self.filtered.len(),
            row_height,
            scroll_top,
            viewport_height,
            overscan,
        )
    }

    pub fn rows_state(&self) -> RowsState {
        match &self.load {
            LoadState::Idle => RowsState::Idle,
            LoadState::Loading(_) => RowsState::Loading,
            LoadState::Failed { message, .. } => RowsState::Failed(message.clone()),
            LoadState::Ready(_) if self.total_rows() == 0 => RowsState::NoData,
            LoadState::Ready(_) if self.filtered.is_empty() => RowsState::NoMatches,
            LoadState::Ready(_) => RowsState::Rows(self.filtered.len()),
        }
    }

    // -------------------- Columns -------------------- //

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        self.dataset
            .as_ref()
            .map(|d| d.columns.as_slice())
            .unwrap_or(&[])
    }

    pub fn visibility(&self) -> &VisibilityState {
        &self.visibility
    }

    pub fn visible_columns(&self) -> Vec<&ColumnDescriptor> {
        columns::visible_columns(self.columns(), &self.visibility)
    }

    pub fn column_width(&self, column_id: &str) -> u16 {
        self.widths.get(column_id).copied().unwrap_or(10)
    }

    pub fn toggle_column(&mut self, column_id: &str) {
        let Some(column) = self.dataset.as_ref().and_then(|d| d.column(column_id)) else {
            return;
        };
        self.visibility = std::mem::take(&mut self.visibility).toggle(column);
    }

    pub fn show_all_columns(&mut self) {
        self.visibility = VisibilityState::show_all(self.columns());
    }

    pub fn hide_all_columns(&mut self) {
        self.visibility = VisibilityState::hide_all(self.columns());
    }

    // -------------------- Export -------------------- //

    pub fn export_job(&self, format: ExportFormat) -> Option<ExportJob<'_>> {
        let dataset = self.dataset.as_ref()?;
        let rows = self.filtered.iter().map(|&i| &dataset.rows[i]).collect();
        Some(ExportJob {
            rows,
            columns: self.visible_columns(),
            format,
            filename_base: dataset.partition.name.clone(),
        })
    }

    /// Serializes the filtered rows over the visible columns. `None` when
    /// there is no dataset, no visible column or no row.
    pub fn export(
        &self,
        format: ExportFormat,
        date: NaiveDate,
    ) -> Result<Option<ExportFile>, SheetError> {
        match self.export_job(format) {
            Some(job) => job.serialize(date),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::summary::infer_summary_columns;

    fn partitions() -> Vec<Partition> {
        vec![
            Partition::new("h1", "Aravali"),
            Partition::new("h2", "Narmada"),
        ]
    }

    fn occupant(name: &str, status: &str, phone: &str) -> Row {
        Row::new()
            .with("name", name)
            .with("status", status)
            .with("phone", phone)
    }

    fn dataset(id: &str, name: &str) -> Dataset {
        let columns = vec![
            ColumnDescriptor::new("name", "Name"),
            ColumnDescriptor::new("status", "Status"),
            ColumnDescriptor::new("phone", "Phone").hidden(),
        ];
        let rows = vec![
            occupant("Jane Doe", "Active", "111"),
            occupant("John Roe", "Inactive", "222"),
            occupant("Ann Lee", "Active", "333"),
        ];
        Dataset::new(Partition::new(id, name), columns, rows)
    }

    fn ready(id: &str) -> ViewerController {
        let mut viewer = ViewerController::new(250);
        viewer.set_partitions(partitions());
        let ticket = viewer.select_partition(id);
        let outcome = viewer.complete_partition(&ticket, Ok(dataset(id, "Aravali")));
        assert_eq!(outcome, FetchOutcome::Applied);
        viewer
    }

    /// Summary with a label, "h1", one more hostel column and a total.
    fn summary_data(second_hostel: &str) -> SummaryData {
        let keys = ["dimension", "h1", second_hostel, "total"];
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let row = |label: &str| {
            Row::new()
                .with("dimension", label)
                .with("h1", 10_i64)
                .with(second_hostel, 15_i64)
                .with("total", 25_i64)
        };
        SummaryData {
            columns: infer_summary_columns(&keys),
            rows: vec![row("First year"), row("Total")],
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 15).unwrap()
    }

    #[test]
    fn latest_selection_wins_over_late_response() {
        let mut viewer = ViewerController::new(250);
        viewer.set_partitions(partitions());
        let first = viewer.select_partition("h1");
        let second = viewer.select_partition("h2");

        let late = viewer.complete_partition(&second, Ok(dataset("h2", "Narmada")));
        assert_eq!(late, FetchOutcome::Applied);
        let stale = viewer.complete_partition(&first, Ok(dataset("h1", "Aravali")));
        assert_eq!(stale, FetchOutcome::Discarded);
        assert_eq!(viewer.selected_partition(), Some("h2"));
        assert_eq!(viewer.rows_state(), RowsState::Rows(3));
        assert_eq!(viewer.dataset().unwrap().partition.id, "h2");
    }

    #[test]
    fn early_response_for_abandoned_partition_is_discarded() {
        let mut viewer = ViewerController::new(250);
        let first = viewer.select_partition("h1");
        let _second = viewer.select_partition("h2");
        let early = viewer.complete_partition(&first, Ok(dataset("h1", "Aravali")));
        assert_eq!(early, FetchOutcome::Discarded);
        assert_eq!(viewer.rows_state(), RowsState::Loading);
        assert!(viewer.dataset().is_none());
    }

    #[test]
    fn failure_clears_stale_rows() {
        let mut viewer = ready("h1");
        let ticket = viewer.select_partition("h2");
        let error = SheetError::LoadingFailed("timeout".into());
        let outcome = viewer.complete_partition(&ticket, Err(error));
        assert_eq!(outcome, FetchOutcome::Failed);
        assert!(viewer.dataset().is_none());
        assert!(viewer.columns().is_empty());
        let state = viewer.rows_state();
        assert!(matches!(state, RowsState::Failed(m) if m.contains("timeout")));
    }

    #[test]
    fn empty_partition_has_no_data_and_nothing_to_export() {
        let mut viewer = ViewerController::new(250);
        viewer.set_partitions(partitions());
        let ticket = viewer.select_partition("h1");
        let columns = vec![ColumnDescriptor::new("name", "Name")];
        let empty = Dataset::new(Partition::new("h1", "Aravali"), columns, Vec::new());
        let outcome = viewer.complete_partition(&ticket, Ok(empty));
        assert_eq!(outcome, FetchOutcome::Applied);

        assert_eq!(viewer.rows_state(), RowsState::NoData);
        assert_eq!(viewer.filtered_count(), 0);
        assert!(viewer.window(1.0, 0.0, 10.0, 5).is_empty());
        assert!(viewer.export(ExportFormat::Csv, date()).unwrap().is_none());
        viewer.set_global_text("jane");
        assert_eq!(viewer.rows_state(), RowsState::NoData);
    }

    #[test]
    fn switching_partition_resets_filters_and_visibility() {
        let mut viewer = ready("h1");
        viewer.set_global_text("jane");
        viewer.toggle_column("phone");
        viewer.sort_by("name", true);
        assert_eq!(viewer.filtered_count(), 1);
        assert_eq!(viewer.visible_columns().len(), 3);

        let ticket = viewer.select_partition("h2");
        viewer.complete_partition(&ticket, Ok(dataset("h2", "Narmada")));
        assert_eq!(viewer.filter_state(), &FilterState::default());
        assert!(viewer.sort().is_none());
        assert_eq!(viewer.visible_columns().len(), 2);
        assert_eq!(viewer.filtered_count(), 3);
    }

    #[test]
    fn filters_and_sort_drive_the_row_sequence() {
        let mut viewer = ready("h1");
        viewer.set_column_filter("status", Some(["Active".to_string()].into()));
        assert_eq!(viewer.rows_state(), RowsState::Rows(2));
        viewer.sort_by("name", true);
        assert_eq!(viewer.row_at(0).unwrap().get("name").display(), "Ann Lee");
        viewer.set_global_text("nobody");
        assert_eq!(viewer.rows_state(), RowsState::NoMatches);
        viewer.clear_filters();
        assert_eq!(viewer.rows_state(), RowsState::Rows(3));
        assert_eq!(viewer.distinct_values("status").len(), 2);
    }

    #[test]
    fn hidden_columns_are_still_searched() {
        let mut viewer = ready("h1");
        viewer.set_global_text("222");
        assert_eq!(viewer.rows_state(), RowsState::Rows(1));
        viewer.set_global_text("blank");
        assert_eq!(viewer.rows_state(), RowsState::NoMatches);
    }

    #[test]
    fn window_follows_filtered_count() {
        let mut viewer = ready("h1");
        assert_eq!(viewer.window(1.0, 0.0, 10.0, 0).last_index, 2);
        viewer.set_global_text("john");
        let w = viewer.window(1.0, 0.0, 10.0, 0);
        assert_eq!((w.first_index, w.last_index), (0, 0));
    }

    #[test]
    fn export_uses_visible_columns_and_filtered_rows() {
        let mut viewer = ready("h1");
        viewer.set_column_filter("status", Some(["Active".to_string()].into()));
        let file = viewer.export(ExportFormat::Csv, date()).unwrap().unwrap();
        assert_eq!(file.suggested_filename, "Aravali_2024-08-15.csv");
        let text = String::from_utf8_lossy(&file.content[3..]).to_string();
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let headers: Vec<&str> = reader.headers().unwrap().iter().collect();
        assert_eq!(headers, vec!["Name", "Status"]);
        assert_eq!(reader.records().count(), 2);
        assert!(!text.contains("111"));

        viewer.hide_all_columns();
        assert!(viewer.export(ExportFormat::Json, date()).unwrap().is_none());
        viewer.show_all_columns();
        viewer.set_global_text("nobody");
        assert!(viewer.export(ExportFormat::Tsv, date()).unwrap().is_none());
    }

    #[test]
    fn drill_down_switches_to_detail() {
        let mut viewer = ViewerController::new(250);
        viewer.set_partitions(partitions());
        let ticket = viewer.request_summary();
        let outcome = viewer.complete_summary(&ticket, Ok(summary_data("Narmada")));
        assert_eq!(outcome, FetchOutcome::Applied);
        assert_eq!(viewer.summary().unwrap().grand_total(), Some(25));
        assert_eq!(viewer.view(), View::Summary);

        assert!(viewer.drill_down("total").is_none());
        let ticket = viewer.drill_down("Narmada").unwrap();
        assert_eq!(ticket.target, FetchTarget::Partition("h2".into()));
        assert_eq!(viewer.view(), View::Detail);
        assert_eq!(viewer.rows_state(), RowsState::Loading);
    }

    #[test]
    fn unmatched_summary_column_stays_on_summary() {
        let mut viewer = ViewerController::new(250);
        viewer.set_partitions(partitions());
        let ticket = viewer.request_summary();
        viewer.complete_summary(&ticket, Ok(summary_data("Ganga")));

        assert!(viewer.drill_down("Ganga").is_none());
        assert_eq!(viewer.view(), View::Summary);
        assert_eq!(viewer.selected_partition(), None);
        assert_eq!(viewer.rows_state(), RowsState::Idle);
    }

    #[test]
    fn stale_summary_is_discarded() {
        let mut viewer = ViewerController::new(250);
        let old = viewer.request_summary();
        let new = viewer.request_summary();
        let stale = viewer.complete_summary(&old, Ok(SummaryData::default()));
        assert_eq!(stale, FetchOutcome::Discarded);
        let failed = viewer.complete_summary(&new, Err(SheetError::FileNotFound));
        assert_eq!(failed, FetchOutcome::Failed);
        assert!(matches!(viewer.summary_state(), SummaryState::Failed(_)));
    }
}
