use arboard::Clipboard;
use chrono::Local;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

use crate::domain::{HELP_TEXT, Message, SheetConfig, SheetError};
use crate::inputter::{InputResult, Inputter};
use crate::sheet::columns::group_by_category;
use crate::sheet::filter::ValueCount;
use crate::sheet::virtualizer::{compute_window, scroll_to_reveal};
use crate::sheet::width::{AVATAR_COLUMN, AVATAR_LABEL, estimate_widths};
use crate::sheet::{CellValue, ColumnDescriptor, Dataset, ExportFormat, Row, SummaryData};
use crate::source::DataSource;
use crate::ui::{CMDLINE_HEIGHT, SCROLLBAR_WIDTH, TABLE_HEADER_HEIGHT, TABS_HEIGHT};
use crate::viewer::{
    FetchOutcome, FetchTarget, FetchTicket, RowsState, SummaryState, View, ViewerController,
};

const STATUS_MESSAGE_TIMEOUT: Duration = Duration::from_secs(8);
const IDLE_HINT: &str = "Pick a hostel with Tab, or drill down from the summary with Enter.";

#[derive(Debug, PartialEq)]
pub enum Status {
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    TABLE,
    VALUEMENU,
    COLUMNPANEL,
    CMDINPUT,
    POPUP,
}

enum FetchResult {
    Partition(FetchTicket, Result<Dataset, SheetError>),
    Summary(FetchTicket, Result<SummaryData, SheetError>),
}

#[derive(Clone, Debug, Default)]
pub struct ColumnView {
    pub name: String,
    pub width: usize,
    pub data: Vec<String>,
}

#[derive(Clone, Debug)]
pub enum Body {
    Notice {
        title: String,
        text: String,
    },
    Table {
        columns: Vec<ColumnView>,
        selected_row: Option<usize>,
        selected_column: usize,
        emphasized_row: Option<usize>,
        position: usize,
        content_length: usize,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MenuLine {
    pub text: String,
    /// `None` marks a group heading.
    pub checked: Option<bool>,
}

#[derive(Clone, Debug)]
pub enum Popup {
    Help(String),
    Menu {
        title: String,
        lines: Vec<MenuLine>,
        cursor: usize,
        footer: String,
    },
}

pub struct UIData {
    pub tabs: Vec<String>,
    pub selected_tab: usize,
    pub body: Body,
    pub popup: Option<Popup>,
    pub row_info: String,
    pub status_message: String,
    pub cmdinput: InputResult,
    pub active_cmdinput: bool,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            tabs: Vec::new(),
            selected_tab: 0,
            body: Body::Notice {
                title: String::new(),
                text: String::new(),
            },
            popup: None,
            row_info: String::new(),
            status_message: String::new(),
            cmdinput: InputResult::default(),
            active_cmdinput: false,
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
    pub table_width: usize,
    pub table_height: usize,
}

impl UILayout {
    pub fn from_values(ui_width: usize, ui_height: usize) -> Self {
        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            table_width: ui_width.saturating_sub(SCROLLBAR_WIDTH),
            table_height: ui_height
                .saturating_sub(TABS_HEIGHT + CMDLINE_HEIGHT + TABLE_HEADER_HEIGHT),
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }
}

/// Cursor and scroll position over a table. `row` indexes the filtered rows,
/// `column` the visible columns.
#[derive(Debug, Default, Clone, PartialEq)]
struct GridCursor {
    row: usize,
    scroll_top: f64,
    column: usize,
    offset_column: usize,
}

struct ValueMenu {
    column: String,
    header: String,
    values: Vec<ValueCount>,
    selected: BTreeSet<String>,
    // 0 is the "select all" line, values follow.
    cursor: usize,
}

impl ValueMenu {
    fn all_selected(&self) -> bool {
        self.selected.len() == self.values.len()
    }
}

pub struct Model {
    config: SheetConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    source: Arc<dyn DataSource>,
    viewer: ViewerController,
    sender: Sender<FetchResult>,
    receiver: Receiver<FetchResult>,
    grid: GridCursor,
    summary_grid: GridCursor,
    summary_widths: HashMap<String, u16>,
    value_menu: Option<ValueMenu>,
    panel_cursor: usize,
    global_before_edit: String,
    uilayout: UILayout,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    last_input: InputResult,
    active_cmdinput: bool,
    status_message: String,
    last_status_message_update: Instant,
}

impl Model {
    pub fn init(
        config: &SheetConfig,
        source: Arc<dyn DataSource>,
        ui_width: usize,
        ui_height: usize,
    ) -> Result<Self, SheetError> {
        let (sender, receiver) = mpsc::channel();
        let clipboard = match Clipboard::new() {
            Ok(c) => Some(c),
            Err(e) => {
                debug!("Clipboard unavailable: {e:?}");
                None
            }
        };

        let mut viewer = ViewerController::new(config.width_sample_size);
        viewer.set_partitions(source.list_partitions()?);
        info!("Found {} hostels", viewer.partitions().len());

        let mut model = Self {
            config: config.clone(),
            status: Status::READY,
            modus: Modus::TABLE,
            previous_modus: Modus::TABLE,
            source,
            viewer,
            sender,
            receiver,
            grid: GridCursor::default(),
            summary_grid: GridCursor::default(),
            summary_widths: HashMap::new(),
            value_menu: None,
            panel_cursor: 0,
            global_before_edit: String::new(),
            uilayout: UILayout::from_values(ui_width, ui_height),
            uidata: UIData::empty(),
            clipboard,
            input: Inputter::default(),
            last_input: InputResult::default(),
            active_cmdinput: false,
            status_message: "Started hostel-sheet!".to_string(),
            last_status_message_update: Instant::now(),
        };
        let ticket = model.viewer.request_summary();
        model.dispatch(ticket);
        model.update_uidata();
        Ok(model)
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.last_status_message_update = Instant::now();
        self.uidata.status_message = self.status_message.clone();
    }

    // -------------------- Fetching ---------------------- //

    fn dispatch(&self, ticket: FetchTicket) {
        trace!("Dispatching fetch #{} for {:?}", ticket.seq, ticket.target);
        let source = Arc::clone(&self.source);
        let sender = self.sender.clone();
        rayon::spawn(move || {
            let result = match &ticket.target {
                FetchTarget::Partition(id) => {
                    let data = source.fetch_partition(id);
                    FetchResult::Partition(ticket.clone(), data)
                }
                FetchTarget::Summary => {
                    FetchResult::Summary(ticket.clone(), source.fetch_summary())
                }
            };
            if sender.send(result).is_err() {
                trace!("Viewer closed before fetch #{} finished", ticket.seq);
            }
        });
    }

    /// Applies finished fetches. Returns true when anything changed.
    pub fn poll_fetches(&mut self) -> bool {
        let mut changed = false;
        while let Ok(result) = self.receiver.try_recv() {
            self.handle_fetch(result);
            changed = true;
        }
        if changed {
            self.update_uidata();
        }
        changed
    }

    fn handle_fetch(&mut self, result: FetchResult) {
        match result {
            FetchResult::Partition(ticket, data) => {
                let outcome = self.viewer.complete_partition(&ticket, data);
                debug!("Fetch #{} finished: {:?}", ticket.seq, outcome);
                if outcome == FetchOutcome::Applied {
                    self.grid = GridCursor::default();
                    self.set_status_message(format!("Loaded {} rows", self.viewer.total_rows()));
                }
            }
            FetchResult::Summary(ticket, data) => {
                let outcome = self.viewer.complete_summary(&ticket, data);
                debug!("Summary fetch #{} finished: {:?}", ticket.seq, outcome);
                if let Some(summary) = self.viewer.summary() {
                    self.summary_widths = estimate_widths(
                        summary.columns(),
                        summary.rows(),
                        self.config.width_sample_size,
                    );
                    self.summary_grid = GridCursor::default();
                }
            }
        }
    }

    fn select_partition(&mut self, id: &str) {
        self.grid = GridCursor::default();
        let ticket = self.viewer.select_partition(id);
        self.dispatch(ticket);
    }

    fn show_summary(&mut self) {
        self.viewer.show_summary();
        let state = self.viewer.summary_state();
        if matches!(state, SummaryState::Idle | SummaryState::Failed(_)) {
            let ticket = self.viewer.request_summary();
            self.dispatch(ticket);
        }
    }

    /// Opens a hostel directly, e.g. from the command line.
    pub fn open_partition(&mut self, id: &str) -> Result<(), SheetError> {
        if !self.viewer.partitions().iter().any(|p| p.id == id) {
            return Err(SheetError::UnknownPartition(id.to_string()));
        }
        self.select_partition(id);
        self.update_uidata();
        Ok(())
    }

    fn selected_tab(&self) -> usize {
        match self.viewer.view() {
            View::Summary => 0,
            View::Detail => self
                .viewer
                .selected_partition()
                .and_then(|id| self.viewer.partitions().iter().position(|p| p.id == id))
                .map(|i| i + 1)
                .unwrap_or(0),
        }
    }

    fn switch_tab(&mut self, forward: bool) {
        let ntabs = self.viewer.partitions().len() + 1;
        let current = self.selected_tab();
        let next = if forward {
            (current + 1) % ntabs
        } else {
            (current + ntabs - 1) % ntabs
        };
        if next == 0 {
            self.show_summary();
        } else {
            let id = self.viewer.partitions()[next - 1].id.clone();
            self.select_partition(&id);
        }
    }

    // -------------------- Message handling ---------------------- //

    pub fn update(&mut self, message: Message) -> Result<(), SheetError> {
        match self.modus {
            Modus::TABLE => match message {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_rows(1),
                Message::MoveUp => self.move_rows(-1),
                Message::MovePageDown => self.move_rows(self.page_size()),
                Message::MovePageUp => self.move_rows(-self.page_size()),
                Message::MoveBeginning => self.move_rows(isize::MIN / 2),
                Message::MoveEnd => self.move_rows(isize::MAX / 2),
                Message::MoveLeft => self.move_columns(-1),
                Message::MoveRight => self.move_columns(1),
                Message::NextTab => self.switch_tab(true),
                Message::PrevTab => self.switch_tab(false),
                Message::SummaryTab => self.show_summary(),
                Message::Enter => self.enter(),
                Message::Help => self.show_help(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::GlobalFilter => self.enter_cmd_mode(),
                Message::ColumnFilter => self.open_value_menu(),
                Message::ClearFilters => self.clear_filters(),
                Message::ColumnPanel => self.open_column_panel(),
                Message::SortAscending => self.sort_current_column(true),
                Message::SortDescending => self.sort_current_column(false),
                Message::Export(format) => self.export(format),
                Message::CopyCell => self.copy_cell(),
                Message::CopyRow => self.copy_row(),
                Message::Reload => {
                    if let Some(ticket) = self.viewer.reload() {
                        self.dispatch(ticket);
                    }
                }
                _ => (),
            },
            Modus::VALUEMENU => match message {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_menu(1),
                Message::MoveUp => self.move_menu(-1),
                Message::MovePageDown => self.move_menu(10),
                Message::MovePageUp => self.move_menu(-10),
                Message::MoveBeginning => self.move_menu(isize::MIN / 2),
                Message::MoveEnd => self.move_menu(isize::MAX / 2),
                Message::ToggleItem => self.toggle_menu_item(),
                Message::SelectAll => self.select_all_values(true),
                Message::SelectNone => self.select_all_values(false),
                Message::Enter => self.apply_value_menu(),
                Message::Exit => self.close_popup(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::COLUMNPANEL => match message {
                Message::Quit => self.quit(),
                Message::MoveDown => self.move_panel(1),
                Message::MoveUp => self.move_panel(-1),
                Message::ToggleItem => self.toggle_panel_column(),
                Message::SelectAll => self.viewer.show_all_columns(),
                Message::SelectNone => self.viewer.hide_all_columns(),
                Message::Enter | Message::Exit | Message::ColumnPanel => self.close_popup(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::POPUP => match message {
                Message::Quit => self.quit(),
                Message::Enter | Message::Exit | Message::Help => self.close_popup(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::CMDINPUT => {
                if let Message::RawKey(key) = message {
                    self.raw_input(key)
                }
            }
        }
        self.update_uidata();
        Ok(())
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        self.uilayout = UILayout::from_values(width, height);
        let grid = &mut self.grid;
        grid.scroll_top = scroll_to_reveal(
            grid.row,
            self.config.row_height,
            grid.scroll_top,
            self.uilayout.table_height as f64 * self.config.row_height,
        );
    }

    fn page_size(&self) -> isize {
        self.uilayout.table_height.max(1) as isize
    }

    fn viewport_height(&self) -> f64 {
        self.uilayout.table_height as f64 * self.config.row_height
    }

    fn enter(&mut self) {
        if self.viewer.view() != View::Summary {
            return;
        }
        let Some(column) = self
            .viewer
            .summary()
            .and_then(|s| s.columns().get(self.summary_grid.column))
            .map(|c| c.accessor_key.clone())
        else {
            return;
        };
        match self.viewer.drill_down(&column) {
            Some(ticket) => {
                self.grid = GridCursor::default();
                self.dispatch(ticket);
            }
            None => self.set_status_message("Move to a hostel column to drill down"),
        }
    }

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
    }

    fn close_popup(&mut self) {
        self.value_menu = None;
        self.modus = Modus::TABLE;
        self.previous_modus = Modus::TABLE;
    }

    // -------------------- Grid navigation ---------------------- //

    fn current_row_count(&self) -> usize {
        match self.viewer.view() {
            View::Detail => self.viewer.filtered_count(),
            View::Summary => self.viewer.summary().map(|s| s.rows().len()).unwrap_or(0),
        }
    }

    fn current_widths(&self) -> Vec<usize> {
        match self.viewer.view() {
            View::Detail => self
                .viewer
                .visible_columns()
                .iter()
                .map(|c| self.viewer.column_width(&c.accessor_key) as usize)
                .collect(),
            View::Summary => self
                .viewer
                .summary()
                .map(|s| {
                    s.columns()
                        .iter()
                        .map(|c| self.summary_width(&c.accessor_key) as usize)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn summary_width(&self, column_id: &str) -> u16 {
        self.summary_widths.get(column_id).copied().unwrap_or(10)
    }

    fn cursor_mut(&mut self) -> &mut GridCursor {
        match self.viewer.view() {
            View::Detail => &mut self.grid,
            View::Summary => &mut self.summary_grid,
        }
    }

    fn move_rows(&mut self, delta: isize) {
        let nrows = self.current_row_count();
        let row_height = self.config.row_height;
        let viewport = self.viewport_height();
        let cursor = self.cursor_mut();
        if nrows == 0 {
            cursor.row = 0;
            cursor.scroll_top = 0.0;
            return;
        }
        let target = (cursor.row as isize).saturating_add(delta).clamp(0, nrows as isize - 1);
        cursor.row = target as usize;
        cursor.scroll_top = scroll_to_reveal(cursor.row, row_height, cursor.scroll_top, viewport);
    }

    fn move_columns(&mut self, delta: isize) {
        let widths = self.current_widths();
        let table_width = self.uilayout.table_width;
        let cursor = self.cursor_mut();
        if widths.is_empty() {
            cursor.column = 0;
            cursor.offset_column = 0;
            return;
        }
        let target = (cursor.column as isize + delta).clamp(0, widths.len() as isize - 1);
        cursor.column = target as usize;
        Self::reveal_column(cursor, &widths, table_width);
    }

    /// Moves the column offset until the cursor column is fully on screen,
    /// or is the first rendered column.
    fn reveal_column(cursor: &mut GridCursor, widths: &[usize], table_width: usize) {
        if cursor.column < cursor.offset_column {
            cursor.offset_column = cursor.column;
        }
        while cursor.offset_column < cursor.column {
            let fitted = Self::fit_columns(widths, cursor.offset_column, table_width);
            if fitted
                .iter()
                .any(|&(idx, width)| idx == cursor.column && width == widths[idx])
            {
                break;
            }
            cursor.offset_column += 1;
        }
    }

    /// Columns that fit into the table starting at `offset`, as (index, render width).
    /// The last one may be cut to the remaining space.
    fn fit_columns(widths: &[usize], offset: usize, table_width: usize) -> Vec<(usize, usize)> {
        let mut fitted = Vec::new();
        let mut visible_width = 0;
        for (idx, &width) in widths.iter().enumerate().skip(offset) {
            if visible_width + width + 1 <= table_width {
                fitted.push((idx, width));
                visible_width += width + 1;
            } else {
                // Add the last partial visible column
                if visible_width < table_width {
                    fitted.push((idx, table_width - visible_width));
                }
                break;
            }
        }
        fitted
    }

    fn current_column(&self) -> Option<ColumnDescriptor> {
        let visible = self.viewer.visible_columns();
        visible.get(self.grid.column).map(|c| (*c).clone())
    }

    fn sort_current_column(&mut self, ascending: bool) {
        if self.viewer.view() != View::Detail {
            return;
        }
        if let Some(column) = self.current_column() {
            self.viewer.sort_by(&column.accessor_key, ascending);
            self.grid.row = 0;
            self.grid.scroll_top = 0.0;
            let direction = if ascending { "ascending" } else { "descending" };
            self.set_status_message(format!("Sorted by {} {direction}", column.header));
        }
    }

    fn clear_filters(&mut self) {
        self.viewer.clear_filters();
        self.grid.row = 0;
        self.grid.scroll_top = 0.0;
        self.set_status_message("Filters cleared");
    }

    fn after_filter_change(&mut self) {
        let nrows = self.viewer.filtered_count();
        self.grid.row = self.grid.row.min(nrows.saturating_sub(1));
        let row_top = self.grid.row as f64 * self.config.row_height;
        self.grid.scroll_top = scroll_to_reveal(
            self.grid.row,
            self.config.row_height,
            self.grid.scroll_top.min(row_top),
            self.viewport_height(),
        );
    }

    // -------------------- Global search input ---------------------- //

    fn enter_cmd_mode(&mut self) {
        if self.viewer.view() != View::Detail {
            return;
        }
        trace!("Entering search input ...");
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.active_cmdinput = true;
        self.global_before_edit = self.viewer.filter_state().global_text.clone();
        self.input.set(&self.global_before_edit);
        self.last_input = self.input.get();
    }

    fn raw_input(&mut self, key: ratatui::crossterm::event::KeyEvent) {
        self.last_input = self.input.read(key);
        if self.last_input.canceled {
            let before = self.global_before_edit.clone();
            self.viewer.set_global_text(&before);
        } else {
            // Filter on every keystroke.
            let text = self.last_input.input.clone();
            self.viewer.set_global_text(&text);
        }
        self.after_filter_change();
        if self.last_input.finished {
            trace!("Search input finished: {:?}", self.last_input.input);
            self.active_cmdinput = false;
            self.modus = self.previous_modus;
            self.previous_modus = Modus::CMDINPUT;
            self.input.clear();
        }
    }

    // -------------------- Value filter menu ---------------------- //

    fn open_value_menu(&mut self) {
        if self.viewer.view() != View::Detail {
            return;
        }
        let Some(column) = self.current_column() else {
            return;
        };
        let values = self.viewer.distinct_values(&column.accessor_key);
        let filters = self.viewer.filter_state();
        let selected = match filters.column_filter(&column.accessor_key) {
            Some(committed) => committed.clone(),
            None => values.iter().map(|v| v.value.clone()).collect(),
        };
        trace!(
            "Value menu for {} with {} values",
            column.accessor_key,
            values.len()
        );
        self.value_menu = Some(ValueMenu {
            column: column.accessor_key,
            header: column.header,
            values,
            selected,
            cursor: 0,
        });
        self.previous_modus = self.modus;
        self.modus = Modus::VALUEMENU;
    }

    fn move_menu(&mut self, delta: isize) {
        if let Some(menu) = self.value_menu.as_mut() {
            let last = menu.values.len() as isize;
            menu.cursor = (menu.cursor as isize).saturating_add(delta).clamp(0, last) as usize;
        }
    }

    fn toggle_menu_item(&mut self) {
        let Some(menu) = self.value_menu.as_mut() else {
            return;
        };
        if menu.cursor == 0 {
            let select = !menu.all_selected();
            self.select_all_values(select);
            return;
        }
        let value = menu.values[menu.cursor - 1].value.clone();
        if !menu.selected.remove(&value) {
            menu.selected.insert(value);
        }
    }

    fn select_all_values(&mut self, select: bool) {
        if let Some(menu) = self.value_menu.as_mut() {
            menu.selected = if select {
                menu.values.iter().map(|v| v.value.clone()).collect()
            } else {
                BTreeSet::new()
            };
        }
    }

    fn apply_value_menu(&mut self) {
        let Some(menu) = self.value_menu.as_ref() else {
            return;
        };
        if menu.selected.is_empty() {
            self.set_status_message("Select at least one value to apply");
            return;
        }
        // A full selection clears the filter so values added later are not excluded.
        let committed = if menu.all_selected() {
            None
        } else {
            Some(menu.selected.clone())
        };
        let (column, header) = (menu.column.clone(), menu.header.clone());
        let active = committed.is_some();
        self.viewer.set_column_filter(&column, committed);
        self.after_filter_change();
        self.close_popup();
        if active {
            self.set_status_message(format!("Filtered {header}"));
        } else {
            self.set_status_message(format!("Cleared filter on {header}"));
        }
    }

    // -------------------- Column panel ---------------------- //

    fn panel_columns(&self) -> Vec<String> {
        group_by_category(self.viewer.columns())
            .into_iter()
            .flat_map(|g| g.columns.into_iter().map(|c| c.accessor_key.clone()))
            .collect()
    }

    fn open_column_panel(&mut self) {
        if self.viewer.view() != View::Detail || self.viewer.columns().is_empty() {
            return;
        }
        self.panel_cursor = 0;
        self.previous_modus = self.modus;
        self.modus = Modus::COLUMNPANEL;
    }

    fn move_panel(&mut self, delta: isize) {
        let last = self.viewer.columns().len().saturating_sub(1) as isize;
        self.panel_cursor = (self.panel_cursor as isize + delta).clamp(0, last) as usize;
    }

    fn toggle_panel_column(&mut self) {
        if let Some(key) = self.panel_columns().get(self.panel_cursor) {
            self.viewer.toggle_column(key);
        }
        let ncols = self.viewer.visible_columns().len();
        self.grid.column = self.grid.column.min(ncols.saturating_sub(1));
        self.grid.offset_column = self.grid.offset_column.min(self.grid.column);
    }

    // -------------------- Export and clipboard ---------------------- //

    fn export(&mut self, format: ExportFormat) {
        if self.viewer.view() != View::Detail {
            self.set_status_message("Open a hostel tab to export its rows");
            return;
        }
        let date = Local::now().date_naive();
        match self.viewer.export(format, date) {
            Ok(Some(file)) => {
                let path = self.config.export_dir.join(&file.suggested_filename);
                match fs::write(&path, &file.content) {
                    Ok(()) => {
                        info!(
                            "Exported {} rows as {format} to {}",
                            self.viewer.filtered_count(),
                            path.display()
                        );
                        self.set_status_message(format!("Exported to {}", path.display()));
                    }
                    Err(e) => {
                        error!("Writing {} failed: {e}", path.display());
                        self.set_status_message(format!("Export failed: {e}"));
                    }
                }
            }
            Ok(None) => self.set_status_message("Nothing to export"),
            Err(e) => {
                error!("Export as {format} failed: {e}");
                self.set_status_message(format!("Export failed: {e}"));
            }
        }
    }

    fn current_row(&self) -> Option<&Row> {
        self.viewer.row_at(self.grid.row)
    }

    fn copy_cell(&mut self) {
        let cell = match (self.current_row(), self.current_column()) {
            (Some(row), Some(column)) => row.get(&column.accessor_key).display(),
            _ => return,
        };
        trace!("Cell content: {}", cell);
        self.copy_to_clipboard(cell);
    }

    fn copy_row(&mut self) {
        let Some(row) = self.current_row() else {
            return;
        };
        let line = self
            .viewer
            .visible_columns()
            .iter()
            .map(|c| {
                let text = row.get(&c.accessor_key).display();
                text.replace(['\t', '\n'], " ")
            })
            .collect::<Vec<String>>()
            .join("\t");
        self.copy_to_clipboard(line);
    }

    fn copy_to_clipboard(&mut self, text: String) {
        let result = match self.clipboard.as_mut() {
            Some(clipboard) => clipboard.set_text(text).map_err(|e| format!("{e:?}")),
            None => Err("clipboard unavailable".to_string()),
        };
        match result {
            Ok(_) => self.set_status_message("Copied to clipboard"),
            Err(e) => {
                trace!("Error copying to clipboard: {e}");
                self.set_status_message(format!("Copy failed: {e}"));
            }
        }
    }

    // -------------------- UI data ---------------------- //

    fn cell_text(column: &ColumnDescriptor, value: &CellValue) -> String {
        if column.accessor_key == AVATAR_COLUMN && !value.is_blank() {
            return AVATAR_LABEL.to_string();
        }
        value.display().replace("\r\n", " ↵ ").replace('\n', " ↵ ")
    }

    fn header_label(&self, column: &ColumnDescriptor) -> String {
        let mut name = column.header.clone();
        let key = &column.accessor_key;
        if self.viewer.filter_state().column_filter(key).is_some() {
            name.push_str(" ▼");
        }
        if let Some(sort) = self.viewer.sort().filter(|s| &s.column == key) {
            name.push_str(if sort.ascending { " ↑" } else { " ↓" });
        }
        name
    }

    fn notice(title: impl Into<String>, text: impl Into<String>) -> Body {
        Body::Notice {
            title: title.into(),
            text: text.into(),
        }
    }

    fn selected_partition_name(&self) -> String {
        let id = self.viewer.selected_partition().unwrap_or_default();
        self.viewer
            .partitions()
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Positions whose rows intersect the viewport.
    fn rows_in_view(&self, nrows: usize, cursor: &GridCursor) -> Vec<usize> {
        let row_height = self.config.row_height;
        let viewport = self.viewport_height();
        let overscan = self.config.overscan;
        let window = compute_window(nrows, row_height, cursor.scroll_top, viewport, overscan);
        if window.is_empty() {
            return Vec::new();
        }
        trace!(
            "Window {}..={} ({} rows) at scroll {}",
            window.first_index,
            window.last_index,
            window.len(),
            cursor.scroll_top
        );
        window
            .offsets
            .iter()
            .filter(|o| {
                o.top + row_height > cursor.scroll_top && o.top < cursor.scroll_top + viewport
            })
            .map(|o| o.index)
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn table_body(
        &self,
        columns: &[&ColumnDescriptor],
        widths: &[usize],
        rows: &[(usize, &Row)],
        cursor: &GridCursor,
        emphasized: Option<usize>,
        content_length: usize,
        header: impl Fn(&ColumnDescriptor) -> String,
    ) -> Body {
        let fitted = Self::fit_columns(widths, cursor.offset_column, self.uilayout.table_width);
        let views = fitted
            .iter()
            .map(|&(idx, width)| {
                let column = columns[idx];
                ColumnView {
                    name: header(column),
                    width,
                    data: rows
                        .iter()
                        .map(|(_, row)| Self::cell_text(column, row.get(&column.accessor_key)))
                        .collect(),
                }
            })
            .collect();
        Body::Table {
            columns: views,
            selected_row: rows.iter().position(|(pos, _)| *pos == cursor.row),
            selected_column: fitted
                .iter()
                .position(|&(idx, _)| idx == cursor.column)
                .unwrap_or(0),
            emphasized_row: emphasized.and_then(|e| rows.iter().position(|(pos, _)| *pos == e)),
            position: cursor.row,
            content_length,
        }
    }

    fn detail_body(&self) -> Body {
        let name = self.selected_partition_name();
        match self.viewer.rows_state() {
            RowsState::Idle => Self::notice("", IDLE_HINT),
            RowsState::Loading => Self::notice(name.clone(), format!("Loading {name} ...")),
            RowsState::Failed(message) => Self::notice(
                name.clone(),
                format!("Could not load {name}: {message}\nPress r to retry."),
            ),
            RowsState::NoData => Self::notice(name, "This hostel has no occupants."),
            RowsState::NoMatches => Self::notice(
                name,
                "No rows match the current filters.\nPress F to clear all filters.",
            ),
            RowsState::Rows(nrows) => {
                let columns = self.viewer.visible_columns();
                if columns.is_empty() {
                    return Self::notice(name, "All columns are hidden. Press v to choose columns.");
                }
                let widths: Vec<usize> = columns
                    .iter()
                    .map(|c| self.viewer.column_width(&c.accessor_key) as usize)
                    .collect();
                let rows: Vec<(usize, &Row)> = self
                    .rows_in_view(nrows, &self.grid)
                    .into_iter()
                    .filter_map(|pos| self.viewer.row_at(pos).map(|r| (pos, r)))
                    .collect();
                self.table_body(&columns, &widths, &rows, &self.grid, None, nrows, |c| {
                    self.header_label(c)
                })
            }
        }
    }

    fn summary_body(&self) -> Body {
        match (self.viewer.summary_state(), self.viewer.summary()) {
            (SummaryState::Failed(message), _) => Self::notice(
                "Summary",
                format!("Could not load the summary: {message}\nPress r to retry."),
            ),
            (SummaryState::Ready, Some(summary)) if !summary.rows().is_empty() => {
                let columns: Vec<&ColumnDescriptor> = summary.columns().iter().collect();
                let widths = self.current_widths();
                let nrows = summary.rows().len();
                let rows: Vec<(usize, &Row)> = self
                    .rows_in_view(nrows, &self.summary_grid)
                    .into_iter()
                    .map(|pos| (pos, &summary.rows()[pos]))
                    .collect();
                let total = (0..nrows).find(|&i| summary.is_total_row(i));
                self.table_body(&columns, &widths, &rows, &self.summary_grid, total, nrows, |c| {
                    c.header.clone()
                })
            }
            (SummaryState::Ready, _) => Self::notice("Summary", "No summary data."),
            _ => Self::notice("Summary", "Loading summary ..."),
        }
    }

    fn row_info(&self) -> String {
        match self.viewer.view() {
            View::Summary => match self.viewer.summary() {
                Some(summary) => format!(
                    "{} hostels, {} occupants",
                    summary.partition_count(),
                    summary
                        .grand_total()
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "?".to_string())
                ),
                None => String::new(),
            },
            View::Detail => {
                let filter = self.viewer.filter_state();
                let mut info = format!(
                    "{}/{} rows",
                    self.viewer.filtered_count(),
                    self.viewer.total_rows()
                );
                let nfilters = filter.active_column_count();
                if nfilters > 0 {
                    info.push_str(&format!(", {nfilters} column filters"));
                }
                if filter.has_global_text() {
                    info.push_str(&format!(", search \"{}\"", filter.global_text));
                }
                info
            }
        }
    }

    fn popup(&self) -> Option<Popup> {
        match self.modus {
            Modus::POPUP => Some(Popup::Help(HELP_TEXT.to_string())),
            Modus::VALUEMENU => self.value_menu.as_ref().map(|menu| {
                let mut lines = vec![MenuLine {
                    text: "(Select all)".to_string(),
                    checked: Some(menu.all_selected()),
                }];
                lines.extend(menu.values.iter().map(|v| MenuLine {
                    text: format!("{}  ({})", v.value, v.count),
                    checked: Some(menu.selected.contains(&v.value)),
                }));
                let footer = if menu.selected.is_empty() {
                    "space toggle  a all  n none  (select a value to apply)  esc cancel"
                } else {
                    "space toggle  a all  n none  enter apply  esc cancel"
                };
                Popup::Menu {
                    title: format!("Filter {}", menu.header),
                    lines,
                    cursor: menu.cursor,
                    footer: footer.to_string(),
                }
            }),
            Modus::COLUMNPANEL => {
                let mut lines = Vec::new();
                let mut cursor = 0;
                let mut column_idx = 0;
                for group in group_by_category(self.viewer.columns()) {
                    lines.push(MenuLine {
                        text: group.category.title(),
                        checked: None,
                    });
                    for column in group.columns {
                        if column_idx == self.panel_cursor {
                            cursor = lines.len();
                        }
                        let label = if column.header.is_empty() {
                            column.accessor_key.clone()
                        } else {
                            column.header.clone()
                        };
                        lines.push(MenuLine {
                            text: label,
                            checked: Some(self.viewer.visibility().is_visible(column)),
                        });
                        column_idx += 1;
                    }
                }
                Some(Popup::Menu {
                    title: "Columns".to_string(),
                    lines,
                    cursor,
                    footer: "space toggle  a show all  n hide all  esc close".to_string(),
                })
            }
            Modus::TABLE | Modus::CMDINPUT => None,
        }
    }

    fn current_status_message(&self) -> String {
        if self.last_status_message_update.elapsed() > STATUS_MESSAGE_TIMEOUT {
            String::new()
        } else {
            self.status_message.clone()
        }
    }

    fn update_uidata(&mut self) {
        let mut tabs = vec!["Summary".to_string()];
        tabs.extend(self.viewer.partitions().iter().map(|p| p.name.clone()));
        let body = match self.viewer.view() {
            View::Summary => self.summary_body(),
            View::Detail => self.detail_body(),
        };
        self.uidata = UIData {
            tabs,
            selected_tab: self.selected_tab(),
            body,
            popup: self.popup(),
            row_info: self.row_info(),
            status_message: self.current_status_message(),
            cmdinput: self.last_input.clone(),
            active_cmdinput: self.active_cmdinput,
        };
    }
}
