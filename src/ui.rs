use ratatui::{
    Frame,
    layout::{Constraint, Flex, Layout, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{
        Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Scrollbar,
        ScrollbarOrientation, ScrollbarState, Table, TableState, Tabs, Wrap,
    },
};

use crate::model::{Body, ColumnView, MenuLine, Model, Popup, UIData};

pub const TABS_HEIGHT: usize = 1;
pub const TABLE_HEADER_HEIGHT: usize = 1;
pub const CMDLINE_HEIGHT: usize = 1;
pub const SCROLLBAR_WIDTH: usize = 1;

const SEARCH_PROMPT: &str = "/";

#[derive(Default)]
pub struct TableUI {
    table_state: TableState,
    list_state: ListState,
}

impl TableUI {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draw(&mut self, model: &Model, frame: &mut Frame) {
        let uidata = model.get_uidata();
        let [tabs_area, table_area, status_area] = Layout::vertical([
            Constraint::Length(TABS_HEIGHT as u16),
            Constraint::Min(1),
            Constraint::Length(CMDLINE_HEIGHT as u16),
        ])
        .areas(frame.area());

        self.render_tabs(uidata, frame, tabs_area);
        match &uidata.body {
            Body::Notice { title, text } => self.render_notice(title, text, frame, table_area),
            Body::Table {
                columns,
                selected_row,
                selected_column,
                emphasized_row,
                position,
                content_length,
            } => {
                let [grid_area, scrollbar_area] = Layout::horizontal([
                    Constraint::Min(1),
                    Constraint::Length(SCROLLBAR_WIDTH as u16),
                ])
                .areas(table_area);
                self.render_table(
                    columns,
                    *selected_row,
                    *selected_column,
                    *emphasized_row,
                    frame,
                    grid_area,
                );
                let mut scrollbar_state = ScrollbarState::new(*content_length).position(*position);
                frame.render_stateful_widget(
                    Scrollbar::new(ScrollbarOrientation::VerticalRight),
                    scrollbar_area,
                    &mut scrollbar_state,
                );
            }
        }
        self.render_status(uidata, frame, status_area);

        match &uidata.popup {
            Some(Popup::Help(text)) => self.render_help(text, frame),
            Some(Popup::Menu {
                title,
                lines,
                cursor,
                footer,
            }) => self.render_menu(title, lines, *cursor, footer, frame),
            None => (),
        }
    }

    fn render_tabs(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let tabs = Tabs::new(uidata.tabs.iter().map(|t| Line::from(t.as_str())))
            .select(uidata.selected_tab)
            .style(Style::default().fg(Color::Gray))
            .highlight_style(Style::new().yellow().bold())
            .divider("|");
        frame.render_widget(tabs, area);
    }

    fn render_notice(&self, title: &str, text: &str, frame: &mut Frame, area: Rect) {
        let top_padding = area.height.saturating_sub(text.lines().count() as u16) / 2;
        let mut lines: Vec<Line> = vec![Line::default(); top_padding as usize];
        lines.extend(text.lines().map(|l| Line::from(l.to_string())));
        let block = Block::default()
            .borders(Borders::TOP)
            .title(title.to_string().bold());
        let paragraph = Paragraph::new(Text::from(lines))
            .centered()
            .wrap(Wrap { trim: true })
            .block(block);
        frame.render_widget(paragraph, area);
    }

    fn render_table(
        &mut self,
        columns: &[ColumnView],
        selected_row: Option<usize>,
        selected_column: usize,
        emphasized_row: Option<usize>,
        frame: &mut Frame,
        area: Rect,
    ) {
        let header = Row::new(columns.iter().map(|c| Cell::from(c.name.as_str())))
            .style(Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED));
        let nrows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        let rows = (0..nrows).map(|row_idx| {
            let row = Row::new(columns.iter().map(|c| c.data[row_idx].as_str()));
            if emphasized_row == Some(row_idx) {
                row.style(Style::default().add_modifier(Modifier::BOLD))
            } else {
                row
            }
        });
        let widths = columns.iter().map(|c| Constraint::Length(c.width as u16));

        let table = Table::new(rows, widths)
            .header(header)
            .column_spacing(1)
            .row_highlight_style(Style::default().bg(Color::DarkGray))
            .cell_highlight_style(Style::default().fg(Color::Black).bg(Color::Yellow));

        self.table_state.select(selected_row);
        self.table_state.select_column(Some(selected_column));
        // Rows are already cut to the viewport.
        *self.table_state.offset_mut() = 0;
        frame.render_stateful_widget(table, area, &mut self.table_state);
    }

    fn render_status(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let [left, right] = Layout::horizontal([
            Constraint::Min(10),
            Constraint::Length(uidata.row_info.chars().count() as u16 + 1),
        ])
        .areas(area);

        if uidata.active_cmdinput {
            let input = &uidata.cmdinput;
            let line = Line::from(vec![
                Span::styled(SEARCH_PROMPT, Style::default().fg(Color::Yellow)),
                Span::raw(input.input.as_str()),
            ]);
            frame.render_widget(Paragraph::new(line), left);
            frame.set_cursor_position(Position::new(
                left.x + (SEARCH_PROMPT.len() + input.cursor_pos) as u16,
                left.y,
            ));
        } else {
            let status = Paragraph::new(uidata.status_message.as_str()).gray();
            frame.render_widget(status, left);
        }
        let row_info = Paragraph::new(uidata.row_info.as_str()).right_aligned();
        frame.render_widget(row_info, right);
    }

    fn render_help(&self, text: &str, frame: &mut Frame) {
        let width = text.lines().map(|l| l.chars().count()).max().unwrap_or(0) as u16 + 4;
        let height = text.lines().count() as u16 + 2;
        let area = centered_rect(frame.area(), width, height);
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Keys ")
            .style(Style::default().bg(Color::Black));
        frame.render_widget(Clear, area);
        frame.render_widget(Paragraph::new(text).block(block), area);
    }

    fn render_menu(
        &mut self,
        title: &str,
        lines: &[MenuLine],
        cursor: usize,
        footer: &str,
        frame: &mut Frame,
    ) {
        let widest_line = lines
            .iter()
            .map(|l| l.text.chars().count() + 4)
            .max()
            .unwrap_or(0);
        let width = widest_line
            .max(footer.chars().count())
            .max(title.chars().count());
        let max_height = frame.area().height.saturating_sub(6) as usize;
        let height = lines.len().min(max_height);
        let area = centered_rect(frame.area(), width as u16 + 4, height as u16 + 2);

        let items: Vec<ListItem> = lines
            .iter()
            .map(|line| match line.checked {
                Some(checked) => {
                    let mark = if checked { "[x] " } else { "[ ] " };
                    ListItem::new(format!("{mark}{}", line.text))
                }
                None => ListItem::new(Line::from(line.text.clone().bold().fg(Color::Cyan))),
            })
            .collect();
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(format!(" {title} "))
            .title_bottom(Line::from(format!(" {footer} ")).centered())
            .style(Style::default().bg(Color::Black));
        let list = List::new(items)
            .block(block)
            .highlight_style(Style::default().bg(Color::DarkGray));

        self.list_state.select(Some(cursor));
        frame.render_widget(Clear, area);
        frame.render_stateful_widget(list, area, &mut self.list_state);
    }
}

fn centered_rect(area: Rect, width: u16, height: u16) -> Rect {
    let [area] = Layout::horizontal([Constraint::Length(width.min(area.width))])
        .flex(Flex::Center)
        .areas(area);
    let [area] = Layout::vertical([Constraint::Length(height.min(area.height))])
        .flex(Flex::Center)
        .areas(area);
    area
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_rect_fits_inside() {
        let outer = Rect::new(0, 0, 80, 24);
        let inner = centered_rect(outer, 20, 10);
        assert_eq!((inner.width, inner.height), (20, 10));
        assert_eq!((inner.x, inner.y), (30, 7));

        let clipped = centered_rect(Rect::new(0, 0, 10, 5), 20, 10);
        assert_eq!((clipped.width, clipped.height), (10, 5));
    }
}
