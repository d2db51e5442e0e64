//! Maps a scroll position over a fixed-height row list to the rows that
//! have to be materialized.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowOffset {
    pub index: usize,
    pub top: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualWindow {
    pub first_index: usize,
    pub last_index: usize,
    pub offsets: Vec<RowOffset>,
    pub total_height: f64,
}

impl VirtualWindow {
    fn empty(total_height: f64) -> Self {
        VirtualWindow {
            first_index: 0,
            last_index: 0,
            offsets: Vec::new(),
            total_height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

pub fn compute_window(
    row_count: usize,
    row_height: f64,
    scroll_top: f64,
    viewport_height: f64,
    overscan: usize,
) -> VirtualWindow {
    let row_height = sanitize(row_height);
    let total_height = row_count as f64 * row_height;
    if row_count == 0 || row_height == 0.0 {
        return VirtualWindow::empty(total_height);
    }

    let viewport = sanitize(viewport_height);
    let max_scroll = (total_height - viewport).max(0.0);
    let scroll = sanitize(scroll_top).min(max_scroll);
    let last_row = row_count - 1;

    let first_visible = ((scroll / row_height).floor() as usize).min(last_row);
    let last_visible = if viewport == 0.0 {
        first_visible
    } else {
        (((scroll + viewport) / row_height).ceil() as usize)
            .saturating_sub(1)
            .clamp(first_visible, last_row)
    };

    let first_index = first_visible.saturating_sub(overscan);
    let last_index = last_visible.saturating_add(overscan).min(last_row);
    let offsets = (first_index..=last_index)
        .map(|index| RowOffset {
            index,
            top: index as f64 * row_height,
        })
        .collect();

    VirtualWindow {
        first_index,
        last_index,
        offsets,
        total_height,
    }
}

/// Scroll position that brings `index` fully into the viewport with minimal movement.
pub fn scroll_to_reveal(
    index: usize,
    row_height: f64,
    scroll_top: f64,
    viewport_height: f64,
) -> f64 {
    let row_height = sanitize(row_height);
    let scroll = sanitize(scroll_top);
    let viewport = sanitize(viewport_height);
    let top = index as f64 * row_height;
    let bottom = top + row_height;
    if top < scroll {
        top
    } else if bottom > scroll + viewport {
        (bottom - viewport).max(0.0)
    } else {
        scroll
    }
}
