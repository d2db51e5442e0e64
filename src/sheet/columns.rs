use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Category a column is grouped under in the column panel.
/// Known categories have a fixed display order, unknown ones follow them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnCategory {
    Label,
    Personal,
    Contact,
    Allocation,
    Hostel,
    Total,
    #[default]
    Other,
    Unknown(String),
}

impl ColumnCategory {
    fn rank(&self) -> u8 {
        match self {
            ColumnCategory::Label => 0,
            ColumnCategory::Personal => 1,
            ColumnCategory::Contact => 2,
            ColumnCategory::Allocation => 3,
            ColumnCategory::Hostel => 4,
            ColumnCategory::Total => 5,
            ColumnCategory::Other => 6,
            ColumnCategory::Unknown(_) => 7,
        }
    }

    pub fn title(&self) -> String {
        match self {
            ColumnCategory::Label => "Label".to_string(),
            ColumnCategory::Personal => "Personal".to_string(),
            ColumnCategory::Contact => "Contact".to_string(),
            ColumnCategory::Allocation => "Allocation".to_string(),
            ColumnCategory::Hostel => "Hostel".to_string(),
            ColumnCategory::Total => "Total".to_string(),
            ColumnCategory::Other => "Other".to_string(),
            ColumnCategory::Unknown(name) => name.clone(),
        }
    }
}

impl Ord for ColumnCategory {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ColumnCategory::Unknown(a), ColumnCategory::Unknown(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for ColumnCategory {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<String> for ColumnCategory {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "label" => ColumnCategory::Label,
            "personal" => ColumnCategory::Personal,
            "contact" => ColumnCategory::Contact,
            "allocation" => ColumnCategory::Allocation,
            "hostel" => ColumnCategory::Hostel,
            "total" => ColumnCategory::Total,
            "other" | "" => ColumnCategory::Other,
            _ => ColumnCategory::Unknown(s),
        }
    }
}

impl From<ColumnCategory> for String {
    fn from(c: ColumnCategory) -> Self {
        match c {
            ColumnCategory::Unknown(name) => name,
            known => known.title().to_ascii_lowercase(),
        }
    }
}

/// Width class used to pick the clamp range for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnSize {
    Compact,
    #[default]
    Regular,
    Wide,
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub accessor_key: String,
    pub header: String,
    #[serde(default)]
    pub category: ColumnCategory,
    #[serde(default)]
    pub hidden_by_default: bool,
    #[serde(default)]
    pub size: ColumnSize,
}

impl ColumnDescriptor {
    pub fn new(accessor_key: impl Into<String>, header: impl Into<String>) -> Self {
        ColumnDescriptor {
            accessor_key: accessor_key.into(),
            header: header.into(),
            category: ColumnCategory::Other,
            hidden_by_default: false,
            size: ColumnSize::Regular,
        }
    }

    pub fn with_category(mut self, category: ColumnCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_size(mut self, size: ColumnSize) -> Self {
        self.size = size;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden_by_default = true;
        self
    }
}

/// Per-column visibility overrides. A column without an entry falls back to
/// its declared default, so a fresh state is exactly the partition defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityState {
    overrides: HashMap<String, bool>,
}

impl VisibilityState {
    pub fn is_visible(&self, column: &ColumnDescriptor) -> bool {
        self.overrides
            .get(&column.accessor_key)
            .copied()
            .unwrap_or(!column.hidden_by_default)
    }

    pub fn toggle(mut self, column: &ColumnDescriptor) -> Self {
        let visible = self.is_visible(column);
        self.overrides.insert(column.accessor_key.clone(), !visible);
        self
    }

    pub fn show_all(columns: &[ColumnDescriptor]) -> Self {
        Self::all(columns, true)
    }

    pub fn hide_all(columns: &[ColumnDescriptor]) -> Self {
        Self::all(columns, false)
    }

    fn all(columns: &[ColumnDescriptor], visible: bool) -> Self {
        VisibilityState {
            overrides: columns
                .iter()
                .map(|c| (c.accessor_key.clone(), visible))
                .collect(),
        }
    }
}

/// Visible columns in descriptor order.
pub fn visible_columns<'a>(
    columns: &'a [ColumnDescriptor],
    visibility: &VisibilityState,
) -> Vec<&'a ColumnDescriptor> {
    columns
        .iter()
        .filter(|c| visibility.is_visible(c))
        .collect()
}

pub struct CategoryGroup<'a> {
    pub category: ColumnCategory,
    pub columns: Vec<&'a ColumnDescriptor>,
}

/// Groups columns for the column panel. Groups follow the category order,
/// columns inside a group keep descriptor order.
pub fn group_by_category(columns: &[ColumnDescriptor]) -> Vec<CategoryGroup<'_>> {
    let mut groups: Vec<CategoryGroup> = Vec::new();
    for column in columns {
        match groups.iter_mut().find(|g| g.category == column.category) {
            Some(group) => group.columns.push(column),
            None => groups.push(CategoryGroup {
                category: column.category.clone(),
                columns: vec![column],
            }),
        }
    }
    groups.sort_by(|a, b| a.category.cmp(&b.category));
    groups
}
