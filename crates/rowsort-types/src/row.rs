//! Rows and table schemas.

use std::sync::Arc;

use crate::cell::{Cell, CellType};
use crate::error::{Result, SortError};

/// Unique identifier of a row within its table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(Arc<str>);

impl RowKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        RowKey(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowKey {
    fn from(key: &str) -> Self {
        RowKey::new(key)
    }
}

/// An immutable record: a key plus one cell per column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    key: RowKey,
    cells: Box<[Cell]>,
}

impl Row {
    pub fn new(key: impl Into<RowKey>, cells: Vec<Cell>) -> Self {
        Row {
            key: key.into(),
            cells: cells.into_boxed_slice(),
        }
    }

    pub fn key(&self) -> &RowKey {
        &self.key
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Cell at `index`, or `None` if the row is shorter than that.
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }
}

/// Name and declared type of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: CellType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, dtype: CellType) -> Self {
        ColumnSpec {
            name: name.into(),
            dtype,
        }
    }
}

/// Ordered column descriptors of a table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    columns: Vec<ColumnSpec>,
}

impl Schema {
    /// Build a schema, rejecting duplicate column names.
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(SortError::Format(format!(
                    "Duplicate column name '{}'",
                    col.name
                )));
            }
        }
        Ok(Schema { columns })
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}
