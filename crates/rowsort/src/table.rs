//! In-memory tables and sort results.

use rowsort_engine::chunk::Chunk;
use rowsort_storage::source::{RowIter, RowSource};
use rowsort_types::cell::Cell;
use rowsort_types::error::Result;
use rowsort_types::row::{Row, Schema};

/// Rows held in memory, usable as a sort input.
///
/// Rows are not validated against the schema.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Schema,
    rows: Vec<Row>,
    report_row_count: bool,
}

impl Table {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        Table {
            schema,
            rows,
            report_row_count: true,
        }
    }

    /// Build a table from cell values, keying rows `Row0`, `Row1`, ...
    pub fn from_values(schema: Schema, values: Vec<Vec<Cell>>) -> Self {
        let rows = values
            .into_iter()
            .enumerate()
            .map(|(i, cells)| Row::new(format!("Row{}", i).as_str(), cells))
            .collect();
        Self::new(schema, rows)
    }

    /// Hide the row count from sorters, as a streaming source would.
    pub fn without_row_count(mut self) -> Self {
        self.report_row_count = false;
        self
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}

impl RowSource for Table {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn row_count(&self) -> Option<u64> {
        self.report_row_count.then_some(self.rows.len() as u64)
    }

    fn rows(&self) -> Result<RowIter<'_>> {
        Ok(Box::new(self.rows.iter().cloned().map(Ok)))
    }
}

/// Output of a sort: one sorted chunk, in memory or in a container.
///
/// The backing container is released when the table is dropped.
#[derive(Debug)]
pub struct SortedTable {
    schema: Schema,
    chunk: Chunk,
}

impl SortedTable {
    pub fn new(schema: Schema, chunk: Chunk) -> Self {
        SortedTable { schema, chunk }
    }

    pub fn num_rows(&self) -> u64 {
        self.chunk.num_rows()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// True when the result never left memory.
    pub fn is_in_memory(&self) -> bool {
        self.chunk.is_in_memory()
    }

    /// Iterate the sorted rows; may be called repeatedly.
    pub fn iter_rows(&self) -> Result<RowIter<'_>> {
        self.chunk.iter_rows()
    }

    pub fn into_rows(self) -> Result<Vec<Row>> {
        match self.chunk {
            Chunk::InMemory(rows) => Ok(rows),
            stored => stored.into_reader()?.collect(),
        }
    }

    pub fn into_chunk(self) -> Chunk {
        self.chunk
    }
}

impl RowSource for SortedTable {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn row_count(&self) -> Option<u64> {
        Some(self.num_rows())
    }

    fn rows(&self) -> Result<RowIter<'_>> {
        self.iter_rows()
    }
}
