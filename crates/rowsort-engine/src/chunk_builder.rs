//! First phase of the external sort: cut the input into sorted chunks.
//!
//! Rows are buffered until memory runs low or the buffer reaches the
//! configured row cap. The buffer is then sorted and written to a
//! container. Low memory only spills a buffer holding at least
//! `min_spill_rows` rows, so sustained pressure cannot degrade into
//! one-row chunks. Whatever is buffered when the input ends stays in
//! memory as the last chunk.

use std::collections::VecDeque;

use rowsort_storage::container::ContainerFactory;
use rowsort_storage::source::RowIter;
use rowsort_types::error::Result;
use rowsort_types::row::{Row, Schema};

use crate::chunk::Chunk;
use crate::comparator::{sort_rows, RowComparator};
use crate::memory::MemoryPressure;
use crate::monitor::ExecutionMonitor;

/// Output of the chunking phase, chunks in input order.
#[derive(Debug)]
pub struct ChunkSet {
    pub chunks: VecDeque<Chunk>,
    pub rows_read: u64,
}

pub struct ChunkBuilder<'a> {
    schema: &'a Schema,
    comparator: &'a dyn RowComparator,
    factory: &'a dyn ContainerFactory,
    memory: &'a mut dyn MemoryPressure,
    max_rows_per_chunk: usize,
    min_spill_rows: usize,
}

impl<'a> ChunkBuilder<'a> {
    pub fn new(
        schema: &'a Schema,
        comparator: &'a dyn RowComparator,
        factory: &'a dyn ContainerFactory,
        memory: &'a mut dyn MemoryPressure,
        max_rows_per_chunk: usize,
    ) -> Self {
        ChunkBuilder {
            schema,
            comparator,
            factory,
            memory,
            max_rows_per_chunk: max_rows_per_chunk.max(1),
            min_spill_rows: rowsort_config::get_max_open_containers().max(1),
        }
    }

    /// Smallest buffer that low memory alone may spill. Defaults to the
    /// configured merge fan-in; the row cap is not affected.
    pub fn with_min_spill_rows(mut self, rows: usize) -> Self {
        self.min_spill_rows = rows.max(1);
        self
    }

    /// Read all of `rows` into sorted chunks. `total` is the expected row
    /// count, used only for progress.
    ///
    /// On error, chunks written so far are dropped and their containers
    /// released.
    pub fn build(
        &mut self,
        rows: RowIter<'_>,
        total: Option<u64>,
        exec: &ExecutionMonitor,
    ) -> Result<ChunkSet> {
        let mut rows = rows.peekable();
        let mut chunks = VecDeque::new();
        let mut buffer: Vec<Row> = Vec::new();
        let mut rows_read: u64 = 0;

        while let Some(row) = rows.next() {
            exec.check_canceled()?;
            buffer.push(row?);
            rows_read += 1;
            exec.set_row_progress("Reading data", rows_read, total);

            let low = self.memory.is_memory_low(exec.token())?
                && buffer.len() >= self.min_spill_rows;
            let full = buffer.len() >= self.max_rows_per_chunk;
            // a buffer holding the final rows is kept in memory instead
            if (low || full) && rows.peek().is_some() {
                tracing::debug!(
                    chunk = chunks.len(),
                    rows = buffer.len(),
                    memory_low = low,
                    usage = %self.memory.describe(),
                    "spilling sorted chunk"
                );
                let sorted = sort_rows(std::mem::take(&mut buffer), self.comparator)?;
                chunks.push_back(self.write_chunk(sorted, exec)?);
                self.memory.on_spill();
            }
        }

        if !buffer.is_empty() {
            let sorted = sort_rows(buffer, self.comparator)?;
            chunks.push_back(Chunk::InMemory(sorted));
        }
        tracing::debug!(chunks = chunks.len(), rows_read, "chunking finished");
        Ok(ChunkSet { chunks, rows_read })
    }

    fn write_chunk(&self, rows: Vec<Row>, exec: &ExecutionMonitor) -> Result<Chunk> {
        exec.set_message("Writing temporary table");
        let mut writer = self.factory.create_container(self.schema, true)?;
        for row in rows {
            exec.check_canceled()?;
            writer.add_row(row)?;
        }
        Ok(Chunk::Stored(writer.close()?))
    }
}
