//! K-way merging of sorted chunks.
//!
//! [`KWayMerge`] merges up to `k` chunks with a manual min-heap whose
//! comparator may fail. Ties between equal rows are broken by chunk index,
//! so rows from earlier chunks come first and the merge is stable.
//!
//! [`MergePhase`] reduces an arbitrary number of chunks level by level:
//! each level cuts the pending list into consecutive groups of `k` and
//! merges every group into one chunk. A lone leftover chunk moves to the
//! next level unread. Levels repeat until one chunk remains (or, when the
//! result is streamed, until at most `k` remain).

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use rowsort_storage::container::ContainerFactory;
use rowsort_types::error::{Result, SortError};
use rowsort_types::row::{Row, Schema};

use crate::chunk::{Chunk, ChunkReader};
use crate::comparator::RowComparator;
use crate::monitor::ExecutionMonitor;

/// Heap entry: the current head row of one chunk.
struct HeapEntry {
    row: Row,
    chunk_idx: usize,
}

/// Streaming merge of sorted chunks into one sorted sequence.
pub struct KWayMerge {
    heap: Vec<HeapEntry>,
    readers: Vec<ChunkReader>,
    comparator: Arc<dyn RowComparator>,
}

/// Fully merged output, streamed row by row.
pub type SortedRows = KWayMerge;

impl KWayMerge {
    /// Open every chunk and seed the heap with its first row.
    pub fn new(chunks: Vec<Chunk>, comparator: Arc<dyn RowComparator>) -> Result<Self> {
        let mut readers = Vec::with_capacity(chunks.len());
        let mut heap = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let mut reader = chunk.into_reader()?;
            if let Some(row) = reader.next() {
                heap.push(HeapEntry {
                    row: row?,
                    chunk_idx: idx,
                });
            }
            readers.push(reader);
        }

        let mut me = KWayMerge {
            heap,
            readers,
            comparator,
        };
        if me.heap.len() > 1 {
            let last_internal = me.heap.len() / 2 - 1;
            for i in (0..=last_internal).rev() {
                me.sift_down(i)?;
            }
        }
        Ok(me)
    }

    /// Number of merged inputs.
    pub fn fan_in(&self) -> usize {
        self.readers.len()
    }

    fn heap_less(&self, i: usize, j: usize) -> Result<bool> {
        let (a, b) = (&self.heap[i], &self.heap[j]);
        Ok(match self.comparator.compare(&a.row, &b.row)? {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => a.chunk_idx < b.chunk_idx,
        })
    }

    fn sift_down(&mut self, mut pos: usize) -> Result<()> {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.heap_less(right, left)? {
                smallest = right;
            }
            if !self.heap_less(smallest, pos)? {
                break;
            }
            self.heap.swap(pos, smallest);
            pos = smallest;
        }
        Ok(())
    }

    /// Smallest remaining row, or `None` when all chunks are drained.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.heap.is_empty() {
            return Ok(None);
        }
        let idx = self.heap[0].chunk_idx;
        let row = match self.readers[idx].next() {
            Some(next) => std::mem::replace(&mut self.heap[0].row, next?),
            None => {
                let last = self.heap.len() - 1;
                self.heap.swap(0, last);
                let entry = self.heap.pop();
                match entry {
                    Some(entry) => entry.row,
                    None => return Ok(None),
                }
            }
        };
        if self.heap.len() > 1 {
            self.sift_down(0)?;
        }
        Ok(Some(row))
    }
}

impl Iterator for KWayMerge {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                // drop everything so a failed merge releases its containers
                self.heap.clear();
                self.readers.clear();
                Some(Err(e))
            }
        }
    }
}

/// Number of merge levels needed to bring `num_chunks` down to one chunk
/// (`merge_completely`) or to at most `k` chunks. `k` must be at least 2.
pub fn num_levels(num_chunks: usize, k: usize, merge_completely: bool) -> u32 {
    debug_assert!(k >= 2, "merge fan-in must be at least 2, got {}", k);
    // a fan-in below 2 would never shrink the chunk list
    let k = k.max(2);
    let target = if merge_completely { 1 } else { k };
    let mut n = num_chunks;
    let mut levels = 0;
    while n > target {
        n = n.div_ceil(k);
        levels += 1;
    }
    levels
}

/// Second phase of the external sort.
pub struct MergePhase<'a> {
    schema: &'a Schema,
    comparator: Arc<dyn RowComparator>,
    factory: &'a dyn ContainerFactory,
    max_open_containers: usize,
    chunks: VecDeque<Chunk>,
    num_rows: u64,
}

impl<'a> MergePhase<'a> {
    pub fn new(
        schema: &'a Schema,
        comparator: Arc<dyn RowComparator>,
        factory: &'a dyn ContainerFactory,
        max_open_containers: usize,
        chunks: VecDeque<Chunk>,
    ) -> Result<Self> {
        if max_open_containers < 2 {
            return Err(SortError::Config(format!(
                "Merge fan-in must be at least 2, got {}",
                max_open_containers
            )));
        }
        let num_rows = chunks.iter().map(Chunk::num_rows).sum();
        Ok(MergePhase {
            schema,
            comparator,
            factory,
            max_open_containers,
            chunks,
            num_rows,
        })
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Levels still to run for the pending chunks.
    pub fn num_levels(&self, merge_completely: bool) -> u32 {
        num_levels(self.chunks.len(), self.max_open_containers, merge_completely)
    }

    /// Merge everything into a single chunk. The last pass writes a
    /// container without the force-disk hint since it is the final output.
    /// A single pending chunk is returned as is; no chunks yield an empty
    /// in-memory chunk.
    pub fn merge_into_chunk(mut self, exec: &ExecutionMonitor) -> Result<Chunk> {
        let total_levels = self.num_levels(true);
        tracing::debug!(
            chunks = self.chunks.len(),
            rows = self.num_rows,
            levels = total_levels,
            k = self.max_open_containers,
            "merging chunks"
        );
        if self.chunks.len() <= 1 {
            exec.set_progress(1.0);
            return Ok(self.chunks.pop_front().unwrap_or(Chunk::InMemory(Vec::new())));
        }

        let share = 1.0 / total_levels as f64;
        let intermediate = self.num_levels(false);
        for level in 0..intermediate {
            let sub = exec.sub_progress(share);
            let label = format!("Merging level {}/{}", level + 1, total_levels);
            self.merge_level(&label, &sub)?;
        }

        let sub = exec.sub_progress(share);
        let group: Vec<Chunk> = self.chunks.drain(..).collect();
        let mut processed = 0;
        let result = self.merge_group(group, false, "Writing output table", &sub, &mut processed)?;
        exec.set_progress(1.0);
        Ok(result)
    }

    /// Merge until at most `k` chunks remain and stream the final pass.
    pub fn merge_into_iter(mut self, exec: &ExecutionMonitor) -> Result<SortedRows> {
        let intermediate = self.num_levels(false);
        let share = 1.0 / (intermediate as f64 + 1.0);
        for level in 0..intermediate {
            let sub = exec.sub_progress(share);
            let label = format!("Merging level {}/{}", level + 1, intermediate + 1);
            self.merge_level(&label, &sub)?;
        }
        exec.set_progress(1.0);
        let chunks: Vec<Chunk> = self.chunks.drain(..).collect();
        KWayMerge::new(chunks, self.comparator.clone())
    }

    /// One level: merge consecutive groups of `k` chunks.
    fn merge_level(&mut self, label: &str, exec: &ExecutionMonitor) -> Result<()> {
        let mut next = VecDeque::with_capacity(self.chunks.len().div_ceil(self.max_open_containers));
        let mut processed = 0;
        while self.chunks.len() > 1 {
            let k = self.max_open_containers.min(self.chunks.len());
            let group: Vec<Chunk> = self.chunks.drain(..k).collect();
            next.push_back(self.merge_group(group, true, label, exec, &mut processed)?);
        }
        next.extend(self.chunks.drain(..));
        tracing::debug!(level = label, chunks = next.len(), "merge level finished");
        self.chunks = next;
        Ok(())
    }

    /// Merge `group` into a new container. Cancellation is checked after
    /// every emitted row.
    fn merge_group(
        &self,
        group: Vec<Chunk>,
        force_disk: bool,
        label: &str,
        exec: &ExecutionMonitor,
        processed: &mut u64,
    ) -> Result<Chunk> {
        let mut merge = KWayMerge::new(group, self.comparator.clone())?;
        let mut writer = self.factory.create_container(self.schema, force_disk)?;
        while let Some(row) = merge.next_row()? {
            writer.add_row(row)?;
            *processed += 1;
            exec.set_row_progress(label, *processed, Some(self.num_rows));
            exec.check_canceled()?;
        }
        Ok(Chunk::Stored(writer.close()?))
    }
}
