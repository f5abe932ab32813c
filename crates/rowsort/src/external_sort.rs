//! Sort coordinator.
//!
//! Picks one of three strategies for an input:
//! 1. Fewer than two rows: return the input unchanged.
//! 2. Forced in-memory: read everything, sort once, write the result.
//! 3. Default: build sorted chunks under memory pressure, then k-way merge
//!    them level by level.
//!
//! Every temporary container is owned by a chunk, merge, or writer, so an
//! error or cancellation at any point drops and releases whatever was
//! created so far.

use std::sync::Arc;

use rowsort_engine::chunk::Chunk;
use rowsort_engine::chunk_builder::{ChunkBuilder, ChunkSet};
use rowsort_engine::comparator::{sort_rows, RowComparator};
use rowsort_engine::memory::{MemoryPressure, SystemMemoryMonitor};
use rowsort_engine::merge::{KWayMerge, MergePhase, SortedRows};
use rowsort_engine::monitor::ExecutionMonitor;
use rowsort_engine::plan::SortPlan;
use rowsort_storage::container::ContainerFactory;
use rowsort_storage::source::RowSource;
use rowsort_types::error::Result;
use rowsort_types::row::{Row, Schema};

/// Largest row count the forced in-memory path accepts.
const MAX_IN_MEMORY_ROWS: u64 = (isize::MAX as usize / std::mem::size_of::<Row>()) as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Unchanged,
    InMemory,
    Chunked,
}

/// Runs sorts with one plan, container factory, and memory monitor.
pub struct ExternalSorter {
    plan: SortPlan,
    factory: Arc<dyn ContainerFactory>,
    memory: Option<Box<dyn MemoryPressure>>,
}

impl ExternalSorter {
    /// Fails with a configuration error if `plan` is invalid.
    pub fn new(plan: SortPlan, factory: Arc<dyn ContainerFactory>) -> Result<Self> {
        plan.validate()?;
        Ok(ExternalSorter {
            plan,
            factory,
            memory: None,
        })
    }

    /// Replace the system memory monitor.
    pub fn with_memory_pressure(mut self, memory: Box<dyn MemoryPressure>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn plan(&self) -> &SortPlan {
        &self.plan
    }

    /// Sort `source` into a single chunk. Progress reaches 1.0 on success.
    pub fn sort(
        &mut self,
        source: &dyn RowSource,
        comparator: Arc<dyn RowComparator>,
        exec: &ExecutionMonitor,
    ) -> Result<Chunk> {
        exec.check_canceled()?;
        let row_count = self.expected_rows(source);
        let chunk = match self.strategy(source.row_count()) {
            Strategy::Unchanged => {
                tracing::info!(rows = ?row_count, "input trivially sorted");
                Chunk::InMemory(read_all(source, row_count, exec)?)
            }
            Strategy::InMemory => {
                let rows = read_and_sort(source, &*comparator, row_count, &exec.sub_progress(0.5))?;
                self.write_output(source.schema(), rows, &exec.sub_progress(0.5))?
            }
            Strategy::Chunked => {
                let set = self.build_chunks(source, &*comparator, row_count, &exec.sub_progress(0.5))?;
                let merge = self.merge_phase(source.schema(), comparator, set)?;
                merge.merge_into_chunk(&exec.sub_progress(0.5))?
            }
        };
        exec.set_progress(1.0);
        tracing::info!(rows = chunk.num_rows(), "sort finished");
        Ok(chunk)
    }

    /// Like [`sort`](Self::sort), but the final merge pass is streamed
    /// instead of written to a container.
    pub fn sorted_rows(
        &mut self,
        source: &dyn RowSource,
        comparator: Arc<dyn RowComparator>,
        exec: &ExecutionMonitor,
    ) -> Result<SortedRows> {
        exec.check_canceled()?;
        let row_count = self.expected_rows(source);
        let rows = match self.strategy(source.row_count()) {
            Strategy::Unchanged => {
                KWayMerge::new(vec![Chunk::InMemory(read_all(source, row_count, exec)?)], comparator)?
            }
            Strategy::InMemory => {
                let rows = read_and_sort(source, &*comparator, row_count, exec)?;
                KWayMerge::new(vec![Chunk::InMemory(rows)], comparator)?
            }
            Strategy::Chunked => {
                let set = self.build_chunks(source, &*comparator, row_count, &exec.sub_progress(0.5))?;
                let merge = self.merge_phase(source.schema(), comparator, set)?;
                merge.merge_into_iter(&exec.sub_progress(0.5))?
            }
        };
        exec.set_progress(1.0);
        Ok(rows)
    }

    /// Row total for progress messages. The plan's hint wins over the
    /// source's count.
    fn expected_rows(&self, source: &dyn RowSource) -> Option<u64> {
        self.plan.row_count.or_else(|| source.row_count())
    }

    /// `row_count` must come from the source itself: a short count skips
    /// sorting altogether.
    fn strategy(&self, row_count: Option<u64>) -> Strategy {
        match row_count {
            Some(n) if n < 2 => Strategy::Unchanged,
            Some(n) if self.plan.sort_in_memory && n > MAX_IN_MEMORY_ROWS => {
                tracing::warn!(
                    rows = n,
                    "too many rows to sort in memory, ignoring the in-memory request"
                );
                Strategy::Chunked
            }
            _ if self.plan.sort_in_memory => Strategy::InMemory,
            _ => Strategy::Chunked,
        }
    }

    fn build_chunks(
        &mut self,
        source: &dyn RowSource,
        comparator: &dyn RowComparator,
        row_count: Option<u64>,
        exec: &ExecutionMonitor,
    ) -> Result<ChunkSet> {
        tracing::info!(rows = ?row_count, "building sorted chunks");
        let threshold = self.plan.memory_threshold;
        let memory = self
            .memory
            .get_or_insert_with(|| Box::new(SystemMemoryMonitor::new(threshold)));
        let mut builder = ChunkBuilder::new(
            source.schema(),
            comparator,
            &*self.factory,
            memory.as_mut(),
            self.plan.max_rows_per_chunk,
        )
        .with_min_spill_rows(self.plan.max_open_containers);
        let set = builder.build(source.rows()?, row_count, exec)?;
        exec.set_progress(1.0);
        Ok(set)
    }

    fn merge_phase<'a>(
        &'a self,
        schema: &'a Schema,
        comparator: Arc<dyn RowComparator>,
        set: ChunkSet,
    ) -> Result<MergePhase<'a>> {
        tracing::info!(
            chunks = set.chunks.len(),
            rows = set.rows_read,
            k = self.plan.max_open_containers,
            "merging sorted chunks"
        );
        MergePhase::new(
            schema,
            comparator,
            &*self.factory,
            self.plan.max_open_containers,
            set.chunks,
        )
    }

    fn write_output(&self, schema: &Schema, rows: Vec<Row>, exec: &ExecutionMonitor) -> Result<Chunk> {
        let total = rows.len() as u64;
        let mut writer = self.factory.create_container(schema, false)?;
        for (i, row) in rows.into_iter().enumerate() {
            exec.check_canceled()?;
            writer.add_row(row)?;
            exec.set_row_progress("Writing output table", i as u64 + 1, Some(total));
        }
        Ok(Chunk::Stored(writer.close()?))
    }
}

fn read_all(source: &dyn RowSource, total: Option<u64>, exec: &ExecutionMonitor) -> Result<Vec<Row>> {
    let mut rows = Vec::with_capacity(total.unwrap_or(0).min(1 << 20) as usize);
    for row in source.rows()? {
        exec.check_canceled()?;
        rows.push(row?);
        exec.set_row_progress("Reading data", rows.len() as u64, total);
    }
    Ok(rows)
}

fn read_and_sort(
    source: &dyn RowSource,
    comparator: &dyn RowComparator,
    total: Option<u64>,
    exec: &ExecutionMonitor,
) -> Result<Vec<Row>> {
    tracing::info!(rows = ?total, "sorting in memory");
    let rows = read_all(source, total, exec)?;
    exec.set_message("Sorting in memory");
    let sorted = sort_rows(rows, comparator)?;
    exec.set_progress(1.0);
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;
    use rowsort_engine::comparator::{KeyComparator, SortKey};
    use rowsort_engine::memory::NoPressure;
    use rowsort_engine::monitor::{CancellationToken, NoProgress};
    use rowsort_storage::memory_container::InMemoryContainerFactory;
    use rowsort_types::cell::{Cell, CellType};
    use rowsort_types::error::SortError;
    use rowsort_types::row::ColumnSpec;

    fn table(values: &[i64]) -> Table {
        let schema = Schema::new(vec![ColumnSpec::new("v", CellType::Integer)]).unwrap();
        Table::from_values(schema, values.iter().map(|v| vec![Cell::Integer(*v)]).collect())
    }

    fn by_value() -> Arc<dyn RowComparator> {
        Arc::new(KeyComparator::new(vec![SortKey::asc(0)]).unwrap())
    }

    fn sorter(plan: SortPlan, factory: &InMemoryContainerFactory) -> ExternalSorter {
        ExternalSorter::new(plan, Arc::new(factory.clone()))
            .unwrap()
            .with_memory_pressure(Box::new(NoPressure))
    }

    fn values(chunk: &Chunk) -> Vec<i64> {
        chunk
            .iter_rows()
            .unwrap()
            .map(|r| match r.unwrap().cells()[0] {
                Cell::Integer(v) => v,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_strategy_selection() {
        let factory = InMemoryContainerFactory::new();
        let s = sorter(SortPlan::default(), &factory);
        assert_eq!(s.strategy(Some(0)), Strategy::Unchanged);
        assert_eq!(s.strategy(Some(1)), Strategy::Unchanged);
        assert_eq!(s.strategy(Some(2)), Strategy::Chunked);
        assert_eq!(s.strategy(None), Strategy::Chunked);

        let s = sorter(SortPlan::default().with_sort_in_memory(true), &factory);
        assert_eq!(s.strategy(Some(5)), Strategy::InMemory);
        assert_eq!(s.strategy(None), Strategy::InMemory);
        assert_eq!(s.strategy(Some(u64::MAX)), Strategy::Chunked);
    }

    #[test]
    fn test_invalid_plan_rejected() {
        let mut plan = SortPlan::default();
        plan.max_open_containers = 2;
        let factory = InMemoryContainerFactory::new();
        assert!(matches!(
            ExternalSorter::new(plan, Arc::new(factory)),
            Err(SortError::Config(_))
        ));
    }

    #[test]
    fn test_single_row_is_not_compared() {
        let factory = InMemoryContainerFactory::new();
        let mut s = sorter(SortPlan::default(), &factory);
        let failing: Arc<dyn RowComparator> = Arc::new(|_: &Row, _: &Row| {
            Err::<std::cmp::Ordering, _>(SortError::Compare("never".to_string()))
        });
        let exec = ExecutionMonitor::new(&NoProgress, CancellationToken::new());
        let chunk = s.sort(&table(&[7]), failing, &exec).unwrap();
        assert_eq!(values(&chunk), vec![7]);
        assert_eq!(factory.created_containers(), 0);
    }

    #[test]
    fn test_row_count_hint_does_not_skip_sorting() {
        let factory = InMemoryContainerFactory::new();
        for hint in [Some(0), Some(1), Some(100)] {
            let mut s = sorter(SortPlan::default().with_row_count(hint), &factory);
            let exec = ExecutionMonitor::new(&NoProgress, CancellationToken::new());
            let chunk = s.sort(&table(&[3, 1, 2]), by_value(), &exec).unwrap();
            assert_eq!(values(&chunk), vec![1, 2, 3], "hint={:?}", hint);

            let mut s = sorter(SortPlan::default().with_row_count(hint), &factory);
            let exec = ExecutionMonitor::new(&NoProgress, CancellationToken::new());
            let streamed: Vec<Row> = s
                .sorted_rows(&table(&[3, 1, 2]), by_value(), &exec)
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();
            assert_eq!(streamed.len(), 3);
            assert_eq!(streamed[0].cells()[0], Cell::Integer(1));
        }
    }

    #[test]
    fn test_in_memory_writes_output_container() {
        let factory = InMemoryContainerFactory::new();
        let mut s = sorter(SortPlan::default().with_sort_in_memory(true), &factory);
        let exec = ExecutionMonitor::new(&NoProgress, CancellationToken::new());
        let chunk = s.sort(&table(&[3, 1, 2]), by_value(), &exec).unwrap();
        assert_eq!(values(&chunk), vec![1, 2, 3]);
        assert_eq!(factory.created_containers(), 1);
        assert_eq!(factory.forced_disk_requests(), 0);
    }

    #[test]
    fn test_chunked_sort_spills_and_merges() {
        let factory = InMemoryContainerFactory::new();
        let plan = SortPlan::default()
            .with_max_rows_per_chunk(2)
            .with_max_open_containers(3)
            .unwrap();
        let mut s = sorter(plan, &factory);
        let exec = ExecutionMonitor::new(&NoProgress, CancellationToken::new());
        let input: Vec<i64> = (0..20).rev().collect();
        let chunk = s.sort(&table(&input), by_value(), &exec).unwrap();
        assert_eq!(values(&chunk), (0..20).collect::<Vec<_>>());
        assert!(factory.created_containers() > 10);
        assert_eq!(factory.live_containers(), 1);
    }
}
