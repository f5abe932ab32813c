//! Disk-backed merge sort for row tables larger than memory.
//!
//! ```ignore
//! let sorted = rowsort::sort(&table, SortSpec::keys([("age", false)]), SortPlan::default())?;
//! for row in sorted.iter_rows()? {
//!     println!("{}", row?.key());
//! }
//! ```
//!
//! Rows are cut into sorted chunks as memory fills up, spilled to scratch
//! containers, and merged with a bounded fan-in. The result is stable:
//! rows that compare equal keep their input order.

pub mod external_sort;
pub mod table;
pub mod table_sorter;

use std::sync::Arc;

pub use rowsort_engine::chunk::Chunk;
pub use rowsort_engine::comparator::{
    compare_cells, KeyComparator, RowComparator, SortColumn, SortKey, SortOrder, ROW_KEY_COLUMN,
};
pub use rowsort_engine::memory::{
    ManualPressure, MemoryPressure, NoPressure, RowCountPressure, SystemMemoryMonitor,
};
pub use rowsort_engine::merge::SortedRows;
pub use rowsort_engine::monitor::{CancellationToken, NoProgress, ProgressSink};
pub use rowsort_engine::plan::SortPlan;
pub use rowsort_storage::container::{ContainerFactory, ContainerWriter, RowContainer};
pub use rowsort_storage::memory_container::InMemoryContainerFactory;
pub use rowsort_storage::scratch_container::ScratchContainerFactory;
pub use rowsort_storage::source::{RowIter, RowSource};
pub use rowsort_types::cell::{Cell, CellType, DateTime};
pub use rowsort_types::error::{Result, SortError};
pub use rowsort_types::row::{ColumnSpec, Row, RowKey, Schema};

pub use external_sort::ExternalSorter;
pub use table::{SortedTable, Table};
pub use table_sorter::{SortSpec, TableSorter};

/// Sort `source` with the global scratch store, no progress reporting and
/// no cancellation.
pub fn sort(source: &dyn RowSource, spec: SortSpec, plan: SortPlan) -> Result<SortedTable> {
    // configuration errors surface before the scratch store is touched
    plan.validate()?;
    spec.comparator(source.schema(), false)?;
    let factory = Arc::new(ScratchContainerFactory::global()?);
    sort_with(source, spec, plan, factory, &NoProgress, &CancellationToken::new())
}

/// [`sort`] with an explicit container factory, progress sink and
/// cancellation token.
pub fn sort_with(
    source: &dyn RowSource,
    spec: SortSpec,
    plan: SortPlan,
    factory: Arc<dyn ContainerFactory>,
    progress: &dyn ProgressSink,
    token: &CancellationToken,
) -> Result<SortedTable> {
    let mut sorter = TableSorter::from_spec(source, spec);
    sorter.set_plan(plan);
    sorter.set_container_factory(factory);
    sorter.sort(progress, token)
}
