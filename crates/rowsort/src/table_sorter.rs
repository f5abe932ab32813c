//! Builder-style entry point for sorting a row source.

use std::sync::Arc;

use rowsort_engine::comparator::{KeyComparator, RowComparator};
use rowsort_engine::memory::MemoryPressure;
use rowsort_engine::merge::SortedRows;
use rowsort_engine::monitor::{CancellationToken, ExecutionMonitor, ProgressSink};
use rowsort_engine::plan::SortPlan;
use rowsort_storage::container::ContainerFactory;
use rowsort_storage::scratch_container::ScratchContainerFactory;
use rowsort_storage::source::RowSource;
use rowsort_types::error::Result;
use rowsort_types::row::Schema;

use crate::external_sort::ExternalSorter;
use crate::table::SortedTable;

/// What to sort by.
#[derive(Clone)]
pub enum SortSpec {
    /// `(column name, ascending)` pairs in priority order. The name
    /// [`ROW_KEY_COLUMN`](rowsort_engine::comparator::ROW_KEY_COLUMN) sorts
    /// by row key.
    Keys(Vec<(String, bool)>),
    Custom(Arc<dyn RowComparator>),
}

impl SortSpec {
    pub fn keys<S: Into<String>>(keys: impl IntoIterator<Item = (S, bool)>) -> Self {
        SortSpec::Keys(keys.into_iter().map(|(n, asc)| (n.into(), asc)).collect())
    }

    /// Resolve into a comparator over rows of `schema`.
    pub fn comparator(&self, schema: &Schema, missing_last: bool) -> Result<Arc<dyn RowComparator>> {
        match self {
            SortSpec::Keys(keys) => {
                let names: Vec<&str> = keys.iter().map(|(n, _)| n.as_str()).collect();
                let ascending: Vec<bool> = keys.iter().map(|(_, a)| *a).collect();
                let cmp = KeyComparator::from_names(schema, &names, &ascending, missing_last)?;
                Ok(Arc::new(cmp))
            }
            SortSpec::Custom(cmp) => Ok(cmp.clone()),
        }
    }
}

impl std::fmt::Debug for SortSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortSpec::Keys(keys) => f.debug_tuple("Keys").field(keys).finish(),
            SortSpec::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Sorts one row source.
///
/// ```ignore
/// let mut sorter = TableSorter::new(&table, &["name", "age"], &[true, false])?;
/// sorter.set_max_open_containers(16)?;
/// let sorted = sorter.sort(&NoProgress, &CancellationToken::new())?;
/// ```
pub struct TableSorter<'a> {
    source: &'a dyn RowSource,
    spec: SortSpec,
    missing_last: bool,
    plan: SortPlan,
    factory: Option<Arc<dyn ContainerFactory>>,
    memory: Option<Box<dyn MemoryPressure>>,
}

impl<'a> TableSorter<'a> {
    /// Sort by named columns. Unknown or duplicate names and mismatched
    /// lengths fail here, before any row is read.
    pub fn new<S: AsRef<str>>(
        source: &'a dyn RowSource,
        names: &[S],
        ascending: &[bool],
    ) -> Result<Self> {
        KeyComparator::from_names(source.schema(), names, ascending, false)?;
        let keys = names
            .iter()
            .zip(ascending)
            .map(|(n, a)| (n.as_ref().to_string(), *a))
            .collect();
        Ok(Self::from_spec(source, SortSpec::Keys(keys)))
    }

    /// Sort with a caller-supplied order.
    pub fn with_comparator(source: &'a dyn RowSource, comparator: Arc<dyn RowComparator>) -> Self {
        Self::from_spec(source, SortSpec::Custom(comparator))
    }

    pub fn from_spec(source: &'a dyn RowSource, spec: SortSpec) -> Self {
        TableSorter {
            source,
            spec,
            missing_last: false,
            plan: SortPlan::default(),
            factory: None,
            memory: None,
        }
    }

    pub fn set_plan(&mut self, plan: SortPlan) {
        self.plan = plan;
    }

    /// Merge fan-in; must be greater than 2.
    pub fn set_max_open_containers(&mut self, k: usize) -> Result<()> {
        self.plan = self.plan.clone().with_max_open_containers(k)?;
        Ok(())
    }

    /// Read and sort everything in memory. Only sensible for small inputs.
    pub fn set_sort_in_memory(&mut self, in_memory: bool) {
        self.plan.sort_in_memory = in_memory;
    }

    /// Put missing cells after all values, whatever the direction.
    pub fn set_missing_last(&mut self, missing_last: bool) {
        self.missing_last = missing_last;
    }

    pub fn set_max_rows_per_chunk(&mut self, rows: usize) {
        self.plan.max_rows_per_chunk = rows;
    }

    pub fn set_memory_pressure(&mut self, memory: Box<dyn MemoryPressure>) {
        self.memory = Some(memory);
    }

    /// Where temporary and output containers go. Defaults to the global
    /// scratch store.
    pub fn set_container_factory(&mut self, factory: Arc<dyn ContainerFactory>) {
        self.factory = Some(factory);
    }

    pub fn sort(self, progress: &dyn ProgressSink, token: &CancellationToken) -> Result<SortedTable> {
        let source = self.source;
        let (mut sorter, comparator) = self.into_parts()?;
        let exec = ExecutionMonitor::new(progress, token.clone());
        let chunk = sorter.sort(source, comparator, &exec)?;
        Ok(SortedTable::new(source.schema().clone(), chunk))
    }

    /// Sort, streaming the last merge pass instead of writing it out.
    pub fn sorted_rows(
        self,
        progress: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> Result<SortedRows> {
        let source = self.source;
        let (mut sorter, comparator) = self.into_parts()?;
        let exec = ExecutionMonitor::new(progress, token.clone());
        sorter.sorted_rows(source, comparator, &exec)
    }

    fn into_parts(self) -> Result<(ExternalSorter, Arc<dyn RowComparator>)> {
        self.plan.validate()?;
        let comparator = self.spec.comparator(self.source.schema(), self.missing_last)?;
        let factory: Arc<dyn ContainerFactory> = match self.factory {
            Some(f) => f,
            None => Arc::new(ScratchContainerFactory::global()?),
        };
        let mut sorter = ExternalSorter::new(self.plan, factory)?;
        if let Some(memory) = self.memory {
            sorter = sorter.with_memory_pressure(memory);
        }
        Ok((sorter, comparator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;
    use rowsort_engine::memory::NoPressure;
    use rowsort_engine::monitor::NoProgress;
    use rowsort_storage::memory_container::InMemoryContainerFactory;
    use rowsort_types::cell::{Cell, CellType};
    use rowsort_types::error::SortError;
    use rowsort_types::row::{ColumnSpec, Row};
    use std::cmp::Ordering;

    fn people() -> Table {
        let schema = Schema::new(vec![
            ColumnSpec::new("name", CellType::String),
            ColumnSpec::new("age", CellType::Integer),
        ])
        .unwrap();
        Table::from_values(
            schema,
            vec![
                vec![Cell::from("bob"), Cell::Integer(30)],
                vec![Cell::from("amy"), Cell::Missing],
                vec![Cell::from("cid"), Cell::Integer(25)],
                vec![Cell::from("dan"), Cell::Integer(30)],
            ],
        )
    }

    fn names(sorted: SortedTable) -> Vec<String> {
        sorted
            .into_rows()
            .unwrap()
            .iter()
            .map(|r| r.cells()[0].to_string())
            .collect()
    }

    fn configured(sorter: &mut TableSorter<'_>) {
        sorter.set_container_factory(Arc::new(InMemoryContainerFactory::new()));
        sorter.set_memory_pressure(Box::new(NoPressure));
    }

    #[test]
    fn test_sort_by_names() {
        let table = people();
        let mut sorter = TableSorter::new(&table, &["age", "name"], &[false, true]).unwrap();
        configured(&mut sorter);
        let sorted = sorter.sort(&NoProgress, &CancellationToken::new()).unwrap();
        assert_eq!(names(sorted), vec!["bob", "dan", "cid", "amy"]);
    }

    #[test]
    fn test_missing_last() {
        let table = people();
        let mut sorter = TableSorter::new(&table, &["age"], &[true]).unwrap();
        configured(&mut sorter);
        sorter.set_missing_last(true);
        let sorted = sorter.sort(&NoProgress, &CancellationToken::new()).unwrap();
        assert_eq!(names(sorted), vec!["cid", "bob", "dan", "amy"]);
    }

    #[test]
    fn test_configuration_errors() {
        let table = people();
        assert!(matches!(
            TableSorter::new(&table, &["height"], &[true]),
            Err(SortError::Config(_))
        ));
        assert!(matches!(
            TableSorter::new(&table, &["age", "age"], &[true, true]),
            Err(SortError::Config(_))
        ));
        assert!(matches!(
            TableSorter::new(&table, &["age"], &[true, false]),
            Err(SortError::Config(_))
        ));
        let mut sorter = TableSorter::new(&table, &["age"], &[true]).unwrap();
        assert!(matches!(sorter.set_max_open_containers(2), Err(SortError::Config(_))));
    }

    #[test]
    fn test_custom_comparator_by_row_key() {
        let table = people();
        let cmp: Arc<dyn RowComparator> = Arc::new(|a: &Row, b: &Row| -> Result<Ordering> {
            Ok(b.key().cmp(a.key()))
        });
        let mut sorter = TableSorter::with_comparator(&table, cmp);
        configured(&mut sorter);
        let sorted = sorter.sort(&NoProgress, &CancellationToken::new()).unwrap();
        assert_eq!(names(sorted), vec!["dan", "cid", "amy", "bob"]);
    }
}
