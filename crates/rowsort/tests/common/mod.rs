#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rowsort::{
    CancellationToken, Cell, CellType, ColumnSpec, ContainerFactory, ContainerWriter,
    InMemoryContainerFactory, NoPressure, ProgressSink, Result, Row, Schema, SortedTable, Table,
    TableSorter,
};

/// Schema `(k: integer, tag: string)`.
pub fn schema() -> Schema {
    Schema::new(vec![
        ColumnSpec::new("k", CellType::Integer),
        ColumnSpec::new("tag", CellType::String),
    ])
    .unwrap()
}

/// One row per key; the tag records the input position.
pub fn table(keys: &[i64]) -> Table {
    let values = keys
        .iter()
        .enumerate()
        .map(|(i, k)| vec![Cell::Integer(*k), Cell::from(format!("t{}", i))])
        .collect();
    Table::from_values(schema(), values)
}

/// Deterministic pseudo-random keys in `0..modulus`.
pub fn random_keys(n: usize, modulus: i64, seed: u64) -> Vec<i64> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..n)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) % modulus as u64) as i64
        })
        .collect()
}

pub fn key_of(row: &Row) -> i64 {
    match row.cells()[0] {
        Cell::Integer(v) => v,
        ref other => panic!("unexpected key cell {:?}", other),
    }
}

pub fn tag_of(row: &Row) -> String {
    row.cells()[1].to_string()
}

pub fn keys(rows: &[Row]) -> Vec<i64> {
    rows.iter().map(key_of).collect()
}

pub fn rows_of(sorted: SortedTable) -> Vec<Row> {
    sorted.into_rows().unwrap()
}

/// Sorter on `k` ascending, backed by `factory`, never under memory pressure.
pub fn sorter<'a>(source: &'a Table, factory: &InMemoryContainerFactory) -> TableSorter<'a> {
    let mut sorter = TableSorter::new(source, &["k"], &[true]).unwrap();
    sorter.set_container_factory(Arc::new(factory.clone()));
    sorter.set_memory_pressure(Box::new(NoPressure));
    sorter
}

/// Records every progress value and message.
#[derive(Default)]
pub struct RecordingProgress {
    pub values: Mutex<Vec<f64>>,
    pub messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingProgress {
    fn report(&self, progress: Option<f64>, message: Option<&str>) {
        if let Some(p) = progress {
            self.values.lock().unwrap().push(p);
        }
        if let Some(m) = message {
            self.messages.lock().unwrap().push(m.to_string());
        }
    }
}

/// Cancels its token on the first message starting with `prefix`.
pub struct CancelOnMessage {
    pub prefix: &'static str,
    pub token: CancellationToken,
}

impl ProgressSink for CancelOnMessage {
    fn report(&self, _progress: Option<f64>, message: Option<&str>) {
        if message.is_some_and(|m| m.starts_with(self.prefix)) {
            self.token.cancel();
        }
    }
}

/// Delegates to an in-memory factory but fails every container request
/// after the first `allowed`.
pub struct FailingFactory {
    pub inner: InMemoryContainerFactory,
    pub allowed: usize,
    pub requests: AtomicUsize,
}

impl FailingFactory {
    pub fn new(allowed: usize) -> Self {
        FailingFactory {
            inner: InMemoryContainerFactory::new(),
            allowed,
            requests: AtomicUsize::new(0),
        }
    }
}

impl ContainerFactory for FailingFactory {
    fn create_container(
        &self,
        schema: &Schema,
        force_disk: bool,
    ) -> Result<Box<dyn ContainerWriter>> {
        if self.requests.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
        }
        self.inner.create_container(schema, force_disk)
    }
}
