//! Containers kept entirely in RAM.
//!
//! Useful for small inputs and for tests: the factory counts how many
//! containers were created and how many are still alive, which makes leaks
//! on error paths observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rowsort_types::error::Result;
use rowsort_types::row::{Row, Schema};

use crate::container::{ContainerFactory, ContainerWriter, RowContainer};
use crate::source::RowIter;

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    live: AtomicUsize,
    forced_disk: AtomicUsize,
}

/// Decrements the live counter when the writer or container holding it
/// goes away.
struct LiveToken(Arc<Counters>);

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Factory for RAM-backed containers. Cloned factories share counters.
#[derive(Clone, Default)]
pub struct InMemoryContainerFactory {
    counters: Arc<Counters>,
}

impl InMemoryContainerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers opened so far.
    pub fn created_containers(&self) -> usize {
        self.counters.created.load(Ordering::Relaxed)
    }

    /// Writers and containers not yet dropped.
    pub fn live_containers(&self) -> usize {
        self.counters.live.load(Ordering::Relaxed)
    }

    /// Containers requested with the force-disk hint.
    pub fn forced_disk_requests(&self) -> usize {
        self.counters.forced_disk.load(Ordering::Relaxed)
    }
}

impl ContainerFactory for InMemoryContainerFactory {
    fn create_container(
        &self,
        schema: &Schema,
        force_disk: bool,
    ) -> Result<Box<dyn ContainerWriter>> {
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        self.counters.live.fetch_add(1, Ordering::Relaxed);
        if force_disk {
            self.counters.forced_disk.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Box::new(InMemoryContainerWriter {
            rows: Vec::new(),
            schema: schema.clone(),
            _token: LiveToken(self.counters.clone()),
        }))
    }
}

struct InMemoryContainerWriter {
    rows: Vec<Row>,
    schema: Schema,
    _token: LiveToken,
}

impl ContainerWriter for InMemoryContainerWriter {
    fn add_row(&mut self, row: Row) -> Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn num_rows(&self) -> u64 {
        self.rows.len() as u64
    }

    fn close(self: Box<Self>) -> Result<Box<dyn RowContainer>> {
        let this = *self;
        Ok(Box::new(InMemoryContainer {
            rows: Arc::new(this.rows),
            schema: this.schema,
            _token: this._token,
        }))
    }
}

/// A closed RAM-backed container.
pub struct InMemoryContainer {
    rows: Arc<Vec<Row>>,
    schema: Schema,
    _token: LiveToken,
}

impl RowContainer for InMemoryContainer {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_rows(&self) -> u64 {
        self.rows.len() as u64
    }

    fn iter_rows(&self) -> Result<RowIter<'static>> {
        let rows = self.rows.clone();
        Ok(Box::new((0..rows.len()).map(move |i| Ok(rows[i].clone()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_types::cell::Cell;

    #[test]
    fn test_counts_live_containers() {
        let factory = InMemoryContainerFactory::new();
        let schema = Schema::default();

        let mut w = factory.create_container(&schema, true).unwrap();
        w.add_row(Row::new("a", vec![Cell::Integer(1)])).unwrap();
        w.add_row(Row::new("b", vec![Cell::Integer(2)])).unwrap();
        assert_eq!(factory.live_containers(), 1);

        let container = w.close().unwrap();
        assert_eq!(factory.live_containers(), 1);
        assert_eq!(container.num_rows(), 2);
        let keys: Vec<String> = container
            .iter_rows()
            .unwrap()
            .map(|r| r.unwrap().key().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        let abandoned = factory.create_container(&schema, false).unwrap();
        assert_eq!(factory.live_containers(), 2);
        drop(abandoned);
        drop(container);

        assert_eq!(factory.live_containers(), 0);
        assert_eq!(factory.created_containers(), 2);
        assert_eq!(factory.forced_disk_requests(), 1);
    }
}
