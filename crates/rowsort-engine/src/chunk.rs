//! Sorted runs produced by the chunk builder and consumed by the merger.

use rowsort_storage::container::RowContainer;
use rowsort_storage::source::RowIter;
use rowsort_types::error::Result;
use rowsort_types::row::Row;

/// A sorted run of rows, either still in memory or written to a container.
///
/// Dropping a stored chunk releases its container.
pub enum Chunk {
    InMemory(Vec<Row>),
    Stored(Box<dyn RowContainer>),
}

impl Chunk {
    pub fn num_rows(&self) -> u64 {
        match self {
            Chunk::InMemory(rows) => rows.len() as u64,
            Chunk::Stored(container) => container.num_rows(),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        matches!(self, Chunk::InMemory(_))
    }

    /// Iterate without consuming; may be called repeatedly.
    pub fn iter_rows(&self) -> Result<RowIter<'_>> {
        match self {
            Chunk::InMemory(rows) => Ok(Box::new(rows.iter().cloned().map(Ok))),
            Chunk::Stored(container) => container.iter_rows(),
        }
    }

    /// Consume the chunk into a reader that owns its storage.
    pub fn into_reader(self) -> Result<ChunkReader> {
        match self {
            Chunk::InMemory(rows) => Ok(ChunkReader {
                rows: Box::new(rows.into_iter().map(Ok)),
                _backing: None,
            }),
            Chunk::Stored(container) => Ok(ChunkReader {
                rows: container.iter_rows()?,
                _backing: Some(container),
            }),
        }
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Chunk::InMemory(rows) => write!(f, "Chunk::InMemory({} rows)", rows.len()),
            Chunk::Stored(c) => write!(f, "Chunk::Stored({} rows)", c.num_rows()),
        }
    }
}

/// Single-pass reader over a chunk. The backing container, if any, is
/// released when the reader is dropped.
pub struct ChunkReader {
    // declared first so it drops before the container it reads
    rows: RowIter<'static>,
    _backing: Option<Box<dyn RowContainer>>,
}

impl Iterator for ChunkReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_storage::container::ContainerFactory;
    use rowsort_storage::memory_container::InMemoryContainerFactory;
    use rowsort_types::cell::Cell;
    use rowsort_types::row::Schema;

    fn rows(n: i64) -> Vec<Row> {
        (0..n).map(|i| Row::new("r", vec![Cell::Integer(i)])).collect()
    }

    #[test]
    fn test_in_memory_chunk() {
        let chunk = Chunk::InMemory(rows(3));
        assert!(chunk.is_in_memory());
        assert_eq!(chunk.num_rows(), 3);
        assert_eq!(chunk.iter_rows().unwrap().count(), 3);
        assert_eq!(chunk.into_reader().unwrap().count(), 3);
    }

    #[test]
    fn test_reader_releases_container() {
        let factory = InMemoryContainerFactory::new();
        let mut w = factory.create_container(&Schema::default(), true).unwrap();
        for row in rows(4) {
            w.add_row(row).unwrap();
        }
        let chunk = Chunk::Stored(w.close().unwrap());
        assert_eq!(chunk.num_rows(), 4);

        let mut reader = chunk.into_reader().unwrap();
        assert!(reader.next().is_some());
        assert_eq!(factory.live_containers(), 1);
        drop(reader);
        assert_eq!(factory.live_containers(), 0);
    }
}
