//! Contracts for temporary row containers.

use rowsort_types::error::Result;
use rowsort_types::row::{Row, Schema};

use crate::source::RowIter;

/// A closed container: an ordered sequence of rows that can be read from
/// the start any number of times. Dropping it releases its storage.
pub trait RowContainer: Send {
    fn schema(&self) -> &Schema;

    fn num_rows(&self) -> u64;

    /// Iterate the rows from the start. The iterator owns what it needs, so
    /// it stays valid on its own.
    fn iter_rows(&self) -> Result<RowIter<'static>>;
}

/// An open container accepting rows in order.
///
/// Dropping a writer without calling [`ContainerWriter::close`] discards
/// everything written so far.
pub trait ContainerWriter: Send {
    fn add_row(&mut self, row: Row) -> Result<()>;

    fn num_rows(&self) -> u64;

    /// Finish writing and return the readable container.
    fn close(self: Box<Self>) -> Result<Box<dyn RowContainer>>;
}

/// Opens new temporary containers.
pub trait ContainerFactory: Send + Sync {
    /// Open a writable container for rows of `schema`. `force_disk` asks
    /// the factory to bypass any in-memory tier.
    fn create_container(&self, schema: &Schema, force_disk: bool)
        -> Result<Box<dyn ContainerWriter>>;
}
