use rowsort_types::error::Result;
use rowsort_types::row::{Row, Schema};

/// Fallible forward iterator over rows.
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Row>> + Send + 'a>;

/// A finite, re-iterable sequence of rows.
pub trait RowSource {
    fn schema(&self) -> &Schema;

    /// Number of rows, if known up front.
    fn row_count(&self) -> Option<u64>;

    /// Iterate the rows from the start.
    fn rows(&self) -> Result<RowIter<'_>>;
}
