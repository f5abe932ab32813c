//! File handles handed out by the scratch store.

use rowsort_types::error::Result;
use std::io::{Read, Write};

/// A scratch file opened for reading.
pub trait ReadableFile: Read + Send {}

impl<T: Read + Send> ReadableFile for T {}

/// A scratch file opened for writing. Its contents become visible to
/// readers once [`WritableFile::flush_all`] returns.
pub trait WritableFile: Write + Send {
    fn flush_all(&mut self) -> Result<()>;
}
