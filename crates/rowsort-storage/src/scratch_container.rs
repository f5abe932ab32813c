//! Containers stored as row files in a [`ScratchFs`].

use std::sync::Arc;

use rowsort_io::scratch_fs::{global_scratch_fs, ScratchFs, ScratchGuard};
use rowsort_io::vfs::{ReadableFile, WritableFile};
use rowsort_types::error::Result;
use rowsort_types::row::{Row, Schema};

use crate::container::{ContainerFactory, ContainerWriter, RowContainer};
use crate::row_file::{RowFileReader, RowFileWriter};
use crate::source::RowIter;

/// Opens containers in a scratch filesystem.
#[derive(Clone)]
pub struct ScratchContainerFactory {
    fs: Arc<ScratchFs>,
}

impl ScratchContainerFactory {
    pub fn new(fs: Arc<ScratchFs>) -> Self {
        ScratchContainerFactory { fs }
    }

    /// Factory over the process-wide scratch store.
    pub fn global() -> Result<Self> {
        Ok(Self::new(global_scratch_fs()?))
    }
}

impl ContainerFactory for ScratchContainerFactory {
    fn create_container(
        &self,
        schema: &Schema,
        force_disk: bool,
    ) -> Result<Box<dyn ContainerWriter>> {
        let path = self.fs.alloc_path();
        // retained before the first byte lands, so an abandoned writer is cleaned up
        let guard = ScratchGuard::new(path.clone(), self.fs.clone());
        let file = self.fs.open_scratch_write(&path, force_disk)?;
        let writer = RowFileWriter::new(file, schema.num_columns())?;
        Ok(Box::new(ScratchContainerWriter {
            writer,
            schema: schema.clone(),
            guard,
        }))
    }
}

struct ScratchContainerWriter {
    // dropped before the guard so no flush can race the release
    writer: RowFileWriter<Box<dyn WritableFile>>,
    schema: Schema,
    guard: ScratchGuard,
}

impl ContainerWriter for ScratchContainerWriter {
    fn add_row(&mut self, row: Row) -> Result<()> {
        self.writer.write_row(&row)
    }

    fn num_rows(&self) -> u64 {
        self.writer.num_rows()
    }

    fn close(self: Box<Self>) -> Result<Box<dyn RowContainer>> {
        let this = *self;
        let num_rows = this.writer.num_rows();
        let mut file = this.writer.finish()?;
        file.flush_all()?;
        drop(file);
        tracing::trace!(path = this.guard.path(), num_rows, "closed scratch container");
        Ok(Box::new(ScratchContainer {
            guard: this.guard,
            schema: this.schema,
            num_rows,
        }))
    }
}

/// A closed row file in scratch storage, deleted when dropped.
pub struct ScratchContainer {
    guard: ScratchGuard,
    schema: Schema,
    num_rows: u64,
}

impl ScratchContainer {
    pub fn path(&self) -> &str {
        self.guard.path()
    }
}

impl RowContainer for ScratchContainer {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn num_rows(&self) -> u64 {
        self.num_rows
    }

    fn iter_rows(&self) -> Result<RowIter<'static>> {
        let file = self.guard.fs().open_read(self.guard.path())?;
        let reader = RowFileReader::new(file, self.num_rows)?;
        Ok(Box::new(ScratchRowIter {
            reader,
            _guard: self.guard.clone(),
        }))
    }
}

/// Keeps the scratch file alive for as long as it is being read.
struct ScratchRowIter {
    reader: RowFileReader<Box<dyn ReadableFile>>,
    _guard: ScratchGuard,
}

impl Iterator for ScratchRowIter {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_types::cell::{Cell, CellType};
    use rowsort_types::row::ColumnSpec;

    fn schema() -> Schema {
        Schema::new(vec![ColumnSpec::new("v", CellType::Integer)]).unwrap()
    }

    fn write(factory: &ScratchContainerFactory, n: i64, force_disk: bool) -> Box<dyn RowContainer> {
        let mut w = factory.create_container(&schema(), force_disk).unwrap();
        for i in 0..n {
            w.add_row(Row::new(format!("Row{}", i).as_str(), vec![Cell::Integer(i)]))
                .unwrap();
        }
        assert_eq!(w.num_rows(), n as u64);
        w.close().unwrap()
    }

    #[test]
    fn test_container_is_reiterable() {
        let fs = Arc::new(ScratchFs::with_limits(1 << 20, 1 << 20).unwrap());
        let factory = ScratchContainerFactory::new(fs.clone());
        let container = write(&factory, 10, false);
        assert_eq!(container.num_rows(), 10);

        for _ in 0..2 {
            let values: Vec<Cell> = container
                .iter_rows()
                .unwrap()
                .map(|r| r.unwrap().cells()[0].clone())
                .collect();
            assert_eq!(values, (0..10).map(Cell::Integer).collect::<Vec<_>>());
        }
        assert_eq!(fs.in_memory_count(), 1);
    }

    #[test]
    fn test_force_disk_container() {
        let fs = Arc::new(ScratchFs::with_limits(1 << 20, 1 << 20).unwrap());
        let factory = ScratchContainerFactory::new(fs.clone());
        let container = write(&factory, 3, true);
        assert_eq!(fs.in_memory_count(), 0);
        assert_eq!(fs.on_disk_count().unwrap(), 1);
        assert_eq!(container.iter_rows().unwrap().count(), 3);
    }

    #[test]
    fn test_drop_releases_storage() {
        let fs = Arc::new(ScratchFs::with_limits(1 << 20, 1 << 20).unwrap());
        let factory = ScratchContainerFactory::new(fs.clone());
        let container = write(&factory, 3, true);
        assert_eq!(fs.live_files(), 1);
        drop(container);
        assert_eq!(fs.live_files(), 0);
        assert_eq!(fs.on_disk_count().unwrap(), 0);
    }

    #[test]
    fn test_reader_outlives_container() {
        let fs = Arc::new(ScratchFs::with_limits(1 << 20, 1 << 20).unwrap());
        let factory = ScratchContainerFactory::new(fs.clone());
        let container = write(&factory, 4, true);
        let iter = container.iter_rows().unwrap();
        drop(container);
        assert_eq!(iter.count(), 4);
        assert_eq!(fs.live_files(), 0);
    }

    #[test]
    fn test_abandoned_writer_releases_storage() {
        let fs = Arc::new(ScratchFs::with_limits(1 << 20, 1 << 20).unwrap());
        let factory = ScratchContainerFactory::new(fs.clone());
        let mut w = factory.create_container(&schema(), true).unwrap();
        w.add_row(Row::new("a", vec![Cell::Integer(1)])).unwrap();
        drop(w);
        assert_eq!(fs.live_files(), 0);
        assert_eq!(fs.on_disk_count().unwrap(), 0);
    }
}
