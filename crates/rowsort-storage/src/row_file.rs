//! Row file format used for spilled chunks.
//!
//! ```text
//! magic "RSRT" | version u32 | num_columns u64 | block* | 0u32 | row_count u64
//!
//! block: num_rows u32 (> 0) | flags u8 | block_size u64 | length u64 | data
//! ```
//!
//! A block holds consecutive rows encoded with
//! [`rowsort_types::serialization::write_row`]. `block_size` is the encoded
//! size and `length` the stored size; the data is LZ4 compressed when that
//! saves at least 10%. The trailing row count lets a reader detect
//! truncated files.

use std::io::{Cursor, Read, Write};

use rowsort_types::error::{Result, SortError};
use rowsort_types::row::Row;
use rowsort_types::serialization::{
    read_row, read_u32, read_u64, read_u8, write_row, write_u32, write_u64, write_u8,
};

const MAGIC: &[u8; 4] = b"RSRT";
const VERSION: u32 = 2;

/// Encoded bytes buffered before a block is written out.
const BLOCK_TARGET_SIZE: usize = 64 * 1024;

/// Upper bound accepted for a single block, compressed or not.
const MAX_BLOCK_SIZE: u64 = 256 * 1024 * 1024;

const LZ4_COMPRESSION: u8 = 1;

/// Store uncompressed unless LZ4 gets below this fraction of the input.
const COMPRESSION_DISABLE_THRESHOLD: f64 = 0.9;

/// Streams rows into a row file.
pub struct RowFileWriter<W: Write> {
    writer: W,
    block: Vec<u8>,
    block_rows: u32,
    num_rows: u64,
}

impl<W: Write> RowFileWriter<W> {
    /// Write the header and return a writer positioned at the first block.
    pub fn new(mut writer: W, num_columns: usize) -> Result<Self> {
        writer.write_all(MAGIC)?;
        write_u32(&mut writer, VERSION)?;
        write_u64(&mut writer, num_columns as u64)?;
        Ok(RowFileWriter {
            writer,
            block: Vec::with_capacity(BLOCK_TARGET_SIZE),
            block_rows: 0,
            num_rows: 0,
        })
    }

    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        write_row(&mut self.block, row)?;
        self.block_rows += 1;
        self.num_rows += 1;
        if self.block.len() >= BLOCK_TARGET_SIZE || self.block_rows == u32::MAX {
            self.flush_block()?;
        }
        Ok(())
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block_rows == 0 {
            return Ok(());
        }
        let block_size = self.block.len() as u64;
        let compressed = lz4_flex::compress(&self.block);
        let use_compression =
            (compressed.len() as f64) < COMPRESSION_DISABLE_THRESHOLD * (block_size as f64);
        let (data, flags) = if use_compression {
            (compressed.as_slice(), LZ4_COMPRESSION)
        } else {
            (self.block.as_slice(), 0)
        };

        write_u32(&mut self.writer, self.block_rows)?;
        write_u8(&mut self.writer, flags)?;
        write_u64(&mut self.writer, block_size)?;
        write_u64(&mut self.writer, data.len() as u64)?;
        self.writer.write_all(data)?;

        self.block.clear();
        self.block_rows = 0;
        Ok(())
    }

    /// Flush the last block, write the trailer, and hand back the
    /// underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.flush_block()?;
        write_u32(&mut self.writer, 0)?;
        write_u64(&mut self.writer, self.num_rows)?;
        Ok(self.writer)
    }
}

/// Reads rows back from a row file.
pub struct RowFileReader<R: Read> {
    reader: R,
    num_columns: usize,
    num_rows: u64,
    rows_read: u64,
    block: Cursor<Vec<u8>>,
    block_remaining: u32,
    done: bool,
}

impl<R: Read> RowFileReader<R> {
    /// Validate the header. `num_rows` is the count recorded when the file
    /// was written.
    pub fn new(mut reader: R, num_rows: u64) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SortError::Format("Not a row file (bad magic)".to_string()));
        }
        let version = read_u32(&mut reader)?;
        if version != VERSION {
            return Err(SortError::Format(format!(
                "Unsupported row file version {}",
                version
            )));
        }
        let num_columns = read_u64(&mut reader)? as usize;
        Ok(RowFileReader {
            reader,
            num_columns,
            num_rows,
            rows_read: 0,
            block: Cursor::new(Vec::new()),
            block_remaining: 0,
            done: false,
        })
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Next row, or `None` after the last one. The trailer is checked when
    /// the end marker is reached.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if self.block_remaining > 0 {
                let row = read_row(&mut self.block)?;
                self.block_remaining -= 1;
                self.rows_read += 1;
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }
            self.load_block()?;
        }
    }

    fn load_block(&mut self) -> Result<()> {
        let block_rows = read_u32(&mut self.reader)?;
        if block_rows == 0 {
            self.done = true;
            let trailer = read_u64(&mut self.reader)?;
            if trailer != self.num_rows || self.rows_read != self.num_rows {
                return Err(SortError::Format(format!(
                    "Row file holds {} rows ({} read), expected {}",
                    trailer, self.rows_read, self.num_rows
                )));
            }
            return Ok(());
        }

        let flags = read_u8(&mut self.reader)?;
        let block_size = read_u64(&mut self.reader)?;
        let length = read_u64(&mut self.reader)?;
        if block_size > MAX_BLOCK_SIZE || length > MAX_BLOCK_SIZE {
            return Err(SortError::Format(format!(
                "Row file block too large ({} bytes)",
                block_size.max(length)
            )));
        }
        let mut raw = vec![0u8; length as usize];
        self.reader.read_exact(&mut raw)?;
        let data = if flags & LZ4_COMPRESSION != 0 {
            lz4_flex::decompress(&raw, block_size as usize).map_err(|e| {
                SortError::Format(format!("LZ4 decompression failed: {}", e))
            })?
        } else {
            raw
        };
        self.block = Cursor::new(data);
        self.block_remaining = block_rows;
        Ok(())
    }
}

impl<R: Read> Iterator for RowFileReader<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => {
                self.block_remaining = 0;
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsort_types::cell::Cell;

    fn rows(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| Row::new(format!("Row{}", i).as_str(), vec![Cell::Integer(i), Cell::from("x")]))
            .collect()
    }

    fn encode(rows: &[Row]) -> Vec<u8> {
        let mut w = RowFileWriter::new(Vec::new(), 2).unwrap();
        for row in rows {
            w.write_row(row).unwrap();
        }
        assert_eq!(w.num_rows(), rows.len() as u64);
        w.finish().unwrap()
    }

    #[test]
    fn test_reads_rows_in_written_order() {
        let input = rows(5);
        let data = encode(&input);
        let reader = RowFileReader::new(Cursor::new(data), 5).unwrap();
        assert_eq!(reader.num_columns(), 2);
        let output: Vec<Row> = reader.collect::<Result<_>>().unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_many_blocks_compress() {
        let input: Vec<Row> = (0..20_000)
            .map(|i| Row::new("same-key", vec![Cell::Integer(i % 7), Cell::from("repeated text")]))
            .collect();
        let data = encode(&input);
        let mut encoded = Vec::new();
        for row in &input {
            write_row(&mut encoded, row).unwrap();
        }
        assert!(data.len() < encoded.len() / 2);

        let output: Vec<Row> = RowFileReader::new(Cursor::new(data), 20_000)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn test_empty_file() {
        let data = encode(&[]);
        let mut reader = RowFileReader::new(Cursor::new(data), 0).unwrap();
        assert!(reader.next_row().unwrap().is_none());
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic() {
        let mut data = encode(&rows(1));
        data[0] = b'X';
        assert!(matches!(
            RowFileReader::new(Cursor::new(data), 1),
            Err(SortError::Format(_))
        ));
    }

    #[test]
    fn test_row_count_mismatch_detected() {
        let data = encode(&rows(3));
        let results: Vec<Result<Row>> = RowFileReader::new(Cursor::new(data), 2).unwrap().collect();
        assert!(matches!(results.last(), Some(Err(SortError::Format(_)))));
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let mut data = encode(&rows(3));
        data.truncate(data.len() - 12);
        let results: Vec<Result<Row>> = RowFileReader::new(Cursor::new(data), 3).unwrap().collect();
        assert!(results.last().unwrap().is_err());
        assert!(results.len() <= 4);
    }
}
