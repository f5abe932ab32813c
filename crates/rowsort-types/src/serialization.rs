//! Binary encoding of cells and rows for spilled chunks.
//!
//! All primitives are little-endian:
//! - Integers and doubles: raw LE bytes
//! - Strings: 8-byte LE length prefix + UTF-8 bytes
//! - Sequences: 8-byte LE length prefix + elements
//! - Cell: 1-byte tag (128 + cell type) + value data
//! - Row: key string + cell count + cells

use std::io::{Read, Write};
use std::sync::Arc;

use crate::cell::{Cell, CellType, DateTime};
use crate::error::{Result, SortError};
use crate::row::Row;

/// Upper bound for a single length prefix, guards against reading garbage.
const MAX_LEN: usize = 256 * 1024 * 1024;

const CELL_TAG_OFFSET: u8 = 128;

// --- Primitive readers ---

pub fn read_u8(reader: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn read_i64(reader: &mut impl Read) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn read_f64(reader: &mut impl Read) -> Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_len(reader: &mut impl Read) -> Result<usize> {
    let len = read_u64(reader)? as usize;
    if len > MAX_LEN {
        return Err(SortError::Format(format!(
            "Length prefix {} exceeds sanity limit",
            len
        )));
    }
    Ok(len)
}

pub fn read_string(reader: &mut impl Read) -> Result<String> {
    let len = read_len(reader)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| SortError::Format(format!("Invalid UTF-8: {}", e)))
}

// --- Primitive writers ---

pub fn write_u8(writer: &mut impl Write, v: u8) -> Result<()> {
    writer.write_all(&[v])?;
    Ok(())
}

pub fn write_u32(writer: &mut impl Write, v: u32) -> Result<()> {
    writer.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u64(writer: &mut impl Write, v: u64) -> Result<()> {
    writer.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_i64(writer: &mut impl Write, v: i64) -> Result<()> {
    writer.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_f64(writer: &mut impl Write, v: f64) -> Result<()> {
    writer.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_string(writer: &mut impl Write, s: &str) -> Result<()> {
    write_u64(writer, s.len() as u64)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

// --- Cells ---

pub fn read_cell(reader: &mut impl Read) -> Result<Cell> {
    let tag = read_u8(reader)?;
    if tag < CELL_TAG_OFFSET {
        return Err(SortError::Format(format!("Invalid cell tag {}", tag)));
    }

    match CellType::try_from(tag - CELL_TAG_OFFSET)? {
        CellType::Integer => Ok(Cell::Integer(read_i64(reader)?)),
        CellType::Float => Ok(Cell::Float(read_f64(reader)?)),
        CellType::String => Ok(Cell::String(Arc::from(read_string(reader)?))),
        CellType::Vector => {
            let len = read_len(reader)?;
            let mut values = Vec::with_capacity(len);
            for _ in 0..len {
                values.push(read_f64(reader)?);
            }
            Ok(Cell::Vector(Arc::from(values)))
        }
        CellType::List => {
            let len = read_len(reader)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(read_cell(reader)?);
            }
            Ok(Cell::List(Arc::from(items)))
        }
        CellType::Dict => {
            let len = read_len(reader)?;
            let mut pairs = Vec::with_capacity(len);
            for _ in 0..len {
                let key = read_cell(reader)?;
                let value = read_cell(reader)?;
                pairs.push((key, value));
            }
            Ok(Cell::Dict(Arc::from(pairs)))
        }
        CellType::DateTime => {
            let posix_timestamp = read_i64(reader)?;
            let tz_offset_quarter_hours = read_u8(reader)? as i8;
            let microsecond = read_u32(reader)?;
            Ok(Cell::DateTime(DateTime {
                posix_timestamp,
                tz_offset_quarter_hours,
                microsecond,
            }))
        }
        CellType::Missing => Ok(Cell::Missing),
    }
}

pub fn write_cell(writer: &mut impl Write, cell: &Cell) -> Result<()> {
    write_u8(writer, CELL_TAG_OFFSET + cell.cell_type() as u8)?;
    match cell {
        Cell::Integer(v) => write_i64(writer, *v),
        Cell::Float(v) => write_f64(writer, *v),
        Cell::String(s) => write_string(writer, s),
        Cell::Vector(values) => {
            write_u64(writer, values.len() as u64)?;
            for v in values.iter() {
                write_f64(writer, *v)?;
            }
            Ok(())
        }
        Cell::List(items) => {
            write_u64(writer, items.len() as u64)?;
            for item in items.iter() {
                write_cell(writer, item)?;
            }
            Ok(())
        }
        Cell::Dict(pairs) => {
            write_u64(writer, pairs.len() as u64)?;
            for (k, v) in pairs.iter() {
                write_cell(writer, k)?;
                write_cell(writer, v)?;
            }
            Ok(())
        }
        Cell::DateTime(dt) => {
            write_i64(writer, dt.posix_timestamp)?;
            write_u8(writer, dt.tz_offset_quarter_hours as u8)?;
            write_u32(writer, dt.microsecond)
        }
        Cell::Missing => Ok(()),
    }
}

// --- Rows ---

pub fn read_row(reader: &mut impl Read) -> Result<Row> {
    let key = read_string(reader)?;
    let num_cells = read_len(reader)?;
    let mut cells = Vec::with_capacity(num_cells);
    for _ in 0..num_cells {
        cells.push(read_cell(reader)?);
    }
    Ok(Row::new(key.as_str(), cells))
}

pub fn write_row(writer: &mut impl Write, row: &Row) -> Result<()> {
    write_string(writer, row.key().as_str())?;
    write_u64(writer, row.num_cells() as u64)?;
    for cell in row.cells() {
        write_cell(writer, cell)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_integer_cell_layout() {
        let mut data = vec![128u8]; // 128 + Integer
        data.extend_from_slice(&42i64.to_le_bytes());
        let mut cursor = Cursor::new(&data);
        assert_eq!(read_cell(&mut cursor).unwrap(), Cell::Integer(42));
    }

    #[test]
    fn test_read_missing_cell_layout() {
        let data = vec![135u8]; // 128 + Missing
        let mut cursor = Cursor::new(&data);
        assert_eq!(read_cell(&mut cursor).unwrap(), Cell::Missing);
    }

    #[test]
    fn test_row_with_nested_cells() {
        let row = Row::new(
            "Row7",
            vec![
                Cell::Integer(-3),
                Cell::from("héllo"),
                Cell::Vector(Arc::from(vec![1.0, 2.5])),
                Cell::List(Arc::from(vec![Cell::Missing, Cell::Float(0.5)])),
                Cell::Dict(Arc::from(vec![(Cell::from("k"), Cell::Integer(9))])),
                Cell::DateTime(DateTime {
                    posix_timestamp: 1_700_000_000,
                    tz_offset_quarter_hours: -8,
                    microsecond: 250,
                }),
            ],
        );
        let mut buf = Vec::new();
        write_row(&mut buf, &row).unwrap();
        let decoded = read_row(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_rejects_legacy_tag() {
        let data = vec![3u8];
        let err = read_cell(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, SortError::Format(_)));
    }

    #[test]
    fn test_truncated_row_is_io_error() {
        let row = Row::new("r", vec![Cell::from("abcdef")]);
        let mut buf = Vec::new();
        write_row(&mut buf, &row).unwrap();
        buf.truncate(buf.len() - 2);
        let err = read_row(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, SortError::Io(_)));
    }

    #[test]
    fn test_oversized_length_prefix() {
        let data = u64::MAX.to_le_bytes().to_vec();
        assert!(read_string(&mut Cursor::new(&data)).is_err());
    }
}
