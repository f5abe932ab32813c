use std::sync::Arc;

use crate::error::{Result, SortError};

/// Type tag of a [`Cell`]. The discriminants are part of the spill format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellType {
    Integer = 0,
    Float = 1,
    String = 2,
    Vector = 3,
    List = 4,
    Dict = 5,
    DateTime = 6,
    Missing = 7,
}

impl TryFrom<u8> for CellType {
    type Error = SortError;
    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Integer),
            1 => Ok(Self::Float),
            2 => Ok(Self::String),
            3 => Ok(Self::Vector),
            4 => Ok(Self::List),
            5 => Ok(Self::Dict),
            6 => Ok(Self::DateTime),
            7 => Ok(Self::Missing),
            _ => Err(SortError::Type(format!("Unknown cell type tag: {}", value))),
        }
    }
}

impl std::fmt::Display for CellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Vector => "vector",
            Self::List => "list",
            Self::Dict => "dict",
            Self::DateTime => "datetime",
            Self::Missing => "missing",
        };
        f.write_str(name)
    }
}

/// Point in time with microsecond precision and a timezone offset
/// expressed in quarter hours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTime {
    pub posix_timestamp: i64,
    pub tz_offset_quarter_hours: i8,
    pub microsecond: u32,
}

/// A single table cell. Heap data sits behind `Arc` so rows clone cheaply.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Integer(i64),
    Float(f64),
    String(Arc<str>),
    Vector(Arc<[f64]>),
    List(Arc<[Cell]>),
    Dict(Arc<[(Cell, Cell)]>),
    DateTime(DateTime),
    Missing,
}

impl Cell {
    pub fn cell_type(&self) -> CellType {
        match self {
            Cell::Integer(_) => CellType::Integer,
            Cell::Float(_) => CellType::Float,
            Cell::String(_) => CellType::String,
            Cell::Vector(_) => CellType::Vector,
            Cell::List(_) => CellType::List,
            Cell::Dict(_) => CellType::Dict,
            Cell::DateTime(_) => CellType::DateTime,
            Cell::Missing => CellType::Missing,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Integer(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::String(Arc::from(v))
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::String(Arc::from(v))
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map_or(Cell::Missing, Into::into)
    }
}

fn write_seq<T: std::fmt::Display>(
    f: &mut std::fmt::Formatter<'_>,
    items: impl Iterator<Item = T>,
) -> std::fmt::Result {
    write!(f, "[")?;
    for (i, x) in items.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", x)?;
    }
    write!(f, "]")
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Integer(v) => write!(f, "{}", v),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::String(v) => write!(f, "{}", v),
            Cell::Vector(v) => write_seq(f, v.iter()),
            Cell::List(v) => write_seq(f, v.iter()),
            Cell::Dict(v) => {
                write!(f, "{{")?;
                for (i, (k, val)) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, val)?;
                }
                write!(f, "}}")
            }
            Cell::DateTime(dt) => write!(f, "DateTime({})", dt.posix_timestamp),
            Cell::Missing => write!(f, "?"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_type_tags_are_stable() {
        assert_eq!(CellType::Integer as u8, 0);
        assert_eq!(CellType::DateTime as u8, 6);
        assert_eq!(CellType::Missing as u8, 7);
        assert_eq!(CellType::try_from(2u8).unwrap(), CellType::String);
        assert!(CellType::try_from(8u8).is_err());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Cell::from(3i64), Cell::Integer(3));
        assert_eq!(Cell::from("a").cell_type(), CellType::String);
        assert!(Cell::from(None::<i64>).is_missing());
        assert_eq!(Cell::from(Some(1.5)), Cell::Float(1.5));
    }

    #[test]
    fn test_display() {
        assert_eq!(Cell::Integer(42).to_string(), "42");
        assert_eq!(Cell::Missing.to_string(), "?");
        let list = Cell::List(Arc::from(vec![Cell::Integer(1), Cell::from("x")]));
        assert_eq!(list.to_string(), "[1, x]");
    }
}
