//! Row ordering.
//!
//! A [`RowComparator`] is a fallible total order over rows. The usual one
//! is [`KeyComparator`], which compares a list of sort keys in priority
//! order; any closure `Fn(&Row, &Row) -> Result<Ordering>` works as well.

use std::cmp::Ordering;
use std::collections::HashSet;

use rowsort_types::cell::Cell;
use rowsort_types::error::{Result, SortError};
use rowsort_types::row::{Row, Schema};

/// Pseudo column name that sorts by the row key.
pub const ROW_KEY_COLUMN: &str = "-ROWKEY -";

/// Sort order for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// What a sort key compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortColumn {
    Column(usize),
    RowKey,
}

/// One sort key: target, direction, and where missing cells go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: SortColumn,
    pub order: SortOrder,
    /// Missing cells sort after everything else regardless of `order`.
    /// Otherwise missing is the smallest value.
    pub missing_last: bool,
}

impl SortKey {
    pub fn asc(column: usize) -> Self {
        SortKey {
            column: SortColumn::Column(column),
            order: SortOrder::Ascending,
            missing_last: false,
        }
    }

    pub fn desc(column: usize) -> Self {
        SortKey {
            column: SortColumn::Column(column),
            order: SortOrder::Descending,
            missing_last: false,
        }
    }

    pub fn row_key(order: SortOrder) -> Self {
        SortKey {
            column: SortColumn::RowKey,
            order,
            missing_last: false,
        }
    }

    pub fn with_missing_last(mut self, missing_last: bool) -> Self {
        self.missing_last = missing_last;
        self
    }
}

/// Total order over rows. Errors abort the sort.
pub trait RowComparator: Send + Sync {
    fn compare(&self, a: &Row, b: &Row) -> Result<Ordering>;
}

impl<F> RowComparator for F
where
    F: Fn(&Row, &Row) -> Result<Ordering> + Send + Sync,
{
    fn compare(&self, a: &Row, b: &Row) -> Result<Ordering> {
        self(a, b)
    }
}

/// Compares rows key by key; the first non-equal key decides.
#[derive(Debug, Clone)]
pub struct KeyComparator {
    keys: Vec<SortKey>,
}

impl KeyComparator {
    pub fn new(keys: Vec<SortKey>) -> Result<Self> {
        if keys.is_empty() {
            return Err(SortError::Config("No sort keys given".to_string()));
        }
        let mut seen = HashSet::new();
        for key in &keys {
            if !seen.insert(key.column) {
                return Err(SortError::Config(format!(
                    "Duplicate sort key {:?}",
                    key.column
                )));
            }
        }
        Ok(KeyComparator { keys })
    }

    /// Resolve column names against `schema`. [`ROW_KEY_COLUMN`] selects the
    /// row key.
    pub fn from_names<S: AsRef<str>>(
        schema: &Schema,
        names: &[S],
        ascending: &[bool],
        missing_last: bool,
    ) -> Result<Self> {
        if names.len() != ascending.len() {
            return Err(SortError::Config(format!(
                "{} sort columns but {} sort orders",
                names.len(),
                ascending.len()
            )));
        }
        let mut keys = Vec::with_capacity(names.len());
        for (name, &asc) in names.iter().zip(ascending) {
            let name = name.as_ref();
            let column = if name == ROW_KEY_COLUMN {
                SortColumn::RowKey
            } else {
                let index = schema.find_column(name).ok_or_else(|| {
                    SortError::Config(format!("Unknown sort column '{}'", name))
                })?;
                SortColumn::Column(index)
            };
            let order = if asc {
                SortOrder::Ascending
            } else {
                SortOrder::Descending
            };
            keys.push(SortKey {
                column,
                order,
                missing_last,
            });
        }
        Self::new(keys)
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }
}

fn cell_at(row: &Row, index: usize) -> Result<&Cell> {
    row.cell(index).ok_or_else(|| {
        SortError::Compare(format!(
            "Row '{}' has {} cells, sort column {} is out of range",
            row.key(),
            row.num_cells(),
            index
        ))
    })
}

fn directed(ord: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Ascending => ord,
        SortOrder::Descending => ord.reverse(),
    }
}

impl RowComparator for KeyComparator {
    fn compare(&self, a: &Row, b: &Row) -> Result<Ordering> {
        for key in &self.keys {
            let ord = match key.column {
                SortColumn::RowKey => directed(a.key().cmp(b.key()), key.order),
                SortColumn::Column(index) => {
                    let ca = cell_at(a, index)?;
                    let cb = cell_at(b, index)?;
                    match (ca.is_missing(), cb.is_missing()) {
                        (true, true) => Ordering::Equal,
                        (true, false) if key.missing_last => Ordering::Greater,
                        (false, true) if key.missing_last => Ordering::Less,
                        (true, false) => directed(Ordering::Less, key.order),
                        (false, true) => directed(Ordering::Greater, key.order),
                        (false, false) => directed(compare_cells(ca, cb), key.order),
                    }
                }
            };
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }
}

/// Natural order of two cells.
///
/// Integers and floats compare numerically with each other; floats use
/// `total_cmp` so NaN has a fixed place. Vectors, lists and dicts compare
/// lexicographically. Values of unrelated types order by type rank:
/// Integer < Float < String < Vector < List < Dict < DateTime < Missing.
pub fn compare_cells(a: &Cell, b: &Cell) -> Ordering {
    match (a, b) {
        (Cell::Integer(x), Cell::Integer(y)) => x.cmp(y),
        (Cell::Float(x), Cell::Float(y)) => x.total_cmp(y),
        (Cell::Integer(x), Cell::Float(y)) => (*x as f64).total_cmp(y),
        (Cell::Float(x), Cell::Integer(y)) => x.total_cmp(&(*y as f64)),
        (Cell::String(x), Cell::String(y)) => x.as_ref().cmp(y.as_ref()),
        (Cell::Vector(x), Cell::Vector(y)) => lexicographic(x, y, |p, q| p.total_cmp(q)),
        (Cell::List(x), Cell::List(y)) => lexicographic(x, y, compare_cells),
        (Cell::Dict(x), Cell::Dict(y)) => lexicographic(x, y, |(ka, va), (kb, vb)| {
            compare_cells(ka, kb).then_with(|| compare_cells(va, vb))
        }),
        (Cell::DateTime(x), Cell::DateTime(y)) => x
            .posix_timestamp
            .cmp(&y.posix_timestamp)
            .then(x.microsecond.cmp(&y.microsecond)),
        (Cell::Missing, Cell::Missing) => Ordering::Equal,
        (a, b) => (a.cell_type() as u8).cmp(&(b.cell_type() as u8)),
    }
}

fn lexicographic<T>(a: &[T], b: &[T], cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = cmp(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Stable sort of `rows`, stopping at the first comparator error.
///
/// Bottom-up merge sort over row indices: equal rows keep their input
/// order, and a failing comparison returns immediately instead of leaving
/// the comparator in an inconsistent state.
pub fn sort_rows(rows: Vec<Row>, comparator: &dyn RowComparator) -> Result<Vec<Row>> {
    let n = rows.len();
    if n < 2 {
        return Ok(rows);
    }
    let mut src: Vec<usize> = (0..n).collect();
    let mut dst = vec![0usize; n];
    let mut width = 1;
    while width < n {
        for start in (0..n).step_by(2 * width) {
            let mid = (start + width).min(n);
            let end = (start + 2 * width).min(n);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                // right side wins only when strictly smaller
                if comparator.compare(&rows[src[j]], &rows[src[i]])? == Ordering::Less {
                    dst[k] = src[j];
                    j += 1;
                } else {
                    dst[k] = src[i];
                    i += 1;
                }
                k += 1;
            }
            dst[k..k + (mid - i)].copy_from_slice(&src[i..mid]);
            k += mid - i;
            dst[k..k + (end - j)].copy_from_slice(&src[j..end]);
        }
        std::mem::swap(&mut src, &mut dst);
        width *= 2;
    }

    let mut slots: Vec<Option<Row>> = rows.into_iter().map(Some).collect();
    Ok(src.into_iter().filter_map(|i| slots[i].take()).collect())
}
