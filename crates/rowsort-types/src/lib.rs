//! Core value types shared by every rowsort crate.
//!
//! A [`row::Row`] is an immutable tuple of [`cell::Cell`]s plus a unique
//! [`row::RowKey`]. The sort engine never looks inside cells itself; it only
//! hands rows to a comparator and, when spilling, to [`serialization`].

pub mod cell;
pub mod error;
pub mod row;
pub mod serialization;
