//! Row sources and temporary row containers.
//!
//! The sort engine consumes a [`source::RowSource`] and spills sorted chunks
//! into containers opened through a [`container::ContainerFactory`]. Two
//! factories ship with the crate: [`scratch_container`] writes rows in the
//! [`row_file`] format to the scratch filesystem, [`memory_container`] keeps
//! them in RAM.

pub mod container;
pub mod memory_container;
pub mod row_file;
pub mod scratch_container;
pub mod source;
