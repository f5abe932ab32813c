//! External merge sort engine.
//!
//! The sort runs in two phases. [`chunk_builder`] reads the input into
//! sorted chunks, spilling to containers whenever [`memory`] reports
//! pressure. [`merge`] then combines the chunks with a bounded fan-in until
//! one sorted result remains.

pub mod chunk;
pub mod chunk_builder;
pub mod comparator;
pub mod memory;
pub mod merge;
pub mod monitor;
pub mod plan;
