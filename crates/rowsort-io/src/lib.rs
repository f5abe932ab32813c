//! Storage backends for temporary row containers.
//!
//! [`vfs`] defines the file handles; [`scratch_fs`]
//! provides the reference-counted store that spilled chunks live in.

pub mod scratch_fs;
pub mod vfs;
