//! I/O support for modal assemblies.
//!
//! This crate provides:
//! - **JSON snapshots** of an assembly, its modal coordinates and, when
//!   reduced, its reduced model (versioned, named keys)
//! - **Matlab/Octave dumps** of sparse and dense matrices for inspection

pub mod error;
mod matrix_dump;
mod snapshot;

pub use error::{IoError, Result};
pub use matrix_dump::{write_dense_matlab, write_sparse_matlab};
pub use snapshot::{
    AssemblyRecord, ItemRecord, ModalSnapshot, SNAPSHOT_SCHEMA_VERSION, load_snapshot,
    save_snapshot,
};
