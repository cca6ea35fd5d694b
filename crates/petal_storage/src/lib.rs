//! # PetalDB Storage
//!
//! Storage backend trait and implementations for PetalDB.
//!
//! This crate provides the lowest-level storage abstraction for PetalDB.
//! Storage backends are **opaque byte stores** - they do not interpret
//! the data they store. Every log segment of the database sits on exactly
//! one backend.
//!
//! ## Design Principles
//!
//! - Backends are simple byte stores (read, append, flush, sync)
//! - No knowledge of PetalDB entry formats or data types
//! - Must be `Send + Sync` for concurrent access
//! - PetalDB core owns all file format interpretation
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - Writes through an OS file handle
//! - [`MmapBackend`] - Writes through a memory-mapped, pre-sized file
//! - [`InMemoryBackend`] - For testing and ephemeral databases
//!
//! The file and mmap backends are interchangeable: a file written by one can
//! be reopened by the other once the caller has truncated it to its valid
//! length.
//!
//! ## Example
//!
//! ```rust
//! use petal_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod mmap;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use mmap::MmapBackend;
