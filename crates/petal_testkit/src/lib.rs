//! # PetalDB Testkit
//!
//! Test utilities for PetalDB.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - A model-checking harness that mirrors every command in plain collections
//! - Crash simulation on segment files
//! - Fuzz testing harnesses
//! - Stress testing utilities
//! - Entry format test vectors
//! - End-to-end scenarios
//!
//! ## Usage
//!
//! ```rust,ignore
//! use petal_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         db.set(b"k", b"v").unwrap();
//!         assert_eq!(db.get(b"k").unwrap(), b"v");
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod integration;
pub mod stress;
pub mod vectors;

#[cfg(test)]
mod end_to_end;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use crate::vectors::*;
}

pub use crash::*;
pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
pub use vectors::*;
