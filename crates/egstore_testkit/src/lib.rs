//! # egstore Testkit
//!
//! Test utilities for egstore.
//!
//! This crate provides:
//! - Test fixtures with a controllable clock
//! - Property-based test generators using proptest
//! - A model-checking harness that replays operations against a reference map
//! - Stress testing utilities for concurrent transactions
//!
//! ## Usage
//!
//! ```rust
//! use egstore_testkit::prelude::*;
//!
//! with_datastore(|ds| {
//!     ds.put_counter(1, 5);
//!     assert_eq!(ds.counter(1), Some(5));
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
