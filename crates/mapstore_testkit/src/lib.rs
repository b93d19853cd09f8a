//! # mapstore testkit
//!
//! Test utilities for mapstore.
//!
//! This crate provides:
//! - Runtime and store fixtures, plus a release-counting engine decorator
//! - Property-based test generators using proptest
//! - A model-checking harness for operation sequences
//! - Stress testing utilities for pools and shared handles
//!
//! ## Usage
//!
//! ```rust
//! use mapstore_core::MapStore;
//! use mapstore_testkit::prelude::*;
//!
//! with_temp_store(|store| {
//!     store.store_str("key", "value", mapstore_core::StoreMode::Insert).unwrap();
//!     assert_eq!(store.fetch_str("key").unwrap(), "value");
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
