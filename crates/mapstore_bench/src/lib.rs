//! Benchmarks for mapstore.
//!
//! The benchmarks live under `benches/`; this crate only carries shared
//! helpers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod utils;
