//! Utility functions

pub mod bench;
pub mod math;

pub use bench::{benchmark, BenchReport};
