//! Batch, parallel and cached execution helpers for vision inference services

pub mod config;
pub mod engine;
pub mod error;
pub mod utils;

pub use config::Config;
pub use engine::{BatchProcessor, InferenceCache};
pub use error::{Error, Result};
