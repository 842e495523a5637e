//! Inference execution helpers
//!
//! - Chunked batch execution
//! - Parallel dispatch over a bounded worker pool
//! - LRU caching of inference results

pub mod batch;
pub mod cache;
pub mod pool;
pub mod tensor;

pub use batch::{BatchError, BatchProcessor};
pub use cache::{CacheStats, InferenceCache, SharedInferenceCache};
pub use pool::{CancelToken, FailureKind, ItemFailure, ItemResult, ParallelOptions};
pub use tensor::stack_batch;
