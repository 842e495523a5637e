//! Chunked batch execution
//!
//! Splits an input sequence into fixed-size chunks and hands each chunk to a
//! batch function, so a model can run one forward pass per chunk instead of
//! one per item.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::error::{Error, Result};

/// Failure of a whole `process_batch` call
#[derive(Debug, Error)]
pub enum BatchError<E> {
    /// The batch function failed; `source` is its error, untouched
    #[error("batch compute failed on chunk {chunk}")]
    Compute {
        chunk: usize,
        #[source]
        source: E,
    },

    #[error("chunk {chunk} produced {actual} results for {expected} items")]
    LengthMismatch {
        chunk: usize,
        expected: usize,
        actual: usize,
    },
}

impl<E> BatchError<E> {
    /// Index of the chunk that aborted the call
    pub fn chunk(&self) -> usize {
        match self {
            BatchError::Compute { chunk, .. } | BatchError::LengthMismatch { chunk, .. } => *chunk,
        }
    }

    /// The batch function's own error, if that is what aborted the call
    pub fn into_compute_error(self) -> Option<E> {
        match self {
            BatchError::Compute { source, .. } => Some(source),
            BatchError::LengthMismatch { .. } => None,
        }
    }
}

/// Batch and parallel executor for per-item compute functions
///
/// `process_batch` is synchronous and runs chunks one after another on the
/// calling thread. The parallel variants live in `engine::pool`.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    pub(crate) batch_size: usize,
    pub(crate) max_workers: usize,
    pub(crate) task_timeout: Option<Duration>,
}

impl BatchProcessor {
    /// Create a new processor; both sizes must be positive
    pub fn new(batch_size: usize, max_workers: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::must_be_positive("batch_size"));
        }
        if max_workers == 0 {
            return Err(Error::must_be_positive("max_workers"));
        }

        Ok(Self {
            batch_size,
            max_workers,
            task_timeout: None,
        })
    }

    pub fn from_config(config: &BatchConfig) -> Result<Self> {
        let mut processor = Self::new(config.batch_size, config.max_workers)?;
        processor.task_timeout = config.task_timeout();
        Ok(processor)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Per-task deadline used by default for async parallel dispatch
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout
    }

    /// Process `items` chunk by chunk
    ///
    /// `batch_fn` receives each chunk in order and must return one result per
    /// chunk item. Results are concatenated in input order. The first failing
    /// chunk aborts the call and nothing computed so far is returned.
    pub fn process_batch<T, R, E, F>(
        &self,
        items: &[T],
        mut batch_fn: F,
    ) -> std::result::Result<Vec<R>, BatchError<E>>
    where
        F: FnMut(&[T]) -> std::result::Result<Vec<R>, E>,
    {
        let mut results = Vec::with_capacity(items.len());

        for (chunk, batch) in items.chunks(self.batch_size).enumerate() {
            debug!("Processing chunk {} ({} items)", chunk, batch.len());

            let batch_results =
                batch_fn(batch).map_err(|source| BatchError::Compute { chunk, source })?;

            if batch_results.len() != batch.len() {
                warn!(
                    "Chunk {} returned {} results for {} items",
                    chunk,
                    batch_results.len(),
                    batch.len()
                );
                return Err(BatchError::LengthMismatch {
                    chunk,
                    expected: batch.len(),
                    actual: batch_results.len(),
                });
            }

            results.extend(batch_results);
        }

        Ok(results)
    }
}
