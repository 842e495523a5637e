//! Inference utilities configuration

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub bench: BenchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    /// Per-task deadline for async parallel dispatch; 0 disables it
    pub task_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub warmup_runs: usize,
    pub runs: usize,
    pub sample_count: usize,
    pub image_size: usize,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    /// Reject sizes that would make the utilities degenerate
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("batch.batch_size", self.batch.batch_size),
            ("batch.max_workers", self.batch.max_workers),
            ("cache.max_size", self.cache.max_size),
            ("bench.runs", self.bench.runs),
            ("bench.sample_count", self.bench.sample_count),
            ("bench.image_size", self.bench.image_size),
        ];

        for (field, value) in checks {
            if value == 0 {
                return Err(Error::must_be_positive(field));
            }
        }
        Ok(())
    }
}

impl BatchConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            max_workers: 4,
            task_timeout_ms: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_size: 1000 }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            warmup_runs: 10,
            runs: 100,
            sample_count: 64,
            image_size: 112,
        }
    }
}
