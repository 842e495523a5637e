//! Inference latency benchmarking

use std::time::Instant;

use serde::Serialize;
use tracing::info;

use super::math::{mean, std_dev};
use crate::error::{Error, Result};

/// Latency summary of a benchmark run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BenchReport {
    pub runs: usize,
    pub mean_ms: f64,
    pub std_ms: f64,
    /// Calls per second at the mean latency
    pub throughput: f64,
}

/// Time `f` over `runs` calls after `warmup_runs` untimed calls
pub fn benchmark<F>(warmup_runs: usize, runs: usize, mut f: F) -> Result<BenchReport>
where
    F: FnMut(),
{
    if runs == 0 {
        return Err(Error::must_be_positive("runs"));
    }

    for _ in 0..warmup_runs {
        f();
    }

    let mut times = Vec::with_capacity(runs);
    for _ in 0..runs {
        let start = Instant::now();
        f();
        times.push(start.elapsed().as_secs_f64() * 1000.0);
    }

    let mean_ms = mean(&times);
    let std_ms = std_dev(&times);
    let throughput = if mean_ms > 0.0 { 1000.0 / mean_ms } else { 0.0 };

    info!("Average inference time: {:.2}ms (±{:.2}ms)", mean_ms, std_ms);
    info!("Throughput: {:.2} inferences/second", throughput);

    Ok(BenchReport {
        runs,
        mean_ms,
        std_ms,
        throughput,
    })
}
