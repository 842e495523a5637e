//! Vision inference throughput bench
//!
//! Runs a synthetic embedding workload through the batch, parallel and
//! cached execution paths and logs what each one costs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

use anyhow::Result;
use ndarray::Array3;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use vision_infer::config::Config;
use vision_infer::engine::{
    stack_batch, tensor::batch_means, BatchProcessor, InferenceCache, ParallelOptions,
};
use vision_infer::utils::benchmark;

/// Stand-in for an embedding model: a few summary features per image
fn embed(image: &Array3<f32>) -> Vec<f32> {
    let mean = image.mean().unwrap_or(0.0);
    let max = image.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let min = image.iter().cloned().fold(f32::INFINITY, f32::min);
    vec![mean, max, min]
}

/// Caller-side cache key; images are synthetic so the fill value identifies them
fn fingerprint(image: &Array3<f32>) -> u64 {
    let mut hasher = DefaultHasher::new();
    image.shape().hash(&mut hasher);
    for v in image.iter().step_by(97) {
        v.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

fn synthetic_images(count: usize, size: usize) -> Vec<Array3<f32>> {
    // Repeat every 8th image so the cache has something to hit
    (0..count)
        .map(|i| Array3::from_elem((3, size, size), (i % 8) as f32 / 8.0))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting vision-infer bench v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(Config::default_path()).unwrap_or_else(|e| {
        info!("Using default config ({})", e);
        Config::default()
    });
    config.validate()?;

    info!("Configuration loaded:");
    info!("  Batch size: {}", config.batch.batch_size);
    info!("  Max workers: {}", config.batch.max_workers);
    info!("  Task timeout: {:?}", config.batch.task_timeout());
    info!("  Cache size: {}", config.cache.max_size);

    let processor = BatchProcessor::from_config(&config.batch)?;
    let images = synthetic_images(config.bench.sample_count, config.bench.image_size);

    // Chunked: one stacked tensor per chunk
    let batched = processor.process_batch(&images, |chunk| {
        let batch = stack_batch(chunk)?;
        Ok::<_, vision_infer::Error>(batch_means(&batch))
    })?;
    info!("Batched inference produced {} results", batched.len());

    let report = benchmark(config.bench.warmup_runs, config.bench.runs, || {
        if let Err(e) = processor.process_batch(&images, |chunk| {
            stack_batch(chunk).map(|batch| batch_means(&batch))
        }) {
            warn!("Batch run failed: {}", e);
        }
    })?;
    info!(
        "Batched pass over {} images: {:.2}ms mean",
        images.len(),
        report.mean_ms
    );

    // Parallel on the blocking pool
    let start = Instant::now();
    let results = processor.process_parallel(images.clone(), |image| {
        Ok::<_, vision_infer::Error>(embed(&image))
    });
    let failed = results.iter().filter(|r| r.is_err()).count();
    info!(
        "Parallel inference: {} ok, {} failed in {:?}",
        results.len() - failed,
        failed,
        start.elapsed()
    );

    // Parallel with deadlines
    let options = ParallelOptions {
        task_timeout: processor.task_timeout(),
        ..ParallelOptions::default()
    };
    let start = Instant::now();
    let results = processor
        .process_parallel_async(
            images.clone(),
            |image| Ok::<_, vision_infer::Error>(embed(&image)),
            options,
        )
        .await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    info!(
        "Async parallel inference: {} ok, {} failed in {:?}",
        results.len() - failed,
        failed,
        start.elapsed()
    );

    // Cache-fronted inference
    let mut cache = InferenceCache::new(config.cache.max_size)?;
    let start = Instant::now();
    for image in &images {
        cache.get_or_insert_with(fingerprint(image), || embed(image));
    }
    let stats = cache.stats();
    info!(
        "Cached inference: {} hits, {} misses ({:.1}% hit rate) in {:?}",
        stats.hits,
        stats.misses,
        stats.hit_rate() * 100.0,
        start.elapsed()
    );

    info!("Done");
    Ok(())
}
