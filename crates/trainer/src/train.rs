//! The training loop.
//!
//! Pulls ordered samples from the sampler pipeline, turns them into fixed
//! width feature vectors, and feeds the classifier, recording throughput
//! between log points. A pipeline error is run-fatal; a cancellation is a
//! clean stop.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use crossbeam_channel::RecvTimeoutError;
use tracing::info;

use data_pipeline::{CancelToken, PipelineError, Sampler, SamplerOptions};

use crate::metrics::Window;
use crate::model::{Batch, LinearClassifier, Model};

const FEATURE_GRID: u32 = 16;
/// Width of the flattened feature vector fed to the classifier.
pub const FEATURE_SIZE: usize = (FEATURE_GRID * FEATURE_GRID) as usize;
/// Label space of the demo classifier; sample labels are wrapped into it.
pub const NUM_CLASSES: usize = 1000;

const LEARNING_RATE: f64 = 0.05;
const SAMPLE_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Knobs for one training run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub roots: BTreeMap<String, Vec<PathBuf>>,
    pub steps: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub log_every: usize,
    pub seed: u64,
}

/// Executes the training workload.
///
/// A cancellation raised through `token` (Ctrl-C, or the caller) ends the
/// run cleanly with an info log rather than an error.
pub fn run(cfg: RunConfig, token: CancelToken) -> Result<()> {
    ensure!(cfg.steps > 0, "steps must be > 0");
    ensure!(cfg.batch_size > 0, "batch size must be > 0");
    let log_every = if cfg.log_every == 0 { 50 } else { cfg.log_every };

    let options = SamplerOptions::builder()
        .roots(cfg.roots)
        .seed(cfg.seed)
        .num_workers(cfg.num_workers)
        .build();
    let sampler = Sampler::start(options, token.clone()).context("start sampler")?;

    let mut model = LinearClassifier::new(NUM_CLASSES, FEATURE_SIZE, LEARNING_RATE, cfg.seed);
    let mut window = Window::default();

    for step in 1..=cfg.steps {
        let data_start = Instant::now();
        let batch = match next_batch(&sampler, cfg.batch_size, &token) {
            Ok(batch) => batch,
            Err(err) => {
                if err
                    .downcast_ref::<PipelineError>()
                    .is_some_and(PipelineError::is_cancellation)
                {
                    info!(step, "training interrupted, stopping cleanly");
                    return Ok(());
                }
                return Err(err).with_context(|| format!("acquire batch at step {step}"));
            }
        };
        let data_time = data_start.elapsed();

        let compute_start = Instant::now();
        let loss = model.train_step(&batch);
        let compute_time = compute_start.elapsed();

        window.record(cfg.batch_size, data_time, compute_time, loss);

        if step % log_every == 0 {
            let snap = window.snapshot();
            info!(
                step,
                images_per_sec = snap.images_per_sec,
                data_ms = snap.avg_data_ms,
                compute_ms = snap.avg_compute_ms,
                loss = snap.last_loss,
                "training progress"
            );
        }
    }

    Ok(())
}

/// Blocks until a full batch is assembled. The error channel is consulted
/// first so a fatal shard error surfaces before more samples are taken.
fn next_batch(sampler: &Sampler, batch_size: usize, token: &CancelToken) -> Result<Batch> {
    let mut inputs = Vec::with_capacity(batch_size);
    let mut labels = Vec::with_capacity(batch_size);
    while inputs.len() < batch_size {
        if token.is_cancelled() {
            bail!(PipelineError::Cancelled);
        }
        if let Ok(err) = sampler.errors().try_recv() {
            return Err(err.into());
        }
        match sampler.samples().recv_timeout(SAMPLE_RECV_TIMEOUT) {
            Ok(sample) => {
                // undecodable images are skipped rather than failing the run
                let Ok(features) = extract_features(&sample.image) else {
                    continue;
                };
                inputs.push(features);
                labels.push(clamp_label(sample.label));
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                // the pipeline wound down; the error channel tells us why
                if let Ok(err) = sampler.errors().try_recv() {
                    return Err(err.into());
                }
                bail!(PipelineError::Cancelled);
            }
        }
    }
    Ok(Batch { inputs, labels })
}

/// Decodes `raw` and samples a `FEATURE_GRID` × `FEATURE_GRID` grid of
/// mean-RGB intensities in `[0, 1]`.
fn extract_features(raw: &[u8]) -> Result<Vec<f64>> {
    let image = image::load_from_memory(raw).context("decode image")?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    ensure!(width > 0 && height > 0, "empty image");

    let step_x = width as f64 / FEATURE_GRID as f64;
    let step_y = height as f64 / FEATURE_GRID as f64;
    let mut features = Vec::with_capacity(FEATURE_SIZE);
    for gy in 0..FEATURE_GRID {
        for gx in 0..FEATURE_GRID {
            let px = ((gx as f64 * step_x) as u32).min(width - 1);
            let py = ((gy as f64 * step_y) as u32).min(height - 1);
            let [r, g, b] = rgb.get_pixel(px, py).0;
            features.push((r as f64 + g as f64 + b as f64) / (3.0 * 255.0));
        }
    }
    Ok(features)
}

fn clamp_label(label: i64) -> i64 {
    if label < 0 {
        0
    } else {
        label % NUM_CLASSES as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat};
    use std::io::Cursor;

    fn gradient_png(size: u32) -> Vec<u8> {
        let mut img = GrayImage::new(size, size);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            pixel.0 = [((x + y) % 255) as u8];
        }
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn extract_features_yields_a_full_grid_in_range() {
        let features = extract_features(&gradient_png(FEATURE_GRID)).unwrap();
        assert_eq!(features.len(), FEATURE_SIZE);
        assert!(features.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn extract_features_handles_sizes_other_than_the_grid() {
        for size in [1, 7, 64] {
            let features = extract_features(&gradient_png(size)).unwrap();
            assert_eq!(features.len(), FEATURE_SIZE);
        }
    }

    #[test]
    fn garbage_bytes_are_not_an_image() {
        assert!(extract_features(b"definitely not an image").is_err());
    }

    #[test]
    fn labels_clamp_into_the_class_range() {
        assert_eq!(clamp_label(-5), 0);
        assert_eq!(clamp_label(7), 7);
        assert_eq!(clamp_label(1000), 0);
        assert_eq!(clamp_label(2345), 345);
    }
}
