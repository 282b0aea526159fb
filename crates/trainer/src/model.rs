//! Toy linear classifier trained with softmax cross-entropy SGD.
//!
//! The model exists to give the data pipeline a realistic consumer; it is
//! deliberately tiny and runs on plain `f64` vectors.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A minibatch of feature vectors and integer labels.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub inputs: Vec<Vec<f64>>,
    pub labels: Vec<i64>,
}

/// Minimal training surface required by the loop.
pub trait Model {
    /// Runs one optimization step and returns the batch-average loss.
    fn train_step(&mut self, batch: &Batch) -> f64;
}

/// One dense layer plus softmax, updated in place with SGD.
pub struct LinearClassifier {
    num_classes: usize,
    input_size: usize,
    weights: Vec<f64>,
    bias: Vec<f64>,
    lr: f64,
}

impl LinearClassifier {
    /// Constructs the model with seeded uniform initialization in ±0.01.
    /// Zero sizes and a non-positive learning rate fall back to defaults.
    pub fn new(num_classes: usize, input_size: usize, lr: f64, seed: u64) -> Self {
        let num_classes = if num_classes == 0 { 10 } else { num_classes };
        let input_size = if input_size == 0 { 64 } else { input_size };
        let lr = if lr <= 0.0 { 0.01 } else { lr };

        let mut rng = StdRng::seed_from_u64(seed);
        let weights = (0..num_classes * input_size)
            .map(|_| (rng.random::<f64>() * 2.0 - 1.0) * 0.01)
            .collect();

        Self {
            num_classes,
            input_size,
            weights,
            bias: vec![0.0; num_classes],
            lr,
        }
    }
}

impl Model for LinearClassifier {
    fn train_step(&mut self, batch: &Batch) -> f64 {
        if batch.inputs.is_empty() {
            return 0.0;
        }
        let mut total_loss = 0.0;
        for (input, &raw_label) in batch.inputs.iter().zip(&batch.labels) {
            // feature vectors of the wrong width are skipped, not fatal
            if input.len() != self.input_size {
                continue;
            }
            let label = raw_label.rem_euclid(self.num_classes as i64) as usize;

            let mut logits = vec![0.0; self.num_classes];
            for (class, logit) in logits.iter_mut().enumerate() {
                let start = class * self.input_size;
                let mut sum = self.bias[class];
                for (weight, feature) in self.weights[start..start + self.input_size]
                    .iter()
                    .zip(input)
                {
                    sum += weight * feature;
                }
                *logit = sum;
            }
            let mut probs = softmax(&logits);
            total_loss += -probs[label].max(1e-9).ln();

            probs[label] -= 1.0;
            for (class, &grad) in probs.iter().enumerate() {
                self.bias[class] -= self.lr * grad;
                let start = class * self.input_size;
                for (weight, feature) in self.weights[start..start + self.input_size]
                    .iter_mut()
                    .zip(input)
                {
                    *weight -= self.lr * grad * feature;
                }
            }
        }
        total_loss / batch.inputs.len() as f64
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max_logit = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut out: Vec<f64> = logits.iter().map(|v| (v - max_logit).exp()).collect();
    let sum: f64 = out.iter().sum();
    let inv = 1.0 / sum;
    for v in out.iter_mut() {
        *v *= inv;
    }
    out
}
