//! Rolling training-throughput metrics.

use std::time::Duration;

/// Accumulates per-step measurements between log points.
#[derive(Debug, Default)]
pub struct Window {
    samples: usize,
    data: Duration,
    compute: Duration,
    steps: usize,
    last_loss: f64,
}

/// Aggregated view of a window, produced by [`Window::snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Snapshot {
    pub images_per_sec: f64,
    pub avg_data_ms: f64,
    pub avg_compute_ms: f64,
    pub last_loss: f64,
}

impl Window {
    /// Adds one step's measurements to the window.
    pub fn record(
        &mut self,
        batch_size: usize,
        data_time: Duration,
        compute_time: Duration,
        loss: f64,
    ) {
        self.samples += batch_size;
        self.data += data_time;
        self.compute += compute_time;
        self.steps += 1;
        self.last_loss = loss;
    }

    /// Returns the aggregated metrics and resets the window.
    pub fn snapshot(&mut self) -> Snapshot {
        let mut snap = Snapshot {
            last_loss: self.last_loss,
            ..Snapshot::default()
        };
        let total = self.data + self.compute;
        if !total.is_zero() {
            snap.images_per_sec = self.samples as f64 / total.as_secs_f64();
        }
        if self.steps > 0 {
            snap.avg_data_ms = self.data.as_secs_f64() * 1000.0 / self.steps as f64;
            snap.avg_compute_ms = self.compute.as_secs_f64() * 1000.0 / self.steps as f64;
        }
        self.samples = 0;
        self.data = Duration::ZERO;
        self.compute = Duration::ZERO;
        self.steps = 0;
        snap
    }
}
