pub mod config;
pub mod metrics;
pub mod model;
pub mod train;

pub use config::{Config, Overrides};
pub use metrics::{Snapshot, Window};
pub use model::{Batch, LinearClassifier, Model};
pub use train::{run, RunConfig};
