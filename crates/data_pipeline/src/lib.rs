pub mod cancel;
pub mod discover;
pub mod error;
pub mod sampler;
pub mod webdataset;

pub use cancel::CancelToken;
pub use discover::{discover_by_root, discover_shards};
pub use error::PipelineError;
pub use sampler::{Sampler, SamplerOptions};
pub use webdataset::{stream_shard, Sample, DEFAULT_PENDING_CAP};
