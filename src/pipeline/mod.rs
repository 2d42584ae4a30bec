//! Job pipeline: the durable state machine, its worker pool, retry
//! policy and progress fan-out.

pub mod progress;
pub mod queue;
pub mod retry;

pub use progress::{overall_fraction, ProgressHub, ProgressUpdate};
pub use queue::{remote_key, PipelineDeps, ProcessingJobQueue};
