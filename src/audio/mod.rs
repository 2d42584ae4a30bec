//! Audio capture and hardware arbitration.

pub mod arbiter;
pub mod chunker;
pub mod import;

pub use arbiter::{ArbiterEvent, AudioMode, AudioSessionArbiter};
pub use chunker::{CaptureSession, CaptureState, SessionStreams};
pub use import::import_file;
