//! Offline-first sync: push/pull of metadata, segment audio transfer and
//! the bounded playback cache.

pub mod cache;
pub mod engine;

pub use cache::AudioCache;
pub use engine::{SyncEngine, SyncReport};
