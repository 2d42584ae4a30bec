//! Local durable store.
//!
//! SQLite is the single source of truth for job state: every status
//! transition is written here before any caller-visible change.

mod db;

pub use db::{SearchHit, Store};
