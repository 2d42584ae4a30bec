//! Exclusive, priority-ordered ownership of the audio hardware.
//!
//! A stack of named claims decides which consumer (capture vs playback)
//! holds the microphone/speaker at any instant. The arbiter knows nothing
//! about the job pipeline; it only prevents two consumers from fighting
//! over hardware.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

/// Audio session modes, ordered by priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    Idle,
    PlaybackBackground,
    PlaybackForeground,
    Recording,
}

impl AudioMode {
    pub fn priority(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::PlaybackBackground => 1,
            Self::PlaybackForeground => 2,
            Self::Recording => 3,
        }
    }
}

/// Events delivered to registered owners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterEvent {
    /// The effective mode changed (a claim was pushed or popped).
    ModeChanged(AudioMode),

    /// An external interruption (e.g. a phone call) force-released all
    /// claims. Owners decide whether to resume or abandon.
    Interrupted,

    /// The interruption ended; owners may re-claim.
    InterruptionEnded,
}

#[derive(Debug, Clone)]
struct Claim {
    owner: String,
    mode: AudioMode,
}

#[derive(Default)]
struct Inner {
    claims: Vec<Claim>,
    subscribers: HashMap<String, mpsc::UnboundedSender<ArbiterEvent>>,
    interrupted: bool,
}

impl Inner {
    fn effective_mode(&self) -> AudioMode {
        self.claims
            .iter()
            .map(|c| c.mode)
            .max_by_key(|m| m.priority())
            .unwrap_or(AudioMode::Idle)
    }

    fn notify_all(&mut self, event: ArbiterEvent) {
        // Drop subscribers whose receiver is gone.
        self.subscribers.retain(|_, tx| tx.send(event).is_ok());
    }
}

/// The audio session arbiter.
pub struct AudioSessionArbiter {
    inner: Mutex<Inner>,
}

impl Default for AudioSessionArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSessionArbiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an owner for interruption/mode notifications.
    pub fn register(&self, owner: impl Into<String>) -> mpsc::UnboundedReceiver<ArbiterEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.insert(owner.into(), tx);
        rx
    }

    /// Push a claim. Re-claiming the same mode by the same owner is a
    /// no-op; claiming a different mode replaces the owner's claim.
    /// Returns the new effective mode.
    pub fn claim(&self, mode: AudioMode, owner: &str) -> PipelineResult<AudioMode> {
        let mut inner = self.lock();
        if inner.interrupted {
            return Err(PipelineError::HardwareInterrupted(
                "audio session interrupted".into(),
            ));
        }

        let before = inner.effective_mode();
        if let Some(existing) = inner.claims.iter_mut().find(|c| c.owner == owner) {
            if existing.mode == mode {
                return Ok(before);
            }
            existing.mode = mode;
        } else {
            inner.claims.push(Claim {
                owner: owner.to_string(),
                mode,
            });
        }

        let after = inner.effective_mode();
        debug!(owner, ?mode, effective = ?after, "audio claim");
        if after != before {
            inner.notify_all(ArbiterEvent::ModeChanged(after));
        }
        Ok(after)
    }

    /// Pop an owner's claim; the effective mode reverts to the highest
    /// remaining claim. Releasing without a claim is a no-op.
    pub fn release(&self, owner: &str) -> AudioMode {
        let mut inner = self.lock();
        let before = inner.effective_mode();
        inner.claims.retain(|c| c.owner != owner);
        let after = inner.effective_mode();
        debug!(owner, effective = ?after, "audio release");
        if after != before {
            inner.notify_all(ArbiterEvent::ModeChanged(after));
        }
        after
    }

    /// The currently configured mode: highest priority among claims.
    pub fn effective_mode(&self) -> AudioMode {
        self.lock().effective_mode()
    }

    /// Whether the named owner currently holds the effective mode.
    pub fn is_owner_active(&self, owner: &str) -> bool {
        let inner = self.lock();
        let effective = inner.effective_mode();
        inner
            .claims
            .iter()
            .any(|c| c.owner == owner && c.mode == effective)
    }

    /// An external interruption began: force-release every claim and
    /// notify all registered owners.
    pub fn begin_interruption(&self) {
        let mut inner = self.lock();
        info!("audio session interrupted, releasing all claims");
        inner.interrupted = true;
        inner.claims.clear();
        inner.notify_all(ArbiterEvent::Interrupted);
    }

    /// The interruption ended; owners may re-claim.
    pub fn end_interruption(&self) {
        let mut inner = self.lock();
        inner.interrupted = false;
        inner.notify_all(ArbiterEvent::InterruptionEnded);
    }
}
