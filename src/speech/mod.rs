//! Speech backends and the selector that arbitrates between them.
//!
//! Components:
//! - `local`: on-device synthesis through a speech command (espeak-ng)
//! - `remote`: HTTP synthesis service + rodio playback, with call spacing
//! - `selector`: remote-first dispatch with a circuit breaker and local fallback
//! - `cue`: the short tone played between posts

pub mod cue;
pub mod local;
pub mod remote;
pub mod selector;

use async_trait::async_trait;

use crate::config::SpeechConfig;
use crate::error::FailureKind;
use crate::voice::VoiceHandle;

/// Prosody for one utterance. 1.0 is the backend's neutral value for each.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechParams {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

impl From<&SpeechConfig> for SpeechParams {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            rate: config.rate,
            pitch: config.pitch,
            volume: config.volume,
        }
    }
}

/// Exactly one outcome is produced per `speak` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    Completed,
    Failed { kind: FailureKind, reason: String },
    /// Stopped by `cancel()`; not a backend fault.
    Cancelled,
}

impl SpeechOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::Failed {
            kind: FailureKind::classify(&reason),
            reason,
        }
    }
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Speak `text` to completion. Empty text is rejected as a failure.
    async fn speak(&self, text: &str, voice: &VoiceHandle, params: &SpeechParams) -> SpeechOutcome;

    /// Request the in-flight utterance to stop. Takes effect cooperatively.
    fn cancel(&self);

    /// Drop any adaptive state (e.g. backoff) after an explicit user reset.
    fn reset(&self) {}
}
