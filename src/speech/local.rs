//! On-device speech through a synthesis command (espeak-ng compatible).

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::{SpeechBackend, SpeechOutcome, SpeechParams};
use crate::error::NarrationError;
use crate::voice::VoiceHandle;

/// espeak-ng words per minute at rate 1.0.
const BASE_WPM: f32 = 175.0;

pub struct LocalSpeechBackend {
    program: String,
    cancel: Notify,
}

impl LocalSpeechBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            cancel: Notify::new(),
        }
    }

    fn command(&self, text: &str, voice: &VoiceHandle, params: &SpeechParams) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(name) = voice.name() {
            command.arg("-v").arg(name);
        }
        command
            .args(espeak_args(params))
            .arg("--")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// Map neutral-1.0 prosody onto espeak-ng's ranges.
fn espeak_args(params: &SpeechParams) -> Vec<String> {
    let wpm = (BASE_WPM * params.rate).clamp(80.0, 450.0).round() as u32;
    let pitch = (50.0 * params.pitch).clamp(0.0, 99.0).round() as u32;
    let amplitude = (100.0 * params.volume).clamp(0.0, 200.0).round() as u32;
    vec![
        "-s".into(),
        wpm.to_string(),
        "-p".into(),
        pitch.to_string(),
        "-a".into(),
        amplitude.to_string(),
    ]
}

#[async_trait]
impl SpeechBackend for LocalSpeechBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn speak(&self, text: &str, voice: &VoiceHandle, params: &SpeechParams) -> SpeechOutcome {
        if text.trim().is_empty() {
            return SpeechOutcome::failed(NarrationError::EmptyUtterance.to_string());
        }

        let mut child = match self.command(text, voice, params).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Cannot start {}: {e}", self.program);
                return SpeechOutcome::failed(format!("failed to start {}: {e}", self.program));
            }
        };
        debug!("{} speaking {} chars", self.program, text.len());

        tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => SpeechOutcome::Completed,
                Ok(status) => SpeechOutcome::failed(format!("{} exited with {status}", self.program)),
                Err(e) => SpeechOutcome::failed(format!("{} wait failed: {e}", self.program)),
            },
            _ = self.cancel.notified() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to stop {}: {e}", self.program);
                }
                SpeechOutcome::Cancelled
            }
        }
    }

    fn cancel(&self) {
        self.cancel.notify_waiters();
    }
}
