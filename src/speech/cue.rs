//! Audible cue between posts.

use std::time::Duration;

use async_trait::async_trait;
use rodio::source::{SineWave, Source};
use rodio::{OutputStreamBuilder, Sink};
use tracing::debug;

#[async_trait]
pub trait CuePlayer: Send + Sync {
    /// Play the cue to completion. Failures are swallowed; a missing cue
    /// never blocks narration.
    async fn play(&self);
}

/// Short low-volume sine beep through the default output device.
pub struct ToneCue {
    frequency: f32,
    duration: Duration,
    amplitude: f32,
}

impl Default for ToneCue {
    fn default() -> Self {
        Self {
            frequency: 800.0,
            duration: Duration::from_millis(100),
            amplitude: 0.1,
        }
    }
}

#[async_trait]
impl CuePlayer for ToneCue {
    async fn play(&self) {
        let (frequency, duration, amplitude) = (self.frequency, self.duration, self.amplitude);
        let result = tokio::task::spawn_blocking(move || -> Result<(), String> {
            let stream = OutputStreamBuilder::open_default_stream()
                .map_err(|e| format!("Failed to open audio output: {e}"))?;
            let sink = Sink::connect_new(stream.mixer());
            sink.append(
                SineWave::new(frequency)
                    .take_duration(duration)
                    .amplify(amplitude),
            );
            sink.sleep_until_end();
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Could not play cue: {e}"),
            Err(e) => debug!("Cue task failed: {e}"),
        }
    }
}

/// No cue at all.
pub struct SilentCue;

#[async_trait]
impl CuePlayer for SilentCue {
    async fn play(&self) {}
}
