//! Remote neural TTS over HTTP.
//!
//! Pipeline:
//! 1. Wait out the minimum call spacing (adaptive, doubles on rate limits)
//! 2. POST text + voice + prosody → encoded audio bytes
//! 3. Decode and play through a rodio Sink with cancellation

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rodio::{Decoder, OutputStreamBuilder, Sink};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{SpeechBackend, SpeechOutcome, SpeechParams};
use crate::config::RemoteConfig;
use crate::error::{FailureKind, NarrationError};
use crate::voice::VoiceHandle;

/// Longest text accepted by the synthesis service.
const MAX_REMOTE_CHARS: usize = 3000;

/// Minimum spacing between remote calls, doubled on rate-limit failures.
#[derive(Debug, Clone)]
pub struct CallSpacing {
    default: Duration,
    max: Duration,
    current: Duration,
    last_call: Option<Instant>,
}

impl CallSpacing {
    pub fn new(default: Duration, max: Duration) -> Self {
        Self {
            default,
            max: max.max(default),
            current: default,
            last_call: None,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// How long a call arriving at `now` must wait. Zero if it may go now.
    pub fn wait_at(&self, now: Instant) -> Duration {
        match self.last_call {
            Some(last) => self.current.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn mark_call(&mut self, now: Instant) {
        self.last_call = Some(now);
    }

    pub fn on_rate_limited(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    pub fn on_success(&mut self) {
        self.current = self.default;
    }
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<&'a str>,
    engine: &'a str,
    speed: f32,
    pitch: f32,
    volume: f32,
}

pub struct RemoteSpeechBackend {
    endpoint: String,
    engine: String,
    client: Client,
    spacing: Mutex<CallSpacing>,
    /// Cancel flag of the current utterance; replaced on every `speak`.
    cancel_flag: Mutex<Arc<AtomicBool>>,
}

impl RemoteSpeechBackend {
    pub fn new(config: &RemoteConfig) -> Result<Self, NarrationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NarrationError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            engine: config.engine.clone(),
            client,
            spacing: Mutex::new(CallSpacing::new(
                Duration::from_millis(config.min_interval_ms),
                Duration::from_millis(config.max_interval_ms),
            )),
            cancel_flag: Mutex::new(Arc::new(AtomicBool::new(false))),
        })
    }

    fn spacing(&self) -> std::sync::MutexGuard<'_, CallSpacing> {
        self.spacing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay (never reject) until the spacing allows another call.
    async fn wait_for_slot(&self) {
        let wait = self.spacing().wait_at(Instant::now());
        if !wait.is_zero() {
            debug!("Rate limiting: waiting {}ms before remote call", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
        self.spacing().mark_call(Instant::now());
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceHandle,
        params: &SpeechParams,
    ) -> Result<Vec<u8>, (FailureKind, String)> {
        let request = SynthesisRequest {
            text,
            voice: voice.name(),
            engine: &self.engine,
            speed: params.rate,
            pitch: params.pitch,
            volume: params.volume,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_failure(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let reason = format!("HTTP {} {}", status.as_u16(), body.trim());
            let kind = FailureKind::from_status(status.as_u16())
                .unwrap_or_else(|| FailureKind::classify(&reason));
            return Err((kind, reason));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| self.transport_failure(&e))?;
        if bytes.is_empty() {
            return Err((FailureKind::Unknown, "empty audio response".to_string()));
        }
        Ok(bytes.to_vec())
    }

    fn transport_failure(&self, e: &reqwest::Error) -> (FailureKind, String) {
        if e.is_connect() {
            (
                FailureKind::Connectivity,
                format!("connection to {} failed", self.endpoint),
            )
        } else if e.is_timeout() {
            (FailureKind::Connectivity, "request timeout".to_string())
        } else if let Some(kind) = e.status().and_then(|s| FailureKind::from_status(s.as_u16())) {
            (kind, format!("request failed: {e}"))
        } else {
            let reason = format!("request failed: {e}");
            (FailureKind::classify(&reason), reason)
        }
    }

    fn fresh_cancel_flag(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        *self.cancel_flag.lock().unwrap_or_else(PoisonError::into_inner) = flag.clone();
        flag
    }

    /// Play encoded audio. Returns Ok(true) if cancelled during playback.
    async fn play_audio(&self, audio: Vec<u8>, cancel_flag: Arc<AtomicBool>) -> Result<bool, String> {
        tokio::task::spawn_blocking(move || {
            let stream = OutputStreamBuilder::open_default_stream()
                .map_err(|e| format!("Failed to open audio output: {e}"))?;
            let source = Decoder::new(Cursor::new(audio))
                .map_err(|e| format!("Failed to decode audio: {e}"))?;

            let sink = Sink::connect_new(stream.mixer());
            sink.append(source);

            loop {
                if sink.empty() {
                    return Ok(false);
                }
                if cancel_flag.load(Ordering::Relaxed) {
                    sink.stop();
                    return Ok(true);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        })
        .await
        .map_err(|e| format!("playback task failed: {e}"))?
    }
}

#[async_trait]
impl SpeechBackend for RemoteSpeechBackend {
    fn name(&self) -> &str {
        "remote"
    }

    async fn speak(&self, text: &str, voice: &VoiceHandle, params: &SpeechParams) -> SpeechOutcome {
        if text.trim().is_empty() {
            return SpeechOutcome::failed(NarrationError::EmptyUtterance.to_string());
        }
        let text: String = text.chars().take(MAX_REMOTE_CHARS).collect();

        let cancelled = self.fresh_cancel_flag();
        self.wait_for_slot().await;
        if cancelled.load(Ordering::Relaxed) {
            return SpeechOutcome::Cancelled;
        }

        let audio = match self.synthesize(&text, voice, params).await {
            Ok(audio) => audio,
            Err((kind, reason)) => {
                if kind == FailureKind::RateLimit {
                    let mut spacing = self.spacing();
                    spacing.on_rate_limited();
                    warn!(
                        "Remote TTS rate limited, spacing raised to {}ms",
                        spacing.current().as_millis()
                    );
                }
                return SpeechOutcome::Failed { kind, reason };
            }
        };

        {
            let mut spacing = self.spacing();
            if spacing.current() != spacing.default {
                info!("Remote TTS recovered, spacing reset to {}ms", spacing.default.as_millis());
            }
            spacing.on_success();
        }

        if cancelled.load(Ordering::Relaxed) {
            return SpeechOutcome::Cancelled;
        }

        match self.play_audio(audio, cancelled).await {
            Ok(false) => SpeechOutcome::Completed,
            Ok(true) => SpeechOutcome::Cancelled,
            Err(reason) => SpeechOutcome::failed(reason),
        }
    }

    fn cancel(&self) {
        self.cancel_flag
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .store(true, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.spacing().on_success();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spacing() -> CallSpacing {
        CallSpacing::new(Duration::from_millis(2000), Duration::from_millis(10_000))
    }

    #[test]
    fn first_call_goes_immediately() {
        let s = spacing();
        assert_eq!(s.wait_at(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn early_call_is_delayed_by_remaining_spacing() {
        let mut s = spacing();
        let t0 = Instant::now();
        s.mark_call(t0);
        assert_eq!(s.wait_at(t0 + Duration::from_millis(500)), Duration::from_millis(1500));
        assert_eq!(s.wait_at(t0 + Duration::from_millis(2500)), Duration::ZERO);
    }

    #[test]
    fn rate_limits_double_up_to_max_and_success_restores_default() {
        let mut s = spacing();
        s.on_rate_limited();
        assert_eq!(s.current(), Duration::from_millis(4000));
        s.on_rate_limited();
        s.on_rate_limited();
        assert_eq!(s.current(), Duration::from_millis(10_000));
        s.on_success();
        assert_eq!(s.current(), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_as_connectivity() {
        let config = RemoteConfig {
            endpoint: "http://127.0.0.1:9/tts".into(),
            timeout_secs: 2,
            ..RemoteConfig::default()
        };
        let backend = RemoteSpeechBackend::new(&config).unwrap();
        match backend
            .speak("hello", &VoiceHandle::PlatformDefault, &SpeechParams::default())
            .await
        {
            SpeechOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::Connectivity),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    /// Answer a single HTTP request on a local port with `status` and `body`.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/tts")
    }

    async fn speak_against(endpoint: String) -> (SpeechOutcome, Duration) {
        let config = RemoteConfig {
            endpoint,
            timeout_secs: 5,
            ..RemoteConfig::default()
        };
        let backend = RemoteSpeechBackend::new(&config).unwrap();
        let outcome = backend
            .speak("hello", &VoiceHandle::PlatformDefault, &SpeechParams::default())
            .await;
        let spacing = backend.spacing().current();
        (outcome, spacing)
    }

    #[tokio::test]
    async fn server_error_wording_does_not_trigger_backoff() {
        let endpoint = serve_once("500 Internal Server Error", "failed to generate audio").await;
        let (outcome, spacing) = speak_against(endpoint).await;
        match outcome {
            SpeechOutcome::Failed { kind, reason } => {
                assert_eq!(kind, FailureKind::Unknown);
                assert!(reason.starts_with("HTTP 500"), "{reason}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(spacing, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn too_many_requests_doubles_spacing() {
        let endpoint = serve_once("429 Too Many Requests", "slow down").await;
        let (outcome, spacing) = speak_against(endpoint).await;
        assert!(matches!(
            outcome,
            SpeechOutcome::Failed {
                kind: FailureKind::RateLimit,
                ..
            }
        ));
        assert_eq!(spacing, Duration::from_millis(4000));
    }
}
