//! Remote-first speech dispatch with a circuit breaker.
//!
//! Every remote failure is counted and the utterance is immediately
//! re-spoken locally. After `max_failures` consecutive failures the remote
//! path is disabled until `reenable()` is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tracing::{info, warn};

use super::{SpeechBackend, SpeechOutcome, SpeechParams};
use crate::error::{FailureKind, NarrationError};
use crate::events::{BackendHealth, EventHub, Notice, SessionEvent};
use crate::voice::VoiceHandle;

pub struct BackendSelector {
    remote: Option<Arc<dyn SpeechBackend>>,
    local: Arc<dyn SpeechBackend>,
    use_remote: AtomicBool,
    max_failures: u32,
    health: Mutex<BackendHealth>,
    events: EventHub,
}

impl BackendSelector {
    /// `remote` is `None` when the remote capability was not detected at
    /// startup; it is never checked again.
    pub fn new(
        remote: Option<Arc<dyn SpeechBackend>>,
        local: Arc<dyn SpeechBackend>,
        max_failures: u32,
        events: EventHub,
    ) -> Self {
        let use_remote = AtomicBool::new(remote.is_some());
        Self {
            remote,
            local,
            use_remote,
            max_failures: max_failures.max(1),
            health: Mutex::new(BackendHealth::default()),
            events,
        }
    }

    fn health_mut(&self) -> MutexGuard<'_, BackendHealth> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn health(&self) -> BackendHealth {
        self.health_mut().clone()
    }

    /// User preference; has no effect without the remote capability.
    pub fn set_remote_enabled(&self, enabled: bool) {
        let Some(remote) = &self.remote else {
            info!("No remote speech configured, staying on {} speech", self.local.name());
            return;
        };
        self.use_remote.store(enabled, Ordering::Relaxed);
        let now = if enabled { remote.name() } else { self.local.name() };
        info!("Speaking through {now} speech");
    }

    fn remote_allowed(&self) -> Option<&Arc<dyn SpeechBackend>> {
        if !self.use_remote.load(Ordering::Relaxed) || self.health_mut().disabled {
            return None;
        }
        self.remote.as_ref()
    }

    /// Speak through remote when allowed, otherwise (or on any remote
    /// failure) through local.
    pub async fn speak(&self, text: &str, voice: &VoiceHandle, params: &SpeechParams) -> SpeechOutcome {
        if let Some(remote) = self.remote_allowed() {
            self.health_mut().last_invocation = Some(Instant::now());

            match remote.speak(text, voice, params).await {
                SpeechOutcome::Completed => {
                    self.record_success();
                    return SpeechOutcome::Completed;
                }
                SpeechOutcome::Cancelled => return SpeechOutcome::Cancelled,
                SpeechOutcome::Failed { kind, reason } => {
                    self.record_failure(kind, &reason);
                    warn!("{} speech failed, falling back to {}", remote.name(), self.local.name());
                }
            }
        }

        self.local.speak(text, voice, params).await
    }

    /// Cancel whichever backend is speaking.
    pub fn cancel(&self) {
        if let Some(remote) = &self.remote {
            remote.cancel();
        }
        self.local.cancel();
    }

    /// Explicit user action: close the breaker and start counting afresh.
    pub fn reenable(&self) {
        let snapshot = {
            let mut health = self.health_mut();
            health.consecutive_failures = 0;
            health.disabled = false;
            health.clone()
        };
        if let Some(remote) = &self.remote {
            remote.reset();
        }
        info!("Remote speech failure count reset, remote re-enabled");
        self.events.notice(Notice::RemoteReenabled);
        self.events.emit(SessionEvent::BackendHealth(snapshot));
    }

    fn record_success(&self) {
        let snapshot = {
            let mut health = self.health_mut();
            if health.consecutive_failures == 0 {
                return;
            }
            info!("Remote speech working again, resetting failure count");
            health.consecutive_failures = 0;
            health.clone()
        };
        self.events.emit(SessionEvent::BackendHealth(snapshot));
    }

    fn record_failure(&self, kind: FailureKind, reason: &str) {
        let (snapshot, just_disabled) = {
            let mut health = self.health_mut();
            health.consecutive_failures += 1;
            let error = NarrationError::SpeechBackend {
                kind,
                message: reason.to_string(),
            };
            warn!("Remote speech failure #{}: {error}", health.consecutive_failures);
            let just_disabled = !health.disabled && health.consecutive_failures >= self.max_failures;
            if just_disabled {
                health.disabled = true;
            }
            (health.clone(), just_disabled)
        };

        self.events.notice(Notice::RemoteFailed {
            kind,
            message: reason.to_string(),
        });
        if just_disabled {
            warn!(
                "{}",
                NarrationError::BackendDisabled {
                    failures: snapshot.consecutive_failures
                }
            );
            self.events.notice(Notice::RemoteDisabled {
                failures: snapshot.consecutive_failures,
            });
        }
        self.events.emit(SessionEvent::BackendHealth(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Scripted {
        name: &'static str,
        fail: AtomicBool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: AtomicBool::new(fail),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpeechBackend for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn speak(&self, _: &str, _: &VoiceHandle, _: &SpeechParams) -> SpeechOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                SpeechOutcome::failed("HTTP 503 upstream error")
            } else {
                SpeechOutcome::Completed
            }
        }

        fn cancel(&self) {}
    }

    fn selector(remote: &Arc<Scripted>, local: &Arc<Scripted>, hub: EventHub) -> BackendSelector {
        BackendSelector::new(
            Some(remote.clone() as Arc<dyn SpeechBackend>),
            local.clone() as Arc<dyn SpeechBackend>,
            3,
            hub,
        )
    }

    async fn say(selector: &BackendSelector) -> SpeechOutcome {
        selector
            .speak("hello", &VoiceHandle::PlatformDefault, &SpeechParams::default())
            .await
    }

    #[tokio::test]
    async fn breaker_opens_after_three_failures() {
        let remote = Scripted::new("remote", true);
        let local = Scripted::new("local", false);
        let hub = EventHub::new();
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink = notices.clone();
        hub.on_event(move |e| {
            if let SessionEvent::Notice(n) = e {
                sink.lock().unwrap().push(n.clone());
            }
        });
        let selector = selector(&remote, &local, hub);

        for _ in 0..3 {
            assert_eq!(say(&selector).await, SpeechOutcome::Completed);
        }
        assert!(selector.health().disabled);
        assert_eq!(remote.calls(), 3);
        assert_eq!(local.calls(), 3);

        assert_eq!(say(&selector).await, SpeechOutcome::Completed);
        assert_eq!(remote.calls(), 3, "disabled remote must not be attempted");
        assert_eq!(local.calls(), 4);

        let notices = notices.lock().unwrap();
        assert_eq!(
            notices.iter().filter(|n| matches!(n, Notice::RemoteDisabled { .. })).count(),
            1
        );
    }

    #[tokio::test]
    async fn success_resets_the_counter() {
        let remote = Scripted::new("remote", true);
        let local = Scripted::new("local", false);
        let selector = selector(&remote, &local, EventHub::new());

        say(&selector).await;
        say(&selector).await;
        assert_eq!(selector.health().consecutive_failures, 2);

        remote.fail.store(false, Ordering::SeqCst);
        say(&selector).await;
        assert_eq!(selector.health().consecutive_failures, 0);
        assert!(!selector.health().disabled);
        assert!(selector.health().last_invocation.is_some());
    }

    #[tokio::test]
    async fn reenable_restores_remote_path() {
        let remote = Scripted::new("remote", true);
        let local = Scripted::new("local", false);
        let selector = selector(&remote, &local, EventHub::new());
        for _ in 0..3 {
            say(&selector).await;
        }
        assert!(selector.health().disabled);

        remote.fail.store(false, Ordering::SeqCst);
        selector.reenable();
        let health = selector.health();
        assert_eq!(health.consecutive_failures, 0);
        assert!(!health.disabled);
        say(&selector).await;
        assert_eq!(remote.calls(), 4);
        assert_eq!(local.calls(), 3);
    }

    #[tokio::test]
    async fn remote_preference_toggles_routing() {
        let remote = Scripted::new("remote", false);
        let local = Scripted::new("local", false);
        let selector = selector(&remote, &local, EventHub::new());

        selector.set_remote_enabled(false);
        say(&selector).await;
        assert_eq!((remote.calls(), local.calls()), (0, 1));

        selector.set_remote_enabled(true);
        say(&selector).await;
        assert_eq!((remote.calls(), local.calls()), (1, 1));
    }

    #[tokio::test]
    async fn without_capability_only_local_speaks() {
        let local = Scripted::new("local", false);
        let selector = BackendSelector::new(None, local.clone(), 3, EventHub::new());
        selector.set_remote_enabled(true);
        say(&selector).await;
        assert_eq!(local.calls(), 1);
        assert_eq!(selector.health().last_invocation, None);
    }
}
