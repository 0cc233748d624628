//! Observational events for the UI / telemetry boundary.
//!
//! Observers are plain callbacks invoked synchronously on emit; they
//! cannot push back on the narration core.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;

use crate::error::FailureKind;
use crate::model::{BoardId, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Transitioning,
    Stopped,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Transitioning => write!(f, "TRANSITIONING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Fired on every cursor change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub post_index: usize,
    pub total_posts: usize,
    pub board_id: BoardId,
    pub thread_id: ThreadId,
}

/// Circuit breaker state for the remote backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendHealth {
    pub consecutive_failures: u32,
    pub disabled: bool,
    pub last_invocation: Option<Instant>,
}

/// User-facing messages. None of them halt playback on their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    NothingToRead,
    EndOfContent,
    RemoteFailed { kind: FailureKind, message: String },
    /// The breaker opened; `reenable_remote()` is the recovery action.
    RemoteDisabled { failures: u32 },
    RemoteReenabled,
    ContentUnavailable(String),
    BoardSelected(BoardId),
}

impl Notice {
    /// Worth interrupting the user for (desktop notification).
    pub fn is_prominent(&self) -> bool {
        matches!(
            self,
            Self::RemoteDisabled { .. } | Self::EndOfContent | Self::ContentUnavailable(_)
        )
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToRead => write!(f, "No posts loaded. Select a thread first."),
            Self::EndOfContent => write!(f, "Reached end of thread. No more threads available."),
            Self::RemoteFailed { kind, message } => {
                write!(f, "Remote speech failed ({kind}): {message}. Using local speech.")
            }
            Self::RemoteDisabled { failures } => write!(
                f,
                "Remote speech disabled after {failures} failures. Using local speech only; re-enable to retry."
            ),
            Self::RemoteReenabled => write!(f, "Remote speech re-enabled."),
            Self::ContentUnavailable(reason) => write!(f, "Content unavailable: {reason}"),
            Self::BoardSelected(board) => write!(f, "Now reading /{board}/"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Progress(Progress),
    StateChanged {
        from: PlaybackState,
        to: PlaybackState,
    },
    BackendHealth(BackendHealth),
    Notice(Notice),
}

type Observer = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EventHub {
    observers: Arc<Mutex<Vec<Observer>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_event(&self, observer: impl Fn(&SessionEvent) + Send + Sync + 'static) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    pub fn on_progress(&self, callback: impl Fn(&Progress) + Send + Sync + 'static) {
        self.on_event(move |event| {
            if let SessionEvent::Progress(progress) = event {
                callback(progress);
            }
        });
    }

    pub fn emit(&self, event: SessionEvent) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer(&event);
        }
    }

    pub fn notice(&self, notice: Notice) {
        self.emit(SessionEvent::Notice(notice));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_observers_only_see_progress() {
        let hub = EventHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.on_progress(move |p| sink.lock().unwrap().push(p.post_index));

        hub.notice(Notice::EndOfContent);
        hub.emit(SessionEvent::Progress(Progress {
            post_index: 3,
            total_posts: 5,
            board_id: "g".into(),
            thread_id: 1,
        }));

        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn observers_may_subscribe_while_handling() {
        let hub = EventHub::new();
        let inner = hub.clone();
        hub.on_event(move |_| inner.on_event(|_| {}));
        hub.notice(Notice::RemoteReenabled);
        hub.notice(Notice::RemoteReenabled);
    }
}
