use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Coarse partition of speech backend failures.
///
/// Only backoff and messaging depend on the kind; every failure falls back
/// to the local backend regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimit,
    Authorization,
    Connectivity,
    Unknown,
}

static RE_STATUS_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^HTTP (\d{3})\b").unwrap());
static RE_RATE_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(rate[ -]?limit(ed|s)?|limit exceeded|quota|too many requests)\b").unwrap()
});
static RE_AUTHORIZATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(auth|authentication|unauthori[sz]ed|forbidden|permission|api key)\b").unwrap()
});
static RE_CONNECTIVITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(network|timeout|timed out|connection|connect|unreachable|dns)\b").unwrap()
});

impl FailureKind {
    /// Kind implied by an HTTP status alone, if any.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimit),
            401 | 403 => Some(Self::Authorization),
            408 | 504 => Some(Self::Connectivity),
            _ => None,
        }
    }

    /// Classify a failure from its message text.
    ///
    /// A leading `HTTP <status>` decides first; otherwise whole words in the
    /// message are matched, so "generate" is not a rate limit and "author"
    /// is not an auth failure.
    pub fn classify(message: &str) -> Self {
        let message = message.trim();
        let body = match RE_STATUS_PREFIX.captures(message) {
            Some(caps) => {
                if let Some(kind) = caps[1].parse().ok().and_then(Self::from_status) {
                    return kind;
                }
                &message[caps[0].len()..]
            }
            None => message,
        };

        if RE_RATE_LIMIT.is_match(body) {
            Self::RateLimit
        } else if RE_AUTHORIZATION.is_match(body) {
            Self::Authorization
        } else if RE_CONNECTIVITY.is_match(body) {
            Self::Connectivity
        } else {
            Self::Unknown
        }
    }

    /// Short phrase for user-facing notices.
    pub fn describe(self) -> &'static str {
        match self {
            Self::RateLimit => "rate limit exceeded",
            Self::Authorization => "authentication or permission error",
            Self::Connectivity => "network connectivity issue",
            Self::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Error, Debug)]
pub enum NarrationError {
    #[error("Nothing to read: {0}")]
    ContentUnavailable(String),

    #[error("Content fetch failed (retryable): {0}")]
    ContentFetch(String),

    #[error("Speech backend failure ({kind}): {message}")]
    SpeechBackend { kind: FailureKind, message: String },

    #[error("Remote speech disabled after {failures} consecutive failures")]
    BackendDisabled { failures: u32 },

    #[error("Normalized text was empty")]
    EmptyUtterance,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Narration session is closed")]
    SessionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NarrationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ContentFetch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_failure_text() {
        assert_eq!(FailureKind::classify("HTTP 429 Too Many Requests"), FailureKind::RateLimit);
        assert_eq!(FailureKind::classify("Quota exhausted"), FailureKind::RateLimit);
        assert_eq!(FailureKind::classify("401 Unauthorized"), FailureKind::Authorization);
        assert_eq!(FailureKind::classify("request timed out"), FailureKind::Connectivity);
        assert_eq!(FailureKind::classify("decoder exploded"), FailureKind::Unknown);
    }

    #[test]
    fn status_decides_before_body_text() {
        assert_eq!(FailureKind::classify("HTTP 429 slow down"), FailureKind::RateLimit);
        assert_eq!(FailureKind::classify("HTTP 403 "), FailureKind::Authorization);
        assert_eq!(
            FailureKind::classify("HTTP 504 gateway timeout"),
            FailureKind::Connectivity
        );
        assert_eq!(
            FailureKind::classify("HTTP 400 monthly quota exceeded"),
            FailureKind::RateLimit
        );
    }

    #[test]
    fn partial_words_do_not_classify() {
        assert_eq!(
            FailureKind::classify("HTTP 500 failed to generate audio"),
            FailureKind::Unknown
        );
        assert_eq!(
            FailureKind::classify("HTTP 400 author field not supported"),
            FailureKind::Unknown
        );
        assert_eq!(FailureKind::classify("separate voices required"), FailureKind::Unknown);
        assert_eq!(FailureKind::classify("rate limit reached"), FailureKind::RateLimit);
        assert_eq!(FailureKind::classify("missing auth header"), FailureKind::Authorization);
    }

    #[test]
    fn only_fetch_failures_are_retryable() {
        let err = NarrationError::SpeechBackend {
            kind: FailureKind::classify("connection refused"),
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Speech backend failure (network connectivity issue): connection refused"
        );
        assert!(!err.is_retryable());
        assert!(NarrationError::ContentFetch("503".into()).is_retryable());
        assert!(!NarrationError::EmptyUtterance.is_retryable());
    }
}
