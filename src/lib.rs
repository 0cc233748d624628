//! board-narrator: reads imageboard threads aloud.
//!
//! A `NarrationSession` walks board → thread → post, turns each post's
//! markup into speakable text, gives each author (or thread) a stable
//! voice and speaks through a remote synthesis service with automatic
//! fallback to on-device speech.

pub mod config;
pub mod content;
pub mod controller;
pub mod describe;
pub mod error;
pub mod events;
pub mod model;
pub mod normalizer;
pub mod notifier;
pub mod session;
pub mod speech;
pub mod voice;

pub use config::Config;
pub use error::{FailureKind, NarrationError};
pub use events::{BackendHealth, Notice, PlaybackState, Progress, SessionEvent};
pub use model::{Board, Post, Thread};
pub use session::{NarrationSession, SessionParts};
