//! Configuration management for board-narrator.
//!
//! Loads config from YAML files in standard locations. Every section
//! falls back to its defaults field by field.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::voice::Voice;

/// Which identity a post's voice is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceKeying {
    Thread,
    Author,
}

/// How a fresh identity picks from the voice pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceSelection {
    Rotation,
    Random,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub inter_post_delay_ms: u64,
    pub auto_advance_delay_ms: u64,
    pub summary_threshold_chars: usize,
    pub auto_advance_boards: bool,
    pub board_denylist: Vec<String>,
    pub voice_keying: VoiceKeying,
    pub voice_selection: VoiceSelection,
    pub cue_enabled: bool,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            inter_post_delay_ms: 300,
            auto_advance_delay_ms: 1000,
            summary_threshold_chars: 500,
            auto_advance_boards: false,
            board_denylist: ["b", "r9k", "pol", "bant", "r", "s4s", "soc", "qa"]
                .into_iter()
                .map(String::from)
                .collect(),
            voice_keying: VoiceKeying::Author,
            voice_selection: VoiceSelection::Rotation,
            cue_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            rate: 1.2,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub program: String,
    pub voices: Vec<Voice>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            program: "espeak-ng".into(),
            voices: vec![
                Voice::new("en-us", "en-US"),
                Voice::new("en-gb", "en-GB"),
                Voice::new("en-gb-scotland", "en-GB"),
                Voice::new("en-us+f3", "en-US"),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub engine: String,
    pub max_failures: u32,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: String::new(),
            engine: "neural".into(),
            max_failures: 3,
            min_interval_ms: 2000,
            max_interval_ms: 10_000,
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    /// Remote speech is usable only when switched on and pointed somewhere.
    pub fn is_available(&self) -> bool {
        self.enabled && !self.endpoint.trim().is_empty()
    }
}

/// Spoken captions for image attachments. Off unless switched on.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Bearer token; `HF_TOKEN` is read when unset.
    pub token: Option<String>,
    pub media_host: String,
    pub timeout_secs: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api-inference.huggingface.co/models/Salesforce/blip-image-captioning-large"
                .into(),
            token: None,
            media_host: "https://i.4cdn.org".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub notifications: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub narration: NarrationConfig,
    pub speech: SpeechConfig,
    pub local: LocalConfig,
    pub remote: RemoteConfig,
    pub images: ImageConfig,
    pub feedback: FeedbackConfig,
}

impl Config {
    /// Candidate config files, most specific first: a `narrator.yaml` in the
    /// working directory, then the per-user file, then the system-wide one.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::with_capacity(3);
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join("narrator.yaml"));
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("board-narrator").join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/board-narrator/config.yaml"));
        paths
    }

    /// Read settings from `path`, or from the first existing entry of
    /// [`Config::search_paths`]. A missing, unreadable or malformed file
    /// yields the built-in defaults and never aborts startup.
    pub fn load(path: Option<&Path>) -> Self {
        let source = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::search_paths().into_iter().find(|p| p.is_file()) {
                Some(found) => found,
                None => {
                    info!("No narrator config present, running on defaults");
                    return Self::default();
                }
            },
        };

        Self::from_file(&source).unwrap_or_else(|reason| {
            warn!("Ignoring {}: {reason}", source.display());
            Self::default()
        })
    }

    fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path).map_err(|e| format!("unreadable ({e})"))?;
        let config = serde_yml::from_str(&text).map_err(|e| format!("invalid YAML ({e})"))?;
        info!("Settings read from {}", path.display());
        Ok(config)
    }
}
