//! Stable per-identity voice assignment.
//!
//! Each identity is memoized to a pool *index*, never a voice object, so a
//! pool refresh is picked up lazily on the next lookup.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{VoiceKeying, VoiceSelection};
use crate::model::{Post, ThreadId};

/// Fallback pool size when no English voice is installed.
const MAX_FALLBACK_VOICES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub lang: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// What a backend should speak with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceHandle {
    /// Pool was empty; the backend uses its own default voice.
    PlatformDefault,
    Named(Voice),
}

impl VoiceHandle {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::PlatformDefault => None,
            Self::Named(voice) => Some(&voice.name),
        }
    }
}

/// Source of currently installed voices. May change at runtime.
pub trait VoicePool: Send + Sync {
    fn list_voices(&self) -> Vec<Voice>;
}

/// Voice pool backed by a list that can be swapped out at runtime.
#[derive(Debug, Default)]
pub struct StaticVoicePool {
    voices: RwLock<Vec<Voice>>,
}

impl StaticVoicePool {
    pub fn new(voices: Vec<Voice>) -> Self {
        Self {
            voices: RwLock::new(voices),
        }
    }

    pub fn refresh(&self, voices: Vec<Voice>) {
        info!("Voice pool refreshed: {} voices", voices.len());
        if let Ok(mut guard) = self.voices.write() {
            *guard = voices;
        }
    }
}

impl VoicePool for StaticVoicePool {
    fn list_voices(&self) -> Vec<Voice> {
        self.voices.read().map(|v| v.clone()).unwrap_or_default()
    }
}

/// Keep English voices; with none installed, the first few of anything.
pub fn usable_voices(all: Vec<Voice>) -> Vec<Voice> {
    let english: Vec<Voice> = all
        .iter()
        .filter(|v| v.lang.to_ascii_lowercase().starts_with("en"))
        .cloned()
        .collect();
    if english.is_empty() {
        all.into_iter().take(MAX_FALLBACK_VOICES).collect()
    } else {
        english
    }
}

/// Identity a voice is memoized under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Thread(ThreadId),
    Author(String),
}

impl IdentityKey {
    /// Key a post according to the configured keying mode.
    pub fn for_post(keying: VoiceKeying, thread_id: ThreadId, post: &Post) -> Self {
        match keying {
            VoiceKeying::Thread => Self::Thread(thread_id),
            VoiceKeying::Author => {
                let author = post.author_key.trim();
                if author.is_empty() {
                    Self::Author("Anonymous".to_string())
                } else {
                    Self::Author(author.to_string())
                }
            }
        }
    }
}

pub struct VoiceAssignor {
    selection: VoiceSelection,
    thread_voices: HashMap<ThreadId, usize>,
    author_voices: HashMap<String, usize>,
    rotation: usize,
}

impl VoiceAssignor {
    pub fn new(selection: VoiceSelection) -> Self {
        Self {
            selection,
            thread_voices: HashMap::new(),
            author_voices: HashMap::new(),
            rotation: 0,
        }
    }

    /// Resolve the voice for `key` against the current `pool`.
    ///
    /// The first lookup for a key picks an index and memoizes it; later
    /// lookups reuse it.
    pub fn assign(&mut self, key: &IdentityKey, pool: &[Voice]) -> VoiceHandle {
        if pool.is_empty() {
            return VoiceHandle::PlatformDefault;
        }

        let index = match key {
            IdentityKey::Thread(id) => match self.thread_voices.get(id) {
                Some(&index) => index,
                None => {
                    let index = self.next_index(pool.len());
                    self.thread_voices.insert(*id, index);
                    debug!("thread {id} assigned voice slot {index}");
                    index
                }
            },
            IdentityKey::Author(author) => match self.author_voices.get(author) {
                Some(&index) => index,
                None => {
                    let index = self.next_index(pool.len());
                    self.author_voices.insert(author.clone(), index);
                    debug!("author '{author}' assigned voice slot {index}");
                    index
                }
            },
        };

        VoiceHandle::Named(pool[index % pool.len()].clone())
    }

    fn next_index(&mut self, pool_len: usize) -> usize {
        match self.selection {
            VoiceSelection::Rotation => {
                let index = self.rotation % pool_len;
                self.rotation += 1;
                index
            }
            VoiceSelection::Random => rand::thread_rng().gen_range(0..pool_len),
        }
    }

    pub fn assigned_count(&self) -> usize {
        self.thread_voices.len() + self.author_voices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<Voice> {
        vec![
            Voice::new("alpha", "en-US"),
            Voice::new("beta", "en-GB"),
            Voice::new("gamma", "en-AU"),
        ]
    }

    #[test]
    fn assignment_is_stable_across_other_keys() {
        let mut assignor = VoiceAssignor::new(VoiceSelection::Rotation);
        let pool = pool();
        let anon = IdentityKey::Author("Anonymous".into());

        let first = assignor.assign(&anon, &pool);
        for i in 0..10 {
            assignor.assign(&IdentityKey::Author(format!("user{i}")), &pool);
        }
        assert_eq!(assignor.assign(&anon, &pool), first);
    }

    #[test]
    fn random_selection_is_memoized() {
        let mut assignor = VoiceAssignor::new(VoiceSelection::Random);
        let pool = pool();
        let key = IdentityKey::Thread(42);
        let first = assignor.assign(&key, &pool);
        for _ in 0..20 {
            assert_eq!(assignor.assign(&key, &pool), first);
        }
    }

    #[test]
    fn thread_and_author_tables_are_separate() {
        let mut assignor = VoiceAssignor::new(VoiceSelection::Rotation);
        let pool = pool();
        let thread = assignor.assign(&IdentityKey::Thread(1), &pool);
        let author = assignor.assign(&IdentityKey::Author("1".into()), &pool);
        assert_ne!(thread, author);
        assert_eq!(assignor.assigned_count(), 2);
    }

    #[test]
    fn empty_pool_means_platform_default() {
        let mut assignor = VoiceAssignor::new(VoiceSelection::Rotation);
        assert_eq!(
            assignor.assign(&IdentityKey::Thread(1), &[]),
            VoiceHandle::PlatformDefault
        );
        assert_eq!(assignor.assigned_count(), 0);
    }

    #[test]
    fn refreshed_pool_is_read_lazily() {
        let mut assignor = VoiceAssignor::new(VoiceSelection::Rotation);
        let source = StaticVoicePool::new(pool());
        let key = IdentityKey::Author("op".into());
        assert_eq!(
            assignor.assign(&key, &source.list_voices()).name(),
            Some("alpha")
        );

        source.refresh(vec![Voice::new("delta", "en-US")]);
        assert_eq!(
            assignor.assign(&key, &source.list_voices()).name(),
            Some("delta")
        );
    }

    #[test]
    fn usable_voices_prefers_english() {
        let all = vec![Voice::new("fr", "fr-FR"), Voice::new("us", "en-US")];
        assert_eq!(usable_voices(all), vec![Voice::new("us", "en-US")]);

        let foreign: Vec<Voice> = (0..15).map(|i| Voice::new(format!("v{i}"), "de-DE")).collect();
        assert_eq!(usable_voices(foreign).len(), 10);
    }

    #[test]
    fn anonymous_authors_share_a_key() {
        let post = Post::new(1, "  ", "hi");
        assert_eq!(
            IdentityKey::for_post(VoiceKeying::Author, 7, &post),
            IdentityKey::Author("Anonymous".into())
        );
        assert_eq!(
            IdentityKey::for_post(VoiceKeying::Thread, 7, &post),
            IdentityKey::Thread(7)
        );
    }
}
