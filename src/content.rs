//! Where boards, threads and posts come from.
//!
//! Network retrieval lives outside this crate; `SnapshotSource` serves a
//! JSON dump so the narrator runs offline.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::error::NarrationError;
use crate::model::{Board, BoardId, Post, Thread, ThreadId};

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn list_boards(&self) -> Result<Vec<BoardId>, NarrationError>;

    /// Threads of a board in catalog order. Posts may be left empty and
    /// fetched later with `get_posts`.
    async fn get_threads(&self, board: &str) -> Result<Vec<Thread>, NarrationError>;

    async fn get_posts(&self, thread: ThreadId) -> Result<Vec<Post>, NarrationError>;
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    boards: Vec<Board>,
}

/// In-memory content, loaded from a JSON dump or built directly.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSource {
    boards: Vec<Board>,
}

impl SnapshotSource {
    pub fn new(boards: Vec<Board>) -> Self {
        Self { boards }
    }

    /// Parse `{"boards": [{"id": "g", "threads": [{"id": 1, "posts": [...]}]}]}`.
    pub fn from_json(json: &str) -> Result<Self, NarrationError> {
        let snapshot: Snapshot = serde_json::from_str(json)
            .map_err(|e| NarrationError::Config(format!("Invalid content dump: {e}")))?;
        Ok(Self::new(snapshot.boards))
    }

    pub fn from_file(path: &Path) -> Result<Self, NarrationError> {
        let contents = std::fs::read_to_string(path)?;
        let source = Self::from_json(&contents)?;
        info!(
            "Loaded {} boards from {}",
            source.boards.len(),
            path.display()
        );
        Ok(source)
    }
}

#[async_trait]
impl ContentSource for SnapshotSource {
    async fn list_boards(&self) -> Result<Vec<BoardId>, NarrationError> {
        Ok(self.boards.iter().map(|b| b.id.clone()).collect())
    }

    async fn get_threads(&self, board: &str) -> Result<Vec<Thread>, NarrationError> {
        self.boards
            .iter()
            .find(|b| b.id == board)
            .map(|b| b.threads.clone())
            .ok_or_else(|| NarrationError::ContentFetch(format!("board /{board}/ not found")))
    }

    async fn get_posts(&self, thread: ThreadId) -> Result<Vec<Post>, NarrationError> {
        self.boards
            .iter()
            .flat_map(|b| b.threads.iter())
            .find(|t| t.id == thread)
            .map(|t| t.posts.clone())
            .ok_or_else(|| NarrationError::ContentFetch(format!("thread {thread} not found")))
    }
}
