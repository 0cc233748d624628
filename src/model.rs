//! Board → thread → post hierarchy and the narration cursor.

use serde::{Deserialize, Serialize};

pub type PostId = u64;
pub type ThreadId = u64;
pub type BoardId = String;

/// Media attached to a post: `{board}/{timestamp}{extension}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub board: BoardId,
    pub timestamp: u64,
    pub extension: String,
}

impl AttachmentRef {
    /// Where the media lives on `media_host`.
    pub fn url(&self, media_host: &str) -> String {
        let extension = self.extension.trim_start_matches('.');
        format!(
            "{}/{}/{}.{extension}",
            media_host.trim_end_matches('/'),
            self.board,
            self.timestamp
        )
    }

    pub fn is_video(&self) -> bool {
        matches!(
            self.extension.trim_start_matches('.').to_ascii_lowercase().as_str(),
            "webm" | "mp4" | "mov"
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    #[serde(default)]
    pub author_key: String,
    #[serde(default)]
    pub raw_body: String,
    #[serde(default)]
    pub attachment: Option<AttachmentRef>,
}

impl Post {
    pub fn new(id: PostId, author_key: impl Into<String>, raw_body: impl Into<String>) -> Self {
        Self {
            id,
            author_key: author_key.into(),
            raw_body: raw_body.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl Thread {
    pub fn new(id: ThreadId, posts: Vec<Post>) -> Self {
        Self { id, posts }
    }

    /// 1-based position of a post within this thread.
    pub fn position_of(&self, id: PostId) -> Option<usize> {
        self.posts.iter().position(|p| p.id == id).map(|i| i + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    #[serde(default)]
    pub threads: Vec<Thread>,
}

/// The only mutable pointer into the hierarchy. Owned by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NarrationCursor {
    pub board_index: usize,
    pub thread_index: usize,
    pub post_index: usize,
}

impl NarrationCursor {
    pub fn rewind(&mut self) {
        self.post_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_is_one_based() {
        let thread = Thread::new(
            1,
            vec![Post::new(10, "", "a"), Post::new(11, "", "b"), Post::new(12, "", "c")],
        );
        assert_eq!(thread.position_of(10), Some(1));
        assert_eq!(thread.position_of(12), Some(3));
        assert_eq!(thread.position_of(99), None);
    }

    #[test]
    fn attachment_kind_ignores_dot_and_case() {
        let webm = AttachmentRef {
            board: "g".into(),
            timestamp: 1,
            extension: ".WEBM".into(),
        };
        assert!(webm.is_video());
        assert_eq!(
            webm.url("https://i.4cdn.org/"),
            "https://i.4cdn.org/g/1.WEBM"
        );
    }
}
