//! Raw post markup → speakable text.
//!
//! Pipeline (order matters, each stage expects the previous stage's shape):
//! 1. Strip markup (scripts, line breaks, greentext, spoilers, entities)
//! 2. Resolve `>>12345` references against the current thread
//! 3. Simplify URLs into short spoken labels
//! 4. Summarize long posts (first, middle, last sentence)
//! 5. Auxiliary text filters

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::config::NarrationConfig;
use crate::model::{Post, Thread};

static RE_SCRIPT_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());
static RE_LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p\s*>").unwrap());
static RE_SPOILER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<s>.*?</s>").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static RE_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r">>(\d+)").unwrap());
static RE_REFERENCE_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">>>\S*|\(OP\)|\(You\)").unwrap());

static RE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)https?://[^\s]+").unwrap());

static RE_SENTENCE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").unwrap());

/// Marker that replaces every URL when a post carries too many of them.
pub const COLLAPSED_LINKS_MARKER: &str = "various links";
/// Prefix of a summarized post.
pub const SUMMARY_PREFIX: &str = "Post summary:";
/// More URLs than this and they are collapsed into one marker.
const MAX_SPOKEN_URLS: usize = 2;

/// A pure string transform applied after the core pipeline.
pub trait TextFilter: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, text: &str) -> String;
}

/// Rewrites arrow glyphs (and a screen reader's reading of them) as "right arrow".
#[derive(Debug, Default)]
pub struct ArrowFilter;

impl TextFilter for ArrowFilter {
    fn name(&self) -> &str {
        "arrow"
    }

    fn apply(&self, text: &str) -> String {
        static RE_ARROW: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?i)right pointing triangle|[▶►→]").unwrap());
        RE_ARROW.replace_all(text, "right arrow").into_owned()
    }
}

pub struct TextNormalizer {
    summary_threshold: usize,
    filters: Vec<Box<dyn TextFilter>>,
}

impl TextNormalizer {
    pub fn new(summary_threshold: usize) -> Self {
        Self {
            summary_threshold,
            filters: Vec::new(),
        }
    }

    pub fn from_config(config: &NarrationConfig) -> Self {
        Self::new(config.summary_threshold_chars).with_filter(ArrowFilter)
    }

    pub fn with_filter(mut self, filter: impl TextFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Normalize a post into non-empty speakable text.
    ///
    /// `thread` is the currently loaded thread; references are resolved
    /// against it only.
    pub fn normalize(&self, post: &Post, thread: &Thread) -> String {
        compose(post, &self.body_text(post, thread), None)
    }

    /// The post's body after every stage, possibly empty.
    pub fn body_text(&self, post: &Post, thread: &Thread) -> String {
        let text = strip_markup(&post.raw_body);
        debug!("post {} stripped: {text:?}", post.id);

        let text = resolve_references(&text, thread);
        let text = simplify_urls(&text);
        let text = summarize(&text, self.summary_threshold);

        self.filters
            .iter()
            .fold(text, |acc, filter| {
                let out = filter.apply(&acc);
                if out != acc {
                    debug!("filter '{}' rewrote post {}", filter.name(), post.id);
                }
                out
            })
            .trim()
            .to_string()
    }
}

/// Final utterance for a post: an image caption leads when there is one,
/// and an empty body without a caption becomes the attachment placeholder.
pub fn compose(post: &Post, body: &str, caption: Option<&str>) -> String {
    let body = body.trim();
    match caption.map(str::trim).filter(|c| !c.is_empty()) {
        Some(caption) => {
            let caption = caption.trim_end_matches(['.', '!', '?']);
            if body.is_empty() {
                format!("Image: {caption}.")
            } else {
                format!("Image: {caption}. {body}")
            }
        }
        None if body.is_empty() => {
            debug!("post {} has no speakable body, using placeholder", post.id);
            placeholder(post)
        }
        None => body.to_string(),
    }
}

/// Stage 1: markup → plain text on a single line.
pub fn strip_markup(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    let text = RE_SCRIPT_STYLE.replace_all(html, "");
    let text = RE_LINE_BREAK.replace_all(&text, "\n");
    let text = RE_SPOILER.replace_all(&text, " spoiler ");
    let text = RE_TAG.replace_all(&text, "");
    let text = decode_entities(&text);

    let lines: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.strip_prefix('>') {
            Some(rest) if !rest.starts_with('>') => quote_sentence(rest),
            _ => line.to_string(),
        })
        .collect();

    RE_WHITESPACE.replace_all(&lines.join("\n"), " ").trim().to_string()
}

fn quote_sentence(rest: &str) -> String {
    let rest = rest.trim();
    if rest.ends_with(['.', '!', '?']) {
        format!("Quote: {rest}")
    } else {
        format!("Quote: {rest}.")
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Stage 2: `>>id` tokens become leading "replying to post N." sentences,
/// where N is the 1-based position in `thread`. Ids outside the loaded
/// thread read as "replying to another post".
///
/// Text without any reference tokens is returned unchanged.
pub fn resolve_references(text: &str, thread: &Thread) -> String {
    if !RE_REFERENCE.is_match(text) && !RE_REFERENCE_NOISE.is_match(text) {
        return text.to_string();
    }

    let without_noise = RE_REFERENCE_NOISE.replace_all(text, " ");

    let mut replies: Vec<String> = Vec::new();
    for caps in RE_REFERENCE.captures_iter(&without_noise) {
        let phrase = caps[1]
            .parse::<u64>()
            .ok()
            .and_then(|id| thread.position_of(id))
            .map(|n| format!("replying to post {n}"))
            .unwrap_or_else(|| "replying to another post".to_string());
        if !replies.contains(&phrase) {
            replies.push(phrase);
        }
    }

    let body = RE_REFERENCE.replace_all(&without_noise, " ");
    let body = RE_WHITESPACE.replace_all(&body, " ");
    let body = body.trim();

    match (replies.is_empty(), body.is_empty()) {
        (true, _) => body.to_string(),
        (false, true) => format!("{}.", replies.join(". ")),
        (false, false) => format!("{}. {body}", replies.join(". ")),
    }
}

/// Stage 3: URLs → spoken labels, or one trailing marker when there are
/// more than two of them.
pub fn simplify_urls(text: &str) -> String {
    let count = RE_URL.find_iter(text).count();
    if count == 0 {
        return text.to_string();
    }

    if count > MAX_SPOKEN_URLS {
        let stripped = RE_URL.replace_all(text, " ");
        let stripped = RE_WHITESPACE.replace_all(&stripped, " ");
        let stripped = stripped.trim();
        return if stripped.is_empty() {
            COLLAPSED_LINKS_MARKER.to_string()
        } else {
            format!("{stripped} {COLLAPSED_LINKS_MARKER}")
        };
    }

    RE_URL
        .replace_all(text, |caps: &regex::Captures| {
            let raw = &caps[0];
            let url = raw.trim_end_matches(['.', ',', ')', ';', '!', '?', ':']);
            let tail = &raw[url.len()..];
            format!("{}{tail}", url_label(url))
        })
        .into_owned()
}

/// Classify a URL into a short spoken label.
pub fn url_label(raw: &str) -> &'static str {
    let Ok(url) = Url::parse(raw) else {
        return "link";
    };

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let host_is = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));

    const HOSTS: &[(&str, &str)] = &[
        ("x.com", "X post"),
        ("twitter.com", "Twitter post"),
        ("youtube.com", "YouTube video"),
        ("youtu.be", "YouTube video"),
        ("reddit.com", "Reddit post"),
        ("instagram.com", "Instagram post"),
        ("tiktok.com", "TikTok video"),
        ("facebook.com", "Facebook post"),
        ("github.com", "GitHub link"),
        ("wikipedia.org", "Wikipedia article"),
        ("twitch.tv", "Twitch stream"),
    ];
    if let Some((_, label)) = HOSTS.iter().find(|(domain, _)| host_is(domain)) {
        return *label;
    }

    let path = url.path().to_ascii_lowercase();
    let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match extension {
        "jpg" | "jpeg" | "png" | "gif" | "webp" => "image",
        "mp4" | "webm" | "mov" | "avi" => "video",
        _ => "link",
    }
}

/// Split on `.!?` runs, discarding empty fragments.
pub fn split_sentences(text: &str) -> Vec<&str> {
    RE_SENTENCE_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Stage 4: over-threshold text becomes first + middle + last sentence.
pub fn summarize(text: &str, threshold: usize) -> String {
    if text.chars().count() <= threshold {
        return text.to_string();
    }

    let sentences = split_sentences(text);
    if sentences.len() <= 3 {
        return text.to_string();
    }

    let picked = [
        sentences[0],
        sentences[sentences.len() / 2],
        sentences[sentences.len() - 1],
    ];
    format!("{SUMMARY_PREFIX} {}.", picked.join(". "))
}

fn placeholder(post: &Post) -> String {
    match &post.attachment {
        Some(attachment) if attachment.is_video() => "Post with a video attachment.".to_string(),
        Some(_) => "Post with an image attachment.".to_string(),
        None => "Empty post.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttachmentRef;

    fn thread() -> Thread {
        Thread::new(
            900,
            vec![
                Post::new(100, "", "first"),
                Post::new(101, "", "second"),
                Post::new(102, "", "third"),
            ],
        )
    }

    #[test]
    fn strips_markup_and_flattens_greentext() {
        let html = r#"<script>alert(1)</script>Hello<br><span class="quote">&gt;be me</span><br>&gt;&gt;101 ok &amp; bye"#;
        assert_eq!(strip_markup(html), "Hello Quote: be me. >>101 ok & bye");
    }

    #[test]
    fn hides_spoilers_and_styles() {
        let html = "<style>p{}</style>The end is <s>a twist</s> here";
        assert_eq!(strip_markup(html), "The end is spoiler here");
    }

    #[test]
    fn resolves_references_within_thread() {
        let t = thread();
        assert_eq!(resolve_references("Hello >>101", &t), "replying to post 2. Hello");
        assert_eq!(
            resolve_references(">>555 no idea", &t),
            "replying to another post. no idea"
        );
        assert_eq!(resolve_references(">>100 (OP)", &t), "replying to post 1.");
    }

    #[test]
    fn reference_resolution_is_idempotent() {
        let t = thread();
        let once = resolve_references(">>102 >>100 agreed", &t);
        assert_eq!(once, "replying to post 3. replying to post 1. agreed");
        assert_eq!(resolve_references(&once, &t), once);
    }

    #[test]
    fn labels_urls_by_host_and_extension() {
        assert_eq!(
            simplify_urls("see https://www.youtube.com/watch?v=abc and https://i.example.org/cat.PNG."),
            "see YouTube video and image."
        );
        assert_eq!(simplify_urls("https://en.wikipedia.org/wiki/Rust"), "Wikipedia article");
        assert_eq!(simplify_urls("go to https://unknown.example/page"), "go to link");
    }

    #[test]
    fn collapses_many_urls_into_one_marker() {
        let out = simplify_urls("a https://x.com/1 b https://a.io/2 c https://b.io/3.jpg");
        assert_eq!(out, "a b c various links");
        assert!(!out.contains("http"));
        assert_eq!(out.matches(COLLAPSED_LINKS_MARKER).count(), 1);
    }

    #[test]
    fn summarizes_only_long_multi_sentence_text() {
        let long = format!("{} One. Two! Three? Four. Five.", "x".repeat(40));
        let summary = summarize(&long, 20);
        assert!(summary.starts_with(SUMMARY_PREFIX));
        assert_eq!(summary, format!("{SUMMARY_PREFIX} {} One. Three. Five.", "x".repeat(40)));

        let three = format!("{} a. b. c.", "y".repeat(50));
        assert_eq!(summarize(&three, 10), three);
        assert_eq!(summarize("short. text. here. more.", 500), "short. text. here. more.");
    }

    #[test]
    fn attachment_only_post_gets_placeholder() {
        let normalizer = TextNormalizer::new(500);
        let post = Post::new(1, "", "").with_attachment(AttachmentRef {
            board: "g".into(),
            timestamp: 1_700_000_000,
            extension: ".jpg".into(),
        });
        assert_eq!(normalizer.normalize(&post, &thread()), "Post with an image attachment.");
        assert_eq!(
            normalizer.normalize(&Post::new(2, "", "<br><br>"), &thread()),
            "Empty post."
        );
    }

    #[test]
    fn caption_leads_the_body() {
        let post = Post::new(1, "", "Hello").with_attachment(AttachmentRef {
            board: "g".into(),
            timestamp: 1_700_000_000,
            extension: ".jpg".into(),
        });
        assert_eq!(
            compose(&post, "Hello", Some("a cat on a keyboard")),
            "Image: a cat on a keyboard. Hello"
        );
        assert_eq!(compose(&post, "", Some("a cat.")), "Image: a cat.");
        assert_eq!(compose(&post, "", Some("  ")), "Post with an image attachment.");
        assert_eq!(compose(&post, "Hello", None), "Hello");
    }

    #[test]
    fn filters_run_after_core_stages() {
        let normalizer = TextNormalizer::new(500).with_filter(ArrowFilter);
        let post = Post::new(5, "", "next ▶ please");
        assert_eq!(normalizer.normalize(&post, &thread()), "next right arrow please");
    }
}
