//! Playback state machine with hierarchical auto-advance.
//!
//! IDLE/STOPPED → PLAYING ⇄ TRANSITIONING, PLAYING/TRANSITIONING → PAUSED → PLAYING
//!
//! The controller runs as a single task draining one event channel. Every
//! asynchronous helper (utterance, inter-post timer, content load) reports
//! back through that channel tagged with the sequence number it was started
//! under; anything carrying an older number is stale and dropped.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NarrationConfig;
use crate::content::ContentSource;
use crate::error::NarrationError;
use crate::events::{EventHub, Notice, PlaybackState, Progress, SessionEvent};
use crate::model::{Board, BoardId, NarrationCursor, Post, Thread, ThreadId};
use crate::describe::ImageDescriber;
use crate::normalizer::{self, TextNormalizer};
use crate::speech::cue::CuePlayer;
use crate::speech::selector::BackendSelector;
use crate::speech::{SpeechOutcome, SpeechParams};
use crate::voice::{IdentityKey, VoiceAssignor, VoicePool};

pub type Reply = oneshot::Sender<Result<(), NarrationError>>;

/// External control surface, delivered through the session.
#[derive(Debug)]
pub enum Command {
    Start(Reply),
    Pause,
    Stop,
    Skip,
    InstallBoard { board: BoardId, threads: Vec<Thread> },
    InstallThread { thread: ThreadId, posts: Vec<Post> },
    SetAutoAdvance(bool),
    SetRemoteEnabled(bool),
    ReenableRemote,
    Shutdown,
}

#[derive(Debug)]
pub enum ControllerEvent {
    Command(Command),
    UtteranceFinished {
        seq: u64,
        outcome: SpeechOutcome,
    },
    TransitionElapsed {
        seq: u64,
    },
    ThreadLoaded {
        seq: u64,
        result: Result<Vec<Post>, NarrationError>,
    },
    BoardsListed {
        seq: u64,
        result: Result<Vec<BoardId>, NarrationError>,
    },
    BoardLoaded {
        seq: u64,
        board: BoardId,
        result: Result<Vec<Thread>, NarrationError>,
    },
}

/// Collaborators injected into the controller.
pub struct Collaborators {
    pub normalizer: TextNormalizer,
    pub assignor: VoiceAssignor,
    pub voices: Arc<dyn VoicePool>,
    pub selector: Arc<BackendSelector>,
    pub content: Arc<dyn ContentSource>,
    pub cue: Arc<dyn CuePlayer>,
    pub describer: Option<Arc<dyn ImageDescriber>>,
    pub events: EventHub,
}

pub struct PlaybackController {
    config: NarrationConfig,
    params: SpeechParams,
    state: PlaybackState,
    cursor: NarrationCursor,
    boards: Vec<Board>,
    auto_advance_boards: bool,
    /// Sequence number of the current utterance / transition step.
    seq: u64,
    /// A paused transition still owes a cursor advance on resume.
    advance_pending: bool,
    in_flight: Option<JoinHandle<()>>,

    normalizer: TextNormalizer,
    assignor: VoiceAssignor,
    voices: Arc<dyn VoicePool>,
    selector: Arc<BackendSelector>,
    content: Arc<dyn ContentSource>,
    cue: Arc<dyn CuePlayer>,
    describer: Option<Arc<dyn ImageDescriber>>,
    events: EventHub,

    tx: mpsc::UnboundedSender<ControllerEvent>,
    rx: mpsc::UnboundedReceiver<ControllerEvent>,
}

impl PlaybackController {
    pub fn new(config: NarrationConfig, params: SpeechParams, parts: Collaborators) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            auto_advance_boards: config.auto_advance_boards,
            config,
            params,
            state: PlaybackState::Idle,
            cursor: NarrationCursor::default(),
            boards: Vec::new(),
            seq: 0,
            advance_pending: false,
            in_flight: None,
            normalizer: parts.normalizer,
            assignor: parts.assignor,
            voices: parts.voices,
            selector: parts.selector,
            content: parts.content,
            cue: parts.cue,
            describer: parts.describer,
            events: parts.events,
            tx,
            rx,
        }
    }

    /// Sender for feeding commands into the controller.
    pub fn sender(&self) -> mpsc::UnboundedSender<ControllerEvent> {
        self.tx.clone()
    }

    /// Drain events until shutdown. The controller never fails; every fault
    /// becomes a state change or a notice.
    pub async fn run(mut self) {
        info!("Narration controller ready");
        while let Some(event) = self.rx.recv().await {
            if !self.handle(event) {
                break;
            }
        }
        self.cancel_in_flight();
        info!("Narration controller stopped");
    }

    fn handle(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Command(Command::Shutdown) => return false,
            ControllerEvent::Command(command) => self.on_command(command),
            ControllerEvent::UtteranceFinished { seq, outcome } => {
                self.on_utterance_finished(seq, outcome)
            }
            ControllerEvent::TransitionElapsed { seq } => self.on_transition_elapsed(seq),
            ControllerEvent::ThreadLoaded { seq, result } => self.on_thread_loaded(seq, result),
            ControllerEvent::BoardsListed { seq, result } => self.on_boards_listed(seq, result),
            ControllerEvent::BoardLoaded { seq, board, result } => {
                self.on_board_loaded(seq, board, result)
            }
        }
        true
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let _ = reply.send(self.start());
            }
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::Skip => self.skip(),
            Command::InstallBoard { board, threads } => self.install_board(board, threads),
            Command::InstallThread { thread, posts } => self.install_thread(thread, posts),
            Command::SetAutoAdvance(enabled) => {
                info!("Auto-advance across boards: {enabled}");
                self.auto_advance_boards = enabled;
            }
            Command::SetRemoteEnabled(enabled) => self.selector.set_remote_enabled(enabled),
            Command::ReenableRemote => self.selector.reenable(),
            Command::Shutdown => {}
        }
    }

    // --- Commands ---

    fn start(&mut self) -> Result<(), NarrationError> {
        match self.state {
            PlaybackState::Playing | PlaybackState::Transitioning => Ok(()),
            PlaybackState::Paused => {
                if self.advance_pending {
                    self.set_state(PlaybackState::Transitioning);
                    self.advance();
                } else {
                    self.play_current();
                }
                Ok(())
            }
            PlaybackState::Idle | PlaybackState::Stopped => {
                // A thread listed without posts is fetched by `play_current`.
                let Some(thread) = self.current_thread() else {
                    self.events.notice(Notice::NothingToRead);
                    return Err(NarrationError::ContentUnavailable("nothing to read".into()));
                };
                if self.cursor.post_index >= thread.posts.len() {
                    self.cursor.rewind();
                }
                self.advance_pending = false;
                self.play_current();
                Ok(())
            }
        }
    }

    fn pause(&mut self) {
        match self.state {
            PlaybackState::Playing => {
                self.cancel_in_flight();
                self.bump_seq();
                self.advance_pending = false;
                self.set_state(PlaybackState::Paused);
            }
            PlaybackState::Transitioning => {
                self.bump_seq();
                self.set_state(PlaybackState::Paused);
            }
            _ => debug!("Pause ignored in {}", self.state),
        }
    }

    fn stop(&mut self) {
        match self.state {
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::Transitioning => {
                self.cancel_in_flight();
                self.bump_seq();
                self.advance_pending = false;
                self.cursor.rewind();
                self.set_state(PlaybackState::Stopped);
                self.emit_progress();
            }
            _ => debug!("Stop ignored in {}", self.state),
        }
    }

    fn skip(&mut self) {
        match self.state {
            PlaybackState::Playing => {
                info!("Skipping post {}", self.cursor.post_index + 1);
                self.cancel_in_flight();
                self.begin_transition(Duration::ZERO, false);
            }
            // Skips the post resume would have read; a pending advance from
            // a paused transition still applies on top.
            PlaybackState::Paused => {
                if self.cursor.post_index + 1 < self.current_posts().len() {
                    self.cursor.post_index += 1;
                    self.emit_progress();
                } else {
                    self.advance_pending = true;
                }
            }
            // Transitioning: already on the way to the next post.
            _ => debug!("Skip ignored in {}", self.state),
        }
    }

    fn install_board(&mut self, board: BoardId, threads: Vec<Thread>) {
        self.reset_for_new_content();
        info!("Board /{board}/ loaded with {} threads", threads.len());
        let index = self.store_board(board, threads);
        self.cursor = NarrationCursor {
            board_index: index,
            ..NarrationCursor::default()
        };
        self.emit_progress();
    }

    /// Replace the threads of a known board, or append a new one.
    ///
    /// Boards the cursor has moved off keep only their ids, so the
    /// hierarchy holds the posts of one board at a time.
    fn store_board(&mut self, board: BoardId, threads: Vec<Thread>) -> usize {
        for other in self.boards.iter_mut().filter(|b| b.id != board) {
            other.threads = Vec::new();
        }
        match self.boards.iter().position(|b| b.id == board) {
            Some(index) => {
                self.boards[index].threads = threads;
                index
            }
            None => {
                self.boards.push(Board { id: board, threads });
                self.boards.len() - 1
            }
        }
    }

    fn install_thread(&mut self, thread: ThreadId, posts: Vec<Post>) {
        self.reset_for_new_content();
        if self.boards.is_empty() {
            self.boards.push(Board {
                id: BoardId::new(),
                threads: Vec::new(),
            });
            self.cursor = NarrationCursor::default();
        }
        info!("Thread {thread} loaded with {} posts", posts.len());

        let threads = &mut self.boards[self.cursor.board_index].threads;
        let index = match threads.iter().position(|t| t.id == thread) {
            Some(index) => {
                threads[index].posts = posts;
                index
            }
            None => {
                threads.push(Thread::new(thread, posts));
                threads.len() - 1
            }
        };
        self.cursor.thread_index = index;
        self.cursor.rewind();
        self.emit_progress();
    }

    fn reset_for_new_content(&mut self) {
        self.cancel_in_flight();
        self.bump_seq();
        self.advance_pending = false;
        if self.state != PlaybackState::Idle {
            self.set_state(PlaybackState::Idle);
        }
    }

    // --- Async completions ---

    fn on_utterance_finished(&mut self, seq: u64, outcome: SpeechOutcome) {
        if seq != self.seq || self.state != PlaybackState::Playing {
            debug!("Ignoring stale utterance #{seq} ({outcome:?})");
            return;
        }
        self.in_flight = None;

        match outcome {
            SpeechOutcome::Completed => debug!("Utterance #{seq} completed"),
            SpeechOutcome::Failed { kind, reason } => {
                warn!("Utterance #{seq} failed on every backend ({kind}): {reason}")
            }
            SpeechOutcome::Cancelled => warn!("Utterance #{seq} cancelled externally"),
        }

        let delay = Duration::from_millis(self.config.inter_post_delay_ms);
        self.begin_transition(delay, self.config.cue_enabled);
    }

    fn on_transition_elapsed(&mut self, seq: u64) {
        if seq != self.seq || self.state != PlaybackState::Transitioning {
            debug!("Ignoring stale transition #{seq}");
            return;
        }
        self.advance();
    }

    fn on_thread_loaded(&mut self, seq: u64, result: Result<Vec<Post>, NarrationError>) {
        if seq != self.seq || self.state != PlaybackState::Transitioning {
            debug!("Ignoring stale thread load #{seq}");
            return;
        }
        match result {
            Ok(posts) if posts.is_empty() => {
                info!("Thread has no posts, moving on");
                self.advance_thread();
            }
            Ok(posts) => {
                if let Some(thread) = self.current_thread_mut() {
                    thread.posts = posts;
                }
                self.cursor.rewind();
                self.play_current();
            }
            Err(e) => self.finish(Notice::ContentUnavailable(e.to_string())),
        }
    }

    fn on_boards_listed(&mut self, seq: u64, result: Result<Vec<BoardId>, NarrationError>) {
        if seq != self.seq || self.state != PlaybackState::Transitioning {
            return;
        }
        let boards = match result {
            Ok(boards) => boards,
            Err(e) => return self.finish(Notice::ContentUnavailable(e.to_string())),
        };

        let current = self.current_board().map(|b| b.id.clone());
        let candidates: Vec<BoardId> = boards
            .into_iter()
            .filter(|b| !self.config.board_denylist.contains(b))
            .filter(|b| Some(b) != current.as_ref())
            .collect();

        let Some(board) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            info!("No eligible board to advance to");
            return self.finish(Notice::EndOfContent);
        };

        info!("Selected random board: /{board}/");
        self.events.notice(Notice::BoardSelected(board.clone()));

        let content = self.content.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = content.get_threads(&board).await;
            let _ = tx.send(ControllerEvent::BoardLoaded { seq, board, result });
        });
    }

    fn on_board_loaded(&mut self, seq: u64, board: BoardId, result: Result<Vec<Thread>, NarrationError>) {
        if seq != self.seq || self.state != PlaybackState::Transitioning {
            return;
        }
        let threads = match result {
            Ok(threads) if threads.is_empty() => return self.finish(Notice::EndOfContent),
            Ok(threads) => threads,
            Err(e) => return self.finish(Notice::ContentUnavailable(e.to_string())),
        };

        info!("Auto-advancing to /{board}/ ({} threads)", threads.len());
        let index = self.store_board(board, threads);
        self.cursor = NarrationCursor {
            board_index: index,
            ..NarrationCursor::default()
        };
        self.play_current();
    }

    // --- Sequencing ---

    /// Enter TRANSITIONING: optional cue, then `pause`, then advance.
    fn begin_transition(&mut self, pause: Duration, with_cue: bool) {
        self.set_state(PlaybackState::Transitioning);
        self.advance_pending = true;
        let seq = self.bump_seq();

        let cue = with_cue.then(|| self.cue.clone());
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Some(cue) = cue {
                cue.play().await;
            }
            tokio::time::sleep(pause).await;
            let _ = tx.send(ControllerEvent::TransitionElapsed { seq });
        });
    }

    /// Move to the next post, or up the hierarchy when the thread is done.
    fn advance(&mut self) {
        if self.cursor.post_index + 1 < self.current_posts().len() {
            self.cursor.post_index += 1;
            self.play_current();
        } else {
            self.advance_thread();
        }
    }

    fn advance_thread(&mut self) {
        let thread_count = self.current_board().map_or(0, |b| b.threads.len());
        if self.cursor.thread_index + 1 < thread_count {
            self.cursor.thread_index += 1;
            self.cursor.rewind();
            info!("End of thread, advancing to thread {}", self.cursor.thread_index + 1);
            self.play_current();
            return;
        }

        if self.auto_advance_boards {
            info!("End of board, selecting another board");
            let seq = self.seq;
            let content = self.content.clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let result = content.list_boards().await;
                let _ = tx.send(ControllerEvent::BoardsListed { seq, result });
            });
            return;
        }

        self.finish(Notice::EndOfContent);
    }

    /// Speak the post under the cursor, loading its thread first if needed.
    fn play_current(&mut self) {
        if self.current_posts().is_empty() {
            let Some(thread_id) = self.current_thread().map(|t| t.id) else {
                return self.finish(Notice::EndOfContent);
            };
            self.set_state(PlaybackState::Transitioning);
            self.advance_pending = false;
            let seq = self.bump_seq();
            let content = self.content.clone();
            let tx = self.tx.clone();
            let settle = Duration::from_millis(self.config.auto_advance_delay_ms);
            info!("Loading thread {thread_id}");
            tokio::spawn(async move {
                let result = content.get_posts(thread_id).await;
                tokio::time::sleep(settle).await;
                let _ = tx.send(ControllerEvent::ThreadLoaded { seq, result });
            });
            return;
        }

        self.advance_pending = false;
        self.set_state(PlaybackState::Playing);
        self.emit_progress();
        self.speak_current();
    }

    fn speak_current(&mut self) {
        let (post, body, key) = {
            let Some(thread) = self.current_thread() else {
                return;
            };
            let Some(post) = thread.posts.get(self.cursor.post_index) else {
                return;
            };
            let key = IdentityKey::for_post(self.config.voice_keying, thread.id, post);
            (post.clone(), self.normalizer.body_text(post, thread), key)
        };

        let voice = self.assignor.assign(&key, &self.voices.list_voices());
        self.cancel_in_flight();
        let seq = self.bump_seq();
        info!(
            "Reading post {} of {} (utterance #{seq}, {} chars)",
            self.cursor.post_index + 1,
            self.current_posts().len(),
            body.len()
        );

        // Only still images get a caption.
        let describer = self
            .describer
            .clone()
            .filter(|_| post.attachment.as_ref().is_some_and(|a| !a.is_video()));
        let selector = self.selector.clone();
        let tx = self.tx.clone();
        let params = self.params;
        self.in_flight = Some(tokio::spawn(async move {
            let caption = match (describer, &post.attachment) {
                (Some(describer), Some(attachment)) => describer.describe(attachment).await,
                _ => None,
            };
            let text = normalizer::compose(&post, &body, caption.as_deref());
            let outcome = selector.speak(&text, &voice, &params).await;
            let _ = tx.send(ControllerEvent::UtteranceFinished { seq, outcome });
        }));
    }

    /// Stop the session with a terminal notice.
    fn finish(&mut self, notice: Notice) {
        self.cancel_in_flight();
        self.bump_seq();
        self.advance_pending = false;
        self.cursor.rewind();
        info!("Narration finished: {notice}");
        self.events.notice(notice);
        self.emit_progress();
        self.set_state(PlaybackState::Stopped);
    }

    fn cancel_in_flight(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            self.selector.cancel();
            handle.abort();
        }
    }

    fn bump_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn set_state(&mut self, to: PlaybackState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!("State: {from} → {to}");
        self.events.emit(SessionEvent::StateChanged { from, to });
    }

    // --- Cursor helpers ---

    fn current_board(&self) -> Option<&Board> {
        self.boards.get(self.cursor.board_index)
    }

    fn current_thread(&self) -> Option<&Thread> {
        self.current_board()?.threads.get(self.cursor.thread_index)
    }

    fn current_thread_mut(&mut self) -> Option<&mut Thread> {
        self.boards
            .get_mut(self.cursor.board_index)?
            .threads
            .get_mut(self.cursor.thread_index)
    }

    fn current_posts(&self) -> &[Post] {
        self.current_thread().map_or(&[], |t| t.posts.as_slice())
    }

    fn emit_progress(&self) {
        let (Some(board), Some(thread)) = (self.current_board(), self.current_thread()) else {
            return;
        };
        self.events.emit(SessionEvent::Progress(Progress {
            post_index: self.cursor.post_index,
            total_posts: thread.posts.len(),
            board_id: board.id.clone(),
            thread_id: thread.id,
        }));
    }
}
