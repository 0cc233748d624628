//! Public façade: one narration session backed by a controller task.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::content::ContentSource;
use crate::describe::{CachedDescriber, HttpImageDescriber, ImageDescriber};
use crate::controller::{Collaborators, Command, ControllerEvent, PlaybackController};
use crate::error::NarrationError;
use crate::events::{EventHub, Progress, SessionEvent};
use crate::model::ThreadId;
use crate::normalizer::TextNormalizer;
use crate::speech::cue::{CuePlayer, SilentCue, ToneCue};
use crate::speech::local::LocalSpeechBackend;
use crate::speech::remote::RemoteSpeechBackend;
use crate::speech::selector::BackendSelector;
use crate::speech::{SpeechBackend, SpeechParams};
use crate::voice::{usable_voices, StaticVoicePool, VoiceAssignor, VoicePool};

/// The swappable pieces a session is built from.
pub struct SessionParts {
    pub selector: Arc<BackendSelector>,
    pub voices: Arc<dyn VoicePool>,
    pub content: Arc<dyn ContentSource>,
    pub cue: Arc<dyn CuePlayer>,
    /// Captions image attachments when present.
    pub describer: Option<Arc<dyn ImageDescriber>>,
    pub events: EventHub,
}

impl SessionParts {
    /// Real backends from config. The remote capability is decided here,
    /// once; a session without it never tries the remote path.
    pub fn from_config(
        config: &Config,
        content: Arc<dyn ContentSource>,
        events: EventHub,
        allow_remote: bool,
    ) -> Self {
        let local: Arc<dyn SpeechBackend> =
            Arc::new(LocalSpeechBackend::new(config.local.program.clone()));

        let remote: Option<Arc<dyn SpeechBackend>> =
            if allow_remote && config.remote.is_available() {
                match RemoteSpeechBackend::new(&config.remote) {
                    Ok(backend) => {
                        info!("Remote speech available at {}", config.remote.endpoint);
                        Some(Arc::new(backend))
                    }
                    Err(e) => {
                        warn!("Remote speech unavailable: {e}");
                        None
                    }
                }
            } else {
                info!("Remote speech not configured, using local speech only");
                None
            };

        let selector = Arc::new(BackendSelector::new(
            remote,
            local,
            config.remote.max_failures,
            events.clone(),
        ));

        let voices = usable_voices(config.local.voices.clone());
        info!("{} voices available", voices.len());

        let cue: Arc<dyn CuePlayer> = if config.narration.cue_enabled {
            Arc::new(ToneCue::default())
        } else {
            Arc::new(SilentCue)
        };

        let describer = HttpImageDescriber::from_config(&config.images).map(|http| {
            Arc::new(CachedDescriber::new(http, config.images.media_host.clone()))
                as Arc<dyn ImageDescriber>
        });

        Self {
            selector,
            voices: Arc::new(StaticVoicePool::new(voices)),
            content,
            cue,
            describer,
            events,
        }
    }
}

pub struct NarrationSession {
    tx: mpsc::UnboundedSender<ControllerEvent>,
    content: Arc<dyn ContentSource>,
    selector: Arc<BackendSelector>,
    events: EventHub,
    task: JoinHandle<()>,
}

impl NarrationSession {
    /// Spawn the controller. Must be called inside a tokio runtime.
    pub fn new(config: &Config, parts: SessionParts) -> Self {
        let collaborators = Collaborators {
            normalizer: TextNormalizer::from_config(&config.narration),
            assignor: VoiceAssignor::new(config.narration.voice_selection),
            voices: parts.voices,
            selector: parts.selector.clone(),
            content: parts.content.clone(),
            cue: parts.cue,
            describer: parts.describer,
            events: parts.events.clone(),
        };
        let controller = PlaybackController::new(
            config.narration.clone(),
            SpeechParams::from(&config.speech),
            collaborators,
        );
        let tx = controller.sender();
        let task = tokio::spawn(controller.run());

        Self {
            tx,
            content: parts.content,
            selector: parts.selector,
            events: parts.events,
            task,
        }
    }

    fn send(&self, command: Command) -> Result<(), NarrationError> {
        self.tx
            .send(ControllerEvent::Command(command))
            .map_err(|_| NarrationError::SessionClosed)
    }

    /// Begin or resume reading. Fails when nothing is loaded.
    pub async fn start(&self) -> Result<(), NarrationError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start(reply))?;
        rx.await.map_err(|_| NarrationError::SessionClosed)?
    }

    pub fn pause(&self) -> Result<(), NarrationError> {
        self.send(Command::Pause)
    }

    pub fn stop(&self) -> Result<(), NarrationError> {
        self.send(Command::Stop)
    }

    pub fn skip(&self) -> Result<(), NarrationError> {
        self.send(Command::Skip)
    }

    /// Fetch a board's threads and position the cursor on its first thread.
    /// Returns the number of threads.
    pub async fn load_board(&self, board: &str) -> Result<usize, NarrationError> {
        let threads = self.content.get_threads(board).await?;
        let count = threads.len();
        self.send(Command::InstallBoard {
            board: board.to_string(),
            threads,
        })?;
        Ok(count)
    }

    /// Fetch a thread's posts and position the cursor on its first post.
    /// Returns the number of posts.
    pub async fn load_thread(&self, thread: ThreadId) -> Result<usize, NarrationError> {
        let posts = self.content.get_posts(thread).await?;
        let count = posts.len();
        self.send(Command::InstallThread { thread, posts })?;
        Ok(count)
    }

    pub fn set_auto_advance(&self, enabled: bool) -> Result<(), NarrationError> {
        self.send(Command::SetAutoAdvance(enabled))
    }

    pub fn set_remote_enabled(&self, enabled: bool) -> Result<(), NarrationError> {
        self.send(Command::SetRemoteEnabled(enabled))
    }

    /// Reset the remote failure count and allow remote speech again.
    pub fn reenable_remote(&self) -> Result<(), NarrationError> {
        self.send(Command::ReenableRemote)
    }

    pub fn backend_health(&self) -> crate::events::BackendHealth {
        self.selector.health()
    }

    pub fn on_progress(&self, callback: impl Fn(&Progress) + Send + Sync + 'static) {
        self.events.on_progress(callback);
    }

    pub fn on_event(&self, observer: impl Fn(&SessionEvent) + Send + Sync + 'static) {
        self.events.on_event(observer);
    }

    /// Cancel any speech and wait for the controller to exit.
    pub async fn shutdown(self) {
        let _ = self.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            warn!("Narration controller ended abnormally: {e}");
        }
    }
}
