//! board-narrator: reads imageboard threads aloud.

use std::path::PathBuf;
use std::sync::Arc;

use board_narrator::content::{ContentSource, SnapshotSource};
use board_narrator::events::{EventHub, SessionEvent};
use board_narrator::notifier::Notifier;
use board_narrator::{Config, NarrationSession, SessionParts};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "board-narrator", about = "Reads imageboard threads aloud")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON content dump to read from
    #[arg(long)]
    content: PathBuf,

    /// Board to open (defaults to the first board in the dump)
    #[arg(short, long)]
    board: Option<String>,

    /// Thread to start reading (defaults to the board's first thread)
    #[arg(short, long)]
    thread: Option<u64>,

    /// Move on to a random board when the current one runs out
    #[arg(long)]
    auto_advance: bool,

    /// Never use the remote speech service
    #[arg(long)]
    no_remote: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

const HELP: &str = "Commands: p = play/resume, s = stop, Enter/k = pause, n = next post, \
                    r = re-enable remote speech, t = toggle remote speech, a = toggle auto-advance, q = quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Audio stacks are chatty at debug
    let filter = if args.verbose {
        EnvFilter::new("debug,reqwest=info,hyper_util=info,rodio=info")
    } else {
        EnvFilter::new("info,reqwest=warn,hyper_util=warn,rodio=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("board-narrator starting");

    let mut config = Config::load(args.config.as_deref());
    if args.auto_advance {
        config.narration.auto_advance_boards = true;
    }

    let content: Arc<dyn ContentSource> = Arc::new(SnapshotSource::from_file(&args.content)?);

    let events = EventHub::new();
    Notifier::new(config.feedback.notifications).attach(&events);
    events.on_event(|event| match event {
        SessionEvent::Progress(p) => info!(
            "/{}/ thread {}: post {} of {}",
            p.board_id,
            p.thread_id,
            p.post_index + 1,
            p.total_posts
        ),
        SessionEvent::Notice(notice) => info!("{notice}"),
        _ => {}
    });

    let parts = SessionParts::from_config(&config, content.clone(), events, !args.no_remote);
    let session = NarrationSession::new(&config, parts);

    let board = match args.board {
        Some(board) => board,
        None => content
            .list_boards()
            .await?
            .into_iter()
            .next()
            .ok_or("content dump has no boards")?,
    };
    let threads = session.load_board(&board).await?;
    info!("Opened /{board}/ with {threads} threads");

    if let Some(thread) = args.thread {
        let posts = session.load_thread(thread).await?;
        info!("Opened thread {thread} with {posts} posts");
    }

    if let Err(e) = session.start().await {
        warn!("Could not start reading: {e}");
    }
    info!("{HELP}");

    let mut auto_advance = config.narration.auto_advance_boards;
    let mut remote_enabled = !args.no_remote;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let result = match line.trim() {
                    "p" => session.start().await,
                    "" | "k" => session.pause(),
                    "s" => session.stop(),
                    "n" => session.skip(),
                    "r" => session.reenable_remote(),
                    "t" => {
                        remote_enabled = !remote_enabled;
                        session.set_remote_enabled(remote_enabled)
                    }
                    "a" => {
                        auto_advance = !auto_advance;
                        session.set_auto_advance(auto_advance)
                    }
                    "q" => break,
                    other => {
                        info!("Unknown command {other:?}. {HELP}");
                        Ok(())
                    }
                };
                if let Err(e) = result {
                    warn!("{e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
        }
    }

    info!("Shutting down...");
    session.shutdown().await;
    Ok(())
}
