use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use zap_daemon::console::{self, ConsoleInput};
use zap_daemon::core::{CoreEvent, CoreIo, CoreSettings, ZapCore};
use zap_daemon::engine::{spawn_engine_worker, EngineCommand, NullEngine};
use zap_daemon::http::HttpFetcher;
use zap_daemon::logging;
use zap_daemon::mpv::MpvEngine;
use zap_proto::config::Config;
use zap_proto::platform;
use zap_proto::protocol::{Command, Notification};
use zap_proto::state::PersistentState;

#[derive(Debug, Parser)]
#[command(name = "zapd", version, about = "Live TV playlist player")]
struct Args {
    /// Config file (default: <config dir>/zaptv/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Playlist URL, overriding the config
    #[arg(long)]
    playlist: Option<String>,

    /// Run without spawning mpv; engine commands are only logged
    #[arg(long)]
    no_engine: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Broadcast first so the log layer can forward warnings to it.
    let (notify_tx, _) = broadcast::channel::<Notification>(256);

    let log_path = logging::init(&platform::data_dir(), notify_tx.clone())?;
    info!("Log file: {:?}", log_path);

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)?;
    info!("Config loaded from: {:?}", config_path);
    if let Some(url) = args.playlist {
        config.playlist.url = url;
    }

    let persisted = PersistentState::load(&config.daemon.state_file);

    let playlist_fetcher = Arc::new(HttpFetcher::new(
        &config.playlist.user_agent,
        config.playlist.max_redirects,
    )?);
    let logo_fetcher = Arc::new(HttpFetcher::new(
        &config.playlist.user_agent,
        config.logos.max_redirects,
    )?);

    // All inputs funnel into ZapCore through this channel.
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(256);
    let (engine_tx, engine_rx) = mpsc::channel::<EngineCommand>(64);

    let _engine = if args.no_engine {
        spawn_engine_worker(NullEngine, engine_rx)
    } else {
        spawn_engine_worker(
            MpvEngine::new(config.mpv.clone(), event_tx.clone()),
            engine_rx,
        )
    };

    let core = ZapCore::new(
        CoreSettings::from_config(&config),
        persisted,
        CoreIo {
            playlist_fetcher,
            logo_fetcher,
            engine_tx,
            notify_tx: notify_tx.clone(),
            event_tx: event_tx.clone(),
        },
    );
    let core_handle = tokio::spawn(core.run(event_rx));

    tokio::spawn(print_notifications(notify_tx.subscribe()));

    let _ = event_tx
        .send(Command::LoadPlaylist { url: None }.into())
        .await;

    read_console(event_tx.clone()).await;

    let _ = event_tx.send(CoreEvent::Shutdown).await;
    match core_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("core exited with error: {}", e),
        Err(e) => error!("core task panicked: {}", e),
    }
    info!("zapd exiting");
    Ok(())
}

/// Stdin stands in for a renderer: one command per line until `quit` or EOF.
async fn read_console(event_tx: mpsc::Sender<CoreEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("zapd ready, 'help' for commands");
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("stdin read failed: {}", e);
                break;
            }
        };
        match console::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleInput::Help)) => eprintln!("{}", console::HELP),
            Ok(Some(ConsoleInput::Quit)) => break,
            Ok(Some(ConsoleInput::Command(cmd))) => {
                if event_tx.send(cmd.into()).await.is_err() {
                    break;
                }
            }
            Err(e) => eprintln!("{}", e),
        }
    }
}

/// One JSON object per line on stdout.
async fn print_notifications(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(n) => match serde_json::to_string(&n) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("failed to encode notification: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                eprintln!("(skipped {} notifications)", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
