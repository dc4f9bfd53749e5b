/// Media engine boundary.
///
/// The core never talks IPC itself: it pushes `EngineCommand`s onto an
/// ordered queue drained by one worker task, and receives `EngineEvent`s back
/// through its own event channel.
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Replace whatever is playing with `url`.
    Load(String),
    /// 0..=150
    Volume(u8),
    Mute(bool),
    Pause(bool),
}

/// Why the engine stopped playing a file.  Only `Error` drives retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Eof,
    Stop,
    Quit,
    Error,
    Redirect,
    Unknown,
}

impl EndReason {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "eof" => EndReason::Eof,
            "stop" => EndReason::Stop,
            "quit" => EndReason::Quit,
            "error" => EndReason::Error,
            "redirect" => EndReason::Redirect,
            _ => EndReason::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    FileLoaded,
    EndFile {
        reason: EndReason,
        /// Engine-supplied detail, e.g. "loading failed".
        error: Option<String>,
    },
    Shutdown,
}

impl EngineEvent {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            EngineEvent::EndFile {
                reason: EndReason::Error,
                ..
            }
        )
    }
}

#[async_trait]
pub trait MediaEngine: Send {
    async fn execute(&mut self, cmd: EngineCommand) -> anyhow::Result<()>;
}

/// Drain `rx` in order, one command at a time.  Failures are logged and the
/// worker keeps going.
pub fn spawn_engine_worker<E>(mut engine: E, mut rx: mpsc::Receiver<EngineCommand>) -> JoinHandle<()>
where
    E: MediaEngine + 'static,
{
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            debug!("engine: {:?}", cmd);
            if let Err(e) = engine.execute(cmd.clone()).await {
                warn!("engine: {:?} failed: {}", cmd, e);
            }
        }
        info!("engine: command queue closed, worker exiting");
    })
}

/// Stands in for a player when running headless (`--no-engine`).
#[derive(Debug, Default)]
pub struct NullEngine;

#[async_trait]
impl MediaEngine for NullEngine {
    async fn execute(&mut self, cmd: EngineCommand) -> anyhow::Result<()> {
        info!("engine(null): {:?}", cmd);
        Ok(())
    }
}
