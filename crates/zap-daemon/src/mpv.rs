/// mpv JSON IPC driver with separated reader/writer tasks.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, writes → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event                     → event_tx channel
/// ```
///
/// `MpvEngine` wraps the driver behind the `MediaEngine` trait: it spawns mpv
/// lazily on the first `Load`, respawns it when the process has died, and
/// translates raw mpv events into `EngineEvent`s for the core.
///
/// Platform notes:
/// - Unix:    Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use zap_proto::config::MpvConfig;
use zap_proto::platform;

use crate::engine::{EndReason, EngineCommand, EngineEvent, MediaEngine};
use crate::session::MAX_VOLUME;

const IPC_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(5);

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

// ── internal channel types ────────────────────────────────────────────────────

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line, '\n' included
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An unsolicited mpv message (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// The subset of mpv events the session cares about.
    pub fn to_engine_event(&self) -> Option<EngineEvent> {
        match self.event_name()? {
            "file-loaded" => Some(EngineEvent::FileLoaded),
            "end-file" => {
                let reason = self
                    .raw
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(EndReason::parse)
                    .unwrap_or(EndReason::Unknown);
                let error = self
                    .raw
                    .get("file_error")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Some(EngineEvent::EndFile { reason, error })
            }
            "shutdown" => Some(EngineEvent::Shutdown),
            _ => None,
        }
    }
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: u8) -> anyhow::Result<()> {
        let vol = volume.min(MAX_VOLUME);
        self.send(json!(["set_property", "volume", vol])).await?;
        Ok(())
    }

    pub async fn set_mute(&self, muted: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "mute", muted])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    options: MpvConfig,
}

impl MpvDriver {
    pub fn new(options: MpvConfig) -> Self {
        Self {
            socket_name: platform::mpv_socket_name(),
            process: None,
            options,
        }
    }

    pub fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    /// Player options for live TV: demuxer cache sized for network streams,
    /// no on-screen controller, window kept around between channels.
    fn args(&self, volume: u8, muted: bool) -> Vec<String> {
        let o = &self.options;
        vec![
            "--idle=yes".to_string(),
            "--keep-open=yes".to_string(),
            "--force-window=yes".to_string(),
            "--osc=no".to_string(),
            "--osd-level=0".to_string(),
            format!("--hwdec={}", o.hwdec),
            "--cache=yes".to_string(),
            "--demuxer-max-bytes=50MiB".to_string(),
            "--demuxer-max-back-bytes=10MiB".to_string(),
            format!("--cache-secs={}", o.cache_secs),
            format!("--network-timeout={}", o.network_timeout_secs),
            format!("--volume-max={}", MAX_VOLUME),
            format!("--volume={}", volume.min(MAX_VOLUME)),
            format!("--mute={}", if muted { "yes" } else { "no" }),
            "--quiet".to_string(),
            platform::mpv_socket_arg(),
        ]
    }

    async fn spawn_process(&mut self, volume: u8, muted: bool) -> anyhow::Result<()> {
        self.kill().await;

        info!("mpv: spawning new process");
        let mpv_binary =
            platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let child = tokio::process::Command::new(mpv_binary)
            .args(self.args(volume, muted))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);
        Ok(())
    }

    #[cfg(unix)]
    pub async fn spawn_and_connect(
        &mut self,
        volume: u8,
        muted: bool,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process(volume, muted).await?;

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    pub async fn spawn_and_connect(
        &mut self,
        volume: u8,
        muted: bool,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.spawn_process(volume, muted).await?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn fail_all(pending: &PendingMap, why: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("mpv IPC {}", why)));
    }
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "read error").await;
                break;
            }
        }
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── MediaEngine adapter ───────────────────────────────────────────────────────

/// `MediaEngine` backed by an mpv child process.  Engine events are delivered
/// as `T` (the core's event type) so no extra forwarding hop is needed.
pub struct MpvEngine<T> {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    events: mpsc::Sender<T>,
    volume: u8,
    muted: bool,
}

impl<T> MpvEngine<T>
where
    T: From<EngineEvent> + Send + 'static,
{
    pub fn new(options: MpvConfig, events: mpsc::Sender<T>) -> Self {
        Self {
            driver: MpvDriver::new(options),
            handle: None,
            events,
            volume: 100,
            muted: false,
        }
    }

    /// Handle to a live player, spawning one if needed.
    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        if let Some(handle) = &self.handle {
            if self.driver.process_alive() {
                return Ok(handle.clone());
            }
            warn!("mpv: process gone, respawning");
        }
        self.handle = None;

        let (raw_tx, mut raw_rx) = mpsc::channel::<MpvEvent>(64);
        let handle = self
            .driver
            .spawn_and_connect(self.volume, self.muted, raw_tx)
            .await?;

        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(ev) = raw_rx.recv().await {
                if let Some(engine_event) = ev.to_engine_event() {
                    if events.send(T::from(engine_event)).await.is_err() {
                        break;
                    }
                }
            }
            debug!("mpv: event forwarder exiting");
        });

        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Live handle without spawning.
    fn live_handle(&mut self) -> Option<MpvHandle> {
        if self.driver.process_alive() {
            self.handle.clone()
        } else {
            None
        }
    }
}

#[async_trait]
impl<T> MediaEngine for MpvEngine<T>
where
    T: From<EngineEvent> + Send + 'static,
{
    async fn execute(&mut self, cmd: EngineCommand) -> anyhow::Result<()> {
        match cmd {
            EngineCommand::Load(url) => {
                let handle = self.ensure_handle().await?;
                if let Err(e) = handle.load_stream(&url).await {
                    // The reply channel may have died with the process; one
                    // respawn attempt before giving up.
                    warn!("mpv: loadfile failed ({}), retrying on a fresh process", e);
                    self.driver.kill().await;
                    let handle = self.ensure_handle().await?;
                    handle.load_stream(&url).await?;
                }
                Ok(())
            }
            // Output settings are remembered so a later spawn starts with
            // them; they never spawn a player on their own.
            EngineCommand::Volume(v) => {
                self.volume = v.min(MAX_VOLUME);
                match self.live_handle() {
                    Some(h) => h.set_volume(self.volume).await,
                    None => Ok(()),
                }
            }
            EngineCommand::Mute(m) => {
                self.muted = m;
                match self.live_handle() {
                    Some(h) => h.set_mute(m).await,
                    None => Ok(()),
                }
            }
            EngineCommand::Pause(p) => match self.live_handle() {
                Some(h) => h.set_pause(p).await,
                None => Ok(()),
            },
        }
    }
}
