/// Single-owner coordination loop.
///
/// Every input (client commands, playlist fetch results, logo completions,
/// engine events, timer firings, probe results) arrives as a message and is
/// handled to completion before the next one, so catalog, view, session and
/// scheduler need no locks.
///
/// ```text
///   clients ──Command──┐
///   fetch tasks ───────┤
///   mpv events ────────┼──► CoreEvent (mpsc) ──► ZapCore::run ──► Notification (broadcast)
///   timers / probe ────┘                              │
///                                                     ├──► EngineCommand (mpsc, ordered)
///   logo tasks ──► LogoCompletion (mpsc) ─────────────┘
/// ```
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use zap_proto::catalog::{zap, Catalog, FilterState};
use zap_proto::config::Config;
use zap_proto::playlist::{is_http_url, parse_playlist, Playlist};
use zap_proto::protocol::{Command, Notification, ALL_CATEGORY};
use zap_proto::state::PersistentState;

use crate::engine::{EngineCommand, EngineEvent};
use crate::http::{FetchError, FetchLimits, Fetcher};
use crate::logos::{LogoCache, LogoCompletion, LogoMap, LogoScheduler, LogoSettings};
use crate::session::{PlaybackSession, RetryPolicy, Selection, SessionAction};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Selection debounce before tuning.
    Tune,
    /// Delay before reconnecting a failed stream.
    Retry,
    /// Search field debounce.
    Search,
}

#[derive(Debug)]
pub enum CoreEvent {
    Command(Command),
    PlaylistFetched {
        generation: u64,
        result: Result<Playlist, FetchError>,
    },
    Engine(EngineEvent),
    Timer {
        kind: TimerKind,
        token: u64,
    },
    Probe {
        online: bool,
    },
    Shutdown,
}

impl From<EngineEvent> for CoreEvent {
    fn from(event: EngineEvent) -> Self {
        CoreEvent::Engine(event)
    }
}

impl From<Command> for CoreEvent {
    fn from(cmd: Command) -> Self {
        CoreEvent::Command(cmd)
    }
}

/// Everything the core needs from `Config`, flattened.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub playlist_url: String,
    pub playlist_limits: FetchLimits,
    /// `None` disables the reachability probe.
    pub probe_interval: Option<Duration>,
    pub search_debounce: Duration,
    pub autoplay_last_stream: bool,
    pub policy: RetryPolicy,
    pub logos: LogoSettings,
    /// Where `PersistentState` is written on volume/mute changes and at
    /// shutdown.  `None` skips it.
    pub state_file: Option<PathBuf>,
}

impl CoreSettings {
    pub fn from_config(config: &Config) -> Self {
        let probe = config.playlist.probe_interval_secs;
        Self {
            playlist_url: config.playlist.url.clone(),
            playlist_limits: FetchLimits {
                max_bytes: config.playlist.max_bytes,
                timeout: config.playlist.timeout(),
            },
            probe_interval: (probe > 0).then(|| Duration::from_secs(probe)),
            search_debounce: config.playback.search_debounce(),
            autoplay_last_stream: config.playback.autoplay_last_stream,
            policy: RetryPolicy::from(&config.playback),
            logos: LogoSettings::from(&config.logos),
            state_file: Some(config.daemon.state_file.clone()),
        }
    }
}

/// Inputs the core does not own.
pub struct CoreIo {
    pub playlist_fetcher: Arc<dyn Fetcher>,
    pub logo_fetcher: Arc<dyn Fetcher>,
    pub engine_tx: mpsc::Sender<EngineCommand>,
    pub notify_tx: broadcast::Sender<Notification>,
    /// Clone of the sender feeding `run`; used by timers and fetch tasks.
    pub event_tx: mpsc::Sender<CoreEvent>,
}

pub struct ZapCore {
    settings: CoreSettings,
    playlist_fetcher: Arc<dyn Fetcher>,
    engine_tx: mpsc::Sender<EngineCommand>,
    notify_tx: broadcast::Sender<Notification>,
    event_tx: mpsc::Sender<CoreEvent>,

    catalog: Catalog,
    filter: FilterState,
    /// Catalog indices of the current view, in display order.
    visible: Vec<usize>,
    /// Highlighted position in `visible`.
    selected: Option<usize>,
    /// Stream of the last picked channel, used to keep the highlight across
    /// view changes.
    selected_stream: Option<String>,
    search_draft: String,
    search_token: u64,

    session: PlaybackSession,
    scheduler: LogoScheduler,
    logo_rx: Option<mpsc::Receiver<LogoCompletion>>,
    cache: LogoCache,

    /// URL of the playlist currently shown (or being fetched).
    playlist_url: String,
    playlist_generation: u64,
    loaded_once: bool,
    last_stream: Option<String>,
    online: Option<bool>,
}

impl ZapCore {
    pub fn new(settings: CoreSettings, persisted: PersistentState, io: CoreIo) -> Self {
        let (logo_tx, logo_rx) = mpsc::channel(256);
        let scheduler = LogoScheduler::new(settings.logos, io.logo_fetcher, logo_tx);
        let session = PlaybackSession::new(settings.policy, persisted.volume, persisted.muted);

        Self {
            playlist_url: settings.playlist_url.clone(),
            settings,
            playlist_fetcher: io.playlist_fetcher,
            engine_tx: io.engine_tx,
            notify_tx: io.notify_tx,
            event_tx: io.event_tx,

            catalog: Catalog::new(),
            filter: FilterState::new(persisted.last_category, ""),
            visible: Vec::new(),
            selected: None,
            selected_stream: persisted.last_stream.clone(),
            search_draft: String::new(),
            search_token: 0,

            session,
            scheduler,
            logo_rx: Some(logo_rx),
            cache: LogoCache::new(),

            playlist_generation: 0,
            loaded_once: false,
            last_stream: persisted.last_stream,
            online: None,
        }
    }

    /// Read side of the logo cache for renderers.
    pub fn logo_reader(&self) -> watch::Receiver<Arc<LogoMap>> {
        self.cache.reader()
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("ZapCore: starting event loop");
        let mut logo_rx = self
            .logo_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("ZapCore: logo channel already taken"))?;

        let mut probe = self.settings.probe_interval.map(|every| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        // Push the restored output settings so the engine starts with them.
        self.send_engine(EngineCommand::Volume(self.session.volume()))
            .await;
        self.send_engine(EngineCommand::Mute(self.session.muted()))
            .await;

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(CoreEvent::Shutdown) | None => break,
                        Some(event) => self.handle_event(event).await,
                    }
                }
                Some(done) = logo_rx.recv() => {
                    self.on_logo_done(done);
                }
                _ = next_tick(&mut probe) => {
                    self.spawn_probe();
                }
            }
        }

        info!("ZapCore: shutting down");
        self.save_state();
        Ok(())
    }

    async fn handle_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::Command(cmd) => self.handle_command(cmd).await,
            CoreEvent::PlaylistFetched { generation, result } => {
                self.on_playlist_fetched(generation, result).await
            }
            CoreEvent::Engine(ev) => {
                debug!("ZapCore: engine event {:?}", ev);
                let actions = self.session.on_engine_event(&ev);
                self.apply(actions).await;
            }
            CoreEvent::Timer { kind, token } => self.on_timer(kind, token).await,
            CoreEvent::Probe { online } => self.on_probe(online),
            CoreEvent::Shutdown => {}
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        debug!("ZapCore: command {:?}", cmd);
        match cmd {
            Command::LoadPlaylist { url } => self.load_playlist(url),
            Command::SelectCategory { name } => {
                if name != ALL_CATEGORY && !self.catalog.has_category(&name) {
                    warn!("ZapCore: unknown category '{}'", name);
                    return;
                }
                self.filter.category = name;
                self.refresh_view();
            }
            Command::Search { term } => {
                self.search_draft = term;
                self.search_token += 1;
                self.arm_timer(
                    TimerKind::Search,
                    self.search_token,
                    self.settings.search_debounce,
                );
            }
            Command::Select { position } => self.select_position(position).await,
            Command::Zap { direction } => {
                let current = self.selected.unwrap_or(0);
                match zap(direction, self.visible.len(), current) {
                    Some(next) => self.select_position(next).await,
                    None => debug!("ZapCore: zap on empty view"),
                }
            }
            Command::Retry => {
                let actions = self.session.retry();
                self.apply(actions).await;
            }
            Command::Volume { delta } => {
                let actions = self.session.set_volume(delta);
                self.apply(actions).await;
            }
            Command::ToggleMute => {
                let actions = self.session.toggle_mute();
                self.apply(actions).await;
            }
            Command::TogglePause => {
                let actions = self.session.toggle_pause();
                self.apply(actions).await;
            }
            Command::GetState => {
                self.notify(Notification::SessionChanged(self.session.snapshot()));
                self.notify_view();
            }
        }
    }

    async fn select_position(&mut self, position: usize) {
        let Some(&idx) = self.visible.get(position) else {
            warn!(
                "ZapCore: position {} outside view of {}",
                position,
                self.visible.len()
            );
            return;
        };
        let Some(channel) = self.catalog.channel(idx) else {
            return;
        };
        let selection = Selection {
            name: channel.name.clone(),
            category: channel.category.clone(),
            stream_url: channel.stream_url.clone(),
            index: position,
            total: self.visible.len(),
        };
        self.selected = Some(position);
        self.selected_stream = Some(selection.stream_url.clone());
        self.notify_view();

        let actions = self.session.select(selection);
        self.apply(actions).await;
    }

    // ── playlist ──────────────────────────────────────────────────────────────

    fn load_playlist(&mut self, url: Option<String>) {
        let url = url.unwrap_or_else(|| self.settings.playlist_url.clone());
        if !is_http_url(&url) {
            self.status(format!("Invalid playlist URL: {}", url));
            return;
        }

        self.playlist_generation += 1;
        let generation = self.playlist_generation;
        self.playlist_url = url.clone();
        info!("ZapCore: loading playlist {} (gen {})", url, generation);
        self.status("Loading playlist...".to_string());

        let fetcher = Arc::clone(&self.playlist_fetcher);
        let limits = self.settings.playlist_limits;
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = match fetcher.get(&url, &limits).await {
                Ok(body) => {
                    let parsed = tokio::task::spawn_blocking(move || parse_playlist(&body)).await;
                    // A failed parse task reads as an empty playlist; the catalog stays.
                    Ok(parsed.unwrap_or_else(|e| {
                        error!("ZapCore: playlist parse task failed: {}", e);
                        Playlist::default()
                    }))
                }
                Err(e) => Err(e),
            };
            let _ = tx
                .send(CoreEvent::PlaylistFetched { generation, result })
                .await;
        });
    }

    async fn on_playlist_fetched(&mut self, generation: u64, result: Result<Playlist, FetchError>) {
        if generation != self.playlist_generation {
            debug!("ZapCore: dropping stale playlist gen {}", generation);
            return;
        }

        let playlist = match result {
            Ok(playlist) => playlist,
            Err(e) => {
                warn!("ZapCore: playlist fetch failed: {}", e);
                self.status(playlist_error_message(&e));
                return;
            }
        };

        if playlist.is_empty() {
            // Keep showing whatever we had.
            self.status("No valid channels found in playlist.".to_string());
            return;
        }

        let channels = playlist.channels.len();
        let categories = playlist.categories.clone();
        if let Some(epg) = &playlist.epg_url {
            debug!("ZapCore: playlist advertises EPG at {}", epg);
        }
        self.catalog.replace(playlist);
        info!(
            "ZapCore: catalog replaced, {} channels in {} categories",
            channels,
            categories.len().saturating_sub(1)
        );
        self.notify(Notification::CatalogReplaced {
            channels,
            categories: categories.clone(),
        });
        self.status(format!(
            "Loaded {} channels in {} categories",
            channels,
            categories.len().saturating_sub(1)
        ));

        if !self.catalog.has_category(&self.filter.category) {
            self.filter.category = ALL_CATEGORY.to_string();
        }
        self.refresh_view();

        let snapshot = self.catalog.snapshot();
        self.scheduler.schedule(&snapshot.channels, &self.cache);

        let first_load = !self.loaded_once;
        self.loaded_once = true;
        if first_load && self.settings.autoplay_last_stream {
            self.autoplay_last().await;
        }
    }

    async fn autoplay_last(&mut self) {
        let Some(url) = self.last_stream.clone() else {
            return;
        };
        let position = self
            .visible
            .iter()
            .position(|&i| self.catalog.channel(i).is_some_and(|c| c.stream_url == url));
        match position {
            Some(p) => {
                info!("ZapCore: resuming last stream at position {}", p);
                self.select_position(p).await;
            }
            None => debug!("ZapCore: last stream not in current view"),
        }
    }

    // ── view ──────────────────────────────────────────────────────────────────

    fn refresh_view(&mut self) {
        self.visible = self.catalog.visible_indices(&self.filter);
        self.selected = self.selected_stream.as_deref().and_then(|url| {
            self.visible
                .iter()
                .position(|&i| self.catalog.channel(i).is_some_and(|c| c.stream_url == url))
        });
        self.notify_view();
    }

    fn notify_view(&self) {
        self.notify(Notification::ViewChanged {
            category: self.filter.category.clone(),
            search: self.filter.search.clone(),
            count: self.visible.len(),
            visible: self.visible.clone(),
            selected: self.selected,
        });
    }

    // ── timers ────────────────────────────────────────────────────────────────

    fn arm_timer(&self, kind: TimerKind, token: u64, delay: Duration) {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreEvent::Timer { kind, token }).await;
        });
    }

    async fn on_timer(&mut self, kind: TimerKind, token: u64) {
        match kind {
            TimerKind::Tune => {
                let actions = self.session.debounce_elapsed(token);
                self.apply(actions).await;
            }
            TimerKind::Retry => {
                let actions = self.session.retry_elapsed(token);
                self.apply(actions).await;
            }
            TimerKind::Search => {
                if token != self.search_token || self.search_draft == self.filter.search {
                    return;
                }
                self.filter.search = self.search_draft.clone();
                self.refresh_view();
            }
        }
    }

    // ── session actions ───────────────────────────────────────────────────────

    async fn apply(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Load(url) => {
                    self.last_stream = Some(url.clone());
                    self.send_engine(EngineCommand::Load(url)).await;
                }
                SessionAction::SetVolume(v) => {
                    self.send_engine(EngineCommand::Volume(v)).await;
                    self.save_state();
                    self.notify_volume();
                }
                SessionAction::SetMute(m) => {
                    self.send_engine(EngineCommand::Mute(m)).await;
                    self.save_state();
                    self.notify_volume();
                }
                SessionAction::SetPause(p) => {
                    self.send_engine(EngineCommand::Pause(p)).await;
                }
                SessionAction::ArmDebounce { token, delay } => {
                    self.arm_timer(TimerKind::Tune, token, delay);
                }
                SessionAction::ArmRetry { token, delay } => {
                    self.arm_timer(TimerKind::Retry, token, delay);
                }
                SessionAction::StatusChanged => {
                    self.notify(Notification::SessionChanged(self.session.snapshot()));
                }
                SessionAction::Unavailable { name } => {
                    self.status(format!("{} is unavailable.", name));
                    self.notify(Notification::ChannelUnavailable { name });
                }
            }
        }
    }

    async fn send_engine(&self, cmd: EngineCommand) {
        if self.engine_tx.send(cmd).await.is_err() {
            warn!("ZapCore: engine worker gone");
        }
    }

    // ── logos / probe ─────────────────────────────────────────────────────────

    fn on_logo_done(&mut self, done: LogoCompletion) {
        if let Some((url, logo)) = self.scheduler.complete(done) {
            self.cache.insert(url.clone(), logo);
            self.notify(Notification::LogoReady { url });
        }
    }

    fn spawn_probe(&self) {
        let fetcher = Arc::clone(&self.playlist_fetcher);
        let url = self.playlist_url.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let online = match fetcher.head(&url, PROBE_TIMEOUT).await {
                Ok(()) => true,
                Err(e) => {
                    debug!("ZapCore: probe of {} failed: {}", url, e);
                    false
                }
            };
            let _ = tx.send(CoreEvent::Probe { online }).await;
        });
    }

    fn on_probe(&mut self, online: bool) {
        if self.online == Some(online) {
            return;
        }
        if self.online.is_some() {
            info!("ZapCore: connectivity changed, online={}", online);
        }
        self.online = Some(online);
        self.notify(Notification::Connectivity { online });
    }

    // ── output ────────────────────────────────────────────────────────────────

    fn notify(&self, n: Notification) {
        let _ = self.notify_tx.send(n);
    }

    fn notify_volume(&self) {
        self.notify(Notification::VolumeChanged {
            volume: self.session.volume(),
            muted: self.session.muted(),
        });
    }

    fn status(&self, message: String) {
        self.notify(Notification::Status { message });
    }

    fn save_state(&self) {
        let Some(path) = &self.settings.state_file else {
            return;
        };
        let state = PersistentState {
            last_category: self.filter.category.clone(),
            volume: self.session.volume(),
            muted: self.session.muted(),
            last_stream: self.last_stream.clone(),
        };
        match state.save(path) {
            Ok(()) => debug!("ZapCore: state saved to {}", path.display()),
            Err(e) => warn!("ZapCore: failed to save state: {}", e),
        }
    }
}

fn playlist_error_message(err: &FetchError) -> String {
    match err {
        FetchError::TooLarge { .. } => "Playlist too large.".to_string(),
        FetchError::Empty => "Empty response from server.".to_string(),
        other => format!("Failed to load playlist: {}", other),
    }
}

async fn next_tick(probe: &mut Option<tokio::time::Interval>) {
    match probe {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
