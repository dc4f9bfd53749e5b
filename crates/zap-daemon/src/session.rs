/// Playback session state machine.
///
/// Pure: no I/O, no timers, no channels.  Every input returns the actions the
/// caller (`ZapCore`) has to carry out.  Timers are represented by tokens; a
/// firing whose token no longer matches is ignored.
///
/// ```text
///            select ─► (debounce) ─► Connecting ──file-loaded──► Playing
///                                     │    ▲                        │
///                          end-file   │    │ retry timer            │ end-file
///                           (error)   ▼    │                        │ (error)
///                               retry_count < max ◄─────────────────┘
///                                     │
///                                     └── exhausted ──► Error
/// ```
use std::time::Duration;

use tracing::{debug, info, warn};

use zap_proto::config::PlaybackConfig;
use zap_proto::protocol::{SessionSnapshot, SessionStatus};

use crate::engine::EngineEvent;

pub const MAX_VOLUME: u8 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub debounce: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(3),
            debounce: Duration::from_millis(150),
        }
    }
}

impl From<&PlaybackConfig> for RetryPolicy {
    fn from(cfg: &PlaybackConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            retry_delay: cfg.retry_delay(),
            debounce: cfg.debounce(),
        }
    }
}

/// The channel a user picked, with where it sat in the view at the time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub name: String,
    pub category: String,
    pub stream_url: String,
    pub index: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Load(String),
    SetVolume(u8),
    SetMute(bool),
    SetPause(bool),
    ArmDebounce { token: u64, delay: Duration },
    ArmRetry { token: u64, delay: Duration },
    /// Status, current channel or retry count changed.
    StatusChanged,
    /// Retries for this channel are exhausted.
    Unavailable { name: String },
}

#[derive(Debug)]
pub struct PlaybackSession {
    policy: RetryPolicy,
    status: SessionStatus,
    requested: Option<Selection>,
    current: Option<Selection>,
    retry_count: u32,
    debounce_token: u64,
    /// Bumped whenever a new load starts.  Retry timers carry the epoch they
    /// were armed in.
    epoch: u64,
    retry_armed: bool,
    volume: u8,
    muted: bool,
    paused: bool,
}

impl PlaybackSession {
    pub fn new(policy: RetryPolicy, volume: u8, muted: bool) -> Self {
        Self {
            policy,
            status: SessionStatus::Idle,
            requested: None,
            current: None,
            retry_count: 0,
            debounce_token: 0,
            epoch: 0,
            retry_armed: false,
            volume: volume.min(MAX_VOLUME),
            muted,
            paused: false,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn current(&self) -> Option<&Selection> {
        self.current.as_ref()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.stream_url.as_str())
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            current_url: self.current.as_ref().map(|s| s.stream_url.clone()),
            current_name: self.current.as_ref().map(|s| s.name.clone()),
            current_category: self.current.as_ref().map(|s| s.category.clone()),
            index: self.current.as_ref().map(|s| s.index),
            total: self.current.as_ref().map_or(0, |s| s.total),
            retry_count: self.retry_count,
            volume: self.volume,
            muted: self.muted,
            paused: self.paused,
        }
    }

    // ── selection ─────────────────────────────────────────────────────────────

    /// Remember the pick and (re)start the debounce window.  Nothing is
    /// loaded until the window passes without another pick.
    pub fn select(&mut self, selection: Selection) -> Vec<SessionAction> {
        self.requested = Some(selection);
        self.debounce_token += 1;
        vec![SessionAction::ArmDebounce {
            token: self.debounce_token,
            delay: self.policy.debounce,
        }]
    }

    pub fn debounce_elapsed(&mut self, token: u64) -> Vec<SessionAction> {
        if token != self.debounce_token {
            return Vec::new();
        }
        let Some(selection) = self.requested.take() else {
            return Vec::new();
        };
        info!("session: tuning to '{}'", selection.name);
        self.current = Some(selection);
        self.start_load()
    }

    /// User-initiated retry of the current channel.
    pub fn retry(&mut self) -> Vec<SessionAction> {
        if self.status == SessionStatus::Connecting || self.current.is_none() {
            return Vec::new();
        }
        info!("session: manual retry");
        self.start_load()
    }

    fn start_load(&mut self) -> Vec<SessionAction> {
        self.epoch += 1;
        self.retry_armed = false;
        self.retry_count = 0;
        self.status = SessionStatus::Connecting;
        match self.current_url() {
            Some(url) => vec![
                SessionAction::Load(url.to_string()),
                SessionAction::StatusChanged,
            ],
            None => Vec::new(),
        }
    }

    pub fn retry_elapsed(&mut self, token: u64) -> Vec<SessionAction> {
        if token != self.epoch || !self.retry_armed {
            debug!("session: stale retry timer {} (epoch {})", token, self.epoch);
            return Vec::new();
        }
        self.retry_armed = false;
        match self.current_url() {
            Some(url) => {
                info!("session: retry {} of {}", self.retry_count, self.policy.max_retries);
                vec![SessionAction::Load(url.to_string())]
            }
            None => Vec::new(),
        }
    }

    // ── engine feedback ───────────────────────────────────────────────────────

    pub fn on_engine_event(&mut self, event: &EngineEvent) -> Vec<SessionAction> {
        match event {
            EngineEvent::FileLoaded => {
                if self.status != SessionStatus::Connecting {
                    return Vec::new();
                }
                self.status = SessionStatus::Playing;
                self.retry_count = 0;
                self.retry_armed = false;
                vec![SessionAction::StatusChanged]
            }
            EngineEvent::EndFile { .. } if event.is_error() => self.on_playback_error(),
            EngineEvent::EndFile { .. } | EngineEvent::Shutdown => Vec::new(),
        }
    }

    fn on_playback_error(&mut self) -> Vec<SessionAction> {
        let active = matches!(
            self.status,
            SessionStatus::Connecting | SessionStatus::Playing
        );
        if !active || self.retry_armed {
            return Vec::new();
        }

        if self.retry_count < self.policy.max_retries {
            self.retry_count += 1;
            self.retry_armed = true;
            self.status = SessionStatus::Connecting;
            return vec![
                SessionAction::ArmRetry {
                    token: self.epoch,
                    delay: self.policy.retry_delay,
                },
                SessionAction::StatusChanged,
            ];
        }

        self.status = SessionStatus::Error;
        let name = self
            .current
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        warn!("session: '{}' unavailable after {} retries", name, self.retry_count);
        vec![
            SessionAction::StatusChanged,
            SessionAction::Unavailable { name },
        ]
    }

    // ── output controls ───────────────────────────────────────────────────────

    pub fn set_volume(&mut self, delta: i32) -> Vec<SessionAction> {
        let volume = (self.volume as i32 + delta).clamp(0, MAX_VOLUME as i32) as u8;
        self.volume = volume;
        vec![SessionAction::SetVolume(volume)]
    }

    pub fn toggle_mute(&mut self) -> Vec<SessionAction> {
        self.muted = !self.muted;
        vec![SessionAction::SetMute(self.muted)]
    }

    pub fn toggle_pause(&mut self) -> Vec<SessionAction> {
        if self.current.is_none() {
            return Vec::new();
        }
        self.paused = !self.paused;
        vec![
            SessionAction::SetPause(self.paused),
            SessionAction::StatusChanged,
        ]
    }
}
