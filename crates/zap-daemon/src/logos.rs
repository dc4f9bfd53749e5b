/// Channel logo fetching: bounded-concurrency scheduler plus the shared
/// thumbnail cache.
///
/// ```text
///   ZapCore ──schedule()──► LogoScheduler ──spawn (≤ N)──► fetch + decode task
///      ▲                                                         │
///      └────────── complete() ◄──── LogoCompletion (mpsc) ◄──────┘
/// ```
///
/// The scheduler is owned by the core and never locked; admission is a plain
/// counter that is refilled on every completion.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use zap_proto::config::LogoConfig;
use zap_proto::playlist::is_http_url;
use zap_proto::protocol::Channel;

use crate::http::{FetchError, FetchLimits, Fetcher};

/// Decoded thumbnail, RGBA8, at most `thumb_width` x `thumb_height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logo {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum LogoError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("decode task failed: {0}")]
    Task(tokio::task::JoinError),
}

/// Decode any format `image` understands and shrink it to fit the box,
/// keeping the aspect ratio.
pub fn decode_logo(bytes: &[u8], max_width: u32, max_height: u32) -> Result<Logo, LogoError> {
    let img = image::load_from_memory(bytes)?;
    let thumb = img.thumbnail(max_width, max_height).to_rgba8();
    Ok(Logo {
        width: thumb.width(),
        height: thumb.height(),
        rgba: thumb.into_raw(),
    })
}

// ── cache ─────────────────────────────────────────────────────────────────────

pub type LogoMap = HashMap<String, Arc<Logo>>;

/// Logo URL → thumbnail.  The core is the only writer; renderers hold a
/// `watch::Receiver` and read whole snapshots without locking.
pub struct LogoCache {
    tx: watch::Sender<Arc<LogoMap>>,
}

impl Default for LogoCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LogoCache {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(LogoMap::new()));
        Self { tx }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.tx.borrow().contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<Arc<Logo>> {
        self.tx.borrow().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy-on-write: readers still holding the previous `Arc` keep seeing
    /// the map without this entry.
    pub fn insert(&self, url: String, logo: Logo) {
        self.tx.send_modify(|map| {
            Arc::make_mut(map).insert(url, Arc::new(logo));
        });
    }

    pub fn reader(&self) -> watch::Receiver<Arc<LogoMap>> {
        self.tx.subscribe()
    }
}

// ── scheduler ─────────────────────────────────────────────────────────────────

/// Sent back to the core by every fetch task, success or not.
#[derive(Debug)]
pub struct LogoCompletion {
    pub url: String,
    pub outcome: Result<Logo, LogoError>,
}

#[derive(Debug, Clone, Copy)]
pub struct LogoSettings {
    pub max_concurrent: usize,
    pub limits: FetchLimits,
    pub thumb_width: u32,
    pub thumb_height: u32,
}

impl From<&LogoConfig> for LogoSettings {
    fn from(cfg: &LogoConfig) -> Self {
        Self {
            max_concurrent: cfg.max_concurrent.max(1),
            limits: FetchLimits {
                max_bytes: cfg.max_bytes,
                timeout: cfg.timeout(),
            },
            thumb_width: cfg.thumb_width,
            thumb_height: cfg.thumb_height,
        }
    }
}

pub struct LogoScheduler {
    settings: LogoSettings,
    fetcher: Arc<dyn Fetcher>,
    done_tx: mpsc::Sender<LogoCompletion>,
    pending: VecDeque<String>,
    /// URLs with a live fetch task.  Its size is the active count.
    in_flight: HashSet<String>,
}

impl LogoScheduler {
    pub fn new(
        settings: LogoSettings,
        fetcher: Arc<dyn Fetcher>,
        done_tx: mpsc::Sender<LogoCompletion>,
    ) -> Self {
        Self {
            settings,
            fetcher,
            done_tx,
            pending: VecDeque::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn active(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// Queue every logo of `channels` that is not cached, not already being
    /// fetched, and not a duplicate within this list.  Replaces whatever was
    /// still queued from the previous call.  Returns the number queued.
    pub fn schedule(&mut self, channels: &[Channel], cache: &LogoCache) -> usize {
        self.pending.clear();
        let mut seen = HashSet::new();
        for ch in channels {
            let url = ch.logo_url.as_str();
            if !ch.has_logo()
                || self.in_flight.contains(url)
                || !seen.insert(url)
                || cache.contains(url)
            {
                continue;
            }
            if !is_http_url(url) {
                debug!("logos: skipping non-http logo {}", url);
                continue;
            }
            self.pending.push_back(url.to_string());
        }
        let queued = self.pending.len();
        debug!(
            "logos: {} queued, {} already in flight",
            queued,
            self.in_flight.len()
        );
        self.pump();
        queued
    }

    /// Account for a finished task and hand back the decoded logo, if any.
    pub fn complete(&mut self, completion: LogoCompletion) -> Option<(String, Logo)> {
        self.in_flight.remove(&completion.url);
        self.pump();
        match completion.outcome {
            Ok(logo) => Some((completion.url, logo)),
            Err(e) => {
                debug!("logos: {} abandoned: {}", completion.url, e);
                None
            }
        }
    }

    fn pump(&mut self) {
        while self.in_flight.len() < self.settings.max_concurrent {
            let Some(url) = self.pending.pop_front() else {
                break;
            };
            self.in_flight.insert(url.clone());
            self.spawn_fetch(url);
        }
    }

    fn spawn_fetch(&self, url: String) {
        let fetcher = Arc::clone(&self.fetcher);
        let done_tx = self.done_tx.clone();
        let settings = self.settings;

        tokio::spawn(async move {
            let fetched =
                tokio::time::timeout(settings.limits.timeout, fetcher.get(&url, &settings.limits))
                    .await;
            let outcome = match fetched {
                // Logos must stay strictly below the cap.
                Ok(Ok(bytes)) if bytes.len() >= settings.limits.max_bytes => {
                    Err(FetchError::TooLarge {
                        limit: settings.limits.max_bytes,
                    }
                    .into())
                }
                Ok(Ok(bytes)) => tokio::task::spawn_blocking(move || {
                    decode_logo(&bytes, settings.thumb_width, settings.thumb_height)
                })
                .await
                .unwrap_or_else(|e| Err(LogoError::Task(e))),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(FetchError::Timeout.into()),
            };
            let _ = done_tx.send(LogoCompletion { url, outcome }).await;
        });
    }
}
