//! End-to-end tests for ZapCore: a fake fetcher serves playlists, engine
//! commands are captured from the queue, and the clock is paused so debounce
//! and retry timers fire deterministically.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use zap_daemon::core::{CoreEvent, CoreIo, CoreSettings, ZapCore};
use zap_daemon::engine::{EndReason, EngineCommand, EngineEvent};
use zap_daemon::http::{FetchError, FetchLimits, Fetcher};
use zap_daemon::logos::{LogoMap, LogoSettings};
use zap_daemon::session::RetryPolicy;
use zap_proto::protocol::{Command, Direction, Notification, SessionStatus};
use zap_proto::state::PersistentState;

const MAIN_URL: &str = "http://playlists.example/main.m3u";

const BBC_LOGO: &str = "http://logos.example/bbc.png";

const MAIN_PLAYLIST: &str = "#EXTM3U
#EXTINF:-1 tvg-logo=\"http://logos.example/bbc.png\" group-title=\"News\",BBC World
http://streams.example/bbc
#EXTINF:-1 group-title=\"Sport\",Eurosport
http://streams.example/euro
#EXTINF:-1 group-title=\"News\",CNN
http://streams.example/cnn
#EXTINF:-1,Local TV
rtmp://streams.example/local
";

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 80, 160, 255]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

/// Serves fixed bodies by URL; everything else is a 404.
struct FakeFetcher {
    bodies: HashMap<String, Vec<u8>>,
    gets: Mutex<Vec<String>>,
}

impl FakeFetcher {
    fn gets_of(&self, url: &str) -> usize {
        self.gets.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn get(&self, url: &str, _limits: &FetchLimits) -> Result<Vec<u8>, FetchError> {
        self.gets.lock().unwrap().push(url.to_string());
        match self.bodies.get(url) {
            Some(body) if body.is_empty() => Err(FetchError::Empty),
            Some(body) => Ok(body.clone()),
            None => Err(FetchError::Status(404)),
        }
    }

    async fn head(&self, url: &str, _timeout: Duration) -> Result<(), FetchError> {
        if self.bodies.contains_key(url) {
            Ok(())
        } else {
            Err(FetchError::Status(404))
        }
    }
}

struct Harness {
    fetcher: Arc<FakeFetcher>,
    logos: watch::Receiver<Arc<LogoMap>>,
    events: mpsc::Sender<CoreEvent>,
    engine_rx: mpsc::Receiver<EngineCommand>,
    notes: broadcast::Receiver<Notification>,
    core: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    fn start(extra: &[(&str, &str)], state_file: Option<PathBuf>) -> Self {
        Self::start_with(extra, state_file, None)
    }

    fn start_with(
        extra: &[(&str, &str)],
        state_file: Option<PathBuf>,
        probe_interval: Option<Duration>,
    ) -> Self {
        let mut bodies = HashMap::new();
        bodies.insert(MAIN_URL.to_string(), MAIN_PLAYLIST.as_bytes().to_vec());
        bodies.insert(BBC_LOGO.to_string(), png(120, 60));
        for (url, body) in extra {
            bodies.insert(url.to_string(), body.as_bytes().to_vec());
        }
        let fetcher = Arc::new(FakeFetcher {
            bodies,
            gets: Mutex::new(Vec::new()),
        });

        let limits = FetchLimits {
            max_bytes: 1024 * 1024,
            timeout: Duration::from_secs(15),
        };
        let settings = CoreSettings {
            playlist_url: MAIN_URL.to_string(),
            playlist_limits: limits,
            probe_interval,
            search_debounce: Duration::from_millis(200),
            autoplay_last_stream: false,
            policy: RetryPolicy::default(),
            logos: LogoSettings {
                max_concurrent: 8,
                limits,
                thumb_width: 52,
                thumb_height: 42,
            },
            state_file,
        };

        let (event_tx, event_rx) = mpsc::channel(256);
        let (engine_tx, engine_rx) = mpsc::channel(256);
        let (notify_tx, notes) = broadcast::channel(1024);

        let core = ZapCore::new(
            settings,
            PersistentState::default(),
            CoreIo {
                playlist_fetcher: fetcher.clone(),
                logo_fetcher: fetcher.clone(),
                engine_tx,
                notify_tx,
                event_tx: event_tx.clone(),
            },
        );

        let logos = core.logo_reader();

        Self {
            fetcher,
            logos,
            events: event_tx,
            engine_rx,
            notes,
            core: tokio::spawn(core.run(event_rx)),
        }
    }

    async fn send(&self, cmd: Command) {
        self.events.send(CoreEvent::Command(cmd)).await.unwrap();
    }

    async fn engine_error(&self) {
        self.events
            .send(CoreEvent::Engine(EngineEvent::EndFile {
                reason: EndReason::Error,
                error: Some("loading failed".to_string()),
            }))
            .await
            .unwrap();
    }

    async fn wait_for<F>(&mut self, pred: F) -> Notification
    where
        F: Fn(&Notification) -> bool,
    {
        loop {
            match tokio::time::timeout(Duration::from_secs(60), self.notes.recv()).await {
                Ok(Ok(n)) if pred(&n) => return n,
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => panic!("core closed"),
                Err(_) => panic!("notification never arrived"),
            }
        }
    }

    async fn load_main(&mut self) {
        self.send(Command::LoadPlaylist { url: None }).await;
        self.wait_for(|n| matches!(n, Notification::CatalogReplaced { .. }))
            .await;
    }

    /// Stream URLs of every `Load` queued for the engine so far.
    fn loads(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.engine_rx.try_recv() {
            if let EngineCommand::Load(url) = cmd {
                out.push(url);
            }
        }
        out
    }

    fn drain_notes(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notes.try_recv() {
            out.push(n);
        }
        out
    }
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn playlist_load_reports_catalog_and_view() {
    let mut h = Harness::start(&[], None);
    h.send(Command::LoadPlaylist { url: None }).await;

    let replaced = h
        .wait_for(|n| matches!(n, Notification::CatalogReplaced { .. }))
        .await;
    assert_eq!(
        replaced,
        Notification::CatalogReplaced {
            channels: 4,
            categories: vec![
                "All".to_string(),
                "News".to_string(),
                "Others".to_string(),
                "Sport".to_string()
            ],
        }
    );

    let status = h
        .wait_for(|n| matches!(n, Notification::Status { message } if message.starts_with("Loaded")))
        .await;
    assert_eq!(
        status,
        Notification::Status {
            message: "Loaded 4 channels in 3 categories".to_string()
        }
    );

    match h
        .wait_for(|n| matches!(n, Notification::ViewChanged { .. }))
        .await
    {
        Notification::ViewChanged { count, visible, .. } => {
            assert_eq!(count, 4);
            assert_eq!(visible, vec![0, 1, 2, 3]);
        }
        _ => unreachable!(),
    }
}

#[tokio::test(start_paused = true)]
async fn rapid_zaps_load_only_the_last_channel() {
    let mut h = Harness::start(&[], None);
    h.load_main().await;

    for _ in 0..3 {
        h.send(Command::Zap {
            direction: Direction::Next,
        })
        .await;
    }
    sleep_ms(300).await;

    // Nothing selected yet counts as position 0, so three steps land on 3.
    assert_eq!(h.loads(), vec!["rtmp://streams.example/local".to_string()]);

    h.send(Command::Zap {
        direction: Direction::Next,
    })
    .await;
    sleep_ms(300).await;
    assert_eq!(h.loads(), vec!["http://streams.example/bbc".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn new_selection_supersedes_pending_retry() {
    let mut h = Harness::start(&[], None);
    h.load_main().await;

    h.send(Command::Select { position: 0 }).await;
    sleep_ms(200).await;
    assert_eq!(h.loads(), vec!["http://streams.example/bbc".to_string()]);

    // Retry timer armed for bbc, then the user moves on.
    h.engine_error().await;
    sleep_ms(100).await;
    h.send(Command::Select { position: 1 }).await;
    sleep_ms(5_000).await;

    assert_eq!(h.loads(), vec!["http://streams.example/euro".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_unavailable_once() {
    let mut h = Harness::start(&[], None);
    h.load_main().await;

    h.send(Command::Select { position: 2 }).await;
    sleep_ms(200).await;

    for _ in 0..2 {
        h.engine_error().await;
        sleep_ms(3_100).await;
    }
    h.engine_error().await;
    sleep_ms(100).await;
    h.engine_error().await;
    sleep_ms(10_000).await;

    let cnn = "http://streams.example/cnn".to_string();
    assert_eq!(h.loads(), vec![cnn.clone(), cnn.clone(), cnn]);

    let notes = h.drain_notes();
    let unavailable: Vec<_> = notes
        .iter()
        .filter(|n| matches!(n, Notification::ChannelUnavailable { .. }))
        .collect();
    assert_eq!(
        unavailable,
        vec![&Notification::ChannelUnavailable {
            name: "CNN".to_string()
        }]
    );
    let last_session = notes
        .iter()
        .rev()
        .find_map(|n| match n {
            Notification::SessionChanged(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_session.status, SessionStatus::Error);
    assert_eq!(last_session.retry_count, 2);

    // Manual retry starts over.
    h.send(Command::Retry).await;
    sleep_ms(10).await;
    assert_eq!(h.loads(), vec!["http://streams.example/cnn".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn bad_playlists_keep_the_old_catalog() {
    let mut h = Harness::start(
        &[
            ("http://playlists.example/empty.m3u", "#EXTM3U\n# nothing here\n"),
            ("http://playlists.example/blank.m3u", ""),
        ],
        None,
    );
    h.load_main().await;

    h.send(Command::LoadPlaylist {
        url: Some("http://playlists.example/empty.m3u".to_string()),
    })
    .await;
    h.wait_for(|n| {
        *n == Notification::Status {
            message: "No valid channels found in playlist.".to_string(),
        }
    })
    .await;

    h.send(Command::LoadPlaylist {
        url: Some("http://playlists.example/blank.m3u".to_string()),
    })
    .await;
    h.wait_for(|n| {
        *n == Notification::Status {
            message: "Empty response from server.".to_string(),
        }
    })
    .await;

    h.send(Command::LoadPlaylist {
        url: Some("http://playlists.example/missing.m3u".to_string()),
    })
    .await;
    h.wait_for(|n| {
        *n == Notification::Status {
            message: "Failed to load playlist: server returned HTTP 404".to_string(),
        }
    })
    .await;

    // The original four channels are still there.
    h.send(Command::Select { position: 2 }).await;
    sleep_ms(200).await;
    assert_eq!(h.loads(), vec!["http://streams.example/cnn".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn category_and_debounced_search_narrow_the_view() {
    let mut h = Harness::start(&[], None);
    h.load_main().await;

    h.send(Command::SelectCategory {
        name: "News".to_string(),
    })
    .await;
    match h
        .wait_for(|n| matches!(n, Notification::ViewChanged { category, .. } if category == "News"))
        .await
    {
        Notification::ViewChanged { visible, .. } => assert_eq!(visible, vec![0, 2]),
        _ => unreachable!(),
    }

    h.send(Command::Search {
        term: "c".to_string(),
    })
    .await;
    h.send(Command::Search {
        term: "CNN".to_string(),
    })
    .await;
    sleep_ms(300).await;

    let views: Vec<_> = h
        .drain_notes()
        .into_iter()
        .filter_map(|n| match n {
            Notification::ViewChanged { search, visible, .. } => Some((search, visible)),
            _ => None,
        })
        .collect();
    // Only the settled term is applied.
    assert_eq!(views, vec![("CNN".to_string(), vec![2])]);

    // Zapping now moves within the one-entry view.
    h.send(Command::Zap {
        direction: Direction::Prev,
    })
    .await;
    sleep_ms(300).await;
    assert_eq!(h.loads(), vec!["http://streams.example/cnn".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn output_settings_persist_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let mut h = Harness::start(&[], Some(state_file.clone()));
    h.load_main().await;

    h.send(Command::Volume { delta: -10 }).await;
    h.send(Command::Volume { delta: 500 }).await;
    h.send(Command::ToggleMute).await;
    h.send(Command::SelectCategory {
        name: "Sport".to_string(),
    })
    .await;
    h.send(Command::Select { position: 0 }).await;
    sleep_ms(200).await;
    h.events.send(CoreEvent::Shutdown).await.unwrap();
    h.core.await.unwrap().unwrap();

    let commands: Vec<_> = std::iter::from_fn(|| h.engine_rx.try_recv().ok()).collect();
    assert!(commands.contains(&EngineCommand::Volume(90)));
    assert!(commands.contains(&EngineCommand::Volume(150)));
    assert!(commands.contains(&EngineCommand::Mute(true)));

    let saved = PersistentState::load(&state_file);
    assert_eq!(saved.volume, 150);
    assert!(saved.muted);
    assert_eq!(saved.last_category, "Sport");
    assert_eq!(
        saved.last_stream.as_deref(),
        Some("http://streams.example/euro")
    );
}

#[tokio::test(start_paused = true)]
async fn connectivity_is_reported_on_change_only() {
    let mut h = Harness::start_with(&[], None, Some(Duration::from_secs(30)));
    h.load_main().await;

    assert_eq!(
        h.wait_for(|n| matches!(n, Notification::Connectivity { .. }))
            .await,
        Notification::Connectivity { online: true }
    );

    // Same answer again: no notification.
    sleep_ms(31_000).await;
    assert!(!h
        .drain_notes()
        .iter()
        .any(|n| matches!(n, Notification::Connectivity { .. })));

    // Probing follows the playlist URL, even when loading it failed.
    h.send(Command::LoadPlaylist {
        url: Some("http://playlists.example/gone.m3u".to_string()),
    })
    .await;
    assert_eq!(
        h.wait_for(|n| matches!(n, Notification::Connectivity { .. }))
            .await,
        Notification::Connectivity { online: false }
    );
}

#[tokio::test(start_paused = true)]
async fn logos_are_fetched_once_and_published() {
    let mut h = Harness::start(&[], None);
    h.load_main().await;

    assert_eq!(
        h.wait_for(|n| matches!(n, Notification::LogoReady { .. }))
            .await,
        Notification::LogoReady {
            url: BBC_LOGO.to_string()
        }
    );
    {
        let map = h.logos.borrow();
        let logo = map.get(BBC_LOGO).expect("logo in cache");
        assert_eq!((logo.width, logo.height), (52, 26));
        assert_eq!(map.len(), 1);
    }

    // Same playlist again: the cached logo is not requested a second time.
    h.load_main().await;
    sleep_ms(1_000).await;
    assert!(!h
        .drain_notes()
        .iter()
        .any(|n| matches!(n, Notification::LogoReady { .. })));
    assert_eq!(h.fetcher.gets_of(BBC_LOGO), 1);
    assert_eq!(h.fetcher.gets_of(MAIN_URL), 2);
}

#[tokio::test(start_paused = true)]
async fn volume_and_mute_are_saved_as_they_change() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let mut h = Harness::start(&[], Some(state_file.clone()));

    h.send(Command::Volume { delta: -30 }).await;
    h.wait_for(|n| matches!(n, Notification::VolumeChanged { volume: 70, .. }))
        .await;
    let saved = PersistentState::load(&state_file);
    assert_eq!(saved.volume, 70);
    assert!(!saved.muted);

    h.send(Command::ToggleMute).await;
    h.wait_for(|n| matches!(n, Notification::VolumeChanged { muted: true, .. }))
        .await;
    assert!(PersistentState::load(&state_file).muted);
}
