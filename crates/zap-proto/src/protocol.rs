use serde::{Deserialize, Serialize};

/// Name of the synthetic category that matches every channel.
pub const ALL_CATEGORY: &str = "All";

/// Category assigned when a playlist entry has no `group-title`.
pub const DEFAULT_CATEGORY: &str = "Others";

/// Name assigned when a playlist entry has no usable title.
pub const DEFAULT_NAME: &str = "Unknown";

/// One playable entry from a playlist.  Built only by the playlist parser and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub category: String,
    /// Empty when the entry carried no `tvg-logo` attribute.
    #[serde(default)]
    pub logo_url: String,
    pub stream_url: String,
}

impl Channel {
    /// Name shortened to `max` characters with a trailing ellipsis, for
    /// renderers with a fixed-width label.
    pub fn display_name(&self, max: usize) -> String {
        if self.name.chars().count() <= max {
            return self.name.clone();
        }
        let mut out: String = self.name.chars().take(max).collect();
        out.push('\u{2026}');
        out
    }

    pub fn has_logo(&self) -> bool {
        !self.logo_url.is_empty()
    }
}

/// Zap direction through the filtered view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Next,
    Prev,
}

impl Direction {
    pub fn step(self) -> i64 {
        match self {
            Direction::Next => 1,
            Direction::Prev => -1,
        }
    }
}

/// Messages sent from a client (renderer, stdin console) to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Fetch a playlist.  `None` reloads the configured URL.
    LoadPlaylist { url: Option<String> },
    SelectCategory { name: String },
    Search { term: String },
    /// Pick the channel at `position` in the current filtered view.
    Select { position: usize },
    Zap { direction: Direction },
    Retry,
    Volume { delta: i32 },
    ToggleMute,
    TogglePause,
    GetState,
}

/// Playback status as tracked by the session state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Playing,
    Error,
}

/// Copy of the session state handed to renderers.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub current_url: Option<String>,
    pub current_name: Option<String>,
    pub current_category: Option<String>,
    /// Position of the channel in the view it was picked from, and that
    /// view's size.  Used for "3 of 40" style overlays.
    pub index: Option<usize>,
    pub total: usize,
    pub retry_count: u32,
    pub volume: u8,
    pub muted: bool,
    pub paused: bool,
}

/// Messages sent from the core to every render subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Notification {
    /// A new playlist replaced the catalog.
    CatalogReplaced {
        channels: usize,
        categories: Vec<String>,
    },
    /// The filtered view was recomputed.  `visible` holds catalog indices in
    /// display order; `selected` is the highlighted position in that list.
    ViewChanged {
        category: String,
        search: String,
        count: usize,
        visible: Vec<usize>,
        selected: Option<usize>,
    },
    /// The logo cache gained an entry.
    LogoReady { url: String },
    SessionChanged(SessionSnapshot),
    VolumeChanged { volume: u8, muted: bool },
    /// Retries for this channel are exhausted.
    ChannelUnavailable { name: String },
    /// Human-readable status line ("Loaded 120 channels in 9 categories").
    Status { message: String },
    /// Result of the periodic reachability probe, sent on change.
    Connectivity { online: bool },
    /// WARN/ERROR log lines forwarded from the tracing layer.
    Log { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_truncates_with_ellipsis() {
        let ch = Channel {
            name: "Discovery Channel".to_string(),
            category: "Docs".to_string(),
            logo_url: String::new(),
            stream_url: "http://x/1".to_string(),
        };
        assert_eq!(ch.display_name(9), "Discovery\u{2026}");
        assert_eq!(ch.display_name(50), "Discovery Channel");
        assert!(!ch.has_logo());
    }

    #[test]
    fn test_command_json_shape() {
        let json = serde_json::to_string(&Command::Zap {
            direction: Direction::Prev,
        })
        .unwrap();
        assert_eq!(json, r#"{"cmd":"Zap","direction":"Prev"}"#);

        let cmd: Command = serde_json::from_str(r#"{"cmd":"Volume","delta":-5}"#).unwrap();
        match cmd {
            Command::Volume { delta } => assert_eq!(delta, -5),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
