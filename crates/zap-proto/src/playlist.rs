//! M3U playlist parser.
//!
//! Pure and synchronous: bytes in, channels and categories out.  Malformed
//! input never errors, it just produces fewer (or zero) channels.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::protocol::{Channel, ALL_CATEGORY, DEFAULT_CATEGORY, DEFAULT_NAME};

/// Channel names are cut to this many characters at parse time.
pub const MAX_NAME_LEN: usize = 200;

/// Schemes accepted for stream URLs.
pub const STREAM_SCHEMES: &[&str] = &["http", "https", "rtsp", "rtmp", "mms", "mmsh"];

/// Result of parsing one playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    /// Channels in playlist order.
    pub channels: Vec<Channel>,
    /// Sorted distinct categories of `channels`, with "All" at index 0.
    /// Empty when no channel was emitted.
    pub categories: Vec<String>,
    /// `x-tvg-url` / `url-tvg` from the `#EXTM3U` header, if any.
    pub epg_url: Option<String>,
}

impl Playlist {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

fn extinf_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#EXTINF\s*:\s*(-?\d+)\s*(.*),\s*(.*)").expect("extinf regex"))
}

fn logo_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"tvg-logo\s*=\s*"([^"]*)""#).expect("tvg-logo regex"))
}

fn group_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"group-title\s*=\s*"([^"]*)""#).expect("group-title regex"))
}

fn header_epg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:x-tvg-url|url-tvg)\s*=\s*"([^"]*)""#).expect("epg header regex")
    })
}

/// Entry built from an `#EXTINF` line while we wait for its URL line.
#[derive(Debug, Default)]
struct PendingEntry {
    name: String,
    category: String,
    logo_url: String,
}

/// Parse raw playlist bytes.  Invalid UTF-8 is replaced, not rejected.
pub fn parse_playlist(bytes: &[u8]) -> Playlist {
    let text = String::from_utf8_lossy(bytes);
    parse_playlist_str(&text)
}

pub fn parse_playlist_str(text: &str) -> Playlist {
    let mut channels = Vec::new();
    let mut used_categories = BTreeSet::new();
    let mut pending: Option<PendingEntry> = None;
    let mut epg_url = None;

    for line in text.split(['\r', '\n']) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with("#EXTM3U") {
            epg_url = header_epg_re()
                .captures(line)
                .map(|caps| caps[1].trim().to_string())
                .filter(|u| !u.is_empty());
            continue;
        }

        if line.starts_with("#EXTINF") {
            // A second metadata line overwrites the first.
            pending = Some(parse_extinf(line));
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let Some(entry) = pending.take() else {
            continue;
        };

        if !is_stream_url(line) {
            debug!("playlist: dropping '{}' (unsupported url {})", entry.name, line);
            continue;
        }

        used_categories.insert(entry.category.clone());
        channels.push(Channel {
            name: entry.name,
            category: entry.category,
            logo_url: entry.logo_url,
            stream_url: line.to_string(),
        });
    }

    let categories = if channels.is_empty() {
        Vec::new()
    } else {
        std::iter::once(ALL_CATEGORY.to_string())
            .chain(used_categories)
            .collect()
    };

    Playlist {
        channels,
        categories,
        epg_url,
    }
}

fn parse_extinf(line: &str) -> PendingEntry {
    let mut entry = PendingEntry::default();

    if let Some(caps) = extinf_re().captures(line) {
        let attrs = caps.get(2).map_or("", |m| m.as_str());
        entry.name = caps.get(3).map_or("", |m| m.as_str()).trim().to_string();
        if let Some(logo) = logo_re().captures(attrs) {
            entry.logo_url = logo[1].trim().to_string();
        }
        if let Some(group) = group_re().captures(attrs) {
            entry.category = group[1].trim().to_string();
        }
    } else if let Some(comma) = line.rfind(',') {
        entry.name = line[comma + 1..].trim().to_string();
    }

    if entry.name.chars().count() > MAX_NAME_LEN {
        entry.name = entry.name.chars().take(MAX_NAME_LEN).collect();
    }
    if entry.name.is_empty() {
        entry.name = DEFAULT_NAME.to_string();
    }
    if entry.category.is_empty() {
        entry.category = DEFAULT_CATEGORY.to_string();
    }
    entry
}

/// True when `raw` parses as a URL with one of the accepted stream schemes.
pub fn is_stream_url(raw: &str) -> bool {
    has_scheme(raw, STREAM_SCHEMES)
}

/// True when `raw` is an http(s) URL, the only schemes fetched for logos.
pub fn is_http_url(raw: &str) -> bool {
    has_scheme(raw, &["http", "https"])
}

fn has_scheme(raw: &str, schemes: &[&str]) -> bool {
    match url::Url::parse(raw) {
        // Url lowercases the scheme during parsing.
        Ok(u) => schemes.contains(&u.scheme()),
        Err(_) => false,
    }
}
