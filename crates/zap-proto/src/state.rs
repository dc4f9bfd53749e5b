use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::protocol::ALL_CATEGORY;

pub const DEFAULT_VOLUME: u8 = 100;

/// Preferences that survive a restart.  Read once at startup, written at
/// shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    #[serde(default = "default_category")]
    pub last_category: String,
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub last_stream: Option<String>,
}

fn default_category() -> String {
    ALL_CATEGORY.to_string()
}

fn default_volume() -> u8 {
    DEFAULT_VOLUME
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            last_category: default_category(),
            volume: DEFAULT_VOLUME,
            muted: false,
            last_stream: None,
        }
    }
}

impl PersistentState {
    /// Missing or unreadable files fall back to defaults.
    pub fn load(path: &Path) -> Self {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(persistent) = serde_json::from_str::<PersistentState>(&content) {
                return persistent;
            }
            tracing::warn!("state: ignoring unreadable {}", path.display());
        }
        Self::default()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let state = PersistentState::load(&dir.path().join("nope.json"));
        assert_eq!(state, PersistentState::default());
        assert_eq!(state.last_category, "All");
        assert_eq!(state.volume, 100);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("state.json");
        let state = PersistentState {
            last_category: "News".to_string(),
            volume: 135,
            muted: true,
            last_stream: Some("http://s/1".to_string()),
        };
        state.save(&path).unwrap();
        assert_eq!(PersistentState::load(&path), state);
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(PersistentState::load(&path), PersistentState::default());
    }
}
