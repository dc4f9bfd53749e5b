//! Channel catalog, filtered views, and zap navigation.
//!
//! The catalog holds an immutable snapshot behind an `Arc`; replacing it is a
//! pointer swap, so a reader either sees the old list or the new one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::playlist::Playlist;
use crate::protocol::{Channel, Direction, ALL_CATEGORY};

/// One fully parsed playlist.  Never mutated after construction.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    pub channels: Vec<Channel>,
    /// "All" first, then the sorted distinct categories of `channels`.
    pub categories: Vec<String>,
}

/// Category + search filter owned by the presentation side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterState {
    pub category: String,
    pub search: String,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            category: ALL_CATEGORY.to_string(),
            search: String::new(),
        }
    }
}

impl FilterState {
    pub fn new(category: impl Into<String>, search: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            search: search.into(),
        }
    }

    /// Lowercased once so a full scan does not redo it per channel.
    fn compiled(&self) -> CompiledFilter<'_> {
        CompiledFilter {
            category: if self.category.is_empty() || self.category == ALL_CATEGORY {
                None
            } else {
                Some(self.category.as_str())
            },
            needle: self.search.to_lowercase(),
        }
    }

    pub fn matches(&self, channel: &Channel) -> bool {
        self.compiled().matches(channel)
    }
}

struct CompiledFilter<'a> {
    category: Option<&'a str>,
    needle: String,
}

impl CompiledFilter<'_> {
    fn matches(&self, channel: &Channel) -> bool {
        if let Some(cat) = self.category {
            if channel.category != cat {
                return false;
            }
        }
        self.needle.is_empty() || channel.name.to_lowercase().contains(&self.needle)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    snapshot: Arc<CatalogSnapshot>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly parsed playlist.
    pub fn replace(&mut self, playlist: Playlist) {
        self.snapshot = Arc::new(CatalogSnapshot {
            channels: playlist.channels,
            categories: playlist.categories,
        });
    }

    /// Cheap handle on the current snapshot for readers outside the core.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.snapshot.channels
    }

    pub fn categories(&self) -> &[String] {
        &self.snapshot.categories
    }

    pub fn len(&self) -> usize {
        self.snapshot.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.channels.is_empty()
    }

    pub fn channel(&self, idx: usize) -> Option<&Channel> {
        self.snapshot.channels.get(idx)
    }

    pub fn has_category(&self, name: &str) -> bool {
        self.snapshot.categories.iter().any(|c| c == name)
    }

    /// Catalog indices visible under `filter`, in playlist order.
    pub fn visible_indices(&self, filter: &FilterState) -> Vec<usize> {
        let compiled = filter.compiled();
        self.snapshot
            .channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| compiled.matches(ch))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, filter: &FilterState) -> usize {
        let compiled = filter.compiled();
        self.snapshot
            .channels
            .iter()
            .filter(|ch| compiled.matches(ch))
            .count()
    }
}

/// Next position when zapping through a view of `count` entries.
///
/// Wraps in both directions.  Returns `None` for an empty view.
pub fn zap(direction: Direction, count: usize, current: usize) -> Option<usize> {
    if count == 0 {
        return None;
    }
    let next = (current as i64 + direction.step()).rem_euclid(count as i64);
    Some(next as usize)
}
