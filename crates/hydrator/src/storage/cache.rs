//! Durable cache of hydrated tweets.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tempfile::NamedTempFile;

use crate::error::HydrateError;
use crate::tweet::{RawRecord, TweetId};

/// Counts from one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// New keys inserted.
    pub added: usize,
    /// Existing keys overwritten (refresh only).
    pub replaced: usize,
    /// Incoming records dropped because the key was already cached.
    pub kept: usize,
}

/// Mapping of tweet ID to hydrated record, stored as one JSON object.
///
/// Only successfully hydrated records are stored: absence of a key means
/// "not yet hydrated", so failed IDs are retried naturally on the next run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HydrationCache {
    records: BTreeMap<TweetId, RawRecord>,
}

/// Keys are normalized like any other ID. Blank keys are dropped and the
/// first record wins when two keys collide after trimming.
impl<'de> Deserialize<'de> for HydrationCache {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: BTreeMap<String, RawRecord> = BTreeMap::deserialize(deserializer)?;
        let mut records = BTreeMap::new();
        for (key, record) in raw {
            match TweetId::parse(&key) {
                Some(id) => {
                    records.entry(id).or_insert(record);
                }
                None => tracing::warn!("Dropping cached record with a blank ID"),
            }
        }
        Ok(Self { records })
    }
}

impl HydrationCache {
    /// Load the cache, degrading to an empty cache on any error.
    ///
    /// Hydration is incremental and best-effort, so an unreadable store
    /// never fails the run.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(cache) => {
                if !cache.is_empty() {
                    tracing::info!(
                        path = %path.display(),
                        count = cache.len(),
                        "Loaded existing hydrated tweets"
                    );
                }
                cache
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to load hydration cache - starting empty"
                );
                Self::default()
            }
        }
    }

    /// Load the cache from a JSON file; a missing file is an empty cache.
    pub fn try_load(path: &Path) -> Result<Self, HydrateError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let cache: Self = serde_json::from_str(&content)?;
            Ok(cache)
        } else {
            Ok(Self::default())
        }
    }

    /// Atomically rewrite the store with the full mapping.
    ///
    /// Writes a temp file next to `path` and renames it into place.
    pub fn save(&self, path: &Path) -> Result<(), HydrateError> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut content = serde_json::to_vec_pretty(self)?;
        content.push(b'\n');

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| HydrateError::Io(e.error))?;

        tracing::debug!(path = %path.display(), count = self.len(), "Saved hydration cache");
        Ok(())
    }

    /// Merge newly fetched records.
    ///
    /// Existing entries win on collision unless `refresh` is set.
    pub fn merge<I>(&mut self, fetched: I, refresh: bool) -> MergeStats
    where
        I: IntoIterator<Item = (TweetId, RawRecord)>,
    {
        let mut stats = MergeStats::default();
        for (id, record) in fetched {
            match self.records.get_mut(&id) {
                Some(existing) if refresh => {
                    *existing = record;
                    stats.replaced += 1;
                }
                Some(_) => stats.kept += 1,
                None => {
                    self.records.insert(id, record);
                    stats.added += 1;
                }
            }
        }
        stats
    }

    /// Check if an ID is cached.
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Get a cached record by exact ID.
    pub fn get(&self, id: &str) -> Option<&RawRecord> {
        self.records.get(id)
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cached IDs in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &TweetId> {
        self.records.keys()
    }
}

impl FromIterator<(TweetId, RawRecord)> for HydrationCache {
    fn from_iter<I: IntoIterator<Item = (TweetId, RawRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tid(s: &str) -> TweetId {
        TweetId::parse(s).unwrap()
    }

    #[test]
    fn test_merge_existing_wins() {
        let mut cache: HydrationCache = [(tid("1"), json!({"id": "1", "text": "old"}))]
            .into_iter()
            .collect();

        let stats = cache.merge(
            [
                (tid("1"), json!({"id": "1", "text": "new"})),
                (tid("2"), json!({"id": "2"})),
            ],
            false,
        );

        assert_eq!(
            stats,
            MergeStats {
                added: 1,
                replaced: 0,
                kept: 1
            }
        );
        assert_eq!(cache.get("1").unwrap()["text"], "old");
        assert!(cache.contains("2"));
    }

    #[test]
    fn test_merge_refresh_replaces() {
        let mut cache: HydrationCache = [(tid("1"), json!({"text": "old"}))].into_iter().collect();
        let stats = cache.merge([(tid("1"), json!({"text": "new"}))], true);
        assert_eq!(stats.replaced, 1);
        assert_eq!(cache.get("1").unwrap()["text"], "new");
    }

    #[test]
    fn test_merge_already_cached_is_idempotent() {
        let cache: HydrationCache = [
            (tid("1"), json!({"id": "1"})),
            (tid("2"), json!({"id": "2"})),
        ]
        .into_iter()
        .collect();

        let mut merged = cache.clone();
        merged.merge([(tid("2"), json!({"id": "2", "changed": true}))], false);

        assert_eq!(merged, cache);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("parents.json");
        let cache: HydrationCache = [(tid("123"), json!({"id": "123", "text": "héllo"}))]
            .into_iter()
            .collect();

        cache.save(&path).unwrap();
        let loaded = HydrationCache::try_load(&path).unwrap();

        assert_eq!(loaded, cache);
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["123"]["text"], "héllo");
    }

    #[test]
    fn test_load_normalizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parents.json");
        std::fs::write(
            &path,
            r#"{" 123 ": {"id": "123"}, "": {"id": "blank"}, "  ": {"id": "spaces"}}"#,
        )
        .unwrap();

        let cache = HydrationCache::try_load(&path).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.contains("123"));
        assert!(!cache.contains(" 123 "));
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parents.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(HydrationCache::try_load(&path).is_err());
        assert!(HydrationCache::load(&path).is_empty());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(HydrationCache::load(&dir.path().join("absent.json")).is_empty());
    }
}
