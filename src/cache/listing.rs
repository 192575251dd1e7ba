//! Persistent cache for category and item listings
//!
//! Entries live under hashed filenames of the form
//! `{provider_identity}-{query_hash}.json` so pruning can match on the
//! identity prefix alone. Keys are a pure function of connection identity
//! plus query parameters; display-name edits never touch them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{SourceError, SourceResult};
use crate::models::{Category, ContentItem, ContentKind};
use crate::utils::hashing::sha256_short;
use crate::utils::write_atomic;

/// Cache key for one listing request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    /// Provider connection identity hash ([`crate::models::Provider::identity_hash`])
    pub identity: String,
    pub kind: ContentKind,
    /// Category id, or [`Category::ALL`]; empty for category listings
    pub category_id: String,
}

impl ListingKey {
    pub fn categories(identity: String, kind: ContentKind) -> Self {
        Self {
            identity,
            kind,
            category_id: String::new(),
        }
    }

    pub fn items(identity: String, kind: ContentKind, category_id: String) -> Self {
        Self {
            identity,
            kind,
            category_id,
        }
    }

    fn file_name(&self) -> String {
        let query = format!("{}|{}", self.kind, self.category_id);
        format!("{}-{}.json", self.identity, sha256_short(&query))
    }
}

/// What a cache entry holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListingPayload {
    Categories {
        categories: Vec<Category>,
    },
    Items {
        items: Vec<ContentItem>,
        /// False when some pages failed after retries
        complete: bool,
    },
}

/// One cached listing with its provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingEntry {
    pub provider_identity: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: ListingPayload,
}

/// Disk-backed listing cache with a freshness window
///
/// Owned by the consumer context; workers never touch the files directly.
pub struct ListingCache {
    dir: PathBuf,
    ttl: Duration,
    /// Session-local copies, also the fallback when storage degrades
    memory: HashMap<ListingKey, ListingEntry>,
    storage_ok: bool,
}

impl ListingCache {
    pub fn new(dir: PathBuf, ttl: Duration) -> SourceResult<Self> {
        fs::create_dir_all(&dir).map_err(SourceError::Storage)?;
        Ok(Self {
            dir,
            ttl,
            memory: HashMap::new(),
            storage_ok: true,
        })
    }

    /// Fetch a cached entry if it is still within the freshness window
    pub fn get(&mut self, key: &ListingKey) -> Option<ListingEntry> {
        if let Some(entry) = self.memory.get(key) {
            if self.is_fresh(entry) {
                return Some(entry.clone());
            }
            self.memory.remove(key);
        }

        let path = self.dir.join(key.file_name());
        let raw = fs::read(&path).ok()?;
        let entry: ListingEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("discarding unreadable cache entry {}: {e}", path.display());
                let _ = fs::remove_file(&path);
                return None;
            }
        };
        if !self.is_fresh(&entry) {
            debug!("cache entry expired: {}", path.display());
            return None;
        }
        self.memory.insert(key.clone(), entry.clone());
        Some(entry)
    }

    /// Insert an entry, writing through to disk
    pub fn put(&mut self, key: ListingKey, payload: ListingPayload) {
        let entry = ListingEntry {
            provider_identity: key.identity.clone(),
            fetched_at: Utc::now(),
            payload,
        };

        if self.storage_ok {
            let path = self.dir.join(key.file_name());
            match serde_json::to_vec_pretty(&entry) {
                Ok(bytes) => {
                    if let Err(e) = write_atomic(&path, &bytes) {
                        warn!(
                            "listing cache write failed ({e}), continuing in memory only for this session"
                        );
                        self.storage_ok = false;
                    }
                }
                Err(e) => warn!("listing entry serialization failed: {e}"),
            }
        }
        self.memory.insert(key, entry);
    }

    /// Drop every persisted entry whose provider identity is not in the live
    /// set. Matches on the identity hash prefix, never on a display name, so
    /// renamed providers keep their entries.
    pub fn prune(&mut self, live_identities: &[String]) {
        self.memory
            .retain(|key, _| live_identities.contains(&key.identity));

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot scan listing cache dir: {e}");
                return;
            }
        };
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".json") {
                continue;
            }
            let identity = match name.split_once('-') {
                Some((identity, _)) => identity.to_string(),
                None => continue,
            };
            if !live_identities.contains(&identity) {
                if fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            info!("pruned {removed} listing cache entries for removed providers");
        }
    }

    /// Drop all entries for one provider (manual cache clear)
    pub fn clear_provider(&mut self, identity: &str) {
        self.memory.retain(|key, _| key.identity != identity);
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with(identity) && name.ends_with(".json") {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
    }

    fn is_fresh(&self, entry: &ListingEntry) -> bool {
        let age = Utc::now().signed_duration_since(entry.fetched_at);
        age.to_std().map(|age| age <= self.ttl).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provider;
    use tempfile::TempDir;

    fn item(id: &str) -> ContentItem {
        ContentItem::new(id, format!("Item {id}"), ContentKind::Live)
    }

    #[test]
    fn put_get_roundtrip_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let key = ListingKey::items("id1".into(), ContentKind::Live, "7".into());

        let mut cache = ListingCache::new(dir.path().to_path_buf(), Duration::from_secs(60)).unwrap();
        cache.put(
            key.clone(),
            ListingPayload::Items {
                items: vec![item("1"), item("2")],
                complete: true,
            },
        );

        // Fresh instance reads from disk
        let mut reopened =
            ListingCache::new(dir.path().to_path_buf(), Duration::from_secs(60)).unwrap();
        let entry = reopened.get(&key).unwrap();
        match entry.payload {
            ListingPayload::Items { items, complete } => {
                assert_eq!(items.len(), 2);
                assert!(complete);
            }
            _ => panic!("expected items payload"),
        }
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let dir = TempDir::new().unwrap();
        let key = ListingKey::categories("id1".into(), ContentKind::Movie);
        let mut cache = ListingCache::new(dir.path().to_path_buf(), Duration::ZERO).unwrap();
        cache.put(key.clone(), ListingPayload::Categories { categories: vec![] });
        std::thread::sleep(Duration::from_millis(10));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn keys_differ_by_query_not_by_name() {
        let provider = Provider::portal("Old Name", "http://portal.example", "00:1A:79:00:00:01");
        let mut renamed = provider.clone();
        renamed.name = "New Name".to_string();

        let a = ListingKey::items(provider.identity_hash(), ContentKind::Live, "7".into());
        let b = ListingKey::items(renamed.identity_hash(), ContentKind::Live, "7".into());
        assert_eq!(a.file_name(), b.file_name());

        let other_page = ListingKey::items(provider.identity_hash(), ContentKind::Live, "8".into());
        assert_ne!(a.file_name(), other_page.file_name());
    }

    #[test]
    fn prune_matches_on_identity_hash() {
        let dir = TempDir::new().unwrap();
        let keep = Provider::portal("Keep", "http://keep.example", "00:1A:79:00:00:01");
        let drop = Provider::portal("Drop", "http://drop.example", "00:1A:79:00:00:02");

        let mut cache = ListingCache::new(dir.path().to_path_buf(), Duration::from_secs(60)).unwrap();
        let keep_key = ListingKey::categories(keep.identity_hash(), ContentKind::Live);
        let drop_key = ListingKey::categories(drop.identity_hash(), ContentKind::Live);
        cache.put(keep_key.clone(), ListingPayload::Categories { categories: vec![] });
        cache.put(drop_key.clone(), ListingPayload::Categories { categories: vec![] });

        // Renaming does not change the live identity
        let mut renamed = keep.clone();
        renamed.name = "Keep (renamed)".to_string();
        cache.prune(&[renamed.identity_hash()]);

        assert!(cache.get(&keep_key).is_some());
        assert!(cache.get(&drop_key).is_none());
        // The dropped provider's file is gone from disk too
        let remaining: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0]
            .file_name()
            .to_string_lossy()
            .starts_with(&keep.identity_hash()));
    }

    #[test]
    fn storage_failure_degrades_to_memory() {
        let dir = TempDir::new().unwrap();
        let mut cache = ListingCache::new(dir.path().to_path_buf(), Duration::from_secs(60)).unwrap();
        // Simulate a dead cache directory
        cache.dir = dir.path().join("vanished");
        let key = ListingKey::categories("id1".into(), ContentKind::Live);
        cache.put(key.clone(), ListingPayload::Categories { categories: vec![] });
        // Entry still served from memory despite the failed write
        assert!(cache.get(&key).is_some());
        assert!(!cache.storage_ok);
    }
}
