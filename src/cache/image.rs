//! Artwork cache with a disk budget and LRU eviction
//!
//! Files are stored under content-hash names with a sniffed extension and
//! tracked in an `index.json` next to them. Failed downloads are remembered
//! as negative entries for a cooldown window so broken artwork URLs are not
//! re-fetched on every listing render.

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::errors::{SourceError, SourceResult};
use crate::utils::backoff::retry_delay;
use crate::utils::hashing::sha256_hex;
use crate::utils::http::HttpClient;
use crate::utils::write_atomic;

const INDEX_FILE: &str = "index.json";

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLookup {
    /// Cached bytes, ready to render
    Hit(Vec<u8>),
    /// A recent fetch failed; do not retry yet
    Negative,
    /// Not cached, caller should fetch
    Miss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageEntry {
    url: String,
    /// File name under the cache dir, empty for negative entries
    file: String,
    size: u64,
    last_access: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failed_at: Option<DateTime<Utc>>,
    /// In-memory copy, only populated when storage has degraded
    #[serde(skip)]
    bytes: Option<Vec<u8>>,
}

/// LRU artwork cache bounded by total bytes on disk
pub struct ImageCache {
    dir: PathBuf,
    budget: u64,
    negative_cooldown: Duration,
    /// Unbounded; eviction is driven by the byte budget, not entry count
    entries: LruCache<String, ImageEntry>,
    total: u64,
    storage_ok: bool,
}

impl ImageCache {
    pub fn new(dir: PathBuf, budget: u64, negative_cooldown: Duration) -> SourceResult<Self> {
        fs::create_dir_all(&dir).map_err(SourceError::Storage)?;
        let mut cache = Self {
            dir,
            budget,
            negative_cooldown,
            entries: LruCache::unbounded(),
            total: 0,
            storage_ok: true,
        };
        cache.load_index();
        Ok(cache)
    }

    /// Look up artwork by its source URL
    pub fn get_cached(&mut self, url: &str) -> ImageLookup {
        let key = sha256_hex(url);
        let now = Utc::now();

        // get_mut also promotes the entry in the recency order
        let (failed_at, file, size, in_memory) = match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.last_access = now;
                (
                    entry.failed_at,
                    entry.file.clone(),
                    entry.size,
                    entry.bytes.clone(),
                )
            }
            None => return ImageLookup::Miss,
        };

        if let Some(failed_at) = failed_at {
            let age = now.signed_duration_since(failed_at).to_std().unwrap_or_default();
            if age < self.negative_cooldown {
                return ImageLookup::Negative;
            }
            // Cooldown elapsed, eligible for another attempt
            self.entries.pop(&key);
            self.save_index();
            return ImageLookup::Miss;
        }

        if let Some(bytes) = in_memory {
            return ImageLookup::Hit(bytes);
        }
        match fs::read(self.dir.join(&file)) {
            Ok(bytes) => {
                self.save_index();
                ImageLookup::Hit(bytes)
            }
            Err(_) => {
                // File vanished out from under the index
                debug!("cached image missing on disk, dropping entry: {file}");
                self.entries.pop(&key);
                self.total = self.total.saturating_sub(size);
                self.save_index();
                ImageLookup::Miss
            }
        }
    }

    /// Store fetched artwork, evicting least-recently-used entries until the
    /// total is back under budget
    pub fn store(&mut self, url: &str, bytes: Vec<u8>) {
        let key = sha256_hex(url);
        if let Some(old) = self.entries.pop(&key) {
            self.remove_file(&old);
        }

        let ext = infer::get(&bytes)
            .map(|kind| kind.extension())
            .unwrap_or("img");
        let file = format!("{key}.{ext}");
        let size = bytes.len() as u64;

        let mut entry = ImageEntry {
            url: url.to_string(),
            file: file.clone(),
            size,
            last_access: Utc::now(),
            failed_at: None,
            bytes: None,
        };

        if self.storage_ok {
            if let Err(e) = write_atomic(&self.dir.join(&file), &bytes) {
                warn!("image cache write failed ({e}), keeping artwork in memory only");
                self.storage_ok = false;
            }
        }
        if !self.storage_ok {
            entry.bytes = Some(bytes);
        }

        self.total += size;
        self.entries.push(key, entry);
        self.evict_over_budget();
        self.save_index();
    }

    /// Remember a failed fetch so it is not retried until the cooldown passes
    pub fn store_negative(&mut self, url: &str) {
        let key = sha256_hex(url);
        if let Some(old) = self.entries.pop(&key) {
            self.remove_file(&old);
        }
        self.entries.push(
            key,
            ImageEntry {
                url: url.to_string(),
                file: String::new(),
                size: 0,
                last_access: Utc::now(),
                failed_at: Some(Utc::now()),
                bytes: None,
            },
        );
        self.save_index();
    }

    /// Drop one entry (and its file) regardless of recency
    pub fn remove(&mut self, url: &str) {
        let key = sha256_hex(url);
        if let Some(entry) = self.entries.pop(&key) {
            self.remove_file(&entry);
            self.save_index();
        }
    }

    /// Drop everything
    pub fn clear(&mut self) {
        let keys: Vec<String> = self.entries.iter().map(|(k, _)| k.clone()).collect();
        for key in keys {
            if let Some(entry) = self.entries.pop(&key) {
                self.remove_file(&entry);
            }
        }
        self.total = 0;
        self.save_index();
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    fn evict_over_budget(&mut self) {
        while self.total > self.budget {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                break;
            };
            debug!("evicting cached image over budget: {}", evicted.url);
            self.remove_file(&evicted);
        }
    }

    fn remove_file(&mut self, entry: &ImageEntry) {
        self.total = self.total.saturating_sub(entry.size);
        if !entry.file.is_empty() {
            let _ = fs::remove_file(self.dir.join(&entry.file));
        }
    }

    /// Rebuild the LRU order from the persisted index
    ///
    /// The index is written oldest access first, so pushing in file order
    /// restores the recency order exactly. The stable sort only matters when
    /// a hand-edited index arrives out of order; entries tied on timestamp
    /// keep their file position.
    fn load_index(&mut self) {
        let raw = match fs::read(self.dir.join(INDEX_FILE)) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        let mut index: Vec<ImageEntry> = match serde_json::from_slice(&raw) {
            Ok(index) => index,
            Err(e) => {
                warn!("discarding unreadable image cache index: {e}");
                return;
            }
        };
        index.sort_by_key(|entry| entry.last_access);
        for entry in index {
            self.total += entry.size;
            self.entries.push(sha256_hex(&entry.url), entry);
        }
        info!(
            "loaded image cache index: {} entries, {} bytes",
            self.entries.len(),
            self.total
        );
    }

    fn save_index(&mut self) {
        if !self.storage_ok {
            return;
        }
        // Least recently used first, matching what load_index expects
        let index: Vec<&ImageEntry> = self.entries.iter().rev().map(|(_, entry)| entry).collect();
        match serde_json::to_vec_pretty(&index) {
            Ok(bytes) => {
                if let Err(e) = write_atomic(&self.dir.join(INDEX_FILE), &bytes) {
                    warn!("image cache index write failed ({e}), continuing in memory only");
                    self.storage_ok = false;
                }
            }
            Err(e) => warn!("image cache index serialization failed: {e}"),
        }
    }
}

/// Download artwork with bounded retries on transient failures
///
/// Auth and not-found responses are terminal; the caller records a negative
/// entry for those.
pub async fn fetch_artifact(
    http: &HttpClient,
    url: &str,
    max_retries: u32,
) -> SourceResult<Vec<u8>> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match http.get_bytes(url, &[]).await {
            Ok((bytes, _content_type)) => {
                if infer::is_image(&bytes) {
                    return Ok(bytes);
                }
                // Some providers answer artwork URLs with an HTML error page
                return Err(SourceError::malformed(format!(
                    "response from {url} is not an image"
                )));
            }
            Err(e) if e.is_transient() && attempt <= max_retries => {
                debug!("artwork fetch attempt {attempt} failed, retrying: {e}");
                tokio::time::sleep(retry_delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Minimal valid PNG header padded to the requested size
    fn png_bytes(size: usize) -> Vec<u8> {
        let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.resize(size, 0);
        bytes
    }

    fn cache(dir: &TempDir, budget: u64) -> ImageCache {
        ImageCache::new(dir.path().to_path_buf(), budget, Duration::from_secs(60)).unwrap()
    }

    #[test]
    fn store_and_hit() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache(&dir, 1024);
        cache.store("http://img.example/a.png", png_bytes(100));
        match cache.get_cached("http://img.example/a.png") {
            ImageLookup::Hit(bytes) => assert_eq!(bytes.len(), 100),
            other => panic!("expected hit, got {other:?}"),
        }
        assert_eq!(cache.total_bytes(), 100);
    }

    #[test]
    fn index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut cache = cache(&dir, 1024);
            cache.store("http://img.example/a.png", png_bytes(100));
        }
        let mut reopened = cache(&dir, 1024);
        assert_eq!(reopened.total_bytes(), 100);
        assert!(matches!(
            reopened.get_cached("http://img.example/a.png"),
            ImageLookup::Hit(_)
        ));
    }

    #[test]
    fn index_ties_reload_in_persisted_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("aaa.png"), png_bytes(4)).unwrap();
        fs::write(dir.path().join("bbb.png"), png_bytes(4)).unwrap();
        let stamp = "2025-06-01T12:00:00Z";
        let index = serde_json::json!([
            { "url": "http://img.example/a", "file": "aaa.png", "size": 4, "last_access": stamp },
            { "url": "http://img.example/b", "file": "bbb.png", "size": 4, "last_access": stamp }
        ]);
        fs::write(
            dir.path().join(INDEX_FILE),
            serde_json::to_vec(&index).unwrap(),
        )
        .unwrap();

        let mut cache = cache(&dir, 10);
        assert_eq!(cache.total_bytes(), 8);
        // Identical timestamps: file order decides, so A is the next eviction
        cache.store("http://img.example/c", png_bytes(4));
        assert_eq!(cache.get_cached("http://img.example/a"), ImageLookup::Miss);
        assert!(matches!(
            cache.get_cached("http://img.example/b"),
            ImageLookup::Hit(_)
        ));
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache(&dir, 10);
        cache.store("http://img.example/a", png_bytes(4));
        cache.store("http://img.example/b", png_bytes(4));
        // Accessing A makes B the eviction candidate
        assert!(matches!(cache.get_cached("http://img.example/a"), ImageLookup::Hit(_)));
        cache.store("http://img.example/c", png_bytes(4));

        assert!(matches!(cache.get_cached("http://img.example/a"), ImageLookup::Hit(_)));
        assert!(matches!(cache.get_cached("http://img.example/c"), ImageLookup::Hit(_)));
        assert_eq!(cache.get_cached("http://img.example/b"), ImageLookup::Miss);
        assert!(cache.total_bytes() <= 10);

        // The evicted file is gone from disk, not just from the index
        let files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != INDEX_FILE)
            .collect();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn negative_entry_until_cooldown_elapses() {
        let dir = TempDir::new().unwrap();
        let mut cache =
            ImageCache::new(dir.path().to_path_buf(), 1024, Duration::from_millis(20)).unwrap();
        cache.store_negative("http://img.example/broken");
        assert_eq!(
            cache.get_cached("http://img.example/broken"),
            ImageLookup::Negative
        );
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(
            cache.get_cached("http://img.example/broken"),
            ImageLookup::Miss
        );
    }

    #[test]
    fn successful_store_replaces_negative_entry() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache(&dir, 1024);
        cache.store_negative("http://img.example/flaky");
        cache.store("http://img.example/flaky", png_bytes(50));
        assert!(matches!(
            cache.get_cached("http://img.example/flaky"),
            ImageLookup::Hit(_)
        ));
    }

    #[test]
    fn vanished_file_self_heals() {
        let dir = TempDir::new().unwrap();
        let mut cache = cache(&dir, 1024);
        cache.store("http://img.example/a.png", png_bytes(100));
        for entry in fs::read_dir(dir.path()).unwrap().flatten() {
            if entry.file_name() != INDEX_FILE {
                fs::remove_file(entry.path()).unwrap();
            }
        }
        assert_eq!(cache.get_cached("http://img.example/a.png"), ImageLookup::Miss);
        assert_eq!(cache.total_bytes(), 0);
    }
}
