//! Shared data model for providers, categories, and content items
//!
//! Everything here is plain immutable data: providers are configuration
//! snapshots handed to fetchers, and items/categories are the normalized
//! shape all three provider protocols are flattened into.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// The closed set of supported provider protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Static M3U playlist (URL or local file)
    Playlist,
    /// Legacy STB middleware portal (handshake token, page-indexed listings)
    Portal,
    /// Xtream-style REST API (query-parameter credentials)
    Xtream,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playlist => "playlist",
            Self::Portal => "portal",
            Self::Xtream => "xtream",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three browsable content trees every provider is normalized into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Live,
    Movie,
    Series,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Movie => "movie",
            Self::Series => "series",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured content source
///
/// Immutable snapshot created on configuration save and passed to fetchers.
/// The display `name` is a mutable label and is deliberately excluded from
/// [`Provider::identity_hash`], so renaming a provider never invalidates its
/// cached listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    pub kind: ProviderKind,
    pub url: String,
    /// Device MAC for portal providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Provider {
    /// Create a playlist provider
    pub fn playlist<S: Into<String>, U: Into<String>>(name: S, url: U) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Playlist,
            url: url.into(),
            mac: None,
            username: None,
            password: None,
        }
    }

    /// Create a portal provider with its device MAC
    pub fn portal<S: Into<String>, U: Into<String>, M: Into<String>>(
        name: S,
        url: U,
        mac: M,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ProviderKind::Portal,
            url: url.into(),
            mac: Some(mac.into()),
            username: None,
            password: None,
        }
    }

    /// Create an Xtream provider with account credentials
    pub fn xtream<S, U, N, P>(name: S, url: U, username: N, password: P) -> Self
    where
        S: Into<String>,
        U: Into<String>,
        N: Into<String>,
        P: Into<String>,
    {
        Self {
            name: name.into(),
            kind: ProviderKind::Xtream,
            url: url.into(),
            mac: None,
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Canonical connection identity hash
    ///
    /// Pure function of (kind, url, mac, username). Cache filenames and prune
    /// decisions key on this, so two providers with colliding display names
    /// never share cache entries and a renamed provider keeps its cache.
    pub fn identity_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.url.as_bytes());
        hasher.update(b"|");
        hasher.update(self.mac.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(self.username.as_deref().unwrap_or("").as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A grouping node (genre or category) within one content tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub kind: ContentKind,
}

impl Category {
    /// Pseudo-category id selecting every item of a content tree
    pub const ALL: &'static str = "*";

    pub fn all(kind: ContentKind) -> Self {
        Self {
            id: Self::ALL.to_string(),
            name: "All".to_string(),
            kind,
        }
    }
}

/// A playable or browsable unit, normalized across provider protocols
///
/// Immutable once cached; a refetch supersedes the cached copy wholesale.
/// Provider-native fields that do not map onto the common shape are kept
/// verbatim in `extra` (portal drill-down parameters, container extensions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub name: String,
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    /// Provider stream reference: a direct URL for playlist/Xtream items, a
    /// portal `cmd` string that still needs link creation for portal items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_ref: Option<String>,
    /// Guide-data channel id advertised by the provider (tvg-id / epg_channel_id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xmltv_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

impl ContentItem {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N, kind: ContentKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            group: None,
            logo_url: None,
            stream_ref: None,
            xmltv_id: None,
            season: None,
            episode: None,
            extra: HashMap::new(),
        }
    }
}

/// Opaque pagination cursor
///
/// Portal providers page by index, Xtream and playlists return everything in
/// one page; the numeric token absorbs both behind one cursor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageToken(pub u32);

/// One page of items plus the cursor to the next page, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemPage {
    pub items: Vec<ContentItem>,
    pub next: Option<PageToken>,
    /// Provider-reported total item count across all pages, when known
    pub total: Option<u32>,
}

impl ItemPage {
    /// A complete single-page result (playlist and Xtream listings)
    pub fn single(items: Vec<ContentItem>) -> Self {
        let total = items.len() as u32;
        Self {
            items,
            next: None,
            total: Some(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_hash_ignores_display_name() {
        let a = Provider::portal("Living room", "http://portal.example", "00:1A:79:00:00:01");
        let mut b = a.clone();
        b.name = "Renamed".to_string();
        assert_eq!(a.identity_hash(), b.identity_hash());
    }

    #[test]
    fn identity_hash_tracks_connection_parameters() {
        let a = Provider::portal("p", "http://portal.example", "00:1A:79:00:00:01");
        let b = Provider::portal("p", "http://portal.example", "00:1A:79:00:00:02");
        assert_ne!(a.identity_hash(), b.identity_hash());

        let c = Provider::xtream("p", "http://xc.example", "alice", "s3cret");
        let d = Provider::xtream("p", "http://xc.example", "bob", "s3cret");
        assert_ne!(c.identity_hash(), d.identity_hash());
    }
}
