//! Playlist (M3U) source handler
//!
//! Static line-oriented playlists: a `#EXTM3U` header, then repeated pairs of
//! an `#EXTINF` metadata line and a URL line. The whole playlist is fetched
//! once, parsed, memoized, and served as single-page listings; categories are
//! synthesized from `group-title` attributes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::ProviderSession;
use super::traits::ContentSource;
use crate::errors::{SourceError, SourceResult};
use crate::models::{
    Category, ContentItem, ContentKind, ItemPage, PageToken, Provider, ProviderKind,
};
use crate::utils::hashing::sha256_short;
use crate::utils::HttpClient;

/// Parsed playlist: synthesized categories plus all items
#[derive(Debug, Clone)]
pub struct Playlist {
    pub categories: Vec<Category>,
    pub items: Vec<ContentItem>,
}

/// Playlist source handler
pub struct PlaylistSource {
    provider: Provider,
    http: HttpClient,
    parsed: Mutex<Option<Arc<Playlist>>>,
}

impl PlaylistSource {
    pub fn new(provider: Provider, http: HttpClient) -> Self {
        Self {
            provider,
            http,
            parsed: Mutex::new(None),
        }
    }

    /// Fetch and parse the playlist, memoizing the result
    async fn playlist(&self) -> SourceResult<Arc<Playlist>> {
        let mut guard = self.parsed.lock().await;
        if let Some(playlist) = guard.as_ref() {
            return Ok(Arc::clone(playlist));
        }

        let content = if self.provider.url.starts_with("http://")
            || self.provider.url.starts_with("https://")
        {
            self.http.get_text(&self.provider.url, &[]).await?
        } else {
            tokio::fs::read_to_string(&self.provider.url)
                .await
                .map_err(SourceError::Storage)?
        };

        let playlist = Arc::new(parse_playlist(&content));
        info!(
            "parsed playlist '{}': {} items, {} categories",
            self.provider.name,
            playlist.items.len(),
            playlist.categories.len()
        );
        *guard = Some(Arc::clone(&playlist));
        Ok(playlist)
    }
}

#[async_trait]
impl ContentSource for PlaylistSource {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Playlist
    }

    async fn list_categories(
        &self,
        _session: &mut ProviderSession,
        kind: ContentKind,
    ) -> SourceResult<Vec<Category>> {
        // Playlists carry live channels only; the other trees are empty
        if kind != ContentKind::Live {
            return Ok(Vec::new());
        }
        Ok(self.playlist().await?.categories.clone())
    }

    async fn list_items(
        &self,
        _session: &mut ProviderSession,
        category: &Category,
        _page: Option<PageToken>,
    ) -> SourceResult<ItemPage> {
        let playlist = self.playlist().await?;
        let items: Vec<ContentItem> = if category.id == Category::ALL {
            playlist.items.clone()
        } else {
            playlist
                .items
                .iter()
                .filter(|item| item.extra.get("category_id") == Some(&category.id))
                .cloned()
                .collect()
        };
        Ok(ItemPage::single(items))
    }

    async fn resolve_stream(
        &self,
        _session: &mut ProviderSession,
        item: &ContentItem,
    ) -> SourceResult<String> {
        item.stream_ref
            .clone()
            .ok_or_else(|| SourceError::not_found(format!("stream for '{}'", item.name)))
    }
}

/// Parse playlist text into categories and items
///
/// Tolerates missing optional attributes, non-ASCII names, stray URL lines
/// without metadata, and a missing `#EXTM3U` header.
pub fn parse_playlist(content: &str) -> Playlist {
    let mut items: Vec<ContentItem> = Vec::new();
    let mut pending: Option<PendingEntry> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line == "#EXTM3U" {
            continue;
        }

        if let Some(extinf) = line.strip_prefix("#EXTINF:") {
            pending = Some(parse_extinf(extinf));
        } else if let Some(agent) = line.strip_prefix("#EXTVLCOPT:http-user-agent=") {
            if let Some(entry) = pending.as_mut() {
                entry.user_agent = Some(agent.to_string());
            }
        } else if line.starts_with('#') {
            // Unknown directive
            continue;
        } else {
            let entry = pending.take().unwrap_or_default();
            let id = (items.len() + 1).to_string();
            let name = entry
                .name
                .unwrap_or_else(|| name_from_url(line).to_string());
            let mut item = ContentItem::new(id, name, ContentKind::Live);
            item.group = entry.group;
            item.logo_url = entry.logo;
            item.xmltv_id = entry.tvg_id;
            item.stream_ref = Some(line.to_string());
            if let Some(agent) = entry.user_agent {
                item.extra.insert("user_agent".to_string(), agent);
            }
            if let Some(group) = item.group.clone() {
                item.extra
                    .insert("category_id".to_string(), category_id(&group));
            }
            items.push(item);
        }
    }

    if let Some(entry) = pending {
        debug!("dropping trailing metadata without URL: {:?}", entry.name);
    }

    // Categories from group titles: "All" first, then alphabetical
    let mut groups: HashMap<String, String> = HashMap::new();
    for item in &items {
        if let Some(group) = &item.group {
            groups
                .entry(category_id(group))
                .or_insert_with(|| group.clone());
        }
    }
    let mut named: Vec<(String, String)> = groups.into_iter().collect();
    named.sort_by(|a, b| a.1.cmp(&b.1));

    let mut categories = vec![Category::all(ContentKind::Live)];
    categories.extend(named.into_iter().map(|(id, name)| Category {
        id,
        name,
        kind: ContentKind::Live,
    }));

    Playlist { categories, items }
}

/// Stable category id derived from the group title
fn category_id(group: &str) -> String {
    sha256_short(group)
}

#[derive(Debug, Default)]
struct PendingEntry {
    name: Option<String>,
    group: Option<String>,
    logo: Option<String>,
    tvg_id: Option<String>,
    user_agent: Option<String>,
}

/// Parse the body of an `#EXTINF:` line: duration and attributes, then a
/// comma and the display name.
fn parse_extinf(extinf: &str) -> PendingEntry {
    let (attrs_part, title) = match extinf.rfind(',') {
        Some(pos) => (&extinf[..pos], extinf[pos + 1..].trim()),
        None => {
            warn!("EXTINF line without title separator");
            (extinf, "")
        }
    };

    let attrs = parse_attributes(attrs_part);
    PendingEntry {
        name: (!title.is_empty()).then(|| title.to_string()),
        group: attrs.get("group-title").cloned(),
        logo: attrs.get("tvg-logo").cloned(),
        tvg_id: attrs.get("tvg-id").cloned(),
        user_agent: attrs.get("user-agent").cloned(),
    }
}

/// Scan `key="value"` pairs without regex; unquoted values end at whitespace
fn parse_attributes(input: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_whitespace() {
            continue;
        }
        let mut key = String::new();
        key.push(ch);
        while let Some(&next) = chars.peek() {
            if next == '=' || next.is_whitespace() {
                break;
            }
            key.push(next);
            chars.next();
        }
        if chars.peek() != Some(&'=') {
            continue; // bare token (the duration), skip
        }
        chars.next(); // consume '='

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            for next in chars.by_ref() {
                if next == '"' {
                    break;
                }
                value.push(next);
            }
        } else {
            while let Some(&next) = chars.peek() {
                if next.is_whitespace() {
                    break;
                }
                value.push(next);
                chars.next();
            }
        }
        if !key.is_empty() && !value.is_empty() {
            attrs.insert(key, value);
        }
    }
    attrs
}

/// Fallback display name for URL lines without metadata
fn name_from_url(url: &str) -> &str {
    url.rsplit('/')
        .next()
        .unwrap_or(url)
        .split('?')
        .next()
        .unwrap_or(url)
}
