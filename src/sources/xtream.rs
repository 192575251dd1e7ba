//! Xtream-style API source handler
//!
//! REST endpoints under `player_api.php`, authenticated by username/password
//! query parameters. Listings come back as complete JSON arrays per category,
//! so the page cursor is always exhausted after one page. Stream resolution
//! is a pure URL transform.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::session::ProviderSession;
use super::traits::ContentSource;
use crate::errors::{SourceError, SourceResult};
use crate::models::{
    Category, ContentItem, ContentKind, ItemPage, PageToken, Provider, ProviderKind,
};
use crate::utils::HttpClient;

/// Xtream source handler
pub struct XtreamSource {
    provider: Provider,
    http: HttpClient,
}

impl XtreamSource {
    pub fn new(provider: Provider, http: HttpClient) -> Self {
        Self { provider, http }
    }

    fn credentials(&self) -> SourceResult<(&str, &str)> {
        let username = self
            .provider
            .username
            .as_deref()
            .ok_or_else(|| SourceError::auth("xtream provider without username"))?;
        let password = self
            .provider
            .password
            .as_deref()
            .ok_or_else(|| SourceError::auth("xtream provider without password"))?;
        Ok((username, password))
    }

    /// Normalize the configured URL to `scheme://host[:port]`, defaulting the
    /// scheme to http when absent (panels frequently hand out bare hosts).
    fn base(&self) -> String {
        let raw = if self.provider.url.contains("://") {
            self.provider.url.clone()
        } else {
            format!("http://{}", self.provider.url)
        };
        match Url::parse(&raw) {
            Ok(parsed) => {
                let mut base = format!(
                    "{}://{}",
                    parsed.scheme(),
                    parsed.host_str().unwrap_or_default()
                );
                if let Some(port) = parsed.port() {
                    base.push_str(&format!(":{port}"));
                }
                base
            }
            Err(_) => raw.trim_end_matches('/').to_string(),
        }
    }

    fn api_url(&self, action: Option<&str>, extra: &[(&str, &str)]) -> SourceResult<String> {
        let (username, password) = self.credentials()?;
        let mut url = Url::parse(&format!("{}/player_api.php", self.base()))
            .map_err(|e| SourceError::malformed(format!("invalid xtream URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("username", username);
            pairs.append_pair("password", password);
            if let Some(action) = action {
                pairs.append_pair("action", action);
            }
            pairs.extend_pairs(extra);
        }
        Ok(url.into())
    }

    fn category_action(kind: ContentKind) -> &'static str {
        match kind {
            ContentKind::Live => "get_live_categories",
            ContentKind::Movie => "get_vod_categories",
            ContentKind::Series => "get_series_categories",
        }
    }

    fn listing_action(kind: ContentKind) -> &'static str {
        match kind {
            ContentKind::Live => "get_live_streams",
            ContentKind::Movie => "get_vod_streams",
            ContentKind::Series => "get_series",
        }
    }

    fn parse_item(value: &Value, kind: ContentKind) -> Option<ContentItem> {
        let object = value.as_object()?;
        let id = object
            .get("stream_id")
            .or_else(|| object.get("series_id"))
            .map(json_string)
            .filter(|s| !s.is_empty())?;
        let name = object.get("name").map(json_string).unwrap_or_default();

        let mut item = ContentItem::new(id, name, kind);
        item.logo_url = object
            .get("stream_icon")
            .or_else(|| object.get("cover"))
            .map(json_string)
            .filter(|s| !s.is_empty());
        item.xmltv_id = object
            .get("epg_channel_id")
            .map(json_string)
            .filter(|s| !s.is_empty());
        item.group = object
            .get("category_id")
            .map(json_string)
            .filter(|s| !s.is_empty());
        item.season = object.get("season").and_then(parse_u32);
        item.episode = object.get("episode_num").and_then(parse_u32);
        for (key, field) in object {
            if !field.is_array() && !field.is_object() {
                item.extra.insert(key.clone(), json_string(field));
            }
        }
        Some(item)
    }
}

#[async_trait]
impl ContentSource for XtreamSource {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Xtream
    }

    /// Credentials ride on every request; authenticate only verifies the
    /// account is active, mirroring the panel's own player handshake.
    async fn authenticate(&self, _session: &mut ProviderSession) -> SourceResult<()> {
        let url = self.api_url(None, &[])?;
        let body: Value = self.http.get_json(&url, &[]).await?;
        let status = body
            .get("user_info")
            .and_then(|info| info.get("status"))
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::auth("panel returned no user information"))?;
        if status != "Active" {
            return Err(SourceError::auth(format!("account status is {status}")));
        }
        debug!("xtream account verified for '{}'", self.provider.name);
        Ok(())
    }

    async fn list_categories(
        &self,
        _session: &mut ProviderSession,
        kind: ContentKind,
    ) -> SourceResult<Vec<Category>> {
        let url = self.api_url(Some(Self::category_action(kind)), &[])?;
        let body: Value = self.http.get_json(&url, &[]).await?;
        let entries = body
            .as_array()
            .ok_or_else(|| SourceError::malformed("category response is not an array"))?;

        let mut categories = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry.get("category_id").map(json_string).unwrap_or_default();
            let name = entry
                .get("category_name")
                .map(json_string)
                .unwrap_or_default();
            if id.is_empty() {
                warn!("skipping xtream category without id");
                continue;
            }
            categories.push(Category { id, name, kind });
        }
        Ok(categories)
    }

    async fn list_items(
        &self,
        _session: &mut ProviderSession,
        category: &Category,
        _page: Option<PageToken>,
    ) -> SourceResult<ItemPage> {
        let extra: Vec<(&str, &str)> = if category.id == Category::ALL {
            Vec::new()
        } else {
            vec![("category_id", category.id.as_str())]
        };
        let url = self.api_url(Some(Self::listing_action(category.kind)), &extra)?;
        let body: Value = self.http.get_json(&url, &[]).await?;
        let entries = body
            .as_array()
            .ok_or_else(|| SourceError::malformed("listing response is not an array"))?;

        let items: Vec<ContentItem> = entries
            .iter()
            .filter_map(|value| {
                let parsed = Self::parse_item(value, category.kind);
                if parsed.is_none() {
                    warn!("skipping malformed xtream item in category {}", category.id);
                }
                parsed
            })
            .collect();
        Ok(ItemPage::single(items))
    }

    async fn resolve_stream(
        &self,
        _session: &mut ProviderSession,
        item: &ContentItem,
    ) -> SourceResult<String> {
        let (username, password) = self.credentials()?;
        let base = self.base();
        match item.kind {
            ContentKind::Live => Ok(format!("{base}/live/{username}/{password}/{}.ts", item.id)),
            ContentKind::Movie => {
                let ext = item
                    .extra
                    .get("container_extension")
                    .map(String::as_str)
                    .unwrap_or("mp4");
                Ok(format!(
                    "{base}/movie/{username}/{password}/{}.{ext}",
                    item.id
                ))
            }
            ContentKind::Series => {
                // Only episodes carry a playable id; series containers browse
                let episode_id = item.extra.get("episode_id").ok_or_else(|| {
                    SourceError::not_found(format!("'{}' is a series container", item.name))
                })?;
                let ext = item
                    .extra
                    .get("container_extension")
                    .map(String::as_str)
                    .unwrap_or("mp4");
                Ok(format!(
                    "{base}/series/{username}/{password}/{episode_id}.{ext}"
                ))
            }
        }
    }
}

/// Full-guide XMLTV export endpoint for an Xtream provider
pub fn xmltv_url(provider: &Provider) -> SourceResult<String> {
    let source = XtreamSource::new(provider.clone(), HttpClient::default());
    let (username, password) = source.credentials()?;
    let mut url = Url::parse(&format!("{}/xmltv.php", source.base()))
        .map_err(|e| SourceError::malformed(format!("invalid xtream URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("username", username)
        .append_pair("password", password);
    Ok(url.into())
}

fn json_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn parse_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as u32),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
