//! Portal (legacy STB middleware) source handler
//!
//! Talks the `load.php` protocol: a handshake issues a bearer token, then
//! category/listing/link-creation actions carry the token plus device
//! identifiers as headers. Listings paginate by numeric page index inside a
//! `js.{data, total_items, max_page_items}` envelope.

use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, NaiveDateTime};
use serde_json::Value;
use std::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use super::session::{ProviderSession, TOKEN_LIFETIME};
use super::traits::ContentSource;
use crate::epg::xmltv::GuideChannel;
use crate::epg::{GuideFeed, Programme};
use crate::errors::{SourceError, SourceResult};
use crate::models::{
    Category, ContentItem, ContentKind, ItemPage, PageToken, Provider, ProviderKind,
};
use crate::utils::http::redact;
use crate::utils::HttpClient;

const USER_AGENT: &str = "Mozilla/5.0 (QtEmbedded; U; Linux; C) AppleWebKit/533.3 (KHTML, like Gecko) MAG200 stbapp ver: 2 rev: 250 Safari/533.3";
const X_USER_AGENT: &str = "Model: MAG200; Link: Ethernet";

/// Handshake endpoints probed in order; the one that answers is remembered
const ENDPOINTS: [&str; 2] = ["/portal.php", "/server/load.php"];

/// Hours of guide data requested per refresh
const GUIDE_PERIOD_HOURS: &str = "5";

/// Portal source handler
pub struct PortalSource {
    provider: Provider,
    http: HttpClient,
    /// Endpoint path resolved by the first successful handshake
    endpoint: RwLock<Option<&'static str>>,
}

impl PortalSource {
    pub fn new(provider: Provider, http: HttpClient) -> Self {
        Self {
            provider,
            http,
            endpoint: RwLock::new(None),
        }
    }

    /// `scheme://host[:port]` of the portal
    fn base(&self) -> String {
        match Url::parse(&self.provider.url) {
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
            Err(_) => self.provider.url.trim_end_matches('/').to_string(),
        }
    }

    fn resolved_endpoint(&self) -> &'static str {
        self.endpoint
            .read()
            .ok()
            .and_then(|guard| *guard)
            .unwrap_or(ENDPOINTS[1])
    }

    /// Request headers the middleware expects: MAG identity, device MAC
    /// cookie, and the bearer token once issued.
    fn headers(&self, session: &ProviderSession) -> Vec<(String, String)> {
        let mac = self.provider.mac.as_deref().unwrap_or_default();
        let mut headers = vec![
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            ("X-User-Agent".to_string(), X_USER_AGENT.to_string()),
            ("Referer".to_string(), format!("{}/c/", self.base())),
            (
                "Cookie".to_string(),
                format!("mac={mac}; stb_lang=en; timezone=UTC; PHPSESSID=null;"),
            ),
        ];
        if let Some(token) = session.token() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        headers
    }

    fn build_url(&self, endpoint: &str, params: &[(&str, &str)]) -> SourceResult<String> {
        let mut url = Url::parse(&format!("{}{endpoint}", self.base()))
            .map_err(|e| SourceError::malformed(format!("invalid portal URL: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("JsHttpRequest", "1-xml");
        Ok(url.into())
    }

    /// GET a portal action and unwrap the `js` envelope
    async fn portal_get(
        &self,
        session: &ProviderSession,
        params: &[(&str, &str)],
    ) -> SourceResult<Value> {
        let url = self.build_url(self.resolved_endpoint(), params)?;
        let headers = self.headers(session);
        let header_refs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let body: Value = self.http.get_json(&url, &header_refs).await?;
        match body.get("js") {
            Some(js) => Ok(js.clone()),
            // Portals answer expired tokens with an empty body instead of 401
            None => Err(SourceError::auth(format!(
                "portal response without 'js' envelope from {}",
                redact(&url)
            ))),
        }
    }

    async fn handshake(&self, session: &mut ProviderSession) -> SourceResult<()> {
        let mut last_err = None;
        for endpoint in ENDPOINTS {
            let url = self.build_url(
                endpoint,
                &[("type", "stb"), ("action", "handshake"), ("token", "")],
            )?;
            let headers = self.headers(session);
            let header_refs: Vec<(&str, &str)> = headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();
            match self.http.get_json::<Value>(&url, &header_refs).await {
                Ok(body) => {
                    let token = body
                        .get("js")
                        .and_then(|js| js.get("token"))
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            SourceError::auth("handshake response carried no token")
                        })?;
                    session.install_token(token.to_string(), TOKEN_LIFETIME);
                    if let Ok(mut guard) = self.endpoint.write() {
                        *guard = Some(endpoint);
                    }
                    debug!(
                        "portal handshake succeeded via {endpoint} (refresh #{})",
                        session.refresh_count()
                    );
                    return self.verify_profile(session).await;
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    debug!("handshake via {endpoint} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| SourceError::network("no handshake endpoint reachable")))
    }

    /// A blocked account answers the profile request with empty identity
    async fn verify_profile(&self, session: &ProviderSession) -> SourceResult<()> {
        let mac = self.provider.mac.clone().unwrap_or_default();
        let metrics = format!("{{\"mac\":\"{mac}\",\"type\":\"STB\",\"model\":\"MAG250\"}}");
        let js = self
            .portal_get(
                session,
                &[
                    ("type", "stb"),
                    ("action", "get_profile"),
                    ("hd", "1"),
                    ("stb_type", "MAG250"),
                    ("client_type", "STB"),
                    ("auth_second_step", "1"),
                    ("not_valid_token", "0"),
                    ("metrics", &metrics),
                ],
            )
            .await?;

        let id = js.get("id").map(json_string).unwrap_or_default();
        let name = js.get("name").map(json_string).unwrap_or_default();
        if id.is_empty() && name.is_empty() {
            return Err(SourceError::auth("provider rejected this device (blocked)"));
        }
        Ok(())
    }

    async fn ensure_valid(&self, session: &mut ProviderSession) -> SourceResult<()> {
        if session.is_valid() {
            return Ok(());
        }
        self.handshake(session).await
    }

    /// Portal-side name for each content tree
    fn portal_type(kind: ContentKind) -> &'static str {
        match kind {
            ContentKind::Live => "itv",
            ContentKind::Movie => "vod",
            ContentKind::Series => "series",
        }
    }

    fn parse_item(&self, value: &Value, kind: ContentKind) -> Option<ContentItem> {
        let object = value.as_object()?;
        let id = object.get("id").map(json_string).filter(|s| !s.is_empty())?;
        let name = object
            .get("name")
            .or_else(|| object.get("title"))
            .map(json_string)
            .unwrap_or_default();

        let mut item = ContentItem::new(id, name, kind);
        item.stream_ref = object
            .get("cmd")
            .map(json_string)
            .filter(|s| !s.is_empty());
        item.logo_url = object
            .get("logo")
            .or_else(|| object.get("screenshot_uri"))
            .map(json_string)
            .filter(|s| !s.is_empty())
            .map(|logo| self.absolutize(&logo));
        item.xmltv_id = object
            .get("xmltv_id")
            .map(json_string)
            .filter(|s| !s.is_empty());
        item.season = object.get("season_number").and_then(parse_u32);
        item.episode = object.get("episode_number").and_then(parse_u32);

        // Raw provider fields kept verbatim for drill-down and display
        for (key, field) in object {
            if !field.is_array() && !field.is_object() {
                item.extra.insert(key.clone(), json_string(field));
            }
        }
        Some(item)
    }

    /// Portal logo references are often relative to the portal host
    fn absolutize(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            reference.to_string()
        } else {
            format!("{}/{}", self.base(), reference.trim_start_matches('/'))
        }
    }

    async fn create_link(
        &self,
        session: &ProviderSession,
        item: &ContentItem,
    ) -> SourceResult<String> {
        let cmd = item
            .stream_ref
            .as_deref()
            .ok_or_else(|| SourceError::not_found(format!("stream for '{}'", item.name)))?;
        let js = self
            .portal_get(
                session,
                &[
                    ("type", Self::portal_type(item.kind)),
                    ("action", "create_link"),
                    ("cmd", cmd),
                ],
            )
            .await?;
        let link = js
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::malformed("create_link response without cmd"))?;
        Ok(strip_player_prefix(link).to_string())
    }
}

#[async_trait]
impl ContentSource for PortalSource {
    fn provider_kind(&self) -> ProviderKind {
        ProviderKind::Portal
    }

    fn new_session(&self) -> ProviderSession {
        ProviderSession::portal()
    }

    async fn authenticate(&self, session: &mut ProviderSession) -> SourceResult<()> {
        self.handshake(session).await
    }

    async fn list_categories(
        &self,
        session: &mut ProviderSession,
        kind: ContentKind,
    ) -> SourceResult<Vec<Category>> {
        self.ensure_valid(session).await?;
        let action = match kind {
            ContentKind::Live => "get_genres",
            ContentKind::Movie | ContentKind::Series => "get_categories",
        };
        let js = self
            .portal_get(session, &[("type", Self::portal_type(kind)), ("action", action)])
            .await?;
        let entries = js
            .as_array()
            .ok_or_else(|| SourceError::malformed("category response is not an array"))?;

        let mut categories = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry.get("id").map(json_string).unwrap_or_default();
            let name = entry
                .get("title")
                .or_else(|| entry.get("name"))
                .map(json_string)
                .unwrap_or_default();
            if id.is_empty() {
                warn!("skipping category without id: {entry}");
                continue;
            }
            categories.push(Category { id, name, kind });
        }
        Ok(categories)
    }

    async fn list_items(
        &self,
        session: &mut ProviderSession,
        category: &Category,
        page: Option<PageToken>,
    ) -> SourceResult<ItemPage> {
        self.ensure_valid(session).await?;
        let page_index = page.map(|token| token.0).unwrap_or(1);
        let page_str = page_index.to_string();

        let mut params: Vec<(&str, &str)> = vec![
            ("type", Self::portal_type(category.kind)),
            ("action", "get_ordered_list"),
            ("p", &page_str),
            ("sortby", "name"),
        ];
        match category.kind {
            ContentKind::Live => {
                params.push(("genre", &category.id));
                params.push(("fav", "0"));
                params.push(("hd", "0"));
            }
            ContentKind::Movie => params.push(("category", &category.id)),
            ContentKind::Series => {
                params.push(("category", &category.id));
                params.push(("movie_id", "0"));
                params.push(("season_id", "0"));
                params.push(("episode_id", "0"));
            }
        }

        let js = self.portal_get(session, &params).await?;
        let envelope = js
            .as_object()
            .ok_or_else(|| SourceError::malformed("listing envelope is not an object"))?;

        let data = envelope
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| SourceError::malformed("listing envelope without data array"))?;
        let total = envelope
            .get("total_items")
            .and_then(parse_u32)
            .unwrap_or(data.len() as u32);
        let per_page = envelope
            .get("max_page_items")
            .and_then(parse_u32)
            .unwrap_or(0);

        let items: Vec<ContentItem> = data
            .iter()
            .filter_map(|value| {
                let parsed = self.parse_item(value, category.kind);
                if parsed.is_none() {
                    warn!("skipping malformed portal item on page {page_index}");
                }
                parsed
            })
            .collect();

        let pages = if per_page > 0 {
            total.div_ceil(per_page)
        } else {
            page_index
        };
        let next = (page_index < pages).then(|| PageToken(page_index + 1));

        Ok(ItemPage {
            items,
            next,
            total: Some(total),
        })
    }

    async fn resolve_stream(
        &self,
        session: &mut ProviderSession,
        item: &ContentItem,
    ) -> SourceResult<String> {
        self.ensure_valid(session).await?;
        match self.create_link(session, item).await {
            // One refresh-and-retry on an expired token, then surface
            Err(e) if e.is_auth() => {
                debug!("create_link rejected the token, reauthenticating once");
                self.handshake(session).await?;
                self.create_link(session, item).await
            }
            other => other,
        }
    }

    /// The middleware ships its own guide: `get_epg_info` answers a map of
    /// channel id to programme entries
    async fn fetch_guide(
        &self,
        session: &mut ProviderSession,
    ) -> SourceResult<Option<GuideFeed>> {
        self.ensure_valid(session).await?;
        let js = self
            .portal_get(
                session,
                &[
                    ("type", "itv"),
                    ("action", "get_epg_info"),
                    ("period", GUIDE_PERIOD_HOURS),
                ],
            )
            .await?;
        let data = js
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| SourceError::malformed("guide response without data map"))?;

        let mut feed = GuideFeed::default();
        let mut skipped = 0usize;
        for (channel_id, entries) in data {
            feed.channels.push(GuideChannel {
                id: channel_id.clone(),
                ..GuideChannel::default()
            });
            let Some(entries) = entries.as_array() else {
                continue;
            };
            for entry in entries {
                match parse_guide_entry(channel_id, entry) {
                    Some(programme) => feed.programmes.push(programme),
                    None => skipped += 1,
                }
            }
        }
        if skipped > 0 {
            warn!("skipped {skipped} malformed portal guide entries");
        }
        Ok(Some(feed))
    }
}

/// Portal link commands arrive as `ffmpeg http://...`; keep only the URL
fn strip_player_prefix(cmd: &str) -> &str {
    cmd.split_whitespace().last().unwrap_or(cmd)
}

/// One `get_epg_info` entry: `name` plus `time`/`time_to` bounds
fn parse_guide_entry(channel_id: &str, entry: &Value) -> Option<Programme> {
    let title = entry
        .get("name")
        .map(json_string)
        .filter(|s| !s.is_empty())?;
    let start = parse_guide_timestamp(&json_string(entry.get("time")?))?;
    let mut stop = parse_guide_timestamp(&json_string(entry.get("time_to")?))?;
    // Midnight-crossing entries come with stop before start
    if stop < start {
        stop = stop.checked_add_days(Days::new(1))?;
    }
    Some(Programme {
        channel: channel_id.to_string(),
        start,
        stop,
        title,
        description: entry
            .get("descr")
            .map(json_string)
            .filter(|s| !s.is_empty()),
    })
}

/// Guide timestamps arrive zone-less; treated as UTC like zone-less XMLTV
fn parse_guide_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|parsed| parsed.and_utc().fixed_offset())
}

/// Portals mix strings and numbers freely for ids and counters
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_prefix_is_stripped() {
        assert_eq!(
            strip_player_prefix("ffmpeg http://host/stream/1"),
            "http://host/stream/1"
        );
        assert_eq!(
            strip_player_prefix("http://host/stream/1"),
            "http://host/stream/1"
        );
    }

    #[test]
    fn numeric_fields_tolerate_both_encodings() {
        assert_eq!(parse_u32(&serde_json::json!(42)), Some(42));
        assert_eq!(parse_u32(&serde_json::json!("42")), Some(42));
        assert_eq!(parse_u32(&serde_json::json!(null)), None);
        assert_eq!(json_string(&serde_json::json!(7)), "7");
        assert_eq!(json_string(&serde_json::json!("x")), "x");
    }

    #[test]
    fn guide_entries_parse_and_roll_over_midnight() {
        let entry = serde_json::json!({
            "name": "Late Film",
            "descr": "A classic.",
            "time": "2025-06-01 23:00:00",
            "time_to": "2025-06-01 00:30:00"
        });
        let programme = parse_guide_entry("12", &entry).unwrap();
        assert_eq!(programme.channel, "12");
        assert_eq!(programme.title, "Late Film");
        assert_eq!(programme.description.as_deref(), Some("A classic."));
        assert!(programme.stop > programme.start);

        let missing_time = serde_json::json!({ "name": "Broken", "time_to": "x" });
        assert!(parse_guide_entry("12", &missing_time).is_none());
    }

    #[test]
    fn item_parsing_keeps_raw_fields() {
        let provider = Provider::portal("p", "http://portal.example", "00:1A:79:00:00:01");
        let source = PortalSource::new(provider, HttpClient::default());
        let raw = serde_json::json!({
            "id": 12,
            "name": "Canal Doce",
            "cmd": "ffmpeg http://portal.example/ch/12",
            "logo": "misc/logos/12.png",
            "tv_genre_id": "3",
            "xmltv_id": "doce.example"
        });
        let item = source.parse_item(&raw, ContentKind::Live).unwrap();
        assert_eq!(item.id, "12");
        assert_eq!(item.logo_url.as_deref(), Some("http://portal.example/misc/logos/12.png"));
        assert_eq!(item.extra.get("tv_genre_id").map(String::as_str), Some("3"));
        assert_eq!(item.xmltv_id.as_deref(), Some("doce.example"));
    }
}
