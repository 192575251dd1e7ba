//! Programme guide store
//!
//! Holds the parsed guide as a multi-alias table so a playlist channel can be
//! matched by channel id, XMLTV id, or display name. Refreshes replace the
//! whole table at once; readers never see a half-applied guide.

pub mod multikey;
pub mod xmltv;

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::{SourceError, SourceResult};
use crate::models::ContentItem;
use crate::utils::http::{maybe_gunzip, HttpClient};

pub use multikey::MultiKeyMap;
pub use xmltv::{parse_guide, GuideFeed, Programme};

/// Keys under which a playlist channel may appear in the guide
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelAliases {
    pub id: String,
    pub name: String,
    pub xmltv_id: Option<String>,
}

impl ChannelAliases {
    pub fn from_item(item: &ContentItem) -> Self {
        // Some playlist entries only carry the id as a raw attribute
        let xmltv_id = item
            .xmltv_id
            .clone()
            .or_else(|| {
                ["tvg-id", "epg_channel_id"]
                    .iter()
                    .find_map(|key| item.extra.get(*key).cloned())
            })
            .filter(|id| !id.is_empty());
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            xmltv_id,
        }
    }

    /// Lookup keys in match priority order
    fn candidates(&self) -> Vec<String> {
        let mut keys = vec![self.id.clone()];
        if let Some(xmltv_id) = &self.xmltv_id {
            keys.push(xmltv_id.clone());
        }
        keys.push(self.name.to_lowercase());
        keys
    }
}

/// Where a guide document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuideSource {
    Url(String),
    File(PathBuf),
}

/// In-memory guide table with an expiration window
pub struct EpgStore {
    table: MultiKeyMap<Vec<Programme>>,
    fetched_at: Option<DateTime<Utc>>,
    expiration: Duration,
}

impl EpgStore {
    pub fn new(expiration: Duration) -> Self {
        Self {
            table: MultiKeyMap::new(),
            fetched_at: None,
            expiration,
        }
    }

    /// True when the guide has never loaded or has outlived its window
    pub fn is_stale(&self) -> bool {
        match self.fetched_at {
            None => true,
            Some(fetched_at) => {
                let age = Utc::now().signed_duration_since(fetched_at);
                age.to_std().map(|age| age > self.expiration).unwrap_or(false)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Replace the whole table with a freshly parsed feed
    pub fn apply_feed(&mut self, feed: GuideFeed) {
        let mut table: MultiKeyMap<Vec<Programme>> = MultiKeyMap::new();
        for channel in &feed.channels {
            let mut keys = vec![channel.id.clone()];
            keys.extend(channel.display_names.iter().map(|name| name.to_lowercase()));
            table.get_or_insert_with(keys, Vec::new);
        }
        for programme in feed.programmes {
            table
                .get_or_insert_with(vec![programme.channel.clone()], Vec::new)
                .push(programme);
        }
        for programmes in table.values_mut() {
            programmes.sort_by_key(|p| p.start);
        }
        info!(
            "guide loaded: {} channels, {} programme lists",
            feed.channels.len(),
            table.len()
        );
        self.table = table;
        self.fetched_at = Some(Utc::now());
    }

    /// Current and upcoming programmes for a channel, at most `max`
    ///
    /// Tries the channel id first, then the XMLTV id, then the lowercased
    /// display name.
    pub fn programmes_for(
        &self,
        aliases: &ChannelAliases,
        now: DateTime<Utc>,
        max: usize,
    ) -> Vec<Programme> {
        let programmes = aliases
            .candidates()
            .into_iter()
            .find_map(|key| self.table.get(&key));
        let Some(programmes) = programmes else {
            return Vec::new();
        };
        programmes
            .iter()
            .filter(|p| p.stop > now)
            .take(max)
            .cloned()
            .collect()
    }
}

/// Fetch and parse a guide document, tolerating gzip on either source
pub async fn fetch_guide(http: &HttpClient, source: &GuideSource) -> SourceResult<GuideFeed> {
    let raw = match source {
        GuideSource::Url(url) => {
            debug!("fetching guide from {url}");
            let (bytes, _) = http.get_bytes(url, &[]).await?;
            bytes
        }
        GuideSource::File(path) => {
            debug!("reading guide from {}", path.display());
            tokio::fs::read(path).await.map_err(SourceError::Storage)?
        }
    };
    let raw = maybe_gunzip(&raw)?;
    let content = String::from_utf8(raw)
        .map_err(|e| SourceError::malformed(format!("guide is not valid UTF-8: {e}")))?;
    parse_guide(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentKind;
    use chrono::TimeZone;
    use xmltv::GuideChannel;

    fn programme(channel: &str, start_hour: u32, title: &str) -> Programme {
        let start = Utc
            .with_ymd_and_hms(2025, 6, 1, start_hour, 0, 0)
            .unwrap()
            .fixed_offset();
        Programme {
            channel: channel.to_string(),
            start,
            stop: start + chrono::Duration::hours(1),
            title: title.to_string(),
            description: None,
        }
    }

    fn store_with_feed() -> EpgStore {
        let feed = GuideFeed {
            channels: vec![GuideChannel {
                id: "bbc.one.uk".into(),
                display_names: vec!["BBC One".into()],
                icon: None,
            }],
            programmes: vec![
                programme("bbc.one.uk", 20, "Late Show"),
                programme("bbc.one.uk", 18, "News"),
                programme("bbc.one.uk", 19, "Drama"),
            ],
        };
        let mut store = EpgStore::new(Duration::from_secs(3600));
        store.apply_feed(feed);
        store
    }

    #[test]
    fn lookup_by_xmltv_id_and_by_name() {
        let store = store_with_feed();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 17, 0, 0).unwrap();

        let by_xmltv = ChannelAliases {
            id: "1042".into(),
            name: "Unrelated".into(),
            xmltv_id: Some("bbc.one.uk".into()),
        };
        assert_eq!(store.programmes_for(&by_xmltv, now, 5).len(), 3);

        let by_name = ChannelAliases {
            id: "1042".into(),
            name: "BBC ONE".into(),
            xmltv_id: None,
        };
        assert_eq!(store.programmes_for(&by_name, now, 5).len(), 3);

        let no_match = ChannelAliases {
            id: "1042".into(),
            name: "ITV".into(),
            xmltv_id: None,
        };
        assert!(store.programmes_for(&no_match, now, 5).is_empty());
    }

    #[test]
    fn channels_sharing_a_display_name_keep_their_own_programmes() {
        let feed = GuideFeed {
            channels: vec![
                GuideChannel {
                    id: "news.east".into(),
                    display_names: vec!["News".into()],
                    icon: None,
                },
                GuideChannel {
                    id: "news.west".into(),
                    display_names: vec!["News".into()],
                    icon: None,
                },
            ],
            programmes: vec![
                programme("news.east", 18, "East Bulletin"),
                programme("news.west", 18, "West Bulletin"),
            ],
        };
        let mut store = EpgStore::new(Duration::from_secs(3600));
        store.apply_feed(feed);

        let now = Utc.with_ymd_and_hms(2025, 6, 1, 17, 0, 0).unwrap();
        let east = ChannelAliases {
            id: "news.east".into(),
            name: "News".into(),
            xmltv_id: None,
        };
        let listing = store.programmes_for(&east, now, 5);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].title, "East Bulletin");
    }

    #[test]
    fn programmes_sorted_and_past_ones_filtered() {
        let store = store_with_feed();
        let aliases = ChannelAliases {
            id: "bbc.one.uk".into(),
            name: "BBC One".into(),
            xmltv_id: None,
        };
        // 18:00 News has ended by 19:30, Drama is still on air
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 19, 30, 0).unwrap();
        let listing = store.programmes_for(&aliases, now, 5);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].title, "Drama");
        assert_eq!(listing[1].title, "Late Show");
    }

    #[test]
    fn max_limit_truncates() {
        let store = store_with_feed();
        let aliases = ChannelAliases {
            id: "bbc.one.uk".into(),
            name: "BBC One".into(),
            xmltv_id: None,
        };
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 17, 0, 0).unwrap();
        assert_eq!(store.programmes_for(&aliases, now, 2).len(), 2);
    }

    #[test]
    fn staleness_follows_expiration_window() {
        let mut store = EpgStore::new(Duration::from_secs(3600));
        assert!(store.is_stale());
        store.apply_feed(GuideFeed::default());
        assert!(!store.is_stale());

        let mut short = EpgStore::new(Duration::ZERO);
        short.apply_feed(GuideFeed::default());
        std::thread::sleep(Duration::from_millis(10));
        assert!(short.is_stale());
    }

    #[test]
    fn aliases_from_item_prefer_tvg_id() {
        let mut item = ContentItem::new("1042", "BBC One", ContentKind::Live);
        item.extra.insert("tvg-id".into(), "bbc.one.uk".into());
        let aliases = ChannelAliases::from_item(&item);
        assert_eq!(aliases.xmltv_id.as_deref(), Some("bbc.one.uk"));
        assert_eq!(aliases.id, "1042");
    }
}
