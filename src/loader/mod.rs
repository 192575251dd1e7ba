//! Request orchestration between the UI side and provider fetchers
//!
//! Fetch work runs on spawned tasks; all cache mutation happens on the
//! consumer side inside [`ContentLoader::next_event`], so the caches never
//! need cross-task locking. Every worker result carries the generation it
//! was started under, and results from before a provider switch are
//! discarded instead of being applied to the wrong provider.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::image::fetch_artifact;
use crate::cache::{ImageCache, ImageLookup, ListingCache, ListingKey, ListingPayload};
use crate::config::AppConfig;
use crate::epg::{fetch_guide, ChannelAliases, EpgStore, GuideFeed, GuideSource, Programme};
use crate::errors::SourceResult;
use crate::models::{Category, ContentItem, ContentKind, ItemPage, PageToken, Provider, ProviderKind};
use crate::sources::{xtream, ContentSource, ProviderSession, SourceFactory};
use crate::utils::backoff::retry_delay;
use crate::utils::http::HttpClient;

/// What the loader reports back to its caller
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    Categories {
        kind: ContentKind,
        categories: Vec<Category>,
        from_cache: bool,
    },
    Listing {
        kind: ContentKind,
        category_id: String,
        items: Vec<ContentItem>,
        /// False when later pages failed after retries; the items shown are
        /// everything that could be fetched
        complete: bool,
        from_cache: bool,
    },
    ListingFailed {
        kind: ContentKind,
        category_id: String,
        error: String,
    },
    ArtifactReady {
        url: String,
        bytes: Vec<u8>,
    },
    ArtifactFailed {
        url: String,
    },
    GuideUpdated {
        channels: usize,
    },
    GuideFailed {
        error: String,
    },
}

/// Identifies one listing request for in-flight dedup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    kind: ContentKind,
    /// None for a categories request
    category_id: Option<String>,
}

enum WorkerMessage {
    Categories {
        generation: u64,
        kind: ContentKind,
        result: SourceResult<Vec<Category>>,
    },
    Listing {
        generation: u64,
        kind: ContentKind,
        category_id: String,
        result: SourceResult<(Vec<ContentItem>, bool)>,
    },
    Artifact {
        url: String,
        result: SourceResult<Vec<u8>>,
    },
    Guide {
        generation: u64,
        /// `Ok(None)` means the source exports no guide
        result: SourceResult<Option<GuideFeed>>,
    },
}

/// Single-provider content loader
///
/// Owns the caches and the guide store. One loader serves one active
/// provider at a time; [`ContentLoader::switch_provider`] swaps the fetcher
/// and invalidates everything still in flight.
pub struct ContentLoader {
    provider: Provider,
    identity: String,
    source: Arc<dyn ContentSource>,
    session: Arc<Mutex<ProviderSession>>,
    http: HttpClient,
    listings: ListingCache,
    images: ImageCache,
    epg: EpgStore,
    epg_expiration: std::time::Duration,
    /// Guide document from configuration, overriding the provider's own
    configured_guide: Option<GuideSource>,
    guide_source: Option<GuideSource>,
    generation: u64,
    in_flight: HashSet<RequestKey>,
    artifact_in_flight: HashSet<String>,
    guide_refreshing: bool,
    max_retries: u32,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    rx: mpsc::UnboundedReceiver<WorkerMessage>,
    /// Events produced synchronously (cache hits), drained before worker results
    queued: VecDeque<LoaderEvent>,
}

impl ContentLoader {
    pub fn new(provider: Provider, config: &AppConfig) -> SourceResult<Self> {
        let http = HttpClient::new(
            config.http.connect_timeout(),
            config.http.request_timeout(),
        );
        let listings = ListingCache::new(config.cache.listing_dir(), config.cache.listing_ttl())?;
        let images = ImageCache::new(
            config.cache.image_dir(),
            config.cache.image_budget_bytes(),
            config.cache.negative_cooldown(),
        )?;
        let epg_expiration = config.epg.expiration();
        let source = SourceFactory::create(&provider, &http);
        let session = Arc::new(Mutex::new(source.new_session()));
        let (tx, rx) = mpsc::unbounded_channel();
        let configured_guide = config.epg.guide_sources().into_iter().next();
        Ok(Self {
            identity: provider.identity_hash(),
            guide_source: configured_guide
                .clone()
                .or_else(|| default_guide_source(&provider)),
            configured_guide,
            provider,
            source,
            session,
            http,
            listings,
            images,
            epg: EpgStore::new(epg_expiration),
            epg_expiration,
            generation: 0,
            in_flight: HashSet::new(),
            artifact_in_flight: HashSet::new(),
            guide_refreshing: false,
            max_retries: config.http.max_retries,
            tx,
            rx,
            queued: VecDeque::new(),
        })
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Replace the fetcher behind the loader, keeping the current provider
    /// identity. For provider protocols implemented outside this crate.
    pub fn install_source(&mut self, source: Arc<dyn ContentSource>) {
        self.session = Arc::new(Mutex::new(source.new_session()));
        self.source = source;
    }

    /// Swap to a different provider. Everything still in flight for the old
    /// one is invalidated; its results will be discarded on arrival.
    pub fn switch_provider(&mut self, provider: Provider) {
        info!("switching provider to '{}'", provider.name);
        self.generation += 1;
        self.in_flight.clear();
        self.queued.clear();
        self.guide_refreshing = false;
        self.identity = provider.identity_hash();
        self.guide_source = self
            .configured_guide
            .clone()
            .or_else(|| default_guide_source(&provider));
        self.source = SourceFactory::create(&provider, &self.http);
        self.session = Arc::new(Mutex::new(self.source.new_session()));
        self.provider = provider;
        self.epg = EpgStore::new(self.epg_expiration);
    }

    /// Request the category list for one content tree
    ///
    /// A fresh cached copy is answered synchronously on the next
    /// [`ContentLoader::next_event`] call; otherwise a fetch is started
    /// unless one for the same key is already running.
    pub fn request_categories(&mut self, kind: ContentKind) {
        let key = RequestKey {
            kind,
            category_id: None,
        };
        if self.in_flight.contains(&key) {
            return;
        }
        let cache_key = ListingKey::categories(self.identity.clone(), kind);
        if let Some(entry) = self.listings.get(&cache_key) {
            if let ListingPayload::Categories { categories } = entry.payload {
                self.queued.push_back(LoaderEvent::Categories {
                    kind,
                    categories,
                    from_cache: true,
                });
                return;
            }
        }
        self.in_flight.insert(key);
        let source = Arc::clone(&self.source);
        let session = Arc::clone(&self.session);
        let tx = self.tx.clone();
        let generation = self.generation;
        let max_retries = self.max_retries;
        tokio::spawn(async move {
            let result = fetch_categories(&*source, &session, kind, max_retries).await;
            let _ = tx.send(WorkerMessage::Categories {
                generation,
                kind,
                result,
            });
        });
    }

    /// Request the full item listing for one category, walking every page
    pub fn request_listing(&mut self, category: &Category) {
        let key = RequestKey {
            kind: category.kind,
            category_id: Some(category.id.clone()),
        };
        if self.in_flight.contains(&key) {
            return;
        }
        let cache_key =
            ListingKey::items(self.identity.clone(), category.kind, category.id.clone());
        if let Some(entry) = self.listings.get(&cache_key) {
            if let ListingPayload::Items { items, complete } = entry.payload {
                // Incomplete listings are shown but refetched in the background
                self.queued.push_back(LoaderEvent::Listing {
                    kind: category.kind,
                    category_id: category.id.clone(),
                    items,
                    complete,
                    from_cache: true,
                });
                if complete {
                    return;
                }
            }
        }
        self.in_flight.insert(key);
        let source = Arc::clone(&self.source);
        let session = Arc::clone(&self.session);
        let tx = self.tx.clone();
        let generation = self.generation;
        let max_retries = self.max_retries;
        let category = category.clone();
        tokio::spawn(async move {
            let kind = category.kind;
            let category_id = category.id.clone();
            let result = fetch_all_items(&*source, &session, &category, max_retries).await;
            let _ = tx.send(WorkerMessage::Listing {
                generation,
                kind,
                category_id,
                result,
            });
        });
    }

    /// Request artwork by URL, served from the image cache when possible
    pub fn request_artifact(&mut self, url: &str) {
        if self.artifact_in_flight.contains(url) {
            return;
        }
        match self.images.get_cached(url) {
            ImageLookup::Hit(bytes) => {
                self.queued.push_back(LoaderEvent::ArtifactReady {
                    url: url.to_string(),
                    bytes,
                });
            }
            ImageLookup::Negative => {
                self.queued.push_back(LoaderEvent::ArtifactFailed {
                    url: url.to_string(),
                });
            }
            ImageLookup::Miss => {
                self.artifact_in_flight.insert(url.to_string());
                let http = self.http.clone();
                let url = url.to_string();
                let tx = self.tx.clone();
                let max_retries = self.max_retries;
                tokio::spawn(async move {
                    let result = fetch_artifact(&http, &url, max_retries).await;
                    let _ = tx.send(WorkerMessage::Artifact { url, result });
                });
            }
        }
    }

    /// Kick off a guide refresh when the stored guide is stale
    ///
    /// A configured guide document wins; otherwise the source may serve its
    /// own guide (portal `get_epg_info`). Readers keep getting the old table
    /// until the new feed has fully parsed and been applied.
    pub fn request_guide(&mut self, force: bool) {
        if self.guide_refreshing || (!force && !self.epg.is_stale()) {
            return;
        }
        self.guide_refreshing = true;
        let tx = self.tx.clone();
        let generation = self.generation;
        if let Some(document) = self.guide_source.clone() {
            let http = self.http.clone();
            tokio::spawn(async move {
                let result = fetch_guide(&http, &document).await.map(Some);
                let _ = tx.send(WorkerMessage::Guide { generation, result });
            });
        } else {
            let source = Arc::clone(&self.source);
            let session = Arc::clone(&self.session);
            tokio::spawn(async move {
                let result = async {
                    let mut session = session.lock().await;
                    if !session.is_valid() {
                        source.authenticate(&mut session).await?;
                    }
                    source.fetch_guide(&mut session).await
                }
                .await;
                let _ = tx.send(WorkerMessage::Guide { generation, result });
            });
        }
    }

    /// Override the guide source (playlist providers with a sidecar XMLTV URL)
    pub fn set_guide_source(&mut self, source: Option<GuideSource>) {
        self.guide_source = source;
    }

    /// Current and upcoming programmes for one channel item
    pub fn programmes_for(&self, item: &ContentItem, max: usize) -> Vec<Programme> {
        let aliases = ChannelAliases::from_item(item);
        self.epg.programmes_for(&aliases, chrono::Utc::now(), max)
    }

    pub fn guide_is_stale(&self) -> bool {
        self.epg.is_stale()
    }

    /// Resolve an item to its playable URL
    pub async fn resolve_stream(&self, item: &ContentItem) -> SourceResult<String> {
        let mut session = self.session.lock().await;
        if !session.is_valid() {
            self.source.authenticate(&mut session).await?;
        }
        self.source.resolve_stream(&mut session, item).await
    }

    /// Drop cached listings for providers no longer configured
    pub fn prune_listings(&mut self, live_providers: &[Provider]) {
        let identities: Vec<String> = live_providers.iter().map(|p| p.identity_hash()).collect();
        self.listings.prune(&identities);
    }

    /// Drop all cached listings for one provider
    pub fn clear_provider_cache(&mut self, provider: &Provider) {
        self.listings.clear_provider(&provider.identity_hash());
    }

    /// Wait for the next event
    ///
    /// Synchronous cache-hit answers are drained first, then worker results
    /// are applied to the caches and translated into events. Blocks until a
    /// result arrives, so call this only while requests are outstanding.
    pub async fn next_event(&mut self) -> LoaderEvent {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return event;
            }
            // self holds a sender, so recv() never returns None
            let Some(message) = self.rx.recv().await else {
                unreachable!("loader channel closed while loader is alive");
            };
            if let Some(event) = self.apply(message) {
                return event;
            }
        }
    }

    fn apply(&mut self, message: WorkerMessage) -> Option<LoaderEvent> {
        match message {
            WorkerMessage::Categories {
                generation,
                kind,
                result,
            } => {
                if generation != self.generation {
                    debug!("discarding stale categories result for {kind}");
                    return None;
                }
                self.in_flight.remove(&RequestKey {
                    kind,
                    category_id: None,
                });
                match result {
                    Ok(categories) => {
                        self.listings.put(
                            ListingKey::categories(self.identity.clone(), kind),
                            ListingPayload::Categories {
                                categories: categories.clone(),
                            },
                        );
                        Some(LoaderEvent::Categories {
                            kind,
                            categories,
                            from_cache: false,
                        })
                    }
                    Err(e) => {
                        warn!("categories fetch failed for {kind}: {e}");
                        Some(LoaderEvent::ListingFailed {
                            kind,
                            category_id: String::new(),
                            error: e.to_string(),
                        })
                    }
                }
            }
            WorkerMessage::Listing {
                generation,
                kind,
                category_id,
                result,
            } => {
                if generation != self.generation {
                    debug!("discarding stale listing result for {kind}/{category_id}");
                    return None;
                }
                self.in_flight.remove(&RequestKey {
                    kind,
                    category_id: Some(category_id.clone()),
                });
                match result {
                    Ok((items, complete)) => {
                        self.listings.put(
                            ListingKey::items(self.identity.clone(), kind, category_id.clone()),
                            ListingPayload::Items {
                                items: items.clone(),
                                complete,
                            },
                        );
                        Some(LoaderEvent::Listing {
                            kind,
                            category_id,
                            items,
                            complete,
                            from_cache: false,
                        })
                    }
                    Err(e) => {
                        warn!("listing fetch failed for {kind}/{category_id}: {e}");
                        Some(LoaderEvent::ListingFailed {
                            kind,
                            category_id,
                            error: e.to_string(),
                        })
                    }
                }
            }
            WorkerMessage::Artifact { url, result } => {
                self.artifact_in_flight.remove(&url);
                match result {
                    Ok(bytes) => {
                        self.images.store(&url, bytes.clone());
                        Some(LoaderEvent::ArtifactReady { url, bytes })
                    }
                    Err(e) => {
                        debug!("artwork fetch failed for {url}: {e}");
                        self.images.store_negative(&url);
                        Some(LoaderEvent::ArtifactFailed { url })
                    }
                }
            }
            WorkerMessage::Guide { generation, result } => {
                if generation != self.generation {
                    debug!("discarding stale guide result");
                    return None;
                }
                self.guide_refreshing = false;
                match result {
                    Ok(Some(feed)) => {
                        let channels = feed.channels.len();
                        self.epg.apply_feed(feed);
                        Some(LoaderEvent::GuideUpdated { channels })
                    }
                    Ok(None) => {
                        debug!("provider '{}' exports no guide", self.provider.name);
                        None
                    }
                    Err(e) => {
                        warn!("guide refresh failed: {e}");
                        Some(LoaderEvent::GuideFailed {
                            error: e.to_string(),
                        })
                    }
                }
            }
        }
    }
}

fn default_guide_source(provider: &Provider) -> Option<GuideSource> {
    match provider.kind {
        ProviderKind::Xtream => xtream::xmltv_url(provider).ok().map(GuideSource::Url),
        _ => None,
    }
}

/// Fetch categories with transient retries and one session recovery
async fn fetch_categories(
    source: &dyn ContentSource,
    session: &Mutex<ProviderSession>,
    kind: ContentKind,
    max_retries: u32,
) -> SourceResult<Vec<Category>> {
    let mut transient = 0u32;
    let mut reauth_used = false;
    loop {
        let result = {
            let mut session = session.lock().await;
            if !session.is_valid() {
                source.authenticate(&mut session).await?;
            }
            source.list_categories(&mut session, kind).await
        };
        match result {
            Ok(categories) => return Ok(categories),
            Err(e) if e.is_auth() && !reauth_used => {
                reauth_used = true;
                let mut session = session.lock().await;
                session.invalidate();
                source.authenticate(&mut session).await?;
            }
            Err(e) if e.is_transient() && transient < max_retries => {
                transient += 1;
                debug!("categories fetch retry {transient} for {kind}: {e}");
                tokio::time::sleep(retry_delay(transient)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Walk every page of a category listing
///
/// Items are deduplicated by id with first occurrence winning, so a page
/// retried after a partial failure cannot introduce duplicates. A failure on
/// the first page fails the whole request; a failure on a later page returns
/// what was fetched so far, flagged incomplete.
async fn fetch_all_items(
    source: &dyn ContentSource,
    session: &Mutex<ProviderSession>,
    category: &Category,
    max_retries: u32,
) -> SourceResult<(Vec<ContentItem>, bool)> {
    let mut items = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut page: Option<PageToken> = None;
    let mut reauth_used = false;
    let mut first_page = true;

    loop {
        let fetched = fetch_page(source, session, category, page, max_retries, &mut reauth_used)
            .await;
        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) if first_page => return Err(e),
            Err(e) => {
                warn!(
                    "page fetch failed mid-listing for {}/{}, returning partial listing: {e}",
                    category.kind, category.id
                );
                return Ok((items, false));
            }
        };
        for item in fetched.items {
            if seen.insert(item.id.clone()) {
                items.push(item);
            }
        }
        first_page = false;
        match fetched.next {
            Some(next) => page = Some(next),
            None => return Ok((items, true)),
        }
    }
}

async fn fetch_page(
    source: &dyn ContentSource,
    session: &Mutex<ProviderSession>,
    category: &Category,
    page: Option<PageToken>,
    max_retries: u32,
    reauth_used: &mut bool,
) -> SourceResult<ItemPage> {
    let mut transient = 0u32;
    loop {
        let result = {
            let mut session = session.lock().await;
            if !session.is_valid() {
                source.authenticate(&mut session).await?;
            }
            source.list_items(&mut session, category, page).await
        };
        match result {
            Ok(fetched) => return Ok(fetched),
            Err(e) if e.is_auth() && !*reauth_used => {
                // Expired tokens get exactly one recovery per listing
                *reauth_used = true;
                let mut session = session.lock().await;
                session.invalidate();
                source.authenticate(&mut session).await?;
            }
            Err(e) if e.is_transient() && transient < max_retries => {
                transient += 1;
                debug!(
                    "page fetch retry {transient} for {}/{}: {e}",
                    category.kind, category.id
                );
                tokio::time::sleep(retry_delay(transient)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
