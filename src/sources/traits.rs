//! The polymorphic content source seam
//!
//! One trait covers all three provider protocols; the variant is selected
//! once per provider by the factory and passed around as a trait object,
//! never resolved by runtime type inspection.

use async_trait::async_trait;

use super::session::ProviderSession;
use crate::epg::GuideFeed;
use crate::errors::SourceResult;
use crate::models::{Category, ContentItem, ContentKind, ItemPage, PageToken, ProviderKind};

/// Capability surface common to playlist, portal, and Xtream providers
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// The protocol this source speaks
    fn provider_kind(&self) -> ProviderKind;

    /// Create the session shape this source expects
    fn new_session(&self) -> ProviderSession {
        ProviderSession::stateless()
    }

    /// Establish or refresh the session. No-op for stateless providers.
    async fn authenticate(&self, _session: &mut ProviderSession) -> SourceResult<()> {
        Ok(())
    }

    /// One page of grouping nodes for a content tree, provider-native order
    async fn list_categories(
        &self,
        session: &mut ProviderSession,
        kind: ContentKind,
    ) -> SourceResult<Vec<Category>>;

    /// One page of items within a category; `page = None` requests the first
    /// page, and the returned cursor is `None` when the listing is complete.
    async fn list_items(
        &self,
        session: &mut ProviderSession,
        category: &Category,
        page: Option<PageToken>,
    ) -> SourceResult<ItemPage>;

    /// Resolve a playable item to a stream URL. A network call for portal
    /// providers (link creation), a pure transform for the others.
    async fn resolve_stream(
        &self,
        session: &mut ProviderSession,
        item: &ContentItem,
    ) -> SourceResult<String>;

    /// Programme guide served by the provider itself, for protocols that
    /// carry one inline. `None` means this source exports no guide and the
    /// caller should fall back to a configured guide document, if any.
    async fn fetch_guide(
        &self,
        _session: &mut ProviderSession,
    ) -> SourceResult<Option<GuideFeed>> {
        Ok(None)
    }
}
