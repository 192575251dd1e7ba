//! Source handler factory
//!
//! Selects the concrete handler for a provider's protocol exactly once; the
//! rest of the system only ever sees the [`ContentSource`] trait object.

use std::sync::Arc;

use super::playlist::PlaylistSource;
use super::portal::PortalSource;
use super::traits::ContentSource;
use super::xtream::XtreamSource;
use crate::models::{Provider, ProviderKind};
use crate::utils::HttpClient;

/// Factory for creating content source handlers
pub struct SourceFactory;

impl SourceFactory {
    /// Create the handler matching the provider's protocol
    pub fn create(provider: &Provider, http: &HttpClient) -> Arc<dyn ContentSource> {
        match provider.kind {
            ProviderKind::Playlist => {
                Arc::new(PlaylistSource::new(provider.clone(), http.clone()))
            }
            ProviderKind::Portal => Arc::new(PortalSource::new(provider.clone(), http.clone())),
            ProviderKind::Xtream => Arc::new(XtreamSource::new(provider.clone(), http.clone())),
        }
    }
}
