//! Provider content aggregation and caching for IPTV front-ends
//!
//! Normalizes three provider protocols (M3U playlists, STB middleware
//! portals, Xtream-style APIs) into one browsable model of content trees,
//! categories, and items, with persistent listing and artwork caches and an
//! XMLTV programme guide store. The [`loader::ContentLoader`] is the main
//! entry point; it owns the caches and turns fetch requests into events.
//!
//! ```no_run
//! use telly::config::AppConfig;
//! use telly::loader::{ContentLoader, LoaderEvent};
//! use telly::models::{ContentKind, Provider};
//!
//! # async fn run() -> Result<(), telly::errors::SourceError> {
//! let config = AppConfig::default();
//! let provider = Provider::xtream("My provider", "http://xc.example", "user", "pass");
//! let mut loader = ContentLoader::new(provider, &config)?;
//!
//! loader.request_categories(ContentKind::Live);
//! match loader.next_event().await {
//!     LoaderEvent::Categories { categories, .. } => {
//!         for category in categories {
//!             println!("{}", category.name);
//!         }
//!     }
//!     other => eprintln!("unexpected: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod epg;
pub mod errors;
pub mod loader;
pub mod models;
pub mod sources;
pub mod utils;

pub use errors::{SourceError, SourceResult};
pub use loader::{ContentLoader, LoaderEvent};
pub use models::{Category, ContentItem, ContentKind, Provider, ProviderKind};
