//! Provider protocol handlers
//!
//! Each supported protocol (playlist, portal, Xtream) gets a handler behind
//! the common [`ContentSource`] trait, selected by the [`SourceFactory`].

pub mod factory;
pub mod playlist;
pub mod portal;
pub mod session;
pub mod traits;
pub mod xtream;

pub use factory::SourceFactory;
pub use session::ProviderSession;
pub use traits::ContentSource;
