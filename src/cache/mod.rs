//! Listing and artwork caches

pub mod image;
pub mod listing;

pub use image::{ImageCache, ImageLookup};
pub use listing::{ListingCache, ListingEntry, ListingKey, ListingPayload};
