//! Core types and traits for the Keyhole URL shortener.
//!
//! This crate provides the record model, the [`KeyValueStore`] contract every
//! storage backend satisfies, and the [`Shortener`] contract consumed by the
//! HTTP layer.

pub mod base58;
pub mod error;
pub mod owner;
pub mod record;
pub mod shortcode;
pub mod shortener;
pub mod store;

pub use error::{CoreError, ShortenerError, StorageError};
pub use owner::OwnerId;
pub use record::Record;
pub use shortcode::ShortCode;
pub use shortener::{Shortened, Shortener, Stats};
pub use store::{KeyValueStore, ScanFilter, StoreOutcome, Visitor};
