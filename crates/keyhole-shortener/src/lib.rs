//! URL shortener service implementation.
//!
//! This crate wires a [`CodeHasher`](keyhole_hasher::CodeHasher) and a
//! [`KeyValueStore`](keyhole_core::KeyValueStore) together behind the
//! [`Shortener`](keyhole_core::Shortener) trait. Core types are re-exported
//! from `keyhole_core`.

pub mod service;

pub use keyhole_core::{Shortened, Shortener, ShortenerError, Stats};
pub use service::ShortenerService;
