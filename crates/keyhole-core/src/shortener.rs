use crate::owner::OwnerId;
use crate::record::Record;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::Serialize;

type Result<T> = std::result::Result<T, crate::error::ShortenerError>;

/// Outcome of shortening a URL.
///
/// Both variants carry the code under which the URL is reachable; `Existing`
/// tells the caller that nothing new was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shortened {
    Created(ShortCode),
    Existing(ShortCode),
}

impl Shortened {
    pub fn code(&self) -> &ShortCode {
        match self {
            Shortened::Created(code) | Shortened::Existing(code) => code,
        }
    }

    pub fn into_code(self) -> ShortCode {
        match self {
            Shortened::Created(code) | Shortened::Existing(code) => code,
        }
    }

    pub fn already_existed(&self) -> bool {
        matches!(self, Shortened::Existing(_))
    }
}

/// Aggregate counters over all live records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Number of distinct original URLs.
    pub urls: usize,
    /// Number of distinct owners.
    pub users: usize,
}

#[async_trait]
pub trait Shortener: Send + Sync + 'static {
    /// Shortens a URL on behalf of `owner`.
    async fn shorten(&self, original_url: &str, owner: &OwnerId) -> Result<Shortened>;

    /// Resolves a short code to its original URL.
    /// Returns `None` if the code does not exist, was deleted, or cannot be
    /// read right now.
    async fn resolve(&self, code: &ShortCode) -> Option<String>;

    /// Shortens every URL, returning the codes in input order.
    async fn shorten_batch(&self, original_urls: &[String], owner: &OwnerId)
        -> Result<Vec<ShortCode>>;

    /// Lists the live records created by `owner`.
    async fn list_owned(&self, owner: &OwnerId) -> Result<Vec<Record>>;

    /// Deletes those of `codes` that belong to `owner`.
    /// Returns how many codes were submitted for deletion.
    async fn delete_owned(&self, owner: &OwnerId, codes: &[ShortCode]) -> Result<usize>;

    /// Counts distinct URLs and owners across live records.
    async fn stats(&self) -> Result<Stats>;

    /// Checks that the underlying store is reachable.
    async fn ping(&self) -> Result<()>;
}
