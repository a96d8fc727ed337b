use crate::owner::OwnerId;
use crate::shortcode::ShortCode;
use serde::{Deserialize, Serialize};

/// A stored URL mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The key, derived from `original_url`.
    pub short_code: ShortCode,
    /// The original URL that was shortened.
    pub original_url: String,
    /// Who created the mapping.
    pub owner_id: OwnerId,
    /// Tombstone flag. Deleted records stay in storage but never resolve.
    pub deleted: bool,
}

impl Record {
    /// Creates a live record.
    pub fn new(short_code: ShortCode, original_url: impl Into<String>, owner_id: OwnerId) -> Self {
        Self {
            short_code,
            original_url: original_url.into(),
            owner_id,
            deleted: false,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}
