pub mod fold;

pub use fold::FoldHasher;

use keyhole_core::ShortCode;

/// Trait for deriving short codes from URL content.
///
/// Implementations are pure functions that don't interact with storage: the
/// same input always yields the same code, which is what makes shortening
/// idempotent. Different inputs may collide; the store reports the collision
/// as an existing mapping.
pub trait CodeHasher: Send + Sync + 'static {
    /// Derives the short code for `input`.
    fn hash(&self, input: &[u8]) -> ShortCode;
}
