use crate::CodeHasher;
use keyhole_core::base58::ShortCodeBase58;
use keyhole_core::ShortCode;
use typed_builder::TypedBuilder;

/// Fewest lanes used. Every lane encodes to at least one base58 character,
/// so codes are never shorter than the shortest valid short code.
pub const MIN_WIDTH: usize = 3;

/// Most lanes used. 23 bytes of `0xff` encode to 32 base58 characters, the
/// longest valid short code.
pub const MAX_WIDTH: usize = 23;

/// Folds the input into `width` byte lanes and encodes the lanes as base58.
///
/// Byte `i` of the input is added (wrapping) to lane `i % width`. The width
/// is clamped to `MIN_WIDTH..=MAX_WIDTH`.
#[derive(Debug, Clone, TypedBuilder)]
pub struct FoldHasher {
    #[builder(default = 4)]
    width: usize,
}

impl FoldHasher {
    fn fold(&self, input: &[u8]) -> Vec<u8> {
        let mut lanes = vec![0_u8; self.width.clamp(MIN_WIDTH, MAX_WIDTH)];
        let width = lanes.len();
        for (i, byte) in input.iter().enumerate() {
            lanes[i % width] = lanes[i % width].wrapping_add(*byte);
        }
        lanes
    }
}

impl Default for FoldHasher {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CodeHasher for FoldHasher {
    fn hash(&self, input: &[u8]) -> ShortCode {
        ShortCode::from(ShortCodeBase58::new(self.fold(input)))
    }
}
