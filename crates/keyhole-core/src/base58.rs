use std::fmt::Display;

/// A short code encoded as base58 string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ShortCodeBase58(String);

impl ShortCodeBase58 {
    /// Creates a new `ShortCodeBase58` by encoding the given bytes as base58.
    ///
    /// # Examples
    ///
    /// ```
    /// use keyhole_core::base58::ShortCodeBase58;
    ///
    /// let encoded = ShortCodeBase58::new([0x01, 0x02, 0x03, 0x04]);
    /// assert_eq!(encoded.as_str(), "2VfUX");
    /// ```
    pub fn new<T: AsRef<[u8]>>(bytes: T) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    /// Returns the encoded string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for ShortCodeBase58 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShortCodeBase58").field(&self.0).finish()
    }
}

impl Display for ShortCodeBase58 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
