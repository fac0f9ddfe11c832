//! Cache key derivation from resource identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a key (128 bits, 32 hex characters).
pub const DIGEST_KEY_BYTES: usize = 16;

/// How cache keys are derived from identifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// Truncated SHA-256 digest rendered as lowercase hex.
    #[default]
    Digest,
    /// 32-bit polynomial string hash rendered as a signed decimal.
    ///
    /// Weaker collision resistance and a different key space than
    /// [`KeyScheme::Digest`]; only meant as a last-resort fallback.
    HashCode,
}

/// Stable cache key for a resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `identifier` using `scheme`.
    #[must_use]
    pub fn derive(identifier: &str, scheme: KeyScheme) -> Self {
        match scheme {
            KeyScheme::Digest => Self::from_url(identifier),
            KeyScheme::HashCode => Self(string_hash(identifier).to_string()),
        }
    }

    /// Derives the digest key for a URL.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..DIGEST_KEY_BYTES]))
    }

    /// Wraps an already-derived key, e.g. a blob file stem read back from disk.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `h = 31 * h + c` over UTF-16 code units with wrapping arithmetic.
fn string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}
