use sha2::{Digest, Sha256};
use std::fmt;

const PREFIX: &str = "sha256-";

/// Content address of a response body.
///
/// Rendered as `sha256-<hex>`; the same string travels in the
/// `X-Content-Digest` header and keys the entity store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn of(body: &[u8]) -> Self {
        let hash = Sha256::digest(body);
        Self(format!("{PREFIX}{}", hex::encode(hash)))
    }

    /// Accepts only strings this type could have produced.
    pub fn parse(value: &str) -> Option<Self> {
        let hex_part = value.strip_prefix(PREFIX)?;
        let valid = hex_part.len() == 64
            && hex_part
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
