//! Session ID generation and validation
//!
//! IDs are `prefix + base64url(random bytes)` without padding, so they are
//! safe to place in cookies, headers and query strings without escaping.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::error::SessionError;

/// Default number of random bytes (128 bits of entropy)
pub const DEFAULT_ID_LENGTH: usize = 16;

/// Generates and validates session IDs for one manager
#[derive(Clone, Debug)]
pub struct SessionIdGenerator {
    length: usize,
    prefix: String,
}

impl SessionIdGenerator {
    /// Create a generator producing `length` random bytes behind `prefix`
    pub fn new<S: Into<String>>(length: usize, prefix: S) -> Self {
        Self {
            length: if length == 0 { DEFAULT_ID_LENGTH } else { length },
            prefix: prefix.into(),
        }
    }

    /// Produce a fresh session ID from the OS random source
    pub fn generate(&self) -> Result<String, SessionError> {
        let mut bytes = vec![0u8; self.length];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| SessionError::Entropy(e.to_string()))?;

        let mut id = String::with_capacity(self.prefix.len() + self.encoded_len());
        id.push_str(&self.prefix);
        URL_SAFE_NO_PAD.encode_string(&bytes, &mut id);
        Ok(id)
    }

    /// Whether `id` could have been produced by this generator
    pub fn is_well_formed(&self, id: &str) -> bool {
        let Some(body) = id.strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        body.len() == self.encoded_len()
            && body
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }

    fn encoded_len(&self) -> usize {
        (self.length * 4 + 2) / 3
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LENGTH, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_distinct_and_well_formed() {
        let generator = SessionIdGenerator::new(16, "eu1-");
        let mut seen = HashSet::new();

        for _ in 0..1000 {
            let id = generator.generate().unwrap();
            assert!(id.starts_with("eu1-"));
            assert_eq!(id.len(), 4 + 22);
            assert!(generator.is_well_formed(&id), "rejected own id {}", id);
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn test_length_is_configurable() {
        for length in [1, 2, 3, 24, 32] {
            let generator = SessionIdGenerator::new(length, "");
            let id = generator.generate().unwrap();
            assert!(generator.is_well_formed(&id));
        }

        // zero falls back to the default length
        let id = SessionIdGenerator::new(0, "").generate().unwrap();
        assert_eq!(id.len(), 22);
    }

    #[test]
    fn test_rejects_malformed_ids() {
        let generator = SessionIdGenerator::new(16, "app-");
        let good = generator.generate().unwrap();

        assert!(!generator.is_well_formed(""));
        assert!(!generator.is_well_formed(&good[4..]));
        assert!(!generator.is_well_formed(&format!("{}x", good)));
        assert!(!generator.is_well_formed(&good.replace("app-", "api-")));

        let mut forged = good.clone();
        forged.replace_range(5..6, "=");
        assert!(!generator.is_well_formed(&forged));
        assert!(!generator.is_well_formed("app-../../etc/passwd//aaaaa"));
    }
}
