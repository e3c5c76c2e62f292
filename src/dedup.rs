//! Block fingerprints and the seen-set that suppresses repeats.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 10;

/// Fixed-length digest of a block's exact text.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN.div_ceil(2)) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Request id: UTC timestamp joined with the block fingerprint.
pub fn request_id(at: DateTime<Utc>, fingerprint: &str) -> String {
    format!("{}_{fingerprint}", at.format("%Y%m%dT%H%M%SZ"))
}

/// Fingerprints already dispatched. Entries are never removed.
#[derive(Debug, Default, Clone)]
pub struct SeenSet {
    fingerprints: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from archived request texts.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fingerprints: texts
                .into_iter()
                .map(|text| fingerprint(text.as_ref()))
                .collect(),
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Record a fingerprint. Returns `false` if it was already known.
    pub fn insert(&mut self, fingerprint: &str) -> bool {
        self.fingerprints.insert(fingerprint.to_string())
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}
