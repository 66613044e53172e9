//! Index key normalization
//!
//! A constrained field value becomes the document id of its index entry.
//! Empty values produce no key, so uniqueness is never enforced for them.
//!
//! # Hashing
//!
//! With hashing enabled the key is the MD5 digest of the value as 32
//! lowercase hex characters. MD5 is used only to shorten values and keep
//! them out of plain sight in index ids: it is not collision resistant, and
//! anyone who can guess a value can recompute its key. Do not rely on it
//! where key secrecy matters.

use md5::{Digest, Md5};
use serde_json::Value;
use std::fmt;

/// Normalized value used as an index document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey(String);

impl IndexKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The constrained field holds something other than a string or null.
#[derive(Debug, Clone, PartialEq)]
pub struct NonStringValue(pub Value);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyNormalizer {
    hash_values: bool,
}

impl KeyNormalizer {
    pub fn new(hash_values: bool) -> Self {
        Self { hash_values }
    }

    pub fn hashes_values(&self) -> bool {
        self.hash_values
    }

    pub fn normalize(&self, raw: Option<&str>) -> Option<IndexKey> {
        match raw {
            None | Some("") => None,
            Some(raw) if self.hash_values => Some(IndexKey(md5_hex(raw))),
            Some(raw) => Some(IndexKey(raw.to_string())),
        }
    }

    /// Normalize a field as it appears in a document: missing and `null`
    /// count as empty.
    pub fn normalize_value(
        &self,
        value: Option<&Value>,
    ) -> Result<Option<IndexKey>, NonStringValue> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => Ok(self.normalize(Some(raw))),
            Some(other) => Err(NonStringValue(other.clone())),
        }
    }
}

fn md5_hex(raw: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_values_have_no_key() {
        let normalizer = KeyNormalizer::new(false);
        assert_eq!(normalizer.normalize(None), None);
        assert_eq!(normalizer.normalize(Some("")), None);
        assert_eq!(normalizer.normalize_value(None), Ok(None));
        assert_eq!(normalizer.normalize_value(Some(&Value::Null)), Ok(None));

        let hashing = KeyNormalizer::new(true);
        assert_eq!(hashing.normalize(Some("")), None);
    }

    #[test]
    fn test_plain_mode_keeps_value() {
        let normalizer = KeyNormalizer::new(false);
        assert_eq!(
            normalizer.normalize(Some("johnDoe")).unwrap().as_str(),
            "johnDoe"
        );
    }

    #[test]
    fn test_hash_mode_is_stable_md5_hex() {
        let normalizer = KeyNormalizer::new(true);
        let key = normalizer.normalize(Some("johnDoe")).unwrap();

        assert_eq!(key.as_str().len(), 32);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(Some(key), normalizer.normalize(Some("johnDoe")));

        // RFC 1321 test vector
        assert_eq!(
            normalizer.normalize(Some("abc")).unwrap().as_str(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn test_non_string_values_are_rejected() {
        let normalizer = KeyNormalizer::new(false);
        let err = normalizer.normalize_value(Some(&json!(42))).unwrap_err();
        assert_eq!(err, NonStringValue(json!(42)));
        assert!(normalizer.normalize_value(Some(&json!({"a": 1}))).is_err());
    }
}
