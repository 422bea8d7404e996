//! Template identifiers, encoded vectors and match results.

use super::SchemeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content-addressed identifier of a raw template.
///
/// The lowercase hex SHA-256 of the template bytes. Identical bytes always
/// yield the identical id, which is what makes vector upserts idempotent and
/// what joins the vector index to the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    /// Length of the hex digest.
    pub const HEX_LEN: usize = 64;

    /// Derives the id of a raw template.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Self {
        Self(hex::encode(crate::encoding::TemplateHasher::digest(raw)))
    }

    /// Wraps an id read back from a store.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A template encoded under one scheme.
///
/// Only the encoder builds these, so `values.len()` always equals the
/// scheme's dimension and every element lies in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVector {
    scheme: SchemeId,
    values: Vec<f32>,
}

impl EncodedVector {
    pub(crate) const fn new(scheme: SchemeId, values: Vec<f32>) -> Self {
        Self { scheme, values }
    }

    /// Scheme the vector was produced under.
    #[must_use]
    pub const fn scheme(&self) -> SchemeId {
        self.scheme
    }

    /// The vector elements.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the vector has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Little-endian FLOAT32 blob, the layout `RediSearch` expects.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|f| f.to_le_bytes()).collect()
    }
}

/// Best candidate of a 1-nearest-neighbor query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Id of the closest enrolled template.
    pub template_id: TemplateId,
    /// Raw distance reported by the index (smaller is closer).
    pub distance: f32,
    /// Scheme whose index answered the query.
    pub scheme: SchemeId,
}

/// Outcome of applying a scheme threshold to a query result.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The candidate is within the threshold.
    Match {
        /// Id of the accepted template.
        template_id: TemplateId,
        /// Its distance from the query.
        distance: f32,
    },
    /// No candidate, or the best one is too far away.
    NoMatch,
}

impl Verdict {
    /// Returns true for [`Verdict::Match`].
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_id_is_hex_sha256() {
        let id = TemplateId::from_bytes(b"");
        assert_eq!(
            id.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(id.as_str().len(), TemplateId::HEX_LEN);
    }

    #[test]
    fn test_template_id_content_addressing() {
        let a = TemplateId::from_bytes(&[7u8; 512]);
        let b = TemplateId::from_bytes(&[7u8; 512]);
        let mut other = [7u8; 512];
        other[511] = 8;
        assert_eq!(a, b);
        assert_ne!(a, TemplateId::from_bytes(&other));
    }

    #[test]
    fn test_le_bytes_layout() {
        let v = EncodedVector::new(SchemeId::Normalized16, vec![1.0, 0.0]);
        assert_eq!(v.to_le_bytes(), vec![0, 0, 0x80, 0x3f, 0, 0, 0, 0]);
    }

    #[test]
    fn test_verdict_is_match() {
        let verdict = Verdict::Match {
            template_id: TemplateId::new("abc"),
            distance: 0.0,
        };
        assert!(verdict.is_match());
        assert!(!Verdict::NoMatch.is_match());
    }
}
