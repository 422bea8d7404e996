//! Encoding/matching scheme registry.
//!
//! A scheme fixes everything about how a raw template becomes a vector and how
//! two vectors are compared: dimension, normalization rule, distance metric,
//! decision threshold, and the index that holds its vectors. Schemes are
//! compiled-in constants selected once per request by API version or path.
//!
//! | Scheme | Aliases | Dim | Metric | Threshold | Index |
//! |--------|---------|-----|--------|-----------|-------|
//! | `legacy-hash` | `legacy`, `v0` | 16 | cosine | 0.0001 | `fingerprint_legacy_index` |
//! | `normalized-16` | `v1` | 16 | squared L2 | 0.0008 | `fingerprint_index` |
//! | `normalized-512` | `v2` | 512 | squared L2 | 0.0256 | `fingerprint512_index` |
//!
//! The legacy scheme hashes the template before scaling, so it only ever
//! matches byte-identical submissions. It is a duplicate detector, not a
//! biometric matcher, and is kept under its own name for compatibility.

use crate::models::{EncodedVector, MatchResult, Verdict};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a registered scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemeId {
    /// SHA-256 of the template, first 16 digest bytes scaled into [0,1].
    #[serde(rename = "legacy-hash")]
    LegacyHash,
    /// First 16 template bytes scaled into [0,1].
    #[serde(rename = "normalized-16")]
    Normalized16,
    /// First 512 template bytes scaled into [0,1].
    #[serde(rename = "normalized-512")]
    Normalized512,
}

impl SchemeId {
    /// Returns the canonical scheme name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LegacyHash => "legacy-hash",
            Self::Normalized16 => "normalized-16",
            Self::Normalized512 => "normalized-512",
        }
    }

    /// Returns every registered scheme id.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::LegacyHash, Self::Normalized16, Self::Normalized512]
    }

    /// Parses a scheme name or API version alias (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownScheme`] for anything not in the registry.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "legacy-hash" | "legacy" | "v0" => Ok(Self::LegacyHash),
            "normalized-16" | "v1" => Ok(Self::Normalized16),
            "normalized-512" | "v2" => Ok(Self::Normalized512),
            _ => Err(Error::UnknownScheme(s.to_string())),
        }
    }

    /// Returns the scheme definition for this id.
    #[must_use]
    pub fn scheme(self) -> &'static Scheme {
        match self {
            Self::LegacyHash => &SCHEMES[0],
            Self::Normalized16 => &SCHEMES[1],
            Self::Normalized512 => &SCHEMES[2],
        }
    }
}

impl fmt::Display for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SchemeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// How raw template bytes are turned into vector elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// `vector[i] = sha256(raw)[i] / 255`.
    HashedBytes,
    /// `vector[i] = raw[i] / 255`.
    LinearBytes,
}

/// Dissimilarity function between two vectors. Smaller is closer for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Sum of squared element differences (`RediSearch` `L2`).
    SquaredEuclidean,
    /// `1 - cos(a, b)`, in [0, 2].
    Cosine,
}

impl DistanceMetric {
    /// Name of the metric in `RediSearch` `FT.CREATE`.
    #[must_use]
    pub const fn redis_name(&self) -> &'static str {
        match self {
            Self::SquaredEuclidean => "L2",
            Self::Cosine => "COSINE",
        }
    }

    /// Distance of a vector from itself.
    #[must_use]
    pub const fn zero_distance(&self) -> f32 {
        0.0
    }

    /// Computes the distance between two equal-length vectors.
    ///
    /// Identical vectors are exactly `0.0` apart under both metrics, zero
    /// vectors included. Cosine distance between distinct vectors where one
    /// has zero norm is `1.0`; the cosine range is `[0.0, 2.0]`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        if a == b {
            return self.zero_distance();
        }
        match self {
            Self::SquaredEuclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let d = f64::from(*x) - f64::from(*y);
                    d * d
                })
                .sum::<f64>() as f32,
            Self::Cosine => {
                let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
                for (x, y) in a.iter().zip(b) {
                    let (x, y) = (f64::from(*x), f64::from(*y));
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
                (1.0 - similarity).clamp(0.0, 2.0) as f32
            },
        }
    }
}

/// A versioned encoding and matching configuration.
#[derive(Debug, PartialEq)]
pub struct Scheme {
    /// Registry id.
    pub id: SchemeId,
    /// Number of elements in every vector of this scheme.
    pub dimension: usize,
    /// Normalization rule applied by the encoder.
    pub normalization: Normalization,
    /// Distance metric of the scheme's index.
    pub metric: DistanceMetric,
    /// Maximum accepted distance (inclusive).
    pub threshold: f32,
    /// Name of the index holding this scheme's vectors.
    pub index_name: &'static str,
    /// Key prefix partitioning this scheme's vectors in the store.
    pub key_prefix: &'static str,
}

/// The registry. Index names are distinct so dimensions never mix.
pub static SCHEMES: [Scheme; 3] = [
    Scheme {
        id: SchemeId::LegacyHash,
        dimension: 16,
        normalization: Normalization::HashedBytes,
        metric: DistanceMetric::Cosine,
        threshold: 0.0001,
        index_name: "fingerprint_legacy_index",
        key_prefix: "fingerprint_legacy:",
    },
    Scheme {
        id: SchemeId::Normalized16,
        dimension: 16,
        normalization: Normalization::LinearBytes,
        metric: DistanceMetric::SquaredEuclidean,
        threshold: 0.0008,
        index_name: "fingerprint_index",
        key_prefix: "fingerprint:",
    },
    Scheme {
        id: SchemeId::Normalized512,
        dimension: 512,
        normalization: Normalization::LinearBytes,
        metric: DistanceMetric::SquaredEuclidean,
        threshold: 0.0256,
        index_name: "fingerprint512_index",
        key_prefix: "fingerprint512:",
    },
];

impl Scheme {
    /// Looks up a scheme by name or API version alias.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownScheme`] for an unrecognized identifier.
    pub fn lookup(name: &str) -> Result<&'static Self> {
        SchemeId::parse(name).map(SchemeId::scheme)
    }

    /// Returns all registered schemes.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &SCHEMES
    }

    /// Encodes a raw template under this scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if `raw` is shorter than the dimension.
    pub fn encode(&'static self, raw: &[u8]) -> Result<EncodedVector> {
        crate::encoding::encode(raw, self)
    }

    /// Applies this scheme's threshold to a distance.
    #[must_use]
    pub fn accepts(&self, distance: f32) -> bool {
        distance <= self.threshold
    }

    /// Decides match or no-match for a 1-NN result.
    ///
    /// A missing result is always [`Verdict::NoMatch`]; the index returns some
    /// closest point whenever it is populated, so a present result still has
    /// to pass the threshold.
    #[must_use]
    pub fn decide(&self, result: Option<MatchResult>) -> Verdict {
        match result {
            Some(hit) if hit.scheme == self.id && self.accepts(hit.distance) => Verdict::Match {
                template_id: hit.template_id,
                distance: hit.distance,
            },
            _ => Verdict::NoMatch,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (dim={}, metric={}, threshold={}, index={})",
            self.id,
            self.dimension,
            self.metric.redis_name(),
            self.threshold,
            self.index_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TemplateId;
    use test_case::test_case;

    #[test_case("legacy", SchemeId::LegacyHash; "legacy alias")]
    #[test_case("v0", SchemeId::LegacyHash; "v0 alias")]
    #[test_case("V1", SchemeId::Normalized16; "v1 uppercase")]
    #[test_case("normalized-16", SchemeId::Normalized16; "canonical 16")]
    #[test_case("v2", SchemeId::Normalized512; "v2 alias")]
    #[test_case(" normalized-512 ", SchemeId::Normalized512; "padded canonical 512")]
    fn test_parse_aliases(input: &str, expected: SchemeId) {
        assert_eq!(SchemeId::parse(input).unwrap(), expected);
    }

    #[test]
    fn test_unknown_scheme() {
        let err = Scheme::lookup("v9").unwrap_err();
        assert!(matches!(err, Error::UnknownScheme(ref s) if s == "v9"));
    }

    #[test]
    fn test_registry_is_consistent() {
        for id in SchemeId::all() {
            let scheme = id.scheme();
            assert_eq!(scheme.id, *id);
            assert!(scheme.key_prefix.ends_with(':'));
            assert!(scheme.threshold > 0.0);
        }

        let mut names: Vec<_> = Scheme::all().iter().map(|s| s.index_name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Scheme::all().len());
    }

    #[test]
    fn test_as_str_roundtrips() {
        for id in SchemeId::all() {
            assert_eq!(SchemeId::parse(id.as_str()).unwrap(), *id);
            assert_eq!(id.to_string(), id.as_str());
        }
    }

    #[test]
    fn test_squared_euclidean_distance() {
        let metric = DistanceMetric::SquaredEuclidean;
        assert!((metric.distance(&[0.0, 0.0], &[1.0, 1.0]) - 2.0).abs() < f32::EPSILON);
        assert!(metric.distance(&[0.5; 4], &[0.5; 4]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_cosine_distance() {
        let metric = DistanceMetric::Cosine;
        assert_eq!(metric.distance(&[0.3, 0.7], &[0.3, 0.7]), 0.0);
        assert!((metric.distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((metric.distance(&[0.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_cosine_zero_vectors_and_range() {
        let metric = DistanceMetric::Cosine;
        assert_eq!(metric.distance(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert!((metric.distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_decide_boundary_is_inclusive() {
        let scheme = SchemeId::Normalized16.scheme();
        let at = MatchResult {
            template_id: TemplateId::from_bytes(b"boundary"),
            distance: scheme.threshold,
            scheme: scheme.id,
        };
        assert!(scheme.decide(Some(at)).is_match());

        let above = MatchResult {
            template_id: TemplateId::from_bytes(b"boundary"),
            distance: scheme.threshold + 1e-6,
            scheme: scheme.id,
        };
        assert!(!scheme.decide(Some(above)).is_match());
    }

    #[test]
    fn test_decide_none_is_no_match() {
        assert_eq!(SchemeId::LegacyHash.scheme().decide(None), Verdict::NoMatch);
    }

    #[test]
    fn test_decide_rejects_foreign_scheme_result() {
        let hit = MatchResult {
            template_id: TemplateId::from_bytes(b"x"),
            distance: 0.0,
            scheme: SchemeId::Normalized512,
        };
        assert_eq!(SchemeId::Normalized16.scheme().decide(Some(hit)), Verdict::NoMatch);
    }
}
