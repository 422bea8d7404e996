//! Content-addressed template identity.

use crate::models::TemplateId;
use sha2::{Digest, Sha256};

/// SHA-256 over raw template bytes.
///
/// The same digest serves two purposes: its hex form is the [`TemplateId`]
/// that keys the vector store and the identity store, and its leading bytes
/// feed the legacy hashing scheme.
///
/// ```rust
/// use fingerlink::encoding::TemplateHasher;
///
/// let id = TemplateHasher::identify(&[255u8; 16]);
/// assert_eq!(id.as_str().len(), 64);
/// assert_eq!(id, TemplateHasher::identify(&[255u8; 16]));
/// ```
pub struct TemplateHasher;

impl TemplateHasher {
    /// Raw 32-byte digest of `raw`.
    #[must_use]
    pub fn digest(raw: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(raw);
        hasher.finalize().into()
    }

    /// Derives the template id of `raw`.
    #[must_use]
    pub fn identify(raw: &[u8]) -> TemplateId {
        TemplateId::from_bytes(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_matches_identifier() {
        let raw = b"minutiae";
        assert_eq!(
            hex::encode(TemplateHasher::digest(raw)),
            TemplateHasher::identify(raw).as_str()
        );
    }

    #[test]
    fn test_identifier_is_scheme_independent_and_length_agnostic() {
        assert_eq!(TemplateHasher::identify(&[]).as_str().len(), 64);
        assert_ne!(
            TemplateHasher::identify(&[0u8; 16]),
            TemplateHasher::identify(&[0u8; 17])
        );
    }
}
