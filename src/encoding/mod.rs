//! Raw template bytes to vectors and identifiers.
//!
//! Encoding is pure: the same bytes under the same scheme always produce
//! bit-identical vectors, which is what lets a re-submitted template score
//! exactly zero against its enrolled copy.

mod identifier;

pub use identifier::TemplateHasher;

use crate::models::{EncodedVector, Normalization, Scheme};
use crate::{Error, Result};

/// Encodes `raw` under `scheme`.
///
/// Reads the first `scheme.dimension` bytes (of the template itself, or of
/// its SHA-256 digest for hashing schemes) and scales each into `[0, 1]`.
/// Bytes beyond the dimension are ignored.
///
/// # Errors
///
/// Returns [`Error::Encoding`] if `raw` is shorter than the scheme dimension.
pub fn encode(raw: &[u8], scheme: &Scheme) -> Result<EncodedVector> {
    if raw.len() < scheme.dimension {
        return Err(Error::Encoding {
            scheme: scheme.id,
            required: scheme.dimension,
            actual: raw.len(),
        });
    }

    let values = match scheme.normalization {
        Normalization::LinearBytes => scale(&raw[..scheme.dimension]),
        Normalization::HashedBytes => {
            let digest = TemplateHasher::digest(raw);
            if digest.len() < scheme.dimension {
                return Err(Error::Encoding {
                    scheme: scheme.id,
                    required: scheme.dimension,
                    actual: digest.len(),
                });
            }
            scale(&digest[..scheme.dimension])
        },
    };

    Ok(EncodedVector::new(scheme.id, values))
}

fn scale(bytes: &[u8]) -> Vec<f32> {
    bytes.iter().map(|b| f32::from(*b) / 255.0).collect()
}
