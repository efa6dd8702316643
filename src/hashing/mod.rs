/// Content hashing for incident deduplication
///
/// Incidents are deduplicated by what they say and where they are, not by
/// the identifier the upstream feed assigned:
/// - Text normalization (case, whitespace, punctuation noise)
/// - Location bucketing on a ~100 m grid
/// - SHA-256 fingerprint over text, location and category
/// - Integrity validation of fingerprints

pub mod hasher;

pub use hasher::{
    compute_content_hash, location_key, normalize_incident_text, ContentHasher, HashingConfig,
};
