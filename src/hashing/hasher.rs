use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{ContentHash, IncidentSource};

lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
    static ref TRAILING_PUNCTUATION: Regex = Regex::new(r"[.!?:;,]+$").unwrap();
    static ref PUNCTUATION_RUN: Regex = Regex::new(r"[.!?:;,]{2,}").unwrap();
}

/// Configuration for content hashing and validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Categories accepted by `validate_content_hash`
    #[serde(default = "default_allowed_categories")]
    pub allowed_categories: Vec<String>,

    /// How far in the future `first_seen_at` may be (seconds)
    #[serde(default = "default_clock_skew_tolerance")]
    pub clock_skew_tolerance_secs: u64,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            allowed_categories: default_allowed_categories(),
            clock_skew_tolerance_secs: default_clock_skew_tolerance(),
        }
    }
}

fn default_allowed_categories() -> Vec<String> {
    [
        "accident",
        "chain_control",
        "closure",
        "construction",
        "congestion",
        "hazard",
        "incident",
        "weather",
        "other",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_clock_skew_tolerance() -> u64 {
    60
}

/// Normalize incident text so cosmetic feed differences hash identically.
///
/// Lowercases, trims, collapses whitespace runs, strips a trailing run of
/// sentence punctuation and removes internal runs of two or more punctuation
/// characters. The steps repeat until nothing changes, so the function is
/// idempotent.
pub fn normalize_incident_text(text: &str) -> String {
    let mut current = text.to_lowercase();
    loop {
        let next = normalize_pass(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn normalize_pass(text: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(text.trim(), " ");
    let stripped = TRAILING_PUNCTUATION.replace(&collapsed, "");
    let cleaned = PUNCTUATION_RUN.replace_all(&stripped, "");
    WHITESPACE_RUN.replace_all(cleaned.trim(), " ").into_owned()
}

/// Round coordinates to a ~100 m grid and render as `"{lat}_{lon}"`
pub fn location_key(latitude: f64, longitude: f64) -> String {
    format!("{:.3}_{:.3}", round_coordinate(latitude), round_coordinate(longitude))
}

fn round_coordinate(value: f64) -> f64 {
    let rounded = (value * 1000.0).round() / 1000.0;
    // Avoid "-0.000" for values that round to zero
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// SHA-256 of `normalized_text|location_key|category` as lowercase hex
pub fn compute_content_hash(normalized_text: &str, location_key: &str, category: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hasher.update(b"|");
    hasher.update(location_key.as_bytes());
    hasher.update(b"|");
    hasher.update(category.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Turns heterogeneous incident records into content fingerprints
#[derive(Debug, Clone)]
pub struct ContentHasher {
    allowed_categories: HashSet<String>,
    clock_skew_tolerance: chrono::Duration,
}

impl ContentHasher {
    pub fn new(config: HashingConfig) -> Self {
        Self {
            allowed_categories: config
                .allowed_categories
                .iter()
                .map(|c| c.trim().to_lowercase())
                .collect(),
            clock_skew_tolerance: chrono::Duration::seconds(config.clock_skew_tolerance_secs as i64),
        }
    }

    /// Fingerprint a record
    pub fn hash_incident<R: IncidentSource + ?Sized>(&self, record: &R) -> Result<ContentHash> {
        let fields = record.extract()?;

        let normalized_text = normalize_incident_text(&fields.description);
        if normalized_text.is_empty() {
            return Err(AppError::Extraction(
                "description is empty after normalization".to_string(),
            ));
        }

        let location_key = location_key(fields.latitude, fields.longitude);
        let content_hash = compute_content_hash(&normalized_text, &location_key, &fields.category);

        let short_hash = &content_hash[..12];
        debug!(
            content_hash = %short_hash,
            location_key = %location_key,
            category = %fields.category,
            "Computed content hash"
        );

        Ok(ContentHash {
            content_hash,
            normalized_text,
            location_key,
            category: fields.category,
            first_seen_at: Utc::now(),
        })
    }

    /// Integrity checks on a fingerprint
    pub fn validate_content_hash(&self, hash: &ContentHash) -> Result<()> {
        if hash.content_hash.len() != 64 {
            return Err(AppError::Validation(format!(
                "content hash must be 64 characters, got {}",
                hash.content_hash.len()
            )));
        }

        if !hash
            .content_hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(AppError::Validation(
                "content hash must be lowercase hexadecimal".to_string(),
            ));
        }

        if hash.normalized_text.is_empty() {
            return Err(AppError::Validation("normalized text is empty".to_string()));
        }

        if hash.location_key.is_empty() {
            return Err(AppError::Validation("location key is empty".to_string()));
        }

        if hash.category.is_empty() {
            return Err(AppError::Validation("category is empty".to_string()));
        }

        if !self.allowed_categories.contains(&hash.category) {
            return Err(AppError::Validation(format!(
                "category '{}' is not allowed",
                hash.category
            )));
        }

        if hash.first_seen_at > Utc::now() + self.clock_skew_tolerance {
            return Err(AppError::Validation(format!(
                "first_seen_at {} is in the future",
                hash.first_seen_at
            )));
        }

        Ok(())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(HashingConfig::default())
    }
}
