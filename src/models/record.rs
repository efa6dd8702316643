use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{AppError, Result};

/// Fields the content hasher needs from any incident shape
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentFields {
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub category: String,
}

/// Extraction capability implemented once per concrete record shape
pub trait IncidentSource {
    /// Pull the hashable fields out of the record.
    ///
    /// Fails with [`AppError::Extraction`] when description or category is
    /// missing or blank.
    fn extract(&self) -> Result<IncidentFields>;

    /// JSON rendering of the record, stored as the original payload
    fn to_payload(&self) -> Value;
}

/// Struct-backed incident as produced by the typed feed parsers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedIncident {
    /// Identifier assigned by the upstream feed (not used for deduplication)
    #[serde(default)]
    pub external_id: Option<String>,

    /// Feed the record came from (e.g. "caltrans-cc", "ndot-511")
    #[serde(default)]
    pub source: Option<String>,

    pub description: String,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,

    pub category: String,

    /// When the upstream feed says the incident was reported
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,

    /// Any additional feed-specific attributes
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl FeedIncident {
    pub fn new(description: impl Into<String>, latitude: f64, longitude: f64, category: impl Into<String>) -> Self {
        Self {
            external_id: None,
            source: None,
            description: description.into(),
            latitude,
            longitude,
            category: category.into(),
            reported_at: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

impl IncidentSource for FeedIncident {
    fn extract(&self) -> Result<IncidentFields> {
        Ok(IncidentFields {
            description: required("description", Some(self.description.as_str()))?,
            latitude: self.latitude,
            longitude: self.longitude,
            category: required("category", Some(self.category.as_str()))?.to_lowercase(),
        })
    }

    fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

const DESCRIPTION_KEYS: &[&str] = &["description", "summary"];
const CATEGORY_KEYS: &[&str] = &["category", "type"];
const LATITUDE_KEYS: &[&str] = &["latitude", "lat"];
const LONGITUDE_KEYS: &[&str] = &["longitude", "lon", "lng"];

/// Map-backed incident as produced by loosely-typed JSON feeds
impl IncidentSource for Map<String, Value> {
    fn extract(&self) -> Result<IncidentFields> {
        let description = first_str(self, DESCRIPTION_KEYS);
        let category = first_str(self, CATEGORY_KEYS);

        // Coordinates may live at the top level or in a nested "location" object
        let location = self.get("location").and_then(Value::as_object);
        let latitude = first_f64(self, LATITUDE_KEYS)
            .or_else(|| location.and_then(|loc| first_f64(loc, LATITUDE_KEYS)))
            .unwrap_or(0.0);
        let longitude = first_f64(self, LONGITUDE_KEYS)
            .or_else(|| location.and_then(|loc| first_f64(loc, LONGITUDE_KEYS)))
            .unwrap_or(0.0);

        Ok(IncidentFields {
            description: required("description", description)?,
            latitude,
            longitude,
            category: required("category", category)?.to_lowercase(),
        })
    }

    fn to_payload(&self) -> Value {
        Value::Object(self.clone())
    }
}

fn required(field: &str, value: Option<&str>) -> Result<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::Extraction(format!(
            "required field '{}' is missing or empty",
            field
        ))),
    }
}

fn first_str<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| map.get(*k).and_then(Value::as_str))
}

fn first_f64(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Closed set of record shapes accepted by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum FeedRecord {
    Incident(FeedIncident),
    Map(Map<String, Value>),
}

impl FeedRecord {
    /// Classify an arbitrary JSON value. Only objects are supported.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(FeedRecord::Map(map)),
            other => Err(AppError::Extraction(format!(
                "unsupported record shape: expected object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl IncidentSource for FeedRecord {
    fn extract(&self) -> Result<IncidentFields> {
        match self {
            FeedRecord::Incident(incident) => incident.extract(),
            FeedRecord::Map(map) => map.extract(),
        }
    }

    fn to_payload(&self) -> Value {
        match self {
            FeedRecord::Incident(incident) => incident.to_payload(),
            FeedRecord::Map(map) => map.to_payload(),
        }
    }
}

impl From<FeedIncident> for FeedRecord {
    fn from(incident: FeedIncident) -> Self {
        FeedRecord::Incident(incident)
    }
}

impl From<Map<String, Value>> for FeedRecord {
    fn from(map: Map<String, Value>) -> Self {
        FeedRecord::Map(map)
    }
}
