use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// TTL applied when a cache write does not specify one.
pub const DEFAULT_TTL_HOURS: u32 = 1;

/// Canonical form of an analysis request used as a cache key.
///
/// Object keys are sorted recursively before serialising, so two structurally
/// identical requests produce the same `hash` regardless of field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestShape {
    inputs: Value,
    canonical: String,
    hash: String,
}

impl RequestShape {
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let inputs = canonicalize(value);
        let canonical = inputs.to_string();
        let hash = format!("{:x}", Sha256::digest(canonical.as_bytes()));
        Self {
            inputs,
            canonical,
            hash,
        }
    }

    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if `value` cannot be represented as JSON.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::from_value(&serde_json::to_value(value)?))
    }

    /// Hex SHA-256 of the canonical JSON text.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    #[must_use]
    pub fn canonical_json(&self) -> &str {
        &self.canonical
    }

    #[must_use]
    pub fn inputs(&self) -> &Value {
        &self.inputs
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// A TTL-bounded memoised analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub shape_hash: String,
    pub inputs: Value,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build an entry expiring `ttl_hours` after `created_at`
    /// ([`DEFAULT_TTL_HOURS`] when `None`).
    #[must_use]
    pub fn new(
        shape: &RequestShape,
        payload: Value,
        created_at: DateTime<Utc>,
        ttl_hours: Option<u32>,
    ) -> Self {
        let ttl = ttl_hours.unwrap_or(DEFAULT_TTL_HOURS);
        Self {
            shape_hash: shape.hash().to_string(),
            inputs: shape.inputs().clone(),
            payload,
            created_at,
            expires_at: created_at + Duration::hours(i64::from(ttl)),
        }
    }

    /// An entry is served only strictly before its expiry instant.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
