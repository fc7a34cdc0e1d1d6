//! Content hashes of configuration schemas.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::definition::PropertyDefinition;
use crate::error::SchemaError;

/// Hash of a schema over its canonical JSON form.
///
/// Two schemas with the same fingerprint resolve, normalize and validate
/// identically. Resource types use the fingerprints of their configuration
/// schemas as their schema version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaFingerprint(String);

impl SchemaFingerprint {
    pub(crate) fn of(name: &str, properties: &[PropertyDefinition]) -> Result<Self, SchemaError> {
        let properties =
            serde_json::to_value(properties).map_err(|e| SchemaError::Encoding(e.to_string()))?;
        Ok(Self::from_json(&serde_json::json!({
            "name": name,
            "properties": properties,
        })))
    }

    pub(crate) fn of_empty(name: &str) -> Self {
        Self::from_json(&serde_json::json!({ "name": name, "properties": [] }))
    }

    /// Hash an arbitrary JSON document. Object keys are sorted first.
    pub fn from_json(json: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical(json).to_string().as_bytes());
        let digest = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    /// Combines several fingerprints, order-sensitively, into one.
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a SchemaFingerprint>) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.0.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuilds `value` with every object's keys in sorted order.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            Value::Object(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonical(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}
