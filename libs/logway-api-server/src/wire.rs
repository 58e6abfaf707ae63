use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use logway_api::{Entry, Timestamp};

use crate::error::GatewayError;

/// Entry as it travels over HTTP: key and value are standard base64 text,
/// timestamp is RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntry {
    pub key: String,
    pub value: String,
    pub timestamp: Timestamp,
}

impl WireEntry {
    pub fn encode(entry: &Entry) -> Self {
        Self {
            key: STANDARD.encode(&entry.key),
            value: STANDARD.encode(&entry.value),
            timestamp: entry.timestamp,
        }
    }

    /// Decode key then value. The first invalid field is reported.
    pub fn decode(self) -> Result<Entry, GatewayError> {
        let key = STANDARD
            .decode(self.key.as_bytes())
            .map_err(|e| GatewayError::InvalidBase64 { field: "key", detail: e.to_string() })?;
        let value = STANDARD
            .decode(self.value.as_bytes())
            .map_err(|e| GatewayError::InvalidBase64 { field: "value", detail: e.to_string() })?;
        Ok(Entry {
            key,
            value,
            timestamp: self.timestamp,
        })
    }
}
