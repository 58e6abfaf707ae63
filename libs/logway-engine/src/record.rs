use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use logway_api::{Entry, StoreError, Timestamp};

/// On-disk line of the file store: one JSON object per entry.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct DiskRecord {
    pub key: String,
    pub value: String,
    pub timestamp: Timestamp,
}

impl DiskRecord {
    pub(crate) fn from_entry(entry: &Entry) -> Self {
        Self {
            key: STANDARD.encode(&entry.key),
            value: STANDARD.encode(&entry.value),
            timestamp: entry.timestamp,
        }
    }

    pub(crate) fn into_entry(self) -> Result<Entry, StoreError> {
        let key = STANDARD
            .decode(&self.key)
            .map_err(|e| StoreError::format(format!("stored key: {e}")))?;
        let value = STANDARD
            .decode(&self.value)
            .map_err(|e| StoreError::format(format!("stored value: {e}")))?;
        Ok(Entry {
            key,
            value,
            timestamp: self.timestamp,
        })
    }
}

/// Serialize an entry into a newline-terminated line.
pub(crate) fn encode_line(entry: &Entry) -> Result<Vec<u8>, StoreError> {
    let mut line = serde_json::to_vec(&DiskRecord::from_entry(entry))
        .map_err(|e| StoreError::format(format!("json serialize: {e}")))?;
    line.push(b'\n');
    Ok(line)
}

/// Parse one stored line (with or without the trailing newline).
pub(crate) fn decode_line(line: &[u8]) -> Result<Entry, StoreError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let record: DiskRecord = serde_json::from_slice(line)
        .map_err(|e| StoreError::format(format!("json parse: {e}")))?;
    record.into_entry()
}
