use chrono::{DateTime, FixedOffset};

/// Position of an entry inside a topic. Assigned by the store on append.
pub type Offset = u64;

/// Producer-supplied point in time. The UTC offset is kept as sent.
pub type Timestamp = DateTime<FixedOffset>;

/// One record of a topic. `key` and `value` are opaque bytes. Neither the
/// gateway nor the store interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub timestamp: Timestamp,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, timestamp: Timestamp) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timestamp,
        }
    }
}
