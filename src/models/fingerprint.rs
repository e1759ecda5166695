use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub site: String,
    pub url: String,
    pub checksum: String,
}

/// How a newly observed checksum relates to the one stored before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Changed,
    Unchanged,
}

impl Change {
    pub fn classify(previous: Option<&FingerprintRecord>, checksum: &str) -> Self {
        match previous {
            None => Change::New,
            Some(prev) if prev.checksum == checksum => Change::Unchanged,
            Some(_) => Change::Changed,
        }
    }
}
