use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::document::DocumentVersionRow;

/// Lowercase hex SHA-256 of the UTF-8 bytes of `content`.
pub fn content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumStatus {
    Valid,
    Mismatch,
    /// The version was stored without a checksum.
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChecksumReport {
    pub version_number: i32,
    pub status: ChecksumStatus,
    pub stored: Option<String>,
    pub computed: String,
}

impl ChecksumReport {
    pub fn is_valid(&self) -> bool {
        self.status == ChecksumStatus::Valid
    }
}

/// Recomputes the checksum of a stored version and compares it with the recorded one.
pub fn verify_version(version: &DocumentVersionRow) -> ChecksumReport {
    let computed = content_checksum(&version.content);
    let status = match version.checksum_sha256.as_deref() {
        None => ChecksumStatus::Missing,
        Some(stored) if stored.eq_ignore_ascii_case(&computed) => ChecksumStatus::Valid,
        Some(_) => ChecksumStatus::Mismatch,
    };
    ChecksumReport {
        version_number: version.version_number,
        status,
        stored: version.checksum_sha256.clone(),
        computed,
    }
}
