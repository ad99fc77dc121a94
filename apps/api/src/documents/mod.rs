// Document version control for resumes, letters and statements of purpose.
// Versions are append-only; only the document's current pointer, title and
// deletion marker ever change after insert.

pub mod checksum;
pub mod handlers;
pub mod store;
pub mod versioning;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Maximum number of characters a single version may hold.
pub const MAX_CONTENT_CHARS: usize = 5000;
pub const DEFAULT_CONTENT_FORMAT: &str = "markdown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Resume,
    Letter,
    Sop,
}

impl DocType {
    pub const ALL: [DocType; 3] = [DocType::Resume, DocType::Letter, DocType::Sop];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Resume => "resume",
            DocType::Letter => "letter",
            DocType::Sop => "sop",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "Invalid document type: {s}. Must be one of: resume, letter, sop"
                ))
            })
    }
}
