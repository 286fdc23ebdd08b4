use std::path::Path;

use crate::error::{Error, Result};

/// Identifier of the placeholder chunk that keeps the vector index non-empty.
pub const SENTINEL_ID: &str = "__init__";

/// A validated, caller-facing document identifier.
///
/// Identifiers are usually the original file name. The sentinel id is
/// reserved and can never be used for a real document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    /// Validate a raw identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use kbase::DocumentId;
    ///
    /// assert!(DocumentId::new("doc1.txt").is_ok());
    /// assert!(DocumentId::new("").is_err());
    /// assert!(DocumentId::new("__init__").is_err());
    /// assert!(DocumentId::new("bad\nid").is_err());
    /// ```
    pub fn new(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::InvalidDocumentId {
                id: raw.to_string(),
                reason: "identifier is empty",
            });
        }
        if raw.chars().any(char::is_control) {
            return Err(Error::InvalidDocumentId {
                id: raw.escape_debug().to_string(),
                reason: "identifier contains control characters",
            });
        }
        if raw == SENTINEL_ID {
            return Err(Error::InvalidDocumentId {
                id: raw.to_string(),
                reason: "identifier is reserved",
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Derive an identifier from a file path (its file name).
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::new(&name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns `true` for the reserved sentinel identifier.
pub fn is_sentinel(id: &str) -> bool {
    id == SENTINEL_ID
}
