//! Document catalog: the authoritative list of stored documents.
//!
//! Persisted as a JSON object mapping each document id to its
//! [`DocumentRecord`]. The catalog never contains the sentinel id.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    doc_id::is_sentinel,
    error::{Error, Result},
};

/// Metadata stored per document.
///
/// # Examples
///
/// ```
/// use kbase::catalog::DocumentRecord;
///
/// let record = DocumentRecord::new(3);
/// assert_eq!(record.chunk_count, 3);
/// assert!(record.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Number of index entries held for the document.
    pub chunk_count: usize,
    /// Seconds since the Unix epoch when the document was first added.
    pub added_at: u64,
    /// Original file the document was read from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// File type hint (the source extension), when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Source size in bytes, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Disabled documents are kept but excluded from query results.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl DocumentRecord {
    pub fn new(chunk_count: usize) -> Self {
        Self {
            chunk_count,
            added_at: unix_now(),
            source: None,
            file_type: None,
            file_size: None,
            enabled: true,
        }
    }
}

/// Map from document id to [`DocumentRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    documents: BTreeMap<String, DocumentRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record. Sentinel ids are ignored.
    pub fn put(&mut self, id: &str, record: DocumentRecord) {
        if is_sentinel(id) {
            return;
        }
        self.documents.insert(id.to_string(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<DocumentRecord> {
        self.documents.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&DocumentRecord> {
        self.documents.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.documents.contains_key(id)
    }

    /// Flip the enabled flag of a document. Returns `false` if unknown.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.documents.get_mut(id) {
            Some(record) => {
                record.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// All document ids in ascending order.
    pub fn ids(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DocumentRecord)> {
        self.documents.iter().map(|(id, r)| (id.as_str(), r))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Chunk count per document, for comparison against the index.
    pub fn chunk_counts(&self) -> BTreeMap<String, usize> {
        self.documents
            .iter()
            .map(|(id, r)| (id.clone(), r.chunk_count))
            .collect()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse a persisted catalog. Malformed content, or content naming the
    /// sentinel, is reported as [`Error::CorruptCatalog`].
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let catalog: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::CorruptCatalog(e.to_string()))?;
        if catalog.documents.keys().any(|id| is_sentinel(id)) {
            return Err(Error::CorruptCatalog(
                "catalog lists the reserved sentinel id".into(),
            ));
        }
        Ok(catalog)
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc_id::SENTINEL_ID;

    #[test]
    fn put_get_remove() {
        let mut catalog = Catalog::new();
        catalog.put("a.txt", DocumentRecord::new(2));
        assert!(catalog.contains("a.txt"));
        assert_eq!(catalog.get("a.txt").unwrap().chunk_count, 2);

        let removed = catalog.remove("a.txt").unwrap();
        assert_eq!(removed.chunk_count, 2);
        assert!(catalog.is_empty());
        assert!(catalog.remove("a.txt").is_none());
    }

    #[test]
    fn sentinel_is_never_stored() {
        let mut catalog = Catalog::new();
        catalog.put(SENTINEL_ID, DocumentRecord::new(1));
        assert!(catalog.is_empty());
    }

    #[test]
    fn ids_are_sorted() {
        let mut catalog = Catalog::new();
        for id in ["c", "a", "b"] {
            catalog.put(id, DocumentRecord::new(1));
        }
        assert_eq!(catalog.ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn set_enabled_flags_known_documents() {
        let mut catalog = Catalog::new();
        catalog.put("a", DocumentRecord::new(1));
        assert!(catalog.set_enabled("a", false));
        assert!(!catalog.get("a").unwrap().enabled);
        assert!(!catalog.set_enabled("missing", false));
    }

    #[test]
    fn json_preserves_records() {
        let mut catalog = Catalog::new();
        let mut record = DocumentRecord::new(4);
        record.source = Some(PathBuf::from("/docs/a.md"));
        record.file_type = Some("md".into());
        record.file_size = Some(1024);
        catalog.put("a.md", record);
        catalog.put("b.txt", DocumentRecord::new(1));

        let restored = Catalog::from_json(&catalog.to_json().unwrap()).unwrap();
        assert_eq!(restored, catalog);
        assert_eq!(restored.get("a.md").unwrap().chunk_count, 4);
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let json = br#"{"doc1.txt": {"chunk_count": 3, "added_at": 0}}"#;
        let catalog = Catalog::from_json(json).unwrap();
        let record = catalog.get("doc1.txt").unwrap();
        assert!(record.enabled);
        assert!(record.source.is_none());
    }

    #[test]
    fn malformed_json_is_corrupt() {
        assert!(matches!(
            Catalog::from_json(b"{not json"),
            Err(Error::CorruptCatalog(_))
        ));
        assert!(matches!(
            Catalog::from_json(br#"{"a": {"chunk_count": "many"}}"#),
            Err(Error::CorruptCatalog(_))
        ));
    }

    #[test]
    fn sentinel_in_json_is_corrupt() {
        let json = br#"{"__init__": {"chunk_count": 1, "added_at": 0}}"#;
        assert!(matches!(
            Catalog::from_json(json),
            Err(Error::CorruptCatalog(_))
        ));
    }

    #[test]
    fn chunk_counts_mirror_records() {
        let mut catalog = Catalog::new();
        catalog.put("a", DocumentRecord::new(2));
        catalog.put("b", DocumentRecord::new(3));
        let counts = catalog.chunk_counts();
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&3));
    }
}
