//! Locating original document content for re-extraction.

use crate::{
    catalog::DocumentRecord,
    error::Result,
    extract::ExtractorRegistry,
};

/// Recovers the extracted text of a catalogued document.
///
/// Used when the index has to be rebuilt and a document's chunks cannot be
/// reused. `Ok(None)` means the content is gone; the document is then
/// dropped from the catalog.
pub trait SourceLocator: Send + Sync {
    fn locate(&self, document_id: &str, record: &DocumentRecord) -> Result<Option<String>>;
}

/// Re-reads `record.source` from disk and runs it through an extractor
/// registry. Documents without a source path, or whose file no longer
/// exists, are unrecoverable.
#[derive(Debug, Clone, Default)]
pub struct FileSourceLocator {
    registry: ExtractorRegistry,
}

impl FileSourceLocator {
    pub fn new(registry: ExtractorRegistry) -> Self {
        Self { registry }
    }
}

impl SourceLocator for FileSourceLocator {
    fn locate(&self, document_id: &str, record: &DocumentRecord) -> Result<Option<String>> {
        let Some(path) = record.source.as_deref() else {
            tracing::debug!(document = document_id, "no source recorded");
            return Ok(None);
        };
        if !path.is_file() {
            tracing::debug!(
                document = document_id,
                path = %path.display(),
                "source file is missing"
            );
            return Ok(None);
        }
        self.registry.extract_file(path).map(Some)
    }
}

/// Locator for engines that only ever receive raw text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSourceLocator;

impl SourceLocator for NoSourceLocator {
    fn locate(&self, _document_id: &str, _record: &DocumentRecord) -> Result<Option<String>> {
        Ok(None)
    }
}
