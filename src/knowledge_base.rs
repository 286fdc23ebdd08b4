//! The knowledge base engine.
//!
//! A [`KnowledgeBase`] owns one vector index and one catalog and keeps them
//! consistent on disk. Mutations are serialized by a single writer lock.
//! Each mutation builds a new index/catalog pair, persists it, and then
//! publishes it by swapping one `Arc`. Readers clone that `Arc` and never
//! see a half-applied change.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use serde::Serialize;

use crate::{
    catalog::{Catalog, DocumentRecord},
    chunking::ChunkingConfig,
    config::KbConfig,
    data_dir::DataDir,
    doc_id::{DocumentId, is_sentinel},
    embedding::{Embedder, embedder_for},
    error::{Error, Result},
    extract::ExtractorRegistry,
    recovery::{EngineState, LoadPlan, RebuildReport, Recovery, persist},
    source::{FileSourceLocator, SourceLocator},
    store::{Blob, DurableStore, open_store},
    vector_index::{QueryHit, VectorIndex},
};

/// An index/catalog pair published to readers as one unit.
#[derive(Debug)]
struct Snapshot {
    index: Arc<VectorIndex>,
    catalog: Arc<Catalog>,
}

/// Result of adding a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    pub document_id: String,
    /// Chunks appended by this call.
    pub added_chunks: usize,
    /// Chunks now held for the document (equal to `added_chunks` unless the
    /// id was already present).
    pub chunk_count: usize,
}

/// A catalogued document with its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    #[serde(flatten)]
    pub record: DocumentRecord,
}

/// Point-in-time summary of an engine.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub enabled: bool,
    pub state: EngineState,
    pub documents: usize,
    pub chunks: usize,
    pub model: String,
    pub storage: Option<PathBuf>,
}

/// Source metadata recorded for documents added from files.
#[derive(Debug, Default)]
struct SourceInfo {
    path: Option<PathBuf>,
    file_type: Option<String>,
    file_size: Option<u64>,
}

pub struct KnowledgeBase {
    config: KbConfig,
    chunking: ChunkingConfig,
    storage: Option<PathBuf>,
    store: Arc<dyn DurableStore>,
    embedder: Arc<dyn Embedder>,
    locator: Arc<dyn SourceLocator>,
    extractors: ExtractorRegistry,
    writer: Mutex<()>,
    state: RwLock<EngineState>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl KnowledgeBase {
    /// Open an engine with the built-in store, embedder and extractors
    /// selected by `config`.
    ///
    /// Nothing is read from storage yet; the engine initializes on first
    /// use.
    pub fn open(config: KbConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: KbConfig) -> KnowledgeBaseBuilder {
        KnowledgeBaseBuilder {
            config,
            store: None,
            embedder: None,
            locator: None,
            extractors: None,
        }
    }

    pub fn config(&self) -> &KbConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn state(&self) -> EngineState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run startup recovery now instead of on first use.
    pub fn initialize(&self) -> Result<()> {
        self.ready().map(|_| ())
    }

    /// Chunk, embed and store `text` under `document_id`.
    ///
    /// Adding to an id that already exists appends the new chunks; the
    /// catalog's chunk count becomes the total held for the id.
    pub fn add_document(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<AddOutcome> {
        self.ensure_enabled()?;
        let id = DocumentId::new(document_id)?;
        self.add_text(id, text, SourceInfo::default())
    }

    /// Extract `path` according to its extension and add it.
    ///
    /// The document id defaults to the file name.
    pub fn add_file(
        &self,
        path: &Path,
        document_id: Option<&str>,
    ) -> Result<AddOutcome> {
        self.ensure_enabled()?;
        let id = match document_id {
            Some(raw) => DocumentId::new(raw)?,
            None => DocumentId::from_path(path)?,
        };

        let text = self.extractors.extract_file(path)?;
        let metadata = std::fs::metadata(path)?;
        let canonical = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf());
        let source = SourceInfo {
            path: Some(canonical),
            file_type: path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase()),
            file_size: Some(metadata.len()),
        };
        self.add_text(id, &text, source)
    }

    fn add_text(
        &self,
        id: DocumentId,
        text: &str,
        source: SourceInfo,
    ) -> Result<AddOutcome> {
        if text.trim().is_empty() {
            return Err(Error::EmptyContent(id.into_string()));
        }
        let chunks: Vec<String> = self
            .chunking
            .chunk(text)
            .into_iter()
            .map(|c| c.text)
            .collect();
        if chunks.is_empty() {
            return Err(Error::EmptyContent(id.into_string()));
        }

        let _guard = self.lock_writer();
        let snapshot = self.ready_locked()?;

        let mut index = VectorIndex::clone(&snapshot.index);
        let added = index.insert(self.embedder.as_ref(), id.as_str(), &chunks)?;

        let mut catalog = Catalog::clone(&snapshot.catalog);
        let mut record = catalog
            .get(id.as_str())
            .cloned()
            .unwrap_or_else(|| DocumentRecord::new(0));
        record.chunk_count += added;
        if source.path.is_some() {
            record.source = source.path;
            record.file_type = source.file_type;
            record.file_size = source.file_size;
        }
        let chunk_count = record.chunk_count;
        catalog.put(id.as_str(), record);

        let previous = snapshot.index.encode();
        persist(
            self.store.as_ref(),
            &index,
            &catalog,
            Some(previous.as_slice()),
        )?;
        self.publish(index.into(), catalog.into());

        tracing::info!(
            document = %id,
            added,
            total = chunk_count,
            "document added"
        );
        Ok(AddOutcome {
            document_id: id.into_string(),
            added_chunks: added,
            chunk_count,
        })
    }

    /// Remove a document and every chunk it owns.
    ///
    /// The index is rebuilt from the remaining chunks, reusing their stored
    /// vectors.
    pub fn delete_document(&self, document_id: &str) -> Result<DocumentRecord> {
        self.ensure_enabled()?;

        let _guard = self.lock_writer();
        let snapshot = self.ready_locked()?;
        if !snapshot.catalog.contains(document_id) {
            return Err(Error::not_found(document_id));
        }

        let staged = snapshot.index.staged_without(document_id);
        let index = VectorIndex::rebuild_from(self.embedder.as_ref(), staged)?;

        let mut catalog = Catalog::clone(&snapshot.catalog);
        let removed = catalog
            .remove(document_id)
            .ok_or_else(|| Error::not_found(document_id))?;

        let previous = snapshot.index.encode();
        persist(
            self.store.as_ref(),
            &index,
            &catalog,
            Some(previous.as_slice()),
        )?;
        self.publish(index.into(), catalog.into());

        tracing::info!(
            document = document_id,
            chunks = removed.chunk_count,
            "document deleted"
        );
        Ok(removed)
    }

    /// Include or exclude a document from query results.
    pub fn set_document_enabled(
        &self,
        document_id: &str,
        enabled: bool,
    ) -> Result<()> {
        self.ensure_enabled()?;

        let _guard = self.lock_writer();
        let snapshot = self.ready_locked()?;

        let mut catalog = Catalog::clone(&snapshot.catalog);
        if !catalog.set_enabled(document_id, enabled) {
            return Err(Error::not_found(document_id));
        }
        self.store.write(Blob::Catalog, &catalog.to_json()?)?;
        self.publish(Arc::clone(&snapshot.index), catalog.into());

        tracing::info!(document = document_id, enabled, "document toggled");
        Ok(())
    }

    /// Rebuild the whole index, re-extracting every document that still has
    /// a readable source.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        self.ensure_enabled()?;

        let _guard = self.lock_writer();
        let snapshot = self.ready_locked()?;

        self.set_state(EngineState::Rebuilding);
        let previous = snapshot.index.encode();
        let result = self.recovery().rebuild(
            &snapshot.catalog,
            Some(&snapshot.index),
            true,
            Some(previous.as_slice()),
        );
        self.set_state(EngineState::Ready);

        let rebuilt = result?;
        self.publish(rebuilt.index.into(), rebuilt.catalog.into());
        Ok(rebuilt.report)
    }

    /// All document ids in ascending order. Empty when the engine is
    /// disabled.
    pub fn list_all_documents(&self) -> Result<Vec<String>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        Ok(self.ready()?.catalog.ids())
    }

    /// All catalogued documents with their records.
    pub fn documents(&self) -> Result<Vec<DocumentInfo>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        let snapshot = self.ready()?;
        Ok(snapshot
            .catalog
            .iter()
            .map(|(id, record)| DocumentInfo {
                id: id.to_string(),
                record: record.clone(),
            })
            .collect())
    }

    pub fn get_document(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentRecord>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        Ok(self.ready()?.catalog.get(document_id).cloned())
    }

    /// Return up to `top_k` chunks most similar to `text`.
    ///
    /// A `top_k` of zero uses the configured default. Disabled engines,
    /// empty catalogs and engines that fail to initialize yield no results.
    /// Chunks of disabled documents are never returned.
    pub fn query(&self, text: &str, top_k: usize) -> Result<Vec<QueryHit>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        let snapshot = match self.ready() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "knowledge base unavailable, returning no results"
                );
                return Ok(Vec::new());
            }
        };
        if snapshot.catalog.is_empty() {
            return Ok(Vec::new());
        }

        let top_k = if top_k == 0 { self.config.top_k } else { top_k };
        let hits = snapshot
            .index
            .query(self.embedder.as_ref(), text, top_k.saturating_mul(2))?;

        let total = hits.len();
        let hits: Vec<QueryHit> = hits
            .into_iter()
            .filter(|hit| !is_sentinel(&hit.document_id))
            .filter(|hit| {
                snapshot
                    .catalog
                    .get(&hit.document_id)
                    .is_some_and(|record| record.enabled)
            })
            .take(top_k)
            .collect();

        tracing::debug!(candidates = total, returned = hits.len(), "query");
        Ok(hits)
    }

    pub fn status(&self) -> Result<Status> {
        let (documents, chunks) = if self.is_enabled() {
            let snapshot = self.ready()?;
            (snapshot.catalog.len(), snapshot.index.real_len())
        } else {
            (0, 0)
        };
        Ok(Status {
            enabled: self.is_enabled(),
            state: self.state(),
            documents,
            chunks,
            model: self.embedder.model_id().to_string(),
            storage: self.storage.clone(),
        })
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.is_enabled() {
            Ok(())
        } else {
            Err(Error::Disabled)
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, index: Arc<VectorIndex>, catalog: Arc<Catalog>) {
        let snapshot = Arc::new(Snapshot { index, catalog });
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) =
            Some(snapshot);
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn recovery(&self) -> Recovery<'_> {
        Recovery {
            store: self.store.as_ref(),
            embedder: self.embedder.as_ref(),
            locator: self.locator.as_ref(),
            chunking: self.chunking,
        }
    }

    /// The published snapshot, initializing the engine first if needed.
    fn ready(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }
        let _guard = self.lock_writer();
        self.ready_locked()
    }

    /// Like [`Self::ready`]; the caller must hold the writer lock.
    fn ready_locked(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        self.set_state(EngineState::Loading);
        match self.load() {
            Ok((index, catalog)) => {
                self.publish(index.into(), catalog.into());
                self.set_state(EngineState::Ready);
                self.current().ok_or_else(|| {
                    Error::Config("snapshot was not published".into())
                })
            }
            Err(e) => {
                self.set_state(EngineState::Uninitialized);
                Err(e)
            }
        }
    }

    fn load(&self) -> Result<(VectorIndex, Catalog)> {
        let recovery = self.recovery();
        match recovery.inspect()? {
            LoadPlan::FreshEmpty => {
                self.set_state(EngineState::FreshEmpty);
                tracing::info!(
                    "no stored knowledge base found, starting empty"
                );
                recovery.fresh()
            }
            LoadPlan::Ready { index, catalog } => {
                tracing::info!(
                    documents = catalog.len(),
                    chunks = index.real_len(),
                    "knowledge base loaded"
                );
                Ok((index, catalog))
            }
            LoadPlan::Rebuild {
                catalog,
                loaded,
                reason,
            } => {
                self.set_state(EngineState::Rebuilding);
                tracing::warn!(%reason, "rebuilding vector index from catalog");
                let previous = loaded.as_ref().map(VectorIndex::encode);
                let rebuilt = recovery.rebuild(
                    &catalog,
                    loaded.as_ref(),
                    false,
                    previous.as_deref(),
                )?;
                for id in &rebuilt.report.dropped {
                    tracing::warn!(
                        document = %id,
                        "document removed during recovery"
                    );
                }
                Ok((rebuilt.index, rebuilt.catalog))
            }
        }
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("enabled", &self.config.enabled)
            .field("state", &self.state())
            .field("model", &self.embedder.model_id())
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`KnowledgeBase`] with custom collaborators.
///
/// Anything not supplied is derived from the configuration: the store from
/// the storage location and backend, the embedder from the model id, the
/// locator from the extractor registry.
pub struct KnowledgeBaseBuilder {
    config: KbConfig,
    store: Option<Arc<dyn DurableStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    locator: Option<Arc<dyn SourceLocator>>,
    extractors: Option<ExtractorRegistry>,
}

impl KnowledgeBaseBuilder {
    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn locator(mut self, locator: Arc<dyn SourceLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = Some(extractors);
        self
    }

    pub fn build(self) -> Result<KnowledgeBase> {
        let config = self.config;
        config.validate()?;
        let chunking = config.chunking()?;

        let (store, storage) = match self.store {
            Some(store) => (store, config.storage_path.clone()),
            None => {
                let data_dir =
                    DataDir::resolve(config.storage_path.as_deref())?;
                let store = open_store(config.storage_backend, &data_dir)?;
                (store, Some(data_dir.root().to_path_buf()))
            }
        };

        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => embedder_for(&config.embedding_model)?,
        };
        let extractors = self.extractors.unwrap_or_default();
        let locator = match self.locator {
            Some(locator) => locator,
            None => Arc::new(FileSourceLocator::new(extractors.clone())),
        };

        tracing::debug!(
            model = embedder.model_id(),
            backend = %config.storage_backend,
            "knowledge base configured"
        );

        Ok(KnowledgeBase {
            config,
            chunking,
            storage,
            store,
            embedder,
            locator,
            extractors,
            writer: Mutex::new(()),
            state: RwLock::new(EngineState::Uninitialized),
            snapshot: RwLock::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{embedding::HashEmbedder, store::FileStore};

    fn config() -> KbConfig {
        KbConfig {
            chunk_size: 60,
            chunk_overlap: 10,
            embedding_model: "hash:64".into(),
            ..KbConfig::default()
        }
    }

    fn open(dir: &Path) -> KnowledgeBase {
        KnowledgeBase::open(KbConfig {
            storage_path: Some(dir.to_path_buf()),
            ..config()
        })
        .unwrap()
    }

    #[test]
    fn starts_uninitialized_and_initializes_lazily() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = open(tmp.path());
        assert_eq!(kb.state(), EngineState::Uninitialized);

        assert!(kb.list_all_documents().unwrap().is_empty());
        assert_eq!(kb.state(), EngineState::Ready);
        assert!(tmp.path().join("index.bin").exists());
        assert!(tmp.path().join("catalog.json").exists());
    }

    #[test]
    fn invalid_chunking_fails_at_construction() {
        let tmp = tempfile::tempdir().unwrap();
        let result = KnowledgeBase::builder(KbConfig {
            chunk_size: 10,
            chunk_overlap: 10,
            ..config()
        })
        .store(Arc::new(FileStore::open(tmp.path()).unwrap()))
        .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn add_and_query() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = open(tmp.path());
        let outcome = kb
            .add_document(
                "pasta.txt",
                "boil the pasta in plenty of salted water",
            )
            .unwrap();
        assert_eq!(outcome.chunk_count, 1);

        let hits = kb.query("pasta water", 3).unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.document_id == "pasta.txt"));
    }

    #[test]
    fn re_add_appends_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = open(tmp.path());
        kb.add_document("a", "first version").unwrap();
        let outcome = kb.add_document("a", "second version").unwrap();
        assert_eq!(outcome.added_chunks, 1);
        assert_eq!(outcome.chunk_count, 2);
        assert_eq!(kb.get_document("a").unwrap().unwrap().chunk_count, 2);
    }

    #[test]
    fn whitespace_only_text_is_empty_content() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = open(tmp.path());
        assert!(matches!(
            kb.add_document("blank.txt", "  \n\t "),
            Err(Error::EmptyContent(_))
        ));
        assert!(kb.list_all_documents().unwrap().is_empty());
    }

    #[test]
    fn sentinel_id_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = open(tmp.path());
        assert!(matches!(
            kb.add_document("__init__", "text"),
            Err(Error::InvalidDocumentId { .. })
        ));
    }

    #[test]
    fn delete_unknown_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = open(tmp.path());
        assert!(matches!(
            kb.delete_document("missing"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn disabled_documents_are_hidden_from_queries() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = open(tmp.path());
        kb.add_document("a", "shared words here").unwrap();
        kb.set_document_enabled("a", false).unwrap();
        assert!(kb.query("shared words", 3).unwrap().is_empty());
        assert_eq!(kb.list_all_documents().unwrap(), vec!["a"]);

        kb.set_document_enabled("a", true).unwrap();
        assert_eq!(kb.query("shared words", 3).unwrap().len(), 1);
    }

    #[test]
    fn disabled_engine_rejects_mutations_and_returns_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::open(KbConfig {
            enabled: false,
            storage_path: Some(tmp.path().to_path_buf()),
            ..config()
        })
        .unwrap();

        assert!(matches!(kb.add_document("a", "text"), Err(Error::Disabled)));
        assert!(matches!(kb.delete_document("a"), Err(Error::Disabled)));
        assert!(kb.query("text", 3).unwrap().is_empty());
        assert!(kb.list_all_documents().unwrap().is_empty());
        assert!(!tmp.path().join("index.bin").exists());
    }

    #[test]
    fn add_file_records_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("docs");
        std::fs::create_dir_all(&src).unwrap();
        let path = src.join("page.html");
        std::fs::write(
            &path,
            "<html><body><p>Hello from HTML</p></body></html>",
        )
        .unwrap();

        let kb = open(&tmp.path().join("kb"));
        let outcome = kb.add_file(&path, None).unwrap();
        assert_eq!(outcome.document_id, "page.html");

        let record = kb.get_document("page.html").unwrap().unwrap();
        assert_eq!(record.file_type.as_deref(), Some("html"));
        assert!(record.source.is_some());
        assert!(record.file_size.unwrap() > 0);
    }

    #[test]
    fn custom_embedder_is_used() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::builder(config())
            .store(Arc::new(FileStore::open(tmp.path()).unwrap()))
            .embedder(Arc::new(HashEmbedder::new(12).unwrap()))
            .build()
            .unwrap();
        assert_eq!(kb.status().unwrap().model, "hash:12");
    }

    #[test]
    fn status_reports_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let kb = open(tmp.path());
        kb.add_document("a", "alpha").unwrap();
        kb.add_document("b", "beta").unwrap();

        let status = kb.status().unwrap();
        assert!(status.enabled);
        assert_eq!(status.state, EngineState::Ready);
        assert_eq!(status.documents, 2);
        assert_eq!(status.chunks, 2);
        assert_eq!(status.storage.as_deref(), Some(tmp.path()));
    }
}
