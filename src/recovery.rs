//! Startup consistency checks and index reconstruction.
//!
//! The catalog is the authority on which documents exist. At startup both
//! artifacts are read and compared; when the index is missing, corrupted,
//! built by another embedding model, or disagrees with the catalog, it is
//! rebuilt from the catalog. Documents whose chunks can't be recovered are
//! dropped from the catalog.

use std::fmt;

use serde::Serialize;

use crate::{
    catalog::{Catalog, DocumentRecord},
    chunking::ChunkingConfig,
    embedding::Embedder,
    error::{Error, Result},
    source::SourceLocator,
    store::{Blob, DurableStore},
    vector_index::{StagedChunk, StagedDocument, VectorIndex},
};

/// Lifecycle of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Loading,
    FreshEmpty,
    Rebuilding,
    Ready,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Loading => "loading",
            Self::FreshEmpty => "fresh_empty",
            Self::Rebuilding => "rebuilding",
            Self::Ready => "ready",
        })
    }
}

/// What startup found in storage.
#[derive(Debug)]
pub enum LoadPlan {
    /// Neither artifact exists.
    FreshEmpty,
    /// Both artifacts agree and can be used directly.
    Ready { index: VectorIndex, catalog: Catalog },
    /// The index has to be rebuilt from the catalog.
    Rebuild {
        catalog: Catalog,
        /// The decoded index, when there was one, for salvaging chunks.
        loaded: Option<VectorIndex>,
        reason: String,
    },
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Documents present in the rebuilt index.
    pub restored: Vec<String>,
    /// Documents removed from the catalog because their content was lost.
    pub dropped: Vec<String>,
}

#[derive(Debug)]
pub struct Rebuilt {
    pub index: VectorIndex,
    pub catalog: Catalog,
    pub report: RebuildReport,
}

/// Borrowed collaborators needed to load or rebuild an engine.
pub struct Recovery<'a> {
    pub store: &'a dyn DurableStore,
    pub embedder: &'a dyn Embedder,
    pub locator: &'a dyn SourceLocator,
    pub chunking: ChunkingConfig,
}

impl Recovery<'_> {
    /// Read both artifacts and decide how to reach `Ready`.
    ///
    /// A corrupted catalog is an error; a corrupted index only forces a
    /// rebuild.
    pub fn inspect(&self) -> Result<LoadPlan> {
        let catalog = match self.store.read(Blob::Catalog)? {
            Some(bytes) => Some(Catalog::from_json(&bytes)?),
            None => None,
        };

        let index = match self.store.read(Blob::Index)? {
            Some(bytes) => match VectorIndex::decode(&bytes) {
                Ok(index) => Ok(index),
                Err(Error::CorruptIndex(reason)) => Err(reason),
                Err(e) => return Err(e),
            },
            None => Err("index artifact is missing".to_string()),
        };

        let plan = match (catalog, index) {
            (None, Err(_)) => LoadPlan::FreshEmpty,
            (catalog, Err(reason)) => LoadPlan::Rebuild {
                catalog: catalog.unwrap_or_default(),
                loaded: None,
                reason,
            },
            (catalog, Ok(index)) => {
                let catalog = catalog.unwrap_or_default();
                match self.divergence(&index, &catalog) {
                    Some(reason) => LoadPlan::Rebuild {
                        catalog,
                        loaded: Some(index),
                        reason,
                    },
                    None => LoadPlan::Ready { index, catalog },
                }
            }
        };
        Ok(plan)
    }

    /// Why `index` can't be used with `catalog`, if it can't.
    pub fn divergence(
        &self,
        index: &VectorIndex,
        catalog: &Catalog,
    ) -> Option<String> {
        if index.model_id() != self.embedder.model_id() {
            return Some(format!(
                "index was built by model '{}', engine uses '{}'",
                index.model_id(),
                self.embedder.model_id()
            ));
        }
        if !index.has_sentinel() {
            return Some("index is missing its sentinel entry".into());
        }
        if index.real_len() == 0 && !catalog.is_empty() {
            return Some("index holds no documents but the catalog does".into());
        }

        let in_index = index.document_chunk_counts();
        let in_catalog = catalog.chunk_counts();
        if in_index != in_catalog {
            let orphans = in_index
                .keys()
                .filter(|id| !in_catalog.contains_key(*id))
                .count();
            let missing = in_catalog
                .keys()
                .filter(|id| !in_index.contains_key(*id))
                .count();
            return Some(format!(
                "index and catalog disagree ({orphans} orphaned, {missing} missing, \
                 or chunk counts differ)"
            ));
        }
        None
    }

    /// Create and persist a sentinel-only index and an empty catalog.
    pub fn fresh(&self) -> Result<(VectorIndex, Catalog)> {
        let index = VectorIndex::with_sentinel(self.embedder)?;
        let catalog = Catalog::new();
        persist(self.store, &index, &catalog, None)?;
        Ok((index, catalog))
    }

    /// Rebuild the index for every document in `catalog` and persist both
    /// artifacts.
    ///
    /// Per document, in order of preference:
    /// 1. reuse the chunks and vectors of `loaded` when it holds exactly the
    ///    catalogued chunk count and its vectors come from the current model
    ///    (skipped when `reextract` is set);
    /// 2. re-extract the source through the locator and re-chunk it;
    /// 3. re-embed the chunk texts of `loaded` when the count still matches;
    /// 4. otherwise drop the document.
    ///
    /// An embedding failure aborts the rebuild before anything is written.
    /// If the catalog write fails, the index artifact is put back to
    /// `previous_index`.
    pub fn rebuild(
        &self,
        catalog: &Catalog,
        loaded: Option<&VectorIndex>,
        reextract: bool,
        previous_index: Option<&[u8]>,
    ) -> Result<Rebuilt> {
        let vectors_usable = loaded.is_some_and(|index| {
            !reextract && index.model_id() == self.embedder.model_id()
        });
        let loaded_counts = loaded
            .map(|index| index.document_chunk_counts())
            .unwrap_or_default();

        let mut staged = Vec::new();
        let mut rebuilt_catalog = Catalog::new();
        let mut report = RebuildReport::default();

        for (id, record) in catalog.iter() {
            let intact = loaded_counts.get(id) == Some(&record.chunk_count);

            let document = match loaded {
                Some(index) if intact && vectors_usable => {
                    Some(index.staged_document(id))
                }
                _ => self.reextract(id, record).or_else(|| {
                    loaded
                        .filter(|_| intact)
                        .map(|index| strip_vectors(index.staged_document(id)))
                }),
            };

            match document {
                Some(document) if !document.chunks.is_empty() => {
                    let mut record = record.clone();
                    record.chunk_count = document.chunks.len();
                    rebuilt_catalog.put(id, record);
                    report.restored.push(id.to_string());
                    staged.push(document);
                }
                _ => {
                    tracing::warn!(
                        document = id,
                        "dropping document, content is unrecoverable"
                    );
                    report.dropped.push(id.to_string());
                }
            }
        }

        let index = VectorIndex::rebuild_from(self.embedder, staged)?;
        persist(self.store, &index, &rebuilt_catalog, previous_index)?;

        tracing::info!(
            restored = report.restored.len(),
            dropped = report.dropped.len(),
            chunks = index.real_len(),
            "index rebuilt"
        );

        Ok(Rebuilt {
            index,
            catalog: rebuilt_catalog,
            report,
        })
    }

    fn reextract(
        &self,
        id: &str,
        record: &DocumentRecord,
    ) -> Option<StagedDocument> {
        let text = match self.locator.locate(id, record) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(
                    document = id,
                    error = %e,
                    "re-extraction failed"
                );
                return None;
            }
        };

        let chunks: Vec<String> = self
            .chunking
            .chunk(&text)
            .into_iter()
            .map(|c| c.text)
            .collect();
        if chunks.is_empty() {
            return None;
        }
        Some(StagedDocument::from_texts(id, chunks))
    }
}

fn strip_vectors(document: StagedDocument) -> StagedDocument {
    StagedDocument {
        document_id: document.document_id,
        chunks: document
            .chunks
            .into_iter()
            .map(|c| StagedChunk {
                text: c.text,
                vector: None,
            })
            .collect(),
    }
}

/// Write the index, then the catalog.
///
/// When the catalog write fails the index artifact is put back to
/// `previous_index` (or removed when there was none) so the two artifacts
/// keep describing the same state.
pub(crate) fn persist(
    store: &dyn DurableStore,
    index: &VectorIndex,
    catalog: &Catalog,
    previous_index: Option<&[u8]>,
) -> Result<()> {
    let catalog_bytes = catalog.to_json()?;
    store.write(Blob::Index, &index.encode())?;

    if let Err(e) = store.write(Blob::Catalog, &catalog_bytes) {
        let restored = match previous_index {
            Some(bytes) => store.write(Blob::Index, bytes),
            None => store.remove(Blob::Index),
        };
        if let Err(restore_err) = restored {
            tracing::warn!(
                error = %restore_err,
                "failed to restore previous index artifact"
            );
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        embedding::HashEmbedder,
        source::{FileSourceLocator, NoSourceLocator},
        store::FileStore,
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: FileStore,
        embedder: HashEmbedder,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let store = FileStore::open(tmp.path()).unwrap();
            Self {
                _tmp: tmp,
                store,
                embedder: HashEmbedder::new(32).unwrap(),
            }
        }

        fn recovery<'a>(
            &'a self,
            locator: &'a dyn SourceLocator,
        ) -> Recovery<'a> {
            Recovery {
                store: &self.store,
                embedder: &self.embedder,
                locator,
                chunking: ChunkingConfig::new(40, 5).unwrap(),
            }
        }

        fn seed(&self, docs: &[(&str, &[&str])]) -> (VectorIndex, Catalog) {
            let mut index = VectorIndex::with_sentinel(&self.embedder).unwrap();
            let mut catalog = Catalog::new();
            for (id, chunks) in docs {
                let chunks: Vec<String> =
                    chunks.iter().map(|s| s.to_string()).collect();
                index.insert(&self.embedder, id, &chunks).unwrap();
                catalog.put(id, DocumentRecord::new(chunks.len()));
            }
            persist(&self.store, &index, &catalog, None).unwrap();
            (index, catalog)
        }
    }

    #[test]
    fn empty_storage_is_fresh() {
        let fx = Fixture::new();
        let recovery = fx.recovery(&NoSourceLocator);
        assert!(matches!(recovery.inspect().unwrap(), LoadPlan::FreshEmpty));

        let (index, catalog) = recovery.fresh().unwrap();
        assert_eq!(index.len(), 1);
        assert!(catalog.is_empty());
        assert!(fx.store.read(Blob::Index).unwrap().is_some());
        assert!(fx.store.read(Blob::Catalog).unwrap().is_some());
    }

    #[test]
    fn consistent_artifacts_are_ready() {
        let fx = Fixture::new();
        fx.seed(&[("a", &["alpha one", "alpha two"])]);
        let plan = fx.recovery(&NoSourceLocator).inspect().unwrap();
        match plan {
            LoadPlan::Ready { index, catalog } => {
                assert_eq!(index.real_len(), 2);
                assert_eq!(catalog.len(), 1);
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_index_forces_rebuild() {
        let fx = Fixture::new();
        fx.seed(&[("a", &["alpha"])]);
        fx.store.write(Blob::Index, b"garbage").unwrap();
        assert!(matches!(
            fx.recovery(&NoSourceLocator).inspect().unwrap(),
            LoadPlan::Rebuild { loaded: None, .. }
        ));
    }

    #[test]
    fn missing_index_forces_rebuild() {
        let fx = Fixture::new();
        fx.seed(&[("a", &["alpha"])]);
        fx.store.remove(Blob::Index).unwrap();
        assert!(matches!(
            fx.recovery(&NoSourceLocator).inspect().unwrap(),
            LoadPlan::Rebuild { .. }
        ));
    }

    #[test]
    fn corrupt_catalog_is_an_error() {
        let fx = Fixture::new();
        fx.seed(&[("a", &["alpha"])]);
        fx.store.write(Blob::Catalog, b"[[[").unwrap();
        assert!(matches!(
            fx.recovery(&NoSourceLocator).inspect(),
            Err(Error::CorruptCatalog(_))
        ));
    }

    #[test]
    fn missing_catalog_turns_entries_into_orphans() {
        let fx = Fixture::new();
        fx.seed(&[("a", &["alpha"])]);
        fx.store.remove(Blob::Catalog).unwrap();
        let recovery = fx.recovery(&NoSourceLocator);
        let LoadPlan::Rebuild {
            catalog, loaded, ..
        } = recovery.inspect().unwrap()
        else {
            panic!("expected rebuild");
        };
        assert!(catalog.is_empty());

        let rebuilt = recovery
            .rebuild(&catalog, loaded.as_ref(), false, None)
            .unwrap();
        assert_eq!(rebuilt.index.len(), 1);
        assert!(rebuilt.catalog.is_empty());
    }

    #[test]
    fn model_change_forces_rebuild() {
        let fx = Fixture::new();
        fx.seed(&[("a", &["alpha"])]);
        let other = HashEmbedder::new(16).unwrap();
        let recovery = Recovery {
            store: &fx.store,
            embedder: &other,
            locator: &NoSourceLocator,
            chunking: ChunkingConfig::default(),
        };
        let LoadPlan::Rebuild {
            catalog, loaded, ..
        } = recovery.inspect().unwrap()
        else {
            panic!("expected rebuild");
        };

        // chunk texts survive, vectors are recomputed with the new model
        let rebuilt = recovery
            .rebuild(&catalog, loaded.as_ref(), false, None)
            .unwrap();
        assert_eq!(rebuilt.index.model_id(), "hash:16");
        assert_eq!(rebuilt.index.dimension(), 16);
        assert_eq!(rebuilt.report.restored, vec!["a"]);
    }

    #[test]
    fn chunk_count_mismatch_is_divergence() {
        let fx = Fixture::new();
        let (index, mut catalog) = fx.seed(&[("a", &["one", "two"])]);
        catalog.put("a", DocumentRecord::new(3));
        assert!(
            fx.recovery(&NoSourceLocator)
                .divergence(&index, &catalog)
                .is_some()
        );
    }

    #[test]
    fn rebuild_reuses_intact_documents() {
        let fx = Fixture::new();
        let (index, catalog) = fx.seed(&[("a", &["alpha"]), ("b", &["beta"])]);
        let rebuilt = fx
            .recovery(&NoSourceLocator)
            .rebuild(&catalog, Some(&index), false, None)
            .unwrap();
        assert_eq!(rebuilt.report.restored, vec!["a", "b"]);
        assert!(rebuilt.report.dropped.is_empty());
        assert_eq!(rebuilt.index.real_len(), 2);
    }

    #[test]
    fn rebuild_reextracts_from_sources_and_drops_the_rest() {
        let fx = Fixture::new();
        let src = tempfile::tempdir().unwrap();
        let path = src.path().join("kept.txt");
        std::fs::write(&path, "the source of this document is still on disk")
            .unwrap();

        let mut catalog = Catalog::new();
        let mut kept = DocumentRecord::new(1);
        kept.source = Some(path);
        catalog.put("kept.txt", kept);
        let mut lost = DocumentRecord::new(1);
        lost.source = Some(PathBuf::from("/nonexistent/lost.txt"));
        catalog.put("lost.txt", lost);

        let locator = FileSourceLocator::default();
        let rebuilt = fx
            .recovery(&locator)
            .rebuild(&catalog, None, false, None)
            .unwrap();

        assert_eq!(rebuilt.report.restored, vec!["kept.txt"]);
        assert_eq!(rebuilt.report.dropped, vec!["lost.txt"]);
        assert!(!rebuilt.catalog.contains("lost.txt"));

        let expected = ChunkingConfig::new(40, 5)
            .unwrap()
            .chunk("the source of this document is still on disk")
            .len();
        assert_eq!(
            rebuilt.catalog.get("kept.txt").unwrap().chunk_count,
            expected
        );
        assert_eq!(rebuilt.index.real_len(), expected);

        // persisted state matches
        let plan = fx.recovery(&locator).inspect().unwrap();
        assert!(matches!(plan, LoadPlan::Ready { .. }));
    }

    #[test]
    fn persist_restores_index_when_catalog_write_fails() {
        struct NoCatalog(FileStore);
        impl DurableStore for NoCatalog {
            fn read(&self, blob: Blob) -> Result<Option<Vec<u8>>> {
                self.0.read(blob)
            }
            fn write(&self, blob: Blob, bytes: &[u8]) -> Result<()> {
                if blob == Blob::Catalog {
                    return Err(Error::Io(std::io::Error::other("disk full")));
                }
                self.0.write(blob, bytes)
            }
            fn remove(&self, blob: Blob) -> Result<()> {
                self.0.remove(blob)
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let store = NoCatalog(FileStore::open(tmp.path()).unwrap());
        let embedder = HashEmbedder::new(8).unwrap();
        store.write(Blob::Index, b"previous").unwrap();

        let index = VectorIndex::with_sentinel(&embedder).unwrap();
        let err =
            persist(&store, &index, &Catalog::new(), Some(&b"previous"[..]));
        assert!(err.is_err());
        assert_eq!(store.read(Blob::Index).unwrap().unwrap(), b"previous");
    }
}
