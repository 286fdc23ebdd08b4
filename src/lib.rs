//! kbase - a local retrieval knowledge base.
//!
//! Documents are split into overlapping chunks, embedded, and kept in an
//! in-memory vector index that is persisted next to a JSON catalog of the
//! stored documents. Queries return the chunks most similar to a piece of
//! text, ready to be used as context for a language model prompt.
//!
//! The catalog is the source of truth. On startup the engine compares it
//! against the persisted index and rebuilds the index when the two disagree
//! (missing or corrupted index, model change, interrupted write).
//!
//! # Quick start
//!
//! ```no_run
//! use kbase::{KbConfig, KnowledgeBase};
//!
//! let config = KbConfig {
//!     embedding_model: "hash:384".to_string(),
//!     ..KbConfig::from_env().unwrap()
//! };
//! let kb = KnowledgeBase::open(config).unwrap();
//!
//! kb.add_document("pasta.txt", "Boil the pasta in salted water.").unwrap();
//! for hit in kb.query("how do I cook pasta?", 3).unwrap() {
//!     println!("{} ({:.3}): {}", hit.document_id, hit.score, hit.chunk_text);
//! }
//! ```

pub mod catalog;
pub mod chunking;
pub mod config;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod knowledge_base;
pub mod model_manager;
pub mod recovery;
pub mod redb_store;
pub mod service;
pub mod source;
pub mod store;
pub mod text_util;
pub mod vector_index;
pub mod walker;

pub use catalog::{Catalog, DocumentRecord};
pub use config::{KbConfig, StorageBackend};
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use embedding::{Embedder, HashEmbedder};
pub use error::{Error, Result};
pub use extract::{ContentExtractor, ExtractorRegistry, TypeHint};
pub use knowledge_base::{AddOutcome, DocumentInfo, KnowledgeBase, Status};
pub use model_manager::ColbertEmbedder;
pub use recovery::{EngineState, RebuildReport};
pub use redb_store::RedbStore;
pub use service::AsyncKnowledgeBase;
pub use source::{FileSourceLocator, SourceLocator};
pub use store::{Blob, DurableStore, FileStore};
pub use vector_index::{QueryHit, VectorIndex};
