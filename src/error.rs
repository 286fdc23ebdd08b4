use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("knowledge base is disabled")]
    Disabled,

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("document '{0}' has no text content")]
    EmptyContent(String),

    #[error("invalid document id '{id}': {reason}")]
    InvalidDocumentId { id: String, reason: &'static str },

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("failed to extract {kind} content: {message}")]
    Extraction { kind: &'static str, message: String },

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("vector index is corrupted: {0}")]
    CorruptIndex(String),

    #[error("document catalog is corrupted: {0}")]
    CorruptCatalog(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub(crate) fn not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "document",
            name: name.to_string(),
        }
    }
}
