//! Durable storage for the two persisted artifacts.
//!
//! Each write replaces an artifact atomically: readers see either the old
//! bytes or the new bytes, never a partial write.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    config::StorageBackend,
    data_dir::DataDir,
    error::{Error, Result},
    redb_store::RedbStore,
};

/// The artifacts a knowledge base persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blob {
    /// Serialized vector index.
    Index,
    /// Serialized document catalog.
    Catalog,
}

impl Blob {
    pub fn name(self) -> &'static str {
        match self {
            Blob::Index => "index",
            Blob::Catalog => "catalog",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Blob::Index => "index.bin",
            Blob::Catalog => "catalog.json",
        }
    }
}

/// Byte storage with atomic replace semantics.
pub trait DurableStore: Send + Sync {
    /// Read an artifact; `Ok(None)` if it has never been written.
    fn read(&self, blob: Blob) -> Result<Option<Vec<u8>>>;

    /// Atomically replace an artifact.
    fn write(&self, blob: Blob, bytes: &[u8]) -> Result<()>;

    /// Remove an artifact. Removing a missing artifact is not an error.
    fn remove(&self, blob: Blob) -> Result<()>;
}

/// Open the store selected by `backend` inside `data_dir`.
pub fn open_store(
    backend: StorageBackend,
    data_dir: &DataDir,
) -> Result<Arc<dyn DurableStore>> {
    let store: Arc<dyn DurableStore> = match backend {
        StorageBackend::Files => Arc::new(FileStore::open(data_dir.root())?),
        StorageBackend::Redb => Arc::new(RedbStore::open(&data_dir.redb_path())?),
    };
    Ok(store)
}

/// Stores each artifact as a file, replaced via write-to-temp + rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|_| Error::DataDir(root.to_path_buf()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path(&self, blob: Blob) -> PathBuf {
        self.root.join(blob.file_name())
    }
}

impl DurableStore for FileStore {
    fn read(&self, blob: Blob) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path(blob)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, blob: Blob, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(blob)).map_err(|e| Error::Io(e.error))?;
        tracing::debug!(artifact = blob.name(), bytes = bytes.len(), "persisted");
        Ok(())
    }

    fn remove(&self, blob: Blob) -> Result<()> {
        match fs::remove_file(self.path(blob)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
