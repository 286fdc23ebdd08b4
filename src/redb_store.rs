use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    error::Result,
    store::{Blob, DurableStore},
};

const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");

/// [`DurableStore`] keeping both artifacts in a single redb database.
///
/// Every write is its own transaction, so a crash leaves the previous
/// committed value in place.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(BLOBS)?;
        txn.commit()?;

        Ok(Self { db })
    }
}

impl DurableStore for RedbStore {
    fn read(&self, blob: Blob) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(BLOBS)?;
        Ok(table.get(blob.name())?.map(|v| v.value().to_vec()))
    }

    fn write(&self, blob: Blob, bytes: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(BLOBS)?;
            table.insert(blob.name(), bytes)?;
        }
        txn.commit()?;
        tracing::debug!(artifact = blob.name(), bytes = bytes.len(), "persisted");
        Ok(())
    }

    fn remove(&self, blob: Blob) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(BLOBS)?;
            table.remove(blob.name())?;
        }
        txn.commit()?;
        Ok(())
    }
}
