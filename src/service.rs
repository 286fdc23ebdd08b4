//! Async handle over a shared [`KnowledgeBase`].
//!
//! Every operation runs on tokio's blocking pool. Once started, a mutation
//! runs to completion (or rolls back) even if the future awaiting it is
//! dropped, so cancelling a caller never leaves the index and catalog out
//! of step.

use std::{path::PathBuf, sync::Arc};

use tokio::task::spawn_blocking;

use crate::{
    catalog::DocumentRecord,
    error::Result,
    knowledge_base::{AddOutcome, DocumentInfo, KnowledgeBase, Status},
    recovery::RebuildReport,
    vector_index::QueryHit,
};

#[derive(Debug, Clone)]
pub struct AsyncKnowledgeBase {
    inner: Arc<KnowledgeBase>,
}

impl AsyncKnowledgeBase {
    pub fn new(inner: Arc<KnowledgeBase>) -> Self {
        Self { inner }
    }

    /// The wrapped engine, for synchronous callers.
    pub fn inner(&self) -> &Arc<KnowledgeBase> {
        &self.inner
    }

    pub async fn initialize(&self) -> Result<()> {
        self.run(|kb| kb.initialize()).await
    }

    pub async fn add_document(&self, document_id: String, text: String) -> Result<AddOutcome> {
        self.run(move |kb| kb.add_document(&document_id, &text)).await
    }

    pub async fn add_file(
        &self,
        path: PathBuf,
        document_id: Option<String>,
    ) -> Result<AddOutcome> {
        self.run(move |kb| kb.add_file(&path, document_id.as_deref()))
            .await
    }

    pub async fn delete_document(&self, document_id: String) -> Result<DocumentRecord> {
        self.run(move |kb| kb.delete_document(&document_id)).await
    }

    pub async fn set_document_enabled(&self, document_id: String, enabled: bool) -> Result<()> {
        self.run(move |kb| kb.set_document_enabled(&document_id, enabled))
            .await
    }

    pub async fn rebuild(&self) -> Result<RebuildReport> {
        self.run(|kb| kb.rebuild()).await
    }

    pub async fn list_all_documents(&self) -> Result<Vec<String>> {
        self.run(|kb| kb.list_all_documents()).await
    }

    pub async fn documents(&self) -> Result<Vec<DocumentInfo>> {
        self.run(|kb| kb.documents()).await
    }

    pub async fn query(&self, text: String, top_k: usize) -> Result<Vec<QueryHit>> {
        self.run(move |kb| kb.query(&text, top_k)).await
    }

    pub async fn status(&self) -> Result<Status> {
        self.run(|kb| kb.status()).await
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&KnowledgeBase) -> Result<T> + Send + 'static,
    {
        let kb = Arc::clone(&self.inner);
        spawn_blocking(move || op(&kb)).await?
    }
}

impl From<KnowledgeBase> for AsyncKnowledgeBase {
    fn from(kb: KnowledgeBase) -> Self {
        Self::new(Arc::new(kb))
    }
}
