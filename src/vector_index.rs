//! In-memory vector index over embedded chunks.
//!
//! The index is append-only: entries are never removed in place. Removing a
//! document means building a new index with [`VectorIndex::rebuild_from`]
//! and swapping it in. Entries are reference counted so copying an index
//! before a mutation only copies pointers.
//!
//! Binary format of a persisted index:
//! - 4 bytes: magic `KBIX`
//! - 4 bytes: format version (u32 LE)
//! - 4 bytes: vector dimension D (u32 LE)
//! - 4 bytes + n bytes: embedding model id (length-prefixed UTF-8)
//! - 4 bytes: entry count (u32 LE)
//! - per entry: length-prefixed document id, length-prefixed chunk text,
//!   then D * 4 bytes of f32 values

use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};

use rayon::prelude::*;
use serde::Serialize;

use crate::{
    doc_id::{SENTINEL_ID, is_sentinel},
    embedding::Embedder,
    error::{Error, Result},
};

const MAGIC: &[u8; 4] = b"KBIX";
const FORMAT_VERSION: u32 = 1;

/// Text embedded for the sentinel entry.
pub const SENTINEL_TEXT: &str = "Knowledge Base Initialization";

/// One embedded chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub document_id: String,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A similarity match returned by [`VectorIndex::query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub chunk_text: String,
    pub document_id: String,
    pub score: f32,
}

/// A chunk waiting to be placed into a rebuilt index.
///
/// Chunks that already carry a vector are reused as-is; the others are
/// embedded during the rebuild.
#[derive(Debug, Clone)]
pub struct StagedChunk {
    pub text: String,
    pub vector: Option<Vec<f32>>,
}

/// All chunks of one document staged for a rebuild.
#[derive(Debug, Clone)]
pub struct StagedDocument {
    pub document_id: String,
    pub chunks: Vec<StagedChunk>,
}

impl StagedDocument {
    /// Stage freshly chunked text that still needs embedding.
    pub fn from_texts(document_id: &str, texts: Vec<String>) -> Self {
        Self {
            document_id: document_id.to_string(),
            chunks: texts
                .into_iter()
                .map(|text| StagedChunk { text, vector: None })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    model_id: String,
    dimension: usize,
    entries: Vec<Arc<IndexEntry>>,
}

impl VectorIndex {
    /// Create an index holding only the sentinel entry.
    pub fn with_sentinel(embedder: &dyn Embedder) -> Result<Self> {
        Self::rebuild_from(embedder, Vec::new())
    }

    /// Build a brand-new index from an explicit list of documents.
    ///
    /// The sentinel is always inserted first. Any staged document using the
    /// sentinel id is ignored. Embedding happens in a single batch before
    /// anything is assembled, so a provider failure produces no index.
    pub fn rebuild_from(
        embedder: &dyn Embedder,
        staged: Vec<StagedDocument>,
    ) -> Result<Self> {
        let mut pending = vec![SENTINEL_TEXT.to_string()];
        for doc in staged.iter().filter(|d| !is_sentinel(&d.document_id)) {
            pending.extend(
                doc.chunks
                    .iter()
                    .filter(|c| c.vector.is_none())
                    .map(|c| c.text.clone()),
            );
        }

        let embedded = embed_checked(embedder, &pending)?;
        let mut embedded = embedded.into_iter();
        let sentinel_vector = embedded.next().ok_or_else(|| {
            Error::Embedding("provider returned no vector".into())
        })?;
        let dimension = sentinel_vector.len();
        if dimension == 0 {
            return Err(Error::Embedding(
                "provider returned an empty vector".into(),
            ));
        }

        let mut entries = vec![Arc::new(IndexEntry {
            document_id: SENTINEL_ID.to_string(),
            text: SENTINEL_TEXT.to_string(),
            vector: sentinel_vector,
        })];

        for doc in staged {
            if is_sentinel(&doc.document_id) {
                continue;
            }
            for chunk in doc.chunks {
                let vector = match chunk.vector {
                    Some(vector) => vector,
                    None => embedded.next().ok_or_else(|| {
                        Error::Embedding(
                            "provider returned fewer vectors than texts".into(),
                        )
                    })?,
                };
                check_dimension(dimension, &vector)?;
                entries.push(Arc::new(IndexEntry {
                    document_id: doc.document_id.clone(),
                    text: chunk.text,
                    vector,
                }));
            }
        }

        Ok(Self {
            model_id: embedder.model_id().to_string(),
            dimension,
            entries,
        })
    }

    /// Embed `chunks` and append them under `document_id`.
    ///
    /// All chunks are embedded before the index is touched; on error the
    /// index is unchanged. Returns the number of appended entries.
    pub fn insert(
        &mut self,
        embedder: &dyn Embedder,
        document_id: &str,
        chunks: &[String],
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let vectors = embed_checked(embedder, chunks)?;
        for vector in &vectors {
            check_dimension(self.dimension, vector)?;
        }

        self.entries.extend(chunks.iter().zip(vectors).map(|(text, vector)| {
            Arc::new(IndexEntry {
                document_id: document_id.to_string(),
                text: text.clone(),
                vector,
            })
        }));
        Ok(chunks.len())
    }

    /// Embed `text` and return the `top_k` most similar entries.
    ///
    /// The sentinel takes part in scoring like any other entry; filtering it
    /// out is the caller's job.
    pub fn query(
        &self,
        embedder: &dyn Embedder,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<QueryHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query = embedder.embed_one(text)?;
        check_dimension(self.dimension, &query)?;
        Ok(self.query_vector(&query, top_k))
    }

    /// Rank entries by cosine similarity to `query`.
    ///
    /// Scores descend; equal scores keep insertion order.
    pub fn query_vector(&self, query: &[f32], top_k: usize) -> Vec<QueryHit> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .par_iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(query, &entry.vector)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let entry = &self.entries[i];
                QueryHit {
                    chunk_text: entry.text.clone(),
                    document_id: entry.document_id.clone(),
                    score,
                }
            })
            .collect()
    }

    /// Stage every real chunk except those of `excluded`, keeping vectors.
    pub fn staged_without(&self, excluded: &str) -> Vec<StagedDocument> {
        let mut staged: Vec<StagedDocument> = Vec::new();
        for entry in self.real_entries() {
            if entry.document_id == excluded {
                continue;
            }
            let chunk = StagedChunk {
                text: entry.text.clone(),
                vector: Some(entry.vector.clone()),
            };
            match staged.last_mut() {
                Some(doc) if doc.document_id == entry.document_id => {
                    doc.chunks.push(chunk);
                }
                _ => staged.push(StagedDocument {
                    document_id: entry.document_id.clone(),
                    chunks: vec![chunk],
                }),
            }
        }
        staged
    }

    /// Stage the existing chunks of one document, keeping vectors.
    pub fn staged_document(&self, document_id: &str) -> StagedDocument {
        StagedDocument {
            document_id: document_id.to_string(),
            chunks: self
                .real_entries()
                .filter(|e| e.document_id == document_id)
                .map(|e| StagedChunk {
                    text: e.text.clone(),
                    vector: Some(e.vector.clone()),
                })
                .collect(),
        }
    }

    /// Number of real chunks held per document id.
    pub fn document_chunk_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.real_entries() {
            *counts.entry(entry.document_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn real_entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries
            .iter()
            .map(|e| e.as_ref())
            .filter(|e| !is_sentinel(&e.document_id))
    }

    /// Total entries, sentinel included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that belong to real documents.
    pub fn real_len(&self) -> usize {
        self.real_entries().count()
    }

    pub fn has_sentinel(&self) -> bool {
        self.entries.iter().any(|e| is_sentinel(&e.document_id))
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Serialize the full index state.
    pub fn encode(&self) -> Vec<u8> {
        let payload: usize = self
            .entries
            .iter()
            .map(|e| 8 + e.document_id.len() + e.text.len() + e.vector.len() * 4)
            .sum();
        let mut out = Vec::with_capacity(20 + self.model_id.len() + payload);

        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        write_str(&mut out, &self.model_id);
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for entry in &self.entries {
            write_str(&mut out, &entry.document_id);
            write_str(&mut out, &entry.text);
            out.extend_from_slice(bytemuck::cast_slice(&entry.vector));
        }
        out
    }

    /// Parse a persisted index. Any structural problem is reported as
    /// [`Error::CorruptIndex`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader { bytes, pos: 0 };

        if reader.take(4)? != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = reader.u32()?;
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!("unsupported version {version}")));
        }
        let dimension = reader.u32()? as usize;
        if dimension == 0 {
            return Err(corrupt("zero vector dimension"));
        }
        let model_id = reader.string()?;
        let count = reader.u32()? as usize;

        let mut entries = Vec::with_capacity(count.min(bytes.len() / 8));
        for _ in 0..count {
            let document_id = reader.string()?;
            let text = reader.string()?;
            let raw = reader.take(dimension * 4)?;
            let vector: Vec<f32> = bytemuck::pod_collect_to_vec(raw);
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(corrupt("non-finite vector component"));
            }
            entries.push(Arc::new(IndexEntry {
                document_id,
                text,
                vector,
            }));
        }

        if reader.pos != bytes.len() {
            return Err(corrupt("trailing bytes after last entry"));
        }

        Ok(Self {
            model_id,
            dimension,
            entries,
        })
    }
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

fn embed_checked(
    embedder: &dyn Embedder,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let vectors = embedder.embed(texts)?;
    if vectors.len() != texts.len() {
        return Err(Error::Embedding(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }
    Ok(vectors)
}

fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::Embedding(format!(
            "vector dimension mismatch: expected {expected}, got {}",
            vector.len()
        )));
    }
    Ok(())
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn corrupt(reason: &str) -> Error {
    Error::CorruptIndex(reason.to_string())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| corrupt("unexpected end of data"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| corrupt("invalid UTF-8"))
    }
}
