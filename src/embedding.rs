//! Embedding providers.
//!
//! An [`Embedder`] maps chunk text to fixed-dimension vectors. The index
//! records the provider's [`Embedder::model_id`] so vectors produced by a
//! different model are never compared against each other.

use std::sync::Arc;

use crate::{
    error::{Error, Result},
    model_manager::ColbertEmbedder,
};

/// Prefix selecting the built-in [`HashEmbedder`] (e.g. `hash:384`).
pub const HASH_MODEL_PREFIX: &str = "hash";

/// Dimension used by `hash` without an explicit size.
pub const DEFAULT_HASH_DIMENSION: usize = 384;

/// Maps text to embedding vectors.
pub trait Embedder: Send + Sync {
    /// Stable identifier of the model producing the vectors.
    fn model_id(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?.pop().ok_or_else(|| {
            Error::Embedding("provider returned no vector".into())
        })
    }
}

/// Build the embedder named by a model identifier.
///
/// `hash` / `hash:<dims>` select the feature-hashing embedder; anything else
/// is treated as a ColBERT model id or local model path.
pub fn embedder_for(model_id: &str) -> Result<Arc<dyn Embedder>> {
    if let Some(rest) = model_id.strip_prefix(HASH_MODEL_PREFIX) {
        let dimension = match rest.strip_prefix(':') {
            Some(dims) => dims.parse().map_err(|_| {
                Error::Config(format!("invalid hash embedder size: {dims}"))
            })?,
            None if rest.is_empty() => DEFAULT_HASH_DIMENSION,
            None => {
                return Ok(Arc::new(ColbertEmbedder::new(model_id.to_string())));
            }
        };
        return Ok(Arc::new(HashEmbedder::new(dimension)?));
    }
    Ok(Arc::new(ColbertEmbedder::new(model_id.to_string())))
}

/// Deterministic bag-of-words embedder based on feature hashing.
///
/// Every lowercase alphanumeric token is hashed into one of `dimension`
/// buckets with a hash-derived sign; the result is L2-normalized. Texts that
/// share vocabulary get a positive cosine similarity. No model download is
/// needed, which makes it the embedder of choice for tests and offline use.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "hash embedder dimension must be greater than zero".into(),
            ));
        }
        Ok(Self {
            dimension,
            model_id: format!("{HASH_MODEL_PREFIX}:{dimension}"),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = token_hash(&token.to_lowercase());

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// First eight bytes of the token's BLAKE3 digest, little-endian.
///
/// Persisted vectors depend on this value, so it must not vary between
/// builds.
fn token_hash(token: &str) -> u64 {
    let digest = blake3::hash(token.as_bytes());
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(word)
}

/// Scale `vector` to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
