use std::sync::Mutex;

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;

use crate::{
    embedding::{Embedder, l2_normalize},
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Manages the ColBERT model lifecycle, supporting lazy loading on first use.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl ModelManager {
    /// The model is not loaded until the first call to `encode_documents`.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        if self.model.is_none() {
            tracing::info!(model = %self.model_id, "loading ColBERT model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| {
                    Error::Embedding(format!(
                        "failed to load model {}: {e}",
                        self.model_id
                    ))
                })?;
            self.model = Some(colbert);
        }

        self.model
            .as_mut()
            .ok_or_else(|| Error::Embedding("model not loaded".into()))
    }

    /// Encodes document texts into ColBERT token-level embeddings
    /// (`[batch, tokens, dimension]`).
    pub fn encode_documents(&mut self, texts: &[String]) -> Result<Tensor> {
        let model = self.ensure_loaded()?;
        model
            .encode(texts, false)
            .map_err(|e| Error::Embedding(format!("encoding failed: {e}")))
    }
}

/// [`Embedder`] backed by a ColBERT model.
///
/// ColBERT produces one vector per token; each text is reduced to a single
/// vector by averaging its token vectors and L2-normalizing the mean.
pub struct ColbertEmbedder {
    model_id: String,
    manager: Mutex<ModelManager>,
}

impl ColbertEmbedder {
    pub fn new(model_id: String) -> Self {
        Self {
            manager: Mutex::new(ModelManager::with_model_id(model_id.clone())),
            model_id,
        }
    }
}

impl Embedder for ColbertEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut manager = self
            .manager
            .lock()
            .map_err(|_| Error::Embedding("model lock poisoned".into()))?;
        let embeddings = manager.encode_documents(texts)?;

        let (batch_size, _tokens, _dimension) =
            embeddings.dims3().map_err(tensor_error)?;
        if batch_size != texts.len() {
            return Err(Error::Embedding(format!(
                "model returned {batch_size} embeddings for {} texts",
                texts.len()
            )));
        }

        (0..batch_size)
            .map(|i| {
                let pooled = embeddings
                    .get(i)
                    .and_then(|doc| doc.mean(0))
                    .map_err(tensor_error)?;
                let mut vector = tensor_to_vec(&pooled)?;
                l2_normalize(&mut vector);
                Ok(vector)
            })
            .collect()
    }
}

fn tensor_to_vec(tensor: &Tensor) -> Result<Vec<f32>> {
    tensor
        .flatten_all()
        .and_then(|t| t.to_vec1::<f32>())
        .map_err(tensor_error)
}

fn tensor_error(e: candle_core::Error) -> Error {
    Error::Embedding(format!("unexpected embedding tensor: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_model_id() {
        let manager = ModelManager::with_model_id("custom/model".to_string());
        assert_eq!(manager.model_id, "custom/model");
        assert!(manager.model.is_none());
    }

    #[test]
    fn embedder_reports_model_id_without_loading() {
        let embedder = ColbertEmbedder::new(DEFAULT_MODEL_ID.to_string());
        assert_eq!(embedder.model_id(), DEFAULT_MODEL_ID);
        assert!(embedder.manager.lock().unwrap().model.is_none());
    }

    #[test]
    fn empty_batch_does_not_load_model() {
        let embedder = ColbertEmbedder::new("does/not-exist".to_string());
        assert!(embedder.embed(&[]).unwrap().is_empty());
        assert!(embedder.manager.lock().unwrap().model.is_none());
    }
}
