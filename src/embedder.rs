//! fastembed adapter behind the `EmbeddingProvider` port.
//!
//! The model is CPU-bound and not `Sync`, so calls go through
//! `spawn_blocking` with the instance behind a `std::sync::Mutex`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::config::EmbeddingConfig;
use crate::error::{KestrelError, Result};
use crate::ports::EmbeddingProvider;

fn resolve_model(name: &str) -> EmbeddingModel {
    match name {
        "BGESmallENV15" | "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "BGEBaseENV15" | "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "AllMiniLML6V2" | "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
        other => {
            tracing::warn!(model = other, "unknown embedding model, using BGESmallENV15");
            EmbeddingModel::BGESmallENV15
        }
    }
}

fn model_dimension(model: &EmbeddingModel) -> usize {
    match model {
        EmbeddingModel::BGEBaseENV15 => 768,
        _ => 384, // BGESmallENV15, AllMiniLML6V2
    }
}

pub struct FastembedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl FastembedProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_kind = resolve_model(&config.model);
        let dimension = model_dimension(&model_kind);

        let cache_dir = config
            .cache_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join("fastembed")
            });
        std::fs::create_dir_all(&cache_dir).ok();

        let model = TextEmbedding::try_new(
            InitOptions::new(model_kind)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(false),
        )
        .map_err(|e| KestrelError::Embedding(e.to_string()))?;

        tracing::info!(model = %config.model, dimension, "embedding provider ready");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| KestrelError::Embedding(format!("model mutex poisoned: {e}")))?;
            guard
                .embed(texts, None)
                .map_err(|e| KestrelError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| KestrelError::Embedding(format!("embedding task failed: {e}")))?
    }
}

#[async_trait]
impl EmbeddingProvider for FastembedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_blocking(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| KestrelError::Embedding("provider returned no vector".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embed_blocking(texts.to_vec()).await?;
        if vectors.len() != texts.len() {
            return Err(KestrelError::Embedding(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    async fn health_check(&self) -> bool {
        self.embed_blocking(vec!["ping".to_string()]).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_resolve_with_fallback() {
        assert_eq!(model_dimension(&resolve_model("BGESmallENV15")), 384);
        assert_eq!(model_dimension(&resolve_model("bge-base-en-v1.5")), 768);
        assert_eq!(model_dimension(&resolve_model("nonsense")), 384);
    }

    // Model-dependent tests download weights on first run.

    #[tokio::test]
    #[ignore = "downloads the embedding model"]
    async fn embed_batch_preserves_order_and_length() {
        let provider = FastembedProvider::new(&EmbeddingConfig::default()).unwrap();
        let texts = vec![
            "first document".to_string(),
            "second document".to_string(),
            "third document".to_string(),
        ];
        let vectors = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        for vector in &vectors {
            assert_eq!(vector.len(), provider.dimension());
        }
    }

    #[tokio::test]
    #[ignore = "downloads the embedding model"]
    async fn health_check_reports_ready() {
        let provider = FastembedProvider::new(&EmbeddingConfig::default()).unwrap();
        assert!(provider.health_check().await);
    }
}
