//! Embedding provider implementations

use crate::config::{EmbedConfig, EmbedderIdentity, ProviderKind};
use crate::error::{EmbedError, Result};
use crate::hashing::HashingProvider;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result.
    ///
    /// The dimension is inferred from the first embedding vector, or 0 when
    /// there are no embeddings.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text
///
/// Implementations must be deterministic: the same text under the same
/// [`EmbedderIdentity`] always yields the same vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Identity recorded alongside any vectors this provider produces
    fn identity(&self) -> EmbedderIdentity;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Build the provider described by `config`.
pub async fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    tracing::info!(
        "Creating {} embedding provider for model {}",
        config.provider,
        config.model_name()
    );

    match config.provider {
        ProviderKind::Hashing => Ok(Arc::new(HashingProvider::new(config.clone())?)),
        #[cfg(feature = "fastembed")]
        ProviderKind::FastEmbed => Ok(Arc::new(
            fastembed_provider::FastEmbedProvider::create(config.clone()).await?,
        )),
        #[cfg(not(feature = "fastembed"))]
        ProviderKind::FastEmbed => Err(EmbedError::invalid_config(
            "fastembed provider requested but the `fastembed` feature is not enabled",
        )),
    }
}

/// L2-normalise a vector in place. Zero vectors are left untouched.
pub(crate) fn normalize_in_place(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(feature = "fastembed")]
pub use fastembed_provider::FastEmbedProvider;

#[cfg(feature = "fastembed")]
mod fastembed_provider {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use fnv::FnvHasher;
    use std::collections::HashMap;
    use std::hash::Hasher;
    use std::sync::{Mutex, OnceLock};

    /// Type alias for cached model entries (model, dimension)
    type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

    /// Global cache for initialized embedding models to avoid reloading
    static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

    fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
        MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    fn poisoned() -> EmbedError {
        EmbedError::External {
            source: anyhow::anyhow!("embedding model lock poisoned"),
        }
    }

    /// Map a configured model name onto a built-in fastembed model.
    fn builtin_model(model_name: &str) -> Result<EmbeddingModel> {
        match model_name {
            "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
                Ok(EmbeddingModel::AllMiniLML6V2)
            }
            other => Err(EmbedError::invalid_config(format!(
                "unsupported fastembed model: {other}"
            ))),
        }
    }

    /// FastEmbed-based embedding provider using real ONNX models
    #[derive(Clone)]
    pub struct FastEmbedProvider {
        config: EmbedConfig,
        model: Arc<Mutex<TextEmbedding>>,
        dimension: usize,
    }

    impl std::fmt::Debug for FastEmbedProvider {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FastEmbedProvider")
                .field("config", &self.config)
                .field("dimension", &self.dimension)
                .finish()
        }
    }

    impl FastEmbedProvider {
        /// Loads the embedding model, reusing a cached instance when possible.
        pub async fn create(config: EmbedConfig) -> Result<Self> {
            let model_kind = builtin_model(config.model_name())?;
            let cache_key = create_cache_key(&config)?;

            let cached = {
                let cache = get_model_cache().lock().map_err(|_| poisoned())?;
                cache
                    .get(&cache_key)
                    .map(|(model, dim)| (Arc::clone(model), *dim))
            };

            let (model, dimension) = match cached {
                Some(entry) => {
                    tracing::info!("Using cached model for: {}", config.model_name());
                    entry
                }
                None => {
                    let name = config.model_name().to_string();
                    let (model, dimension) =
                        tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                            tracing::info!("Loading embedding model: {}", name);

                            let init_options =
                                InitOptions::new(model_kind).with_show_download_progress(false);
                            let mut model = TextEmbedding::try_new(init_options).map_err(|e| {
                                EmbedError::ModelInitialization { source: e.into() }
                            })?;

                            // Get dimension by generating a test embedding
                            let test_embeddings = model
                                .embed(vec!["test".to_string()], None)
                                .map_err(|e| EmbedError::ModelInitialization { source: e.into() })?;
                            let dimension =
                                test_embeddings.first().map(|emb| emb.len()).unwrap_or(0);

                            tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                            Ok((model, dimension))
                        })
                        .await??;

                    let model = Arc::new(Mutex::new(model));
                    get_model_cache()
                        .lock()
                        .map_err(|_| poisoned())?
                        .insert(cache_key, (Arc::clone(&model), dimension));
                    (model, dimension)
                }
            };

            if dimension != config.dimension {
                return Err(EmbedError::invalid_config(format!(
                    "model {} produces {}-dimensional vectors but {} were configured",
                    config.model_name(),
                    dimension,
                    config.dimension
                )));
            }

            Ok(Self {
                config,
                model,
                dimension,
            })
        }

        /// Clears the global model cache.
        pub fn clear_cache() {
            if let Ok(mut cache) = get_model_cache().lock() {
                cache.clear();
                tracing::info!("Model cache cleared");
            }
        }

        /// Returns the number of cached models.
        pub fn cache_size() -> usize {
            get_model_cache().lock().map(|c| c.len()).unwrap_or(0)
        }
    }

    /// Create a cache key based on the model configuration
    fn create_cache_key(config: &EmbedConfig) -> Result<String> {
        let config_json = serde_json::to_string(&(
            config.provider,
            &config.model_name,
            &config.model_version,
        ))
        .map_err(|e| EmbedError::External { source: e.into() })?;

        // Hash with FNV for deterministic, fast hashing
        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:"); // Version prefix
        hasher.write(config_json.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    #[async_trait]
    impl EmbeddingProvider for FastEmbedProvider {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            let texts = vec![text.to_string()];
            let result = self.embed_texts(&texts).await?;
            result
                .embeddings
                .into_iter()
                .next()
                .ok_or_else(|| EmbedError::invalid_config("No embedding generated for text"))
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
            if texts.is_empty() {
                return Ok(EmbeddingResult::new(vec![]));
            }

            tracing::debug!("Generating embeddings for {} texts", texts.len());
            let mut all_embeddings = Vec::with_capacity(texts.len());

            for chunk in texts.chunks(self.config.batch_size) {
                let chunk = chunk.to_vec();
                let model = Arc::clone(&self.model);

                let batch_embeddings =
                    tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                        tracing::debug!("Processing batch of {} texts", chunk.len());
                        let mut model_guard = model.lock().map_err(|_| poisoned())?;
                        model_guard
                            .embed(chunk, None)
                            .map_err(|e| EmbedError::EmbeddingGeneration { source: e.into() })
                    })
                    .await??;

                for mut embedding in batch_embeddings {
                    if self.config.normalize {
                        normalize_in_place(&mut embedding);
                    }
                    all_embeddings.push(embedding);
                }
            }

            tracing::debug!("Generated {} embeddings", all_embeddings.len());
            Ok(EmbeddingResult::new(all_embeddings))
        }

        fn embedding_dimension(&self) -> usize {
            self.dimension
        }

        fn identity(&self) -> EmbedderIdentity {
            self.config.identity()
        }

        fn provider_name(&self) -> &str {
            "fastembed"
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_cache_key_generation() {
            let key1 = create_cache_key(&EmbedConfig::all_minilm_l6_v2()).unwrap();
            let key2 = create_cache_key(&EmbedConfig::all_minilm_l6_v2()).unwrap();
            let batch = create_cache_key(&EmbedConfig::all_minilm_l6_v2().with_batch_size(4)).unwrap();
            let other = create_cache_key(&EmbedConfig::all_minilm_l6_v2().with_model_version("v2"))
                .unwrap();

            assert_eq!(key1, key2, "Same config should produce same cache key");
            assert!(key1.starts_with("v1:"));
            assert_eq!(key1, batch, "Batch size does not change the loaded model");
            assert_ne!(key1, other);
        }

        #[test]
        fn test_unknown_model_is_rejected() {
            assert!(builtin_model("all-MiniLM-L6-v2").is_ok());
            assert!(matches!(
                builtin_model("ModernBERT-large"),
                Err(EmbedError::InvalidConfig { .. })
            ));
        }

        #[tokio::test]
        #[ignore] // Downloads the ONNX model - run with: cargo test --features fastembed -- --ignored
        async fn test_minilm_download_and_embedding() -> Result<()> {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .try_init()
                .ok();

            let provider = FastEmbedProvider::create(EmbedConfig::all_minilm_l6_v2()).await?;
            assert_eq!(provider.embedding_dimension(), 384);
            assert!(FastEmbedProvider::cache_size() >= 1);

            let texts = vec![
                "Viktor built the Hexcore from hextech and organic matter.".to_string(),
                "The Hexcore is a hextech device that adapts to organic matter.".to_string(),
                "Piltover hosts a yearly Progress Day celebration.".to_string(),
            ];
            let result = provider.embed_texts(&texts).await?;
            assert_eq!(result.len(), 3);

            let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
            let related = dot(&result.embeddings[0], &result.embeddings[1]);
            let unrelated = dot(&result.embeddings[0], &result.embeddings[2]);
            assert!(related > unrelated, "{related} <= {unrelated}");

            FastEmbedProvider::clear_cache();
            assert_eq!(FastEmbedProvider::cache_size(), 0);
            Ok(())
        }
    }
}
