//! Local feature-hashing embedder.
//!
//! Each lower-cased alphanumeric token is hashed with FNV-1a into one of
//! `dimension` buckets; the bucket counts form the vector. The model version
//! seeds every hash, so changing the version moves every token to a different
//! bucket and the resulting vectors are not comparable with older ones.

use crate::config::{EmbedConfig, EmbedderIdentity, ProviderKind};
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, normalize_in_place};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;

/// Deterministic bag-of-words embedder that needs no model files.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    config: EmbedConfig,
}

impl HashingProvider {
    pub fn new(config: EmbedConfig) -> Result<Self> {
        config.validate()?;
        if config.provider != ProviderKind::Hashing {
            return Err(EmbedError::invalid_config(format!(
                "HashingProvider cannot serve provider '{}'",
                config.provider
            )));
        }
        Ok(Self { config })
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = FnvHasher::default();
        hasher.write(self.config.model_version.as_bytes());
        hasher.write(&[0xff]);
        hasher.write(token.as_bytes());
        (hasher.finish() % self.config.dimension as u64) as usize
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.config.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[self.bucket(&token.to_lowercase())] += 1.0;
        }
        if self.config.normalize {
            normalize_in_place(&mut vector);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            tracing::trace!("Hashing batch of {} texts", batch.len());
            embeddings.extend(batch.iter().map(|text| self.embed_one(text)));
        }
        let mut result = EmbeddingResult::new(embeddings);
        result.dimension = self.config.dimension;
        Ok(result)
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    fn identity(&self) -> EmbedderIdentity {
        self.config.identity()
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_embeddings_are_deterministic_and_normalized() {
        let provider = HashingProvider::new(EmbedConfig::hashing()).unwrap();

        let first = provider.embed_text("The Hexcore adapts.").await.unwrap();
        let second = provider.embed_text("the hexcore ADAPTS").await.unwrap();

        assert_eq!(first.len(), 512);
        assert_eq!(first, second, "case and punctuation must not matter");
        let norm = dot(&first, &first).sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() {
        let provider = HashingProvider::new(EmbedConfig::hashing()).unwrap();
        let texts = vec![
            "The Hexcore is a hextech device that reacts to organic matter.".to_string(),
            "Viktor grew up poor in Zaun and walks with a cane.".to_string(),
        ];
        let docs = provider.embed_texts(&texts).await.unwrap();
        let query = provider.embed_text("What is the Hexcore?").await.unwrap();

        assert_eq!(docs.len(), 2);
        assert!(dot(&query, &docs.embeddings[0]) > dot(&query, &docs.embeddings[1]));
    }

    #[tokio::test]
    async fn test_version_changes_vectors() {
        let v1 = HashingProvider::new(EmbedConfig::hashing()).unwrap();
        let v2 = HashingProvider::new(EmbedConfig::hashing().with_model_version("v2")).unwrap();

        let text = "Hextech research notes from Piltover";
        assert_ne!(
            v1.embed_text(text).await.unwrap(),
            v2.embed_text(text).await.unwrap()
        );
        assert!(!v1.identity().is_compatible_with(&v2.identity()));
    }

    #[tokio::test]
    async fn test_empty_text_and_batches() {
        let provider =
            HashingProvider::new(EmbedConfig::hashing().with_dimension(8).with_batch_size(2))
                .unwrap();

        let empty = provider.embed_text("  ...  ").await.unwrap();
        assert_eq!(empty, vec![0.0; 8]);

        let texts: Vec<String> = (0..5).map(|i| format!("passage {i}")).collect();
        let result = provider.embed_texts(&texts).await.unwrap();
        assert_eq!(result.len(), 5);
        assert_eq!(result.dimension, 8);

        let none = provider.embed_texts(&[]).await.unwrap();
        assert!(none.is_empty());
        assert_eq!(none.dimension, 8);
    }

    #[test]
    fn test_rejects_other_provider_kinds() {
        let config = EmbedConfig {
            provider: ProviderKind::FastEmbed,
            ..EmbedConfig::hashing()
        };
        assert!(matches!(
            HashingProvider::new(config),
            Err(EmbedError::InvalidConfig { .. })
        ));
    }
}
