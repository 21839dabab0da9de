//! Embedding functions for the vector index.
//!
//! [`HttpEmbedder`] talks to any OpenAI-compatible `/embeddings` endpoint.
//! [`HashEmbedder`] is local and deterministic: token features hashed into
//! a fixed-width vector, good enough for lexical-semantic recall without a
//! network and exact enough for tests.

use std::sync::Arc;

use regdoc_core::{EmbeddingConfig, RegDocError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tokenize::tokens;

/// A function from texts to fixed-width vectors.
pub trait Embedder: Send + Sync {
    /// Model identifier recorded with the index.
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed `texts`; the result is parallel to the input.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RegDocError>;

    fn embed_query(&self, query: &str) -> Result<Vec<f32>, RegDocError> {
        self.embed_batch(&[query.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| RegDocError::Embedding("embedder returned no vector".into()))
    }
}

/// Build the embedder named by `config.provider`.
///
/// # Errors
///
/// Returns [`RegDocError::Config`] for an unknown provider or a missing
/// API key.
///
/// # Examples
///
/// ```
/// use regdoc_core::EmbeddingConfig;
/// use regdoc_search::embedding::from_config;
///
/// let embedder = from_config(&EmbeddingConfig::default()).unwrap();
/// assert_eq!(embedder.model(), "hash-256");
/// ```
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, RegDocError> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimensions))),
        "openai" => Ok(Arc::new(HttpEmbedder::with_config(config)?)),
        other => Err(RegDocError::Config(format!(
            "unknown embedding provider '{other}' (expected 'hash' or 'openai')"
        ))),
    }
}

/// Deterministic feature-hashing embedder.
///
/// Each token and each pair of adjacent tokens is hashed with SHA-256 to a
/// signed slot; the result is L2-normalized.
///
/// # Examples
///
/// ```
/// use regdoc_search::embedding::{Embedder, HashEmbedder};
///
/// let embedder = HashEmbedder::new(64);
/// let a = embedder.embed_query("battery capacity").unwrap();
/// let b = embedder.embed_query("battery capacity").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
    model: String,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model: format!("hash-{dimensions}"),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let toks = tokens(text);
        let bigrams = toks.windows(2).map(|w| format!("{} {}", w[0], w[1]));
        for feature in toks.iter().cloned().chain(bigrams) {
            let digest = Sha256::digest(feature.as_bytes());
            let mut slot = [0u8; 8];
            slot.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(slot) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RegDocError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for an OpenAI-compatible embeddings endpoint.
///
/// Calls are blocking; async callers run them on a blocking thread.
pub struct HttpEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// Falls back to `REGDOC_EMBEDDING_API_KEY`, then `OPENAI_API_KEY`,
    /// if no key is configured.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Config`] if no API key is available.
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, RegDocError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("REGDOC_EMBEDDING_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                RegDocError::Config(
                    "embedding API key not found: set embedding.api_key in .regdoc.toml or REGDOC_EMBEDDING_API_KEY".into(),
                )
            })?;

        Ok(Self {
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    fn build_request<'a>(&'a self, texts: &'a [String]) -> EmbedRequest<'a> {
        EmbedRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        }
    }

    fn parse_response(&self, expected: usize, response: EmbedResponse) -> Result<Vec<Vec<f32>>, RegDocError> {
        let mut data = response.data;
        if data.len() != expected {
            return Err(RegDocError::Embedding(format!(
                "embedding API returned {} vectors for {expected} inputs",
                data.len()
            )));
        }
        data.sort_by_key(|item| item.index);
        data.into_iter()
            .map(|item| {
                if item.embedding.len() == self.dimensions {
                    Ok(item.embedding)
                } else {
                    Err(RegDocError::Embedding(format!(
                        "embedding API returned {} dimensions, expected {}",
                        item.embedding.len(),
                        self.dimensions
                    )))
                }
            })
            .collect()
    }
}

impl Embedder for HttpEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RegDocError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.build_request(texts))
            .send()
            .map_err(|e| RegDocError::Embedding(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(RegDocError::Embedding(format!(
                "embedding API returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .map_err(|e| RegDocError::Embedding(format!("failed to parse response: {e}")))?;
        self.parse_response(texts.len(), parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    fn http(dimensions: usize) -> HttpEmbedder {
        HttpEmbedder::with_config(&EmbeddingConfig {
            provider: "openai".into(),
            api_key: Some("test-key".into()),
            base_url: Some("http://localhost:9/v1/".into()),
            dimensions,
            ..EmbeddingConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn hash_embeddings_are_normalized_and_related() {
        let embedder = HashEmbedder::new(256);
        let a = embedder.embed_query("battery float voltage").unwrap();
        let b = embedder.embed_query("float voltage of the battery").unwrap();
        let c = embedder.embed_query("fire protection doors").unwrap();
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let v = HashEmbedder::new(8).embed_query("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn request_format_is_correct() {
        let client = http(256);
        let texts = vec!["3.1 Capacity".to_string(), "Table 2".to_string()];
        let json = serde_json::to_value(client.build_request(&texts)).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["dimensions"], 256);
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
        assert_eq!(client.base_url, "http://localhost:9/v1");
    }

    #[test]
    fn response_is_reordered_by_index() {
        let client = http(2);
        let json = r#"{"data": [
            {"index": 1, "embedding": [0.3, 0.4]},
            {"index": 0, "embedding": [0.1, 0.2]}
        ]}"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        let vectors = client.parse_response(2, response).unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[test]
    fn wrong_width_or_count_is_rejected() {
        let client = http(3);
        let json = r#"{"data": [{"index": 0, "embedding": [0.1, 0.2]}]}"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        assert!(client.parse_response(1, response).is_err());
        let response: EmbedResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(client.parse_response(1, response).is_err());
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let config = EmbeddingConfig {
            provider: "word2vec".into(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(from_config(&config), Err(RegDocError::Config(_))));
    }
}
