use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RegDocError;

/// Top-level configuration loaded from `.regdoc.toml`.
///
/// Every section is optional; missing keys fall back to defaults.
///
/// # Examples
///
/// ```
/// use regdoc_core::RegDocConfig;
///
/// let config = RegDocConfig::default();
/// assert_eq!(config.search.default_limit, 10);
/// assert_eq!(config.embedding.provider, "hash");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegDocConfig {
    /// Where regulation data lives on disk.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Embedding provider settings for the vector index.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Hybrid search tuning.
    #[serde(default)]
    pub search: SearchConfig,
    /// Structure-recovery heuristics applied during ingest.
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl RegDocConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Io`] if the file cannot be read, or
    /// [`RegDocError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use regdoc_core::RegDocConfig;
    /// use std::path::Path;
    ///
    /// let config = RegDocConfig::from_file(Path::new(".regdoc.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, RegDocError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`RegDocError::Toml`] if parsing fails, or
    /// [`RegDocError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use regdoc_core::RegDocConfig;
    ///
    /// let toml = r#"
    /// [search]
    /// default_limit = 20
    /// "#;
    /// let config = RegDocConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.search.default_limit, 20);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, RegDocError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), RegDocError> {
        if self.search.keyword_weight < 0.0 || self.search.vector_weight < 0.0 {
            return Err(RegDocError::Config(
                "search weights must be non-negative".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(RegDocError::Config(
                "embedding.batch_size must be at least 1".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(RegDocError::Config(
                "embedding.dimensions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Storage location settings.
///
/// # Examples
///
/// ```
/// use regdoc_core::StorageConfig;
///
/// let config = StorageConfig::default();
/// assert!(config.data_dir.ends_with(".regdoc/data"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory; each regulation gets one sub-directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".regdoc/data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Configuration for the embedding function used by the vector index.
///
/// # Examples
///
/// ```
/// use regdoc_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "hash");
/// assert_eq!(config.dimensions, 256);
/// assert_eq!(config.batch_size, 64);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: `"hash"` (local, deterministic) or `"openai"` (any
    /// OpenAI-compatible `/embeddings` endpoint).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Model name (default: `"text-embedding-3-small"`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Embedding dimensions (default: 256).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Texts per embedding request (default: 64).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Embedding requests allowed in flight at once during ingest (default: 2).
    #[serde(default = "default_parallel_batches")]
    pub parallel_batches: usize,
}

fn default_embedding_provider() -> String {
    "hash".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_dimensions() -> usize {
    256
}

fn default_batch_size() -> usize {
    64
}

fn default_parallel_batches() -> usize {
    2
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            base_url: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_batch_size(),
            parallel_batches: default_parallel_batches(),
        }
    }
}

/// Hybrid search tuning.
///
/// # Examples
///
/// ```
/// use regdoc_core::SearchConfig;
///
/// let config = SearchConfig::default();
/// assert_eq!(config.keyword_weight, 1.0);
/// assert_eq!(config.fetch_multiplier, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// RRF weight of the keyword backend (default: 1.0).
    #[serde(default = "default_weight")]
    pub keyword_weight: f64,
    /// RRF weight of the vector backend (default: 1.0).
    #[serde(default = "default_weight")]
    pub vector_weight: f64,
    /// Result count when the caller gives none (default: 10).
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Each backend fetches `limit * fetch_multiplier` candidates (default: 2).
    #[serde(default = "default_fetch_multiplier")]
    pub fetch_multiplier: usize,
    /// Maximum characters per result snippet (default: 240).
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

fn default_weight() -> f64 {
    1.0
}

fn default_limit() -> usize {
    10
}

fn default_fetch_multiplier() -> usize {
    2
}

fn default_snippet_chars() -> usize {
    240
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keyword_weight: default_weight(),
            vector_weight: default_weight(),
            default_limit: default_limit(),
            fetch_multiplier: default_fetch_multiplier(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

/// Heuristics used while recovering structure from converted pages.
///
/// # Examples
///
/// ```
/// use regdoc_core::IngestConfig;
///
/// assert_eq!(IngestConfig::default().max_heading_chars, 80);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Lines longer than this are never treated as headings (default: 80).
    #[serde(default = "default_max_heading_chars")]
    pub max_heading_chars: usize,
}

fn default_max_heading_chars() -> usize {
    80
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_heading_chars: default_max_heading_chars(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = RegDocConfig::default();
        assert_eq!(config.storage.data_dir, PathBuf::from(".regdoc/data"));
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.embedding.dimensions, 256);
        assert_eq!(config.embedding.parallel_batches, 2);
        assert_eq!(config.search.vector_weight, 1.0);
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.search.snippet_chars, 240);
        assert_eq!(config.ingest.max_heading_chars, 80);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[storage]
data_dir = "/var/lib/regdoc"

[embedding]
provider = "openai"
model = "text-embedding-3-large"
base_url = "http://localhost:8080/v1"
dimensions = 1024
batch_size = 16

[search]
keyword_weight = 1.5
vector_weight = 0.5
default_limit = 5

[ingest]
max_heading_chars = 120
"#;
        let config = RegDocConfig::from_toml(toml).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/regdoc"));
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.dimensions, 1024);
        assert_eq!(config.embedding.batch_size, 16);
        assert_eq!(
            config.embedding.base_url.as_deref(),
            Some("http://localhost:8080/v1")
        );
        assert_eq!(config.search.keyword_weight, 1.5);
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.search.fetch_multiplier, 2);
        assert_eq!(config.ingest.max_heading_chars, 120);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = RegDocConfig::from_toml("").unwrap();
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.embedding.batch_size, 64);
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = RegDocConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }

    #[test]
    fn negative_weight_is_rejected() {
        let result = RegDocConfig::from_toml("[search]\nvector_weight = -1.0\n");
        assert!(matches!(result, Err(RegDocError::Config(_))));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = RegDocConfig::from_toml("[embedding]\nbatch_size = 0\n");
        assert!(matches!(result, Err(RegDocError::Config(_))));
    }
}
