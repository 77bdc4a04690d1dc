use std::path::PathBuf;

use issuelens_index::{FulltextBinding, GraphSchema, RepoLocator};
use serde::{Deserialize, Serialize};

use crate::vault::Secret;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

fn default_host() -> String {
    "github.com".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
    /// Branches to index. Empty means every branch of the source.
    #[serde(default)]
    pub branches: Vec<String>,
    /// User name sent with the git token when cloning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            owner: String::new(),
            repo: String::new(),
            branches: Vec::new(),
            username: None,
        }
    }
}

impl RepositoryConfig {
    #[must_use]
    pub fn locator(&self) -> RepoLocator {
        RepoLocator::new(self.host.clone(), self.owner.clone(), self.repo.clone())
    }
}

/// Embedding provider backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    OpenAi,
    /// Deterministic hash embeddings, available with the `mock` feature.
    Mock,
}

impl EmbeddingProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

impl std::fmt::Display for EmbeddingProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_dimension() -> usize {
    issuelens_index::pipeline::EMBEDDING_DIMENSION
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
        }
    }
}

fn default_max_document_tokens() -> usize {
    issuelens_index::indexer::MAX_DOCUMENT_TOKENS
}

fn default_concurrency() -> usize {
    4
}

fn default_batch_size() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_max_document_tokens")]
    pub max_document_tokens: usize,
    /// `tokenizer.json` for exact counts. Without it tokens are estimated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<PathBuf>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub readiness: ReadinessConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_document_tokens: default_max_document_tokens(),
            tokenizer_path: None,
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            readiness: ReadinessConfig::default(),
        }
    }
}

fn default_interval_secs() -> u64 {
    5
}

fn default_max_wait_secs() -> u64 {
    280
}

fn default_backoff_factor() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Retrieval backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverBackend {
    #[default]
    Vector,
    Graph,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RetrieverConfig {
    #[serde(default)]
    pub backend: RetrieverBackend,
    /// Overrides the backend's default result count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    /// Collection name. Derived from the repository when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection: None,
        }
    }
}

fn default_graph_uri() -> String {
    "bolt://localhost:7687".into()
}

fn default_graph_user() -> String {
    "neo4j".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphConfig {
    #[serde(default = "default_graph_uri")]
    pub uri: String,
    #[serde(default = "default_graph_user")]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(flatten)]
    pub schema: GraphSchema,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_graph_uri(),
            user: default_graph_user(),
            database: None,
            schema: GraphSchema::default(),
        }
    }
}

impl GraphConfig {
    #[must_use]
    pub fn fulltext_binding(&self) -> FulltextBinding {
        self.schema.fulltext_binding
    }
}

#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub openai_api_key: Option<Secret>,
    pub git_token: Option<Secret>,
    pub graph_password: Option<Secret>,
    pub qdrant_api_key: Option<Secret>,
}
