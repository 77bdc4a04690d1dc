mod env;
mod types;


pub use types::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use issuelens_index::{IndexerConfig, PipelineConfig};
use issuelens_memory::ReadinessPolicy;

use crate::vault::{Secret, VaultProvider};

pub const OPENAI_API_KEY_SECRET: &str = "ISSUELENS_OPENAI_API_KEY";
pub const GIT_TOKEN_SECRET: &str = "ISSUELENS_GIT_TOKEN";
pub const GRAPH_PASSWORD_SECRET: &str = "ISSUELENS_GRAPH_PASSWORD";
pub const QDRANT_API_KEY_SECRET: &str = "ISSUELENS_QDRANT_API_KEY";

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error naming the first setting out of range.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.dimension == 0 {
            bail!("embedding.dimension must be positive");
        }
        if self.index.max_document_tokens == 0 {
            bail!("index.max_document_tokens must be positive");
        }
        if self.index.concurrency == 0 {
            bail!("index.concurrency must be positive");
        }
        if self.index.batch_size == 0 {
            bail!("index.batch_size must be positive");
        }
        if self.index.readiness.interval_secs == 0 {
            bail!("index.readiness.interval_secs must be positive");
        }
        let factor = self.index.readiness.backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            bail!("index.readiness.backoff_factor must be at least 1.0, got {factor}");
        }
        if self.retriever.top_k == Some(0) {
            bail!("retriever.top_k must be positive");
        }
        Ok(())
    }

    /// Resolve sensitive configuration values through the vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault backend fails.
    pub async fn resolve_secrets(&mut self, vault: &dyn VaultProvider) -> anyhow::Result<()> {
        if let Some(val) = vault.get_secret(OPENAI_API_KEY_SECRET).await? {
            self.secrets.openai_api_key = Some(Secret::new(val));
        }
        if let Some(val) = vault.get_secret(GIT_TOKEN_SECRET).await? {
            self.secrets.git_token = Some(Secret::new(val));
        }
        if let Some(val) = vault.get_secret(GRAPH_PASSWORD_SECRET).await? {
            self.secrets.graph_password = Some(Secret::new(val));
        }
        if let Some(val) = vault.get_secret(QDRANT_API_KEY_SECRET).await? {
            self.secrets.qdrant_api_key = Some(Secret::new(val));
        }
        Ok(())
    }

    /// Collection backing the vector index: the configured name, else the
    /// repository's index name.
    #[must_use]
    pub fn collection_name(&self) -> String {
        self.qdrant
            .collection
            .clone()
            .unwrap_or_else(|| self.repository.locator().index_name())
    }

    #[must_use]
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            max_document_tokens: self.index.max_document_tokens,
        }
    }

    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        let readiness = &self.index.readiness;
        PipelineConfig {
            dimension: self.embedding.dimension,
            concurrency: self.index.concurrency,
            batch_size: self.index.batch_size,
            readiness: ReadinessPolicy {
                interval: Duration::from_secs(readiness.interval_secs),
                max_wait: Duration::from_secs(readiness.max_wait_secs),
                backoff_factor: readiness.backoff_factor,
            },
        }
    }
}
