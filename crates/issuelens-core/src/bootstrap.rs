//! Application bootstrap: config resolution, embedder/store/retriever construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use issuelens_index::{
    GitCloneOptions, GitCredentials, GraphRetriever, RepoIndexer, Retriever, UpsertPipeline,
    VectorRetriever,
};
use issuelens_llm::any::AnyEmbedder;
use issuelens_llm::openai::OpenAiEmbedder;
use issuelens_llm::tokens::{HeuristicTokenCounter, HfTokenCounter, TokenCounter};
use issuelens_memory::{QdrantOps, VectorStore};
use tokio_util::sync::CancellationToken;

use crate::config::{
    Config, EmbeddingProviderKind, GRAPH_PASSWORD_SECRET, OPENAI_API_KEY_SECRET, RetrieverBackend,
};
use crate::vault::{EnvVaultProvider, VaultProvider};

const DEFAULT_CONFIG_PATH: &str = "config/issuelens.toml";
const DEFAULT_GIT_USERNAME: &str = "x-access-token";

pub struct AppBuilder {
    config: Config,
    config_path: PathBuf,
}

impl AppBuilder {
    /// Load the config at `path`, then resolve secrets from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded or the vault fails.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        Self::load_with_vault(path, &EnvVaultProvider).await
    }

    /// # Errors
    ///
    /// Returns an error if the config cannot be loaded or the vault fails.
    pub async fn load_with_vault(path: &Path, vault: &dyn VaultProvider) -> anyhow::Result<Self> {
        let mut config = Config::load(path)?;
        config.resolve_secrets(vault).await?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(Self {
            config,
            config_path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self {
            config,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// # Errors
    ///
    /// Returns an error if the provider is misconfigured.
    pub fn build_embedder(&self) -> anyhow::Result<AnyEmbedder> {
        create_embedder(&self.config)
    }

    /// # Errors
    ///
    /// Returns an error if the configured tokenizer file cannot be loaded.
    pub fn build_token_counter(&self) -> anyhow::Result<Arc<dyn TokenCounter>> {
        match &self.config.index.tokenizer_path {
            Some(path) => {
                let counter = HfTokenCounter::from_file(path).with_context(|| {
                    format!("failed to load tokenizer from {}", path.display())
                })?;
                Ok(Arc::new(counter))
            }
            None => {
                tracing::debug!("no tokenizer configured, estimating token counts");
                Ok(Arc::new(HeuristicTokenCounter))
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn build_store(&self) -> anyhow::Result<Arc<dyn VectorStore>> {
        let url = &self.config.qdrant.url;
        let ops = match &self.config.secrets.qdrant_api_key {
            Some(key) => QdrantOps::with_api_key(url, key.expose()),
            None => QdrantOps::new(url),
        }
        .with_context(|| format!("invalid qdrant url {url}"))?;
        Ok(Arc::new(ops))
    }

    #[must_use]
    pub fn build_indexer(&self, tokens: Arc<dyn TokenCounter>) -> RepoIndexer {
        RepoIndexer::new(
            self.config.repository.locator(),
            tokens,
            self.config.indexer_config(),
        )
    }

    #[must_use]
    pub fn build_pipeline(
        &self,
        store: Arc<dyn VectorStore>,
        embedder: &AnyEmbedder,
        cancel: CancellationToken,
    ) -> UpsertPipeline {
        UpsertPipeline::new(
            store,
            self.config.collection_name(),
            Box::new(embedder.embed_fn()),
            self.config.pipeline_config(),
        )
        .with_cancellation(cancel)
    }

    /// Vector retriever over the configured collection. Lookups, deletes, and index
    /// drops always go through it, whichever backend answers queries.
    #[must_use]
    pub fn build_vector_retriever(&self, store: Arc<dyn VectorStore>) -> VectorRetriever {
        let retriever = VectorRetriever::new(store, self.config.collection_name());
        match self.config.retriever.top_k {
            Some(top_k) => retriever.with_default_top_k(top_k),
            None => retriever,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the graph backend is selected and cannot be reached, or its
    /// password is missing.
    pub async fn build_retriever(&self, store: Arc<dyn VectorStore>) -> anyhow::Result<Retriever> {
        match self.config.retriever.backend {
            RetrieverBackend::Vector => {
                Ok(Retriever::Vector(self.build_vector_retriever(store)))
            }
            RetrieverBackend::Graph => {
                let graph = &self.config.graph;
                let password = self
                    .config
                    .secrets
                    .graph_password
                    .as_ref()
                    .with_context(|| format!("{GRAPH_PASSWORD_SECRET} required for graph backend"))?;
                let retriever = GraphRetriever::connect(
                    &graph.uri,
                    &graph.user,
                    password.expose(),
                    graph.database.as_deref(),
                    graph.schema.clone(),
                )
                .await
                .with_context(|| format!("failed to connect to graph at {}", graph.uri))?;
                retriever
                    .verify_connectivity()
                    .await
                    .with_context(|| format!("graph at {} did not answer", graph.uri))?;
                let retriever = match self.config.retriever.top_k {
                    Some(top_k) => retriever.with_default_top_k(top_k),
                    None => retriever,
                };
                Ok(Retriever::Graph(retriever))
            }
        }
    }

    /// Clone settings for the configured repository, authenticated when a git token is
    /// set.
    #[must_use]
    pub fn clone_options(&self) -> GitCloneOptions {
        let credentials = self.config.secrets.git_token.as_ref().map(|token| GitCredentials {
            username: self
                .config
                .repository
                .username
                .clone()
                .unwrap_or_else(|| DEFAULT_GIT_USERNAME.to_owned()),
            token: token.expose().to_owned(),
        });
        GitCloneOptions {
            credentials,
            ..GitCloneOptions::default()
        }
    }
}

/// Priority: explicit path > `ISSUELENS_CONFIG` env > `config/issuelens.toml`.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("ISSUELENS_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// # Errors
///
/// Returns an error if the provider needs a secret that is not set, or is not
/// compiled in.
pub fn create_embedder(config: &Config) -> anyhow::Result<AnyEmbedder> {
    match config.embedding.provider {
        EmbeddingProviderKind::OpenAi => {
            let api_key = config
                .secrets
                .openai_api_key
                .as_ref()
                .with_context(|| format!("{OPENAI_API_KEY_SECRET} required for openai provider"))?;
            Ok(AnyEmbedder::OpenAi(OpenAiEmbedder::new(
                api_key.expose().to_owned(),
                config.embedding.base_url.clone(),
                config.embedding.model.clone(),
            )))
        }
        #[cfg(feature = "mock")]
        EmbeddingProviderKind::Mock => Ok(AnyEmbedder::Mock(
            issuelens_llm::mock::MockEmbedder::new(config.embedding.dimension),
        )),
        #[cfg(not(feature = "mock"))]
        EmbeddingProviderKind::Mock => {
            bail!("mock embedding provider requires the `mock` feature")
        }
    }
}

/// Bail out early when a command needs repository coordinates that are unset.
///
/// # Errors
///
/// Returns an error naming the missing `[repository]` field.
pub fn require_repository(config: &Config) -> anyhow::Result<()> {
    if config.repository.owner.is_empty() {
        bail!("repository.owner is not configured");
    }
    if config.repository.repo.is_empty() {
        bail!("repository.repo is not configured");
    }
    Ok(())
}
