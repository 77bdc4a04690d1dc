//! One retrieval contract over the vector and graph backends.

use issuelens_llm::EmbedFuture;
use issuelens_memory::Document;

use crate::error::Result;
use crate::graph::GraphRetriever;
use crate::store::VectorRetriever;

/// Embedding callback handed in by the caller.
pub type EmbedFn = dyn Fn(&str) -> EmbedFuture + Send + Sync;

/// Per-call retrieval options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalOptions {
    /// Maximum results. `None` uses the backend default.
    pub top_k: Option<usize>,
    /// Only return documents from these branches. Empty means every branch.
    ///
    /// The graph backend filters after its index scans and over-fetches by
    /// [`crate::graph::BRANCH_OVERFETCH`]; a branch holding only a sliver of the corpus can
    /// still come back with fewer than `top_k` documents.
    pub branches: Vec<String>,
    /// Reserved.
    pub with_structured_data: bool,
    /// Reserved.
    pub enable_hybrid_retrieval: bool,
}

impl RetrievalOptions {
    #[must_use]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    #[must_use]
    pub fn branches(mut self, branches: Vec<String>) -> Self {
        self.branches = branches;
        self
    }

    pub(crate) fn resolved_top_k(&self, default: usize) -> usize {
        self.top_k.unwrap_or(default)
    }
}

/// Retrieval backend chosen once at startup.
#[derive(Debug)]
pub enum Retriever {
    Vector(VectorRetriever),
    Graph(GraphRetriever),
}

impl Retriever {
    /// Embed `query` with `embed`, then return the best matching documents in
    /// descending score order.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the backend query fails. The graph backend
    /// also fails with [`crate::IndexError::NotFound`] when nothing matches.
    pub async fn retrieve(
        &self,
        query: &str,
        embed: &EmbedFn,
        options: &RetrievalOptions,
    ) -> Result<Vec<Document>> {
        match self {
            Self::Vector(r) => r.retrieve(query, embed, options).await,
            Self::Graph(r) => r.retrieve(query, embed, options).await,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the backend query fails.
    pub async fn retrieve_by_vector(
        &self,
        vector: Vec<f32>,
        options: &RetrievalOptions,
    ) -> Result<Vec<Document>> {
        match self {
            Self::Vector(r) => r.retrieve_by_vector(vector, options).await,
            Self::Graph(r) => r.retrieve_by_vector(vector, options).await,
        }
    }

    /// Markdown list of the issues most similar to `vector`, leaving out
    /// `issue_number` itself.
    ///
    /// # Errors
    ///
    /// Returns [`crate::IndexError::NotFound`] when no other issue matches, or an
    /// error if the backend query fails.
    pub async fn retrieve_issue(
        &self,
        vector: Vec<f32>,
        issue_number: Option<u64>,
        options: &RetrievalOptions,
    ) -> Result<String> {
        match self {
            Self::Vector(r) => r.retrieve_issue(vector, issue_number, options).await,
            Self::Graph(r) => r.retrieve_issue(vector, issue_number, options).await,
        }
    }

    #[must_use]
    pub fn default_top_k(&self) -> usize {
        match self {
            Self::Vector(r) => r.default_top_k(),
            Self::Graph(r) => r.default_top_k(),
        }
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Vector(_) => "vector",
            Self::Graph(_) => "graph",
        }
    }

    /// Release the backend session.
    pub fn close(self) {
        tracing::debug!(backend = self.backend_name(), "closing retriever");
        match self {
            Self::Vector(_) => {}
            Self::Graph(r) => r.close(),
        }
    }
}
