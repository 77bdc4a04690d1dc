//! Repository indexing and retrieval for issue responses.
//!
//! [`RepoIndexer`] turns every file of a repository's branches into a [`Document`],
//! [`UpsertPipeline`] embeds documents and issues into a vector index, and
//! [`Retriever`] answers queries from either the vector backend or the hybrid graph
//! backend.
//!
//! [`Document`]: issuelens_memory::Document

pub mod error;
pub mod fusion;
pub mod graph;
pub mod indexer;
pub mod locator;
pub mod pipeline;
pub mod retriever;
pub mod sanitize;
pub mod similar_issues;
pub mod source;
pub mod store;

pub use error::{IndexError, Result};
pub use graph::{FulltextBinding, GraphRetriever, GraphSchema};
pub use indexer::{IndexReport, IndexerConfig, RepoIndexer, SkipReason};
pub use locator::RepoLocator;
pub use pipeline::{PipelineConfig, UpsertPipeline, UpsertReport};
pub use retriever::{EmbedFn, RetrievalOptions, Retriever};
pub use source::{
    GitCloneOptions, GitCredentials, GitSource, InMemorySource, LocalSource, RepositorySource,
};
pub use store::{DropConfirmation, VectorRetriever};
