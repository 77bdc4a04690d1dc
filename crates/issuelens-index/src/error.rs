//! Error types for issuelens-index.

/// Errors raised while indexing a repository or answering a retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The backend answered, but nothing matched.
    #[error("no results found for {0}")]
    NotFound(String),

    #[error("vector store error: {0}")]
    VectorStore(#[from] issuelens_memory::VectorStoreError),

    #[error("graph error: {0}")]
    Graph(#[from] neo4rs::Error),

    /// A graph row did not have the expected columns or types.
    #[error("graph row error: {0}")]
    GraphRow(#[from] neo4rs::DeError),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("embedding error: {0}")]
    Embedding(#[from] issuelens_llm::LlmError),

    #[error("tokenizer error: {0}")]
    Tokenizer(#[source] issuelens_llm::LlmError),

    /// The index did not finish provisioning before the readiness ceiling.
    #[error("index {collection} not ready after {waited_secs}s")]
    NotReady { collection: String, waited_secs: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("embedding has {actual} dimensions, index expects {expected}")]
    Dimension { expected: usize, actual: usize },

    /// The caller did not re-type the index name when dropping it.
    #[error("refusing to drop index {index}: confirmation did not match")]
    Unconfirmed { index: String },

    /// A branch or file could not be read from the repository.
    #[error("failed to read {path} on branch {branch}: {reason}")]
    Read {
        branch: String,
        path: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
