//! Records, vector storage, and index lifecycle for issuelens.
//!
//! [`VectorStore`] is the storage seam: [`QdrantOps`] talks to a Qdrant server,
//! [`InMemoryVectorStore`] keeps everything in process for tests and local runs.

pub mod in_memory_store;
pub mod qdrant_ops;
pub mod readiness;
pub mod types;
pub mod vector_store;

pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use readiness::{Clock, ManualClock, Readiness, ReadinessPolicy, TokioClock, wait_until_ready};
pub use types::{
    CODEBASE_NAMESPACE, Document, ISSUE_NUMBER_KEY, ISSUES_NAMESPACE, Issue, IssueComment,
    IssueThread, NAMESPACE_KEY,
};
pub use vector_store::{
    FieldCondition, FieldValue, PayloadPoint, ScoredVectorPoint, VectorFilter, VectorPoint,
    VectorStore, VectorStoreError,
};
