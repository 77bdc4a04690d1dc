//! Embedding provider abstraction and token counting.
//!
//! The retrieval engine never computes embeddings itself: it consumes an
//! [`EmbeddingProvider`] (or the boxed closure returned by
//! [`any::AnyEmbedder::embed_fn`]) and a [`tokens::TokenCounter`] used to respect
//! embedding input limits.

pub mod any;
pub mod error;
pub(crate) mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod tokens;

pub use error::LlmError;
pub use provider::{EmbedFuture, EmbeddingProvider};
