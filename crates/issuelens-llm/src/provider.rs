use std::future::Future;
use std::pin::Pin;

use crate::error::LlmError;

/// Boxed future returned by an embedding closure.
pub type EmbedFuture = Pin<Box<dyn Future<Output = Result<Vec<f32>, LlmError>> + Send>>;

pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding vector for `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot be reached or the response is invalid.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    fn name(&self) -> &str;
}
