#[cfg(feature = "mock")]
use crate::mock::MockEmbedder;
use crate::openai::OpenAiEmbedder;
use crate::provider::{EmbedFuture, EmbeddingProvider};

/// Generates a match over all `AnyEmbedder` variants, binding the inner provider
/// and evaluating the given closure for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::OpenAi($p) => $expr,
            #[cfg(feature = "mock")]
            AnyEmbedder::Mock($p) => $expr,
        }
    };
}

#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    OpenAi(OpenAiEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl AnyEmbedder {
    /// Return a cloneable closure that calls `embed()` on this provider.
    pub fn embed_fn(&self) -> impl Fn(&str) -> EmbedFuture + Send + Sync + use<> {
        let provider = std::sync::Arc::new(self.clone());
        move |text: &str| -> EmbedFuture {
            let p = std::sync::Arc::clone(&provider);
            let owned = text.to_owned();
            Box::pin(async move { p.embed(&owned).await })
        }
    }
}

impl EmbeddingProvider for AnyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::LlmError> {
        delegate_embedder!(self, |p| p.embed(text).await)
    }

    fn name(&self) -> &str {
        delegate_embedder!(self, |p| p.name())
    }
}
