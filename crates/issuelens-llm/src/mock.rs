//! Test-only deterministic embedding provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::EmbeddingProvider;

/// Returns pinned vectors for known texts and a blake3-derived vector otherwise.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    fixed: Arc<Mutex<HashMap<String, Vec<f32>>>>,
    calls: Arc<AtomicUsize>,
    /// Fail every call after this many successful ones.
    pub fail_after: Option<usize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
        }
    }

    #[must_use]
    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed
            .lock()
            .unwrap()
            .insert(text.to_owned(), vector);
        self
    }

    #[must_use]
    pub fn failing_after(mut self, successes: usize) -> Self {
        self.fail_after = Some(successes);
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hashed_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(text.as_bytes());
        let mut reader = hasher.finalize_xof();
        let mut bytes = vec![0u8; self.dimension];
        reader.fill(&mut bytes);
        bytes
            .into_iter()
            .map(|b| f32::from(b) / 255.0 + 0.01)
            .collect()
    }
}

impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| call >= limit) {
            return Err(LlmError::Other("mock embedding error".into()));
        }
        if let Some(v) = self.fixed.lock().unwrap().get(text) {
            return Ok(v.clone());
        }
        Ok(self.hashed_vector(text))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
