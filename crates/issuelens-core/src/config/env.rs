use std::path::PathBuf;

use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_repository();
        self.apply_env_overrides_index();
        self.apply_env_overrides_backends();
    }

    fn apply_env_overrides_repository(&mut self) {
        if let Ok(v) = std::env::var("ISSUELENS_REPOSITORY_HOST") {
            self.repository.host = v;
        }
        if let Ok(v) = std::env::var("ISSUELENS_REPOSITORY_OWNER") {
            self.repository.owner = v;
        }
        if let Ok(v) = std::env::var("ISSUELENS_REPOSITORY_REPO") {
            self.repository.repo = v;
        }
        if let Ok(v) = std::env::var("ISSUELENS_REPOSITORY_BRANCHES") {
            self.repository.branches = v
                .split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("ISSUELENS_REPOSITORY_USERNAME") {
            self.repository.username = Some(v);
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("ISSUELENS_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid ISSUELENS_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("ISSUELENS_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("ISSUELENS_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("ISSUELENS_EMBEDDING_DIMENSION")
            && let Ok(dimension) = v.parse::<usize>()
        {
            self.embedding.dimension = dimension;
        }
        if let Ok(v) = std::env::var("ISSUELENS_INDEX_MAX_DOCUMENT_TOKENS")
            && let Ok(tokens) = v.parse::<usize>()
        {
            self.index.max_document_tokens = tokens;
        }
        if let Ok(v) = std::env::var("ISSUELENS_INDEX_TOKENIZER_PATH") {
            self.index.tokenizer_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ISSUELENS_INDEX_CONCURRENCY")
            && let Ok(concurrency) = v.parse::<usize>()
        {
            self.index.concurrency = concurrency;
        }
        if let Ok(v) = std::env::var("ISSUELENS_INDEX_BATCH_SIZE")
            && let Ok(batch) = v.parse::<usize>()
        {
            self.index.batch_size = batch;
        }
        if let Ok(v) = std::env::var("ISSUELENS_INDEX_READINESS_INTERVAL_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.index.readiness.interval_secs = secs;
        }
        if let Ok(v) = std::env::var("ISSUELENS_INDEX_READINESS_MAX_WAIT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.index.readiness.max_wait_secs = secs;
        }
        if let Ok(v) = std::env::var("ISSUELENS_INDEX_READINESS_BACKOFF_FACTOR")
            && let Ok(factor) = v.parse::<f64>()
        {
            self.index.readiness.backoff_factor = factor;
        }
    }

    fn apply_env_overrides_backends(&mut self) {
        if let Ok(v) = std::env::var("ISSUELENS_RETRIEVER_BACKEND") {
            if let Ok(backend) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.retriever.backend = backend;
            } else {
                tracing::warn!("ignoring invalid ISSUELENS_RETRIEVER_BACKEND value: {v}");
            }
        }
        if let Ok(v) = std::env::var("ISSUELENS_RETRIEVER_TOP_K")
            && let Ok(top_k) = v.parse::<usize>()
        {
            self.retriever.top_k = Some(top_k);
        }
        if let Ok(v) = std::env::var("ISSUELENS_QDRANT_URL") {
            self.qdrant.url = v;
        }
        if let Ok(v) = std::env::var("ISSUELENS_QDRANT_COLLECTION") {
            self.qdrant.collection = Some(v);
        }
        if let Ok(v) = std::env::var("ISSUELENS_GRAPH_URI") {
            self.graph.uri = v;
        }
        if let Ok(v) = std::env::var("ISSUELENS_GRAPH_USER") {
            self.graph.user = v;
        }
        if let Ok(v) = std::env::var("ISSUELENS_GRAPH_DATABASE") {
            self.graph.database = Some(v);
        }
        if let Ok(v) = std::env::var("ISSUELENS_GRAPH_FULLTEXT_BINDING") {
            if let Ok(binding) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.graph.schema.fulltext_binding = binding;
            } else {
                tracing::warn!("ignoring invalid ISSUELENS_GRAPH_FULLTEXT_BINDING value: {v}");
            }
        }
    }
}
