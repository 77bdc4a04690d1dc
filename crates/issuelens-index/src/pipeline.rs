//! Embedding records and writing them to the index.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use issuelens_memory::{
    CODEBASE_NAMESPACE, Clock, Document, ISSUES_NAMESPACE, Issue, NAMESPACE_KEY, Readiness,
    ReadinessPolicy, TokioClock, VectorPoint, VectorStore, wait_until_ready,
};
use tokio_util::sync::CancellationToken;

use crate::error::{IndexError, Result};
use crate::retriever::EmbedFn;
use crate::store::point_id;

/// Vector size of the index, matching `text-embedding-3-small` / `ada-002`.
pub const EMBEDDING_DIMENSION: usize = 1536;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dimension: usize,
    /// Embedding calls in flight at once.
    pub concurrency: usize,
    /// Records embedded and written per upsert.
    pub batch_size: usize,
    pub readiness: ReadinessPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dimension: EMBEDDING_DIMENSION,
            concurrency: 4,
            batch_size: 64,
            readiness: ReadinessPolicy::default(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpsertReport {
    /// Whether this run created the index.
    pub created_index: bool,
    pub records: usize,
    pub batches: usize,
}

struct Record {
    id: String,
    text: String,
    payload: HashMap<String, serde_json::Value>,
}

/// Writes documents and issues to one collection, creating it on first use.
///
/// Batches are written in order and never rolled back: when a batch fails, the
/// batches before it stay in the index and a rerun overwrites them by id.
pub struct UpsertPipeline {
    store: Arc<dyn VectorStore>,
    collection: String,
    embed: Box<EmbedFn>,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UpsertPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpsertPipeline")
            .field("collection", &self.collection)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UpsertPipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        embed: Box<EmbedFn>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            embed,
            config,
            clock: Arc::new(TokioClock::new()),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the index if it is missing and wait until it accepts writes.
    ///
    /// Returns `true` when the index was created by this call.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotReady`] when the index is still provisioning at the
    /// readiness ceiling, [`IndexError::Cancelled`] when cancelled, or a store error.
    pub async fn ensure_index(&self) -> Result<bool> {
        let created = self
            .store
            .ensure_collection(&self.collection, self.config.dimension as u64)
            .await?;
        if !created {
            return Ok(false);
        }
        tracing::info!(
            collection = %self.collection,
            dimension = self.config.dimension,
            "created index, waiting for it to become ready"
        );

        let outcome = wait_until_ready(
            &self.config.readiness,
            self.clock.as_ref(),
            &self.cancel,
            || self.store.collection_ready(&self.collection),
        )
        .await?;
        match outcome {
            Readiness::Ready { waited } => {
                tracing::info!(
                    collection = %self.collection,
                    waited_secs = waited.as_secs(),
                    "index ready"
                );
                Ok(true)
            }
            Readiness::NotReady { waited } => Err(IndexError::NotReady {
                collection: self.collection.clone(),
                waited_secs: waited.as_secs(),
            }),
            Readiness::Cancelled => Err(IndexError::Cancelled),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be made ready, or embedding or a write fails.
    pub async fn index_documents(&self, documents: &[Document]) -> Result<UpsertReport> {
        let records = documents
            .iter()
            .map(|d| Record {
                id: d.id.clone(),
                text: d.content.clone(),
                payload: d.to_payload(),
            })
            .collect();
        self.upsert_records(CODEBASE_NAMESPACE, records).await
    }

    /// # Errors
    ///
    /// Returns an error if the index cannot be made ready, or embedding or a write fails.
    pub async fn index_issues(&self, issues: &[Issue]) -> Result<UpsertReport> {
        let records = issues
            .iter()
            .map(|i| Record {
                id: i.id.clone(),
                text: i.embedding_text(),
                payload: i.to_payload(),
            })
            .collect();
        self.upsert_records(ISSUES_NAMESPACE, records).await
    }

    async fn upsert_records(&self, namespace: &str, records: Vec<Record>) -> Result<UpsertReport> {
        let mut report = UpsertReport {
            created_index: self.ensure_index().await?,
            ..UpsertReport::default()
        };

        for batch in records.chunks(self.config.batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            let vectors: Vec<Vec<f32>> =
                futures::stream::iter(batch.iter().map(|r| (self.embed)(&r.text)))
                    .buffered(self.config.concurrency.max(1))
                    .try_collect()
                    .await?;

            let points = batch
                .iter()
                .zip(vectors)
                .map(|(record, vector)| {
                    if vector.len() != self.config.dimension {
                        return Err(IndexError::Dimension {
                            expected: self.config.dimension,
                            actual: vector.len(),
                        });
                    }
                    let mut payload = record.payload.clone();
                    payload.insert(NAMESPACE_KEY.to_owned(), namespace.into());
                    Ok(VectorPoint {
                        id: point_id(namespace, &record.id),
                        vector,
                        payload,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            self.store.upsert(&self.collection, points).await?;
            report.records += batch.len();
            report.batches += 1;
            tracing::debug!(
                collection = %self.collection,
                namespace,
                written = report.records,
                "batch upserted"
            );
        }

        tracing::info!(
            collection = %self.collection,
            namespace,
            records = report.records,
            batches = report.batches,
            "upsert complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use issuelens_llm::any::AnyEmbedder;
    use issuelens_llm::mock::MockEmbedder;
    use issuelens_memory::{InMemoryVectorStore, ManualClock};

    use super::*;
    use crate::retriever::RetrievalOptions;
    use crate::store::VectorRetriever;

    const COLLECTION: &str = "acme-widgets";
    const DIM: usize = 4;

    fn config() -> PipelineConfig {
        PipelineConfig {
            dimension: DIM,
            concurrency: 2,
            batch_size: 2,
            readiness: ReadinessPolicy::default(),
        }
    }

    fn pipeline(store: Arc<InMemoryVectorStore>, embedder: MockEmbedder) -> UpsertPipeline {
        UpsertPipeline::new(
            store,
            COLLECTION,
            Box::new(AnyEmbedder::Mock(embedder).embed_fn()),
            config(),
        )
        .with_clock(Arc::new(ManualClock::new()))
    }

    fn doc(path: &str, content: &str) -> Document {
        Document {
            id: Document::document_id("main", path),
            content: content.into(),
            branch: "main".into(),
            url: format!("https://github.com/acme/widgets/blob/main/{path}"),
            score: 0.0,
        }
    }

    fn issue(n: u64, title: &str) -> Issue {
        Issue {
            id: n.to_string(),
            url: format!("https://github.com/acme/widgets/issues/{n}"),
            content: String::new(),
            title: title.into(),
            state: "open".into(),
        }
    }

    #[test]
    fn default_config() {
        let c = PipelineConfig::default();
        assert_eq!(c.dimension, 1536);
        assert_eq!(c.readiness.interval, Duration::from_secs(5));
        assert_eq!(c.readiness.max_wait, Duration::from_secs(280));
    }

    #[tokio::test]
    async fn upserted_document_reads_back_identical() {
        let store = Arc::new(InMemoryVectorStore::new());
        let p = pipeline(Arc::clone(&store), MockEmbedder::new(DIM));
        let readme = doc("README.md", "hello");

        let report = p.index_documents(std::slice::from_ref(&readme)).await.unwrap();
        assert_eq!(
            report,
            UpsertReport {
                created_index: true,
                records: 1,
                batches: 1
            }
        );

        let retriever = VectorRetriever::new(store, COLLECTION);
        assert_eq!(retriever.query_by_id("main@README.md").await.unwrap(), readme);
    }

    #[tokio::test]
    async fn second_run_reuses_index_and_overwrites() {
        let store = Arc::new(InMemoryVectorStore::new());
        let p = pipeline(Arc::clone(&store), MockEmbedder::new(DIM));
        let docs = [doc("a", "a"), doc("b", "b"), doc("c", "c")];

        let first = p.index_documents(&docs).await.unwrap();
        assert!(first.created_index);
        assert_eq!(first.batches, 2);

        let second = p.index_documents(&docs).await.unwrap();
        assert!(!second.created_index);
        assert_eq!(store.point_count(COLLECTION), Some(3));
    }

    #[tokio::test]
    async fn waits_for_provisioning() {
        let store = Arc::new(InMemoryVectorStore::with_provisioning_probes(3));
        let p = pipeline(Arc::clone(&store), MockEmbedder::new(DIM));
        assert!(p.ensure_index().await.unwrap());
    }

    #[tokio::test]
    async fn readiness_ceiling_is_fatal() {
        let store = Arc::new(InMemoryVectorStore::with_provisioning_probes(1000));
        let p = pipeline(Arc::clone(&store), MockEmbedder::new(DIM));
        let err = p.index_documents(&[doc("a", "a")]).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::NotReady { waited_secs: 280, .. }
        ));
        assert_eq!(store.point_count(COLLECTION), Some(0));
    }

    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let store = Arc::new(InMemoryVectorStore::with_provisioning_probes(5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let p = pipeline(Arc::clone(&store), MockEmbedder::new(DIM)).with_cancellation(cancel);
        assert!(matches!(
            p.index_documents(&[doc("a", "a")]).await,
            Err(IndexError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let store = Arc::new(InMemoryVectorStore::new());
        let p = pipeline(Arc::clone(&store), MockEmbedder::new(DIM + 1));
        assert!(matches!(
            p.index_documents(&[doc("a", "a")]).await,
            Err(IndexError::Dimension {
                expected: 4,
                actual: 5
            })
        ));
    }

    #[tokio::test]
    async fn embedding_failure_keeps_earlier_batches() {
        let store = Arc::new(InMemoryVectorStore::new());
        let p = pipeline(
            Arc::clone(&store),
            MockEmbedder::new(DIM).failing_after(3),
        );
        let docs: Vec<_> = (0..5).map(|i| doc(&format!("f{i}"), "x")).collect();
        let err = p.index_documents(&docs).await.unwrap_err();
        assert!(matches!(err, IndexError::Embedding(_)));
        assert_eq!(store.point_count(COLLECTION), Some(2));
    }

    #[tokio::test]
    async fn issues_land_in_issue_namespace() {
        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = MockEmbedder::new(DIM)
            .with_vector("Title:CrashBody:", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("Title:HangBody:", vec![0.9, 0.1, 0.0, 0.0])
            .with_vector("hello", vec![1.0, 0.0, 0.0, 0.0]);
        let p = pipeline(Arc::clone(&store), embedder);

        p.index_documents(&[doc("README.md", "hello")]).await.unwrap();
        let report = p
            .index_issues(&[issue(1, "Crash"), issue(2, "Hang")])
            .await
            .unwrap();
        assert_eq!(report.records, 2);

        let retriever = VectorRetriever::new(store, COLLECTION);
        let text = retriever
            .retrieve_issue(
                vec![1.0, 0.0, 0.0, 0.0],
                Some(1),
                &RetrievalOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("[Hang #2 (open)]"));

        let docs = retriever
            .retrieve_by_vector(vec![1.0, 0.0, 0.0, 0.0], &RetrievalOptions::default())
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["main@README.md"]);
    }
}
