//! Vector-only retrieval over a namespaced [`VectorStore`] collection.

use std::sync::Arc;

use issuelens_memory::{
    CODEBASE_NAMESPACE, Document, FieldCondition, FieldValue, ISSUE_NUMBER_KEY, ISSUES_NAMESPACE,
    Issue, NAMESPACE_KEY, VectorFilter, VectorStore,
};

use crate::error::{IndexError, Result};
use crate::retriever::{EmbedFn, RetrievalOptions};
use crate::similar_issues::{SIMILAR_ISSUES_LIMIT, format_similar_issues};

/// Default number of documents returned by the vector backend.
pub const DEFAULT_VECTOR_TOP_K: usize = 3;

const POINT_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x69, 0x73, 0x73, 0x75, // "issu"
    0x65, 0x6c, 0x65, 0x6e, // "elen"
    0x73, 0x2d, 0x70, 0x6f, // "s-po"
    0x69, 0x6e, 0x74, 0x00, // "int\0"
]);

/// Stable point id for record `id` in `namespace`. Upserting the same record twice
/// overwrites it.
#[must_use]
pub fn point_id(namespace: &str, id: &str) -> String {
    uuid::Uuid::new_v5(&POINT_NAMESPACE, format!("{namespace}/{id}").as_bytes()).to_string()
}

fn namespace_condition(namespace: &str) -> FieldCondition {
    FieldCondition::text(NAMESPACE_KEY, namespace)
}

/// Typed proof that the caller re-entered the index name before dropping it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropConfirmation {
    index: String,
}

impl DropConfirmation {
    /// # Errors
    ///
    /// Returns [`IndexError::Unconfirmed`] unless `typed` equals `index`.
    pub fn new(index: &str, typed: &str) -> Result<Self> {
        if index.is_empty() || index != typed {
            return Err(IndexError::Unconfirmed {
                index: index.to_owned(),
            });
        }
        Ok(Self {
            index: index.to_owned(),
        })
    }

    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }
}

/// Nearest-neighbor retrieval with scores dropped: every returned document has
/// `score == 0.0`.
#[derive(Clone)]
pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    collection: String,
    default_top_k: usize,
}

impl std::fmt::Debug for VectorRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorRetriever")
            .field("collection", &self.collection)
            .field("default_top_k", &self.default_top_k)
            .finish_non_exhaustive()
    }
}

impl VectorRetriever {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            default_top_k: DEFAULT_VECTOR_TOP_K,
        }
    }

    #[must_use]
    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// # Errors
    ///
    /// Returns an error if embedding or the search fails.
    pub async fn retrieve(
        &self,
        query: &str,
        embed: &EmbedFn,
        options: &RetrievalOptions,
    ) -> Result<Vec<Document>> {
        let vector = embed(query).await?;
        self.retrieve_by_vector(vector, options).await
    }

    /// Nearest documents in the codebase namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub async fn retrieve_by_vector(
        &self,
        vector: Vec<f32>,
        options: &RetrievalOptions,
    ) -> Result<Vec<Document>> {
        let top_k = options.resolved_top_k(self.default_top_k);
        let mut filter = VectorFilter {
            must: vec![namespace_condition(CODEBASE_NAMESPACE)],
            must_not: vec![],
        };
        if !options.branches.is_empty() {
            filter
                .must
                .push(FieldCondition::any_text("branch", options.branches.clone()));
        }

        let hits = self
            .store
            .search(&self.collection, vector, top_k as u64, Some(filter))
            .await?;
        tracing::debug!(collection = %self.collection, hits = hits.len(), top_k, "vector search");
        Ok(hits
            .iter()
            .filter_map(|h| Document::from_payload(&h.payload))
            .collect())
    }

    /// Markdown list of the closest issues, excluding `issue_number` itself.
    ///
    /// Fewer than three matches are listed as they are.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] when no issue matches, or an error if the
    /// search fails.
    pub async fn retrieve_issue(
        &self,
        vector: Vec<f32>,
        issue_number: Option<u64>,
        _options: &RetrievalOptions,
    ) -> Result<String> {
        let mut filter = VectorFilter {
            must: vec![namespace_condition(ISSUES_NAMESPACE)],
            must_not: vec![],
        };
        if let Some(n) = issue_number.and_then(|n| i64::try_from(n).ok()) {
            filter.must_not.push(FieldCondition {
                field: ISSUE_NUMBER_KEY.into(),
                value: FieldValue::Integer(n),
            });
        }

        let hits = self
            .store
            .search(
                &self.collection,
                vector,
                SIMILAR_ISSUES_LIMIT as u64,
                Some(filter),
            )
            .await?;
        let issues: Vec<Issue> = hits
            .iter()
            .filter_map(|h| Issue::from_payload(&h.payload))
            .collect();
        if issues.is_empty() {
            return Err(IndexError::NotFound("similar issues".into()));
        }
        if issues.len() < SIMILAR_ISSUES_LIMIT {
            tracing::debug!(found = issues.len(), "fewer similar issues than requested");
        }
        Ok(format_similar_issues(&issues))
    }

    /// Look up one document by its `branch@path` id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if no such document is stored.
    pub async fn query_by_id(&self, id: &str) -> Result<Document> {
        self.lookup(CODEBASE_NAMESPACE, id)
            .await?
            .as_ref()
            .and_then(Document::from_payload)
            .ok_or_else(|| IndexError::NotFound(format!("document {id}")))
    }

    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] if no such issue is stored.
    pub async fn query_issue_by_id(&self, id: &str) -> Result<Issue> {
        self.lookup(ISSUES_NAMESPACE, id)
            .await?
            .as_ref()
            .and_then(Issue::from_payload)
            .ok_or_else(|| IndexError::NotFound(format!("issue {id}")))
    }

    async fn lookup(
        &self,
        namespace: &str,
        id: &str,
    ) -> Result<Option<std::collections::HashMap<String, serde_json::Value>>> {
        let points = self
            .store
            .retrieve(&self.collection, vec![point_id(namespace, id)])
            .await?;
        Ok(points
            .into_iter()
            .map(|p| p.payload)
            .find(|payload| {
                payload.get(NAMESPACE_KEY).and_then(serde_json::Value::as_str) == Some(namespace)
            }))
    }

    /// Delete records by id within one namespace; the other namespace is untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    pub async fn delete(&self, namespace: &str, ids: &[String]) -> Result<()> {
        let point_ids = ids.iter().map(|id| point_id(namespace, id)).collect();
        self.store
            .delete_by_ids(&self.collection, point_ids)
            .await?;
        tracing::info!(collection = %self.collection, namespace, count = ids.len(), "deleted records");
        Ok(())
    }

    /// Drop the whole collection.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Unconfirmed`] if the confirmation names another index, or
    /// an error if the deletion fails.
    pub async fn drop_index(&self, confirmation: DropConfirmation) -> Result<()> {
        if confirmation.index() != self.collection {
            return Err(IndexError::Unconfirmed {
                index: self.collection.clone(),
            });
        }
        self.store.delete_collection(&self.collection).await?;
        tracing::warn!(collection = %self.collection, "index dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use issuelens_memory::{InMemoryVectorStore, VectorPoint};

    use super::*;

    const COLLECTION: &str = "acme-widgets";

    fn doc(branch: &str, path: &str, content: &str) -> Document {
        Document {
            id: Document::document_id(branch, path),
            content: content.into(),
            branch: branch.into(),
            url: format!("https://github.com/acme/widgets/blob/{branch}/{path}"),
            score: 0.0,
        }
    }

    fn issue(n: u64, title: &str) -> Issue {
        Issue {
            id: n.to_string(),
            url: format!("https://github.com/acme/widgets/issues/{n}"),
            content: format!("body {n}"),
            title: title.into(),
            state: "open".into(),
        }
    }

    fn with_namespace(
        mut payload: HashMap<String, serde_json::Value>,
        namespace: &str,
    ) -> HashMap<String, serde_json::Value> {
        payload.insert(NAMESPACE_KEY.into(), namespace.into());
        payload
    }

    async fn seeded(docs: &[(Document, Vec<f32>)], issues: &[(Issue, Vec<f32>)]) -> VectorRetriever {
        let store = Arc::new(InMemoryVectorStore::new());
        store.ensure_collection(COLLECTION, 2).await.unwrap();
        let mut points: Vec<VectorPoint> = docs
            .iter()
            .map(|(d, v)| VectorPoint {
                id: point_id(CODEBASE_NAMESPACE, &d.id),
                vector: v.clone(),
                payload: with_namespace(d.to_payload(), CODEBASE_NAMESPACE),
            })
            .collect();
        points.extend(issues.iter().map(|(i, v)| VectorPoint {
            id: point_id(ISSUES_NAMESPACE, &i.id),
            vector: v.clone(),
            payload: with_namespace(i.to_payload(), ISSUES_NAMESPACE),
        }));
        store.upsert(COLLECTION, points).await.unwrap();
        VectorRetriever::new(store, COLLECTION)
    }

    #[test]
    fn point_id_is_stable_and_namespaced() {
        assert_eq!(point_id("codebase", "main@a"), point_id("codebase", "main@a"));
        assert_ne!(point_id("codebase", "1"), point_id("issues", "1"));
        assert!(uuid::Uuid::parse_str(&point_id("issues", "1")).is_ok());
    }

    #[test]
    fn drop_confirmation_requires_exact_name() {
        assert!(DropConfirmation::new("acme-widgets", "acme-widgets").is_ok());
        assert!(matches!(
            DropConfirmation::new("acme-widgets", "acme"),
            Err(IndexError::Unconfirmed { .. })
        ));
        assert!(DropConfirmation::new("", "").is_err());
    }

    #[tokio::test]
    async fn retrieve_by_vector_defaults_to_three_and_zero_scores() {
        let docs: Vec<_> = (0u8..5)
            .map(|i| (doc("main", &format!("f{i}.rs"), "x"), vec![1.0, f32::from(i) * 0.1]))
            .collect();
        let r = seeded(&docs, &[]).await;
        let out = r
            .retrieve_by_vector(vec![1.0, 0.0], &RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].id, "main@f0.rs");
        assert!(out.iter().all(|d| d.score.abs() < f64::EPSILON));
    }

    #[tokio::test]
    async fn retrieve_by_vector_honors_top_k_and_branches() {
        let r = seeded(
            &[
                (doc("main", "a.rs", "a"), vec![1.0, 0.0]),
                (doc("dev", "a.rs", "a2"), vec![1.0, 0.05]),
                (doc("old", "a.rs", "a3"), vec![1.0, 0.1]),
            ],
            &[(issue(1, "not a document"), vec![1.0, 0.0])],
        )
        .await;
        let out = r
            .retrieve_by_vector(
                vec![1.0, 0.0],
                &RetrievalOptions::default()
                    .top_k(5)
                    .branches(vec!["dev".into(), "old".into()]),
            )
            .await
            .unwrap();
        let ids: Vec<_> = out.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["dev@a.rs", "old@a.rs"]);
    }

    #[tokio::test]
    async fn retrieve_embeds_query_text() {
        let r = seeded(&[(doc("main", "README.md", "hello"), vec![0.0, 1.0])], &[]).await;
        let embed = |_: &str| -> issuelens_llm::EmbedFuture {
            Box::pin(async { Ok::<_, issuelens_llm::LlmError>(vec![0.0f32, 1.0]) })
        };
        let out = r
            .retrieve("hello", &embed, &RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "hello");
    }

    #[tokio::test]
    async fn query_by_id_round_trips_document() {
        let readme = doc("main", "README.md", "hello");
        let r = seeded(&[(readme.clone(), vec![1.0, 0.0])], &[]).await;
        assert_eq!(r.query_by_id("main@README.md").await.unwrap(), readme);
        assert!(matches!(
            r.query_by_id("main@missing").await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn query_issue_by_id() {
        let r = seeded(&[], &[(issue(9, "Nine"), vec![1.0, 0.0])]).await;
        assert_eq!(r.query_issue_by_id("9").await.unwrap().title, "Nine");
        assert!(r.query_by_id("9").await.is_err());
    }

    #[tokio::test]
    async fn retrieve_issue_lists_top_three_excluding_self() {
        let r = seeded(
            &[],
            &[
                (issue(1, "Self"), vec![1.0, 0.0]),
                (issue(2, "Two"), vec![1.0, 0.1]),
                (issue(3, "Three"), vec![1.0, 0.2]),
                (issue(4, "Four"), vec![1.0, 0.3]),
                (issue(5, "Five"), vec![1.0, 0.9]),
            ],
        )
        .await;
        let text = r
            .retrieve_issue(vec![1.0, 0.0], Some(1), &RetrievalOptions::default())
            .await
            .unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("1. [Two #2 (open)]"));
        assert!(lines[2].starts_with("2. [Three #3 (open)]"));
        assert!(lines[3].starts_with("3. [Four #4 (open)]"));
        assert!(!text.contains("Self"));
    }

    #[tokio::test]
    async fn retrieve_issue_with_fewer_matches() {
        let r = seeded(&[], &[(issue(2, "Two"), vec![1.0, 0.0])]).await;
        let text = r
            .retrieve_issue(vec![1.0, 0.0], None, &RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn retrieve_issue_without_matches_is_not_found() {
        let r = seeded(&[(doc("main", "a", "a"), vec![1.0, 0.0])], &[]).await;
        assert!(matches!(
            r.retrieve_issue(vec![1.0, 0.0], None, &RetrievalOptions::default())
                .await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_namespace_scoped() {
        let r = seeded(
            &[(doc("main", "a", "a"), vec![1.0, 0.0])],
            &[(issue(1, "One"), vec![1.0, 0.0])],
        )
        .await;
        r.delete(ISSUES_NAMESPACE, &["main@a".into()]).await.unwrap();
        assert!(r.query_by_id("main@a").await.is_ok());
        r.delete(CODEBASE_NAMESPACE, &["main@a".into()]).await.unwrap();
        assert!(r.query_by_id("main@a").await.is_err());
        assert!(r.query_issue_by_id("1").await.is_ok());
    }

    #[tokio::test]
    async fn drop_index_requires_matching_confirmation() {
        let r = seeded(&[(doc("main", "a", "a"), vec![1.0, 0.0])], &[]).await;
        let wrong = DropConfirmation::new("other", "other").unwrap();
        assert!(matches!(
            r.drop_index(wrong).await,
            Err(IndexError::Unconfirmed { .. })
        ));
        let ok = DropConfirmation::new(COLLECTION, COLLECTION).unwrap();
        r.drop_index(ok).await.unwrap();
        assert!(!r.store.collection_exists(COLLECTION).await.unwrap());
    }
}
