//! Hybrid vector + full-text retrieval over a Neo4j graph.

use neo4rs::{ConfigBuilder, Graph, Query, Row, query};
use serde::{Deserialize, Serialize};

use issuelens_memory::{Document, Issue};

use crate::error::{IndexError, Result};
use crate::fusion::{Hit, fuse_max};
use crate::retriever::{EmbedFn, RetrievalOptions};
use crate::sanitize::{escape_fulltext, inline_fulltext_literal};
use crate::similar_issues::{SIMILAR_ISSUES_LIMIT, format_similar_issues};

/// Default number of documents returned by the graph backend.
pub const DEFAULT_GRAPH_TOP_K: usize = 5;

/// Candidates each scan fetches per requested result when a branch filter is set.
///
/// The filter runs after the index scans, so an unscaled `k` would come back short
/// whenever other branches hold the nearest nodes.
pub const BRANCH_OVERFETCH: usize = 4;

/// How the full-text query string reaches the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulltextBinding {
    /// Sent as a bound parameter.
    #[default]
    Parameter,
    /// Written into the query text as an escaped string literal.
    Inline,
}

/// Index and property names of the graph the retriever reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSchema {
    pub fulltext_index: String,
    pub vector_index: String,
    pub issue_vector_index: String,
    /// Node property holding the document id.
    pub id_property: String,
    pub content_property: String,
    pub branch_property: String,
    pub url_property: String,
    pub fulltext_binding: FulltextBinding,
}

impl Default for GraphSchema {
    fn default() -> Self {
        Self {
            fulltext_index: "keyword".into(),
            vector_index: "vector".into(),
            issue_vector_index: "issue_vector".into(),
            id_property: "source".into(),
            content_property: "text".into(),
            branch_property: "branch".into(),
            url_property: "url".into(),
            fulltext_binding: FulltextBinding::Parameter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modality {
    Vector,
    Fulltext,
}

const DOCUMENT_COLUMNS: &str = "elementId(node) AS node_key, \
     coalesce(toString(node[$id_property]), '') AS id, \
     coalesce(toString(node[$content_property]), '') AS text, \
     coalesce(toString(node[$branch_property]), '') AS branch, \
     coalesce(toString(node[$url_property]), '') AS url, \
     score";

const BRANCH_FILTER: &str = "WHERE size($branches) = 0 OR node[$branch_property] IN $branches";

fn vector_scan() -> String {
    format!(
        "CALL db.index.vector.queryNodes($vector_index, $k, $embedding) YIELD node, score \
         {BRANCH_FILTER} \
         RETURN 'vector' AS modality, {DOCUMENT_COLUMNS}"
    )
}

fn fulltext_scan(fulltext_arg: &str) -> String {
    format!(
        "CALL db.index.fulltext.queryNodes($fulltext_index, {fulltext_arg}, {{limit: $k}}) \
         YIELD node, score \
         {BRANCH_FILTER} \
         RETURN 'fulltext' AS modality, {DOCUMENT_COLUMNS}"
    )
}

/// Cypher for the hybrid search: both scans in one round trip, raw scores.
fn hybrid_cypher(binding: FulltextBinding, text: &str) -> String {
    let fulltext_arg = match binding {
        FulltextBinding::Parameter => "$fulltext_query".to_owned(),
        FulltextBinding::Inline => inline_fulltext_literal(text),
    };
    format!("{} UNION ALL {}", vector_scan(), fulltext_scan(&fulltext_arg))
}

const ISSUE_CYPHER: &str = "CALL db.index.vector.queryNodes($issue_vector_index, $k, $embedding) \
     YIELD node, score \
     WHERE coalesce(toString(node.id), '') <> $exclude \
     RETURN coalesce(toString(node.id), '') AS id, \
     coalesce(toString(node.url), '') AS url, \
     coalesce(toString(node.content), '') AS content, \
     coalesce(toString(node.title), '') AS title, \
     coalesce(toString(node.state), '') AS state, \
     score \
     ORDER BY score DESC";

fn embedding_param(vector: Vec<f32>) -> Vec<f64> {
    vector.into_iter().map(f64::from).collect()
}

fn k_param(k: usize) -> i64 {
    i64::try_from(k).unwrap_or(i64::MAX)
}

fn scan_k(top_k: usize, options: &RetrievalOptions) -> usize {
    if options.branches.is_empty() {
        top_k
    } else {
        top_k.saturating_mul(BRANCH_OVERFETCH)
    }
}

fn document_hit(row: &Row) -> Result<(Modality, Hit<Document>)> {
    let modality = match row.get::<String>("modality")?.as_str() {
        "fulltext" => Modality::Fulltext,
        _ => Modality::Vector,
    };
    let hit = Hit {
        key: row.get("node_key")?,
        score: row.get("score")?,
        item: Document {
            id: row.get("id")?,
            content: row.get("text")?,
            branch: row.get("branch")?,
            url: row.get("url")?,
            score: 0.0,
        },
    };
    Ok((modality, hit))
}

/// Normalize and fuse raw rows into the final ranking.
///
/// No rows at all is [`IndexError::NotFound`].
fn rank_hybrid(
    rows: Vec<(Modality, Hit<Document>)>,
    top_k: usize,
    what: &str,
) -> Result<Vec<Document>> {
    if rows.is_empty() {
        return Err(IndexError::NotFound(what.to_owned()));
    }
    let (vector, fulltext): (Vec<_>, Vec<_>) =
        rows.into_iter().partition(|(m, _)| *m == Modality::Vector);
    let fused = fuse_max(
        vector.into_iter().map(|(_, h)| h).collect(),
        fulltext.into_iter().map(|(_, h)| h).collect(),
        top_k,
    );
    Ok(fused.into_iter().map(into_scored_document).collect())
}

fn into_scored_document(hit: Hit<Document>) -> Document {
    Document {
        score: hit.score,
        ..hit.item
    }
}

/// Graph-backed retriever fusing a vector index scan with a full-text index scan.
#[derive(Clone)]
pub struct GraphRetriever {
    graph: Graph,
    schema: GraphSchema,
    default_top_k: usize,
}

impl std::fmt::Debug for GraphRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRetriever")
            .field("schema", &self.schema)
            .field("default_top_k", &self.default_top_k)
            .finish_non_exhaustive()
    }
}

impl GraphRetriever {
    /// # Errors
    ///
    /// Returns an error if the connection settings are invalid or the server is
    /// unreachable.
    pub async fn connect(
        uri: &str,
        user: &str,
        password: &str,
        database: Option<&str>,
        schema: GraphSchema,
    ) -> Result<Self> {
        let mut builder = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password);
        if let Some(db) = database {
            builder = builder.db(db);
        }
        let graph = Graph::connect(builder.build()?).await?;
        tracing::info!(uri, "connected to graph");
        Ok(Self::from_graph(graph, schema))
    }

    #[must_use]
    pub fn from_graph(graph: Graph, schema: GraphSchema) -> Self {
        Self {
            graph,
            schema,
            default_top_k: DEFAULT_GRAPH_TOP_K,
        }
    }

    #[must_use]
    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }

    #[must_use]
    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    #[must_use]
    pub fn schema(&self) -> &GraphSchema {
        &self.schema
    }

    /// Run a trivial query to check the server answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn verify_connectivity(&self) -> Result<()> {
        self.graph.run(query("RETURN 1")).await?;
        Ok(())
    }

    /// Release the connection pool. Clones share the pool, which closes once the last
    /// one is gone.
    pub fn close(self) {
        tracing::debug!("closing graph connection pool");
        drop(self.graph);
    }

    fn document_query(
        &self,
        cypher: &str,
        vector: Vec<f32>,
        k: usize,
        options: &RetrievalOptions,
    ) -> Query {
        query(cypher)
            .param("vector_index", self.schema.vector_index.clone())
            .param("fulltext_index", self.schema.fulltext_index.clone())
            .param("id_property", self.schema.id_property.clone())
            .param("content_property", self.schema.content_property.clone())
            .param("branch_property", self.schema.branch_property.clone())
            .param("url_property", self.schema.url_property.clone())
            .param("branches", options.branches.clone())
            .param("k", k_param(scan_k(k, options)))
            .param("embedding", embedding_param(vector))
    }

    async fn document_rows(&self, q: Query) -> Result<Vec<(Modality, Hit<Document>)>> {
        let mut stream = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(document_hit(&row)?);
        }
        Ok(rows)
    }

    /// Embed `text`, run both scans, and return the fused top documents.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] when neither scan matches, or an error if
    /// embedding or the query fails.
    pub async fn retrieve(
        &self,
        text: &str,
        embed: &EmbedFn,
        options: &RetrievalOptions,
    ) -> Result<Vec<Document>> {
        let vector = embed(text).await?;
        let top_k = options.resolved_top_k(self.default_top_k);

        let cypher = hybrid_cypher(self.schema.fulltext_binding, text);
        let mut q = self.document_query(&cypher, vector, top_k, options);
        if self.schema.fulltext_binding == FulltextBinding::Parameter {
            q = q.param("fulltext_query", escape_fulltext(text));
        }

        let rows = self.document_rows(q).await?;
        tracing::debug!(hits = rows.len(), top_k, "hybrid search");
        rank_hybrid(rows, top_k, "hybrid search")
    }

    /// Vector scan only, normalized by the best hit.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] when nothing matches, or an error if the query
    /// fails.
    pub async fn retrieve_by_vector(
        &self,
        vector: Vec<f32>,
        options: &RetrievalOptions,
    ) -> Result<Vec<Document>> {
        let top_k = options.resolved_top_k(self.default_top_k);
        let q = self.document_query(&vector_scan(), vector, top_k, options);
        let rows = self.document_rows(q).await?;
        rank_hybrid(rows, top_k, "vector search")
    }

    /// # Errors
    ///
    /// Returns [`IndexError::NotFound`] when no other issue matches, or an error if the
    /// query fails.
    pub async fn retrieve_issue(
        &self,
        vector: Vec<f32>,
        issue_number: Option<u64>,
        _options: &RetrievalOptions,
    ) -> Result<String> {
        let exclude = issue_number.map(|n| n.to_string()).unwrap_or_default();
        let k = SIMILAR_ISSUES_LIMIT + usize::from(issue_number.is_some());
        let q = query(ISSUE_CYPHER)
            .param("issue_vector_index", self.schema.issue_vector_index.clone())
            .param("k", k_param(k))
            .param("embedding", embedding_param(vector))
            .param("exclude", exclude);

        let mut stream = self.graph.execute(q).await?;
        let mut issues = Vec::new();
        while let Some(row) = stream.next().await? {
            issues.push(Issue {
                id: row.get("id")?,
                url: row.get("url")?,
                content: row.get("content")?,
                title: row.get("title")?,
                state: row.get("state")?,
            });
        }
        issues.truncate(SIMILAR_ISSUES_LIMIT);
        if issues.is_empty() {
            return Err(IndexError::NotFound("similar issues".into()));
        }
        Ok(format_similar_issues(&issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(modality: Modality, key: &str, score: f64) -> (Modality, Hit<Document>) {
        (
            modality,
            Hit {
                key: key.into(),
                score,
                item: Document {
                    id: format!("main@{key}"),
                    content: key.into(),
                    branch: "main".into(),
                    url: String::new(),
                    score: 0.0,
                },
            },
        )
    }

    #[test]
    fn schema_defaults() {
        let s = GraphSchema::default();
        assert_eq!(s.fulltext_index, "keyword");
        assert_eq!(s.vector_index, "vector");
        assert_eq!(s.id_property, "source");
        assert_eq!(s.content_property, "text");
        assert_eq!(s.fulltext_binding, FulltextBinding::Parameter);
    }

    #[test]
    fn schema_deserializes_partial() {
        let s: GraphSchema =
            serde_json::from_str(r#"{"id_property": "path", "fulltext_binding": "inline"}"#)
                .unwrap();
        assert_eq!(s.id_property, "path");
        assert_eq!(s.fulltext_binding, FulltextBinding::Inline);
        assert_eq!(s.vector_index, "vector");
    }

    #[test]
    fn zero_rows_is_not_found() {
        assert!(matches!(
            rank_hybrid(Vec::new(), 5, "hybrid search"),
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn rank_fuses_by_max_and_truncates() {
        let rows = vec![
            raw(Modality::Vector, "a", 0.8),
            raw(Modality::Vector, "b", 0.4),
            raw(Modality::Fulltext, "b", 4.0),
            raw(Modality::Fulltext, "c", 1.0),
            raw(Modality::Fulltext, "d", 0.5),
        ];
        let docs = rank_hybrid(rows, 3, "q").unwrap();
        let got: Vec<_> = docs.iter().map(|d| (d.content.as_str(), d.score)).collect();
        assert_eq!(got, [("a", 1.0), ("b", 1.0), ("c", 0.25)]);
    }

    #[test]
    fn parameter_binding_keeps_text_out_of_cypher() {
        let cypher = hybrid_cypher(FulltextBinding::Parameter, "x\") RETURN 1 //");
        assert!(cypher.contains("$fulltext_query"));
        assert!(!cypher.contains("RETURN 1 //"));
        assert!(cypher.contains(" UNION ALL "));
    }

    #[test]
    fn inline_binding_embeds_escaped_literal() {
        let cypher = hybrid_cypher(FulltextBinding::Inline, "a:b");
        assert!(!cypher.contains("$fulltext_query"));
        assert!(cypher.contains(r#"queryNodes($fulltext_index, "a\\:b", {limit: $k})"#));
    }

    #[test]
    fn vector_scan_has_no_fulltext_clause() {
        let cypher = vector_scan();
        assert!(cypher.contains("db.index.vector.queryNodes"));
        assert!(!cypher.contains("fulltext"));
    }

    #[test]
    fn every_scan_projects_the_same_columns() {
        for part in hybrid_cypher(FulltextBinding::Parameter, "q").split(" UNION ALL ") {
            let columns = ["modality", "node_key", "AS id", "AS text", "AS branch", "AS url"];
            for column in columns {
                assert!(part.contains(column), "{column} missing from {part}");
            }
        }
    }

    #[test]
    fn branch_filter_widens_the_scans() {
        let all = RetrievalOptions::default();
        let main = RetrievalOptions::default().branches(vec!["main".into()]);
        assert_eq!(scan_k(5, &all), 5);
        assert_eq!(scan_k(5, &main), 5 * BRANCH_OVERFETCH);
        assert_eq!(scan_k(usize::MAX, &main), usize::MAX);
    }

    #[test]
    fn embedding_param_widens() {
        assert_eq!(embedding_param(vec![0.5, 1.0]), [0.5, 1.0]);
        assert_eq!(k_param(5), 5);
    }
}
