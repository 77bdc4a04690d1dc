//! Records stored in the index and their persisted payload schema.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Namespace holding one [`Document`] per (branch, file).
pub const CODEBASE_NAMESPACE: &str = "codebase";
/// Namespace holding one [`Issue`] per issue number.
pub const ISSUES_NAMESPACE: &str = "issues";

/// Payload key carrying the namespace of a stored point.
pub const NAMESPACE_KEY: &str = "namespace";
/// Payload key carrying the numeric issue number, used for self-exclusion.
pub const ISSUE_NUMBER_KEY: &str = "issue_number";

/// One file at one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// `branch@path`, unique per branch and path.
    pub id: String,
    pub content: String,
    pub branch: String,
    pub url: String,
    /// Fused or normalized similarity in `[0, 1]`, or `0.0` when the backend
    /// does not propagate scores.
    pub score: f64,
}

impl Document {
    #[must_use]
    pub fn document_id(branch: &str, path: &str) -> String {
        format!("{branch}@{path}")
    }

    /// Payload in the persisted `{id, content, branch, url, score}` schema.
    #[must_use]
    pub fn to_payload(&self) -> HashMap<String, serde_json::Value> {
        HashMap::from([
            ("id".to_owned(), serde_json::Value::String(self.id.clone())),
            (
                "content".to_owned(),
                serde_json::Value::String(self.content.clone()),
            ),
            (
                "branch".to_owned(),
                serde_json::Value::String(self.branch.clone()),
            ),
            ("url".to_owned(), serde_json::Value::String(self.url.clone())),
            ("score".to_owned(), serde_json::json!(self.score)),
        ])
    }

    /// Rebuild a document from a stored payload. The score is always reset to `0.0`.
    ///
    /// Returns `None` when the payload has no string `id`.
    #[must_use]
    pub fn from_payload(payload: &HashMap<String, serde_json::Value>) -> Option<Self> {
        Some(Self {
            id: payload.get("id")?.as_str()?.to_owned(),
            content: string_field(payload, "content"),
            branch: string_field(payload, "branch"),
            url: string_field(payload, "url"),
            score: 0.0,
        })
    }
}

/// One issue with its comment thread folded into `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Issue number rendered as a string.
    pub id: String,
    pub url: String,
    pub content: String,
    pub title: String,
    pub state: String,
}

impl Issue {
    #[must_use]
    pub fn number(&self) -> Option<u64> {
        self.id.parse().ok()
    }

    /// Text handed to the embedding provider.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!("Title:{}Body:{}", self.title, self.content)
    }

    /// Payload in the persisted `{id, content, title, url, state}` schema.
    #[must_use]
    pub fn to_payload(&self) -> HashMap<String, serde_json::Value> {
        let mut payload = HashMap::from([
            ("id".to_owned(), serde_json::Value::String(self.id.clone())),
            (
                "content".to_owned(),
                serde_json::Value::String(self.content.clone()),
            ),
            (
                "title".to_owned(),
                serde_json::Value::String(self.title.clone()),
            ),
            ("url".to_owned(), serde_json::Value::String(self.url.clone())),
            (
                "state".to_owned(),
                serde_json::Value::String(self.state.clone()),
            ),
        ]);
        if let Some(n) = self.number() {
            payload.insert(ISSUE_NUMBER_KEY.to_owned(), serde_json::json!(n));
        }
        payload
    }

    /// Returns `None` when the payload has no string `id`.
    #[must_use]
    pub fn from_payload(payload: &HashMap<String, serde_json::Value>) -> Option<Self> {
        Some(Self {
            id: payload.get("id")?.as_str()?.to_owned(),
            url: string_field(payload, "url"),
            content: string_field(payload, "content"),
            title: string_field(payload, "title"),
            state: string_field(payload, "state"),
        })
    }
}

fn string_field(payload: &HashMap<String, serde_json::Value>, key: &str) -> String {
    payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub author: String,
    pub body: String,
}

/// An issue as delivered by the issue tracker, before it is flattened into an [`Issue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueThread {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub comments: Vec<IssueComment>,
}

impl IssueThread {
    #[must_use]
    pub fn into_issue(self) -> Issue {
        let mut content = self.body.unwrap_or_default();
        content.push_str("\nComments: ");
        for comment in &self.comments {
            content.push_str(&comment.author);
            content.push(':');
            content.push_str(&comment.body);
            content.push('\n');
        }
        Issue {
            id: self.number.to_string(),
            url: self.url,
            content,
            title: self.title,
            state: self.state,
        }
    }
}

impl From<IssueThread> for Issue {
    fn from(thread: IssueThread) -> Self {
        thread.into_issue()
    }
}
