//! Repository indexing: walk branches, read files, bound them by tokens.

use std::sync::Arc;

use issuelens_llm::tokens::TokenCounter;
use issuelens_memory::Document;

use crate::error::{IndexError, Result};
use crate::locator::RepoLocator;
use crate::source::RepositorySource;

/// Token ceiling for one stored document, matching the embedding input limit.
pub const MAX_DOCUMENT_TOKENS: usize = 8192;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub max_document_tokens: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_document_tokens: MAX_DOCUMENT_TOKENS,
        }
    }
}

/// Why a file produced no document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Zero bytes or whitespace only.
    Empty,
    /// Not valid UTF-8.
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub branch: String,
    pub path: String,
    pub reason: SkipReason,
}

/// Summary of an indexing run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub branches: Vec<String>,
    pub files_scanned: usize,
    pub documents: usize,
    pub truncated: usize,
    pub skipped: Vec<SkippedFile>,
    /// Requested branches the source does not have.
    pub missing_branches: Vec<String>,
    pub duration_ms: u64,
}

/// Turns every file of the selected branches into a [`Document`].
///
/// A file with no textual content is skipped and recorded in the report. A file
/// that cannot be read aborts the run.
pub struct RepoIndexer {
    locator: RepoLocator,
    tokens: Arc<dyn TokenCounter>,
    config: IndexerConfig,
}

impl RepoIndexer {
    #[must_use]
    pub fn new(locator: RepoLocator, tokens: Arc<dyn TokenCounter>, config: IndexerConfig) -> Self {
        Self {
            locator,
            tokens,
            config,
        }
    }

    #[must_use]
    pub fn locator(&self) -> &RepoLocator {
        &self.locator
    }

    /// Build documents for `targets`, or for every branch when `targets` is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot list branches or files, a file cannot be
    /// read, or token counting fails.
    pub fn documents(
        &self,
        source: &dyn RepositorySource,
        targets: &[String],
    ) -> Result<(Vec<Document>, IndexReport)> {
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();
        let available = source.branches()?;

        if targets.is_empty() {
            report.branches = available;
        } else {
            for target in targets {
                if available.contains(target) {
                    report.branches.push(target.clone());
                } else {
                    tracing::warn!(branch = %target, "requested branch not found");
                    report.missing_branches.push(target.clone());
                }
            }
        }

        let mut documents = Vec::new();
        for branch in &report.branches {
            let files = source.list_files(branch)?;
            tracing::info!(%branch, files = files.len(), "indexing branch");
            for path in files {
                report.files_scanned += 1;
                let raw = source.read_file(branch, &path)?;
                match self.document(branch, &path, raw)? {
                    FileOutcome::Indexed { doc, truncated } => {
                        if truncated {
                            report.truncated += 1;
                        }
                        documents.push(doc);
                    }
                    FileOutcome::Skipped(reason) => {
                        tracing::debug!(%branch, %path, ?reason, "skipping file");
                        report.skipped.push(SkippedFile {
                            branch: branch.clone(),
                            path,
                            reason,
                        });
                    }
                }
            }
        }

        report.documents = documents.len();
        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            documents = report.documents,
            truncated = report.truncated,
            skipped = report.skipped.len(),
            "repository indexed"
        );
        Ok((documents, report))
    }

    fn document(&self, branch: &str, path: &str, raw: Vec<u8>) -> Result<FileOutcome> {
        let Ok(mut content) = String::from_utf8(raw) else {
            return Ok(FileOutcome::Skipped(SkipReason::Binary));
        };
        if content.trim().is_empty() {
            return Ok(FileOutcome::Skipped(SkipReason::Empty));
        }

        let max = self.config.max_document_tokens;
        let count = self.tokens.count(&content).map_err(IndexError::Tokenizer)?;
        let truncated = count > max;
        if truncated {
            tracing::debug!(%branch, %path, tokens = count, max, "truncating file");
            content = self
                .tokens
                .truncate(&content, max)
                .map_err(IndexError::Tokenizer)?;
        }

        Ok(FileOutcome::Indexed {
            doc: Document {
                id: Document::document_id(branch, path),
                content,
                branch: branch.to_owned(),
                url: self.locator.blob_url(branch, path),
                score: 0.0,
            },
            truncated,
        })
    }
}

enum FileOutcome {
    Indexed { doc: Document, truncated: bool },
    Skipped(SkipReason),
}

#[cfg(test)]
mod tests {
    use issuelens_llm::tokens::HeuristicTokenCounter;

    use super::*;
    use crate::source::{GitSource, InMemorySource};

    fn indexer() -> RepoIndexer {
        RepoIndexer::new(
            RepoLocator::github("acme", "widgets"),
            Arc::new(HeuristicTokenCounter),
            IndexerConfig::default(),
        )
    }

    #[test]
    fn single_readme_on_main() {
        let source = InMemorySource::new().with_file("main", "README.md", "hello");
        let (docs, report) = indexer().documents(&source, &["main".into()]).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "main@README.md");
        assert_eq!(docs[0].branch, "main");
        assert_eq!(docs[0].content, "hello");
        assert_eq!(
            docs[0].url,
            "https://github.com/acme/widgets/blob/main/README.md"
        );
        assert_eq!(report.documents, 1);
        assert_eq!(report.files_scanned, 1);
    }

    #[test]
    fn empty_targets_index_every_branch() {
        let source = InMemorySource::new()
            .with_file("main", "a.rs", "fn a() {}")
            .with_file("dev", "a.rs", "fn a2() {}");
        let (docs, report) = indexer().documents(&source, &[]).unwrap();
        let mut ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, ["dev@a.rs", "main@a.rs"]);
        assert_eq!(report.branches, ["dev", "main"]);
    }

    #[test]
    fn missing_branch_is_reported() {
        let source = InMemorySource::new().with_file("main", "a", "x");
        let (docs, report) = indexer()
            .documents(&source, &["main".into(), "gone".into()])
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(report.missing_branches, ["gone"]);
    }

    #[test]
    fn oversized_file_is_truncated_to_budget() {
        let counter = HeuristicTokenCounter;
        let big = "word ".repeat(MAX_DOCUMENT_TOKENS * 2);
        assert!(counter.count(&big).unwrap() > MAX_DOCUMENT_TOKENS);
        let source = InMemorySource::new().with_file("main", "big.txt", big);
        let (docs, report) = indexer().documents(&source, &[]).unwrap();
        assert_eq!(report.truncated, 1);
        assert!(counter.count(&docs[0].content).unwrap() <= MAX_DOCUMENT_TOKENS);
    }

    #[test]
    fn custom_budget_is_honored() {
        let indexer = RepoIndexer::new(
            RepoLocator::github("acme", "widgets"),
            Arc::new(HeuristicTokenCounter),
            IndexerConfig {
                max_document_tokens: 2,
            },
        );
        let source = InMemorySource::new().with_file("main", "a.txt", "abcdefghijkl");
        let (docs, _) = indexer.documents(&source, &[]).unwrap();
        assert_eq!(docs[0].content, "abcdefgh");
    }

    #[test]
    fn empty_and_binary_files_are_skipped() {
        let source = InMemorySource::new()
            .with_file("main", "empty.txt", "")
            .with_file("main", "blank.txt", "  \n")
            .with_file("main", "logo.png", vec![0x89, 0x50, 0xff, 0xfe])
            .with_file("main", "ok.txt", "ok");
        let (docs, report) = indexer().documents(&source, &[]).unwrap();
        assert_eq!(docs.len(), 1);
        let reasons: Vec<_> = report
            .skipped
            .iter()
            .map(|s| (s.path.as_str(), s.reason))
            .collect();
        assert_eq!(
            reasons,
            [
                ("blank.txt", SkipReason::Empty),
                ("empty.txt", SkipReason::Empty),
                ("logo.png", SkipReason::Binary),
            ]
        );
    }

    #[test]
    fn unreadable_file_aborts() {
        let source = InMemorySource::new()
            .with_file("main", "a.txt", "a")
            .with_unreadable("main", "b.txt");
        let err = indexer().documents(&source, &[]).unwrap_err();
        assert!(matches!(err, IndexError::Read { ref path, .. } if path == "b.txt"));
    }

    #[test]
    fn indexes_git_branches() {
        let (dir, _repo) = crate::source::tests::fixture_repo();
        let source = GitSource::open(dir.path()).unwrap();
        let (docs, report) = indexer().documents(&source, &["dev".into()]).unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["dev@NOTES.md", "dev@README.md", "dev@src/lib.rs"]);
        assert_eq!(
            docs[2].url,
            "https://github.com/acme/widgets/blob/dev/src/lib.rs"
        );
        assert_eq!(report.branches, ["dev"]);
    }
}
