use std::path::{Path, PathBuf};

use anyhow::Context;
use issuelens_core::AppBuilder;
use issuelens_core::bootstrap::require_repository;
use issuelens_index::{
    DropConfirmation, GitCloneOptions, GitSource, IndexError, IndexReport, LocalSource,
    RepoIndexer, RepositorySource, RetrievalOptions, Retriever, UpsertPipeline, UpsertReport,
};
use issuelens_llm::any::AnyEmbedder;
use issuelens_memory::{CODEBASE_NAMESPACE, Document, ISSUES_NAMESPACE, Issue, IssueThread};
use tokio_util::sync::CancellationToken;

use crate::Command;

const DEFAULT_LOCAL_BRANCH: &str = "main";

pub(crate) async fn run(
    command: Command,
    builder: &AppBuilder,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Command::Index {
            branches,
            issues,
            local,
        } => index(builder, branches, issues, local, cancel).await,
        Command::Query {
            text,
            top_k,
            branches,
        } => {
            let embedder = builder.build_embedder()?;
            let retriever = builder.build_retriever(builder.build_store()?).await?;
            let mut options = RetrievalOptions::default().branches(branches);
            options.top_k = top_k;
            let documents = query(&retriever, &embedder, &text, &options).await;
            retriever.close();
            let documents = documents?;
            println!("{}", serde_json::to_string_pretty(&documents)?);
            Ok(())
        }
        Command::Similar { text, issue } => {
            let embedder = builder.build_embedder()?;
            let retriever = builder.build_retriever(builder.build_store()?).await?;
            let markdown = similar(&retriever, &embedder, &text, issue).await;
            retriever.close();
            match markdown? {
                Some(markdown) => print!("{markdown}"),
                None => println!("no similar issues found"),
            }
            Ok(())
        }
        Command::Lookup { id, issue } => {
            let retriever = builder.build_vector_retriever(builder.build_store()?);
            let rendered = if issue {
                serde_json::to_string_pretty(&retriever.query_issue_by_id(&id).await?)?
            } else {
                serde_json::to_string_pretty(&retriever.query_by_id(&id).await?)?
            };
            println!("{rendered}");
            Ok(())
        }
        Command::Delete { ids, issues } => {
            let retriever = builder.build_vector_retriever(builder.build_store()?);
            let namespace = if issues {
                ISSUES_NAMESPACE
            } else {
                CODEBASE_NAMESPACE
            };
            retriever.delete(namespace, &ids).await?;
            println!("deleted {} record(s) from {namespace}", ids.len());
            Ok(())
        }
        Command::DropIndex { confirm } => {
            let retriever = builder.build_vector_retriever(builder.build_store()?);
            let confirmation = DropConfirmation::new(retriever.collection(), &confirm)?;
            retriever.drop_index(confirmation).await?;
            println!("dropped index {}", retriever.collection());
            Ok(())
        }
    }
}

async fn index(
    builder: &AppBuilder,
    branches: Vec<String>,
    issues: Option<PathBuf>,
    local: Option<PathBuf>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let config = builder.config();
    let targets = if branches.is_empty() {
        config.repository.branches.clone()
    } else {
        branches
    };
    let source = match local {
        Some(path) => SourceSpec::Local(path),
        None => {
            require_repository(config)?;
            SourceSpec::Remote {
                url: config.repository.locator().clone_url(),
                options: builder.clone_options(),
            }
        }
    };

    let indexer = builder.build_indexer(builder.build_token_counter()?);
    let (documents, report) = collect_documents(indexer, source, targets).await?;
    log_report(&report);

    let issues = issues.as_deref().map(load_issues).transpose()?;

    let embedder = builder.build_embedder()?;
    let pipeline = builder.build_pipeline(builder.build_store()?, &embedder, cancel);
    let (code, issues) = upsert_all(&pipeline, &documents, issues.as_deref()).await?;
    println!(
        "indexed {} document(s) in {} batch(es) into {}",
        code.records,
        code.batches,
        pipeline.collection()
    );
    if let Some(issues) = issues {
        println!("indexed {} issue(s)", issues.records);
    }
    Ok(())
}

/// Where the indexer reads files from.
#[derive(Debug)]
pub(crate) enum SourceSpec {
    /// A git checkout, or a plain directory read as a single branch.
    Local(PathBuf),
    Remote {
        url: String,
        options: GitCloneOptions,
    },
}

fn open_source(origin: SourceSpec) -> anyhow::Result<Box<dyn RepositorySource>> {
    match origin {
        SourceSpec::Local(path) => match GitSource::open(&path) {
            Ok(source) => Ok(Box::new(source)),
            Err(e) => {
                tracing::debug!(path = %path.display(), "not a git repository ({e}), reading directory");
                Ok(Box::new(LocalSource::new(path, DEFAULT_LOCAL_BRANCH)))
            }
        },
        SourceSpec::Remote { url, options } => {
            let source = GitSource::clone_remote(&url, &options)
                .with_context(|| format!("failed to clone {url}"))?;
            Ok(Box::new(source))
        }
    }
}

/// Read and bound every file off the async runtime; git objects are not `Sync`.
pub(crate) async fn collect_documents(
    indexer: RepoIndexer,
    origin: SourceSpec,
    targets: Vec<String>,
) -> anyhow::Result<(Vec<Document>, IndexReport)> {
    tokio::task::spawn_blocking(move || {
        let source = open_source(origin)?;
        let built = indexer.documents(source.as_ref(), &targets)?;
        Ok(built)
    })
    .await
    .context("indexing task panicked")?
}

fn log_report(report: &IndexReport) {
    tracing::info!(
        branches = report.branches.len(),
        files = report.files_scanned,
        documents = report.documents,
        truncated = report.truncated,
        skipped = report.skipped.len(),
        duration_ms = report.duration_ms,
        "repository scanned"
    );
    for branch in &report.missing_branches {
        tracing::warn!(branch, "requested branch not found");
    }
}

/// Parse a JSON array of issue threads.
pub(crate) fn load_issues(path: &Path) -> anyhow::Result<Vec<Issue>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read issues file {}", path.display()))?;
    let threads: Vec<IssueThread> =
        serde_json::from_str(&content).context("failed to parse issues file")?;
    Ok(threads.into_iter().map(IssueThread::into_issue).collect())
}

pub(crate) async fn upsert_all(
    pipeline: &UpsertPipeline,
    documents: &[Document],
    issues: Option<&[Issue]>,
) -> anyhow::Result<(UpsertReport, Option<UpsertReport>)> {
    let code = pipeline.index_documents(documents).await?;
    let issues = match issues {
        Some(issues) => Some(pipeline.index_issues(issues).await?),
        None => None,
    };
    Ok((code, issues))
}

pub(crate) async fn query(
    retriever: &Retriever,
    embedder: &AnyEmbedder,
    text: &str,
    options: &RetrievalOptions,
) -> anyhow::Result<Vec<Document>> {
    let embed = embedder.embed_fn();
    match retriever.retrieve(text, &embed, options).await {
        Ok(documents) => Ok(documents),
        Err(IndexError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Markdown list of similar issues, or `None` when no other issue matches.
pub(crate) async fn similar(
    retriever: &Retriever,
    embedder: &AnyEmbedder,
    text: &str,
    issue: Option<u64>,
) -> anyhow::Result<Option<String>> {
    let vector = (embedder.embed_fn())(text).await?;
    match retriever
        .retrieve_issue(vector, issue, &RetrievalOptions::default())
        .await
    {
        Ok(markdown) => Ok(Some(markdown)),
        Err(IndexError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
