use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use issuelens_core::AppBuilder;
use issuelens_core::bootstrap::resolve_config_path;
use tokio_util::sync::CancellationToken;

mod commands;

/// Time a cancelled command gets to stop between batches before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Parser)]
#[command(name = "issuelens")]
#[command(about = "Ground issue responses in repository code and issue history")]
#[command(version)]
struct Cli {
    /// Path to config file (default: `ISSUELENS_CONFIG` or config/issuelens.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index repository files, and optionally issues, into the vector index
    Index {
        /// Branch to index; repeatable. Defaults to the configured branches, then all
        #[arg(short, long = "branch")]
        branches: Vec<String>,

        /// JSON array of issue threads to index alongside the code
        #[arg(long)]
        issues: Option<PathBuf>,

        /// Read a local checkout instead of cloning the configured remote
        #[arg(long)]
        local: Option<PathBuf>,
    },

    /// Retrieve the documents most relevant to a question
    Query {
        text: String,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(short, long = "branch")]
        branches: Vec<String>,
    },

    /// List issues similar to the given issue text
    Similar {
        text: String,

        /// Number of the issue itself, left out of the results
        #[arg(long)]
        issue: Option<u64>,
    },

    /// Fetch one stored record by id
    Lookup {
        id: String,

        /// Look the id up among issues instead of documents
        #[arg(long)]
        issue: bool,
    },

    /// Delete stored records by id
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,

        /// Delete issues instead of documents
        #[arg(long)]
        issues: bool,
    },

    /// Drop the whole index
    DropIndex {
        /// Index name, typed again to confirm
        #[arg(long)]
        confirm: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.as_deref());
    let builder = AppBuilder::load(&config_path).await?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        signal.cancel();
    });

    let run = commands::run(cli.command, &builder, cancel.clone());
    match until_cancelled(run, &cancel, SHUTDOWN_GRACE).await {
        Some(result) => result,
        None => {
            tracing::warn!("command did not stop within {SHUTDOWN_GRACE:?}, exiting");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    }
}

/// Drive `run` to completion. After `cancel` fires it gets `grace` more time to stop;
/// `None` means it did not.
async fn until_cancelled<F: Future>(
    run: F,
    cancel: &CancellationToken,
    grace: Duration,
) -> Option<F::Output> {
    tokio::pin!(run);
    tokio::select! {
        biased;
        output = &mut run => Some(output),
        () = cancel.cancelled() => tokio::time::timeout(grace, &mut run).await.ok(),
    }
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finished_command_wins_over_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = until_cancelled(async { 7 }, &cancel, Duration::ZERO).await;
        assert_eq!(out, Some(7));
    }

    #[tokio::test]
    async fn cancelled_command_gets_grace_period() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let run = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            "stopped"
        };
        let out = until_cancelled(run, &cancel, Duration::from_secs(5)).await;
        assert_eq!(out, Some("stopped"));
    }

    #[tokio::test]
    async fn stuck_command_is_abandoned_after_grace() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let out = until_cancelled(
            std::future::pending::<()>(),
            &cancel,
            Duration::from_millis(20),
        )
        .await;
        assert!(out.is_none());
    }

    #[test]
    fn parse_index_with_repeated_branches() {
        let cli = Cli::try_parse_from([
            "issuelens", "index", "--branch", "main", "-b", "dev", "--issues", "issues.json",
        ])
        .unwrap();
        let Command::Index {
            branches,
            issues,
            local,
        } = cli.command
        else {
            panic!("expected index command");
        };
        assert_eq!(branches, vec!["main", "dev"]);
        assert_eq!(issues, Some(PathBuf::from("issues.json")));
        assert!(local.is_none());
    }

    #[test]
    fn parse_query_with_top_k() {
        let cli = Cli::try_parse_from(["issuelens", "query", "how to build", "-k", "7"]).unwrap();
        let Command::Query { text, top_k, branches } = cli.command else {
            panic!("expected query command");
        };
        assert_eq!(text, "how to build");
        assert_eq!(top_k, Some(7));
        assert!(branches.is_empty());
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli =
            Cli::try_parse_from(["issuelens", "similar", "crash", "--issue", "12", "-c", "x.toml"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Command::Similar { issue: Some(12), .. }));
    }

    #[test]
    fn delete_requires_ids() {
        assert!(Cli::try_parse_from(["issuelens", "delete"]).is_err());
    }

    #[test]
    fn drop_index_requires_confirmation() {
        assert!(Cli::try_parse_from(["issuelens", "drop-index"]).is_err());
        let cli =
            Cli::try_parse_from(["issuelens", "drop-index", "--confirm", "acme-widgets"]).unwrap();
        assert!(matches!(cli.command, Command::DropIndex { confirm } if confirm == "acme-widgets"));
    }
}
