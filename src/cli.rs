use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "crag",
    version,
    about = "Code graph builder and PR review engine",
    after_help = r#"Examples:
  crag ingest --repo .
  crag sync --repo . src/app.py src/util.py
  crag find-callers --repo . process_payment
  crag class-hierarchy --repo . PaymentProcessor
  crag change-impact --repo . validate_card
  crag diff-context --repo . --diff pr.diff
  crag search --repo . "refund" --limit 20
  crag review --repo . --pr 42 --diff pr.diff
  crag serve --repo .
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Scan and index the whole repository.
    Ingest {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Repo owner; defaults to "local".
        #[arg(long)]
        owner: Option<String>,
        /// Repo name; defaults to the repo directory name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "main")]
        branch: String,
    },
    /// Re-index only the given paths (relative to the repo root).
    Sync {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Paths that changed; deleted paths are removed from the index.
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// List everything that calls a function or method.
    FindCallers {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
        method: String,
    },
    /// Show ancestors, descendants, and methods of a class.
    ClassHierarchy {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
        class: String,
    },
    /// Group callers by which definition of a method they hit.
    MethodUsages {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
        method: String,
    },
    /// Estimate the blast radius of changing a symbol.
    ChangeImpact {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
        symbol: String,
    },
    /// Build graph context for a unified diff.
    DiffContext {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
        /// Diff file to read; stdin when omitted.
        #[arg(long)]
        diff: Option<PathBuf>,
    },
    /// Search symbols and line content.
    Search {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run the review agents over a PR diff and reconcile the results.
    Review {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        pr: i64,
        /// Diff file to read; stdin when omitted.
        #[arg(long)]
        diff: Option<PathBuf>,
        /// Commit the diff was taken at; defaults to the repo HEAD.
        #[arg(long)]
        commit: Option<String>,
    },
    /// Run JSONL RPC server over stdin/stdout.
    Serve {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Print a repository overview.
    Overview {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
}
