use anyhow::{Context, Result};
use clap::Parser;
use crag::ingest::{IngestMode, Ingestor};
use crag::query::QueryEngine;
use crag::review::agents;
use crag::review::orchestrator::ReviewOrchestrator;
use crag::store::Store;
use crag::util;
use crag::{cli, diff, rpc};
use std::io::Read;
use std::path::{Path, PathBuf};

fn default_db_path(repo: &Path) -> PathBuf {
    repo.join(".crag").join("crag.db")
}

fn repo_ident(owner: Option<String>, name: Option<String>, repo: &Path) -> (String, String) {
    let owner = owner.unwrap_or_else(|| "local".to_string());
    let name = name.unwrap_or_else(|| {
        repo.canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "repo".to_string())
    });
    (owner, name)
}

fn open_indexed(
    repo: &Path,
    db: Option<PathBuf>,
    owner: Option<String>,
    name: Option<String>,
) -> Result<(Store, i64)> {
    let db_path = db.unwrap_or_else(|| default_db_path(repo));
    let (owner, name) = repo_ident(owner, name, repo);
    let store = Store::new(&db_path)?;
    let repo_row = store.get_repo(&owner, &name)?.with_context(|| {
        format!("repo {owner}/{name} is not indexed; run `crag ingest` first")
    })?;
    Ok((store, repo_row.id))
}

fn read_diff(path: Option<PathBuf>) -> Result<String> {
    match path {
        Some(path) => util::read_to_string(&path),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .with_context(|| "read diff from stdin")?;
            Ok(buffer)
        }
    }
}

fn run_ingest(
    repo: PathBuf,
    db: Option<PathBuf>,
    owner: Option<String>,
    name: Option<String>,
    branch: Option<&str>,
    mode: IngestMode,
) -> Result<()> {
    let db_path = db.unwrap_or_else(|| default_db_path(&repo));
    let repo_root = repo
        .canonicalize()
        .with_context(|| format!("resolve repo root {}", repo.display()))?;
    let (owner, name) = repo_ident(owner, name, &repo);
    let store = Store::new(&db_path)?;
    let repo_id = store.upsert_repo(&owner, &name, branch)?;
    let stats = Ingestor::new(&store, repo_root, repo_id).ingest(mode)?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Ingest {
            repo,
            db,
            owner,
            name,
            branch,
        } => run_ingest(repo, db, owner, name, Some(&branch), IngestMode::Full),
        cli::Command::Sync {
            repo,
            db,
            owner,
            name,
            paths,
        } => run_ingest(repo, db, owner, name, None, IngestMode::Paths(paths)),
        cli::Command::FindCallers {
            repo,
            db,
            owner,
            name,
            method,
        } => {
            let (store, repo_id) = open_indexed(&repo, db, owner, name)?;
            let result = QueryEngine::new(&store, repo_id).find_callers(&method)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::ClassHierarchy {
            repo,
            db,
            owner,
            name,
            class,
        } => {
            let (store, repo_id) = open_indexed(&repo, db, owner, name)?;
            let result = QueryEngine::new(&store, repo_id).class_hierarchy(&class)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::MethodUsages {
            repo,
            db,
            owner,
            name,
            method,
        } => {
            let (store, repo_id) = open_indexed(&repo, db, owner, name)?;
            let result = QueryEngine::new(&store, repo_id).method_usages(&method)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::ChangeImpact {
            repo,
            db,
            owner,
            name,
            symbol,
        } => {
            let (store, repo_id) = open_indexed(&repo, db, owner, name)?;
            let result = QueryEngine::new(&store, repo_id).change_impact(&symbol)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::DiffContext {
            repo,
            db,
            owner,
            name,
            diff: diff_path,
        } => {
            let (store, repo_id) = open_indexed(&repo, db, owner, name)?;
            let diff_text = read_diff(diff_path)?;
            let changes = diff::parse_unified_diff(&diff_text);
            let result = QueryEngine::new(&store, repo_id).diff_context(&changes)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::Search {
            repo,
            db,
            owner,
            name,
            query,
            limit,
        } => {
            let (store, repo_id) = open_indexed(&repo, db, owner, name)?;
            let result = QueryEngine::new(&store, repo_id).search(&query, limit)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::Review {
            repo,
            db,
            owner,
            name,
            pr,
            diff: diff_path,
            commit,
        } => {
            let (store, repo_id) = open_indexed(&repo, db, owner, name)?;
            let diff_text = read_diff(diff_path)?;
            let commit = commit.or_else(|| util::git_head_sha(&repo));
            let agent_list = agents::default_agents()?;
            let result = ReviewOrchestrator::new(&store, repo_id).run_review(
                pr,
                commit.as_deref(),
                &diff_text,
                agent_list,
            )?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        cli::Command::Serve {
            repo,
            db,
            owner,
            name,
        } => {
            let db_path = db.unwrap_or_else(|| default_db_path(&repo));
            let (owner, name) = repo_ident(owner, name, &repo);
            rpc::serve(db_path, owner, name)
        }
        cli::Command::Overview {
            repo,
            db,
            owner,
            name,
        } => {
            let (store, repo_id) = open_indexed(&repo, db, owner, name)?;
            let result = QueryEngine::new(&store, repo_id).repo_overview()?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
