use crag::ingest::{IngestMode, Ingestor};
use crag::query::QueryEngine;
use crag::store::Store;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn setup(files: &[(&str, &str)]) -> (TempDir, Store, i64) {
    let dir = TempDir::new().unwrap();
    for (rel, content) in files {
        write_file(dir.path(), rel, content);
    }
    let store = Store::new(&dir.path().join(".crag").join("crag.db")).unwrap();
    let repo_id = store.upsert_repo("acme", "shop", Some("main")).unwrap();
    (dir, store, repo_id)
}

fn ingest_full(dir: &TempDir, store: &Store, repo_id: i64) -> crag::model::IngestStats {
    Ingestor::new(store, dir.path().to_path_buf(), repo_id)
        .ingest(IngestMode::Full)
        .unwrap()
}

fn sync_paths(dir: &TempDir, store: &Store, repo_id: i64, paths: &[&str]) {
    let paths = paths.iter().map(|p| p.to_string()).collect();
    Ingestor::new(store, dir.path().to_path_buf(), repo_id)
        .ingest(IngestMode::Paths(paths))
        .unwrap();
}

const LIB_PY: &str = "def helper(x):\n    return x + 1\n";

const USE_PY: &str = "\
from lib import helper


def run(x):
    return helper(x)
";

#[test]
fn ingest_is_deterministic() {
    let files = [("lib.py", LIB_PY), ("use.py", USE_PY)];

    let (dir_a, store_a, repo_a) = setup(&files);
    ingest_full(&dir_a, &store_a, repo_a);
    let digest_a = store_a.digest().unwrap();

    let (dir_b, store_b, repo_b) = setup(&files);
    ingest_full(&dir_b, &store_b, repo_b);
    let digest_b = store_b.digest().unwrap();

    assert_eq!(digest_a, digest_b);
}

#[test]
fn reingest_unchanged_files_is_skipped() {
    let (dir, store, repo_id) = setup(&[("lib.py", LIB_PY), ("use.py", USE_PY)]);

    let first = ingest_full(&dir, &store, repo_id);
    assert_eq!(first.indexed, 2);
    assert_eq!(first.skipped, 0);
    let digest_before = store.digest().unwrap();

    let second = ingest_full(&dir, &store, repo_id);
    assert_eq!(second.indexed, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(store.digest().unwrap(), digest_before);
}

#[test]
fn rewrite_demotes_cross_file_calls_then_promotes_on_restore() {
    let (dir, store, repo_id) = setup(&[("lib.py", LIB_PY), ("use.py", USE_PY)]);
    ingest_full(&dir, &store, repo_id);

    // Resolved call graph, no text-only references.
    assert_eq!(store.count_rows(repo_id, "call_refs").unwrap(), 0);
    let engine = QueryEngine::new(&store, repo_id);
    let callers = engine.find_callers("helper").unwrap();
    assert_eq!(callers.definitions.len(), 1);
    assert_eq!(callers.total, 1);
    assert!(!callers.fallback_used);

    // Rewrite lib.py without helper. The incoming call from use.py must
    // survive as a text reference instead of dangling or vanishing.
    write_file(dir.path(), "lib.py", "def other(x):\n    return x\n");
    sync_paths(&dir, &store, repo_id, &["lib.py"]);

    assert_eq!(store.count_rows(repo_id, "call_refs").unwrap(), 1);
    let engine = QueryEngine::new(&store, repo_id);
    let callers = engine.find_callers("helper").unwrap();
    assert_eq!(callers.definitions.len(), 0);
    assert_eq!(callers.total, 1);
    assert!(callers.fallback_used);

    // Restore helper; the reference is promoted back to a call edge.
    write_file(dir.path(), "lib.py", LIB_PY);
    sync_paths(&dir, &store, repo_id, &["lib.py"]);

    assert_eq!(store.count_rows(repo_id, "call_refs").unwrap(), 0);
    let engine = QueryEngine::new(&store, repo_id);
    let callers = engine.find_callers("helper").unwrap();
    assert_eq!(callers.definitions.len(), 1);
    assert_eq!(callers.total, 1);
    assert!(!callers.fallback_used);
}

#[test]
fn call_resolves_within_directory_despite_repo_wide_ambiguity() {
    // Two unrelated `helper` definitions; the caller sits next to one of
    // them and must bind to that one instead of degrading to text.
    let (dir, store, repo_id) = setup(&[
        ("pkg/lib.py", LIB_PY),
        ("pkg/use.py", USE_PY),
        ("other/lib.py", "def helper(y):\n    return y\n"),
    ]);
    ingest_full(&dir, &store, repo_id);

    assert_eq!(store.count_rows(repo_id, "call_refs").unwrap(), 0);
    let engine = QueryEngine::new(&store, repo_id);
    let callers = engine.find_callers("helper").unwrap();
    assert_eq!(callers.definitions.len(), 2);
    assert!(!callers.fallback_used);

    let resolved: Vec<&str> = callers
        .callers
        .iter()
        .filter_map(|c| match c {
            crag::model::CallerFact::ResolvedCall { caller, .. } => {
                Some(caller.file_path.as_str())
            }
            crag::model::CallerFact::TextReference { .. } => None,
        })
        .collect();
    assert_eq!(resolved, vec!["pkg/use.py"]);
}

#[test]
fn sync_keeps_the_ingested_branch() {
    let dir = TempDir::new().unwrap();
    let store = Store::new(&dir.path().join(".crag").join("crag.db")).unwrap();
    let repo_id = store.upsert_repo("acme", "shop", Some("develop")).unwrap();

    // a later sync carries no branch and must not reset the stored one
    assert_eq!(store.upsert_repo("acme", "shop", None).unwrap(), repo_id);
    let repo = store.get_repo("acme", "shop").unwrap().unwrap();
    assert_eq!(repo.default_branch, "develop");

    assert_eq!(store.upsert_repo("acme", "shop", Some("main")).unwrap(), repo_id);
    let repo = store.get_repo("acme", "shop").unwrap().unwrap();
    assert_eq!(repo.default_branch, "main");
}

#[test]
fn sync_removes_deleted_files() {
    let (dir, store, repo_id) = setup(&[("lib.py", LIB_PY), ("use.py", USE_PY)]);
    ingest_full(&dir, &store, repo_id);
    assert_eq!(store.count_rows(repo_id, "files").unwrap(), 2);

    fs::remove_file(dir.path().join("use.py")).unwrap();
    sync_paths(&dir, &store, repo_id, &["use.py"]);

    assert_eq!(store.count_rows(repo_id, "files").unwrap(), 1);
    assert!(store.file_by_path(repo_id, "use.py").unwrap().is_none());
}

#[test]
fn failed_parse_keeps_previous_version() {
    let (dir, store, repo_id) = setup(&[("lib.py", LIB_PY)]);
    ingest_full(&dir, &store, repo_id);
    let before = store.file_by_path(repo_id, "lib.py").unwrap().unwrap();

    // Unreadable bytes make extraction fail; the indexed version stays.
    fs::write(dir.path().join("lib.py"), [0xff, 0xfe, 0x00]).unwrap();
    let stats = ingest_full(&dir, &store, repo_id);
    assert_eq!(stats.failed, 1);

    let after = store.file_by_path(repo_id, "lib.py").unwrap().unwrap();
    assert_eq!(after.hash, before.hash);
}
