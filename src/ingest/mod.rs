use crate::config::Config;
use crate::extractor::{self, ExtractedFile, SymbolInput};
use crate::model::{IngestStats, Symbol};
use crate::store::Store;
use crate::util;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

pub mod linker;
pub mod scan;

/// Stable identity for a symbol, independent of row ids: survives
/// re-ingestion as long as the symbol keeps its path, kind and qualname.
pub fn stable_symbol_id(rel_path: &str, symbol: &SymbolInput) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(rel_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(symbol.kind.as_bytes());
    hasher.update(b"\0");
    hasher.update(symbol.qualname.as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("sym_{}", &hex.as_str()[..16])
}

#[derive(Debug, Clone)]
pub enum IngestMode {
    /// Scan the whole repo and reconcile against the stored file set.
    Full,
    /// Re-index only the named paths; paths that no longer exist on disk
    /// are removed from the index.
    Paths(Vec<String>),
}

struct ExtractionJob {
    file: scan::ScannedFile,
}

struct ExtractionResult {
    file: scan::ScannedFile,
    outcome: Result<(String, ExtractedFile)>,
}

struct StoredFile {
    file_id: i64,
    symbols: Vec<Symbol>,
    calls: Vec<crate::extractor::CallSite>,
}

pub struct Ingestor<'a> {
    store: &'a Store,
    repo_root: PathBuf,
    repo_id: i64,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a Store, repo_root: PathBuf, repo_id: i64) -> Self {
        let repo_root = std::fs::canonicalize(&repo_root).unwrap_or(repo_root);
        Self {
            store,
            repo_root,
            repo_id,
        }
    }

    pub fn ingest(&self, mode: IngestMode) -> Result<IngestStats> {
        let start = Instant::now();
        let existing: HashMap<String, String> = self
            .store
            .list_files(self.repo_id)?
            .into_iter()
            .map(|f| (f.path, f.hash))
            .collect();

        let mut candidates = Vec::new();
        let mut deleted_paths = Vec::new();
        let mut scanned_total = 0usize;

        match &mode {
            IngestMode::Full => {
                let scanned = scan::scan_repo(&self.repo_root)?;
                scanned_total = scanned.len();
                let seen: HashSet<&str> =
                    scanned.iter().map(|f| f.rel_path.as_str()).collect();
                for path in existing.keys() {
                    if !seen.contains(path.as_str()) {
                        deleted_paths.push(path.clone());
                    }
                }
                candidates = scanned;
            }
            IngestMode::Paths(paths) => {
                for path in paths {
                    let normalized = util::normalize_path(std::path::Path::new(path));
                    match scan::scan_path(&self.repo_root, &normalized)? {
                        Some(file) => {
                            scanned_total += 1;
                            candidates.push(file);
                        }
                        None if existing.contains_key(&normalized) => {
                            deleted_paths.push(normalized);
                        }
                        None => {
                            eprintln!("crag: Warning: {} is not an indexable file", normalized);
                        }
                    }
                }
            }
        }

        // hash short-circuit: unchanged files are not re-parsed
        let mut skipped = 0usize;
        let jobs: Vec<ExtractionJob> = candidates
            .into_iter()
            .filter(|file| {
                if existing.get(&file.rel_path) == Some(&file.hash) {
                    skipped += 1;
                    false
                } else {
                    true
                }
            })
            .map(|file| ExtractionJob { file })
            .collect();

        let results = extract_parallel(jobs);

        let mut stats = IngestStats {
            scanned: scanned_total,
            indexed: 0,
            skipped,
            deleted: 0,
            failed: 0,
            symbols: 0,
            edges: 0,
            duration_ms: 0,
        };

        let mut stored = Vec::new();
        for result in results {
            match result.outcome {
                Ok((source, extracted)) => {
                    let (file_id, symbols) = self.store.replace_file(
                        self.repo_id,
                        &result.file.rel_path,
                        &result.file.hash,
                        &result.file.language,
                        &source,
                        &extracted.symbols,
                        &extracted.imports,
                    )?;
                    stats.indexed += 1;
                    stats.symbols += symbols.len();
                    stored.push(StoredFile {
                        file_id,
                        symbols,
                        calls: extracted.calls,
                    });
                }
                Err(err) => {
                    // the previous version of the file, if any, stays indexed
                    stats.failed += 1;
                    eprintln!(
                        "crag: Warning: failed to extract {}: {}",
                        result.file.rel_path, err
                    );
                }
            }
        }

        for path in &deleted_paths {
            if self.store.delete_file(self.repo_id, path)? {
                stats.deleted += 1;
            }
        }

        // link after every file of the batch is stored so cross-file
        // resolution sees the final symbol set
        let index = linker::NameIndex::build(self.store, self.repo_id)?;
        let mut new_symbols = Vec::new();
        for file in &stored {
            let linked = linker::link_file(file.file_id, &file.symbols, &file.calls, &index);
            stats.edges += self.store.insert_edges(&linked.edges)?;
            self.store.insert_call_refs(&linked.call_refs)?;
            new_symbols.extend(file.symbols.iter().cloned());
        }
        let promoted = linker::promote_call_refs(self.store, self.repo_id, &new_symbols, &index)?;
        stats.edges += promoted;

        if let Some(sha) = util::git_head_sha(&self.repo_root) {
            self.store.set_repo_commit(self.repo_id, &sha)?;
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        eprintln!(
            "crag: indexed {} files ({} skipped, {} deleted, {} failed), {} symbols, {} edges in {}ms",
            stats.indexed,
            stats.skipped,
            stats.deleted,
            stats.failed,
            stats.symbols,
            stats.edges,
            stats.duration_ms
        );
        Ok(stats)
    }
}

/// Parse and extract on worker threads. Each worker keeps its own
/// parser instances since tree-sitter parsers are not shareable.
fn extract_parallel(jobs: Vec<ExtractionJob>) -> Vec<ExtractionResult> {
    if jobs.is_empty() {
        return Vec::new();
    }
    let workers = Config::get().ingest_workers.clamp(1, jobs.len());
    if workers == 1 {
        let mut extractors = HashMap::new();
        return jobs
            .into_iter()
            .map(|job| run_job(job, &mut extractors))
            .collect();
    }

    let mut chunks: Vec<Vec<ExtractionJob>> = (0..workers).map(|_| Vec::new()).collect();
    for (i, job) in jobs.into_iter().enumerate() {
        chunks[i % workers].push(job);
    }

    let (tx, rx) = mpsc::channel();
    let mut handles = Vec::new();
    for chunk in chunks {
        let tx = tx.clone();
        handles.push(thread::spawn(move || {
            let mut extractors = HashMap::new();
            for job in chunk {
                let result = run_job(job, &mut extractors);
                if tx.send(result).is_err() {
                    return;
                }
            }
        }));
    }
    drop(tx);

    let mut results: Vec<ExtractionResult> = rx.into_iter().collect();
    for handle in handles {
        let _ = handle.join();
    }
    // deterministic write order regardless of worker scheduling
    results.sort_by(|a, b| a.file.rel_path.cmp(&b.file.rel_path));
    results
}

fn run_job(
    job: ExtractionJob,
    extractors: &mut HashMap<String, Box<dyn extractor::LanguageExtractor + Send>>,
) -> ExtractionResult {
    let outcome = (|| -> Result<(String, ExtractedFile)> {
        let source = util::read_to_string(&job.file.abs_path)?;
        let ext = match extractors.entry(job.file.language.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(extractor::extractor_for_language(&job.file.language)?)
            }
        };
        let module = ext.module_name_from_rel_path(&job.file.rel_path);
        let extracted = ext.extract(&source, &module)?;
        Ok((source, extracted))
    })();
    ExtractionResult {
        file: job.file,
        outcome,
    }
}
