use crate::extractor::language_for_path;
use crate::util;
use anyhow::{Context, Result};
use blake3::Hasher;
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub hash: String,
    pub language: String,
}

pub fn scan_repo(repo_root: &Path) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(repo_root)
        .ignore(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .require_git(false)
        .hidden(false)
        .filter_entry(|entry| !is_ignored_entry(entry))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                eprintln!("crag: walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let rel_path = util::normalize_rel_path(repo_root, path)?;
        let Some(language) = language_for_path(&rel_path) else {
            continue;
        };
        let hash = hash_file(path).with_context(|| format!("hash {}", path.display()))?;
        files.push(ScannedFile {
            rel_path,
            abs_path: path.to_path_buf(),
            hash,
            language: language.to_string(),
        });
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

pub fn scan_path(repo_root: &Path, rel_path: &str) -> Result<Option<ScannedFile>> {
    let abs_path = util::to_abs_path(repo_root, rel_path);
    if !abs_path.is_file() {
        return Ok(None);
    }
    let Some(language) = language_for_path(rel_path) else {
        return Ok(None);
    };
    let hash = hash_file(&abs_path).with_context(|| format!("hash {}", abs_path.display()))?;
    Ok(Some(ScannedFile {
        rel_path: rel_path.to_string(),
        abs_path,
        hash,
        language: language.to_string(),
    }))
}

fn is_ignored_entry(entry: &ignore::DirEntry) -> bool {
    match entry.file_name() {
        name if name == OsStr::new(".crag") => true,
        name if name == OsStr::new(".git") => true,
        name if name == OsStr::new("node_modules") => true,
        name if name == OsStr::new("target") => true,
        _ => false,
    }
}

pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
