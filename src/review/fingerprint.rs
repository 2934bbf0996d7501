use crate::model::AgentIssue;
use crate::store::Store;
use anyhow::Result;
use std::path::Path;

/// Stable identity for a finding across runs. Anchoring on the enclosing
/// symbol rather than the raw line keeps the fingerprint stable when
/// unrelated edits shift the file; the description is collapsed so
/// agents rewording the same finding still dedupe.
pub fn issue_fingerprint(path: &str, anchor: &str, description: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.as_bytes());
    hasher.update(b"\0");
    hasher.update(anchor.as_bytes());
    hasher.update(b"\0");
    hasher.update(signature(description).as_bytes());
    let hex = hasher.finalize().to_hex();
    format!("iss_{}", &hex.as_str()[..16])
}

/// Order-insensitive word-set signature of a description: lowercased,
/// split on non-alphanumerics, deduplicated, sorted. Agents wording the
/// same finding differently still land on the same signature as long as
/// they use the same vocabulary.
pub fn signature(text: &str) -> String {
    let mut words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect();
    words.sort();
    words.dedup();
    words.join(" ")
}

/// Anchor a finding to the smallest enclosing symbol; fall back to the
/// line number when the location is outside any indexed symbol.
pub fn anchor_for(store: &Store, repo_id: i64, path: &str, line: i64) -> Result<String> {
    if let Some(record) = store.file_by_path(repo_id, path)? {
        if let Some(symbol) = store.enclosing_symbol(record.id, line)? {
            if symbol.kind != "module" {
                return Ok(symbol.qualname);
            }
        }
    }
    Ok(format!("line:{}", line))
}

pub fn fingerprint_issue(store: &Store, repo_id: i64, issue: &AgentIssue) -> Result<String> {
    let path = crate::util::normalize_path(Path::new(&issue.file_path));
    let anchor = anchor_for(store, repo_id, &path, issue.line_start)?;
    Ok(issue_fingerprint(&path, &anchor, &format!("{} {}", issue.title, issue.description)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_a_sorted_word_set() {
        assert_eq!(
            signature("  Possible  NULL\n dereference, possible. "),
            "dereference null possible"
        );
    }

    #[test]
    fn test_fingerprint_stable_under_rewording() {
        let a = issue_fingerprint("src/app.py", "app.run", "Missing   Error check");
        let b = issue_fingerprint("src/app.py", "app.run", "check: missing ERROR");
        assert_eq!(a, b);
        assert!(a.starts_with("iss_"));
        assert_eq!(a.len(), 4 + 16);
    }

    #[test]
    fn test_fingerprint_differs_by_anchor() {
        let a = issue_fingerprint("src/app.py", "app.run", "missing error check");
        let b = issue_fingerprint("src/app.py", "app.stop", "missing error check");
        assert_ne!(a, b);
    }
}
