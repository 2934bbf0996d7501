use crate::model::ChangedRange;

/// Parse a unified diff into changed line ranges of the post-image.
///
/// Only additions and context shifts matter here: ranges are expressed
/// in new-file coordinates so they can be joined against the index.
/// Files deleted by the diff produce no range.
pub fn parse_unified_diff(diff: &str) -> Vec<ChangedRange> {
    let mut ranges = Vec::new();
    let mut current_file: Option<String> = None;

    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("+++ ") {
            let target = rest.split('\t').next().unwrap_or(rest).trim();
            current_file = if target == "/dev/null" {
                None
            } else {
                Some(strip_diff_prefix(target).to_string())
            };
            continue;
        }
        if let Some(header) = line.strip_prefix("@@") {
            let Some(file) = current_file.as_ref() else {
                continue;
            };
            if let Some((start, count)) = parse_hunk_new_range(header) {
                if count == 0 {
                    // pure deletion hunk: nothing exists at these lines
                    // in the post-image
                    continue;
                }
                ranges.push(ChangedRange {
                    file_path: file.clone(),
                    start_line: start,
                    end_line: start + count - 1,
                });
            }
        }
    }
    ranges
}

fn strip_diff_prefix(path: &str) -> &str {
    path.strip_prefix("b/")
        .or_else(|| path.strip_prefix("a/"))
        .unwrap_or(path)
}

/// `@@ -oldStart,oldCount +newStart,newCount @@` -> (newStart, newCount)
fn parse_hunk_new_range(header: &str) -> Option<(i64, i64)> {
    let plus = header.split_whitespace().find(|part| part.starts_with('+'))?;
    let spec = &plus[1..];
    match spec.split_once(',') {
        Some((start, count)) => {
            Some((start.parse().ok()?, count.parse().ok()?))
        }
        None => Some((spec.parse().ok()?, 1)),
    }
}
