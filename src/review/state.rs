use crate::model::{Issue, ReconciledRun, ReviewRunSummary, Severity};
use crate::store::Store;
use anyhow::Result;

/// A finding after cross-agent merge, ready for reconciliation.
#[derive(Debug, Clone)]
pub struct MergedIssue {
    pub fingerprint: String,
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub line_start: i64,
    pub line_end: Option<i64>,
    pub severity: Severity,
    pub categories: Vec<String>,
    pub agents: Vec<String>,
    pub confidence: f64,
    pub flagged: bool,
    pub suggestion: Option<String>,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome<'a> {
    /// Previously reported, absent from this run.
    pub fixed: Vec<&'a Issue>,
    /// Present in both: row refreshed from the latest report.
    pub still_open: Vec<(&'a Issue, &'a MergedIssue)>,
    /// First appearance on this pull request.
    pub new: Vec<&'a MergedIssue>,
    /// History rows that did not belong to the requested scope.
    pub stale_rejected: usize,
}

/// Classify a run's merged findings against the previous run's open set.
/// Pure set logic over fingerprints; persistence happens around it in
/// one transaction. Rows outside the (repo, pr) scope are never
/// classified, only counted.
pub fn partition<'a>(
    repo_id: i64,
    pr_number: i64,
    previous: &'a [Issue],
    merged: &'a [MergedIssue],
) -> ReconcileOutcome<'a> {
    let mut outcome = ReconcileOutcome::default();

    let mut seen_prev = std::collections::HashSet::new();
    for prev in previous {
        if prev.repo_id != repo_id || prev.pr_number != pr_number {
            outcome.stale_rejected += 1;
            continue;
        }
        seen_prev.insert(prev.fingerprint.as_str());
        match merged.iter().find(|m| m.fingerprint == prev.fingerprint) {
            Some(current) => outcome.still_open.push((prev, current)),
            None => outcome.fixed.push(prev),
        }
    }

    for current in merged {
        if !seen_prev.contains(current.fingerprint.as_str()) {
            outcome.new.push(current);
        }
    }

    outcome
}

/// Run history and reconciliation for one pull request.
pub struct ReviewStateTracker<'a> {
    store: &'a Store,
}

impl<'a> ReviewStateTracker<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn reconcile(
        &self,
        repo_id: i64,
        pr_number: i64,
        commit_sha: Option<&str>,
        merged: &[MergedIssue],
    ) -> Result<ReconciledRun> {
        self.store
            .reconcile_review_run(repo_id, pr_number, commit_sha, merged)
    }

    pub fn open_issues(&self, repo_id: i64, pr_number: i64) -> Result<Vec<Issue>> {
        Ok(self
            .store
            .issues_for_pr(repo_id, pr_number)?
            .into_iter()
            .filter(|issue| issue.status != crate::model::IssueStatus::Fixed)
            .collect())
    }

    pub fn history(
        &self,
        repo_id: i64,
        pr_number: i64,
        limit: usize,
    ) -> Result<Vec<ReviewRunSummary>> {
        self.store.review_history(repo_id, pr_number, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueStatus;

    fn issue(repo_id: i64, pr_number: i64, fingerprint: &str) -> Issue {
        Issue {
            id: 1,
            repo_id,
            pr_number,
            fingerprint: fingerprint.to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            file_path: "a.py".to_string(),
            line_start: 1,
            line_end: None,
            severity: Severity::Medium,
            categories: Vec::new(),
            agents: Vec::new(),
            confidence: 1.0,
            flagged: false,
            suggestion: None,
            status: IssueStatus::Open,
            first_seen_run: 1,
            last_seen_run: 1,
        }
    }

    fn merged(fingerprint: &str) -> MergedIssue {
        MergedIssue {
            fingerprint: fingerprint.to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            file_path: "a.py".to_string(),
            line_start: 1,
            line_end: None,
            severity: Severity::Medium,
            categories: Vec::new(),
            agents: vec!["bug_hunter".to_string()],
            confidence: 1.0,
            flagged: false,
            suggestion: None,
        }
    }

    #[test]
    fn test_partition_fixed_open_new() {
        let previous = vec![issue(1, 7, "iss_a"), issue(1, 7, "iss_b")];
        let current = vec![merged("iss_b"), merged("iss_c")];
        let outcome = partition(1, 7, &previous, &current);
        assert_eq!(outcome.fixed.len(), 1);
        assert_eq!(outcome.fixed[0].fingerprint, "iss_a");
        assert_eq!(outcome.still_open.len(), 1);
        assert_eq!(outcome.still_open[0].0.fingerprint, "iss_b");
        assert_eq!(outcome.new.len(), 1);
        assert_eq!(outcome.new[0].fingerprint, "iss_c");
        assert_eq!(outcome.stale_rejected, 0);
    }

    #[test]
    fn test_partition_rejects_out_of_scope_rows() {
        let previous = vec![issue(1, 7, "iss_a"), issue(1, 8, "iss_b"), issue(2, 7, "iss_c")];
        let current = vec![merged("iss_b")];
        let outcome = partition(1, 7, &previous, &current);
        assert_eq!(outcome.stale_rejected, 2);
        assert_eq!(outcome.fixed.len(), 1);
        // the out-of-scope fingerprint is treated as unseen, so the
        // current finding counts as new for this pull request
        assert_eq!(outcome.new.len(), 1);
        assert_eq!(outcome.new[0].fingerprint, "iss_b");
    }

    #[test]
    fn test_partition_empty_run_fixes_everything() {
        let previous = vec![issue(1, 7, "iss_a"), issue(1, 7, "iss_b")];
        let outcome = partition(1, 7, &previous, &[]);
        assert_eq!(outcome.fixed.len(), 2);
        assert!(outcome.still_open.is_empty());
        assert!(outcome.new.is_empty());
    }
}
