use crate::config::Config;
use crate::diff;
use crate::model::{AgentIssue, AgentOutcome, AgentStatus, ReviewRunResult};
use crate::query::QueryEngine;
use crate::review::state::{MergedIssue, ReviewStateTracker};
use crate::review::{AgentInput, agents, fingerprint};
use crate::store::Store;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// One reviewing persona. Implementations must be cheap to move onto a
/// worker thread; all shared inputs arrive through `AgentInput`.
pub trait ReviewAgent: Send {
    fn name(&self) -> &str;

    fn run(&self, input: &AgentInput) -> Result<Vec<AgentIssue>>;
}

struct AgentReply {
    agent: String,
    duration_ms: u64,
    outcome: Result<Vec<AgentIssue>>,
}

pub struct ReviewOrchestrator<'a> {
    store: &'a Store,
    repo_id: i64,
}

impl<'a> ReviewOrchestrator<'a> {
    pub fn new(store: &'a Store, repo_id: i64) -> Self {
        Self { store, repo_id }
    }

    /// Run every agent against the diff, merge their findings, and
    /// reconcile the merged set into the pull request's history.
    pub fn run_review(
        &self,
        pr_number: i64,
        commit_sha: Option<&str>,
        diff_text: &str,
        agent_list: Vec<Box<dyn ReviewAgent>>,
    ) -> Result<ReviewRunResult> {
        let repo = self.store.repo_by_id(self.repo_id)?;
        let tracker = ReviewStateTracker::new(self.store);

        let changes = diff::parse_unified_diff(diff_text);
        let engine = QueryEngine::new(self.store, self.repo_id);
        let context = engine.diff_context(&changes)?;
        let previous_open = tracker.open_issues(self.repo_id, pr_number)?;

        let input = AgentInput {
            repo: format!("{}/{}", repo.owner, repo.name),
            pr_number,
            diff: diff_text.to_string(),
            context: agents::render_context(&context, &previous_open),
            previous_open,
        };

        let (reported, outcomes) = dispatch(agent_list, input);
        let merged = self.merge(reported)?;
        let run = tracker.reconcile(self.repo_id, pr_number, commit_sha, &merged)?;

        Ok(ReviewRunResult {
            run,
            agent_outcomes: outcomes,
        })
    }

    /// Merge per-agent findings by fingerprint. The higher severity
    /// report wins the text fields; categories and agent names union;
    /// confidence keeps the most confident report and drives flagging.
    fn merge(&self, reported: Vec<(String, Vec<AgentIssue>)>) -> Result<Vec<MergedIssue>> {
        let min_confidence = Config::get().min_confidence;
        let mut by_fingerprint: HashMap<String, MergedIssue> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for (agent, issues) in reported {
            for issue in issues {
                let fp = fingerprint::fingerprint_issue(self.store, self.repo_id, &issue)?;
                match by_fingerprint.get_mut(&fp) {
                    None => {
                        order.push(fp.clone());
                        by_fingerprint.insert(
                            fp.clone(),
                            MergedIssue {
                                fingerprint: fp,
                                title: issue.title,
                                description: issue.description,
                                file_path: issue.file_path,
                                line_start: issue.line_start,
                                line_end: issue.line_end,
                                severity: issue.severity,
                                categories: issue.categories,
                                agents: vec![agent.clone()],
                                confidence: issue.confidence,
                                flagged: false,
                                suggestion: issue.suggestion,
                            },
                        );
                    }
                    Some(existing) => {
                        if issue.severity > existing.severity {
                            existing.severity = issue.severity;
                            existing.title = issue.title;
                            existing.description = issue.description;
                            existing.line_start = issue.line_start;
                            existing.line_end = issue.line_end;
                            if issue.suggestion.is_some() {
                                existing.suggestion = issue.suggestion;
                            }
                        }
                        for category in issue.categories {
                            if !existing.categories.contains(&category) {
                                existing.categories.push(category);
                            }
                        }
                        if !existing.agents.contains(&agent) {
                            existing.agents.push(agent.clone());
                        }
                        if issue.confidence > existing.confidence {
                            existing.confidence = issue.confidence;
                        }
                    }
                }
            }
        }

        let mut merged = Vec::with_capacity(order.len());
        for fp in order {
            if let Some(mut issue) = by_fingerprint.remove(&fp) {
                issue.flagged = issue.confidence < min_confidence;
                merged.push(issue);
            }
        }
        Ok(merged)
    }
}

/// Run agents on their own threads and collect over a channel with one
/// shared deadline. An agent that fails or outlives the deadline is
/// recorded and contributes nothing; the rest of the run proceeds.
fn dispatch(
    agent_list: Vec<Box<dyn ReviewAgent>>,
    input: AgentInput,
) -> (Vec<(String, Vec<AgentIssue>)>, Vec<AgentOutcome>) {
    let timeout = Duration::from_secs(Config::get().agent_timeout_secs);
    let deadline = Instant::now() + timeout;
    let input = Arc::new(input);

    let mut expected: Vec<String> = Vec::new();
    let (tx, rx) = mpsc::channel::<AgentReply>();
    for agent in agent_list {
        expected.push(agent.name().to_string());
        let tx = tx.clone();
        let input = Arc::clone(&input);
        thread::spawn(move || {
            let started = Instant::now();
            let outcome = agent.run(&input);
            let _ = tx.send(AgentReply {
                agent: agent.name().to_string(),
                duration_ms: started.elapsed().as_millis() as u64,
                outcome,
            });
        });
    }
    drop(tx);

    let mut reported = Vec::new();
    let mut outcomes: Vec<AgentOutcome> = Vec::new();
    let mut remaining: Vec<String> = expected.clone();

    while !remaining.is_empty() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        match rx.recv_timeout(deadline - now) {
            Ok(reply) => {
                remaining.retain(|name| name != &reply.agent);
                match reply.outcome {
                    Ok(issues) => {
                        outcomes.push(AgentOutcome {
                            agent: reply.agent.clone(),
                            status: AgentStatus::Ok,
                            issues_reported: issues.len(),
                            duration_ms: reply.duration_ms,
                            error: None,
                        });
                        reported.push((reply.agent, issues));
                    }
                    Err(err) => {
                        eprintln!("crag: Warning: agent {} failed: {}", reply.agent, err);
                        outcomes.push(AgentOutcome {
                            agent: reply.agent,
                            status: AgentStatus::Failed,
                            issues_reported: 0,
                            duration_ms: reply.duration_ms,
                            error: Some(err.to_string()),
                        });
                    }
                }
            }
            Err(_) => break,
        }
    }

    for name in remaining {
        eprintln!("crag: Warning: agent {} timed out", name);
        outcomes.push(AgentOutcome {
            agent: name,
            status: AgentStatus::TimedOut,
            issues_reported: 0,
            duration_ms: timeout.as_millis() as u64,
            error: Some("deadline exceeded".to_string()),
        });
    }

    // keep outcome order aligned with the configured agent order
    outcomes.sort_by_key(|outcome| {
        expected
            .iter()
            .position(|name| name == &outcome.agent)
            .unwrap_or(usize::MAX)
    });

    (reported, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity as Sev;
    use anyhow::anyhow;

    struct StaticAgent {
        name: String,
        issues: Vec<AgentIssue>,
    }

    impl ReviewAgent for StaticAgent {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&self, _input: &AgentInput) -> Result<Vec<AgentIssue>> {
            Ok(self.issues.clone())
        }
    }

    struct FailingAgent;

    impl ReviewAgent for FailingAgent {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(&self, _input: &AgentInput) -> Result<Vec<AgentIssue>> {
            Err(anyhow!("model unavailable"))
        }
    }

    fn sample_issue(title: &str, severity: Sev) -> AgentIssue {
        AgentIssue {
            title: title.to_string(),
            description: "desc".to_string(),
            file_path: "a.py".to_string(),
            line_start: 3,
            line_end: None,
            severity,
            categories: vec!["bug".to_string()],
            confidence: 0.9,
            suggestion: None,
        }
    }

    fn empty_input() -> AgentInput {
        AgentInput {
            repo: "acme/widgets".to_string(),
            pr_number: 1,
            diff: String::new(),
            context: String::new(),
            previous_open: Vec::new(),
        }
    }

    #[test]
    fn test_dispatch_isolates_failing_agent() {
        let agents: Vec<Box<dyn ReviewAgent>> = vec![
            Box::new(StaticAgent {
                name: "bug_hunter".to_string(),
                issues: vec![sample_issue("leak", Sev::High)],
            }),
            Box::new(FailingAgent),
        ];
        let (reported, outcomes) = dispatch(agents, empty_input());
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].0, "bug_hunter");
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, AgentStatus::Ok);
        assert_eq!(outcomes[1].status, AgentStatus::Failed);
        assert!(outcomes[1].error.as_deref().is_some_and(|e| e.contains("model unavailable")));
    }

    #[test]
    fn test_dispatch_reports_all_agents() {
        let agents: Vec<Box<dyn ReviewAgent>> = vec![
            Box::new(StaticAgent {
                name: "a".to_string(),
                issues: Vec::new(),
            }),
            Box::new(StaticAgent {
                name: "b".to_string(),
                issues: Vec::new(),
            }),
        ];
        let (_, outcomes) = dispatch(agents, empty_input());
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.status == AgentStatus::Ok));
    }
}
