use anyhow::{Result, bail};
use crag::ingest::{IngestMode, Ingestor};
use crag::model::{AgentIssue, AgentStatus, IssueStatus, Severity};
use crag::review::AgentInput;
use crag::review::orchestrator::{ReviewAgent, ReviewOrchestrator};
use crag::store::Store;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

const BILLING_PY: &str = "\
def validate_card(amount):
    return amount > 0


class PaymentProcessor:
    def process_payment(self, amount):
        if validate_card(amount):
            return amount
        return 0
";

const APP_PY: &str = "\
from billing import PaymentProcessor


def checkout(amount):
    processor = PaymentProcessor()
    return processor.process_payment(amount)
";

const DIFF: &str = "\
--- a/billing.py
+++ b/billing.py
@@ -6,3 +6,4 @@
";

fn setup() -> (TempDir, Store, i64) {
    let dir = TempDir::new().unwrap();
    write_file(dir.path(), "billing.py", BILLING_PY);
    write_file(dir.path(), "app.py", APP_PY);
    let store = Store::new(&dir.path().join(".crag").join("crag.db")).unwrap();
    let repo_id = store.upsert_repo("acme", "shop", Some("main")).unwrap();
    Ingestor::new(&store, dir.path().to_path_buf(), repo_id)
        .ingest(IngestMode::Full)
        .unwrap();
    (dir, store, repo_id)
}

struct StaticAgent {
    name: &'static str,
    issues: Vec<AgentIssue>,
}

impl ReviewAgent for StaticAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, _input: &AgentInput) -> Result<Vec<AgentIssue>> {
        Ok(self.issues.clone())
    }
}

struct FailingAgent;

impl ReviewAgent for FailingAgent {
    fn name(&self) -> &str {
        "flaky"
    }

    fn run(&self, _input: &AgentInput) -> Result<Vec<AgentIssue>> {
        bail!("model backend unavailable")
    }
}

fn issue(title: &str, path: &str, line: i64, severity: Severity, confidence: f64) -> AgentIssue {
    AgentIssue {
        title: title.to_string(),
        description: format!("{title} detected"),
        file_path: path.to_string(),
        line_start: line,
        line_end: None,
        severity,
        categories: vec!["correctness".to_string()],
        confidence,
        suggestion: None,
    }
}

fn issue_a() -> AgentIssue {
    issue(
        "Amount not validated for zero",
        "billing.py",
        7,
        Severity::Medium,
        0.9,
    )
}

fn issue_b() -> AgentIssue {
    issue(
        "Processor constructed per call",
        "app.py",
        5,
        Severity::Low,
        0.8,
    )
}

fn issue_c() -> AgentIssue {
    issue(
        "Card check ignores currency",
        "billing.py",
        1,
        Severity::High,
        0.7,
    )
}

#[test]
fn successive_runs_partition_fixed_open_and_new() {
    let (_dir, store, repo_id) = setup();
    let orchestrator = ReviewOrchestrator::new(&store, repo_id);

    let agents: Vec<Box<dyn ReviewAgent>> = vec![Box::new(StaticAgent {
        name: "bug_hunter",
        issues: vec![issue_a(), issue_b()],
    })];
    let first = orchestrator
        .run_review(42, Some("sha-1"), DIFF, agents)
        .unwrap();
    assert_eq!(first.run.run_number, 1);
    assert_eq!(first.run.new_issues.len(), 2);
    assert!(first.run.open_issues.is_empty());
    assert!(first.run.fixed_issues.is_empty());

    let agents: Vec<Box<dyn ReviewAgent>> = vec![Box::new(StaticAgent {
        name: "bug_hunter",
        issues: vec![issue_b(), issue_c()],
    })];
    let second = orchestrator
        .run_review(42, Some("sha-2"), DIFF, agents)
        .unwrap();
    assert_eq!(second.run.run_number, 2);

    assert_eq!(second.run.new_issues.len(), 1);
    assert_eq!(second.run.new_issues[0].title, issue_c().title);
    assert_eq!(second.run.new_issues[0].status, IssueStatus::New);

    assert_eq!(second.run.open_issues.len(), 1);
    assert_eq!(second.run.open_issues[0].title, issue_b().title);
    assert_eq!(second.run.open_issues[0].status, IssueStatus::Open);

    assert_eq!(second.run.fixed_issues.len(), 1);
    assert_eq!(second.run.fixed_issues[0].title, issue_a().title);
    assert_eq!(second.run.fixed_issues[0].status, IssueStatus::Fixed);
}

#[test]
fn review_state_is_isolated_per_pull_request() {
    let (_dir, store, repo_id) = setup();
    let orchestrator = ReviewOrchestrator::new(&store, repo_id);

    let agents: Vec<Box<dyn ReviewAgent>> = vec![Box::new(StaticAgent {
        name: "bug_hunter",
        issues: vec![issue_a()],
    })];
    orchestrator
        .run_review(42, Some("sha-1"), DIFF, agents)
        .unwrap();

    // a different PR starts from a clean slate
    let agents: Vec<Box<dyn ReviewAgent>> = vec![Box::new(StaticAgent {
        name: "bug_hunter",
        issues: vec![issue_a()],
    })];
    let other = orchestrator
        .run_review(7, Some("sha-9"), DIFF, agents)
        .unwrap();
    assert_eq!(other.run.run_number, 1);
    assert_eq!(other.run.new_issues.len(), 1);
    assert!(other.run.fixed_issues.is_empty());

    assert_eq!(store.review_history(repo_id, 42, 10).unwrap().len(), 1);
    assert_eq!(store.review_history(repo_id, 7, 10).unwrap().len(), 1);
}

#[test]
fn same_finding_from_two_agents_merges_into_one_issue() {
    let (_dir, store, repo_id) = setup();
    let orchestrator = ReviewOrchestrator::new(&store, repo_id);

    let mut from_auditor = issue_a();
    from_auditor.severity = Severity::High;
    from_auditor.confidence = 0.6;
    from_auditor.categories = vec!["security".to_string()];

    let agents: Vec<Box<dyn ReviewAgent>> = vec![
        Box::new(StaticAgent {
            name: "bug_hunter",
            issues: vec![issue_a()],
        }),
        Box::new(StaticAgent {
            name: "security_auditor",
            issues: vec![from_auditor],
        }),
    ];
    let result = orchestrator
        .run_review(42, Some("sha-1"), DIFF, agents)
        .unwrap();

    assert_eq!(result.run.new_issues.len(), 1);
    let merged = &result.run.new_issues[0];
    assert_eq!(merged.severity, Severity::High);
    assert_eq!(merged.confidence, 0.9);
    assert!(!merged.flagged);
    assert_eq!(merged.agents.len(), 2);
    assert!(merged.agents.contains(&"bug_hunter".to_string()));
    assert!(merged.agents.contains(&"security_auditor".to_string()));
    assert!(merged.categories.contains(&"correctness".to_string()));
    assert!(merged.categories.contains(&"security".to_string()));
}

#[test]
fn low_confidence_findings_are_flagged() {
    let (_dir, store, repo_id) = setup();
    let orchestrator = ReviewOrchestrator::new(&store, repo_id);

    let mut hunch = issue_c();
    hunch.confidence = 0.2;
    let agents: Vec<Box<dyn ReviewAgent>> = vec![Box::new(StaticAgent {
        name: "bug_hunter",
        issues: vec![hunch],
    })];
    let result = orchestrator
        .run_review(42, None, DIFF, agents)
        .unwrap();

    assert_eq!(result.run.new_issues.len(), 1);
    assert!(result.run.new_issues[0].flagged);
}

#[test]
fn failing_agent_does_not_sink_the_run() {
    let (_dir, store, repo_id) = setup();
    let orchestrator = ReviewOrchestrator::new(&store, repo_id);

    let agents: Vec<Box<dyn ReviewAgent>> = vec![
        Box::new(FailingAgent),
        Box::new(StaticAgent {
            name: "bug_hunter",
            issues: vec![issue_a()],
        }),
    ];
    let result = orchestrator
        .run_review(42, Some("sha-1"), DIFF, agents)
        .unwrap();

    assert_eq!(result.run.new_issues.len(), 1);
    assert_eq!(result.agent_outcomes.len(), 2);
    let flaky = result
        .agent_outcomes
        .iter()
        .find(|o| o.agent == "flaky")
        .unwrap();
    assert_eq!(flaky.status, AgentStatus::Failed);
    assert!(flaky.error.as_deref().unwrap().contains("unavailable"));
    let hunter = result
        .agent_outcomes
        .iter()
        .find(|o| o.agent == "bug_hunter")
        .unwrap();
    assert_eq!(hunter.status, AgentStatus::Ok);
    assert_eq!(hunter.issues_reported, 1);
}
