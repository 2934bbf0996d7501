use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Clone)]
pub struct Repo {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub last_commit_sha: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub repo_id: i64,
    pub path: String,
    pub hash: String,
    pub language: String,
    pub line_count: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct Symbol {
    pub id: i64,
    pub file_path: String,
    pub kind: String,
    pub name: String,
    pub qualname: String,
    pub start_line: i64,
    pub end_line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    pub complexity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_owner: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub base_classes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct SymbolCompact {
    pub id: i64,
    pub kind: String,
    pub name: String,
    pub qualname: String,
    pub file_path: String,
    pub start_line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl From<&Symbol> for SymbolCompact {
    fn from(s: &Symbol) -> Self {
        SymbolCompact {
            id: s.id,
            kind: s.kind.clone(),
            name: s.name.clone(),
            qualname: s.qualname.clone(),
            file_path: s.file_path.clone(),
            start_line: s.start_line,
            signature: s.signature.clone(),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct Edge {
    pub id: i64,
    pub kind: String,
    pub source_id: i64,
    pub target_id: i64,
    pub file_path: String,
    pub line: i64,
}

#[derive(Debug, Serialize)]
pub struct RepoOverview {
    pub repo: Repo,
    pub files: i64,
    pub symbols: i64,
    pub edges: i64,
    pub call_refs: i64,
    pub languages: Vec<String>,
}

// find_callers types

/// One caller of a symbol, tagged by how the relationship was established.
/// Resolved call-graph edges are exact; text references are best effort.
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "source")]
pub enum CallerFact {
    #[serde(rename = "call_graph")]
    ResolvedCall {
        caller: SymbolCompact,
        line: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        snippet: Option<String>,
    },
    #[serde(rename = "text_reference")]
    TextReference {
        file_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caller_name: Option<String>,
        line: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        snippet: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct CallersResult {
    #[serde(rename = "symbol")]
    pub method_name: String,
    pub definitions: Vec<SymbolCompact>,
    pub total: usize,
    pub callers: Vec<CallerFact>,
    pub fallback_used: bool,
}

// class_hierarchy types

#[derive(Debug, Serialize)]
pub struct HierarchyResult {
    pub class_name: String,
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<SymbolCompact>,
    pub ancestors: Vec<HierarchyEntry>,
    pub descendants: Vec<HierarchyEntry>,
    pub methods: Vec<SymbolCompact>,
}

#[derive(Debug, Serialize, Clone)]
pub struct HierarchyEntry {
    pub name: String,
    pub depth: usize,
    /// Present when the class is defined in the indexed repo; absent for
    /// external bases that only appear in a class statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<SymbolCompact>,
}

// method_usages types

#[derive(Debug, Serialize)]
pub struct MethodUsagesResult {
    pub method_name: String,
    #[serde(rename = "usages")]
    pub groups: Vec<MethodUsageGroup>,
    /// References that could not be attributed to one definition.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub text_references: Vec<CallerFact>,
}

#[derive(Debug, Serialize)]
pub struct MethodUsageGroup {
    #[serde(rename = "method")]
    pub definition: SymbolCompact,
    pub file: String,
    pub callers: Vec<CallerFact>,
}

// change_impact types

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Serialize)]
pub struct ChangeImpactResult {
    #[serde(rename = "symbol")]
    pub symbol_name: String,
    pub definitions: Vec<SymbolCompact>,
    pub callers: Vec<CallerFact>,
    pub caller_count: usize,
    pub cross_file: bool,
    pub impact_level: ImpactLevel,
}

// diff_context types

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChangedRange {
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
}

#[derive(Debug, Serialize)]
pub struct DiffContextResult {
    pub files: Vec<FileDiffContext>,
    pub total_files: usize,
    pub total_affected: usize,
    pub total_callers: usize,
}

#[derive(Debug, Serialize)]
pub struct FileDiffContext {
    pub file_path: String,
    pub indexed: bool,
    pub touched_symbols: Vec<SymbolCompact>,
    pub callers: Vec<CallerFact>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub class_hierarchies: Vec<HierarchyResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<ImportRecord>,
    /// Full post-image source when the file is in the index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ImportRecord {
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub line: i64,
}

// search types

/// `hit_type` carries the symbol kind (`function`, `class`, ...) for the
/// symbol tier and `line` for the file-content fallback tier.
#[derive(Debug, Serialize, Clone)]
pub struct SearchHit {
    #[serde(rename = "type")]
    pub hit_type: String,
    pub path: String,
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<SymbolCompact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosing_symbol: Option<String>,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub truncated: bool,
}

// ingest types

#[derive(Debug, Serialize)]
pub struct IngestStats {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub failed: usize,
    pub symbols: usize,
    pub edges: usize,
    pub duration_ms: u64,
}

// review types

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    New,
    Open,
    Fixed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::New => "new",
            IssueStatus::Open => "open",
            IssueStatus::Fixed => "fixed",
        }
    }

    pub fn parse(value: &str) -> Option<IssueStatus> {
        match value {
            "new" => Some(IssueStatus::New),
            "open" => Some(IssueStatus::Open),
            "fixed" => Some(IssueStatus::Fixed),
            _ => None,
        }
    }
}

/// A finding as reported by a single review agent, before merging.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentIssue {
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub line_start: i64,
    #[serde(default)]
    pub line_end: Option<i64>,
    pub severity: Severity,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub suggestion: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

/// A persisted issue after merging and reconciliation.
#[derive(Debug, Serialize, Clone)]
pub struct Issue {
    pub id: i64,
    pub repo_id: i64,
    pub pr_number: i64,
    pub fingerprint: String,
    pub title: String,
    pub description: String,
    pub file_path: String,
    pub line_start: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<i64>,
    pub severity: Severity,
    pub categories: Vec<String>,
    pub agents: Vec<String>,
    pub confidence: f64,
    pub flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub status: IssueStatus,
    pub first_seen_run: i64,
    pub last_seen_run: i64,
}

#[derive(Debug, Serialize)]
pub struct ReconciledRun {
    pub run_id: i64,
    pub run_number: i64,
    pub pr_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    pub new_issues: Vec<Issue>,
    pub open_issues: Vec<Issue>,
    pub fixed_issues: Vec<Issue>,
}

/// Per-agent outcome reported alongside the merged run so partial
/// failures stay visible instead of silently shrinking the result.
#[derive(Debug, Serialize, Clone)]
pub struct AgentOutcome {
    pub agent: String,
    pub status: AgentStatus,
    pub issues_reported: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Ok,
    Failed,
    TimedOut,
}

#[derive(Debug, Serialize)]
pub struct ReviewRunResult {
    pub run: ReconciledRun,
    pub agent_outcomes: Vec<AgentOutcome>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ReviewRunSummary {
    pub run_id: i64,
    pub run_number: i64,
    pub created: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    pub new_count: i64,
    pub open_count: i64,
    pub fixed_count: i64,
}
