use crate::config::Config;
use crate::model::{AgentIssue, CallerFact, DiffContextResult, Issue};
use crate::review::AgentInput;
use crate::review::orchestrator::ReviewAgent;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::io::Write;
use std::process::{Command, Stdio};

pub const BUG_HUNTER: &str = "bug_hunter";
pub const SECURITY_AUDITOR: &str = "security_auditor";

const BUG_HUNTER_PERSONA: &str = "\
You are a meticulous bug hunter reviewing a pull request. Focus on logic \
errors, broken invariants, incorrect edge-case handling, race conditions, \
resource leaks, and regressions in callers of the changed code. Use the \
provided call-graph context to judge blast radius. Report only concrete \
problems in the changed code or directly caused by it. For each finding \
give file, line, a one-line title, a clear description, a severity \
(info|low|medium|high|critical), a confidence between 0 and 1, and, when \
obvious, a suggested fix.";

const SECURITY_AUDITOR_PERSONA: &str = "\
You are a security auditor reviewing a pull request. Focus on injection, \
unsafe deserialization, authentication and authorization gaps, secrets in \
code, path traversal, SSRF, and unsafe handling of untrusted input. Use \
the provided call-graph context to trace how tainted data flows into the \
changed code. Report only concrete, exploitable or near-exploitable \
problems. For each finding give file, line, a one-line title, a clear \
description, a severity (info|low|medium|high|critical), a confidence \
between 0 and 1, and, when obvious, a suggested fix.";

/// Render the graph context for a diff as markdown for the agent prompt.
pub fn render_context(context: &DiffContextResult, previous_open: &[Issue]) -> String {
    let mut out = String::new();
    out.push_str("# Code graph context\n\n");

    for file in &context.files {
        out.push_str(&format!("## {}\n\n", file.file_path));
        if !file.indexed {
            out.push_str("Not indexed; review from the diff alone.\n\n");
            continue;
        }
        if !file.touched_symbols.is_empty() {
            out.push_str("Changed symbols:\n");
            for symbol in &file.touched_symbols {
                out.push_str(&format!(
                    "- {} `{}` (lines {}..)\n",
                    symbol.kind, symbol.qualname, symbol.start_line
                ));
            }
            out.push('\n');
        }
        if !file.callers.is_empty() {
            out.push_str("Callers of changed code:\n");
            for caller in &file.callers {
                match caller {
                    CallerFact::ResolvedCall { caller, line, .. } => out.push_str(&format!(
                        "- `{}` at {}:{}\n",
                        caller.qualname, caller.file_path, line
                    )),
                    CallerFact::TextReference {
                        file_path,
                        caller_name,
                        line,
                        ..
                    } => out.push_str(&format!(
                        "- text reference{} at {}:{}\n",
                        caller_name
                            .as_deref()
                            .map(|n| format!(" from `{}`", n))
                            .unwrap_or_default(),
                        file_path,
                        line
                    )),
                }
            }
            out.push('\n');
        }
        for hierarchy in &file.class_hierarchies {
            if hierarchy.ancestors.is_empty() && hierarchy.descendants.is_empty() {
                continue;
            }
            out.push_str(&format!("Class `{}`:", hierarchy.class_name));
            if !hierarchy.ancestors.is_empty() {
                let names: Vec<&str> =
                    hierarchy.ancestors.iter().map(|a| a.name.as_str()).collect();
                out.push_str(&format!(" inherits {}", names.join(" -> ")));
            }
            if !hierarchy.descendants.is_empty() {
                let names: Vec<&str> = hierarchy
                    .descendants
                    .iter()
                    .map(|d| d.name.as_str())
                    .collect();
                out.push_str(&format!("; subclassed by {}", names.join(", ")));
            }
            out.push_str("\n\n");
        }
    }

    if !previous_open.is_empty() {
        out.push_str("# Previously reported, still open\n\n");
        out.push_str("Re-check these; do not re-report them unless they are still present:\n");
        for issue in previous_open {
            out.push_str(&format!(
                "- [{}] {} ({}:{})\n",
                crate::store::severity_str(issue.severity),
                issue.title,
                issue.file_path,
                issue.line_start
            ));
        }
    }

    out
}

#[derive(Deserialize)]
struct AgentReplyBody {
    issues: Vec<AgentIssue>,
}

/// An agent that shells out to an external command. The prompt goes to
/// the child's stdin as JSON; the child answers with an issue list on
/// stdout, either bare or wrapped in `{"issues": [...]}`. The model
/// transport lives entirely behind that command.
pub struct CommandAgent {
    name: String,
    persona: &'static str,
    command: String,
}

impl CommandAgent {
    pub fn new(name: &str, persona: &'static str, command: String) -> Self {
        Self {
            name: name.to_string(),
            persona,
            command,
        }
    }
}

impl ReviewAgent for CommandAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, input: &AgentInput) -> Result<Vec<AgentIssue>> {
        let prompt = serde_json::json!({
            "agent": self.name,
            "persona": self.persona,
            "repo": input.repo,
            "pr_number": input.pr_number,
            "diff": input.diff,
            "context": input.context,
            "previous_open": input.previous_open,
        });

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn agent command for {}", self.name))?;

        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            stdin
                .write_all(serde_json::to_string(&prompt)?.as_bytes())
                .with_context(|| format!("write prompt to {}", self.name))?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("wait for agent {}", self.name))?;
        if !output.status.success() {
            bail!("agent command exited with {}", output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let body = stdout.trim();
        if body.is_empty() {
            return Ok(Vec::new());
        }
        if let Ok(issues) = serde_json::from_str::<Vec<AgentIssue>>(body) {
            return Ok(issues);
        }
        let wrapped: AgentReplyBody = serde_json::from_str(body)
            .with_context(|| format!("parse agent {} output", self.name))?;
        Ok(wrapped.issues)
    }
}

/// The default agent roster: both personas over the configured command.
pub fn default_agents() -> Result<Vec<Box<dyn ReviewAgent>>> {
    let Some(command) = Config::get().agent_cmd.clone() else {
        bail!("CRAG_AGENT_CMD is not set; no review agents available");
    };
    Ok(vec![
        Box::new(CommandAgent::new(
            BUG_HUNTER,
            BUG_HUNTER_PERSONA,
            command.clone(),
        )),
        Box::new(CommandAgent::new(
            SECURITY_AUDITOR,
            SECURITY_AUDITOR_PERSONA,
            command,
        )),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiffContextResult, FileDiffContext};

    #[test]
    fn test_render_context_marks_unindexed_files() {
        let context = DiffContextResult {
            files: vec![FileDiffContext {
                file_path: "new.py".to_string(),
                indexed: false,
                touched_symbols: Vec::new(),
                callers: Vec::new(),
                class_hierarchies: Vec::new(),
                imports: Vec::new(),
                source: None,
            }],
            total_files: 1,
            total_affected: 0,
            total_callers: 0,
        };
        let rendered = render_context(&context, &[]);
        assert!(rendered.contains("## new.py"));
        assert!(rendered.contains("Not indexed"));
        assert!(!rendered.contains("Previously reported"));
    }
}
