//! JSONL RPC over stdin/stdout.
//!
//! One request per line in, one response per line out. Errors come back
//! on the response instead of killing the loop, so a misbehaving client
//! cannot take the server down with a bad line.

use crate::diff;
use crate::model::ChangedRange;
use crate::query::QueryEngine;
use crate::store::Store;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Serialize)]
struct RpcResponse {
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    message: String,
}

#[derive(Deserialize)]
struct NameParams {
    #[serde(
        alias = "symbol_name",
        alias = "method_name",
        alias = "symbol",
        alias = "class_name"
    )]
    name: String,
}

#[derive(Deserialize)]
struct DiffContextParams {
    /// Raw unified diff. Mutually exclusive with `changes`.
    diff: Option<String>,
    /// Explicit changed ranges, for callers that already parsed the diff.
    changes: Option<Vec<ChangedRange>>,
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct HistoryParams {
    pr_number: i64,
    limit: Option<usize>,
}

pub fn serve(db_path: PathBuf, owner: String, name: String) -> Result<()> {
    let app = App::new(db_path, &owner, &name)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(value) => value,
            Err(err) => {
                eprintln!("crag: stdin error: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => app.handle_request(request),
            Err(err) => error_response(Value::Null, &format!("invalid request: {err}")),
        };

        writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
        stdout.flush()?;
    }

    Ok(())
}

struct App {
    store: Store,
    repo_id: i64,
}

impl App {
    fn new(db_path: PathBuf, owner: &str, name: &str) -> Result<Self> {
        let store = Store::new(&db_path)?;
        let repo = store
            .get_repo(owner, name)?
            .with_context(|| format!("repo {owner}/{name} is not indexed"))?;
        Ok(Self {
            store,
            repo_id: repo.id,
        })
    }

    fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let id = req.id.clone();
        match self.handle_method(&req.method, req.params) {
            Ok(value) => RpcResponse {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => error_response(id, &err.to_string()),
        }
    }

    fn handle_method(&self, method: &str, params: Value) -> Result<Value> {
        let engine = QueryEngine::new(&self.store, self.repo_id);
        match method {
            "find_callers" => {
                let params: NameParams = parse_params(params)?;
                Ok(serde_json::to_value(engine.find_callers(&params.name)?)?)
            }
            "class_hierarchy" => {
                let params: NameParams = parse_params(params)?;
                Ok(serde_json::to_value(engine.class_hierarchy(&params.name)?)?)
            }
            "method_usages" => {
                let params: NameParams = parse_params(params)?;
                Ok(serde_json::to_value(engine.method_usages(&params.name)?)?)
            }
            "change_impact" => {
                let params: NameParams = parse_params(params)?;
                Ok(serde_json::to_value(engine.change_impact(&params.name)?)?)
            }
            "diff_context" => {
                let params: DiffContextParams = parse_params(params)?;
                let changes = match (params.changes, params.diff) {
                    (Some(changes), _) => changes,
                    (None, Some(diff_text)) => diff::parse_unified_diff(&diff_text),
                    (None, None) => bail!("diff_context requires `diff` or `changes`"),
                };
                Ok(serde_json::to_value(engine.diff_context(&changes)?)?)
            }
            "search" => {
                let params: SearchParams = parse_params(params)?;
                Ok(serde_json::to_value(
                    engine.search(&params.query, params.limit)?,
                )?)
            }
            "repo_overview" => Ok(serde_json::to_value(engine.repo_overview()?)?),
            "review_history" => {
                let params: HistoryParams = parse_params(params)?;
                let runs = self.store.review_history(
                    self.repo_id,
                    params.pr_number,
                    params.limit.unwrap_or(20),
                )?;
                Ok(json!({ "runs": runs }))
            }
            other => bail!("unknown method: {other}"),
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).with_context(|| "invalid params")
}

fn error_response(id: Value, message: &str) -> RpcResponse {
    RpcResponse {
        id,
        result: None,
        error: Some(RpcError {
            message: message.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_name_params_accepts_every_documented_key() {
        for key in ["name", "symbol_name", "method_name", "symbol", "class_name"] {
            let params: NameParams = serde_json::from_value(json!({ key: "checkout" }))
                .unwrap_or_else(|e| panic!("key {key}: {e}"));
            assert_eq!(params.name, "checkout");
        }
    }
}
