use crate::extractor::CallSite;
use crate::model::Symbol;
use crate::store::Store;
use anyhow::Result;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct EdgeInput {
    pub kind: String,
    pub source_id: i64,
    pub target_id: i64,
    pub file_id: i64,
    pub line: i64,
}

#[derive(Debug, Clone)]
pub struct CallRefInput {
    pub file_id: i64,
    pub caller_symbol_id: Option<i64>,
    pub caller_name: Option<String>,
    pub callee_name: String,
    pub line: i64,
}

/// Name index over every callable symbol in a repo, rebuilt once per
/// ingest batch after all files are stored.
pub struct NameIndex {
    by_name: HashMap<String, Vec<Symbol>>,
}

impl NameIndex {
    pub fn build(store: &Store, repo_id: i64) -> Result<Self> {
        let mut by_name: HashMap<String, Vec<Symbol>> = HashMap::new();
        for symbol in store.callable_symbols(repo_id)? {
            by_name.entry(symbol.name.clone()).or_default().push(symbol);
        }
        Ok(Self { by_name })
    }

    pub fn candidates(&self, name: &str) -> &[Symbol] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The sole definition of `name` repo-wide, or None when the name is
    /// unknown or ambiguous.
    pub fn resolve_unique(&self, name: &str) -> Option<&Symbol> {
        match self.candidates(name) {
            [single] => Some(single),
            _ => None,
        }
    }

    /// The sole definition of `name` within one directory, or None when
    /// that directory holds zero or several.
    pub fn resolve_in_dir(&self, name: &str, dir: &str) -> Option<&Symbol> {
        let mut found = None;
        for candidate in self.candidates(name) {
            if parent_dir(&candidate.file_path) == dir {
                if found.is_some() {
                    return None;
                }
                found = Some(candidate);
            }
        }
        found
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Everything the linker produces for a single file.
#[derive(Debug, Default)]
pub struct LinkedFile {
    pub edges: Vec<EdgeInput>,
    pub call_refs: Vec<CallRefInput>,
}

/// Build structural and call edges for one freshly stored file.
///
/// Resolution is deliberately conservative: a call binds to a symbol only
/// when the target is unambiguous, first within the same file, then the
/// same directory, then repo-wide. Anything else is kept as a textual
/// reference so it can still surface in caller queries, just tagged as
/// best effort.
pub fn link_file(
    file_id: i64,
    symbols: &[Symbol],
    calls: &[CallSite],
    index: &NameIndex,
) -> LinkedFile {
    let mut linked = LinkedFile::default();

    let by_qualname: HashMap<&str, &Symbol> =
        symbols.iter().map(|s| (s.qualname.as_str(), s)).collect();
    let mut local_by_name: HashMap<&str, Vec<&Symbol>> = HashMap::new();
    for symbol in symbols {
        if matches!(symbol.kind.as_str(), "function" | "method" | "class") {
            local_by_name.entry(symbol.name.as_str()).or_default().push(symbol);
        }
    }
    let module_symbol = symbols.iter().find(|s| s.kind == "module");
    let dir = symbols
        .first()
        .map(|s| parent_dir(&s.file_path))
        .unwrap_or("");

    // structure: module CONTAINS top-level symbols, classes DEFINE methods
    for symbol in symbols {
        match symbol.class_owner.as_deref() {
            Some(owner) => {
                if let Some(owner_symbol) = by_qualname.get(owner) {
                    linked.edges.push(EdgeInput {
                        kind: "DEFINES".to_string(),
                        source_id: owner_symbol.id,
                        target_id: symbol.id,
                        file_id,
                        line: symbol.start_line,
                    });
                }
            }
            None if symbol.kind != "module" => {
                if let Some(module) = module_symbol {
                    linked.edges.push(EdgeInput {
                        kind: "CONTAINS".to_string(),
                        source_id: module.id,
                        target_id: symbol.id,
                        file_id,
                        line: symbol.start_line,
                    });
                }
            }
            None => {}
        }
    }

    // inheritance: resolved bases get an edge, the rest stay textual
    for symbol in symbols {
        if symbol.kind != "class" {
            continue;
        }
        for base in &symbol.base_classes {
            let target = match local_by_name.get(base.as_str()).map(Vec::as_slice) {
                Some([single]) if single.kind == "class" => Some(*single),
                _ => index
                    .resolve_in_dir(base, dir)
                    .or_else(|| index.resolve_unique(base))
                    .filter(|candidate| candidate.kind == "class"),
            };
            if let Some(target) = target {
                if target.id != symbol.id {
                    linked.edges.push(EdgeInput {
                        kind: "INHERITS".to_string(),
                        source_id: symbol.id,
                        target_id: target.id,
                        file_id,
                        line: symbol.start_line,
                    });
                }
            }
        }
    }

    // calls
    for call in calls {
        let caller = call
            .caller_qualname
            .as_deref()
            .and_then(|q| by_qualname.get(q).copied())
            .or(module_symbol);

        let target = match local_by_name.get(call.callee_name.as_str()).map(Vec::as_slice) {
            Some([single]) => Some(*single),
            Some(_) => None,
            None => index
                .resolve_in_dir(&call.callee_name, dir)
                .or_else(|| index.resolve_unique(&call.callee_name)),
        };

        match (caller, target) {
            (Some(caller), Some(target)) => linked.edges.push(EdgeInput {
                kind: "CALLS".to_string(),
                source_id: caller.id,
                target_id: target.id,
                file_id,
                line: call.line,
            }),
            _ => linked.call_refs.push(CallRefInput {
                file_id,
                caller_symbol_id: caller.map(|c| c.id),
                caller_name: call.caller_qualname.clone(),
                callee_name: call.callee_name.clone(),
                line: call.line,
            }),
        }
    }

    linked
}

/// After new symbols land, textual references elsewhere that name them
/// may now resolve. Promote each such reference to a call edge when the
/// name has become unambiguous and the referencing symbol still exists.
pub fn promote_call_refs(
    store: &Store,
    repo_id: i64,
    new_symbols: &[Symbol],
    index: &NameIndex,
) -> Result<usize> {
    let mut names: HashSet<&str> = HashSet::new();
    for symbol in new_symbols {
        if matches!(symbol.kind.as_str(), "function" | "method" | "class") {
            names.insert(symbol.name.as_str());
        }
    }

    let mut promoted = 0usize;
    for name in names {
        for call_ref in store.call_refs_for_callee(repo_id, name)? {
            let Some(target) = index
                .resolve_in_dir(name, parent_dir(&call_ref.file_path))
                .or_else(|| index.resolve_unique(name))
            else {
                continue;
            };
            let Some(caller_id) = call_ref.caller_symbol_id else {
                continue;
            };
            if store.symbol_by_id(caller_id)?.is_none() {
                continue;
            }
            store.insert_edges(&[EdgeInput {
                kind: "CALLS".to_string(),
                source_id: caller_id,
                target_id: target.id,
                file_id: call_ref.file_id,
                line: call_ref.line,
            }])?;
            store.delete_call_ref(call_ref.id)?;
            promoted += 1;
        }
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(id: i64, kind: &str, name: &str, qualname: &str) -> Symbol {
        symbol_at(id, kind, name, qualname, "app.py")
    }

    fn symbol_at(id: i64, kind: &str, name: &str, qualname: &str, path: &str) -> Symbol {
        Symbol {
            id,
            file_path: path.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            qualname: qualname.to_string(),
            start_line: 1,
            end_line: 5,
            signature: None,
            docstring: None,
            complexity: 1,
            class_owner: None,
            base_classes: Vec::new(),
            stable_id: None,
        }
    }

    fn empty_index() -> NameIndex {
        NameIndex {
            by_name: HashMap::new(),
        }
    }

    #[test]
    fn test_same_file_call_resolves() {
        let symbols = vec![
            symbol(1, "module", "app", "app"),
            symbol(2, "function", "run", "app.run"),
            symbol(3, "function", "helper", "app.helper"),
        ];
        let calls = vec![CallSite {
            caller_qualname: Some("app.run".to_string()),
            callee_name: "helper".to_string(),
            line: 3,
        }];
        let linked = link_file(10, &symbols, &calls, &empty_index());
        let call_edge = linked
            .edges
            .iter()
            .find(|e| e.kind == "CALLS")
            .expect("call edge");
        assert_eq!(call_edge.source_id, 2);
        assert_eq!(call_edge.target_id, 3);
        assert!(linked.call_refs.is_empty());
    }

    #[test]
    fn test_unresolved_call_becomes_text_reference() {
        let symbols = vec![
            symbol(1, "module", "app", "app"),
            symbol(2, "function", "run", "app.run"),
        ];
        let calls = vec![CallSite {
            caller_qualname: Some("app.run".to_string()),
            callee_name: "mystery".to_string(),
            line: 4,
        }];
        let linked = link_file(10, &symbols, &calls, &empty_index());
        assert!(linked.edges.iter().all(|e| e.kind != "CALLS"));
        assert_eq!(linked.call_refs.len(), 1);
        assert_eq!(linked.call_refs[0].callee_name, "mystery");
        assert_eq!(linked.call_refs[0].caller_symbol_id, Some(2));
    }

    #[test]
    fn test_ambiguous_local_name_stays_unresolved() {
        let mut over_a = symbol(2, "method", "save", "app.A.save");
        over_a.class_owner = Some("app.A".to_string());
        let mut over_b = symbol(3, "method", "save", "app.B.save");
        over_b.class_owner = Some("app.B".to_string());
        let symbols = vec![symbol(1, "module", "app", "app"), over_a, over_b];
        let calls = vec![CallSite {
            caller_qualname: None,
            callee_name: "save".to_string(),
            line: 9,
        }];
        let linked = link_file(10, &symbols, &calls, &empty_index());
        assert!(linked.edges.iter().all(|e| e.kind != "CALLS"));
        assert_eq!(linked.call_refs.len(), 1);
    }

    #[test]
    fn test_same_directory_definition_beats_repo_wide_ambiguity() {
        let mut by_name: HashMap<String, Vec<Symbol>> = HashMap::new();
        by_name.insert(
            "helper".to_string(),
            vec![
                symbol_at(20, "function", "helper", "pkg.lib.helper", "pkg/lib.py"),
                symbol_at(30, "function", "helper", "other.lib.helper", "other/lib.py"),
            ],
        );
        let index = NameIndex { by_name };
        let symbols = vec![
            symbol_at(1, "module", "use", "pkg.use", "pkg/use.py"),
            symbol_at(2, "function", "run", "pkg.use.run", "pkg/use.py"),
        ];
        let calls = vec![CallSite {
            caller_qualname: Some("pkg.use.run".to_string()),
            callee_name: "helper".to_string(),
            line: 2,
        }];
        let linked = link_file(10, &symbols, &calls, &index);
        let call_edge = linked
            .edges
            .iter()
            .find(|e| e.kind == "CALLS")
            .expect("call edge");
        assert_eq!(call_edge.source_id, 2);
        assert_eq!(call_edge.target_id, 20);
        assert!(linked.call_refs.is_empty());
    }

    #[test]
    fn test_inherits_edge_for_local_base() {
        let base = symbol(2, "class", "Animal", "app.Animal");
        let mut derived = symbol(3, "class", "Dog", "app.Dog");
        derived.base_classes = vec!["Animal".to_string()];
        let symbols = vec![symbol(1, "module", "app", "app"), base, derived];
        let linked = link_file(10, &symbols, &[], &empty_index());
        let inherits = linked
            .edges
            .iter()
            .find(|e| e.kind == "INHERITS")
            .expect("inherits edge");
        assert_eq!(inherits.source_id, 3);
        assert_eq!(inherits.target_id, 2);
    }
}
