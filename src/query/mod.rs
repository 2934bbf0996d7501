use crate::config::Config;
use crate::model::{
    CallerFact, CallersResult, ChangeImpactResult, ChangedRange, DiffContextResult,
    FileDiffContext, HierarchyEntry, HierarchyResult, ImpactLevel, MethodUsageGroup,
    MethodUsagesResult, RepoOverview, SearchHit, SearchResult, Symbol, SymbolCompact,
};
use crate::store::Store;
use crate::util;
use anyhow::Result;
use std::collections::{HashMap, HashSet, VecDeque};

const SNIPPET_MAX_BYTES: usize = 200;
const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Read-only analysis over the graph store. All operations answer from
/// the index; a name that is not indexed is a normal empty result, not
/// an error.
pub struct QueryEngine<'a> {
    store: &'a Store,
    repo_id: i64,
}

/// Per-call cache of file sources, so caller snippets for the same file
/// hit the store once.
struct SourceCache<'a> {
    store: &'a Store,
    by_path: HashMap<String, Option<String>>,
}

impl<'a> SourceCache<'a> {
    fn new(store: &'a Store) -> Self {
        Self {
            store,
            by_path: HashMap::new(),
        }
    }

    fn snippet(&mut self, repo_id: i64, path: &str, line: i64) -> Option<String> {
        if !self.by_path.contains_key(path) {
            let source = self
                .store
                .file_by_path(repo_id, path)
                .ok()
                .flatten()
                .and_then(|f| self.store.file_source(f.id).ok().flatten());
            self.by_path.insert(path.to_string(), source);
        }
        let source = self.by_path.get(path)?.as_deref()?;
        util::snippet(&util::slice_lines(source, line, line), SNIPPET_MAX_BYTES)
    }
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a Store, repo_id: i64) -> Self {
        Self { store, repo_id }
    }

    pub fn find_callers(&self, method_name: &str) -> Result<CallersResult> {
        let definitions = self.callable_definitions(method_name)?;
        let (callers, fallback_used) = self.callers_for(&definitions, method_name)?;
        Ok(CallersResult {
            method_name: method_name.to_string(),
            definitions: definitions.iter().map(SymbolCompact::from).collect(),
            total: callers.len(),
            callers,
            fallback_used,
        })
    }

    pub fn class_hierarchy(&self, class_name: &str) -> Result<HierarchyResult> {
        let Some(class) = self.store.find_class(self.repo_id, class_name)? else {
            return Ok(HierarchyResult {
                class_name: class_name.to_string(),
                found: false,
                file_path: None,
                line_number: None,
                class: None,
                ancestors: Vec::new(),
                descendants: Vec::new(),
                methods: Vec::new(),
            });
        };

        let max_depth = Config::get().hierarchy_max_depth;

        // ancestors: breadth-first over base-class names, nearest first
        let mut ancestors = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(class.name.clone());
        let mut frontier: VecDeque<(String, usize)> = class
            .base_classes
            .iter()
            .map(|b| (b.clone(), 1))
            .collect();
        while let Some((name, depth)) = frontier.pop_front() {
            if depth > max_depth || !visited.insert(name.clone()) {
                continue;
            }
            let symbol = self.store.find_class(self.repo_id, &name)?;
            if let Some(symbol) = &symbol {
                for base in &symbol.base_classes {
                    frontier.push_back((base.clone(), depth + 1));
                }
            }
            ancestors.push(HierarchyEntry {
                name,
                depth,
                symbol: symbol.as_ref().map(SymbolCompact::from),
            });
        }

        // descendants: breadth-first over INHERITS edges
        let mut descendants = Vec::new();
        let mut seen_ids: HashSet<i64> = HashSet::new();
        seen_ids.insert(class.id);
        let mut down: VecDeque<(i64, usize)> = VecDeque::new();
        down.push_back((class.id, 0));
        while let Some((id, depth)) = down.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for child in self.store.inherits_children(id)? {
                if !seen_ids.insert(child.id) {
                    continue;
                }
                down.push_back((child.id, depth + 1));
                descendants.push(HierarchyEntry {
                    name: child.name.clone(),
                    depth: depth + 1,
                    symbol: Some(SymbolCompact::from(&child)),
                });
            }
        }

        let methods = self
            .store
            .methods_of_class(self.repo_id, &class.qualname)?
            .iter()
            .map(SymbolCompact::from)
            .collect();

        Ok(HierarchyResult {
            class_name: class_name.to_string(),
            found: true,
            file_path: Some(class.file_path.clone()),
            line_number: Some(class.start_line),
            class: Some(SymbolCompact::from(&class)),
            ancestors,
            descendants,
            methods,
        })
    }

    pub fn method_usages(&self, method_name: &str) -> Result<MethodUsagesResult> {
        let definitions = self.callable_definitions(method_name)?;
        let mut cache = SourceCache::new(self.store);

        let mut groups = Vec::new();
        for definition in &definitions {
            let mut callers = Vec::new();
            for (caller, line) in self.store.callers_of(&[definition.id])? {
                let snippet = cache.snippet(self.repo_id, &caller.file_path, line);
                callers.push(CallerFact::ResolvedCall {
                    caller: SymbolCompact::from(&caller),
                    line,
                    snippet,
                });
            }
            groups.push(MethodUsageGroup {
                definition: SymbolCompact::from(definition),
                file: definition.file_path.clone(),
                callers,
            });
        }

        let mut text_references = Vec::new();
        for call_ref in self.store.call_refs_for_callee(self.repo_id, method_name)? {
            let snippet = cache.snippet(self.repo_id, &call_ref.file_path, call_ref.line);
            text_references.push(CallerFact::TextReference {
                file_path: call_ref.file_path,
                caller_name: call_ref.caller_name,
                line: call_ref.line,
                snippet,
            });
        }

        Ok(MethodUsagesResult {
            method_name: method_name.to_string(),
            groups,
            text_references,
        })
    }

    pub fn change_impact(&self, symbol_name: &str) -> Result<ChangeImpactResult> {
        let definitions = self.callable_definitions(symbol_name)?;
        let (callers, _) = self.callers_for(&definitions, symbol_name)?;

        let definition_paths: HashSet<&str> =
            definitions.iter().map(|d| d.file_path.as_str()).collect();
        let cross_file = callers.iter().any(|caller| {
            let path = match caller {
                CallerFact::ResolvedCall { caller, .. } => caller.file_path.as_str(),
                CallerFact::TextReference { file_path, .. } => file_path.as_str(),
            };
            !definition_paths.contains(path)
        });

        let config = Config::get();
        let caller_count = callers.len();
        let impact_level = if cross_file || caller_count >= config.impact_high_min {
            ImpactLevel::High
        } else if caller_count >= config.impact_medium_min {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        };

        Ok(ChangeImpactResult {
            symbol_name: symbol_name.to_string(),
            definitions: definitions.iter().map(SymbolCompact::from).collect(),
            callers,
            caller_count,
            cross_file,
            impact_level,
        })
    }

    pub fn diff_context(&self, changes: &[ChangedRange]) -> Result<DiffContextResult> {
        let mut by_file: HashMap<&str, Vec<&ChangedRange>> = HashMap::new();
        let mut order = Vec::new();
        for change in changes {
            let entry = by_file.entry(change.file_path.as_str()).or_default();
            if entry.is_empty() {
                order.push(change.file_path.as_str());
            }
            entry.push(change);
        }

        let mut cache = SourceCache::new(self.store);
        let mut files = Vec::new();
        let mut total_affected = 0usize;
        let mut total_callers = 0usize;

        for path in order {
            let record = self.store.file_by_path(self.repo_id, path)?;
            let Some(record) = record else {
                files.push(FileDiffContext {
                    file_path: path.to_string(),
                    indexed: false,
                    touched_symbols: Vec::new(),
                    callers: Vec::new(),
                    class_hierarchies: Vec::new(),
                    imports: Vec::new(),
                    source: None,
                });
                continue;
            };

            let mut touched: Vec<Symbol> = Vec::new();
            let mut touched_ids = HashSet::new();
            for range in &by_file[path] {
                // an open-ended range covers the rest of the file
                let end = if range.end_line < range.start_line {
                    i64::MAX
                } else {
                    range.end_line
                };
                for symbol in
                    self.store
                        .symbols_overlapping(self.repo_id, path, range.start_line, end)?
                {
                    if symbol.kind != "module" && touched_ids.insert(symbol.id) {
                        touched.push(symbol);
                    }
                }
            }
            touched.sort_by_key(|s| s.start_line);

            let mut callers = Vec::new();
            let mut seen_names = HashSet::new();
            for symbol in &touched {
                for (caller, line) in self.store.callers_of(&[symbol.id])? {
                    let snippet = cache.snippet(self.repo_id, &caller.file_path, line);
                    callers.push(CallerFact::ResolvedCall {
                        caller: SymbolCompact::from(&caller),
                        line,
                        snippet,
                    });
                }
                if seen_names.insert(symbol.name.clone()) {
                    for call_ref in
                        self.store.call_refs_for_callee(self.repo_id, &symbol.name)?
                    {
                        let snippet =
                            cache.snippet(self.repo_id, &call_ref.file_path, call_ref.line);
                        callers.push(CallerFact::TextReference {
                            file_path: call_ref.file_path,
                            caller_name: call_ref.caller_name,
                            line: call_ref.line,
                            snippet,
                        });
                    }
                }
            }

            let mut class_names = Vec::new();
            let mut seen_classes = HashSet::new();
            for symbol in &touched {
                let class_name = if symbol.kind == "class" {
                    Some(symbol.name.clone())
                } else {
                    symbol
                        .class_owner
                        .as_deref()
                        .and_then(|owner| owner.rsplit(['.', ':']).next())
                        .map(str::to_string)
                };
                if let Some(name) = class_name {
                    if seen_classes.insert(name.clone()) {
                        class_names.push(name);
                    }
                }
            }
            let mut class_hierarchies = Vec::new();
            for name in class_names {
                let hierarchy = self.class_hierarchy(&name)?;
                if hierarchy.found {
                    class_hierarchies.push(hierarchy);
                }
            }

            total_affected += touched.len();
            total_callers += callers.len();
            files.push(FileDiffContext {
                file_path: path.to_string(),
                indexed: true,
                touched_symbols: touched.iter().map(SymbolCompact::from).collect(),
                callers,
                class_hierarchies,
                imports: self.store.imports_for_file(record.id)?,
                source: self.store.file_source(record.id)?,
            });
        }

        Ok(DiffContextResult {
            total_files: files.len(),
            files,
            total_affected,
            total_callers,
        })
    }

    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<SearchResult> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).max(1);
        let mut hits = Vec::new();

        // one extra row so an exactly-full symbol tier is distinguishable
        // from an overflowing one
        for symbol in self.store.search_symbols(self.repo_id, query, limit + 1)? {
            if symbol.kind == "module" {
                continue;
            }
            let score = if symbol.name == query {
                1.0
            } else if symbol.name.starts_with(query) {
                0.8
            } else {
                0.6
            };
            hits.push(SearchHit {
                hit_type: symbol.kind.clone(),
                path: symbol.file_path.clone(),
                line: symbol.start_line,
                symbol: Some(SymbolCompact::from(&symbol)),
                line_text: None,
                enclosing_symbol: None,
                score,
            });
        }

        let mut truncated = false;
        if hits.len() > limit {
            hits.truncate(limit);
            truncated = true;
        }

        // content-line fallback tier; also detects a dropped line hit when
        // the symbol tier already filled the limit
        if !truncated {
            let needle = query.to_lowercase();
            'files: for file in self.store.list_files(self.repo_id)? {
                let Some(source) = self.store.file_source(file.id)? else {
                    continue;
                };
                for (idx, text) in source.lines().enumerate() {
                    if !text.to_lowercase().contains(&needle) {
                        continue;
                    }
                    if hits.len() >= limit {
                        truncated = true;
                        break 'files;
                    }
                    let line = idx as i64 + 1;
                    let enclosing = self
                        .store
                        .enclosing_symbol(file.id, line)?
                        .filter(|s| s.kind != "module")
                        .map(|s| s.qualname);
                    hits.push(SearchHit {
                        hit_type: "line".to_string(),
                        path: file.path.clone(),
                        line,
                        symbol: None,
                        line_text: util::snippet(text, SNIPPET_MAX_BYTES),
                        enclosing_symbol: enclosing,
                        score: 0.3,
                    });
                }
            }
        }

        Ok(SearchResult {
            query: query.to_string(),
            hits,
            truncated,
        })
    }

    pub fn repo_overview(&self) -> Result<RepoOverview> {
        Ok(RepoOverview {
            repo: self.store.repo_by_id(self.repo_id)?,
            files: self.store.count_rows(self.repo_id, "files")?,
            symbols: self.store.count_rows(self.repo_id, "symbols")?,
            edges: self.store.count_rows(self.repo_id, "edges")?,
            call_refs: self.store.count_rows(self.repo_id, "call_refs")?,
            languages: self.store.languages(self.repo_id)?,
        })
    }

    fn callable_definitions(&self, name: &str) -> Result<Vec<Symbol>> {
        Ok(self
            .store
            .find_symbols_by_name(self.repo_id, name)?
            .into_iter()
            .filter(|s| matches!(s.kind.as_str(), "function" | "method" | "class"))
            .collect())
    }

    /// Both caller tiers for a set of definitions. The second value is
    /// the fallback flag: no call-graph evidence, only text references.
    fn callers_for(
        &self,
        definitions: &[Symbol],
        name: &str,
    ) -> Result<(Vec<CallerFact>, bool)> {
        let mut cache = SourceCache::new(self.store);
        let ids: Vec<i64> = definitions.iter().map(|d| d.id).collect();

        let mut callers = Vec::new();
        for (caller, line) in self.store.callers_of(&ids)? {
            let snippet = cache.snippet(self.repo_id, &caller.file_path, line);
            callers.push(CallerFact::ResolvedCall {
                caller: SymbolCompact::from(&caller),
                line,
                snippet,
            });
        }
        let resolved = callers.len();

        for call_ref in self.store.call_refs_for_callee(self.repo_id, name)? {
            let snippet = cache.snippet(self.repo_id, &call_ref.file_path, call_ref.line);
            callers.push(CallerFact::TextReference {
                file_path: call_ref.file_path,
                caller_name: call_ref.caller_name,
                line: call_ref.line,
                snippet,
            });
        }

        let fallback_used = resolved == 0 && callers.len() > resolved;
        Ok((callers, fallback_used))
    }
}
