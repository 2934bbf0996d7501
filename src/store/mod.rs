use crate::config::Config;
use crate::extractor::{ImportInput, SymbolInput};
use crate::ingest::linker::{CallRefInput, EdgeInput};
use crate::model::{
    FileRecord, ImportRecord, Issue, IssueStatus, Repo, ReviewRunSummary, Severity, Symbol,
};
use crate::review::state::{self, MergedIssue};
use anyhow::{Context, Result, bail};
use blake3::Hasher;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod migrations;

#[derive(Debug)]
struct ConnectionCustomizer;

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        Ok(())
    }

    fn on_release(&self, _conn: Connection) {}
}

/// A caller recorded as a textual reference only, kept when call-graph
/// resolution was not possible or was invalidated by a file rewrite.
#[derive(Debug, Clone)]
pub struct CallRefRow {
    pub id: i64,
    pub file_id: i64,
    pub file_path: String,
    pub caller_symbol_id: Option<i64>,
    pub caller_name: Option<String>,
    pub callee_name: String,
    pub line: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDigest {
    pub rows: usize,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDigest {
    pub files: TableDigest,
    pub symbols: TableDigest,
    pub edges: TableDigest,
}

pub struct Store {
    db_path: PathBuf,
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool<SqliteConnectionManager>,
}

impl Store {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db directory {}", parent.display()))?;
        }

        let config = Config::get();

        // Open write connection first and run migrations
        let write_conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db at {}", db_path.display()))?;
        write_conn.busy_timeout(Duration::from_secs(30))?;
        write_conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        migrations::migrate(&write_conn)?;

        let write_conn = Arc::new(Mutex::new(write_conn));

        let manager = SqliteConnectionManager::file(db_path);
        let read_pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.pool_min_idle))
            .connection_timeout(Duration::from_secs(30))
            .connection_customizer(Box::new(ConnectionCustomizer))
            .build(manager)
            .with_context(|| "create connection pool")?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            write_conn,
            read_pool,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn read_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.read_pool
            .get()
            .with_context(|| "get read connection from pool")
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.write_conn.lock().unwrap()
    }

    // ---- repos ----

    /// Passing no branch keeps whatever branch the repo was ingested with;
    /// a fresh row falls back to `main`.
    pub fn upsert_repo(&self, owner: &str, name: &str, default_branch: Option<&str>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO repos (owner, name, default_branch)
             VALUES (?1, ?2, COALESCE(?3, 'main'))
             ON CONFLICT(owner, name) DO UPDATE SET
                default_branch = COALESCE(?3, default_branch)",
            params![owner, name, default_branch],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM repos WHERE owner = ? AND name = ?",
            params![owner, name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn get_repo(&self, owner: &str, name: &str) -> Result<Option<Repo>> {
        let conn = self.read_conn()?;
        let repo = conn
            .query_row(
                "SELECT id, owner, name, default_branch, last_commit_sha
                 FROM repos WHERE owner = ? AND name = ?",
                params![owner, name],
                repo_from_row,
            )
            .optional()?;
        Ok(repo)
    }

    pub fn repo_by_id(&self, repo_id: i64) -> Result<Repo> {
        let conn = self.read_conn()?;
        conn.query_row(
            "SELECT id, owner, name, default_branch, last_commit_sha
             FROM repos WHERE id = ?",
            params![repo_id],
            repo_from_row,
        )
        .with_context(|| format!("repo {} not found", repo_id))
    }

    pub fn set_repo_commit(&self, repo_id: i64, commit_sha: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE repos SET last_commit_sha = ? WHERE id = ?",
            params![commit_sha, repo_id],
        )?;
        Ok(())
    }

    // ---- files ----

    pub fn list_files(&self, repo_id: i64) -> Result<Vec<FileRecord>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, repo_id, path, hash, language, line_count
             FROM files WHERE repo_id = ? ORDER BY path",
        )?;
        let rows = stmt.query_map(params![repo_id], file_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn file_by_path(&self, repo_id: i64, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.read_conn()?;
        let record = conn
            .query_row(
                "SELECT id, repo_id, path, hash, language, line_count
                 FROM files WHERE repo_id = ? AND path = ?",
                params![repo_id, path],
                file_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn file_source(&self, file_id: i64) -> Result<Option<String>> {
        let conn = self.read_conn()?;
        let source = conn
            .query_row(
                "SELECT source FROM files WHERE id = ?",
                params![file_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(source)
    }

    /// Replace one file's index state in a single transaction. Incoming
    /// call edges from other files are demoted to textual references
    /// before the old rows go away, so knowledge is downgraded rather
    /// than lost when the target file is rewritten.
    pub fn replace_file(
        &self,
        repo_id: i64,
        path: &str,
        hash: &str,
        language: &str,
        source: &str,
        symbols: &[SymbolInput],
        imports: &[ImportInput],
    ) -> Result<(i64, Vec<Symbol>)> {
        let line_count = source.lines().count() as i64;
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if let Some(old_id) = file_id_in_tx(&tx, repo_id, path)? {
            demote_incoming_calls(&tx, old_id)?;
            tx.execute("DELETE FROM files WHERE id = ?", params![old_id])?;
        }

        tx.execute(
            "INSERT INTO files (repo_id, path, hash, language, line_count, source)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![repo_id, path, hash, language, line_count, source],
        )?;
        let file_id = tx.last_insert_rowid();

        let mut inserted = Vec::with_capacity(symbols.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO symbols
                 (file_id, kind, name, qualname, start_line, end_line,
                  signature, docstring, complexity, class_owner, base_classes, stable_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for symbol in symbols {
                let stable_id = crate::ingest::stable_symbol_id(path, symbol);
                let base_classes = serde_json::to_string(&symbol.base_classes)?;
                stmt.execute(params![
                    file_id,
                    &symbol.kind,
                    &symbol.name,
                    &symbol.qualname,
                    symbol.start_line,
                    symbol.end_line,
                    symbol.signature.as_deref(),
                    symbol.docstring.as_deref(),
                    symbol.complexity,
                    symbol.class_owner.as_deref(),
                    base_classes,
                    &stable_id,
                ])?;
                let id = tx.last_insert_rowid();
                inserted.push(Symbol {
                    id,
                    file_path: path.to_string(),
                    kind: symbol.kind.clone(),
                    name: symbol.name.clone(),
                    qualname: symbol.qualname.clone(),
                    start_line: symbol.start_line,
                    end_line: symbol.end_line,
                    signature: symbol.signature.clone(),
                    docstring: symbol.docstring.clone(),
                    complexity: symbol.complexity,
                    class_owner: symbol.class_owner.clone(),
                    base_classes: symbol.base_classes.clone(),
                    stable_id: Some(stable_id),
                });
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO imports (file_id, module, imported_name, alias, line)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for import in imports {
                stmt.execute(params![
                    file_id,
                    &import.module,
                    import.imported_name.as_deref(),
                    import.alias.as_deref(),
                    import.line,
                ])?;
            }
        }

        tx.commit()?;
        Ok((file_id, inserted))
    }

    /// Remove a file from the index. Incoming call edges are demoted to
    /// textual references first.
    pub fn delete_file(&self, repo_id: i64, path: &str) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let Some(file_id) = file_id_in_tx(&tx, repo_id, path)? else {
            return Ok(false);
        };
        demote_incoming_calls(&tx, file_id)?;
        tx.execute("DELETE FROM files WHERE id = ?", params![file_id])?;
        tx.commit()?;
        Ok(true)
    }

    // ---- symbols ----

    pub fn symbols_for_file(&self, file_id: i64) -> Result<Vec<Symbol>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SYMBOL_SELECT} WHERE s.file_id = ? ORDER BY s.start_line"
        ))?;
        collect_symbols(stmt.query_map(params![file_id], symbol_from_row)?)
    }

    pub fn symbol_by_id(&self, symbol_id: i64) -> Result<Option<Symbol>> {
        let conn = self.read_conn()?;
        let symbol = conn
            .query_row(
                &format!("{SYMBOL_SELECT} WHERE s.id = ?"),
                params![symbol_id],
                symbol_from_row,
            )
            .optional()?;
        Ok(symbol)
    }

    pub fn find_symbols_by_name(&self, repo_id: i64, name: &str) -> Result<Vec<Symbol>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SYMBOL_SELECT} WHERE f.repo_id = ? AND s.name = ?
             ORDER BY f.path, s.start_line"
        ))?;
        collect_symbols(stmt.query_map(params![repo_id, name], symbol_from_row)?)
    }

    pub fn find_class(&self, repo_id: i64, name: &str) -> Result<Option<Symbol>> {
        let conn = self.read_conn()?;
        let symbol = conn
            .query_row(
                &format!(
                    "{SYMBOL_SELECT}
                     WHERE f.repo_id = ? AND s.kind = 'class'
                       AND (s.name = ? OR s.qualname = ?)
                     ORDER BY f.path, s.start_line LIMIT 1"
                ),
                params![repo_id, name, name],
                symbol_from_row,
            )
            .optional()?;
        Ok(symbol)
    }

    /// Classes that directly inherit from the given class symbol.
    pub fn inherits_children(&self, class_id: i64) -> Result<Vec<Symbol>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SYMBOL_SELECT}
             JOIN edges e ON e.source_id = s.id
             WHERE e.kind = 'INHERITS' AND e.target_id = ?
             ORDER BY f.path, s.start_line"
        ))?;
        collect_symbols(stmt.query_map(params![class_id], symbol_from_row)?)
    }

    pub fn methods_of_class(&self, repo_id: i64, class_qualname: &str) -> Result<Vec<Symbol>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SYMBOL_SELECT}
             WHERE f.repo_id = ? AND s.class_owner = ?
             ORDER BY s.start_line"
        ))?;
        collect_symbols(stmt.query_map(params![repo_id, class_qualname], symbol_from_row)?)
    }

    /// Symbols whose line span intersects [start_line, end_line].
    pub fn symbols_overlapping(
        &self,
        repo_id: i64,
        path: &str,
        start_line: i64,
        end_line: i64,
    ) -> Result<Vec<Symbol>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SYMBOL_SELECT}
             WHERE f.repo_id = ? AND f.path = ?
               AND s.start_line <= ? AND s.end_line >= ?
             ORDER BY s.start_line"
        ))?;
        collect_symbols(stmt.query_map(params![repo_id, path, end_line, start_line], symbol_from_row)?)
    }

    /// Smallest symbol span containing the given line, if any.
    pub fn enclosing_symbol(&self, file_id: i64, line: i64) -> Result<Option<Symbol>> {
        let conn = self.read_conn()?;
        let symbol = conn
            .query_row(
                &format!(
                    "{SYMBOL_SELECT}
                     WHERE s.file_id = ? AND s.start_line <= ? AND s.end_line >= ?
                     ORDER BY (s.end_line - s.start_line) ASC LIMIT 1"
                ),
                params![file_id, line, line],
                symbol_from_row,
            )
            .optional()?;
        Ok(symbol)
    }

    /// Name -> defining symbols across the whole repo, used for call
    /// resolution. Only callable kinds are included.
    pub fn callable_symbols(&self, repo_id: i64) -> Result<Vec<Symbol>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{SYMBOL_SELECT}
             WHERE f.repo_id = ? AND s.kind IN ('function', 'method', 'class')
             ORDER BY f.path, s.start_line"
        ))?;
        collect_symbols(stmt.query_map(params![repo_id], symbol_from_row)?)
    }

    pub fn search_symbols(&self, repo_id: i64, query: &str, limit: usize) -> Result<Vec<Symbol>> {
        let conn = self.read_conn()?;
        let pattern = format!("%{}%", query);
        let mut stmt = conn.prepare(&format!(
            "{SYMBOL_SELECT}
             WHERE f.repo_id = ? AND (s.name LIKE ? OR s.qualname LIKE ?)
             ORDER BY
               CASE WHEN s.name = ? THEN 0
                    WHEN s.name LIKE ? THEN 1
                    ELSE 2 END,
               LENGTH(s.name), f.path, s.start_line
             LIMIT ?",
        ))?;
        let prefix = format!("{}%", query);
        collect_symbols(stmt.query_map(
            params![repo_id, pattern, pattern, query, prefix, limit as i64],
            symbol_from_row,
        )?)
    }

    // ---- edges and call refs ----

    pub fn insert_edges(&self, edges: &[EdgeInput]) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO edges (kind, source_id, target_id, file_id, line)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for edge in edges {
                stmt.execute(params![
                    &edge.kind,
                    edge.source_id,
                    edge.target_id,
                    edge.file_id,
                    edge.line,
                ])?;
            }
        }
        tx.commit()?;
        Ok(edges.len())
    }

    pub fn insert_call_refs(&self, refs: &[CallRefInput]) -> Result<usize> {
        if refs.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO call_refs (file_id, caller_symbol_id, caller_name, callee_name, line)
                 VALUES (?, ?, ?, ?, ?)",
            )?;
            for call_ref in refs {
                stmt.execute(params![
                    call_ref.file_id,
                    call_ref.caller_symbol_id,
                    call_ref.caller_name.as_deref(),
                    &call_ref.callee_name,
                    call_ref.line,
                ])?;
            }
        }
        tx.commit()?;
        Ok(refs.len())
    }

    pub fn delete_call_ref(&self, id: i64) -> Result<()> {
        self.conn()
            .execute("DELETE FROM call_refs WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Callers recorded as resolved call-graph edges targeting any of the
    /// given symbols: (caller symbol, call line).
    pub fn callers_of(&self, target_ids: &[i64]) -> Result<Vec<(Symbol, i64)>> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.read_conn()?;
        let placeholders = vec!["?"; target_ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT s.id, f.path, s.kind, s.name, s.qualname, s.start_line,
                    s.end_line, s.signature, s.docstring, s.complexity, s.class_owner,
                    s.base_classes, s.stable_id, e.line
             FROM edges e
             JOIN symbols s ON s.id = e.source_id
             JOIN files f ON f.id = s.file_id
             WHERE e.kind = 'CALLS' AND e.target_id IN ({placeholders})
             ORDER BY f.path, e.line"
        ))?;
        let rows = stmt.query_map(params_from_iter(target_ids.iter()), |row| {
            let symbol = symbol_from_row(row)?;
            let line: i64 = row.get(13)?;
            Ok((symbol, line))
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn call_refs_for_callee(&self, repo_id: i64, callee_name: &str) -> Result<Vec<CallRefRow>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.file_id, f.path, c.caller_symbol_id, c.caller_name, c.callee_name, c.line
             FROM call_refs c
             JOIN files f ON f.id = c.file_id
             WHERE f.repo_id = ? AND c.callee_name = ?
             ORDER BY f.path, c.line",
        )?;
        let rows = stmt.query_map(params![repo_id, callee_name], |row| {
            Ok(CallRefRow {
                id: row.get(0)?,
                file_id: row.get(1)?,
                file_path: row.get(2)?,
                caller_symbol_id: row.get(3)?,
                caller_name: row.get(4)?,
                callee_name: row.get(5)?,
                line: row.get(6)?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn imports_for_file(&self, file_id: i64) -> Result<Vec<ImportRecord>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT module, imported_name, alias, line
             FROM imports WHERE file_id = ? ORDER BY line",
        )?;
        let rows = stmt.query_map(params![file_id], |row| {
            Ok(ImportRecord {
                module: row.get(0)?,
                imported_name: row.get(1)?,
                alias: row.get(2)?,
                line: row.get(3)?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // ---- counts and digests ----

    pub fn count_rows(&self, repo_id: i64, table: &str) -> Result<i64> {
        let sql = match table {
            "files" => "SELECT COUNT(*) FROM files WHERE repo_id = ?",
            "symbols" => {
                "SELECT COUNT(*) FROM symbols s JOIN files f ON f.id = s.file_id WHERE f.repo_id = ?"
            }
            "edges" => {
                "SELECT COUNT(*) FROM edges e JOIN files f ON f.id = e.file_id WHERE f.repo_id = ?"
            }
            "call_refs" => {
                "SELECT COUNT(*) FROM call_refs c JOIN files f ON f.id = c.file_id WHERE f.repo_id = ?"
            }
            _ => bail!("unknown table {}", table),
        };
        let conn = self.read_conn()?;
        let count: i64 = conn.query_row(sql, params![repo_id], |row| row.get(0))?;
        Ok(count)
    }

    pub fn languages(&self, repo_id: i64) -> Result<Vec<String>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT language FROM files WHERE repo_id = ? ORDER BY language",
        )?;
        let rows = stmt.query_map(params![repo_id], |row| row.get(0))?;
        let mut languages = Vec::new();
        for row in rows {
            languages.push(row?);
        }
        Ok(languages)
    }

    /// Content digest over the graph tables. Two ingests that produce the
    /// same logical graph produce the same digest regardless of row ids.
    pub fn digest(&self) -> Result<StoreDigest> {
        let conn = self.read_conn()?;

        let files = digest_rows(
            &conn,
            "SELECT path, hash, language, line_count FROM files ORDER BY path",
            |row| {
                Ok(format!(
                    "{}\0{}\0{}\0{}",
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        let symbols = digest_rows(
            &conn,
            "SELECT f.path, s.kind, s.qualname, s.start_line, s.end_line, s.complexity
             FROM symbols s JOIN files f ON f.id = s.file_id
             ORDER BY f.path, s.start_line, s.qualname",
            |row| {
                Ok(format!(
                    "{}\0{}\0{}\0{}\0{}\0{}",
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )?;

        let edges = digest_rows(
            &conn,
            "SELECT e.kind, src.qualname, dst.qualname, e.line
             FROM edges e
             JOIN symbols src ON src.id = e.source_id
             JOIN symbols dst ON dst.id = e.target_id
             ORDER BY e.kind, src.qualname, dst.qualname, e.line",
            |row| {
                Ok(format!(
                    "{}\0{}\0{}\0{}",
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        Ok(StoreDigest {
            files,
            symbols,
            edges,
        })
    }

    // ---- review runs and issues ----

    /// Record a review run for a pull request and reconcile its merged
    /// findings against the previous run. Runs in one transaction on the
    /// write connection: history for other pull requests is untouched,
    /// and a failure leaves the previous state intact.
    pub fn reconcile_review_run(
        &self,
        repo_id: i64,
        pr_number: i64,
        commit_sha: Option<&str>,
        merged: &[MergedIssue],
    ) -> Result<crate::model::ReconciledRun> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let run_number: i64 = tx.query_row(
            "SELECT COALESCE(MAX(run_number), 0) + 1
             FROM review_runs WHERE repo_id = ? AND pr_number = ?",
            params![repo_id, pr_number],
            |row| row.get(0),
        )?;
        let created = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        tx.execute(
            "INSERT INTO review_runs (repo_id, pr_number, run_number, created, commit_sha)
             VALUES (?, ?, ?, ?, ?)",
            params![repo_id, pr_number, run_number, created, commit_sha],
        )?;
        let run_id = tx.last_insert_rowid();

        let previous = {
            let mut stmt = tx.prepare(&format!(
                "{ISSUE_SELECT}
                 WHERE repo_id = ? AND pr_number = ? AND status IN ('new', 'open')
                 ORDER BY fingerprint"
            ))?;
            let rows = stmt.query_map(params![repo_id, pr_number], issue_from_row)?;
            let mut issues = Vec::new();
            for row in rows {
                issues.push(row?);
            }
            issues
        };

        let outcome = state::partition(repo_id, pr_number, &previous, merged);
        if outcome.stale_rejected > 0 {
            eprintln!(
                "crag: Warning: skipped {} history rows outside pr {} scope",
                outcome.stale_rejected, pr_number
            );
        }

        for issue in &outcome.fixed {
            tx.execute(
                "UPDATE issues SET status = 'fixed', last_seen_run = ?
                 WHERE repo_id = ? AND pr_number = ? AND fingerprint = ?",
                params![run_id, repo_id, pr_number, issue.fingerprint],
            )?;
        }

        for (issue, merged_issue) in &outcome.still_open {
            tx.execute(
                "UPDATE issues SET
                    status = 'open',
                    title = ?, description = ?, file_path = ?,
                    line_start = ?, line_end = ?, severity = ?,
                    categories = ?, agents = ?, confidence = ?, flagged = ?,
                    suggestion = ?, last_seen_run = ?
                 WHERE repo_id = ? AND pr_number = ? AND fingerprint = ?",
                params![
                    merged_issue.title,
                    merged_issue.description,
                    merged_issue.file_path,
                    merged_issue.line_start,
                    merged_issue.line_end,
                    severity_str(merged_issue.severity),
                    serde_json::to_string(&merged_issue.categories)?,
                    serde_json::to_string(&merged_issue.agents)?,
                    merged_issue.confidence,
                    merged_issue.flagged as i64,
                    merged_issue.suggestion.as_deref(),
                    run_id,
                    repo_id,
                    pr_number,
                    issue.fingerprint,
                ],
            )?;
        }

        for merged_issue in &outcome.new {
            tx.execute(
                "INSERT INTO issues
                 (repo_id, pr_number, fingerprint, title, description, file_path,
                  line_start, line_end, severity, categories, agents, confidence,
                  flagged, suggestion, status, first_seen_run, last_seen_run)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'new', ?, ?)
                 ON CONFLICT(repo_id, pr_number, fingerprint) DO UPDATE SET
                    status = 'new',
                    title = excluded.title,
                    description = excluded.description,
                    file_path = excluded.file_path,
                    line_start = excluded.line_start,
                    line_end = excluded.line_end,
                    severity = excluded.severity,
                    categories = excluded.categories,
                    agents = excluded.agents,
                    confidence = excluded.confidence,
                    flagged = excluded.flagged,
                    suggestion = excluded.suggestion,
                    last_seen_run = excluded.last_seen_run",
                params![
                    repo_id,
                    pr_number,
                    merged_issue.fingerprint,
                    merged_issue.title,
                    merged_issue.description,
                    merged_issue.file_path,
                    merged_issue.line_start,
                    merged_issue.line_end,
                    severity_str(merged_issue.severity),
                    serde_json::to_string(&merged_issue.categories)?,
                    serde_json::to_string(&merged_issue.agents)?,
                    merged_issue.confidence,
                    merged_issue.flagged as i64,
                    merged_issue.suggestion.as_deref(),
                    run_id,
                    run_id,
                ],
            )?;
        }

        let (new_issues, open_issues, fixed_issues) = {
            let mut stmt = tx.prepare(&format!(
                "{ISSUE_SELECT}
                 WHERE repo_id = ? AND pr_number = ? AND last_seen_run = ?
                 ORDER BY file_path, line_start"
            ))?;
            let rows = stmt.query_map(params![repo_id, pr_number, run_id], issue_from_row)?;
            let mut new_issues = Vec::new();
            let mut open_issues = Vec::new();
            let mut fixed_issues = Vec::new();
            for row in rows {
                let issue = row?;
                match issue.status {
                    IssueStatus::New => new_issues.push(issue),
                    IssueStatus::Open => open_issues.push(issue),
                    IssueStatus::Fixed => fixed_issues.push(issue),
                }
            }
            (new_issues, open_issues, fixed_issues)
        };

        tx.commit()?;

        Ok(crate::model::ReconciledRun {
            run_id,
            run_number,
            pr_number,
            commit_sha: commit_sha.map(str::to_string),
            new_issues,
            open_issues,
            fixed_issues,
        })
    }

    pub fn issues_for_pr(&self, repo_id: i64, pr_number: i64) -> Result<Vec<Issue>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "{ISSUE_SELECT}
             WHERE repo_id = ? AND pr_number = ?
             ORDER BY file_path, line_start"
        ))?;
        let rows = stmt.query_map(params![repo_id, pr_number], issue_from_row)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    pub fn review_history(
        &self,
        repo_id: i64,
        pr_number: i64,
        limit: usize,
    ) -> Result<Vec<ReviewRunSummary>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.run_number, r.created, r.commit_sha,
                    (SELECT COUNT(*) FROM issues i
                     WHERE i.last_seen_run = r.id AND i.status = 'new'),
                    (SELECT COUNT(*) FROM issues i
                     WHERE i.last_seen_run = r.id AND i.status = 'open'),
                    (SELECT COUNT(*) FROM issues i
                     WHERE i.last_seen_run = r.id AND i.status = 'fixed')
             FROM review_runs r
             WHERE r.repo_id = ? AND r.pr_number = ?
             ORDER BY r.run_number DESC
             LIMIT ?",
        )?;
        let rows = stmt.query_map(params![repo_id, pr_number, limit as i64], |row| {
            Ok(ReviewRunSummary {
                run_id: row.get(0)?,
                run_number: row.get(1)?,
                created: row.get(2)?,
                commit_sha: row.get(3)?,
                new_count: row.get(4)?,
                open_count: row.get(5)?,
                fixed_count: row.get(6)?,
            })
        })?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }
}

const SYMBOL_SELECT: &str = "SELECT s.id, f.path, s.kind, s.name, s.qualname, s.start_line,
        s.end_line, s.signature, s.docstring, s.complexity, s.class_owner,
        s.base_classes, s.stable_id
 FROM symbols s
 JOIN files f ON f.id = s.file_id";

const ISSUE_SELECT: &str = "SELECT id, repo_id, pr_number, fingerprint, title, description,
        file_path, line_start, line_end, severity, categories, agents,
        confidence, flagged, suggestion, status, first_seen_run, last_seen_run
 FROM issues";

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<Repo> {
    Ok(Repo {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        default_branch: row.get(3)?,
        last_commit_sha: row.get(4)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        path: row.get(2)?,
        hash: row.get(3)?,
        language: row.get(4)?,
        line_count: row.get(5)?,
    })
}

fn symbol_from_row(row: &Row<'_>) -> rusqlite::Result<Symbol> {
    let base_classes: String = row.get(11)?;
    Ok(Symbol {
        id: row.get(0)?,
        file_path: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        qualname: row.get(4)?,
        start_line: row.get(5)?,
        end_line: row.get(6)?,
        signature: row.get(7)?,
        docstring: row.get(8)?,
        complexity: row.get(9)?,
        class_owner: row.get(10)?,
        base_classes: serde_json::from_str(&base_classes).unwrap_or_default(),
        stable_id: row.get(12)?,
    })
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let severity: String = row.get(9)?;
    let categories: String = row.get(10)?;
    let agents: String = row.get(11)?;
    let status: String = row.get(15)?;
    Ok(Issue {
        id: row.get(0)?,
        repo_id: row.get(1)?,
        pr_number: row.get(2)?,
        fingerprint: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        file_path: row.get(6)?,
        line_start: row.get(7)?,
        line_end: row.get(8)?,
        severity: parse_severity(&severity),
        categories: serde_json::from_str(&categories).unwrap_or_default(),
        agents: serde_json::from_str(&agents).unwrap_or_default(),
        confidence: row.get(12)?,
        flagged: row.get::<_, i64>(13)? != 0,
        suggestion: row.get(14)?,
        status: IssueStatus::parse(&status).unwrap_or(IssueStatus::Open),
        first_seen_run: row.get(16)?,
        last_seen_run: row.get(17)?,
    })
}

pub fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Low => "low",
        Severity::Medium => "medium",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}

fn parse_severity(value: &str) -> Severity {
    match value {
        "info" => Severity::Info,
        "low" => Severity::Low,
        "high" => Severity::High,
        "critical" => Severity::Critical,
        _ => Severity::Medium,
    }
}

fn collect_symbols(
    rows: rusqlite::MappedRows<'_, impl FnMut(&Row<'_>) -> rusqlite::Result<Symbol>>,
) -> Result<Vec<Symbol>> {
    let mut symbols = Vec::new();
    for row in rows {
        symbols.push(row?);
    }
    Ok(symbols)
}

fn file_id_in_tx(tx: &Transaction<'_>, repo_id: i64, path: &str) -> Result<Option<i64>> {
    let id = tx
        .query_row(
            "SELECT id FROM files WHERE repo_id = ? AND path = ?",
            params![repo_id, path],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Rewrite incoming call edges from other files as textual references
/// before the target file's symbols are deleted.
fn demote_incoming_calls(tx: &Transaction<'_>, file_id: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO call_refs (file_id, caller_symbol_id, caller_name, callee_name, line)
         SELECT e.file_id, e.source_id, src.name, dst.name, e.line
         FROM edges e
         JOIN symbols src ON src.id = e.source_id
         JOIN symbols dst ON dst.id = e.target_id
         WHERE e.kind = 'CALLS' AND dst.file_id = ? AND e.file_id != ?",
        params![file_id, file_id],
    )?;
    Ok(())
}

fn digest_rows(
    conn: &Connection,
    sql: &str,
    to_line: impl Fn(&Row<'_>) -> rusqlite::Result<String>,
) -> Result<TableDigest> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| to_line(row))?;
    let mut hasher = Hasher::new();
    let mut count = 0usize;
    for row in rows {
        let line = row?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
        count += 1;
    }
    Ok(TableDigest {
        rows: count,
        hash: hasher.finalize().to_hex().to_string(),
    })
}
