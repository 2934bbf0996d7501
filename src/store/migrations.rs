use anyhow::Result;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 3;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS repos (
            id INTEGER PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            default_branch TEXT NOT NULL DEFAULT 'main',
            last_commit_sha TEXT,
            UNIQUE(owner, name)
        );

        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            repo_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            hash TEXT NOT NULL,
            language TEXT NOT NULL,
            line_count INTEGER NOT NULL,
            source TEXT NOT NULL DEFAULT '',
            UNIQUE(repo_id, path),
            FOREIGN KEY(repo_id) REFERENCES repos(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS symbols (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            qualname TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            signature TEXT,
            docstring TEXT,
            complexity INTEGER NOT NULL DEFAULT 1,
            class_owner TEXT,
            base_classes TEXT NOT NULL DEFAULT '[]',
            stable_id TEXT,
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
        CREATE INDEX IF NOT EXISTS idx_symbols_qualname ON symbols(qualname);
        CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_id);
        CREATE INDEX IF NOT EXISTS idx_symbols_kind ON symbols(kind);

        CREATE TABLE IF NOT EXISTS imports (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL,
            module TEXT NOT NULL,
            imported_name TEXT,
            alias TEXT,
            line INTEGER NOT NULL,
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_imports_file ON imports(file_id);
        CREATE INDEX IF NOT EXISTS idx_imports_module ON imports(module);

        CREATE TABLE IF NOT EXISTS edges (
            id INTEGER PRIMARY KEY,
            kind TEXT NOT NULL,
            source_id INTEGER NOT NULL,
            target_id INTEGER NOT NULL,
            file_id INTEGER NOT NULL,
            line INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(source_id) REFERENCES symbols(id) ON DELETE CASCADE,
            FOREIGN KEY(target_id) REFERENCES symbols(id) ON DELETE CASCADE,
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
        CREATE INDEX IF NOT EXISTS idx_edges_file ON edges(file_id);
        CREATE INDEX IF NOT EXISTS idx_edges_kind ON edges(kind);

        CREATE TABLE IF NOT EXISTS call_refs (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL,
            caller_symbol_id INTEGER,
            caller_name TEXT,
            callee_name TEXT NOT NULL,
            line INTEGER NOT NULL,
            FOREIGN KEY(file_id) REFERENCES files(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_call_refs_callee ON call_refs(callee_name);
        CREATE INDEX IF NOT EXISTS idx_call_refs_file ON call_refs(file_id);

        CREATE TABLE IF NOT EXISTS review_runs (
            id INTEGER PRIMARY KEY,
            repo_id INTEGER NOT NULL,
            pr_number INTEGER NOT NULL,
            run_number INTEGER NOT NULL,
            created INTEGER NOT NULL,
            commit_sha TEXT,
            UNIQUE(repo_id, pr_number, run_number),
            FOREIGN KEY(repo_id) REFERENCES repos(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_review_runs_pr ON review_runs(repo_id, pr_number);

        CREATE TABLE IF NOT EXISTS issues (
            id INTEGER PRIMARY KEY,
            repo_id INTEGER NOT NULL,
            pr_number INTEGER NOT NULL,
            fingerprint TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            file_path TEXT NOT NULL,
            line_start INTEGER NOT NULL,
            line_end INTEGER,
            severity TEXT NOT NULL,
            categories TEXT NOT NULL DEFAULT '[]',
            agents TEXT NOT NULL DEFAULT '[]',
            confidence REAL NOT NULL DEFAULT 1.0,
            flagged INTEGER NOT NULL DEFAULT 0,
            suggestion TEXT,
            status TEXT NOT NULL,
            first_seen_run INTEGER NOT NULL,
            last_seen_run INTEGER NOT NULL,
            UNIQUE(repo_id, pr_number, fingerprint),
            FOREIGN KEY(repo_id) REFERENCES repos(id) ON DELETE CASCADE,
            FOREIGN KEY(first_seen_run) REFERENCES review_runs(id),
            FOREIGN KEY(last_seen_run) REFERENCES review_runs(id)
        );

        CREATE INDEX IF NOT EXISTS idx_issues_pr ON issues(repo_id, pr_number);
        CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);

        COMMIT;
        ",
    )?;

    let current: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .map(|v| v.parse::<i64>().ok())
        .unwrap_or(None);

    if current != Some(SCHEMA_VERSION) {
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SCHEMA_VERSION.to_string()],
        )?;
    }

    Ok(())
}
