use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

pub const DB_FILE: &str = "fetchexpense.db";

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY,
    provider_message_id TEXT NOT NULL UNIQUE,
    thread_id TEXT,
    internal_date_ms INTEGER NOT NULL,
    date_iso TEXT NOT NULL,
    date TEXT NOT NULL,
    from_header TEXT,
    from_email TEXT,
    from_domain TEXT,
    subject TEXT,
    snippet TEXT,
    label TEXT NOT NULL,
    score INTEGER NOT NULL,
    reasons_json TEXT NOT NULL DEFAULT '[]',
    links_json TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'NEW',
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date);

CREATE TABLE IF NOT EXISTS evidence_items (
    id INTEGER PRIMARY KEY,
    message_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    filename TEXT NOT NULL,
    mime_type TEXT,
    size_bytes INTEGER,
    attachment_id TEXT,
    local_path TEXT,
    source_url TEXT,
    sha256 TEXT,
    capture_kind TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (message_id) REFERENCES messages(id)
);

CREATE TABLE IF NOT EXISTS evidence_links (
    id INTEGER PRIMARY KEY,
    message_id INTEGER NOT NULL,
    url_original TEXT NOT NULL,
    anchor_text TEXT,
    context_snippet TEXT,
    status TEXT NOT NULL,
    url_resolved TEXT,
    content_type TEXT,
    filename TEXT,
    file_path TEXT,
    file_sha256 TEXT,
    http_status INTEGER,
    failure_reason TEXT,
    updated_at TEXT DEFAULT (datetime('now')),
    UNIQUE (message_id, url_original),
    FOREIGN KEY (message_id) REFERENCES messages(id)
);

CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY,
    message_id INTEGER NOT NULL,
    label TEXT NOT NULL,
    vendor_override TEXT,
    note TEXT,
    decided_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%f', 'now')),
    FOREIGN KEY (message_id) REFERENCES messages(id)
);

CREATE TABLE IF NOT EXISTS exports (
    id INTEGER PRIMARY KEY,
    evidence_id INTEGER NOT NULL UNIQUE,
    destination TEXT NOT NULL,
    export_path TEXT NOT NULL,
    sha256 TEXT,
    exported_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (evidence_id) REFERENCES evidence_items(id)
);

CREATE TABLE IF NOT EXISTS scan_runs (
    id INTEGER PRIMARY KEY,
    mode TEXT NOT NULL,
    range_start TEXT NOT NULL,
    range_end TEXT NOT NULL,
    status TEXT NOT NULL,
    total_found INTEGER DEFAULT 0,
    total_inserted INTEGER DEFAULT 0,
    is_truncated INTEGER DEFAULT 0,
    truncation_reason TEXT,
    started_at TEXT DEFAULT (datetime('now')),
    finished_at TEXT
);

CREATE TABLE IF NOT EXISTS scan_run_buckets (
    id INTEGER PRIMARY KEY,
    run_id INTEGER NOT NULL,
    bucket_name TEXT NOT NULL,
    query TEXT NOT NULL,
    found_count INTEGER NOT NULL,
    inserted_count INTEGER NOT NULL,
    is_truncated INTEGER NOT NULL,
    FOREIGN KEY (run_id) REFERENCES scan_runs(id)
);

CREATE TABLE IF NOT EXISTS bank_accounts (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    currency TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS bank_transactions (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    txn_date TEXT NOT NULL,
    amount REAL NOT NULL,
    currency TEXT,
    description TEXT NOT NULL,
    merchant_hint TEXT,
    raw_row_json TEXT,
    row_hash TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (account_id) REFERENCES bank_accounts(id)
);

CREATE TABLE IF NOT EXISTS txn_matches (
    id INTEGER PRIMARY KEY,
    txn_id INTEGER NOT NULL UNIQUE,
    message_id INTEGER NOT NULL UNIQUE,
    match_score INTEGER NOT NULL,
    match_reason TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (txn_id) REFERENCES bank_transactions(id),
    FOREIGN KEY (message_id) REFERENCES messages(id)
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Open the database inside `data_dir`, creating the directory and schema
/// if needed.
pub fn open_in(data_dir: &Path) -> Result<Connection> {
    std::fs::create_dir_all(data_dir)?;
    let conn = get_connection(&data_dir.join(DB_FILE))?;
    init_db(&conn)?;
    Ok(conn)
}

pub fn message_exists(conn: &Connection, provider_message_id: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached("SELECT 1 FROM messages WHERE provider_message_id = ?1")?;
    Ok(stmt.exists([provider_message_id])?)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        for expected in &[
            "messages",
            "evidence_items",
            "evidence_links",
            "decisions",
            "exports",
            "scan_runs",
            "scan_run_buckets",
            "bank_accounts",
            "bank_transactions",
            "txn_matches",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        init_db(&conn).unwrap();
    }

    #[test]
    fn test_provider_id_is_unique() {
        let (_dir, conn) = test_db();
        insert_message(&conn, "m1", "2025-01-10", "EXPENSE", "", "");
        let dup = conn.execute(
            "INSERT INTO messages (provider_message_id, internal_date_ms, date_iso, date, label, score) \
             VALUES ('m1', 0, '', '', 'EXPENSE', 0)",
            [],
        );
        assert!(dup.is_err());
        assert!(message_exists(&conn, "m1").unwrap());
        assert!(!message_exists(&conn, "m2").unwrap());
    }

    #[test]
    fn test_open_in_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        open_in(&nested).unwrap();
        assert!(nested.join(DB_FILE).exists());
    }
}
