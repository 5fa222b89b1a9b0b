use rusqlite::{Connection, OptionalExtension};

use crate::db::{get_connection, DB_FILE};
use crate::error::Result;
use crate::fmt::format_bytes;
use crate::settings::{load_settings, settings_file_exists};

fn count(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |r| r.get(0))?)
}

pub fn run() -> Result<()> {
    let settings = load_settings();
    let data_dir = settings.data_path();
    let db_path = data_dir.join(DB_FILE);

    println!("Settings:   {}", if settings_file_exists() { "saved" } else { "(defaults)" });
    println!("Data dir:   {}", data_dir.display());
    println!("Database:   {}", db_path.display());

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `fetchexpense init` to set up.");
        return Ok(());
    }

    let size = std::fs::metadata(&db_path)?.len();
    println!("DB size:    {}", format_bytes(size));

    let conn = get_connection(&db_path)?;
    let messages = count(&conn, "SELECT count(*) FROM messages")?;
    let expense = count(&conn, "SELECT count(*) FROM messages WHERE label = 'EXPENSE'")?;
    let to_review = count(&conn, "SELECT count(*) FROM messages WHERE label = 'TO_REVIEW'")?;
    let evidence = count(&conn, "SELECT count(*) FROM evidence_items WHERE local_path IS NOT NULL")?;
    let pending = count(&conn, "SELECT count(*) FROM evidence_items WHERE local_path IS NULL")?;
    let needs_login = count(&conn, "SELECT count(*) FROM evidence_links WHERE status = 'NEEDS_LOGIN'")?;
    let exports = count(&conn, "SELECT count(*) FROM exports")?;
    let txns = count(&conn, "SELECT count(*) FROM bank_transactions")?;

    println!();
    println!("Messages:       {messages}");
    println!("  Expense:      {expense}");
    println!("  To review:    {to_review}");
    println!("Evidence files: {evidence} ({pending} pending)");
    println!("Needs login:    {needs_login}");
    println!("Exported:       {exports}");
    println!("Bank txns:      {txns}");

    let last_run: Option<(String, String, String, i64)> = conn
        .query_row(
            "SELECT mode, range_start, range_end, total_inserted FROM scan_runs ORDER BY id DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    if let Some((mode, start, end, inserted)) = last_run {
        println!("Last scan:      {mode} {start}..{end} ({inserted} new)");
    }
    Ok(())
}
