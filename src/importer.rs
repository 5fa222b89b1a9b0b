use std::path::Path;

use chrono::NaiveDate;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{AppError, Result};
use crate::models::{BankAccount, ParsedTxn};
use crate::parser::collapse_whitespace;

const FALLBACK_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];
const MERCHANT_HINT_CHARS: usize = 50;

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

pub fn add_account(conn: &Connection, name: &str, currency: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO bank_accounts (name, currency) VALUES (?1, ?2)",
        rusqlite::params![name, currency],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_accounts(conn: &Connection) -> Result<Vec<BankAccount>> {
    let mut stmt = conn.prepare("SELECT id, name, currency FROM bank_accounts ORDER BY id DESC")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(BankAccount {
                id: row.get(0)?,
                name: row.get(1)?,
                currency: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_account(conn: &Connection, name: &str) -> Result<BankAccount> {
    conn.query_row(
        "SELECT id, name, currency FROM bank_accounts WHERE name = ?1",
        [name],
        |row| {
            Ok(BankAccount {
                id: row.get(0)?,
                name: row.get(1)?,
                currency: row.get(2)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::UnknownAccount(name.to_string()),
        other => AppError::Db(other),
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Lenient amount parsing. Currency marks are dropped, `(12.00)` is
/// negative, and a lone comma followed by one or two digits is a decimal
/// separator.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let negative_parens = trimmed.starts_with('(') && trimmed.ends_with(')');
    let kept: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if kept.is_empty() {
        return None;
    }

    let normalized = match (kept.contains('.'), kept.rfind(',')) {
        (false, Some(pos)) if (1..=2).contains(&(kept.len() - pos - 1)) && kept.matches(',').count() == 1 => {
            kept.replace(',', ".")
        }
        _ => kept.replace(',', ""),
    };
    let value: f64 = normalized.parse().ok()?;
    Some(if negative_parens { -value.abs() } else { value })
}

/// Accepts strftime patterns as well as `DD/MM/YYYY`-style tokens.
fn to_strftime(format: &str) -> String {
    if format.contains('%') {
        return format.to_string();
    }
    format.replace("YYYY", "%Y").replace("MM", "%m").replace("DD", "%d")
}

pub fn parse_date(raw: &str, format: Option<&str>) -> Option<String> {
    let raw = raw.trim();
    let parsed = match format {
        Some(f) => NaiveDate::parse_from_str(raw, &to_strftime(f)).ok(),
        None => FALLBACK_DATE_FORMATS
            .iter()
            .find_map(|f| NaiveDate::parse_from_str(raw, f).ok()),
    };
    parsed.map(|d| d.format("%Y-%m-%d").to_string())
}

pub fn row_hash(txn_date: &str, amount: f64, description: &str, currency: Option<&str>) -> String {
    let payload = format!("{txn_date}|{amount}|{description}|{}", currency.unwrap_or(""));
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// CSV parsing
// ---------------------------------------------------------------------------

/// Column indices are zero-based.
#[derive(Debug, Clone)]
pub struct CsvMapping {
    pub date_col: usize,
    pub amount_col: usize,
    pub desc_col: usize,
    pub currency_col: Option<usize>,
    pub date_format: Option<String>,
    pub default_currency: Option<String>,
}

impl Default for CsvMapping {
    fn default() -> Self {
        Self {
            date_col: 0,
            amount_col: 1,
            desc_col: 2,
            currency_col: None,
            date_format: None,
            default_currency: None,
        }
    }
}

/// Rows whose date or amount do not parse are skipped, which also drops
/// header lines.
pub fn parse_csv(file_path: &Path, mapping: &CsvMapping) -> Result<Vec<ParsedTxn>> {
    let file = std::fs::File::open(file_path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));

    let mut rows = Vec::new();
    for result in rdr.records() {
        let Ok(record) = result else { continue };
        if record.len() < 3 {
            continue;
        }
        let field = |i: usize| record.get(i).map(str::trim).filter(|s| !s.is_empty());

        let (Some(raw_date), Some(raw_amount)) = (field(mapping.date_col), field(mapping.amount_col)) else {
            continue;
        };
        let Some(txn_date) = parse_date(raw_date, mapping.date_format.as_deref()) else {
            continue;
        };
        let Some(amount) = parse_amount(raw_amount) else {
            continue;
        };
        let description = collapse_whitespace(field(mapping.desc_col).unwrap_or(""));
        let currency = mapping
            .currency_col
            .and_then(field)
            .map(String::from)
            .or_else(|| mapping.default_currency.clone());

        let fields: Vec<&str> = record.iter().collect();
        rows.push(ParsedTxn {
            row_hash: row_hash(&txn_date, amount, &description, currency.as_deref()),
            merchant_hint: description.chars().take(MERCHANT_HINT_CHARS).collect(),
            raw_row_json: serde_json::to_string(&fields)?,
            txn_date,
            amount,
            description,
            currency,
        });
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Insert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportResult {
    pub imported: usize,
    pub total: usize,
    pub skipped: usize,
}

pub fn insert_transactions(conn: &Connection, account_id: i64, rows: &[ParsedTxn]) -> Result<ImportResult> {
    let tx = conn.unchecked_transaction()?;
    let mut imported = 0usize;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO bank_transactions \
             (account_id, txn_date, amount, currency, description, merchant_hint, raw_row_json, row_hash) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for row in rows {
            imported += stmt.execute(rusqlite::params![
                account_id,
                row.txn_date,
                row.amount,
                row.currency,
                row.description,
                row.merchant_hint,
                row.raw_row_json,
                row.row_hash,
            ])?;
        }
    }
    tx.commit()?;
    Ok(ImportResult {
        imported,
        total: rows.len(),
        skipped: rows.len() - imported,
    })
}

pub fn import_csv(conn: &Connection, file_path: &Path, account_name: &str, mapping: &CsvMapping) -> Result<ImportResult> {
    let account = find_account(conn, account_name)?;
    let mut mapping = mapping.clone();
    if mapping.default_currency.is_none() {
        mapping.default_currency = account.currency.clone();
    }
    let rows = parse_csv(file_path, &mapping)?;
    let result = insert_transactions(conn, account.id, &rows)?;
    info!(
        account = %account.name,
        imported = result.imported,
        skipped = result.skipped,
        "bank import finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    fn write_csv(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const STATEMENT: &str = "\
Date,Amount,Description,Currency
2025-01-10,-120.50,\"ACME   CLOUD  LTD\",ILS
11/01/2025,\"-1,234.00\",Stripe payment,USD
not a date,5,Junk,ILS
2025-01-12,,Missing amount,ILS
";

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("-120.50"), Some(-120.5));
        assert_eq!(parse_amount("₪1,234.00"), Some(1234.0));
        assert_eq!(parse_amount("(45.00)"), Some(-45.0));
        assert_eq!(parse_amount("12,5"), Some(12.5));
        assert_eq!(parse_amount("1,234"), Some(1234.0));
        assert_eq!(parse_amount("USD"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2025-01-10", None).as_deref(), Some("2025-01-10"));
        assert_eq!(parse_date("11/01/2025", None).as_deref(), Some("2025-01-11"));
        assert_eq!(parse_date("01/11/2025", Some("MM/DD/YYYY")).as_deref(), Some("2025-01-11"));
        assert_eq!(parse_date("11.01.2025", Some("%d.%m.%Y")).as_deref(), Some("2025-01-11"));
        assert!(parse_date("Date", None).is_none());
    }

    #[test]
    fn test_parse_csv_skips_junk_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "s.csv", STATEMENT);
        let mapping = CsvMapping {
            currency_col: Some(3),
            ..Default::default()
        };
        let rows = parse_csv(&path, &mapping).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].description, "ACME CLOUD LTD");
        assert_eq!(rows[0].currency.as_deref(), Some("ILS"));
        assert_eq!(rows[1].txn_date, "2025-01-11");
        assert_eq!(rows[1].amount, -1234.0);
        assert_eq!(rows[0].row_hash, row_hash("2025-01-10", -120.5, "ACME CLOUD LTD", Some("ILS")));
        assert!(rows[0].raw_row_json.starts_with("[\"2025-01-10\""));
    }

    #[test]
    fn test_import_is_idempotent() {
        let (dir, conn) = test_db();
        add_account(&conn, "Checking", Some("ILS")).unwrap();
        let path = write_csv(dir.path(), "s.csv", STATEMENT);

        let first = import_csv(&conn, &path, "Checking", &CsvMapping::default()).unwrap();
        assert_eq!(first, ImportResult { imported: 2, total: 2, skipped: 0 });
        let second = import_csv(&conn, &path, "Checking", &CsvMapping::default()).unwrap();
        assert_eq!(second, ImportResult { imported: 0, total: 2, skipped: 2 });

        let currency: String = conn
            .query_row("SELECT currency FROM bank_transactions LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(currency, "ILS");
    }

    #[test]
    fn test_unknown_account() {
        let (dir, conn) = test_db();
        let path = write_csv(dir.path(), "s.csv", STATEMENT);
        let err = import_csv(&conn, &path, "Nope", &CsvMapping::default()).unwrap_err();
        assert!(matches!(err, AppError::UnknownAccount(_)));
    }

    #[test]
    fn test_find_account_surfaces_db_errors() {
        let (_dir, conn) = test_db();
        conn.execute_batch("DROP TABLE bank_accounts").unwrap();
        let err = find_account(&conn, "Checking").unwrap_err();
        assert!(matches!(err, AppError::Db(_)));
    }

    #[test]
    fn test_accounts_listed_newest_first() {
        let (_dir, conn) = test_db();
        add_account(&conn, "A", None).unwrap();
        add_account(&conn, "B", Some("USD")).unwrap();
        let names: Vec<String> = list_accounts(&conn).unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert!(add_account(&conn, "A", None).is_err());
    }
}
