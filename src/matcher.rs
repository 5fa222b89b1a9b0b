use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::{BankTransaction, TxnMatch};
use crate::vendors::resolve_vendor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchScoring {
    pub date_exact: i32,
    pub date_near: i32,
    pub near_days: i64,
    pub window_days: i64,
    pub vendor_hit: i32,
    pub domain_hit: i32,
    pub min_score: i32,
}

impl Default for MatchScoring {
    fn default() -> Self {
        Self {
            date_exact: 20,
            date_near: 10,
            near_days: 3,
            window_days: 7,
            vendor_hit: 30,
            domain_hit: 20,
            min_score: 70,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileResult {
    pub matched: usize,
    pub unmatched: usize,
    pub orphans: usize,
    pub matches: Vec<TxnMatch>,
}

/// An EXPENSE message that no transaction has claimed yet.
#[derive(Debug, Clone)]
pub struct OrphanExpense {
    pub id: i64,
    pub date: NaiveDate,
    pub vendor: String,
    pub from_domain: String,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn parse_ymd(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| AppError::InvalidDateRange(raw.to_string()))
}

pub fn unmatched_transactions(conn: &Connection, account_id: i64, from: &str, to: &str) -> Result<Vec<BankTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.account_id, t.txn_date, t.amount, t.currency, t.description \
         FROM bank_transactions t LEFT JOIN txn_matches m ON t.id = m.txn_id \
         WHERE t.account_id = ?1 AND t.txn_date >= ?2 AND t.txn_date <= ?3 AND m.id IS NULL \
         ORDER BY t.txn_date ASC, t.id ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![account_id, from, to], |row| {
            Ok(BankTransaction {
                id: row.get(0)?,
                account_id: row.get(1)?,
                txn_date: row.get(2)?,
                amount: row.get(3)?,
                currency: row.get(4)?,
                description: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn orphan_expenses(conn: &Connection, from: &str, to: &str) -> Result<Vec<OrphanExpense>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.date, COALESCE(m.from_header, ''), COALESCE(m.from_domain, ''), \
         (SELECT d.vendor_override FROM decisions d WHERE d.message_id = m.id \
          ORDER BY d.decided_at DESC, d.id DESC LIMIT 1) \
         FROM messages m LEFT JOIN txn_matches tm ON m.id = tm.message_id \
         WHERE m.label = 'EXPENSE' AND m.date >= ?1 AND m.date <= ?2 AND tm.id IS NULL \
         ORDER BY m.date_iso DESC, m.id ASC",
    )?;
    let raw = stmt
        .query_map(rusqlite::params![from, to], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(id, date, from_header, from_domain, vendor_override)| {
            Ok(OrphanExpense {
                id,
                date: parse_ymd(&date)?,
                vendor: resolve_vendor(vendor_override.as_deref(), &from_header, &from_domain),
                from_domain,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score one candidate, or None when it falls outside the date window.
pub fn score_candidate(
    txn_date: NaiveDate,
    description: &str,
    expense: &OrphanExpense,
    scoring: &MatchScoring,
) -> Option<(i32, Vec<String>)> {
    let mut score = 0;
    let mut reasons = Vec::new();

    let days = (txn_date - expense.date).num_days().abs();
    if days > scoring.window_days {
        return None;
    }
    if days == 0 {
        score += scoring.date_exact;
        reasons.push("Date exact".to_string());
    } else if days <= scoring.near_days {
        score += scoring.date_near;
        reasons.push(format!("Date within {days}d"));
    }

    let desc = description.to_lowercase();
    let vendor = expense.vendor.to_lowercase();
    let domain = expense.from_domain.to_lowercase();
    if !vendor.is_empty() && desc.contains(&vendor) {
        score += scoring.vendor_hit;
        reasons.push("Vendor match".to_string());
    } else if !domain.is_empty() && desc.contains(&domain) {
        score += scoring.domain_hit;
        reasons.push("Domain match".to_string());
    }

    Some((score, reasons))
}

// ---------------------------------------------------------------------------
// Reconcile
// ---------------------------------------------------------------------------

/// Recompute every match for `account_id` in [from, to]. Orphans are drawn
/// from a window padded by the scoring window on both sides.
pub fn reconcile(conn: &Connection, account_id: i64, from: &str, to: &str, scoring: &MatchScoring) -> Result<ReconcileResult> {
    let from_date = parse_ymd(from)?;
    let to_date = parse_ymd(to)?;
    if from_date > to_date {
        return Err(AppError::InvalidDateRange(format!("{from} is after {to}")));
    }
    let margin = Duration::days(scoring.window_days);
    let margin_from = (from_date - margin).format("%Y-%m-%d").to_string();
    let margin_to = (to_date + margin).format("%Y-%m-%d").to_string();

    let tx = conn.unchecked_transaction()?;
    let cleared = tx.execute(
        "DELETE FROM txn_matches WHERE txn_id IN \
         (SELECT id FROM bank_transactions WHERE account_id = ?1 AND txn_date >= ?2 AND txn_date <= ?3)",
        rusqlite::params![account_id, from, to],
    )?;
    debug!(account_id, cleared, "cleared previous matches");

    let txns = unmatched_transactions(&tx, account_id, from, to)?;
    let mut pool = orphan_expenses(&tx, &margin_from, &margin_to)?;
    let expense_count = pool.len();

    let mut matches = Vec::new();
    for txn in &txns {
        let txn_date = parse_ymd(&txn.txn_date)?;
        let mut best: Option<(usize, i32, Vec<String>)> = None;
        for (idx, expense) in pool.iter().enumerate() {
            let Some((score, reasons)) = score_candidate(txn_date, &txn.description, expense, scoring) else {
                continue;
            };
            let beats = best.as_ref().map_or(true, |(_, s, _)| score > *s);
            if score >= scoring.min_score && beats {
                best = Some((idx, score, reasons));
            }
        }
        if let Some((idx, score, reasons)) = best {
            let claimed = pool.remove(idx);
            matches.push(TxnMatch {
                txn_id: txn.id,
                message_id: claimed.id,
                match_score: score,
                match_reason: reasons.join(", "),
            });
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO txn_matches (txn_id, message_id, match_score, match_reason) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for m in &matches {
            stmt.execute(rusqlite::params![m.txn_id, m.message_id, m.match_score, m.match_reason])?;
        }
    }
    tx.commit()?;

    let result = ReconcileResult {
        matched: matches.len(),
        unmatched: txns.len() - matches.len(),
        orphans: expense_count - matches.len(),
        matches,
    };
    info!(
        account_id,
        matched = result.matched,
        unmatched = result.unmatched,
        orphans = result.orphans,
        "reconcile finished"
    );
    Ok(result)
}

// ---------------------------------------------------------------------------
// CSV report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ReportRow {
    txn_id: i64,
    date: String,
    amount: f64,
    description: String,
    status: &'static str,
    match_score: Option<i32>,
    match_reason: Option<String>,
    matched_vendor: Option<String>,
    matched_message_id: Option<i64>,
}

fn matched_rows(conn: &Connection, account_id: i64, from: &str, to: &str) -> Result<Vec<ReportRow>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.txn_date, t.amount, t.description, tm.match_score, tm.match_reason, m.id, \
         COALESCE(m.from_header, ''), COALESCE(m.from_domain, ''), \
         (SELECT d.vendor_override FROM decisions d WHERE d.message_id = m.id \
          ORDER BY d.decided_at DESC, d.id DESC LIMIT 1) \
         FROM bank_transactions t \
         JOIN txn_matches tm ON tm.txn_id = t.id \
         JOIN messages m ON m.id = tm.message_id \
         WHERE t.account_id = ?1 AND t.txn_date >= ?2 AND t.txn_date <= ?3 \
         ORDER BY t.txn_date ASC, t.id ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![account_id, from, to], |row| {
            let from_header: String = row.get(7)?;
            let from_domain: String = row.get(8)?;
            let vendor_override: Option<String> = row.get(9)?;
            Ok(ReportRow {
                txn_id: row.get(0)?,
                date: row.get(1)?,
                amount: row.get(2)?,
                description: row.get(3)?,
                status: "MATCHED",
                match_score: row.get(4)?,
                match_reason: row.get(5)?,
                matched_message_id: row.get(6)?,
                matched_vendor: Some(resolve_vendor(vendor_override.as_deref(), &from_header, &from_domain)),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Write `reconciliation_<account>_<from>_<to>.csv` into `out_dir`, one row
/// per transaction in range, matched rows first.
pub fn write_report(conn: &Connection, account_id: i64, from: &str, to: &str, out_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let out_path = out_dir.join(format!("reconciliation_{account_id}_{from}_{to}.csv"));

    let mut wtr = csv::Writer::from_path(&out_path)?;
    for row in matched_rows(conn, account_id, from, to)? {
        wtr.serialize(row)?;
    }
    for txn in unmatched_transactions(conn, account_id, from, to)? {
        wtr.serialize(ReportRow {
            txn_id: txn.id,
            date: txn.txn_date,
            amount: txn.amount,
            description: txn.description,
            status: "UNMATCHED",
            match_score: None,
            match_reason: None,
            matched_vendor: None,
            matched_message_id: None,
        })?;
    }
    wtr.flush()?;
    Ok(out_path)
}
