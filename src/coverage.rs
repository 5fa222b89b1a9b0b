use rusqlite::Connection;

use crate::date_range::DateRange;
use crate::error::{AppError, Result};

/// EXPENSE with nothing downloaded and no links captured at scan time.
const MISSING_EVIDENCE_SQL: &str = "(NOT EXISTS (SELECT 1 FROM evidence_items e \
     WHERE e.message_id = m.id AND e.local_path IS NOT NULL) \
     AND (m.links_json IS NULL OR m.links_json IN ('', '[]')))";

// Amounts are not extracted from messages yet, so nothing is ever flagged.
const MISSING_AMOUNT_SQL: &str = "0";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageSummary {
    pub total: i64,
    pub expense: i64,
    pub to_review: i64,
    pub not_expense: i64,
    pub missing_evidence: i64,
    pub missing_amount: i64,
    pub unmatched_txns: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthCoverage {
    pub month: String,
    pub total: i64,
    pub expense: i64,
    pub to_review: i64,
    pub missing_evidence: i64,
    pub missing_amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteKind {
    ToReview,
    MissingEvidence,
    MissingAmount,
}

impl IncompleteKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "to_review" => Some(Self::ToReview),
            "missing_evidence" => Some(Self::MissingEvidence),
            "missing_amount" => Some(Self::MissingAmount),
            _ => None,
        }
    }

    fn predicate(&self) -> String {
        match self {
            Self::ToReview => "m.label = 'TO_REVIEW'".to_string(),
            Self::MissingEvidence => format!("m.label = 'EXPENSE' AND {MISSING_EVIDENCE_SQL}"),
            Self::MissingAmount => format!("m.label = 'EXPENSE' AND {MISSING_AMOUNT_SQL}"),
        }
    }
}

fn rollup_columns() -> String {
    format!(
        "COUNT(*), \
         COALESCE(SUM(CASE WHEN m.label = 'EXPENSE' THEN 1 ELSE 0 END), 0), \
         COALESCE(SUM(CASE WHEN m.label = 'TO_REVIEW' THEN 1 ELSE 0 END), 0), \
         COALESCE(SUM(CASE WHEN m.label = 'NOT_EXPENSE' THEN 1 ELSE 0 END), 0), \
         COALESCE(SUM(CASE WHEN m.label = 'EXPENSE' AND {MISSING_EVIDENCE_SQL} THEN 1 ELSE 0 END), 0), \
         COALESCE(SUM(CASE WHEN m.label = 'EXPENSE' AND {MISSING_AMOUNT_SQL} THEN 1 ELSE 0 END), 0)"
    )
}

pub fn coverage_summary(conn: &Connection, range: &DateRange) -> Result<CoverageSummary> {
    let (from, to) = (range.from_ymd(), range.to_ymd());
    let sql = format!("SELECT {} FROM messages m WHERE m.date >= ?1 AND m.date <= ?2", rollup_columns());
    let mut summary = conn.query_row(&sql, [&from, &to], |row| {
        Ok(CoverageSummary {
            total: row.get(0)?,
            expense: row.get(1)?,
            to_review: row.get(2)?,
            not_expense: row.get(3)?,
            missing_evidence: row.get(4)?,
            missing_amount: row.get(5)?,
            unmatched_txns: 0,
        })
    })?;

    summary.unmatched_txns = conn.query_row(
        "SELECT COUNT(*) FROM bank_transactions t LEFT JOIN txn_matches tm ON t.id = tm.txn_id \
         WHERE t.txn_date >= ?1 AND t.txn_date <= ?2 AND tm.id IS NULL",
        [&from, &to],
        |row| row.get(0),
    )?;
    Ok(summary)
}

/// Same rollups per `YYYY-MM`, newest month first.
pub fn coverage_by_month(conn: &Connection, range: &DateRange) -> Result<Vec<MonthCoverage>> {
    let sql = format!(
        "SELECT substr(m.date, 1, 7) AS month, {} FROM messages m \
         WHERE m.date >= ?1 AND m.date <= ?2 GROUP BY month ORDER BY month DESC",
        rollup_columns()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([range.from_ymd(), range.to_ymd()], |row| {
            Ok(MonthCoverage {
                month: row.get(0)?,
                total: row.get(1)?,
                expense: row.get(2)?,
                to_review: row.get(3)?,
                missing_evidence: row.get(5)?,
                missing_amount: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn incomplete_item_ids(conn: &Connection, range: &DateRange, kind: IncompleteKind) -> Result<Vec<i64>> {
    let sql = format!(
        "SELECT m.id FROM messages m WHERE m.date >= ?1 AND m.date <= ?2 AND {} \
         ORDER BY m.internal_date_ms DESC, m.id DESC",
        kind.predicate()
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map([range.from_ymd(), range.to_ymd()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

pub fn parse_incomplete_kind(raw: &str) -> Result<IncompleteKind> {
    IncompleteKind::parse(raw).ok_or_else(|| {
        AppError::Other(format!(
            "unknown item kind '{raw}' (expected to_review, missing_evidence or missing_amount)"
        ))
    })
}
