use rusqlite::{Connection, OptionalExtension};

use crate::date_range::DateRange;
use crate::error::{AppError, Result};
use crate::models::Label;
use crate::vendors::resolve_vendor;

pub struct ReviewItem {
    pub id: i64,
    pub provider_message_id: String,
    pub date: String,
    pub from_header: String,
    pub vendor: String,
    pub subject: String,
    pub label: Label,
    pub score: i32,
    pub reasons: Vec<String>,
    pub evidence_count: i64,
}

/// Provider label applied when a decision is mirrored back to the mailbox.
pub fn decision_label_name(label: Label) -> &'static str {
    match label {
        Label::Expense => "FetchExpense/Expense",
        Label::ToReview => "FetchExpense/ToReview",
        Label::NotExpense => "FetchExpense/NotExpense",
    }
}

pub fn get_review_items(conn: &Connection, range: &DateRange, label: Label) -> Result<Vec<ReviewItem>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.provider_message_id, m.date, COALESCE(m.from_header, ''), COALESCE(m.subject, ''), \
         m.label, m.score, m.reasons_json, \
         (SELECT COUNT(*) FROM evidence_items e WHERE e.message_id = m.id AND e.local_path IS NOT NULL), \
         COALESCE(m.from_domain, '') \
         FROM messages m WHERE m.label = ?1 AND m.date >= ?2 AND m.date <= ?3 \
         ORDER BY m.internal_date_ms DESC, m.id DESC",
    )?;
    let mut rows = stmt
        .query_map(rusqlite::params![label.as_str(), range.from_ymd(), range.to_ymd()], |row| {
            let raw_label: String = row.get(5)?;
            let reasons_json: String = row.get(7)?;
            let from_header: String = row.get(3)?;
            let from_domain: String = row.get(9)?;
            Ok(ReviewItem {
                id: row.get(0)?,
                provider_message_id: row.get(1)?,
                date: row.get(2)?,
                vendor: resolve_vendor(None, &from_header, &from_domain),
                from_header,
                subject: row.get(4)?,
                label: Label::parse(&raw_label).unwrap_or(Label::ToReview),
                score: row.get(6)?,
                reasons: serde_json::from_str(&reasons_json).unwrap_or_default(),
                evidence_count: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    // A reviewer's vendor override replaces the sender-derived name.
    for item in &mut rows {
        if let Some(vendor) = latest_vendor_override(conn, item.id)? {
            item.vendor = vendor;
        }
    }
    Ok(rows)
}

/// Record a human decision and make it the message's label. Returns the
/// provider message id so callers can mirror the label.
pub fn mark_decision(
    conn: &Connection,
    message_id: i64,
    label: Label,
    vendor_override: Option<&str>,
    note: Option<&str>,
) -> Result<String> {
    let provider_id: String = conn
        .query_row(
            "SELECT provider_message_id FROM messages WHERE id = ?1",
            [message_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| AppError::Other(format!("no message with id {message_id}")))?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO decisions (message_id, label, vendor_override, note) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![message_id, label.as_str(), vendor_override, note],
    )?;
    tx.execute(
        "UPDATE messages SET label = ?1, status = 'REVIEWED' WHERE id = ?2",
        rusqlite::params![label.as_str(), message_id],
    )?;
    tx.commit()?;
    Ok(provider_id)
}

pub fn latest_vendor_override(conn: &Connection, message_id: i64) -> Result<Option<String>> {
    let value: Option<Option<String>> = conn
        .query_row(
            "SELECT vendor_override FROM decisions WHERE message_id = ?1 \
             ORDER BY decided_at DESC, id DESC LIMIT 1",
            [message_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(value.flatten())
}
