use std::collections::HashSet;

use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::date_range::DateRange;
use crate::error::Result;
use crate::keywords::{SCAN_ENGLISH_TERMS, SCAN_HEBREW_TERMS, SCAN_VENDOR_TERMS};
use crate::models::{MessageStub, RecallMode};
use crate::provider::{ListOptions, MessageProvider};

pub const BUCKET_LIMIT: usize = 300;
pub const NORMAL_RUN_LIMIT: usize = 500;
pub const HIGH_RECALL_RUN_LIMIT: usize = 2000;

const BROAD_ATTACHMENT_TERMS: &str = "(invoice OR receipt OR bill OR payment OR חשבונית OR קבלה)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanLimits {
    pub per_bucket: usize,
    pub per_run: usize,
}

impl ScanLimits {
    pub fn for_mode(mode: RecallMode) -> Self {
        let per_run = match mode {
            RecallMode::Normal => NORMAL_RUN_LIMIT,
            RecallMode::HighRecall | RecallMode::HighRecallStrict => HIGH_RECALL_RUN_LIMIT,
        };
        Self {
            per_bucket: BUCKET_LIMIT,
            per_run,
        }
    }
}

/// Which normally hidden folders a scan may reach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanScope {
    pub include_spam: bool,
    pub include_trash: bool,
}

impl ScanScope {
    pub fn query_prefix(&self) -> &'static str {
        match (self.include_spam, self.include_trash) {
            (true, false) => "in:anywhere -in:trash",
            (false, true) => "in:anywhere -in:spam",
            _ => "in:anywhere",
        }
    }

    /// Spam and trash are invisible to search unless the API flag is set.
    pub fn api_flag(&self) -> bool {
        self.include_spam || self.include_trash
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: &'static str,
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketStats {
    pub name: String,
    pub query: String,
    pub found: usize,
    pub inserted: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanRunSummary {
    pub run_id: i64,
    pub total_found: usize,
    pub total_inserted: usize,
    pub truncated: bool,
    pub truncation_reason: Option<String>,
    pub buckets: Vec<BucketStats>,
}

// ---------------------------------------------------------------------------
// Query construction
// ---------------------------------------------------------------------------

/// Gmail's `before:` is exclusive, so the upper bound moves one day out.
pub fn date_clause(range: &DateRange) -> String {
    let before = range.to.succ_opt().unwrap_or(range.to);
    format!(
        "after:{} before:{}",
        range.from.format("%Y/%m/%d"),
        before.format("%Y/%m/%d")
    )
}

fn quoted_group(terms: &[&str]) -> String {
    let quoted: Vec<String> = terms.iter().map(|t| format!("\"{t}\"")).collect();
    format!("({})", quoted.join(" OR "))
}

pub fn build_buckets(range: &DateRange, mode: RecallMode, scope: ScanScope) -> Vec<Bucket> {
    let base = format!("{} {}", scope.query_prefix(), date_clause(range));
    let mut buckets = vec![
        Bucket {
            name: "Keywords (EN)",
            query: format!("{base} {}", quoted_group(SCAN_ENGLISH_TERMS)),
        },
        Bucket {
            name: "Keywords (HE)",
            query: format!("{base} {}", quoted_group(SCAN_HEBREW_TERMS)),
        },
    ];
    if mode != RecallMode::Normal {
        buckets.push(Bucket {
            name: "Attachments (Broad)",
            query: format!("{base} has:attachment {BROAD_ATTACHMENT_TERMS}"),
        });
    }
    buckets.push(Bucket {
        name: "Vendors",
        query: format!("{base} {}", quoted_group(SCAN_VENDOR_TERMS)),
    });
    buckets.push(Bucket {
        name: "Attachments (PDF)",
        query: format!("{base} filename:pdf"),
    });
    if mode == RecallMode::HighRecall {
        buckets.push(Bucket {
            name: "Category: Purchases",
            query: format!("{base} category:purchases"),
        });
    }
    buckets
}

// ---------------------------------------------------------------------------
// Audit rows
// ---------------------------------------------------------------------------

fn create_run(conn: &Connection, range: &DateRange, mode: RecallMode) -> Result<i64> {
    conn.execute(
        "INSERT INTO scan_runs (mode, range_start, range_end, status) VALUES (?1, ?2, ?3, 'RUNNING')",
        rusqlite::params![mode.as_str(), range.from_ymd(), range.to_ymd()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn record_bucket(conn: &Connection, run_id: i64, stats: &BucketStats) -> Result<()> {
    conn.execute(
        "INSERT INTO scan_run_buckets (run_id, bucket_name, query, found_count, inserted_count, is_truncated) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            run_id,
            stats.name,
            stats.query,
            stats.found as i64,
            stats.inserted as i64,
            stats.truncated as i32
        ],
    )?;
    Ok(())
}

fn finish_run(conn: &Connection, summary: &ScanRunSummary) -> Result<()> {
    conn.execute(
        "UPDATE scan_runs SET status = 'COMPLETED', total_found = ?1, total_inserted = ?2, \
         is_truncated = ?3, truncation_reason = ?4, finished_at = datetime('now') WHERE id = ?5",
        rusqlite::params![
            summary.total_found as i64,
            summary.total_inserted as i64,
            summary.truncated as i32,
            summary.truncation_reason,
            summary.run_id
        ],
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Bucket loop
// ---------------------------------------------------------------------------

/// Run every bucket for `mode`, handing each newly seen stub to
/// `on_candidate` along with the bucket name. The callback returns whether
/// it inserted the message.
pub fn scan_buckets<F>(
    conn: &Connection,
    provider: &dyn MessageProvider,
    range: &DateRange,
    mode: RecallMode,
    scope: ScanScope,
    on_candidate: F,
) -> Result<ScanRunSummary>
where
    F: FnMut(&MessageStub, &str) -> bool,
{
    scan_buckets_with_limits(conn, provider, range, mode, scope, ScanLimits::for_mode(mode), on_candidate)
}

pub fn scan_buckets_with_limits<F>(
    conn: &Connection,
    provider: &dyn MessageProvider,
    range: &DateRange,
    mode: RecallMode,
    scope: ScanScope,
    limits: ScanLimits,
    mut on_candidate: F,
) -> Result<ScanRunSummary>
where
    F: FnMut(&MessageStub, &str) -> bool,
{
    let run_id = create_run(conn, range, mode)?;
    info!(run_id, mode = mode.as_str(), range = %range.label, "starting scan");

    let mut summary = ScanRunSummary {
        run_id,
        ..Default::default()
    };
    let mut seen: HashSet<String> = HashSet::new();
    let opts = ListOptions {
        limit: limits.per_bucket + 1,
        include_spam_trash: scope.api_flag(),
    };

    for bucket in build_buckets(range, mode, scope) {
        if summary.total_found >= limits.per_run {
            let reason = format!("Total limit {} reached", limits.per_run);
            warn!(run_id, reason = %reason, "scan truncated");
            summary.truncated = true;
            summary.truncation_reason = Some(reason);
            break;
        }

        let mut stats = BucketStats {
            name: bucket.name.to_string(),
            query: bucket.query.clone(),
            ..Default::default()
        };

        match provider.list_messages(&bucket.query, &opts) {
            Ok(mut stubs) => {
                if stubs.len() > limits.per_bucket {
                    stubs.truncate(limits.per_bucket);
                    stats.truncated = true;
                }
                for stub in &stubs {
                    if !seen.insert(stub.id.clone()) {
                        continue;
                    }
                    stats.found += 1;
                    summary.total_found += 1;
                    if on_candidate(stub, bucket.name) {
                        stats.inserted += 1;
                        summary.total_inserted += 1;
                    }
                }
                info!(
                    bucket = bucket.name,
                    found = stats.found,
                    inserted = stats.inserted,
                    truncated = stats.truncated,
                    "bucket complete"
                );
            }
            Err(e) => {
                error!(bucket = bucket.name, error = %e, "bucket query failed");
            }
        }

        record_bucket(conn, run_id, &stats)?;
        summary.buckets.push(stats);
    }

    finish_run(conn, &summary)?;
    Ok(summary)
}
