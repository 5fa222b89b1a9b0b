use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::capture::LinkCapturer;
use crate::classifier::classify;
use crate::date_range::DateRange;
use crate::db::message_exists;
use crate::downloader::{DownloadResult, LinkDownloader};
use crate::error::Result;
use crate::exporter::{export_path, pending_exports, record_export, ExportTarget, EXPORTED_LABEL};
use crate::links::pick_invoice_links;
use crate::models::{AnalyzedMessage, ClassificationResult, EvidenceKind, Label, LinkMeta, LinkStatus, MessageStub, RecallMode};
use crate::parser::{parse_from_header, parse_message};
use crate::provider::MessageProvider;
use crate::scanner::{scan_buckets, ScanRunSummary, ScanScope};
use crate::settings::{ExportSettings, LinkCaptureSettings};

// ---------------------------------------------------------------------------
// Scan step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub recall: RecallMode,
    pub scope: ScanScope,
    /// Stop processing new messages after this many inserts.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub run: ScanRunSummary,
    pub inserted: usize,
    pub skipped_existing: usize,
    pub failed: usize,
    pub capped: bool,
    pub expense: usize,
    pub to_review: usize,
    pub not_expense: usize,
}

fn local_date(date: &DateTime<Utc>) -> String {
    date.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

/// Persist a classified message and its attachment stubs atomically.
pub fn insert_analyzed(conn: &Connection, msg: &AnalyzedMessage, result: &ClassificationResult) -> Result<i64> {
    let (from_email, from_domain) = parse_from_header(&msg.from);
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO messages (provider_message_id, thread_id, internal_date_ms, date_iso, date, \
         from_header, from_email, from_domain, subject, snippet, label, score, reasons_json, links_json, \
         status, is_read) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'NEW', 0)",
        rusqlite::params![
            msg.id,
            msg.thread_id,
            msg.date.timestamp_millis(),
            msg.date.to_rfc3339(),
            local_date(&msg.date),
            msg.from,
            from_email,
            from_domain,
            msg.subject,
            msg.snippet,
            result.label.as_str(),
            result.score,
            serde_json::to_string(&result.reasons)?,
            serde_json::to_string(&msg.links)?,
        ],
    )?;
    let message_id = tx.last_insert_rowid();
    {
        let mut stmt = tx.prepare(
            "INSERT INTO evidence_items (message_id, kind, filename, mime_type, size_bytes, attachment_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for att in &msg.attachments {
            stmt.execute(rusqlite::params![
                message_id,
                EvidenceKind::Attachment.as_str(),
                att.filename,
                att.mime_type,
                att.size,
                att.attachment_id,
            ])?;
        }
    }
    tx.commit()?;
    Ok(message_id)
}

fn process_stub(conn: &Connection, provider: &dyn MessageProvider, stub: &MessageStub) -> Result<Option<Label>> {
    let Some(raw) = provider.get_message(&stub.id)? else {
        warn!(message_id = %stub.id, "message vanished before fetch");
        return Ok(None);
    };
    let analyzed = parse_message(&raw);
    let result = classify(&analyzed);
    insert_analyzed(conn, &analyzed, &result)?;
    Ok(Some(result.label))
}

pub fn scan_step(
    conn: &Connection,
    provider: &dyn MessageProvider,
    range: &DateRange,
    opts: &ScanOptions,
) -> Result<ScanSummary> {
    info!(range = %range.label, mode = opts.recall.as_str(), limit = ?opts.limit, "starting scan step");
    let mut summary = ScanSummary::default();

    let run = scan_buckets(conn, provider, range, opts.recall, opts.scope, |stub, bucket| {
        if opts.limit.is_some_and(|cap| summary.inserted >= cap) {
            summary.capped = true;
            return false;
        }
        match message_exists(conn, &stub.id) {
            Ok(true) => {
                debug!(message_id = %stub.id, bucket, "skipping existing message");
                summary.skipped_existing += 1;
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                error!(message_id = %stub.id, error = %e, "existence check failed");
                summary.failed += 1;
                return false;
            }
        }
        match process_stub(conn, provider, stub) {
            Ok(Some(label)) => {
                info!(message_id = %stub.id, bucket, label = label.as_str(), "processed message");
                summary.inserted += 1;
                match label {
                    Label::Expense => summary.expense += 1,
                    Label::ToReview => summary.to_review += 1,
                    Label::NotExpense => summary.not_expense += 1,
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(message_id = %stub.id, bucket, error = %e, "failed to process message");
                summary.failed += 1;
                false
            }
        }
    })?;

    summary.run = run;
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Evidence step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceSummary {
    pub attachments_downloaded: usize,
    pub attachments_failed: usize,
    pub attachments_healed: usize,
    pub links_tried: usize,
    pub links_downloaded: usize,
    pub links_need_login: usize,
    pub links_failed: usize,
    pub captures: usize,
}

pub struct EvidenceContext<'a> {
    pub data_dir: &'a Path,
    pub link_capture: &'a LinkCaptureSettings,
    pub downloader: &'a LinkDownloader,
    /// Present when UNSUPPORTED links should be rendered.
    pub capturer: Option<&'a mut LinkCapturer>,
}

struct PendingAttachment {
    id: i64,
    provider_message_id: String,
    filename: String,
    attachment_id: Option<String>,
}

fn pending_attachments(conn: &Connection) -> Result<Vec<PendingAttachment>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, m.provider_message_id, e.filename, e.attachment_id \
         FROM evidence_items e JOIN messages m ON e.message_id = m.id \
         WHERE e.local_path IS NULL AND e.kind = 'ATTACHMENT' AND m.label = 'EXPENSE' \
         ORDER BY e.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PendingAttachment {
                id: row.get(0)?,
                provider_message_id: row.get(1)?,
                filename: row.get(2)?,
                attachment_id: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Re-fetch the message and find the attachment id by filename.
fn heal_attachment_id(conn: &Connection, provider: &dyn MessageProvider, item: &PendingAttachment) -> Result<Option<String>> {
    info!(evidence_id = item.id, message_id = %item.provider_message_id, "recovering missing attachment id");
    let Some(raw) = provider.get_message(&item.provider_message_id)? else {
        return Ok(None);
    };
    let recovered = parse_message(&raw)
        .attachments
        .into_iter()
        .find(|a| a.filename == item.filename)
        .and_then(|a| a.attachment_id);
    if let Some(id) = &recovered {
        conn.execute(
            "UPDATE evidence_items SET attachment_id = ?1 WHERE id = ?2",
            rusqlite::params![id, item.id],
        )?;
    }
    Ok(recovered)
}

fn safe_file_name(name: &str, fallback: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn store_attachment(
    conn: &Connection,
    provider: &dyn MessageProvider,
    data_dir: &Path,
    item: &PendingAttachment,
    attachment_id: &str,
) -> Result<PathBuf> {
    let bytes = provider.get_attachment(&item.provider_message_id, attachment_id)?;
    let dir = data_dir.join("staging").join(&item.provider_message_id);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(safe_file_name(&item.filename, "attachment"));
    std::fs::write(&path, &bytes)?;

    let sha = hex::encode(Sha256::digest(&bytes));
    conn.execute(
        "UPDATE evidence_items SET local_path = ?1, sha256 = ?2, size_bytes = ?3 \
         WHERE id = ?4 AND local_path IS NULL",
        rusqlite::params![path.display().to_string(), sha, bytes.len() as i64, item.id],
    )?;
    Ok(path)
}

fn download_attachments(conn: &Connection, provider: &dyn MessageProvider, data_dir: &Path, summary: &mut EvidenceSummary) -> Result<()> {
    for item in pending_attachments(conn)? {
        let attachment_id = match item.attachment_id.clone() {
            Some(id) => Some(id),
            None => match heal_attachment_id(conn, provider, &item) {
                Ok(Some(id)) => {
                    summary.attachments_healed += 1;
                    Some(id)
                }
                Ok(None) => None,
                Err(e) => {
                    error!(evidence_id = item.id, error = %e, "attachment id recovery failed");
                    None
                }
            },
        };
        let Some(attachment_id) = attachment_id else {
            warn!(evidence_id = item.id, filename = %item.filename, "attachment id missing, skipping");
            summary.attachments_failed += 1;
            continue;
        };

        match store_attachment(conn, provider, data_dir, &item, &attachment_id) {
            Ok(path) => {
                info!(evidence_id = item.id, path = %path.display(), "downloaded attachment");
                summary.attachments_downloaded += 1;
            }
            Err(e) => {
                error!(evidence_id = item.id, error = %e, "attachment download failed");
                summary.attachments_failed += 1;
            }
        }
    }
    Ok(())
}

struct LinkCandidate {
    id: i64,
    provider_message_id: String,
    date: String,
    links: Vec<LinkMeta>,
}

/// EXPENSE messages with nothing resolved and no link downloaded yet.
fn link_candidates(conn: &Connection) -> Result<Vec<LinkCandidate>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.provider_message_id, m.date, m.links_json FROM messages m \
         WHERE m.label = 'EXPENSE' \
         AND NOT EXISTS (SELECT 1 FROM evidence_items e WHERE e.message_id = m.id AND e.local_path IS NOT NULL) \
         AND NOT EXISTS (SELECT 1 FROM evidence_links l WHERE l.message_id = m.id AND l.status = 'DOWNLOADED') \
         ORDER BY m.id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let links_json: String = row.get(3)?;
            Ok(LinkCandidate {
                id: row.get(0)?,
                provider_message_id: row.get(1)?,
                date: row.get(2)?,
                links: serde_json::from_str(&links_json).unwrap_or_default(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Returns the link row id, or None when an earlier run already settled it.
fn claim_link(conn: &Connection, message_id: i64, link: &LinkMeta) -> Result<Option<i64>> {
    let existing: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, status FROM evidence_links WHERE message_id = ?1 AND url_original = ?2",
            rusqlite::params![message_id, link.url],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((_, status))
            if matches!(LinkStatus::parse(&status), Some(LinkStatus::Downloaded | LinkStatus::NeedsLogin)) =>
        {
            Ok(None)
        }
        Some((id, _)) => {
            conn.execute(
                "UPDATE evidence_links SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                rusqlite::params![LinkStatus::Downloading.as_str(), id],
            )?;
            Ok(Some(id))
        }
        None => {
            conn.execute(
                "INSERT INTO evidence_links (message_id, url_original, anchor_text, context_snippet, status) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message_id,
                    link.url,
                    link.anchor_text,
                    link.context,
                    LinkStatus::Downloading.as_str()
                ],
            )?;
            Ok(Some(conn.last_insert_rowid()))
        }
    }
}

fn record_link_result(conn: &Connection, link_id: i64, result: &DownloadResult) -> Result<()> {
    conn.execute(
        "UPDATE evidence_links SET status = ?1, url_resolved = ?2, content_type = ?3, filename = ?4, \
         file_path = ?5, file_sha256 = ?6, http_status = ?7, failure_reason = ?8, updated_at = datetime('now') \
         WHERE id = ?9",
        rusqlite::params![
            result.status.as_str(),
            result.resolved_url,
            result.content_type,
            result.filename,
            result.local_path.as_ref().map(|p| p.display().to_string()),
            result.sha256,
            result.http_status,
            result.failure_reason,
            link_id,
        ],
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn insert_link_file(
    conn: &Connection,
    message_id: i64,
    filename: &str,
    mime_type: Option<&str>,
    size_bytes: Option<u64>,
    local_path: &Path,
    source_url: &str,
    sha256: Option<&str>,
    capture_kind: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO evidence_items (message_id, kind, filename, mime_type, size_bytes, local_path, source_url, \
         sha256, capture_kind) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            message_id,
            EvidenceKind::LinkFile.as_str(),
            filename,
            mime_type,
            size_bytes.map(|s| s as i64),
            local_path.display().to_string(),
            source_url,
            sha256,
            capture_kind,
        ],
    )?;
    Ok(())
}

fn links_dir(data_dir: &Path, candidate: &LinkCandidate) -> PathBuf {
    let mut dir = data_dir.join("evidence");
    let mut parts = candidate.date.split('-');
    if let (Some(year), Some(month)) = (parts.next(), parts.next()) {
        dir = dir.join(year).join(month);
    }
    dir.join(&candidate.provider_message_id).join("links")
}

/// Try the best-scored links of one message until one yields a file.
fn acquire_links(conn: &Connection, ctx: &mut EvidenceContext<'_>, candidate: &LinkCandidate, summary: &mut EvidenceSummary) -> Result<()> {
    let dest = links_dir(ctx.data_dir, candidate);
    for link in pick_invoice_links(&candidate.links, ctx.link_capture.max_per_message) {
        let Some(link_id) = claim_link(conn, candidate.id, &link)? else {
            debug!(url = %link.url, "link already settled");
            continue;
        };
        summary.links_tried += 1;
        info!(url = %link.url, message_id = %candidate.provider_message_id, "downloading invoice link");

        let result = ctx.downloader.download(&link.url, &dest);
        record_link_result(conn, link_id, &result)?;

        match result.status {
            LinkStatus::Downloaded => {
                if let Some(path) = &result.local_path {
                    insert_link_file(
                        conn,
                        candidate.id,
                        result.filename.as_deref().unwrap_or("invoice.pdf"),
                        result.content_type.as_deref(),
                        result.size_bytes,
                        path,
                        &link.url,
                        result.sha256.as_deref(),
                        None,
                    )?;
                }
                summary.links_downloaded += 1;
                info!(url = %link.url, filename = ?result.filename, "link download succeeded");
                return Ok(());
            }
            LinkStatus::NeedsLogin => {
                summary.links_need_login += 1;
                warn!(url = %link.url, "link requires login");
            }
            LinkStatus::Unsupported => {
                if let Some(capturer) = ctx.capturer.as_deref_mut() {
                    capturer.init();
                    if let Some(record) = capturer.capture(&link.url, &dest, &format!("capture_{link_id}")) {
                        insert_link_file(
                            conn,
                            candidate.id,
                            &record.filename,
                            Some(&record.mime_type),
                            Some(record.size_bytes),
                            &record.local_path,
                            &link.url,
                            Some(&record.sha256),
                            Some(record.kind.as_str()),
                        )?;
                        let rendered = DownloadResult {
                            status: LinkStatus::Downloaded,
                            content_type: Some(record.mime_type.clone()),
                            filename: Some(record.filename.clone()),
                            local_path: Some(record.local_path.clone()),
                            size_bytes: Some(record.size_bytes),
                            sha256: Some(record.sha256.clone()),
                            ..result.clone()
                        };
                        record_link_result(conn, link_id, &rendered)?;
                        summary.captures += 1;
                        info!(url = %link.url, kind = record.kind.as_str(), "rendered link captured");
                        return Ok(());
                    }
                }
                summary.links_failed += 1;
                warn!(url = %link.url, reason = ?result.failure_reason, "link unsupported");
            }
            LinkStatus::Failed | LinkStatus::Downloading => {
                summary.links_failed += 1;
                warn!(url = %link.url, reason = ?result.failure_reason, "link download failed");
            }
        }
    }
    Ok(())
}

pub fn evidence_step(conn: &Connection, provider: &dyn MessageProvider, mut ctx: EvidenceContext<'_>) -> Result<EvidenceSummary> {
    info!("starting evidence step");
    let mut summary = EvidenceSummary::default();
    download_attachments(conn, provider, ctx.data_dir, &mut summary)?;

    if ctx.link_capture.enabled {
        for candidate in link_candidates(conn)? {
            if candidate.links.is_empty() {
                continue;
            }
            if let Err(e) = acquire_links(conn, &mut ctx, &candidate, &mut summary) {
                error!(message_id = %candidate.provider_message_id, error = %e, "link processing failed");
            }
        }
    }

    if let Some(capturer) = ctx.capturer.as_deref_mut() {
        capturer.close();
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Export step
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub exported: usize,
    pub failed: usize,
    pub labeled: usize,
    pub paths: Vec<String>,
}

/// Sorted export paths for what `export_step` would write.
pub fn preview_export(conn: &Connection, settings: &ExportSettings, range: &DateRange) -> Result<Vec<String>> {
    let mut paths: Vec<String> = pending_exports(conn, range)?
        .iter()
        .map(|c| export_path(&settings.base_path, settings.scheme, c.date, &c.vendor, &c.filename))
        .collect();
    paths.sort();
    Ok(paths)
}

/// Copy every pending evidence file to `target`. When `labeler` is set,
/// each exported message gets the exported label once.
pub fn export_step(
    conn: &Connection,
    target: &dyn ExportTarget,
    settings: &ExportSettings,
    range: &DateRange,
    labeler: Option<&dyn MessageProvider>,
) -> Result<ExportSummary> {
    info!(range = %range.label, destination = target.destination(), "starting export step");
    let mut summary = ExportSummary::default();
    let mut labeled: HashSet<String> = HashSet::new();

    for item in pending_exports(conn, range)? {
        let path = export_path(&settings.base_path, settings.scheme, item.date, &item.vendor, &item.filename);
        let outcome = target
            .upload(Path::new(&item.local_path), &path)
            .and_then(|_| record_export(conn, item.evidence_id, target.destination(), &path, item.sha256.as_deref()));
        if let Err(e) = outcome {
            error!(evidence_id = item.evidence_id, error = %e, "export failed");
            summary.failed += 1;
            continue;
        }
        info!(evidence_id = item.evidence_id, vendor = %item.vendor, path = %path, "exported evidence");
        summary.exported += 1;
        summary.paths.push(path);

        if let Some(provider) = labeler {
            if labeled.insert(item.provider_message_id.clone()) {
                match provider.apply_label(&item.provider_message_id, EXPORTED_LABEL) {
                    Ok(()) => summary.labeled += 1,
                    Err(e) => error!(message_id = %item.provider_message_id, error = %e, "failed to label message"),
                }
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::{capturer, Script};
    use crate::db::test_support::{insert_message, test_db};
    use crate::downloader::test_server::{serve, Reply};
    use crate::exporter::LocalFolderTarget;
    use crate::parser::test_support::{attachment, b64, part, raw_message};
    use crate::parser::RawMessage;
    use crate::provider::FixtureProvider;
    use crate::settings::ExportScheme;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
            "January",
        )
        .unwrap()
    }

    fn invoice_message(id: &str) -> RawMessage {
        let mut pdf = attachment("invoice.pdf", "application/pdf", &format!("att-{id}"));
        pdf.body.as_mut().unwrap().data = Some(b64("%PDF-1.4 test"));
        raw_message(
            id,
            "Acme Billing <billing@acme.io>",
            "Your invoice",
            vec![part("text/html", "<p>Thanks for your order</p>"), pdf],
        )
    }

    fn fixture() -> FixtureProvider {
        FixtureProvider::new(vec![
            invoice_message("m1"),
            raw_message(
                "m2",
                "News <news@shop.com>",
                "Weekly deals",
                vec![part("text/html", "<p>Big sale! <a href=\"https://shop.com/u\">unsubscribe</a></p>")],
            ),
        ])
    }

    fn scan_opts(limit: Option<usize>) -> ScanOptions {
        ScanOptions {
            recall: RecallMode::Normal,
            scope: ScanScope::default(),
            limit,
        }
    }

    fn link_settings() -> LinkCaptureSettings {
        LinkCaptureSettings {
            max_per_message: 2,
            ..Default::default()
        }
    }

    fn downloader() -> LinkDownloader {
        LinkDownloader::new("TestAgent/1.0", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_scan_inserts_once_and_skips_existing() {
        let (_dir, conn) = test_db();
        let provider = fixture();

        let first = scan_step(&conn, &provider, &range(), &scan_opts(None)).unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!((first.expense, first.not_expense), (1, 1));
        assert_eq!(first.run.total_inserted, 2);

        let (label, reasons, stubs): (String, String, i64) = conn
            .query_row(
                "SELECT label, reasons_json, (SELECT COUNT(*) FROM evidence_items e WHERE e.message_id = m.id) \
                 FROM messages m WHERE provider_message_id = 'm1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(label, "EXPENSE");
        assert!(reasons.contains("Has PDF attachment"));
        assert_eq!(stubs, 1);

        let second = scan_step(&conn, &provider, &range(), &scan_opts(None)).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped_existing, 2);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_scan_limit_caps_inserts() {
        let (_dir, conn) = test_db();
        let summary = scan_step(&conn, &fixture(), &range(), &scan_opts(Some(1))).unwrap();
        assert_eq!(summary.inserted, 1);
        assert!(summary.capped);
    }

    #[test]
    fn test_evidence_downloads_attachments_and_heals_ids() {
        let (dir, conn) = test_db();
        let provider = fixture();
        scan_step(&conn, &provider, &range(), &scan_opts(None)).unwrap();
        conn.execute("UPDATE evidence_items SET attachment_id = NULL", []).unwrap();

        let dl = downloader();
        let settings = link_settings();
        let ctx = EvidenceContext {
            data_dir: dir.path(),
            link_capture: &settings,
            downloader: &dl,
            capturer: None,
        };
        let summary = evidence_step(&conn, &provider, ctx).unwrap();
        assert_eq!(summary.attachments_healed, 1);
        assert_eq!(summary.attachments_downloaded, 1);

        let (path, sha): (String, String) = conn
            .query_row("SELECT local_path, sha256 FROM evidence_items", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert!(path.ends_with("staging/m1/invoice.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4 test");
        assert_eq!(sha.len(), 64);

        let ctx = EvidenceContext {
            data_dir: dir.path(),
            link_capture: &settings,
            downloader: &dl,
            capturer: None,
        };
        let again = evidence_step(&conn, &provider, ctx).unwrap();
        assert_eq!(again, EvidenceSummary::default());
    }

    fn link_message(conn: &Connection, provider_id: &str, links: &[&str]) -> i64 {
        let id = insert_message(conn, provider_id, "2025-01-10", "EXPENSE", "Acme <a@acme.io>", "acme.io");
        let metas: Vec<LinkMeta> = links
            .iter()
            .map(|u| LinkMeta {
                url: u.to_string(),
                anchor_text: Some("Download invoice".to_string()),
                context: None,
            })
            .collect();
        conn.execute(
            "UPDATE messages SET links_json = ?1 WHERE id = ?2",
            rusqlite::params![serde_json::to_string(&metas).unwrap(), id],
        )
        .unwrap();
        id
    }

    fn link_statuses(conn: &Connection) -> Vec<(String, String)> {
        conn.prepare("SELECT url_original, status FROM evidence_links ORDER BY id")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_link_evidence_stops_after_first_success() {
        let (dir, conn) = test_db();
        let (base, _hits) = serve(|path| match path {
            "/login" => Reply::new(200, "text/html", "<form>Sign in with your password</form>"),
            "/invoice/1.pdf" => Reply::new(200, "application/pdf", "%PDF-1.4 linked"),
            _ => Reply::new(404, "text/plain", "nope"),
        });
        let login = format!("{base}/login");
        let pdf = format!("{base}/invoice/1.pdf");
        let message_id = link_message(&conn, "m1", &[&login, &pdf, &format!("{base}/invoice/never")]);

        let dl = downloader();
        let settings = LinkCaptureSettings {
            max_per_message: 3,
            ..Default::default()
        };
        let provider = FixtureProvider::new(vec![]);
        let ctx = EvidenceContext {
            data_dir: dir.path(),
            link_capture: &settings,
            downloader: &dl,
            capturer: None,
        };
        let summary = evidence_step(&conn, &provider, ctx).unwrap();

        // The pdf scores highest, so it is tried first and ends the message.
        assert_eq!(summary.links_tried, 1);
        assert_eq!(summary.links_downloaded, 1);
        assert_eq!(link_statuses(&conn), vec![(pdf.clone(), "DOWNLOADED".to_string())]);

        let (kind, source, path): (String, String, String) = conn
            .query_row(
                "SELECT kind, source_url, local_path FROM evidence_items WHERE message_id = ?1",
                [message_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(kind, "LINK_FILE");
        assert_eq!(source, pdf);
        assert!(path.contains("evidence/2025/01/m1/links"));
    }

    #[test]
    fn test_login_links_are_not_retried() {
        let (dir, conn) = test_db();
        let (base, hits) = serve(|_| Reply::new(403, "text/html", "forbidden"));
        link_message(&conn, "m1", &[&format!("{base}/invoice")]);

        let dl = downloader();
        let settings = link_settings();
        let provider = FixtureProvider::new(vec![]);
        for _ in 0..2 {
            let ctx = EvidenceContext {
                data_dir: dir.path(),
                link_capture: &settings,
                downloader: &dl,
                capturer: None,
            };
            evidence_step(&conn, &provider, ctx).unwrap();
        }
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(link_statuses(&conn)[0].1, "NEEDS_LOGIN");
    }

    #[test]
    fn test_unsupported_link_is_rendered() {
        let (dir, conn) = test_db();
        let (base, _) = serve(|_| Reply::new(200, "text/html", "<html><body>Your invoice is ready</body></html>"));
        let message_id = link_message(&conn, "m1", &[&format!("{base}/invoice/view")]);

        let dl = downloader();
        let settings = link_settings();
        let provider = FixtureProvider::new(vec![]);
        let (mut cap, log) = capturer(Script::default(), true, &[]);
        let ctx = EvidenceContext {
            data_dir: dir.path(),
            link_capture: &settings,
            downloader: &dl,
            capturer: Some(&mut cap),
        };
        let summary = evidence_step(&conn, &provider, ctx).unwrap();
        assert_eq!(summary.captures, 1);
        assert_eq!(log.borrow().launches, 1);
        assert_eq!(log.borrow().shutdowns, 1);
        assert!(!cap.is_ready());

        let (capture_kind, filename): (String, String) = conn
            .query_row(
                "SELECT capture_kind, filename FROM evidence_items WHERE message_id = ?1",
                [message_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(capture_kind, "LINK_PDF");
        assert!(filename.ends_with(".pdf"));
        assert_eq!(link_statuses(&conn)[0].1, "DOWNLOADED");
    }

    #[test]
    fn test_export_copies_records_and_labels() {
        let (dir, conn) = test_db();
        let provider = fixture();
        scan_step(&conn, &provider, &range(), &scan_opts(None)).unwrap();
        let dl = downloader();
        let link = link_settings();
        let ctx = EvidenceContext {
            data_dir: dir.path(),
            link_capture: &link,
            downloader: &dl,
            capturer: None,
        };
        evidence_step(&conn, &provider, ctx).unwrap();

        let settings = ExportSettings {
            base_path: "/FetchExpense".to_string(),
            scheme: ExportScheme::VendorMonth,
            target_dir: String::new(),
        };
        let preview = preview_export(&conn, &settings, &range()).unwrap();
        assert_eq!(preview.len(), 1);
        assert!(preview[0].starts_with("/FetchExpense/Acme/2025/01 - January/Receipt/"));

        let target = LocalFolderTarget::new(dir.path().join("out"));
        let summary = export_step(&conn, &target, &settings, &range(), Some(&provider)).unwrap();
        assert_eq!((summary.exported, summary.labeled, summary.failed), (1, 1, 0));
        assert_eq!(summary.paths, preview);
        assert_eq!(provider.labels_for("m1"), vec![EXPORTED_LABEL]);
        let copied = dir.path().join("out").join(summary.paths[0].trim_start_matches('/'));
        assert!(copied.is_file());

        let again = export_step(&conn, &target, &settings, &range(), None).unwrap();
        assert_eq!(again.exported, 0);
        assert!(preview_export(&conn, &settings, &range()).unwrap().is_empty());
    }
}
