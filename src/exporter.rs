use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;

use crate::date_range::DateRange;
use crate::error::{AppError, Result};
use crate::settings::ExportScheme;
use crate::vendors::resolve_vendor;

pub const DOC_TYPE: &str = "Receipt";
pub const EXPORTED_LABEL: &str = "FetchExpense/Exported";

// ---------------------------------------------------------------------------
// Path rules
// ---------------------------------------------------------------------------

pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

pub fn sanitize_vendor(vendor: &str) -> String {
    let kept: String = vendor
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    let trimmed = kept.trim();
    if trimmed.is_empty() {
        "Unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `<base>/2025/01 - January/<Vendor>/Receipt/<file>` for MONTH_VENDOR; the
/// other schemes reorder the same segments.
pub fn export_path(base: &str, scheme: ExportScheme, date: NaiveDate, vendor: &str, filename: &str) -> String {
    let year_month = format!("{}/{:02} - {}", date.year(), date.month(), date.format("%B"));
    let vendor = sanitize_vendor(vendor);
    let sub = match scheme {
        ExportScheme::MonthVendor => format!("{year_month}/{vendor}/{DOC_TYPE}"),
        ExportScheme::VendorMonth => format!("{vendor}/{year_month}/{DOC_TYPE}"),
        ExportScheme::TypeMonth => format!("{DOC_TYPE}/{year_month}/{vendor}"),
    };
    let joined = format!("{base}/{sub}/{}", sanitize_filename(filename));

    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Where exported evidence ends up. `destination()` is stored on the
/// export record.
pub trait ExportTarget {
    fn destination(&self) -> &str;
    /// Copy `local` to the slash-separated `remote_path`; returns where it
    /// landed.
    fn upload(&self, local: &Path, remote_path: &str) -> Result<String>;
}

pub struct LocalFolderTarget {
    root: PathBuf,
}

impl LocalFolderTarget {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ExportTarget for LocalFolderTarget {
    fn destination(&self) -> &str {
        "LOCAL"
    }

    fn upload(&self, local: &Path, remote_path: &str) -> Result<String> {
        let mut dest = self.root.clone();
        for segment in remote_path.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(AppError::Other(format!("refusing to export outside the target: {remote_path}")));
            }
            dest.push(segment);
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(local, &dest)?;
        Ok(dest.display().to_string())
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExportCandidate {
    pub evidence_id: i64,
    pub provider_message_id: String,
    pub filename: String,
    pub local_path: String,
    pub sha256: Option<String>,
    pub date: NaiveDate,
    pub vendor: String,
}

/// Resolved evidence on EXPENSE messages in range that has not been
/// exported yet.
pub fn pending_exports(conn: &Connection, range: &DateRange) -> Result<Vec<ExportCandidate>> {
    let mut stmt = conn.prepare(
        "SELECT e.id, m.provider_message_id, e.filename, e.local_path, e.sha256, m.date, \
         COALESCE(m.from_header, ''), COALESCE(m.from_domain, ''), \
         (SELECT d.vendor_override FROM decisions d WHERE d.message_id = m.id \
          ORDER BY d.decided_at DESC, d.id DESC LIMIT 1) \
         FROM evidence_items e JOIN messages m ON e.message_id = m.id \
         WHERE e.local_path IS NOT NULL AND m.label = 'EXPENSE' \
         AND m.date >= ?1 AND m.date <= ?2 \
         AND NOT EXISTS (SELECT 1 FROM exports x WHERE x.evidence_id = e.id) \
         ORDER BY m.date ASC, e.id ASC",
    )?;
    let raw = stmt
        .query_map([range.from_ymd(), range.to_ymd()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(evidence_id, provider_message_id, filename, local_path, sha256, date, header, domain, ov)| {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|_| AppError::Other(format!("message date '{date}' is not YYYY-MM-DD")))?;
            Ok(ExportCandidate {
                evidence_id,
                provider_message_id,
                filename,
                local_path,
                sha256,
                date,
                vendor: resolve_vendor(ov.as_deref(), &header, &domain),
            })
        })
        .collect()
}

pub fn record_export(
    conn: &Connection,
    evidence_id: i64,
    destination: &str,
    export_path: &str,
    sha256: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO exports (evidence_id, destination, export_path, sha256) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![evidence_id, destination, export_path, sha256],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_message, test_db};

    fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_export_path_schemes() {
        let cases = [
            (ExportScheme::MonthVendor, "/FetchExpense/2024/01 - January/Acme/Receipt/inv_1.pdf"),
            (ExportScheme::VendorMonth, "/FetchExpense/Acme/2024/01 - January/Receipt/inv_1.pdf"),
            (ExportScheme::TypeMonth, "/FetchExpense/Receipt/2024/01 - January/Acme/inv_1.pdf"),
        ];
        for (scheme, expected) in cases {
            assert_eq!(export_path("/FetchExpense/", scheme, jan(5), "Acme!", "inv 1.pdf"), expected);
        }
    }

    #[test]
    fn test_sanitizers() {
        assert_eq!(sanitize_filename("חשבונית (3).pdf"), "_________3_.pdf");
        assert_eq!(sanitize_vendor("  ***  "), "Unknown");
        assert_eq!(sanitize_vendor("Café/Bar"), "CaféBar");
    }

    #[test]
    fn test_local_target_copies_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.pdf");
        std::fs::write(&src, b"%PDF").unwrap();
        let target = LocalFolderTarget::new(dir.path().join("out"));
        let landed = target.upload(&src, "/FetchExpense/2024/x.pdf").unwrap();
        assert_eq!(std::fs::read(&landed).unwrap(), b"%PDF");
        assert!(target.upload(&src, "/../escape.pdf").is_err());
    }

    #[test]
    fn test_pending_exports_excludes_recorded() {
        let (_dir, conn) = test_db();
        let m = insert_message(&conn, "m1", "2025-01-10", "EXPENSE", "Acme <a@acme.io>", "acme.io");
        let other = insert_message(&conn, "m2", "2025-01-11", "TO_REVIEW", "", "");
        for (msg, name, path) in [(m, "a.pdf", Some("/x/a.pdf")), (m, "b.pdf", None), (other, "c.pdf", Some("/x/c.pdf"))] {
            conn.execute(
                "INSERT INTO evidence_items (message_id, kind, filename, local_path) VALUES (?1, 'ATTACHMENT', ?2, ?3)",
                rusqlite::params![msg, name, path],
            )
            .unwrap();
        }
        let range = DateRange::new(jan(1).with_year(2025).unwrap(), jan(31).with_year(2025).unwrap(), "t").unwrap();

        let pending = pending_exports(&conn, &range).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].vendor, "Acme");
        assert_eq!(pending[0].filename, "a.pdf");

        record_export(&conn, pending[0].evidence_id, "LOCAL", "/p", None).unwrap();
        record_export(&conn, pending[0].evidence_id, "LOCAL", "/p", None).unwrap();
        assert!(pending_exports(&conn, &range).unwrap().is_empty());
    }
}
