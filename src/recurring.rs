use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Serialize;

use crate::date_range::{months_in_range, DateRange};
use crate::error::Result;

pub const MIN_RECURRING_MONTHS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecurringVendor {
    pub vendor: String,
    pub months: Vec<String>,
}

impl RecurringVendor {
    pub fn count_months(&self) -> usize {
        self.months.len()
    }
}

/// Distinct months a vendor must appear in for the range to call it
/// recurring.
pub fn recurring_threshold(range: &DateRange) -> usize {
    let half = (months_in_range(range) as f64 * 0.5).ceil() as usize;
    half.max(MIN_RECURRING_MONTHS)
}

/// Sender domains with EXPENSE mail in enough distinct months, most
/// frequent first.
pub fn detect_recurring(conn: &Connection, range: &DateRange) -> Result<Vec<RecurringVendor>> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(from_domain, ''), substr(date, 1, 7) FROM messages \
         WHERE label = 'EXPENSE' AND date >= ?1 AND date <= ?2",
    )?;
    let rows = stmt
        .query_map([range.from_ymd(), range.to_ymd()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut by_vendor: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (vendor, month) in rows {
        if vendor.is_empty() {
            continue;
        }
        by_vendor.entry(vendor).or_default().insert(month);
    }

    let threshold = recurring_threshold(range);
    let mut found: Vec<RecurringVendor> = by_vendor
        .into_iter()
        .filter(|(_, months)| months.len() >= threshold)
        .map(|(vendor, months)| RecurringVendor {
            vendor,
            months: months.into_iter().collect(),
        })
        .collect();
    found.sort_by(|a, b| b.count_months().cmp(&a.count_months()).then_with(|| a.vendor.cmp(&b.vendor)));
    Ok(found)
}

/// Write `found` as `recurring_<from>_to_<to>.json` under `out_dir`.
pub fn write_recurring_report(range: &DateRange, found: &[RecurringVendor], out_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let out_path = out_dir.join(format!("recurring_{}_to_{}.json", range.from_ymd(), range.to_ymd()));
    std::fs::write(&out_path, serde_json::to_string_pretty(found)?)?;
    Ok(out_path)
}
