use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::recurring::{detect_recurring, recurring_threshold, write_recurring_report};

use super::{open_store, RangeArgs};

pub fn run(range: &RangeArgs) -> Result<()> {
    let range = range.resolve()?;
    let (settings, conn) = open_store()?;
    let found = detect_recurring(&conn, &range)?;
    let threshold = recurring_threshold(&range);
    let report = write_recurring_report(&range, &found, &settings.data_path().join("reports"))?;

    if found.is_empty() {
        println!("No vendor billed in {threshold} or more months of {}.", range.label);
        println!("Report: {}", report.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Vendor", "Months", "First", "Last"]);
    for v in &found {
        table.add_row(vec![
            Cell::new(&v.vendor),
            Cell::new(v.count_months()),
            Cell::new(v.months.first().map(String::as_str).unwrap_or("")),
            Cell::new(v.months.last().map(String::as_str).unwrap_or("")),
        ]);
    }
    println!("Recurring vendors ({threshold}+ months): {}\n{table}", range.label);
    println!("Report: {}", report.display());
    Ok(())
}
