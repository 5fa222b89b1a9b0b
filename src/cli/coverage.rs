use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::coverage::{coverage_by_month, coverage_summary, incomplete_item_ids, parse_incomplete_kind};
use crate::error::Result;

use super::{open_store, RangeArgs};

fn warn_count(n: i64) -> String {
    if n > 0 {
        n.to_string().red().to_string()
    } else {
        n.to_string()
    }
}

pub fn run(range: &RangeArgs, by_month: bool, items: Option<&str>) -> Result<()> {
    let range = range.resolve()?;
    let (_, conn) = open_store()?;

    if let Some(kind) = items {
        let kind = parse_incomplete_kind(kind)?;
        let ids = incomplete_item_ids(&conn, &range, kind)?;
        for id in &ids {
            println!("{id}");
        }
        println!("{} message(s)", ids.len());
        return Ok(());
    }

    if by_month {
        let months = coverage_by_month(&conn, &range)?;
        let mut table = Table::new();
        table.set_header(vec!["Month", "Total", "Expense", "To Review", "Missing Evidence", "Missing Amount"]);
        for m in &months {
            table.add_row(vec![
                Cell::new(&m.month),
                Cell::new(m.total),
                Cell::new(m.expense),
                Cell::new(m.to_review),
                Cell::new(warn_count(m.missing_evidence)),
                Cell::new(m.missing_amount),
            ]);
        }
        println!("Coverage by month: {}\n{table}", range.label);
        return Ok(());
    }

    let s = coverage_summary(&conn, &range)?;
    let mut table = Table::new();
    table.set_header(vec!["Metric", "Count"]);
    for (metric, value) in [
        ("Messages", s.total.to_string()),
        ("Expense", s.expense.to_string()),
        ("To review", s.to_review.to_string()),
        ("Not expense", s.not_expense.to_string()),
        ("Missing evidence", warn_count(s.missing_evidence)),
        ("Missing amount", s.missing_amount.to_string()),
        ("Unmatched bank txns", warn_count(s.unmatched_txns)),
    ] {
        table.add_row(vec![Cell::new(metric), Cell::new(value)]);
    }
    println!("Coverage: {} ({} to {})\n{table}", range.label, range.from_ymd(), range.to_ymd());
    Ok(())
}
