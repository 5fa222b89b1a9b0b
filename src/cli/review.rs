use colored::Colorize;
use comfy_table::{Cell, Table};
use tracing::warn;

use crate::error::{AppError, Result};
use crate::fmt::truncate;
use crate::models::Label;
use crate::reviewer::{decision_label_name, get_review_items, mark_decision};

use super::{make_provider, open_store, RangeArgs};

fn parse_label(raw: &str) -> Result<Label> {
    Label::parse(raw)
        .ok_or_else(|| AppError::Other(format!("unknown label '{raw}' (EXPENSE, TO_REVIEW, NOT_EXPENSE)")))
}

fn colored_label(label: Label) -> String {
    match label {
        Label::Expense => label.as_str().green().to_string(),
        Label::ToReview => label.as_str().yellow().to_string(),
        Label::NotExpense => label.as_str().dimmed().to_string(),
    }
}

pub fn list(range: &RangeArgs, label: &str) -> Result<()> {
    let label = parse_label(label)?;
    let range = range.resolve()?;
    let (_, conn) = open_store()?;
    let items = get_review_items(&conn, &range, label)?;

    if items.is_empty() {
        println!("No {} messages in {}.", label.as_str(), range.label);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Vendor", "From", "Subject", "Label", "Score", "Files", "Reasons"]);
    for item in &items {
        table.add_row(vec![
            Cell::new(item.id),
            Cell::new(&item.date),
            Cell::new(&item.vendor),
            Cell::new(truncate(&item.from_header, 32)),
            Cell::new(truncate(&item.subject, 48)),
            Cell::new(colored_label(item.label)),
            Cell::new(item.score),
            Cell::new(item.evidence_count),
            Cell::new(item.reasons.join("; ")),
        ]);
    }
    println!("{table}");
    println!("{} message(s)", items.len());
    Ok(())
}

pub fn mark(id: i64, label: &str, vendor: Option<&str>, note: Option<&str>) -> Result<()> {
    let label = parse_label(label)?;
    let (settings, conn) = open_store()?;
    let provider_id = mark_decision(&conn, id, label, vendor, note)?;
    println!("Marked {id} as {}", colored_label(label));

    if settings.gmail.label_on_decision {
        let applied = make_provider(&settings, None)
            .and_then(|p| p.apply_label(&provider_id, decision_label_name(label)));
        if let Err(e) = applied {
            warn!(message_id = %provider_id, error = %e, "could not mirror decision label");
        }
    }
    Ok(())
}
