use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::{AppError, Result};
use crate::models::RecallMode;
use crate::pipeline::{scan_step, ScanOptions, ScanSummary};
use crate::scanner::ScanScope;

use super::evidence::{collect, print_summary};
use super::{make_provider, open_store, RangeArgs};

pub struct ScanArgs<'a> {
    pub range: &'a RangeArgs,
    pub recall: &'a str,
    pub limit: Option<usize>,
    pub include_spam: bool,
    pub include_trash: bool,
    pub mock: Option<&'a str>,
    pub no_evidence: bool,
}

fn print_buckets(summary: &ScanSummary) {
    let mut table = Table::new();
    table.set_header(vec!["Bucket", "Found", "New", "Truncated"]);
    for b in &summary.run.buckets {
        table.add_row(vec![
            Cell::new(&b.name),
            Cell::new(b.found),
            Cell::new(b.inserted),
            Cell::new(if b.truncated { "yes".yellow().to_string() } else { String::new() }),
        ]);
    }
    println!("{table}");
}

pub fn run(args: ScanArgs<'_>) -> Result<()> {
    let recall = RecallMode::parse(args.recall)
        .ok_or_else(|| AppError::Other(format!("unknown recall mode '{}' (normal, high, strict)", args.recall)))?;
    let range = args.range.resolve()?;
    let (settings, conn) = open_store()?;
    let provider = make_provider(&settings, args.mock)?;

    let opts = ScanOptions {
        recall,
        scope: ScanScope {
            include_spam: args.include_spam || settings.gmail.include_spam,
            include_trash: args.include_trash || settings.gmail.include_trash,
        },
        limit: args.limit,
    };
    println!("Scanning {} ({} to {}), mode {}", range.label, range.from_ymd(), range.to_ymd(), recall.as_str());
    let summary = scan_step(&conn, provider.as_ref(), &range, &opts)?;

    print_buckets(&summary);
    println!(
        "{} new ({} expense, {} to review, {} not expense), {} already known, {} failed",
        summary.inserted.to_string().green(),
        summary.expense,
        summary.to_review,
        summary.not_expense,
        summary.skipped_existing,
        summary.failed
    );
    if let Some(reason) = &summary.run.truncation_reason {
        println!("{} {reason}", "Truncated:".yellow());
    }
    if summary.capped {
        println!("{}", "Stopped at --limit; run again to continue.".yellow());
    }

    if !args.no_evidence {
        let evidence = collect(&conn, &settings, provider.as_ref(), false)?;
        print_summary(&evidence);
    }
    Ok(())
}
