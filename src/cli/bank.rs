use std::path::{Path, PathBuf};

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::importer::{add_account, find_account, import_csv, list_accounts, CsvMapping};
use crate::matcher::{reconcile as run_reconcile, write_report, MatchScoring};
use crate::settings::shellexpand_path;

use super::{open_store, RangeArgs};

pub fn add(name: &str, currency: Option<&str>) -> Result<()> {
    let (_, conn) = open_store()?;
    add_account(&conn, name, currency)?;
    println!("Added account: {name}");
    Ok(())
}

pub fn list() -> Result<()> {
    let (_, conn) = open_store()?;
    let accounts = list_accounts(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Currency"]);
    for a in accounts {
        table.add_row(vec![
            Cell::new(a.id),
            Cell::new(a.name),
            Cell::new(a.currency.unwrap_or_default()),
        ]);
    }
    println!("Accounts\n{table}");
    Ok(())
}

pub fn import(file: &str, account: &str, mapping: &CsvMapping) -> Result<()> {
    let (_, conn) = open_store()?;
    let result = import_csv(&conn, Path::new(file), account, mapping)?;
    println!(
        "{} imported, {} skipped (duplicates) of {} rows",
        result.imported, result.skipped, result.total
    );
    Ok(())
}

pub fn reconcile(account: &str, range: &RangeArgs, output: Option<&str>) -> Result<()> {
    let range = range.resolve()?;
    let (settings, conn) = open_store()?;
    let acct = find_account(&conn, account)?;
    let (from, to) = (range.from_ymd(), range.to_ymd());

    let result = run_reconcile(&conn, acct.id, &from, &to, &MatchScoring::default())?;
    let out_dir = output
        .map(|o| PathBuf::from(shellexpand_path(o)))
        .unwrap_or_else(|| settings.data_path().join("reports"));
    let report = write_report(&conn, acct.id, &from, &to, &out_dir)?;

    println!(
        "{} matched, {} unmatched transactions, {} expenses without a transaction",
        result.matched.to_string().green(),
        if result.unmatched > 0 { result.unmatched.to_string().yellow().to_string() } else { "0".to_string() },
        result.orphans
    );
    println!("Report: {}", report.display());
    Ok(())
}
