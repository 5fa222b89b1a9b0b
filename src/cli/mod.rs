pub mod bank;
pub mod coverage;
pub mod evidence;
pub mod export;
pub mod init;
pub mod recurring;
pub mod review;
pub mod scan;
pub mod status;

use std::path::Path;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use rusqlite::Connection;

use crate::date_range::{resolve_date_range, DateRange, DateRangeArgs};
use crate::db::open_in;
use crate::error::Result;
use crate::gmail::{load_token, GmailClient};
use crate::provider::{FixtureProvider, MessageProvider};
use crate::settings::{load_settings, Settings};

/// Settings plus an open, initialised database.
pub(crate) fn open_store() -> Result<(Settings, Connection)> {
    let settings = load_settings();
    let conn = open_in(&settings.data_path())?;
    Ok((settings, conn))
}

/// `--mock FIXTURE` selects the offline provider; otherwise Gmail.
pub(crate) fn make_provider(settings: &Settings, mock: Option<&str>) -> Result<Box<dyn MessageProvider>> {
    match mock {
        Some(path) => Ok(Box::new(FixtureProvider::from_file(Path::new(path))?)),
        None => {
            let token = load_token(&settings.gmail_token_path())?;
            Ok(Box::new(GmailClient::new(token)?))
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct RangeArgs {
    /// Start date: YYYY-MM-DD
    #[arg(long)]
    pub from: Option<String>,
    /// End date: YYYY-MM-DD
    #[arg(long)]
    pub to: Option<String>,
    /// this_year, last_year, ytd, last_12_months or custom
    #[arg(long)]
    pub preset: Option<String>,
    /// Calendar year, e.g. 2025
    #[arg(long)]
    pub year: Option<i32>,
    /// Single month: YYYY-MM
    #[arg(long)]
    pub month: Option<String>,
}

impl RangeArgs {
    pub fn resolve(&self) -> Result<DateRange> {
        resolve_date_range(&DateRangeArgs {
            preset: self.preset.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            year: self.year,
            month: self.month.clone(),
        })
    }
}

#[derive(Parser)]
#[command(
    name = "fetchexpense",
    version,
    about = "Finds expense emails, collects invoice evidence, and reconciles it against bank statements."
)]
pub struct Cli {
    /// Log filter (overrides RUST_LOG and the settings file), e.g. debug
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for fetchexpense data (default: ~/Documents/fetchexpense)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Show the data directory and database counts.
    Status,
    /// Search the mailbox for expense messages and classify them.
    Scan {
        #[command(flatten)]
        range: RangeArgs,
        /// Recall mode: normal, high or strict
        #[arg(long, default_value = "normal")]
        recall: String,
        /// Stop after inserting this many new messages
        #[arg(long)]
        limit: Option<usize>,
        /// Also search spam
        #[arg(long = "include-spam")]
        include_spam: bool,
        /// Also search trash
        #[arg(long = "include-trash")]
        include_trash: bool,
        /// Read messages from a JSON fixture instead of Gmail
        #[arg(long)]
        mock: Option<String>,
        /// Skip the evidence step after scanning
        #[arg(long = "no-evidence")]
        no_evidence: bool,
    },
    /// Download attachments and invoice links for EXPENSE messages.
    Evidence {
        /// Read messages from a JSON fixture instead of Gmail
        #[arg(long)]
        mock: Option<String>,
        /// Render unsupported links in a headless browser
        #[arg(long)]
        render: bool,
    },
    /// Copy collected evidence into the export folder.
    Export {
        #[command(flatten)]
        range: RangeArgs,
        /// Print the export paths without copying anything
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
    /// List or decide on classified messages.
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
    /// Summarize how complete the evidence is for a range.
    Coverage {
        #[command(flatten)]
        range: RangeArgs,
        /// Break the summary down per month
        #[arg(long = "by-month")]
        by_month: bool,
        /// List message ids instead: to_review, missing_evidence or missing_amount
        #[arg(long)]
        items: Option<String>,
    },
    /// List vendors that bill in most months of a range.
    Recurring {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Bank accounts, statement imports and reconciliation.
    Bank {
        #[command(subcommand)]
        command: BankCommands,
    },
    /// Print a shell completion script.
    Completions {
        /// bash, zsh, fish, elvish or powershell
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// List messages with a given label.
    List {
        #[command(flatten)]
        range: RangeArgs,
        /// EXPENSE, TO_REVIEW or NOT_EXPENSE
        #[arg(long, default_value = "TO_REVIEW")]
        label: String,
    },
    /// Record a decision for one message.
    Mark {
        /// Message id as shown by `review list`
        id: i64,
        /// EXPENSE, TO_REVIEW or NOT_EXPENSE
        label: String,
        /// Vendor name to use instead of the sender
        #[arg(long)]
        vendor: Option<String>,
        /// Free-form note
        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BankCommands {
    /// Manage bank accounts.
    Accounts {
        #[command(subcommand)]
        command: BankAccountsCommands,
    },
    /// Import a bank statement CSV.
    Import {
        /// Path to the CSV file
        file: String,
        /// Account name to import into
        #[arg(long)]
        account: String,
        /// Currency for rows without a currency column
        #[arg(long)]
        currency: Option<String>,
        /// Zero-based date column
        #[arg(long = "date-col", default_value_t = 0)]
        date_col: usize,
        /// Zero-based amount column
        #[arg(long = "amount-col", default_value_t = 1)]
        amount_col: usize,
        /// Zero-based description column
        #[arg(long = "desc-col", default_value_t = 2)]
        desc_col: usize,
        /// Zero-based currency column
        #[arg(long = "currency-col")]
        currency_col: Option<usize>,
        /// strftime format for the date column, e.g. %d/%m/%Y
        #[arg(long = "date-format")]
        date_format: Option<String>,
    },
    /// Match transactions to EXPENSE messages and write a CSV report.
    Reconcile {
        /// Account name
        #[arg(long)]
        account: String,
        #[command(flatten)]
        range: RangeArgs,
        /// Report directory (default: <data_dir>/reports)
        #[arg(long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BankAccountsCommands {
    /// Add a bank account.
    Add {
        /// Account name, e.g. 'Leumi Checking'
        name: String,
        /// ISO currency code, e.g. ILS
        #[arg(long)]
        currency: Option<String>,
    },
    /// List bank accounts.
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_scan_flags() {
        let cli = Cli::try_parse_from([
            "fetchexpense", "scan", "--year", "2025", "--recall", "high", "--limit", "10", "--include-spam",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan { range, recall, limit, include_spam, include_trash, .. } => {
                assert_eq!(range.year, Some(2025));
                assert_eq!(recall, "high");
                assert_eq!(limit, Some(10));
                assert!(include_spam && !include_trash);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn test_range_args_resolve() {
        let args = RangeArgs {
            from: Some("2025-01-01".into()),
            to: Some("2025-01-31".into()),
            ..Default::default()
        };
        let range = args.resolve().unwrap();
        assert_eq!(range.to_ymd(), "2025-01-31");
        let bad = RangeArgs {
            from: Some("2025-02-01".into()),
            to: Some("2025-01-01".into()),
            ..Default::default()
        };
        assert!(bad.resolve().is_err());
    }
}
