mod capture;
mod classifier;
mod cli;
mod coverage;
mod date_range;
mod db;
mod downloader;
mod error;
mod exporter;
mod fmt;
mod gmail;
mod importer;
mod keywords;
mod links;
mod matcher;
mod models;
mod parser;
mod pipeline;
mod provider;
mod recurring;
mod reviewer;
mod scanner;
mod settings;
mod vendors;

use clap::{CommandFactory, Parser};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use cli::{BankAccountsCommands, BankCommands, Cli, Commands, ReviewCommands};
use importer::CsvMapping;
use settings::load_settings;

/// `--log-level`, then `RUST_LOG`, then the settings file, then `info`.
fn init_logging(cli_level: Option<&str>) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let configured = load_settings().log_level;
            EnvFilter::try_new(&configured).unwrap_or_else(|_| EnvFilter::new("info"))
        }),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Status => cli::status::run(),
        Commands::Scan {
            range,
            recall,
            limit,
            include_spam,
            include_trash,
            mock,
            no_evidence,
        } => cli::scan::run(cli::scan::ScanArgs {
            range: &range,
            recall: &recall,
            limit,
            include_spam,
            include_trash,
            mock: mock.as_deref(),
            no_evidence,
        }),
        Commands::Evidence { mock, render } => cli::evidence::run(mock.as_deref(), render),
        Commands::Export { range, dry_run } => cli::export::run(&range, dry_run),
        Commands::Review { command } => match command {
            ReviewCommands::List { range, label } => cli::review::list(&range, &label),
            ReviewCommands::Mark { id, label, vendor, note } => {
                cli::review::mark(id, &label, vendor.as_deref(), note.as_deref())
            }
        },
        Commands::Coverage { range, by_month, items } => cli::coverage::run(&range, by_month, items.as_deref()),
        Commands::Recurring { range } => cli::recurring::run(&range),
        Commands::Bank { command } => match command {
            BankCommands::Accounts { command } => match command {
                BankAccountsCommands::Add { name, currency } => cli::bank::add(&name, currency.as_deref()),
                BankAccountsCommands::List => cli::bank::list(),
            },
            BankCommands::Import {
                file,
                account,
                currency,
                date_col,
                amount_col,
                desc_col,
                currency_col,
                date_format,
            } => cli::bank::import(
                &file,
                &account,
                &CsvMapping {
                    date_col,
                    amount_col,
                    desc_col,
                    currency_col,
                    date_format,
                    default_currency: currency,
                },
            ),
            BankCommands::Reconcile { account, range, output } => {
                cli::bank::reconcile(&account, &range, output.as_deref())
            }
        },
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "fetchexpense", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
