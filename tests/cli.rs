use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const FIXTURE: &str = r#"[
  {
    "id": "m1",
    "threadId": "t1",
    "internalDate": "1736510400000",
    "snippet": "Thanks for your order",
    "payload": {
      "mimeType": "multipart/mixed",
      "headers": [
        {"name": "From", "value": "Acme Billing <billing@acme.io>"},
        {"name": "Subject", "value": "Your invoice"}
      ],
      "parts": [
        {"mimeType": "text/html", "body": {"size": 42, "data": "PHA-VGhhbmtzIGZvciB5b3VyIG9yZGVyLCB0b3RhbCAkMTIuNTA8L3A-"}},
        {
          "mimeType": "application/pdf",
          "filename": "invoice.pdf",
          "headers": [{"name": "Content-Disposition", "value": "attachment; filename=\"invoice.pdf\""}],
          "body": {"attachmentId": "att-1", "size": 12, "data": "JVBERi0xLjQgY2xp"}
        }
      ]
    }
  },
  {
    "id": "m2",
    "threadId": "t2",
    "internalDate": "1736596800000",
    "snippet": "",
    "payload": {
      "mimeType": "text/html",
      "headers": [
        {"name": "From", "value": "Shop News <news@shop.com>"},
        {"name": "Subject", "value": "Weekly deals"}
      ],
      "body": {"size": 47, "data": "PHA-QmlnIHNhbGUgdGhpcyB3ZWVrLiBVbnN1YnNjcmliZSBhbnl0aW1lLjwvcD4"}
    }
  }
]"#;

struct Env {
    home: TempDir,
}

impl Env {
    fn new() -> Self {
        Self { home: tempfile::tempdir().unwrap() }
    }

    fn data_dir(&self) -> PathBuf {
        self.home.path().join("data")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("fetchexpense").unwrap();
        cmd.env("HOME", self.home.path())
            .env_remove("RUST_LOG")
            .env_remove("FETCHEXPENSE_GMAIL_TOKEN");
        cmd
    }

    fn init(&self) {
        self.cmd()
            .args(["init", "--data-dir"])
            .arg(self.data_dir())
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized fetchexpense"));
    }

    fn fixture(&self) -> PathBuf {
        let path = self.home.path().join("fixture.json");
        std::fs::write(&path, FIXTURE).unwrap();
        path
    }
}

fn path_arg(p: &Path) -> String {
    p.display().to_string()
}

#[test]
fn init_creates_database_and_status_reports_it() {
    let env = Env::new();
    env.init();
    assert!(env.data_dir().join("fetchexpense.db").exists());
    assert!(env.home.path().join(".config/fetchexpense/settings.json").exists());

    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Messages:       0"));
}

#[test]
fn status_without_init_points_to_init() {
    let env = Env::new();
    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetchexpense init"));
}

#[test]
fn mock_scan_classifies_downloads_and_previews_export() {
    let env = Env::new();
    env.init();
    let fixture = path_arg(&env.fixture());

    env.cmd()
        .args(["scan", "--year", "2025", "--mock", &fixture])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 expense"))
        .stdout(predicate::str::contains("1 not expense"))
        .stdout(predicate::str::contains("Attachments: "));

    // A second scan finds nothing new.
    env.cmd()
        .args(["scan", "--year", "2025", "--mock", &fixture, "--no-evidence"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 already known"));

    let staged = env.data_dir().join("staging").join("m1").join("invoice.pdf");
    assert_eq!(std::fs::read(&staged).unwrap(), b"%PDF-1.4 cli");

    env.cmd()
        .args(["review", "list", "--year", "2025", "--label", "EXPENSE"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Acme"));

    env.cmd()
        .args(["export", "--year", "2025", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/FetchExpense/2025/01 - January/Acme/Receipt/invoice.pdf"));

    env.cmd().args(["export", "--year", "2025"]).assert().success();
    let exported = env
        .data_dir()
        .join("export/FetchExpense/2025/01 - January/Acme/Receipt/invoice.pdf");
    assert!(exported.is_file());

    env.cmd()
        .args(["coverage", "--year", "2025"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Missing evidence"));
}

#[test]
fn bank_import_and_reconcile_write_a_report() {
    let env = Env::new();
    env.init();
    let csv = env.home.path().join("stmt.csv");
    std::fs::write(&csv, "date,amount,description\n2025-01-10,-12.50,ACME IO\n2025-01-12,-3.00,COFFEE\n").unwrap();

    env.cmd()
        .args(["bank", "accounts", "add", "Checking", "--currency", "USD"])
        .assert()
        .success();
    env.cmd()
        .args(["bank", "import", &path_arg(&csv), "--account", "Checking"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 imported"));
    env.cmd()
        .args(["bank", "import", &path_arg(&csv), "--account", "Checking"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 imported"));

    env.cmd()
        .args(["bank", "reconcile", "--account", "Checking", "--year", "2025"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Report:"));
    let reports: Vec<_> = std::fs::read_dir(env.data_dir().join("reports")).unwrap().collect();
    assert_eq!(reports.len(), 1);
}

#[test]
fn unknown_account_fails_with_error_prefix() {
    let env = Env::new();
    env.init();
    env.cmd()
        .args(["bank", "reconcile", "--account", "Nope", "--year", "2025"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: Unknown account"));
}

#[test]
fn inverted_range_is_rejected() {
    let env = Env::new();
    env.init();
    env.cmd()
        .args(["coverage", "--from", "2025-03-01", "--to", "2025-01-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid date range"));
}

#[test]
fn completions_are_generated() {
    let env = Env::new();
    env.cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fetchexpense"));
}

#[test]
fn recurring_writes_json_report() {
    let env = Env::new();
    env.init();
    env.cmd()
        .args(["recurring", "--year", "2025"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Report:"));
    let report = env
        .data_dir()
        .join("reports/recurring_2025-01-01_to_2025-12-31.json");
    assert_eq!(std::fs::read_to_string(report).unwrap(), "[]");
}
