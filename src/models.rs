use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enumerations stored as TEXT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Expense,
    ToReview,
    NotExpense,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "EXPENSE",
            Self::ToReview => "TO_REVIEW",
            Self::NotExpense => "NOT_EXPENSE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "EXPENSE" => Some(Self::Expense),
            "TO_REVIEW" => Some(Self::ToReview),
            "NOT_EXPENSE" => Some(Self::NotExpense),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    Attachment,
    LinkFile,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attachment => "ATTACHMENT",
            Self::LinkFile => "LINK_FILE",
        }
    }
}

/// Lifecycle of a candidate invoice link. `Downloading` is the only
/// non-terminal state that is ever persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkStatus {
    Downloading,
    Downloaded,
    NeedsLogin,
    Unsupported,
    #[default]
    Failed,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Downloading => "DOWNLOADING",
            Self::Downloaded => "DOWNLOADED",
            Self::NeedsLogin => "NEEDS_LOGIN",
            Self::Unsupported => "UNSUPPORTED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "DOWNLOADING" => Some(Self::Downloading),
            "DOWNLOADED" => Some(Self::Downloaded),
            "NEEDS_LOGIN" => Some(Self::NeedsLogin),
            "UNSUPPORTED" => Some(Self::Unsupported),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecallMode {
    Normal,
    HighRecall,
    HighRecallStrict,
}

impl RecallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::HighRecall => "HIGH_RECALL",
            Self::HighRecallStrict => "HIGH_RECALL_STRICT",
        }
    }

    /// Accepts both the stored form and the CLI shorthands.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "high" | "high_recall" => Some(Self::HighRecall),
            "strict" | "high_strict" | "high_recall_strict" => Some(Self::HighRecallStrict),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    LinkPdf,
    LinkScreenshot,
    LinkHtmlSnapshot,
}

impl CaptureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LinkPdf => "LINK_PDF",
            Self::LinkScreenshot => "LINK_SCREENSHOT",
            Self::LinkHtmlSnapshot => "LINK_HTML_SNAPSHOT",
        }
    }
}

// ---------------------------------------------------------------------------
// Parsed message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
    pub attachment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkMeta {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// One raw provider message after MIME traversal. Immutable once built.
#[derive(Debug, Clone)]
pub struct AnalyzedMessage {
    pub id: String,
    pub thread_id: String,
    pub date: DateTime<Utc>,
    pub from: String,
    pub subject: String,
    pub snippet: String,
    pub body_html: String,
    pub attachments: Vec<AttachmentMeta>,
    pub links: Vec<LinkMeta>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub score: i32,
    pub label: Label,
    pub reasons: Vec<String>,
}

/// What a provider search returns before the full message is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStub {
    pub id: String,
    #[serde(rename = "threadId", default)]
    pub thread_id: String,
}

// ---------------------------------------------------------------------------
// Persisted rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BankAccount {
    pub id: i64,
    pub name: String,
    pub currency: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BankTransaction {
    pub id: i64,
    pub account_id: i64,
    pub txn_date: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub description: String,
}

/// Intermediate representation from the CSV parser before DB insert.
#[derive(Debug, Clone)]
pub struct ParsedTxn {
    pub txn_date: String,
    pub amount: f64,
    pub description: String,
    pub currency: Option<String>,
    pub raw_row_json: String,
    pub row_hash: String,
    pub merchant_hint: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxnMatch {
    pub txn_id: i64,
    pub message_id: i64,
    pub match_score: i32,
    pub match_reason: String,
}
