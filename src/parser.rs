use std::collections::HashSet;
use std::sync::OnceLock;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::models::{AnalyzedMessage, AttachmentMeta, LinkMeta};

// ---------------------------------------------------------------------------
// Provider wire format (Gmail users.messages resource, format=full)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub part_id: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub data: Option<String>,
}

impl MessagePart {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn is_attachment_disposition(&self) -> bool {
        self.header("Content-Disposition")
            .map(|v| v.to_ascii_lowercase().contains("attachment"))
            .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Statics
// ---------------------------------------------------------------------------

const ANCHOR_TEXT_MAX: usize = 100;
const CONTEXT_MAX: usize = 160;

fn b64_engine() -> &'static GeneralPurpose {
    static ENGINE: OnceLock<GeneralPurpose> = OnceLock::new();
    ENGINE.get_or_init(|| {
        GeneralPurpose::new(
            &alphabet::URL_SAFE,
            GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
        )
    })
}

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("invalid ws regex"))
}

fn anchor_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<a\s[^>]*>.*?</a>").expect("invalid anchor regex"))
}

fn bare_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"']+"#).expect("invalid url regex"))
}

fn angle_email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([^<>\s]+@[^<>\s]+)>").expect("invalid email regex"))
}

fn bare_email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+").expect("invalid email regex"))
}

fn anchor_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a[href]").expect("invalid anchor selector"))
}

// ---------------------------------------------------------------------------
// Decoding helpers
// ---------------------------------------------------------------------------

/// Decode Gmail base64url data. Accepts padded or unpadded input and the
/// standard alphabet as a fallback.
pub fn decode_base64url(data: &str) -> Option<Vec<u8>> {
    let normalized: String = data
        .trim()
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .filter(|c| !c.is_whitespace())
        .collect();
    b64_engine().decode(normalized).ok()
}

fn decode_text(data: &str) -> String {
    decode_base64url(data)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

pub fn collapse_whitespace(s: &str) -> String {
    ws_re().replace_all(s.trim(), " ").trim().to_string()
}

/// Visible text of an HTML document with whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let doc = Html::parse_document(html);
    collapse_whitespace(&doc.root_element().text().collect::<Vec<_>>().join(" "))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Strip the fragment and surrounding whitespace.
pub fn normalize_url(url: &str) -> String {
    url.split('#').next().unwrap_or("").trim().to_string()
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Extract `(email, domain)` from a From header, both lowercased.
/// Returns empty strings when no address is present.
pub fn parse_from_header(from: &str) -> (String, String) {
    let email = angle_email_re()
        .captures(from)
        .and_then(|c| c.get(1))
        .or_else(|| bare_email_re().find(from))
        .map(|m| m.as_str().trim().to_ascii_lowercase())
        .unwrap_or_default();
    let domain = email
        .rsplit_once('@')
        .map(|(_, d)| d.trim_end_matches('.').to_string())
        .unwrap_or_default();
    (email, domain)
}

// ---------------------------------------------------------------------------
// MIME traversal
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Walk {
    best_html: String,
    best_text: String,
    attachments: Vec<AttachmentMeta>,
}

fn walk(part: &MessagePart, acc: &mut Walk) {
    if !part.filename.is_empty() {
        if let Some(body) = &part.body {
            if let Some(id) = body.attachment_id.as_ref().filter(|id| !id.is_empty()) {
                acc.attachments.push(AttachmentMeta {
                    filename: part.filename.clone(),
                    mime_type: part.mime_type.to_ascii_lowercase(),
                    size: body.size,
                    attachment_id: Some(id.clone()),
                });
            }
        }
        if part.is_attachment_disposition() {
            return;
        }
    }

    let mime = part.mime_type.to_ascii_lowercase();
    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
        if mime == "text/html" {
            let content = decode_text(data);
            if content.len() > acc.best_html.len() {
                acc.best_html = content;
            }
        } else if mime == "text/plain" {
            let content = decode_text(data);
            if content.len() > acc.best_text.len() {
                acc.best_text = content;
            }
        }
    }

    for sub in &part.parts {
        walk(sub, acc);
    }
}

fn message_date(raw: &RawMessage, payload: Option<&MessagePart>) -> DateTime<Utc> {
    if let Some(ms) = raw.internal_date.as_deref().and_then(|s| s.parse::<i64>().ok()) {
        if let Some(dt) = Utc.timestamp_millis_opt(ms).single() {
            return dt;
        }
    }
    payload
        .and_then(|p| p.header("Date"))
        .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Build an [`AnalyzedMessage`] from a provider message.
pub fn parse_message(raw: &RawMessage) -> AnalyzedMessage {
    let payload = raw.payload.as_ref();
    let mut acc = Walk::default();
    if let Some(p) = payload {
        walk(p, &mut acc);
    }

    let body_html = if acc.best_html.is_empty() && !acc.best_text.is_empty() {
        format!("<pre>{}</pre>", escape_html(&acc.best_text))
    } else {
        acc.best_html
    };

    let header = |name: &str| payload.and_then(|p| p.header(name)).unwrap_or("").to_string();
    let links = extract_links(&body_html);

    AnalyzedMessage {
        id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        date: message_date(raw, payload),
        from: header("From"),
        subject: header("Subject"),
        snippet: raw.snippet.clone().unwrap_or_default(),
        body_html,
        attachments: acc.attachments,
        links,
    }
}

// ---------------------------------------------------------------------------
// Link extraction
// ---------------------------------------------------------------------------

/// Anchors first (with their text and surrounding context), then bare URLs
/// found outside anchors. Each normalized URL appears once.
pub fn extract_links(html: &str) -> Vec<LinkMeta> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut links = Vec::new();
    if html.is_empty() {
        return links;
    }

    let doc = Html::parse_document(html);
    for a in doc.select(anchor_selector()) {
        let Some(href) = a.value().attr("href") else { continue };
        let url = normalize_url(href);
        let lower = url.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            continue;
        }
        if !seen.insert(url.clone()) {
            continue;
        }
        let anchor = collapse_whitespace(&a.text().collect::<Vec<_>>().join(" "));
        let context = a
            .parent()
            .and_then(scraper::ElementRef::wrap)
            .map(|p| collapse_whitespace(&p.text().collect::<Vec<_>>().join(" ")))
            .filter(|c| !c.is_empty())
            .map(|c| truncate_chars(&c, CONTEXT_MAX));
        links.push(LinkMeta {
            url,
            anchor_text: Some(truncate_chars(&anchor, ANCHOR_TEXT_MAX)).filter(|t| !t.is_empty()),
            context,
        });
    }

    let without_anchors = anchor_block_re().replace_all(html, " ");
    for m in bare_url_re().find_iter(&without_anchors) {
        let raw = m.as_str().trim_end_matches(&['.', ',', ';', ')', ']'][..]);
        let url = normalize_url(&raw.replace("&amp;", "&"));
        if url.is_empty() || !seen.insert(url.clone()) {
            continue;
        }
        links.push(LinkMeta {
            url,
            anchor_text: None,
            context: None,
        });
    }

    links
}
