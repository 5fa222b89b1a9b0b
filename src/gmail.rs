use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::MessageStub;
use crate::parser::{decode_base64url, RawMessage};
use crate::provider::{ListOptions, MessageProvider};

pub const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
pub const TOKEN_ENV: &str = "FETCHEXPENSE_GMAIL_TOKEN";
const PAGE_SIZE: usize = 100;
#[cfg(feature = "keyring")]
const KEYRING_SERVICE: &str = "fetchexpense";
#[cfg(feature = "keyring")]
const KEYRING_USER: &str = "gmail";

// ---------------------------------------------------------------------------
// Token loading
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TokenFile {
    access_token: String,
}

/// Resolve a bearer token: the environment variable, then the token file
/// (raw token or a JSON object with `access_token`), then the OS keyring.
pub fn load_token(token_path: &Path) -> Result<String> {
    load_token_from(std::env::var(TOKEN_ENV).ok(), token_path)
}

fn load_token_from(env_value: Option<String>, token_path: &Path) -> Result<String> {
    if let Some(token) = env_value.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        return Ok(token);
    }
    if token_path.exists() {
        let content = std::fs::read_to_string(token_path)?;
        let trimmed = content.trim();
        if trimmed.starts_with('{') {
            let parsed: TokenFile = serde_json::from_str(trimmed)?;
            return Ok(parsed.access_token);
        }
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    if let Some(token) = keyring_token() {
        return Ok(token);
    }
    Err(AppError::MissingCredentials(format!(
        "no Gmail access token; set {TOKEN_ENV} or write one to {}",
        token_path.display()
    )))
}

#[cfg(feature = "keyring")]
fn keyring_token() -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .and_then(|e| e.get_password())
        .ok()
}

#[cfg(not(feature = "keyring"))]
fn keyring_token() -> Option<String> {
    None
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct AttachmentResponse {
    #[serde(default)]
    data: String,
}

#[derive(Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct LabelsResponse {
    #[serde(default)]
    labels: Vec<GmailLabel>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Gmail REST v1 over a pre-acquired bearer token.
pub struct GmailClient {
    http: Client,
    base_url: String,
    token: String,
    label_ids: RefCell<HashMap<String, String>>,
}

impl GmailClient {
    pub fn new(token: String) -> Result<Self> {
        Self::with_base_url(token, API_BASE)
    }

    pub fn with_base_url(token: String, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            label_ids: RefCell::new(HashMap::new()),
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(format!("{}{path}", self.base_url)).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http.post(format!("{}{path}", self.base_url)).bearer_auth(&self.token)
    }

    fn ensure_label(&self, name: &str) -> Result<String> {
        if let Some(id) = self.label_ids.borrow().get(name) {
            return Ok(id.clone());
        }
        let listed: LabelsResponse = check(self.get("/labels").send()?)?.json()?;
        let id = match listed.labels.into_iter().find(|l| l.name == name) {
            Some(existing) => existing.id,
            None => {
                info!(label = name, "creating Gmail label");
                let body = serde_json::json!({
                    "name": name,
                    "labelListVisibility": "labelShow",
                    "messageListVisibility": "show",
                });
                let created: GmailLabel = check(self.post("/labels").json(&body).send()?)?.json()?;
                created.id
            }
        };
        self.label_ids.borrow_mut().insert(name.to_string(), id.clone());
        Ok(id)
    }
}

fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status.as_u16() == 401 {
        return Err(AppError::MissingCredentials("Gmail rejected the access token".to_string()));
    }
    let body = resp.text().unwrap_or_default();
    let detail: String = body.chars().take(200).collect();
    Err(AppError::Provider(format!("Gmail API {status}: {detail}")))
}

impl MessageProvider for GmailClient {
    fn list_messages(&self, query: &str, opts: &ListOptions) -> Result<Vec<MessageStub>> {
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;
        let page_size = PAGE_SIZE.to_string();

        while all.len() < opts.limit {
            let mut req = self.get("/messages").query(&[("q", query), ("maxResults", page_size.as_str())]);
            if opts.include_spam_trash {
                req = req.query(&[("includeSpamTrash", "true")]);
            }
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let page: ListResponse = check(req.send()?)?.json()?;
            pages += 1;
            all.extend(page.messages.into_iter().filter(|m| !m.id.is_empty()));
            debug!(pages, total = all.len(), "fetched message list page");

            match page.next_page_token {
                Some(t) if !t.is_empty() => page_token = Some(t),
                _ => break,
            }
        }

        all.truncate(opts.limit);
        Ok(all)
    }

    fn get_message(&self, id: &str) -> Result<Option<RawMessage>> {
        let resp = self.get(&format!("/messages/{id}")).query(&[("format", "full")]).send()?;
        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        Ok(Some(check(resp)?.json()?))
    }

    fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let att: AttachmentResponse = check(
            self.get(&format!("/messages/{message_id}/attachments/{attachment_id}"))
                .send()?,
        )?
        .json()?;
        decode_base64url(&att.data).ok_or_else(|| AppError::Provider("attachment data is not base64url".to_string()))
    }

    fn apply_label(&self, message_id: &str, label_name: &str) -> Result<()> {
        let label_id = self.ensure_label(label_name)?;
        let body = serde_json::json!({ "addLabelIds": [label_id], "removeLabelIds": [] });
        check(self.post(&format!("/messages/{message_id}/modify")).json(&body).send()?)?;
        info!(message_id, label = label_name, "applied Gmail label");
        Ok(())
    }
}
