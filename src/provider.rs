use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::MessageStub;
use crate::parser::{decode_base64url, MessagePart, RawMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    pub limit: usize,
    pub include_spam_trash: bool,
}

/// Mail backend the scanner and pipeline talk to.
pub trait MessageProvider {
    fn list_messages(&self, query: &str, opts: &ListOptions) -> Result<Vec<MessageStub>>;
    fn get_message(&self, id: &str) -> Result<Option<RawMessage>>;
    fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
    fn apply_label(&self, message_id: &str, label_name: &str) -> Result<()>;
}

/// Offline provider over a JSON array of raw messages. Every query returns
/// every fixture stub, capped at the limit. Attachment bytes come from the
/// fixture's inline `body.data` for the matching part.
pub struct FixtureProvider {
    messages: Vec<RawMessage>,
    labels: RefCell<HashMap<String, Vec<String>>>,
}

impl FixtureProvider {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages,
            labels: RefCell::new(HashMap::new()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let messages: Vec<RawMessage> = serde_json::from_str(&content)?;
        Ok(Self::new(messages))
    }

    pub fn labels_for(&self, message_id: &str) -> Vec<String> {
        self.labels.borrow().get(message_id).cloned().unwrap_or_default()
    }
}

fn find_part<'a>(part: &'a MessagePart, attachment_id: &str) -> Option<&'a MessagePart> {
    let matches = part
        .body
        .as_ref()
        .and_then(|b| b.attachment_id.as_deref())
        .is_some_and(|id| id == attachment_id);
    if matches {
        return Some(part);
    }
    part.parts.iter().find_map(|p| find_part(p, attachment_id))
}

impl MessageProvider for FixtureProvider {
    fn list_messages(&self, _query: &str, opts: &ListOptions) -> Result<Vec<MessageStub>> {
        Ok(self
            .messages
            .iter()
            .take(opts.limit)
            .map(|m| MessageStub {
                id: m.id.clone(),
                thread_id: m.thread_id.clone(),
            })
            .collect())
    }

    fn get_message(&self, id: &str) -> Result<Option<RawMessage>> {
        Ok(self.messages.iter().find(|m| m.id == id).cloned())
    }

    fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let msg = self
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .ok_or_else(|| AppError::Provider(format!("message {message_id} not found")))?;
        let data = msg
            .payload
            .as_ref()
            .and_then(|p| find_part(p, attachment_id))
            .and_then(|p| p.body.as_ref())
            .and_then(|b| b.data.as_deref())
            .ok_or_else(|| AppError::Provider(format!("attachment {attachment_id} not found")))?;
        decode_base64url(data).ok_or_else(|| AppError::Provider("attachment data is not base64url".to_string()))
    }

    fn apply_label(&self, message_id: &str, label_name: &str) -> Result<()> {
        let mut labels = self.labels.borrow_mut();
        let entry = labels.entry(message_id.to_string()).or_default();
        if !entry.iter().any(|l| l == label_name) {
            entry.push(label_name.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::test_support::{attachment, b64, part, raw_message};

    fn provider() -> FixtureProvider {
        let mut pdf = attachment("invoice.pdf", "application/pdf", "att-1");
        pdf.body.as_mut().unwrap().data = Some(b64("%PDF-1.4"));
        FixtureProvider::new(vec![
            raw_message("m1", "a@b.com", "Invoice", vec![part("text/html", "<p>hi</p>"), pdf]),
            raw_message("m2", "c@d.com", "Hello", vec![]),
        ])
    }

    #[test]
    fn test_list_respects_limit() {
        let p = provider();
        let opts = ListOptions { limit: 1, include_spam_trash: false };
        let stubs = p.list_messages("anything", &opts).unwrap();
        assert_eq!(stubs, vec![MessageStub { id: "m1".to_string(), thread_id: "t-m1".to_string() }]);
    }

    #[test]
    fn test_get_message_and_attachment() {
        let p = provider();
        assert!(p.get_message("m2").unwrap().is_some());
        assert!(p.get_message("zzz").unwrap().is_none());
        assert_eq!(p.get_attachment("m1", "att-1").unwrap(), b"%PDF-1.4");
        assert!(p.get_attachment("m1", "nope").is_err());
    }

    #[test]
    fn test_apply_label_is_idempotent() {
        let p = provider();
        p.apply_label("m1", "FetchExpense/Exported").unwrap();
        p.apply_label("m1", "FetchExpense/Exported").unwrap();
        assert_eq!(p.labels_for("m1"), vec!["FetchExpense/Exported"]);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.json");
        let json = serde_json::to_string(&provider().messages).unwrap();
        std::fs::write(&path, json).unwrap();
        let p = FixtureProvider::from_file(&path).unwrap();
        assert_eq!(p.messages.len(), 2);
    }
}
