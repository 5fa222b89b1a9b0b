use std::sync::OnceLock;

use regex::Regex;

use crate::keywords::{
    contains_any, contains_expense_keyword, CURRENCY_SYMBOLS, INVOICE_URL_KEYWORDS, UNSUBSCRIBE_PATTERNS,
};
use crate::models::{AnalyzedMessage, ClassificationResult, Label};
use crate::parser::html_to_text;

pub const EXPENSE_THRESHOLD: i32 = 6;
pub const REVIEW_THRESHOLD: i32 = 3;

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+[.,]\d+").expect("invalid amount regex"))
}

fn label_for(score: i32) -> Label {
    if score >= EXPENSE_THRESHOLD {
        Label::Expense
    } else if score >= REVIEW_THRESHOLD {
        Label::ToReview
    } else {
        Label::NotExpense
    }
}

/// Score a parsed message. Pure and deterministic: reasons appear in rule
/// order, and the invoice-link bonus is applied after thresholds so it can
/// lift NOT_EXPENSE to TO_REVIEW but never produce EXPENSE on its own.
pub fn classify(msg: &AnalyzedMessage) -> ClassificationResult {
    let mut score = 0;
    let mut reasons = Vec::new();

    let subject = msg.subject.to_lowercase();
    let snippet = msg.snippet.to_lowercase();
    let body = html_to_text(&msg.body_html).to_lowercase();

    let has_pdf = msg
        .attachments
        .iter()
        .any(|a| a.mime_type.eq_ignore_ascii_case("application/pdf") || a.filename.to_lowercase().ends_with(".pdf"));
    if has_pdf {
        score += 5;
        reasons.push("Has PDF attachment".to_string());
    }

    let keyword_image = msg
        .attachments
        .iter()
        .any(|a| a.mime_type.to_ascii_lowercase().starts_with("image/") && contains_expense_keyword(&a.filename.to_lowercase()));
    if keyword_image {
        score += 3;
        reasons.push("Image attachment with invoice keyword".to_string());
    }

    if contains_expense_keyword(&subject) {
        score += 2;
        reasons.push("Subject contains keywords".to_string());
    }

    if contains_any(&body, CURRENCY_SYMBOLS) && amount_re().is_match(&body) {
        score += 2;
        reasons.push("Body contains currency and amount".to_string());
    }

    if contains_any(&body, UNSUBSCRIBE_PATTERNS) || contains_any(&snippet, UNSUBSCRIBE_PATTERNS) {
        score -= 3;
        reasons.push("Newsletter patterns detected".to_string());
    }

    let mut label = label_for(score);

    let invoice_link = msg
        .links
        .iter()
        .any(|l| contains_any(&l.url.to_lowercase(), INVOICE_URL_KEYWORDS));
    if invoice_link {
        score += 3;
        reasons.push("Invoice link detected".to_string());
        if label == Label::NotExpense {
            label = Label::ToReview;
        }
    }

    ClassificationResult { score, label, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttachmentMeta, LinkMeta};

    fn msg(subject: &str, body_html: &str, attachments: Vec<AttachmentMeta>, links: Vec<LinkMeta>) -> AnalyzedMessage {
        AnalyzedMessage {
            id: "m".to_string(),
            thread_id: "t".to_string(),
            date: chrono::Utc::now(),
            from: "Shop <billing@shop.io>".to_string(),
            subject: subject.to_string(),
            snippet: String::new(),
            body_html: body_html.to_string(),
            attachments,
            links,
        }
    }

    fn att(filename: &str, mime: &str) -> AttachmentMeta {
        AttachmentMeta {
            filename: filename.to_string(),
            mime_type: mime.to_string(),
            size: 100,
            attachment_id: Some("a".to_string()),
        }
    }

    fn link(url: &str) -> LinkMeta {
        LinkMeta { url: url.to_string(), anchor_text: None, context: None }
    }

    #[test]
    fn test_pdf_alone_is_to_review() {
        let r = classify(&msg("Hello", "", vec![att("doc.PDF", "application/octet-stream")], vec![]));
        assert_eq!(r.score, 5);
        assert_eq!(r.label, Label::ToReview);
        assert_eq!(r.reasons, vec!["Has PDF attachment"]);
    }

    #[test]
    fn test_pdf_with_keyword_subject_is_expense() {
        let r = classify(&msg("Your invoice #123", "", vec![att("a.pdf", "application/pdf")], vec![]));
        assert_eq!(r.score, 7);
        assert_eq!(r.label, Label::Expense);
        assert_eq!(r.reasons, vec!["Has PDF attachment", "Subject contains keywords"]);
    }

    #[test]
    fn test_image_needs_keyword_in_its_own_name() {
        let attachments = vec![att("receipt.pdf", "application/pdf"), att("logo.png", "image/png")];
        let r = classify(&msg("Hi", "", attachments, vec![]));
        assert!(!r.reasons.iter().any(|x| x.starts_with("Image")));

        let r = classify(&msg("Hi", "", vec![att("קבלה.jpg", "image/jpeg")], vec![]));
        assert_eq!(r.score, 3);
        assert_eq!(r.label, Label::ToReview);
    }

    #[test]
    fn test_body_currency_requires_amount() {
        let r = classify(&msg("Hi", "<p>Total ₪ 120.50</p>", vec![], vec![]));
        assert_eq!(r.reasons, vec!["Body contains currency and amount"]);

        let r = classify(&msg("Hi", "<p>Prices in USD soon</p>", vec![], vec![]));
        assert!(r.reasons.is_empty());
        assert_eq!(r.label, Label::NotExpense);
    }

    #[test]
    fn test_newsletter_penalty() {
        let body = "<p>Order total $10.00</p><a href='https://x.io/u'>Unsubscribe</a>";
        let r = classify(&msg("Your order", body, vec![att("r.pdf", "application/pdf")], vec![]));
        // 5 + 2 + 2 - 3
        assert_eq!(r.score, 6);
        assert_eq!(r.label, Label::Expense);
        assert_eq!(r.reasons.last().unwrap(), "Newsletter patterns detected");
    }

    #[test]
    fn test_invoice_link_lifts_to_review_but_not_expense() {
        let r = classify(&msg("Hello", "", vec![], vec![link("https://pay.io/Invoice/9")]));
        assert_eq!(r.score, 3);
        assert_eq!(r.label, Label::ToReview);

        let r = classify(&msg("Receipt", "", vec![], vec![link("https://pay.io/download")]));
        assert_eq!(r.score, 5);
        assert_eq!(r.label, Label::ToReview);

        let r = classify(&msg("Receipt", "", vec![att("x.pdf", "application/pdf")], vec![link("https://pay.io/pdf")]));
        assert_eq!(r.score, 10);
        assert_eq!(r.label, Label::Expense);
    }

    #[test]
    fn test_link_bonus_never_yields_expense_alone() {
        // pre-link score 5 -> TO_REVIEW; +3 makes 8 but label is not promoted
        let r = classify(&msg("Hi", "", vec![att("x.pdf", "application/pdf")], vec![link("https://a.io/receipt")]));
        assert_eq!(r.score, 8);
        assert_eq!(r.label, Label::ToReview);
    }

    #[test]
    fn test_empty_message_and_determinism() {
        let m = msg("", "", vec![], vec![]);
        let a = classify(&m);
        let b = classify(&m);
        assert_eq!(a, b);
        assert_eq!(a.score, 0);
        assert_eq!(a.label, Label::NotExpense);
    }
}
