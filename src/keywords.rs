//! Static bilingual term tables shared by the classifier, link scorer,
//! scanner buckets and downloader.

pub const ENGLISH_KEYWORDS: &[&str] = &[
    "invoice", "receipt", "bill", "order", "payment", "subscription", "transaction", "charge", "purchase",
];

pub const HEBREW_KEYWORDS: &[&str] = &["חשבונית", "קבלה", "תשלום", "הזמנה", "מנוי", "עסקה"];

pub const CURRENCY_SYMBOLS: &[&str] = &["₪", "ils", "nis", "usd", "eur", "$", "€"];

pub const UNSUBSCRIBE_PATTERNS: &[&str] = &["unsubscribe", "להסרה", "marketing", "newsletter", "promotion"];

/// Substrings in a link URL that make the classifier treat it as an invoice link.
pub const INVOICE_URL_KEYWORDS: &[&str] = &[
    "invoice", "receipt", "bill", "download", "pdf", "קבלה", "חשבונית", "תשלום",
];

// Link scorer
pub const LINK_KEYWORDS: &[&str] = &[
    "invoice", "receipt", "billing", "download", "pdf", "order", "payment", "bill",
    "חשבונית", "קבלה", "תשלום", "חיוב", "עסקה", "מס", "הזמנה", "זיכוי",
];

pub const LINK_BLOCK_SUBSTRINGS: &[&str] = &[
    "unsubscribe", "login", "signin", "register", "account", "preferences", "policy", "terms", "help",
    "support", "facebook", "twitter", "instagram", "linkedin", "tiktok", "youtube", "doubleclick",
    "googleadservices", "utm_",
];

// Scanner buckets
pub const SCAN_ENGLISH_TERMS: &[&str] = &[
    "invoice", "receipt", "tax invoice", "billing", "paid", "payment", "order confirmation", "your order", "bill",
];

pub const SCAN_HEBREW_TERMS: &[&str] = &[
    "חשבונית", "קבלה", "חשבונית מס", "חשבונית/קבלה", "אישור תשלום", "הזמנה", "שולם", "קבלה עבור", "חשבון", "לתשלום",
];

pub const SCAN_VENDOR_TERMS: &[&str] = &[
    "stripe", "paypal", "square", "shopify", "quickbooks", "invoice number", "inv #", "ref #",
];

// Login-wall detection on HTML responses
pub const LOGIN_TERMS: &[&str] = &["login", "log in", "sign in", "password", "email address", "התחבר", "התחברות", "סיסמה", "חשבון שלי"];

/// True if `haystack` (already lowercased) contains any English or Hebrew keyword.
pub fn contains_expense_keyword(haystack: &str) -> bool {
    ENGLISH_KEYWORDS.iter().any(|k| haystack.contains(k)) || HEBREW_KEYWORDS.iter().any(|k| haystack.contains(k))
}

pub fn contains_any(haystack: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| haystack.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_detection() {
        assert!(contains_expense_keyword("your invoice is ready"));
        assert!(contains_expense_keyword("חשבונית מס 1234"));
        assert!(!contains_expense_keyword("weekly digest"));
    }

    #[test]
    fn test_tables_are_lowercase() {
        for table in [ENGLISH_KEYWORDS, CURRENCY_SYMBOLS, UNSUBSCRIBE_PATTERNS, LINK_KEYWORDS, LOGIN_TERMS] {
            for term in table {
                assert_eq!(*term, term.to_lowercase(), "term must be lowercase: {term}");
            }
        }
    }
}
