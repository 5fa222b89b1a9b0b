use std::sync::OnceLock;

use regex::Regex;

pub const UNKNOWN_VENDOR: &str = "Unknown Vendor";

const NOISE_WORDS: &[&str] = &[
    "no-reply",
    "noreply",
    "do-not-reply",
    "billing",
    "notifications",
    "support",
    "alert",
    "receipts",
    "invoices",
    "automatic",
    "service",
    "team",
];

fn angle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("invalid angle-address regex"))
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// "Acme Billing <billing@acme.io>" -> "Acme". Bare addresses yield None.
pub fn clean_display_name(from_header: &str) -> Option<String> {
    let stripped = angle_re().replace_all(from_header, "");
    let trimmed = stripped.trim().trim_matches(|c| c == '"' || c == '\'');

    let words: Vec<String> = trimmed
        .split_whitespace()
        .filter(|w| !w.contains('@'))
        .filter(|w| !NOISE_WORDS.contains(&w.to_lowercase().as_str()))
        .map(|w| w.replace(['[', ']', '(', ')', '{', '}'], ""))
        .filter(|w| !w.is_empty())
        .map(|w| title_case(&w))
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join(" "))
    }
}

/// Second-level label of the sender domain: "billing.uber.com" -> "Uber".
pub fn clean_domain(domain: &str) -> Option<String> {
    let lower = domain.trim().to_lowercase();
    let parts: Vec<&str> = lower.split('.').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return None;
    }
    if parts.len() >= 2 {
        let candidate = parts[parts.len() - 2];
        if candidate.chars().count() > 2 {
            return Some(title_case(candidate));
        }
    }
    Some(title_case(parts[0]))
}

/// Latest review override first, then the sender display name, then the
/// domain.
pub fn resolve_vendor(vendor_override: Option<&str>, from_header: &str, from_domain: &str) -> String {
    if let Some(v) = vendor_override.map(str::trim).filter(|v| !v.is_empty()) {
        return v.to_string();
    }
    clean_display_name(from_header)
        .or_else(|| clean_domain(from_domain))
        .unwrap_or_else(|| UNKNOWN_VENDOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_order() {
        let cases: &[(Option<&str>, &str, &str, &str)] = &[
            (Some("Adobe"), "Whatever <x@y.com>", "y.com", "Adobe"),
            (Some("  "), "\"Acme Billing\" <billing@acme.io>", "acme.io", "Acme"),
            (None, "no-reply@uber.com", "uber.com", "Uber"),
            (None, "<receipts@mail.stripe.com>", "mail.stripe.com", "Stripe"),
            (None, "NETFLIX [Support]", "netflix.com", "Netflix Support"),
            (None, "Billing Team <a@b.co.il>", "b.co.il", "B"),
            (None, "", "", UNKNOWN_VENDOR),
            (None, "חברת החשמל <bill@iec.co.il>", "iec.co.il", "חברת החשמל"),
        ];
        for (ov, header, domain, expected) in cases {
            assert_eq!(resolve_vendor(*ov, header, domain), *expected, "header={header}");
        }
    }

    #[test]
    fn test_clean_domain() {
        assert_eq!(clean_domain("amazon.com").as_deref(), Some("Amazon"));
        assert_eq!(clean_domain("billing.uber.com").as_deref(), Some("Uber"));
        assert_eq!(clean_domain("localhost").as_deref(), Some("Localhost"));
        assert!(clean_domain("").is_none());
    }
}
