use crate::keywords::{contains_any, LINK_BLOCK_SUBSTRINGS, LINK_KEYWORDS};
use crate::models::LinkMeta;

pub const BLOCK_PENALTY: i32 = -50;
pub const URL_KEYWORD_BONUS: i32 = 20;
pub const ANCHOR_KEYWORD_BONUS: i32 = 40;
pub const CONTEXT_KEYWORD_BONUS: i32 = 15;
pub const PDF_SUFFIX_BONUS: i32 = 30;
pub const PDF_PATH_BONUS: i32 = 20;

/// Heuristic likelihood that a link leads to an invoice document.
pub fn score_link(link: &LinkMeta) -> i32 {
    let url = link.url.to_lowercase();
    let anchor = link.anchor_text.as_deref().unwrap_or("").to_lowercase();
    let context = link.context.as_deref().unwrap_or("").to_lowercase();

    let mut score = 0;
    if contains_any(&url, LINK_BLOCK_SUBSTRINGS) || contains_any(&anchor, LINK_BLOCK_SUBSTRINGS) {
        score += BLOCK_PENALTY;
    }
    if contains_any(&url, LINK_KEYWORDS) {
        score += URL_KEYWORD_BONUS;
    }
    if contains_any(&anchor, LINK_KEYWORDS) {
        score += ANCHOR_KEYWORD_BONUS;
    }
    if contains_any(&context, LINK_KEYWORDS) {
        score += CONTEXT_KEYWORD_BONUS;
    }
    if url.ends_with(".pdf") {
        score += PDF_SUFFIX_BONUS;
    }
    if url.contains("/pdf/") {
        score += PDF_PATH_BONUS;
    }
    score
}

/// Keep positively scored links, best first, at most `max`. Ties keep
/// their original order.
pub fn pick_invoice_links(links: &[LinkMeta], max: usize) -> Vec<LinkMeta> {
    let mut scored: Vec<(i32, &LinkMeta)> = links
        .iter()
        .map(|l| (score_link(l), l))
        .filter(|(s, _)| *s > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(max).map(|(_, l)| l.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(url: &str, anchor: Option<&str>, context: Option<&str>) -> LinkMeta {
        LinkMeta {
            url: url.to_string(),
            anchor_text: anchor.map(String::from),
            context: context.map(String::from),
        }
    }

    #[test]
    fn test_score_table() {
        let cases: &[(LinkMeta, i32)] = &[
            (link("https://x.io/a", None, None), 0),
            (link("https://x.io/invoice", None, None), 20),
            (link("https://x.io/a", Some("Download"), None), 40),
            (link("https://x.io/a", None, Some("your receipt below")), 15),
            (link("https://x.io/files/doc.PDF", None, None), 50),
            (link("https://x.io/pdf/123", None, None), 40),
            (link("https://x.io/login?next=invoice", None, None), -30),
            (link("https://x.io/a", Some("Manage account"), None), -50),
            (link("https://x.io/a", Some("חשבונית"), None), 40),
        ];
        for (l, expected) in cases {
            assert_eq!(score_link(l), *expected, "url={} anchor={:?}", l.url, l.anchor_text);
        }
    }

    #[test]
    fn test_pick_filters_sorts_and_caps() {
        let links = vec![
            link("https://x.io/unsubscribe", Some("Unsubscribe"), None),
            link("https://x.io/invoice", None, None),
            link("https://x.io/r.pdf", Some("Download receipt"), None),
            link("https://x.io/about", None, None),
            link("https://x.io/order", None, None),
        ];
        let picked = pick_invoice_links(&links, 2);
        let urls: Vec<&str> = picked.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x.io/r.pdf", "https://x.io/invoice"]);
    }

    #[test]
    fn test_pick_empty() {
        assert!(pick_invoice_links(&[], 3).is_empty());
        assert!(pick_invoice_links(&[link("https://x.io/invoice", None, None)], 0).is_empty());
    }
}
