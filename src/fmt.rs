fn group_thousands(int_part: &str) -> String {
    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    with_commas.chars().rev().collect()
}

/// Format an amount with thousands separators and an optional currency
/// code suffix: `-1,234.56 ILS`.
pub fn amount(val: f64, currency: Option<&str>) -> String {
    let negative = val < 0.0;
    let fixed = format!("{:.2}", val.abs());
    let (int_part, dec_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let sign = if negative { "-" } else { "" };
    let number = format!("{sign}{}.{dec_part}", group_thousands(int_part));
    match currency.filter(|c| !c.is_empty()) {
        Some(code) => format!("{number} {code}"),
        None => number,
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Cut `s` to at most `max` chars, marking the cut with `…`.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}
