use chrono::{Datelike, Duration, Local, Months, NaiveDate};

use crate::error::{AppError, Result};

/// Inclusive local date window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub label: String,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate, label: impl Into<String>) -> Result<Self> {
        if from > to {
            return Err(AppError::InvalidDateRange(format!("{from} is after {to}")));
        }
        Ok(Self { from, to, label: label.into() })
    }

    pub fn from_ymd(&self) -> String {
        self.from.format("%Y-%m-%d").to_string()
    }

    pub fn to_ymd(&self) -> String {
        self.to.format("%Y-%m-%d").to_string()
    }
}

/// Raw range options as they arrive from the command line.
#[derive(Debug, Clone, Default)]
pub struct DateRangeArgs {
    pub preset: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub year: Option<i32>,
    /// `YYYY-MM`
    pub month: Option<String>,
}

pub fn resolve_date_range(args: &DateRangeArgs) -> Result<DateRange> {
    resolve_date_range_at(args, Local::now().date_naive())
}

/// Precedence: a named preset, then a single month, then an explicit
/// from/to pair, then a calendar year, then year-to-date.
pub fn resolve_date_range_at(args: &DateRangeArgs, today: NaiveDate) -> Result<DateRange> {
    let year_start = |y: i32| NaiveDate::from_ymd_opt(y, 1, 1);
    let year_end = |y: i32| NaiveDate::from_ymd_opt(y, 12, 31);
    let invalid = |what: &str| AppError::InvalidDateRange(what.to_string());

    if let Some(preset) = args.preset.as_deref().filter(|p| *p != "custom") {
        let y = today.year();
        let (from, to, label) = match preset {
            "this_year" => (year_start(y), year_end(y), "This Year"),
            "last_year" => (year_start(y - 1), year_end(y - 1), "Last Year"),
            "last_12_months" => (today.checked_sub_months(Months::new(12)), Some(today), "Last 12 Months"),
            "ytd" => (year_start(y), Some(today), "Year to Date"),
            other => return Err(invalid(&format!("unknown preset '{other}'"))),
        };
        let from = from.ok_or_else(|| invalid(preset))?;
        let to = to.ok_or_else(|| invalid(preset))?;
        return DateRange::new(from, to, label);
    }

    if let Some(raw) = args.month.as_deref() {
        let (from, to) = raw
            .trim()
            .split_once('-')
            .and_then(|(y, m)| Some((y.parse::<i32>().ok()?, m.parse::<u32>().ok()?)))
            .filter(|(_, m)| (1..=12).contains(m))
            .and_then(|(y, m)| month_range(y, m - 1))
            .ok_or_else(|| invalid(&format!("'{raw}' is not a YYYY-MM month")))?;
        return DateRange::new(from, to, from.format("%B %Y").to_string());
    }

    let custom = match (args.from.as_deref(), args.to.as_deref()) {
        (Some(f), Some(t)) => Some((parse_ymd(f)?, parse_ymd(t)?)),
        (Some(f), None) => Some((parse_ymd(f)?, today)),
        (None, Some(t)) => {
            let to = parse_ymd(t)?;
            Some((to - Duration::days(365), to))
        }
        (None, None) => None,
    };
    if let Some((from, to)) = custom {
        let label = format!("{} to {}", from.format("%Y-%m-%d"), to.format("%Y-%m-%d"));
        return DateRange::new(from, to, label);
    }

    if let Some(y) = args.year {
        let from = year_start(y).ok_or_else(|| invalid(&format!("year {y}")))?;
        let to = year_end(y).ok_or_else(|| invalid(&format!("year {y}")))?;
        return DateRange::new(from, to, format!("Year {y}"));
    }

    let from = year_start(today.year()).ok_or_else(|| invalid("ytd"))?;
    DateRange::new(from, today, "Year to Date")
}

fn parse_ymd(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::InvalidDateRange(format!("'{raw}' is not a YYYY-MM-DD date")))
}

/// First and last day of a month. `month0` is zero-based (0 = January).
pub fn month_range(year: i32, month0: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month0 + 1, 1)?;
    let last = first.checked_add_months(Months::new(1))?.pred_opt()?;
    Some((first, last))
}

/// Fractional number of months between two dates: whole calendar months
/// plus the remainder as a share of the following month.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> f64 {
    if to <= from {
        return 0.0;
    }
    let mut whole = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    let mut anchor = add_months(from, whole);
    if anchor > to {
        whole -= 1;
        anchor = add_months(from, whole);
    }
    let next = add_months(from, whole + 1);
    let span = (next - anchor).num_days().max(1) as f64;
    whole as f64 + (to - anchor).num_days() as f64 / span
}

fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    date.checked_add_months(Months::new(months.max(0) as u32)).unwrap_or(date)
}

/// Whole months a range touches, rounded up.
pub fn months_in_range(range: &DateRange) -> u32 {
    months_between(range.from, range.to).ceil() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn args(preset: Option<&str>, from: Option<&str>, to: Option<&str>, year: Option<i32>) -> DateRangeArgs {
        DateRangeArgs {
            preset: preset.map(String::from),
            from: from.map(String::from),
            to: to.map(String::from),
            year,
            month: None,
        }
    }

    #[test]
    fn test_single_month() {
        let today = d("2025-06-15");
        let a = DateRangeArgs {
            month: Some("2024-02".into()),
            ..Default::default()
        };
        let r = resolve_date_range_at(&a, today).unwrap();
        assert_eq!((r.from_ymd(), r.to_ymd()), ("2024-02-01".to_string(), "2024-02-29".to_string()));
        assert_eq!(r.label, "February 2024");
        for bad in ["2024-13", "2024", "feb"] {
            let a = DateRangeArgs {
                month: Some(bad.into()),
                ..Default::default()
            };
            assert!(resolve_date_range_at(&a, today).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_month_range_handles_leap_years() {
        assert_eq!(month_range(2024, 1), Some((d("2024-02-01"), d("2024-02-29"))));
        assert_eq!(month_range(2025, 1), Some((d("2025-02-01"), d("2025-02-28"))));
        assert_eq!(month_range(2025, 11), Some((d("2025-12-01"), d("2025-12-31"))));
        assert_eq!(month_range(2025, 12), None);
    }

    #[test]
    fn test_presets() {
        let today = d("2025-06-15");
        let r = resolve_date_range_at(&args(Some("this_year"), None, None, None), today).unwrap();
        assert_eq!((r.from, r.to), (d("2025-01-01"), d("2025-12-31")));

        let r = resolve_date_range_at(&args(Some("last_year"), None, None, None), today).unwrap();
        assert_eq!((r.from, r.to), (d("2024-01-01"), d("2024-12-31")));

        let r = resolve_date_range_at(&args(Some("ytd"), None, None, None), today).unwrap();
        assert_eq!((r.from, r.to), (d("2025-01-01"), today));

        let r = resolve_date_range_at(&args(Some("last_12_months"), None, None, None), today).unwrap();
        assert_eq!((r.from, r.to), (d("2024-06-15"), today));
    }

    #[test]
    fn test_custom_ranges() {
        let today = d("2025-06-15");
        let r = resolve_date_range_at(&args(None, Some("2025-02-01"), Some("2025-02-28"), None), today).unwrap();
        assert_eq!(r.label, "2025-02-01 to 2025-02-28");

        let r = resolve_date_range_at(&args(None, Some("2025-03-01"), None, None), today).unwrap();
        assert_eq!(r.to, today);

        let r = resolve_date_range_at(&args(None, None, Some("2025-03-01"), None), today).unwrap();
        assert_eq!(r.from, d("2024-03-01"));
    }

    #[test]
    fn test_year_and_default() {
        let today = d("2025-06-15");
        let r = resolve_date_range_at(&args(None, None, None, Some(2023)), today).unwrap();
        assert_eq!((r.from, r.to), (d("2023-01-01"), d("2023-12-31")));

        let r = resolve_date_range_at(&DateRangeArgs::default(), today).unwrap();
        assert_eq!(r.label, "Year to Date");
        assert_eq!(r.from, d("2025-01-01"));
    }

    #[test]
    fn test_invalid_ranges_are_errors() {
        let today = d("2025-06-15");
        assert!(resolve_date_range_at(&args(None, Some("2025-13-01"), None, None), today).is_err());
        assert!(resolve_date_range_at(&args(None, Some("2025-05-01"), Some("2025-04-01"), None), today).is_err());
        assert!(resolve_date_range_at(&args(Some("fortnight"), None, None, None), today).is_err());
    }

    #[test]
    fn test_months_in_range() {
        let full_year = DateRange::new(d("2025-01-01"), d("2025-12-31"), "").unwrap();
        assert_eq!(months_in_range(&full_year), 12);

        let quarter = DateRange::new(d("2025-01-01"), d("2025-03-31"), "").unwrap();
        assert_eq!(months_in_range(&quarter), 3);

        let single_day = DateRange::new(d("2025-01-01"), d("2025-01-01"), "").unwrap();
        assert_eq!(months_in_range(&single_day), 0);
    }
}
