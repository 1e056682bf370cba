use chrono::{Local, Months, NaiveDate};
use sha2::{Digest, Sha256};

use crate::models::{Classification, ParsedTransactionRow};
use crate::parsers::ParsedRow;

/// Range of transaction dates accepted as plausible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub today: NaiveDate,
    pub past_years: u32,
    pub future_days: u32,
}

impl DateWindow {
    pub fn new(today: NaiveDate, past_years: u32, future_days: u32) -> Self {
        Self {
            today,
            past_years,
            future_days,
        }
    }

    pub fn ending_today(past_years: u32, future_days: u32) -> Self {
        Self::new(Local::now().date_naive(), past_years, future_days)
    }

    pub fn earliest(&self) -> NaiveDate {
        self.today
            .checked_sub_months(Months::new(self.past_years.saturating_mul(12)))
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn latest(&self) -> NaiveDate {
        self.today
            .checked_add_days(chrono::Days::new(u64::from(self.future_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.earliest() && date <= self.latest()
    }
}

impl Default for DateWindow {
    fn default() -> Self {
        Self::ending_today(30, 31)
    }
}

pub struct NormalizeContext {
    pub account_id: i64,
    pub allows_zero_amount: bool,
    pub window: DateWindow,
}

pub fn normalize_description(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content hash identifying a transaction on an account. Case and spacing
/// differences in the description do not change it.
pub fn fingerprint(account_id: i64, date: NaiveDate, amount: i64, description: &str) -> String {
    let key = normalize_description(description).to_uppercase();
    let mut hasher = Sha256::new();
    hasher.update(format!("{account_id}|{}|{amount}|{key}", date.format("%Y-%m-%d")).as_bytes());
    hex::encode(hasher.finalize())
}

fn invalid_reason(row: &ParsedRow, description: &str, ctx: &NormalizeContext) -> Option<String> {
    if let Some(err) = &row.error {
        return Some(err.message.clone());
    }
    let (Some(date), Some(amount)) = (row.date, row.amount) else {
        return Some("incomplete row".to_string());
    };
    if description.is_empty() {
        return Some("empty description".to_string());
    }
    if amount == 0 && !ctx.allows_zero_amount {
        return Some("zero amount".to_string());
    }
    if !ctx.window.contains(date) {
        return Some(format!(
            "date {date} outside accepted range {} to {}",
            ctx.window.earliest(),
            ctx.window.latest()
        ));
    }
    None
}

/// Canonicalise a parsed row and decide whether it is eligible for import.
///
/// Eligible rows come back as `New` with a fingerprint; the classifier may
/// still turn them into duplicates.
pub fn normalize(row: ParsedRow, ctx: &NormalizeContext) -> ParsedTransactionRow {
    let description = normalize_description(&row.description);
    let reason = invalid_reason(&row, &description, ctx);
    let fingerprint = match (&reason, row.date, row.amount) {
        (None, Some(date), Some(amount)) => Some(fingerprint(ctx.account_id, date, amount, &description)),
        _ => None,
    };

    ParsedTransactionRow {
        id: None,
        row_index: row.row_index,
        raw_fields: row.raw_fields,
        date: row.date,
        description,
        amount: row.amount,
        running_balance: row.running_balance,
        fingerprint,
        classification: if reason.is_some() {
            Classification::Invalid
        } else {
            Classification::New
        },
        invalid_reason: reason,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::models::{RowErrorKind, RowParseError};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ctx() -> NormalizeContext {
        NormalizeContext {
            account_id: 7,
            allows_zero_amount: false,
            window: DateWindow::new(day(2025, 6, 1), 30, 31),
        }
    }

    fn row(date: Option<NaiveDate>, description: &str, amount: Option<i64>) -> ParsedRow {
        ParsedRow {
            row_index: 1,
            raw_fields: BTreeMap::new(),
            date,
            description: description.to_string(),
            amount,
            running_balance: None,
            error: None,
        }
    }

    #[test]
    fn test_collapses_whitespace() {
        let out = normalize(row(Some(day(2025, 1, 15)), "  POS   PURCHASE \t WOOLWORTHS ", Some(-100)), &ctx());
        assert_eq!(out.description, "POS PURCHASE WOOLWORTHS");
        assert_eq!(out.classification, Classification::New);
        assert!(out.fingerprint.is_some());
    }

    #[test]
    fn test_fingerprint_ignores_case_and_spacing() {
        let a = fingerprint(1, day(2025, 1, 15), -3500, "Coffee  Shop");
        let b = fingerprint(1, day(2025, 1, 15), -3500, "COFFEE SHOP");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_every_field() {
        let base = fingerprint(1, day(2025, 1, 15), -3500, "COFFEE");
        assert_ne!(base, fingerprint(2, day(2025, 1, 15), -3500, "COFFEE"));
        assert_ne!(base, fingerprint(1, day(2025, 1, 16), -3500, "COFFEE"));
        assert_ne!(base, fingerprint(1, day(2025, 1, 15), -3501, "COFFEE"));
        assert_ne!(base, fingerprint(1, day(2025, 1, 15), -3500, "TEA"));
    }

    #[test]
    fn test_parse_error_carries_through() {
        let mut r = row(Some(day(2025, 1, 15)), "X", None);
        r.error = Some(RowParseError::new(1, RowErrorKind::Amount, "no amount"));
        let out = normalize(r, &ctx());
        assert_eq!(out.classification, Classification::Invalid);
        assert_eq!(out.invalid_reason.as_deref(), Some("no amount"));
        assert!(out.fingerprint.is_none());
    }

    #[test]
    fn test_empty_description_is_invalid() {
        let out = normalize(row(Some(day(2025, 1, 15)), "   ", Some(-100)), &ctx());
        assert_eq!(out.invalid_reason.as_deref(), Some("empty description"));
    }

    #[test]
    fn test_zero_amount_rules() {
        let out = normalize(row(Some(day(2025, 1, 15)), "MEMO", Some(0)), &ctx());
        assert_eq!(out.invalid_reason.as_deref(), Some("zero amount"));

        let lenient = NormalizeContext {
            allows_zero_amount: true,
            ..ctx()
        };
        let out = normalize(row(Some(day(2025, 1, 15)), "MEMO", Some(0)), &lenient);
        assert_eq!(out.classification, Classification::New);
    }

    #[test]
    fn test_date_window() {
        let far_past = normalize(row(Some(day(1980, 1, 1)), "OLD", Some(-1)), &ctx());
        assert_eq!(far_past.classification, Classification::Invalid);
        let far_future = normalize(row(Some(day(2026, 1, 1)), "LATER", Some(-1)), &ctx());
        assert_eq!(far_future.classification, Classification::Invalid);
        let edge = normalize(row(Some(day(2025, 7, 2)), "EDGE", Some(-1)), &ctx());
        assert_eq!(edge.classification, Classification::New);
    }
}
