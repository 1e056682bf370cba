//! Statement rows rebuilt from a PDF's text layer.
//!
//! A row starts at a line matching the profile's date-prefix pattern and runs
//! until the next dated line. Amount and balance are the trailing numeric
//! tokens of the dated line; anything else is description.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{ImportError, Result};
use crate::models::{RowErrorKind, RowParseError};
use crate::money::parse_minor_units;
use crate::parsers::{parse_date, ParseOutput, ParsedRow};
use crate::profiles::{BankFormatProfile, PdfAmountStyle, PdfLayout};

const TRAILING_AMOUNT: &str = r"^(?P<rest>.*?)\s+(?P<tok>-?[\d,]*\d\.\d{2}(?:\s?(?i:cr|dr))?)\s*$";

struct PendingRow {
    row_index: usize,
    raw_date: String,
    line: String,
    continuation: Vec<String>,
}

fn ends_with_credit_marker(tok: &str) -> bool {
    tok.len() >= 2 && tok.is_char_boundary(tok.len() - 2) && tok[tok.len() - 2..].eq_ignore_ascii_case("cr")
}

fn amount_from_token(tok: &str, style: PdfAmountStyle) -> std::result::Result<i64, String> {
    match style {
        PdfAmountStyle::Signed => parse_minor_units(tok),
        PdfAmountStyle::CreditSuffix => {
            let value = parse_minor_units(tok)?.abs();
            Ok(if ends_with_credit_marker(tok) { value } else { -value })
        }
    }
}

fn finish(pending: PendingRow, profile: &BankFormatProfile, layout: &PdfLayout, trailing: &Regex) -> ParsedRow {
    let PendingRow {
        row_index,
        raw_date,
        line,
        continuation,
    } = pending;

    let mut rest = line.clone();
    let mut tokens: Vec<String> = Vec::new();
    let wanted = if layout.has_balance { 2 } else { 1 };
    while tokens.len() < wanted {
        let Some(caps) = trailing.captures(&rest) else { break };
        tokens.push(caps["tok"].to_string());
        rest = caps["rest"].to_string();
    }
    // Tokens were peeled from the right: [balance, amount] or [amount].
    let (amount_tok, balance_tok) = match tokens.as_slice() {
        [balance, amount] => (Some(amount.clone()), Some(balance.clone())),
        [amount] => (Some(amount.clone()), None),
        _ => (None, None),
    };

    let mut description = rest.trim().to_string();
    for extra in &continuation {
        description.push(' ');
        description.push_str(extra.trim());
    }

    let date = parse_date(&raw_date, &profile.date_format);
    let date_error = date
        .is_none()
        .then(|| RowParseError::new(row_index, RowErrorKind::Date, format!("unparseable date '{raw_date}'")));

    let amount = match &amount_tok {
        Some(tok) => amount_from_token(tok, layout.amount_style),
        None => Err("no amount found on statement line".to_string()),
    };
    let amount_error = amount
        .as_ref()
        .err()
        .map(|reason| RowParseError::new(row_index, RowErrorKind::Amount, reason.clone()));
    let running_balance = balance_tok.and_then(|tok| parse_minor_units(&tok).ok());

    let mut raw_fields = BTreeMap::new();
    raw_fields.insert("date".to_string(), raw_date);
    raw_fields.insert("line".to_string(), line);
    if !continuation.is_empty() {
        raw_fields.insert("continuation".to_string(), continuation.join("\n"));
    }

    ParsedRow {
        row_index,
        raw_fields,
        date,
        description,
        amount: amount.ok(),
        running_balance,
        error: date_error.or(amount_error),
    }
}

pub fn parse_pdf_text(text: &str, profile: &BankFormatProfile, layout: &PdfLayout) -> Result<ParseOutput> {
    let row_re = Regex::new(&layout.row_pattern)
        .map_err(|e| ImportError::Other(format!("{}: invalid row pattern: {e}", profile.key)))?;
    let trailing = Regex::new(TRAILING_AMOUNT).map_err(|e| ImportError::Other(e.to_string()))?;
    let stop_markers: Vec<String> = layout.stop_markers.iter().map(|m| m.to_lowercase()).collect();

    let mut out = ParseOutput::default();
    let mut pending: Option<PendingRow> = None;
    let mut row_index = 0usize;

    for line in text.lines() {
        let lowered = line.to_lowercase();
        if stop_markers.iter().any(|m| lowered.contains(m.as_str())) {
            break;
        }
        if let Some(caps) = row_re.captures(line) {
            if let Some(done) = pending.take() {
                out.push(finish(done, profile, layout, &trailing));
            }
            row_index += 1;
            pending = Some(PendingRow {
                row_index,
                raw_date: caps.get(1).map_or("", |m| m.as_str()).trim().to_string(),
                line: caps.get(2).map_or("", |m| m.as_str()).to_string(),
                continuation: Vec::new(),
            });
        } else if let Some(current) = pending.as_mut() {
            if !line.trim().is_empty() {
                current.continuation.push(line.trim().to_string());
            }
        }
    }
    if let Some(done) = pending.take() {
        out.push(finish(done, profile, layout, &trailing));
    }
    Ok(out)
}
