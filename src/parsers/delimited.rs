use std::collections::BTreeMap;

use csv::ReaderBuilder;

use crate::error::{ImportError, Result};
use crate::models::{RowErrorKind, RowParseError};
use crate::money::parse_minor_units;
use crate::parsers::{parse_date, ParseOutput, ParsedRow};
use crate::profiles::{AmountConvention, BankFormatProfile, ColumnMapping};

enum AmountColumns {
    Signed(usize),
    Split {
        debit: usize,
        credit: usize,
        fee: Option<usize>,
    },
}

fn cell(record: &csv::StringRecord, idx: usize) -> &str {
    record.get(idx).map(str::trim).unwrap_or("")
}

fn signed_amount(raw: &str) -> std::result::Result<i64, String> {
    if raw.is_empty() {
        return Err("no amount".to_string());
    }
    parse_minor_units(raw)
}

/// Credit wins when it carries a value; otherwise the debit is booked as money
/// out. A fee, when present, is always money out.
fn split_amount(
    credit: &str,
    debit: &str,
    fee: Option<&str>,
    allows_zero_amount: bool,
) -> std::result::Result<i64, String> {
    let credit_value = if credit.is_empty() {
        None
    } else {
        Some(parse_minor_units(credit)?.abs())
    };
    let base = match credit_value {
        Some(c) if c != 0 || debit.is_empty() => c,
        _ if !debit.is_empty() => -parse_minor_units(debit)?.abs(),
        _ if allows_zero_amount => 0,
        _ => return Err("no amount: debit and credit are both empty".to_string()),
    };
    let fee = match fee {
        Some(f) if !f.is_empty() => parse_minor_units(f)?.abs(),
        _ => 0,
    };
    base.checked_sub(fee)
        .ok_or_else(|| "amount out of range".to_string())
}

/// Parse a delimited export whose header sits at record `header_record`.
pub fn parse_csv(
    text: &str,
    header_record: usize,
    profile: &BankFormatProfile,
    columns: &ColumnMapping,
    amounts: &AmountConvention,
) -> Result<ParseOutput> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = rdr.records().skip(header_record);

    let header: Vec<String> = match records.next() {
        Some(Ok(record)) => record.iter().map(|h| h.trim().to_string()).collect(),
        _ => return Err(ImportError::Other(format!("{}: header row not found", profile.key))),
    };
    let find = |name: &str| header.iter().position(|h| h.eq_ignore_ascii_case(name.trim()));
    let require = |name: &str| {
        find(name).ok_or_else(|| {
            ImportError::Other(format!("{}: header has no '{}' column", profile.key, name))
        })
    };

    let date_idx = require(&columns.date)?;
    let desc_idx = require(&columns.description)?;
    let balance_idx = columns.balance.as_deref().and_then(find);
    let amount_cols = match amounts {
        AmountConvention::Signed { amount } => AmountColumns::Signed(require(amount)?),
        AmountConvention::SplitDebitCredit { debit, credit, fee } => AmountColumns::Split {
            debit: require(debit)?,
            credit: require(credit)?,
            fee: fee.as_deref().and_then(find),
        },
    };

    let mut out = ParseOutput::default();
    let mut row_index = 0usize;
    for result in records {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                row_index += 1;
                out.push(ParsedRow {
                    row_index,
                    raw_fields: BTreeMap::new(),
                    date: None,
                    description: String::new(),
                    amount: None,
                    running_balance: None,
                    error: Some(RowParseError::new(row_index, RowErrorKind::Layout, format!("unreadable row: {e}"))),
                });
                continue;
            }
        };
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        row_index += 1;

        let raw_fields: BTreeMap<String, String> = header
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let key = if h.is_empty() { format!("column_{}", i + 1) } else { h.clone() };
                (key, record.get(i).unwrap_or("").to_string())
            })
            .collect();

        let raw_date = cell(&record, date_idx);
        let date = parse_date(raw_date, &profile.date_format);
        let date_error = date.is_none().then(|| {
            let message = if raw_date.is_empty() {
                "missing date".to_string()
            } else {
                format!("unparseable date '{raw_date}'")
            };
            RowParseError::new(row_index, RowErrorKind::Date, message)
        });

        let amount = match amount_cols {
            AmountColumns::Signed(idx) => signed_amount(cell(&record, idx)),
            AmountColumns::Split { debit, credit, fee } => split_amount(
                cell(&record, credit),
                cell(&record, debit),
                fee.map(|i| cell(&record, i)),
                profile.allows_zero_amount,
            ),
        };
        let amount_error = amount
            .as_ref()
            .err()
            .map(|reason| RowParseError::new(row_index, RowErrorKind::Amount, reason.clone()));

        out.push(ParsedRow {
            row_index,
            raw_fields,
            date,
            description: cell(&record, desc_idx).to_string(),
            amount: amount.ok(),
            running_balance: balance_idx.and_then(|i| parse_minor_units(cell(&record, i)).ok()),
            error: date_error.or(amount_error),
        });
    }
    Ok(out)
}
