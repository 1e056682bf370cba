//! Bank-specific parsers. Every layout produces the same [`ParseOutput`];
//! a bad row is recorded and parsing carries on.

pub mod delimited;
pub mod pdf_text;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::detector::{DetectedFormat, Source};
use crate::error::{ImportError, Result};
use crate::models::RowParseError;
use crate::profiles::Layout;

/// Tried in order after the profile's own format.
pub const FALLBACK_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%Y-%m-%d"];

/// One statement line as read from the file, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// 1-based position among the file's data rows.
    pub row_index: usize,
    pub raw_fields: BTreeMap<String, String>,
    pub date: Option<NaiveDate>,
    pub description: String,
    pub amount: Option<i64>,
    pub running_balance: Option<i64>,
    pub error: Option<RowParseError>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutput {
    pub rows: Vec<ParsedRow>,
    pub errors: Vec<RowParseError>,
}

impl ParseOutput {
    pub(crate) fn push(&mut self, row: ParsedRow) {
        if let Some(err) = &row.error {
            self.errors.push(err.clone());
        }
        self.rows.push(row);
    }
}

pub fn parse_date(raw: &str, profile_format: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    std::iter::once(profile_format)
        .chain(FALLBACK_DATE_FORMATS.iter().copied())
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Run the parser for the detected profile over the decoded source.
pub fn parse(detected: &DetectedFormat) -> Result<ParseOutput> {
    let profile = &detected.profile;
    match (&profile.layout, &detected.source) {
        (Layout::Csv { columns, amounts }, Source::Csv { text, header_record }) => {
            delimited::parse_csv(text, *header_record, profile, columns, amounts)
        }
        (Layout::PdfText(layout), Source::Pdf { text }) => pdf_text::parse_pdf_text(text, profile, layout),
        _ => Err(ImportError::Other(format!(
            "profile {} does not match a {} source",
            profile.key,
            detected.file_type().as_str()
        ))),
    }
}
