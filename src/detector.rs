use std::fmt;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::models::FileType;
use crate::profiles::{BankFormatProfile, Layout, ProfileRegistry, SupportedBank};

/// Bank exports often carry account details above the real header row.
const HEADER_SEARCH_DEPTH: usize = 20;

const UNSUPPORTED_EXTENSIONS: &[(&str, &str)] = &[
    ("qif", "Quicken Interchange Format (QIF)"),
    ("ofx", "Open Financial Exchange (OFX)"),
    ("qfx", "Quicken Financial Exchange (QFX)"),
    ("xls", "Excel workbook"),
    ("xlsx", "Excel workbook"),
    ("mt940", "SWIFT MT940"),
    ("sta", "SWIFT MT940"),
];

/// Turns PDF bytes into the text stream the layout parsers work on.
pub trait PdfTextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, String>;
}

pub struct PdfExtractText;

impl PdfTextExtractor for PdfExtractText {
    #[cfg(feature = "pdf")]
    fn extract(&self, bytes: &[u8]) -> Result<String, String> {
        match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err("PDF text extraction aborted on a malformed document".to_string()),
        }
    }

    #[cfg(not(feature = "pdf"))]
    fn extract(&self, _bytes: &[u8]) -> Result<String, String> {
        Err("PDF support is not enabled in this build".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnsupportedFormat {
    pub reason: String,
    pub supported: Vec<SupportedBank>,
}

impl fmt::Display for UnsupportedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.supported.iter().map(|s| s.display_name.as_str()).collect();
        write!(f, "{}. Supported formats: {}", self.reason, names.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Decoded CSV text and the index of the header record within it.
    Csv { text: String, header_record: usize },
    Pdf { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFormat {
    pub profile: BankFormatProfile,
    pub source: Source,
}

impl DetectedFormat {
    pub fn file_type(&self) -> FileType {
        match self.source {
            Source::Csv { .. } => FileType::Csv,
            Source::Pdf { .. } => FileType::Pdf,
        }
    }
}

/// Windows-1252 characters for 0x80..=0x9F. Undefined positions keep their
/// C1 code point.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

fn cp1252_char(b: u8) -> char {
    match b {
        0x80..=0x9F => CP1252_HIGH[usize::from(b - 0x80)],
        _ => char::from(b),
    }
}

/// Decode CSV bytes: UTF-8 (BOM stripped), falling back to Windows-1252 for
/// legacy exports.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().copied().map(cp1252_char).collect(),
    }
}

/// Establish csv/pdf from extension and content. The extension alone is never
/// enough to accept a file.
pub fn sniff_file_type(bytes: &[u8], file_name: &str) -> Result<FileType, String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if let Some((_, label)) = UNSUPPORTED_EXTENSIONS.iter().find(|(e, _)| *e == ext) {
        return Err(format!("{label} files (.{ext}) are not supported"));
    }

    let looks_like_pdf = bytes.starts_with(b"%PDF-");
    match ext.as_str() {
        "pdf" if looks_like_pdf => Ok(FileType::Pdf),
        "pdf" => Err(format!("{file_name} has a .pdf extension but is not a PDF document")),
        "csv" if looks_like_pdf => Ok(FileType::Pdf),
        "csv" => Ok(FileType::Csv),
        _ if looks_like_pdf => Ok(FileType::Pdf),
        "" => Err(format!("{file_name} has no file extension; upload a .csv or .pdf statement")),
        other => Err(format!("unrecognised file type '.{other}'")),
    }
}

fn signature_matches(cells: &[String], signature: &[String]) -> bool {
    let mut remaining = cells.iter();
    !signature.is_empty()
        && signature
            .iter()
            .all(|want| remaining.any(|cell| cell.eq_ignore_ascii_case(want.trim())))
}

fn filename_names_bank(profile: &BankFormatProfile, file_name: &str) -> bool {
    let name = file_name.to_lowercase();
    profile.bank.filename_hints().iter().any(|hint| name.contains(hint))
}

pub struct FormatDetector {
    registry: ProfileRegistry,
    pdf: Box<dyn PdfTextExtractor>,
}

impl FormatDetector {
    pub fn new(registry: ProfileRegistry) -> Self {
        Self {
            registry,
            pdf: Box::new(PdfExtractText),
        }
    }

    #[cfg(test)]
    pub fn with_pdf_extractor(mut self, extractor: impl PdfTextExtractor + 'static) -> Self {
        self.pdf = Box::new(extractor);
        self
    }

    fn unsupported(&self, reason: impl Into<String>) -> UnsupportedFormat {
        UnsupportedFormat {
            reason: reason.into(),
            supported: self.registry.supported(),
        }
    }

    pub fn detect(&self, bytes: &[u8], file_name: &str) -> Result<DetectedFormat, UnsupportedFormat> {
        let file_type = sniff_file_type(bytes, file_name).map_err(|reason| self.unsupported(reason))?;
        let detected = match file_type {
            FileType::Csv => self.detect_csv(decode_text(bytes), file_name)?,
            FileType::Pdf => {
                let text = self
                    .pdf
                    .extract(bytes)
                    .map_err(|e| self.unsupported(format!("could not read PDF: {e}")))?;
                self.detect_pdf_text(text, file_name)?
            }
        };
        debug!(file = file_name, profile = %detected.profile.key, "detected statement format");
        Ok(detected)
    }

    pub fn detect_csv(&self, text: String, file_name: &str) -> Result<DetectedFormat, UnsupportedFormat> {
        match self.find_csv_header(&text, file_name) {
            Some((header_record, profile)) => Ok(DetectedFormat {
                profile,
                source: Source::Csv { text, header_record },
            }),
            None => Err(self.unsupported("no recognised bank header row in CSV")),
        }
    }

    fn find_csv_header(&self, text: &str, file_name: &str) -> Option<(usize, BankFormatProfile)> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        for (idx, result) in rdr.records().enumerate().take(HEADER_SEARCH_DEPTH) {
            let Ok(record) = result else { continue };
            let cells: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
            let candidates: Vec<&BankFormatProfile> = self
                .registry
                .profiles()
                .iter()
                .filter(|p| matches!(p.layout, Layout::Csv { .. }))
                .filter(|p| signature_matches(&cells, &p.match_rules.header_signature))
                .collect();
            if !candidates.is_empty() {
                return Some((idx, self.choose_csv_profile(&candidates, file_name).clone()));
            }
        }
        None
    }

    fn choose_csv_profile<'a>(
        &self,
        candidates: &[&'a BankFormatProfile],
        file_name: &str,
    ) -> &'a BankFormatProfile {
        let best = candidates
            .iter()
            .map(|p| p.match_rules.header_signature.len())
            .max()
            .unwrap_or(0);
        let top: Vec<&BankFormatProfile> = candidates
            .iter()
            .copied()
            .filter(|p| p.match_rules.header_signature.len() == best)
            .collect();
        if let [only] = top.as_slice() {
            return *only;
        }
        if let Some(named) = top.iter().find(|p| filename_names_bank(p, file_name)) {
            return *named;
        }
        candidates
            .iter()
            .copied()
            .find(|p| p.is_generic_signed())
            .unwrap_or(top[0])
    }

    pub fn detect_pdf_text(&self, text: String, file_name: &str) -> Result<DetectedFormat, UnsupportedFormat> {
        if text.trim().is_empty() {
            return Err(self.unsupported(
                "PDF has no extractable text layer; scanned statements are not supported",
            ));
        }
        let haystack = text.to_lowercase();
        let scored: Vec<(usize, &BankFormatProfile)> = self
            .registry
            .profiles()
            .iter()
            .filter(|p| matches!(p.layout, Layout::PdfText(_)))
            .map(|p| {
                let hits = p
                    .match_rules
                    .text_markers
                    .iter()
                    .filter(|m| haystack.contains(&m.to_lowercase()))
                    .count();
                (hits, p)
            })
            .filter(|(hits, _)| *hits > 0)
            .collect();

        let Some(best) = scored.iter().map(|(hits, _)| *hits).max() else {
            return Err(self.unsupported("PDF statement layout not recognised"));
        };
        let top: Vec<&BankFormatProfile> = scored
            .iter()
            .filter(|(hits, _)| *hits == best)
            .map(|(_, p)| *p)
            .collect();
        let profile = top
            .iter()
            .find(|p| filename_names_bank(p, file_name))
            .unwrap_or(&top[0]);

        Ok(DetectedFormat {
            profile: (*profile).clone(),
            source: Source::Pdf { text },
        })
    }
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self::new(ProfileRegistry::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedText(&'static str);

    impl PdfTextExtractor for FixedText {
        fn extract(&self, _bytes: &[u8]) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    fn detector() -> FormatDetector {
        FormatDetector::default()
    }

    fn detect_key(content: &str, file_name: &str) -> String {
        detector()
            .detect(content.as_bytes(), file_name)
            .unwrap()
            .profile
            .key
    }

    #[test]
    fn test_rejects_known_unsupported_extensions() {
        let err = detector().detect(b"!Type:Bank\n", "export.qif").unwrap_err();
        assert!(err.reason.contains("QIF"));
        assert!(!err.supported.is_empty());
        let err = detector().detect(b"<OFX>", "export.OFX").unwrap_err();
        assert!(err.reason.contains("OFX"));
    }

    #[test]
    fn test_unsupported_message_lists_alternatives() {
        let err = detector().detect(b"x", "export.qif").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Supported formats:"));
        assert!(message.contains("FNB CSV export"));
    }

    #[test]
    fn test_pdf_extension_without_pdf_bytes() {
        let err = detector().detect(b"Date,Description,Amount\n", "stmt.pdf").unwrap_err();
        assert!(err.reason.contains("not a PDF"));
    }

    #[test]
    fn test_content_overrides_extension() {
        assert_eq!(sniff_file_type(b"%PDF-1.7 ...", "stmt.csv"), Ok(FileType::Pdf));
        assert_eq!(sniff_file_type(b"%PDF-1.7 ...", "download"), Ok(FileType::Pdf));
        assert!(sniff_file_type(b"Date,Amount", "download").is_err());
        assert!(sniff_file_type(b"Date,Amount", "stmt.txt").is_err());
    }

    #[test]
    fn test_detects_split_debit_credit_csv() {
        assert_eq!(detect_key("Date,Description,Debit,Credit\n", "upload.csv"), "generic_split_csv");
    }

    #[test]
    fn test_prefers_longest_signature() {
        let key = detect_key("Date,Description,Debit,Credit,Balance\n", "upload.csv");
        assert_eq!(key, "nedbank_csv");
    }

    #[test]
    fn test_header_column_order_matters() {
        assert_eq!(detect_key("Date,Amount,Balance,Description\n", "x.csv"), "fnb_csv");
        assert_eq!(detect_key("Date,Description,Amount\n", "x.csv"), "generic_signed_csv");
    }

    #[test]
    fn test_ambiguous_header_uses_filename_hint() {
        let header = "Date,Description,Amount,Balance\n";
        assert_eq!(detect_key(header, "ABSA_statement_jan.csv"), "absa_csv");
        assert_eq!(detect_key(header, "standardbank-2025-01.csv"), "standard_bank_csv");
    }

    #[test]
    fn test_ambiguous_header_without_hint_falls_back_to_generic() {
        let header = "Date,Description,Amount,Balance\n";
        assert_eq!(detect_key(header, "statement.csv"), "generic_signed_csv");
    }

    #[test]
    fn test_skips_preamble_lines() {
        let content = "\
Account Name: Main Cheque
Account Number: ****1234

Date,Amount,Balance,Description
2025/01/15,-50.00,950.00,POS PURCHASE
";
        let detected = detector().detect(content.as_bytes(), "x.csv").unwrap();
        assert_eq!(detected.profile.key, "fnb_csv");
        assert_eq!(detected.file_type(), FileType::Csv);
    }

    #[test]
    fn test_case_and_whitespace_insensitive_header() {
        assert_eq!(detect_key(" date , DESCRIPTION ,amount\n", "x.csv"), "generic_signed_csv");
    }

    #[test]
    fn test_unknown_header_is_unsupported() {
        let err = detector().detect(b"Foo,Bar,Baz\n1,2,3\n", "x.csv").unwrap_err();
        assert!(err.reason.contains("header"));
    }

    #[test]
    fn test_latin1_csv_decodes() {
        let mut bytes = b"Date,Description,Amount\n15/01/2025,Caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b",-35.00\n");
        let detected = detector().detect(&bytes, "x.csv").unwrap();
        match detected.source {
            Source::Csv { text, .. } => assert!(text.contains("Café")),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_windows_1252_punctuation_decodes() {
        let text = decode_text(b"O\x92Brien \x80 5 \x96 refund\x81");
        assert_eq!(text, "O\u{2019}Brien \u{20AC} 5 \u{2013} refund\u{81}");
    }

    #[test]
    fn test_pdf_detected_by_markers() {
        let detector = detector().with_pdf_extractor(FixedText(
            "First National Bank\nFNB Gold Business Account\n15 Jan 2025 POS PURCHASE 50.00 950.00\n",
        ));
        let detected = detector.detect(b"%PDF-1.4 body", "statement.pdf").unwrap();
        assert_eq!(detected.profile.key, "fnb_pdf");
        assert_eq!(detected.file_type(), FileType::Pdf);
    }

    #[test]
    fn test_scanned_pdf_is_unsupported() {
        let detector = detector().with_pdf_extractor(FixedText("  \n \n"));
        let err = detector.detect(b"%PDF-1.4 body", "scan.pdf").unwrap_err();
        assert!(err.reason.contains("scanned"));
    }

    #[test]
    fn test_unknown_pdf_layout_is_unsupported() {
        let detector = detector().with_pdf_extractor(FixedText("Some Credit Union\nStatement\n"));
        let err = detector.detect(b"%PDF-1.4 body", "cu.pdf").unwrap_err();
        assert!(err.reason.contains("not recognised"));
    }

    #[test]
    fn test_custom_registry_is_used() {
        let registry = ProfileRegistry::new(vec![ProfileRegistry::south_african()
            .get("generic_split_csv")
            .unwrap()
            .clone()]);
        let detector = FormatDetector::new(registry);
        let err = detector.detect(b"Date,Description,Amount\n", "x.csv").unwrap_err();
        assert_eq!(err.supported.len(), 1);
        assert_eq!(err.supported[0].key, "generic_split_csv");
    }
}
