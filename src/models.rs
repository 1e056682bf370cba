use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Pdf,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Pdf => "pdf",
        }
    }
}

impl FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "csv" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!("unknown file type: {other}")),
        }
    }
}

/// Lifecycle of an import batch.
///
/// `processing -> parsed -> validated -> completed`, with `failed` and
/// `cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Parsed,
    Validated,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Parsed => "parsed",
            Self::Validated => "validated",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        match (self, next) {
            (Processing, Parsed) | (Parsed, Validated) | (Validated, Completed) => true,
            (Processing | Parsed | Validated, Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "processing" => Ok(Self::Processing),
            "parsed" => Ok(Self::Parsed),
            "validated" => Ok(Self::Validated),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown batch status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    New,
    Duplicate,
    Invalid,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Duplicate => "duplicate",
            Self::Invalid => "invalid",
        }
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "duplicate" => Ok(Self::Duplicate),
            "invalid" => Ok(Self::Invalid),
            other => Err(format!("unknown classification: {other}")),
        }
    }
}

/// Which phase of the pipeline put a batch into `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    Detect,
    Parse,
    Persist,
    Commit,
}

impl FailurePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detect => "detect",
            Self::Parse => "parse",
            Self::Persist => "persist",
            Self::Commit => "commit",
        }
    }
}

impl FromStr for FailurePhase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "detect" => Ok(Self::Detect),
            "parse" => Ok(Self::Parse),
            "persist" => Ok(Self::Persist),
            "commit" => Ok(Self::Commit),
            other => Err(format!("unknown failure phase: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub phase: FailurePhase,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowErrorKind {
    Date,
    Amount,
    Layout,
}

impl RowErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Amount => "amount",
            Self::Layout => "layout",
        }
    }
}

/// A per-row problem. Collected onto the row and the batch, never propagated.
#[derive(Debug, Clone, PartialEq)]
pub struct RowParseError {
    pub row_index: usize,
    pub kind: RowErrorKind,
    pub message: String,
}

impl RowParseError {
    pub fn new(row_index: usize, kind: RowErrorKind, message: impl Into<String>) -> Self {
        Self {
            row_index,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row_index, self.message)
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub bank: Option<String>,
    pub last_four: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub id: i64,
    pub company_id: i64,
    pub account_id: i64,
    pub batch_number: String,
    pub file_name: String,
    pub file_size: i64,
    pub file_type: Option<FileType>,
    /// Key of the bank format profile the file was parsed with.
    pub profile: Option<String>,
    pub checksum: String,
    pub status: BatchStatus,
    pub total_rows: i64,
    pub new_rows: i64,
    pub duplicate_rows: i64,
    pub invalid_rows: i64,
    pub date_range_start: Option<NaiveDate>,
    pub date_range_end: Option<NaiveDate>,
    pub parse_errors: Vec<String>,
    pub failure: Option<BatchFailure>,
    pub uploaded_by: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl ImportBatch {
    pub fn counts_balance(&self) -> bool {
        self.total_rows == self.new_rows + self.duplicate_rows + self.invalid_rows
    }
}

/// One statement line after parsing, normalization and classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTransactionRow {
    /// Database id once persisted with its batch.
    pub id: Option<i64>,
    pub row_index: usize,
    pub raw_fields: BTreeMap<String, String>,
    pub date: Option<NaiveDate>,
    pub description: String,
    /// Signed minor units (cents); negative is money out.
    pub amount: Option<i64>,
    pub running_balance: Option<i64>,
    pub fingerprint: Option<String>,
    pub classification: Classification,
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerTransaction {
    pub id: i64,
    pub account_id: i64,
    pub date: NaiveDate,
    pub description: String,
    pub amount: i64,
    pub fingerprint: String,
    pub batch_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(BatchStatus::Processing.can_transition_to(BatchStatus::Parsed));
        assert!(BatchStatus::Parsed.can_transition_to(BatchStatus::Validated));
        assert!(BatchStatus::Validated.can_transition_to(BatchStatus::Completed));
    }

    #[test]
    fn test_skipping_states_is_rejected() {
        assert!(!BatchStatus::Processing.can_transition_to(BatchStatus::Completed));
        assert!(!BatchStatus::Parsed.can_transition_to(BatchStatus::Completed));
        assert!(!BatchStatus::Validated.can_transition_to(BatchStatus::Parsed));
    }

    #[test]
    fn test_terminal_states_are_frozen() {
        for terminal in [BatchStatus::Completed, BatchStatus::Failed, BatchStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                BatchStatus::Processing,
                BatchStatus::Parsed,
                BatchStatus::Validated,
                BatchStatus::Completed,
                BatchStatus::Failed,
                BatchStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_cancel_and_fail_from_any_open_state() {
        for open in [BatchStatus::Processing, BatchStatus::Parsed, BatchStatus::Validated] {
            assert!(open.can_transition_to(BatchStatus::Failed));
            assert!(open.can_transition_to(BatchStatus::Cancelled));
        }
    }

    #[test]
    fn test_status_string_roundtrip() {
        assert_eq!("validated".parse::<BatchStatus>(), Ok(BatchStatus::Validated));
        assert!("done".parse::<BatchStatus>().is_err());
    }
}
