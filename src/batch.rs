//! Import batches: upload intake, the batch state machine, and the review
//! queries that read batches and their rows back.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::classifier::{classify, eligible_date_range, load_existing_fingerprints};
use crate::db::get_account;
use crate::detector::{sniff_file_type, DetectedFormat, FormatDetector};
use crate::error::{ImportError, Result};
use crate::models::{
    Account, BatchFailure, BatchStatus, Classification, FailurePhase, FileType, ImportBatch,
    ParsedTransactionRow,
};
use crate::normalizer::{normalize, DateWindow, NormalizeContext};
use crate::parsers;
use crate::settings::{Settings, DEFAULT_MAX_UPLOAD_BYTES};

const BATCH_COLUMNS: &str = "id, company_id, account_id, batch_number, file_name, file_size, file_type, \
     profile, checksum, status, total_rows, new_rows, duplicate_rows, invalid_rows, date_range_start, \
     date_range_end, parse_errors, failure_phase, failure_message, uploaded_by, created_at, completed_at";

const ROW_COLUMNS: &str = "id, row_index, raw_fields, date, description, amount, running_balance, \
     fingerprint, classification, invalid_reason, selected, commit_outcome";

/// A statement file handed in for import against one account.
pub struct UploadRequest<'a> {
    pub account_id: i64,
    pub file_name: &'a str,
    pub bytes: &'a [u8],
    pub uploaded_by: &'a str,
}

/// What the caller of an upload gets back.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub id: i64,
    pub batch_number: String,
    pub status: BatchStatus,
    pub total_rows: i64,
    pub new_rows: i64,
    pub duplicate_rows: i64,
    pub invalid_rows: i64,
    pub failure: Option<BatchFailure>,
    /// Earlier live batch on the same account with byte-identical content.
    pub previous_batch: Option<String>,
}

impl BatchSummary {
    fn new(batch: &ImportBatch, previous_batch: Option<String>) -> Self {
        debug_assert!(batch.counts_balance(), "row counts out of balance on {}", batch.batch_number);
        Self {
            id: batch.id,
            batch_number: batch.batch_number.clone(),
            status: batch.status,
            total_rows: batch.total_rows,
            new_rows: batch.new_rows,
            duplicate_rows: batch.duplicate_rows,
            invalid_rows: batch.invalid_rows,
            failure: batch.failure.clone(),
            previous_batch,
        }
    }
}

/// A persisted row together with its review state.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRow {
    pub row: ParsedTransactionRow,
    pub selected: bool,
    /// `committed` or `skipped` once the batch has been committed.
    pub commit_outcome: Option<String>,
}

/// Which `new` rows a reviewer wants committed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    AllNew,
    Only(Vec<i64>),
    Excluding(Vec<i64>),
}

pub struct Importer {
    detector: FormatDetector,
    window: DateWindow,
    max_upload_bytes: u64,
}

impl Importer {
    pub fn new(detector: FormatDetector) -> Self {
        Self {
            detector,
            window: DateWindow::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(FormatDetector::default())
            .with_window(settings.date_window())
            .with_max_upload_bytes(settings.max_upload_bytes)
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Accept a file, run detection, parsing, validation and classification,
    /// and leave the batch `parsed` or `failed`.
    ///
    /// Batch-level problems (unsupported format, oversized file, storage
    /// errors while staging rows) are recorded on the batch and reported
    /// through the summary's status and failure. Only an unknown account or a
    /// failure to create the batch record itself is returned as an error.
    pub fn upload(&self, conn: &Connection, req: &UploadRequest<'_>) -> Result<BatchSummary> {
        let account = get_account(conn, req.account_id)?;
        let checksum = compute_checksum(req.bytes);
        let previous = previous_upload(conn, account.id, &checksum)?;
        if let Some(prev) = &previous {
            warn!(
                file = req.file_name,
                previous = %prev,
                "identical file was already uploaded to this account"
            );
        }

        let file_type = sniff_file_type(req.bytes, req.file_name).ok();
        let (batch_id, batch_number) = create_batch(conn, &account, req, &checksum, file_type)?;
        info!(batch = %batch_number, file = req.file_name, bytes = req.bytes.len(), "upload accepted");

        if let Err(failure) = self.process(conn, batch_id, &account, req) {
            mark_failed(conn, batch_id, &failure)?;
        }

        let batch = get_batch(conn, batch_id)?;
        Ok(BatchSummary::new(&batch, previous))
    }

    /// Identify the statement layout, or list the formats that are accepted.
    pub fn detect(&self, bytes: &[u8], file_name: &str) -> Result<DetectedFormat> {
        self.detector
            .detect(bytes, file_name)
            .map_err(ImportError::UnsupportedFormat)
    }

    fn process(
        &self,
        conn: &Connection,
        batch_id: i64,
        account: &Account,
        req: &UploadRequest<'_>,
    ) -> std::result::Result<(), BatchFailure> {
        let size = req.bytes.len() as u64;
        if size > self.max_upload_bytes {
            return Err(failure(
                FailurePhase::Detect,
                format!("file is {size} bytes; the upload limit is {} bytes", self.max_upload_bytes),
            ));
        }

        let detected = self
            .detect(req.bytes, req.file_name)
            .map_err(|e| failure(FailurePhase::Detect, e.to_string()))?;
        let output = parsers::parse(&detected).map_err(|e| failure(FailurePhase::Parse, e.to_string()))?;
        debug!(
            profile = %detected.profile.key,
            rows = output.rows.len(),
            row_errors = output.errors.len(),
            "statement parsed"
        );
        for err in &output.errors {
            debug!(row = err.row_index, kind = err.kind.as_str(), "{}", err.message);
        }

        let ctx = NormalizeContext {
            account_id: account.id,
            allows_zero_amount: detected.profile.allows_zero_amount,
            window: self.window,
        };
        let mut rows: Vec<ParsedTransactionRow> = output.rows.into_iter().map(|r| normalize(r, &ctx)).collect();

        let existing = load_existing_fingerprints(conn, account.id, eligible_date_range(&rows))
            .map_err(|e| failure(FailurePhase::Persist, e.to_string()))?;
        classify(&mut rows, &existing);

        persist_parsed(conn, batch_id, &detected, &mut rows)
            .map_err(|e| failure(FailurePhase::Persist, e.to_string()))
    }
}

impl Default for Importer {
    fn default() -> Self {
        Self::new(FormatDetector::default())
    }
}

fn failure(phase: FailurePhase, message: impl Into<String>) -> BatchFailure {
    BatchFailure {
        phase,
        message: message.into(),
    }
}

fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn previous_upload(conn: &Connection, account_id: i64, checksum: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT batch_number FROM import_batches \
             WHERE account_id = ?1 AND checksum = ?2 AND status NOT IN ('failed', 'cancelled') \
             ORDER BY id LIMIT 1",
            rusqlite::params![account_id, checksum],
            |r| r.get(0),
        )
        .optional()?)
}

fn create_batch(
    conn: &Connection,
    account: &Account,
    req: &UploadRequest<'_>,
    checksum: &str,
    file_type: Option<FileType>,
) -> Result<(i64, String)> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let next: i64 = tx.query_row(
        "SELECT COALESCE(MAX(CAST(substr(batch_number, 5) AS INTEGER)), 0) + 1 \
         FROM import_batches WHERE company_id = ?1",
        [account.company_id],
        |r| r.get(0),
    )?;
    let batch_number = format!("IMP-{next:05}");
    tx.execute(
        "INSERT INTO import_batches \
         (company_id, account_id, batch_number, file_name, file_size, file_type, checksum, status, uploaded_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            account.company_id,
            account.id,
            batch_number,
            req.file_name,
            req.bytes.len() as i64,
            file_type.map(|t| t.as_str()),
            checksum,
            BatchStatus::Processing.as_str(),
            req.uploaded_by,
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;
    Ok((id, batch_number))
}

fn persist_parsed(
    conn: &Connection,
    batch_id: i64,
    detected: &DetectedFormat,
    rows: &mut [ParsedTransactionRow],
) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let batch = get_batch(&tx, batch_id)?;
    if batch.status != BatchStatus::Processing {
        return Err(state_conflict(&batch, "finish parsing"));
    }

    {
        let mut insert = tx.prepare(
            "INSERT INTO batch_rows \
             (batch_id, row_index, raw_fields, date, description, amount, running_balance, \
              fingerprint, classification, invalid_reason) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for row in rows.iter_mut() {
            insert.execute(rusqlite::params![
                batch_id,
                row.row_index as i64,
                serde_json::to_string(&row.raw_fields)?,
                row.date.map(|d| d.to_string()),
                row.description,
                row.amount,
                row.running_balance,
                row.fingerprint,
                row.classification.as_str(),
                row.invalid_reason,
            ])?;
            row.id = Some(tx.last_insert_rowid());
        }
    }

    let count = |c: Classification| rows.iter().filter(|r| r.classification == c).count() as i64;
    let (new_rows, duplicate_rows, invalid_rows) = (
        count(Classification::New),
        count(Classification::Duplicate),
        count(Classification::Invalid),
    );
    let parse_errors: Vec<String> = rows
        .iter()
        .filter_map(|r| r.invalid_reason.as_ref().map(|reason| format!("row {}: {reason}", r.row_index)))
        .collect();
    let range = eligible_date_range(rows);

    tx.execute(
        "UPDATE import_batches SET file_type = ?1, profile = ?2, status = ?3, total_rows = ?4, \
         new_rows = ?5, duplicate_rows = ?6, invalid_rows = ?7, date_range_start = ?8, \
         date_range_end = ?9, parse_errors = ?10 WHERE id = ?11",
        rusqlite::params![
            detected.file_type().as_str(),
            detected.profile.key,
            BatchStatus::Parsed.as_str(),
            rows.len() as i64,
            new_rows,
            duplicate_rows,
            invalid_rows,
            range.map(|(from, _)| from.to_string()),
            range.map(|(_, to)| to.to_string()),
            serde_json::to_string(&parse_errors)?,
            batch_id,
        ],
    )?;
    tx.commit()?;

    info!(
        batch = %batch.batch_number,
        total = rows.len(),
        new = new_rows,
        duplicate = duplicate_rows,
        invalid = invalid_rows,
        "batch parsed"
    );
    Ok(())
}

/// Move a non-terminal batch to `failed`, recording the phase and reason.
pub(crate) fn mark_failed(conn: &Connection, batch_id: i64, failure: &BatchFailure) -> Result<()> {
    let changed = conn.execute(
        "UPDATE import_batches SET status = 'failed', failure_phase = ?1, failure_message = ?2 \
         WHERE id = ?3 AND status IN ('processing', 'parsed', 'validated')",
        rusqlite::params![failure.phase.as_str(), failure.message, batch_id],
    )?;
    if changed > 0 {
        warn!(batch_id, phase = failure.phase.as_str(), reason = %failure.message, "batch failed");
    }
    Ok(())
}

pub(crate) fn state_conflict(batch: &ImportBatch, operation: &'static str) -> ImportError {
    ImportError::StateConflict {
        batch: batch.batch_number.clone(),
        status: batch.status,
        operation,
    }
}

/// Compare-and-set the batch status. Fails with a state conflict when the
/// move is not allowed or the stored status changed underneath the caller.
pub(crate) fn transition(
    conn: &Connection,
    batch: &ImportBatch,
    next: BatchStatus,
    operation: &'static str,
) -> Result<()> {
    if !batch.status.can_transition_to(next) {
        return Err(state_conflict(batch, operation));
    }
    let changed = conn.execute(
        "UPDATE import_batches SET status = ?1, \
         completed_at = CASE WHEN ?1 = 'completed' THEN datetime('now') ELSE completed_at END \
         WHERE id = ?2 AND status = ?3",
        rusqlite::params![next.as_str(), batch.id, batch.status.as_str()],
    )?;
    if changed == 0 {
        let current = get_batch(conn, batch.id)?;
        return Err(state_conflict(&current, operation));
    }
    Ok(())
}

/// Check that every id names a `new` row of `batch`.
pub(crate) fn ensure_new_rows(conn: &Connection, batch: &ImportBatch, ids: &[i64]) -> Result<()> {
    let mut stmt = conn.prepare_cached("SELECT classification FROM batch_rows WHERE id = ?1 AND batch_id = ?2")?;
    for &id in ids {
        let classification: Option<String> = stmt
            .query_row(rusqlite::params![id, batch.id], |r| r.get(0))
            .optional()?;
        match classification.as_deref() {
            Some("new") => {}
            Some(other) => {
                return Err(ImportError::InvalidSelection {
                    row_id: id,
                    reason: format!("row is classified {other}"),
                })
            }
            None => {
                return Err(ImportError::InvalidSelection {
                    row_id: id,
                    reason: format!("not a row of batch {}", batch.batch_number),
                })
            }
        }
    }
    Ok(())
}

fn new_row_ids(conn: &Connection, batch_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM batch_rows WHERE batch_id = ?1 AND classification = 'new' ORDER BY row_index",
    )?;
    let ids = stmt
        .query_map([batch_id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

/// Record the reviewer's selection and move the batch from `parsed` to
/// `validated`.
pub fn validate_batch(conn: &Connection, batch_id: i64, selection: &Selection) -> Result<ImportBatch> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let batch = get_batch(&tx, batch_id)?;
    if batch.status != BatchStatus::Parsed {
        return Err(state_conflict(&batch, "validate"));
    }

    let all_new = new_row_ids(&tx, batch_id)?;
    let chosen: Vec<i64> = match selection {
        Selection::AllNew => all_new,
        Selection::Only(ids) => {
            ensure_new_rows(&tx, &batch, ids)?;
            all_new.into_iter().filter(|id| ids.contains(id)).collect()
        }
        Selection::Excluding(ids) => {
            ensure_new_rows(&tx, &batch, ids)?;
            all_new.into_iter().filter(|id| !ids.contains(id)).collect()
        }
    };

    tx.execute("UPDATE batch_rows SET selected = 0 WHERE batch_id = ?1", [batch_id])?;
    {
        let mut mark = tx.prepare("UPDATE batch_rows SET selected = 1 WHERE id = ?1")?;
        for id in &chosen {
            mark.execute([id])?;
        }
    }
    transition(&tx, &batch, BatchStatus::Validated, "validate")?;
    tx.commit()?;

    info!(batch = %batch.batch_number, selected = chosen.len(), "batch validated");
    get_batch(conn, batch_id)
}

/// Abandon a batch before commit. Its staged rows are discarded.
pub fn cancel_batch(conn: &Connection, batch_id: i64) -> Result<ImportBatch> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let batch = get_batch(&tx, batch_id)?;
    transition(&tx, &batch, BatchStatus::Cancelled, "cancel")?;
    let discarded = tx.execute("DELETE FROM batch_rows WHERE batch_id = ?1", [batch_id])?;
    tx.commit()?;

    info!(batch = %batch.batch_number, discarded, "batch cancelled");
    get_batch(conn, batch_id)
}

fn parsed_col<T: FromStr<Err = String>>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into()))
}

fn date_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
}

fn batch_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImportBatch> {
    let file_type: Option<String> = row.get(6)?;
    let parse_errors: String = row.get(16)?;
    let failure_phase: Option<String> = row.get(17)?;
    let failure_message: Option<String> = row.get(18)?;
    let failure = failure_phase
        .and_then(|p| p.parse::<FailurePhase>().ok())
        .map(|phase| BatchFailure {
            phase,
            message: failure_message.unwrap_or_default(),
        });

    Ok(ImportBatch {
        id: row.get(0)?,
        company_id: row.get(1)?,
        account_id: row.get(2)?,
        batch_number: row.get(3)?,
        file_name: row.get(4)?,
        file_size: row.get(5)?,
        file_type: file_type.and_then(|t| t.parse().ok()),
        profile: row.get(7)?,
        checksum: row.get(8)?,
        status: parsed_col(row, 9)?,
        total_rows: row.get(10)?,
        new_rows: row.get(11)?,
        duplicate_rows: row.get(12)?,
        invalid_rows: row.get(13)?,
        date_range_start: date_col(row, 14)?,
        date_range_end: date_col(row, 15)?,
        parse_errors: serde_json::from_str(&parse_errors).unwrap_or_default(),
        failure,
        uploaded_by: row.get(19)?,
        created_at: row.get::<_, Option<String>>(20)?.unwrap_or_default(),
        completed_at: row.get(21)?,
    })
}

fn review_row_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewRow> {
    let raw_fields: String = row.get(2)?;
    let raw_fields: BTreeMap<String, String> = serde_json::from_str(&raw_fields)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(ReviewRow {
        row: ParsedTransactionRow {
            id: Some(row.get(0)?),
            row_index: row.get::<_, i64>(1)? as usize,
            raw_fields,
            date: date_col(row, 3)?,
            description: row.get(4)?,
            amount: row.get(5)?,
            running_balance: row.get(6)?,
            fingerprint: row.get(7)?,
            classification: parsed_col(row, 8)?,
            invalid_reason: row.get(9)?,
        },
        selected: row.get::<_, i64>(10)? != 0,
        commit_outcome: row.get(11)?,
    })
}

pub fn get_batch(conn: &Connection, batch_id: i64) -> Result<ImportBatch> {
    conn.query_row(
        &format!("SELECT {BATCH_COLUMNS} FROM import_batches WHERE id = ?1"),
        [batch_id],
        batch_from_row,
    )
    .optional()?
    .ok_or_else(|| ImportError::UnknownBatch(batch_id.to_string()))
}

/// Look a batch up by its number (`IMP-00003`) or numeric id, within a company.
pub fn find_batch(conn: &Connection, company_id: i64, reference: &str) -> Result<ImportBatch> {
    let reference = reference.trim();
    let by_number = conn
        .query_row(
            &format!("SELECT {BATCH_COLUMNS} FROM import_batches WHERE company_id = ?1 AND batch_number = ?2"),
            rusqlite::params![company_id, reference.to_uppercase()],
            batch_from_row,
        )
        .optional()?;
    if let Some(batch) = by_number {
        return Ok(batch);
    }
    if let Ok(id) = reference.parse::<i64>() {
        if let Ok(batch) = get_batch(conn, id) {
            if batch.company_id == company_id {
                return Ok(batch);
            }
        }
    }
    Err(ImportError::UnknownBatch(reference.to_string()))
}

/// Most recent first.
pub fn list_batches(conn: &Connection, company_id: i64) -> Result<Vec<ImportBatch>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BATCH_COLUMNS} FROM import_batches WHERE company_id = ?1 ORDER BY id DESC"
    ))?;
    let batches = stmt
        .query_map([company_id], batch_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(batches)
}

pub fn batch_rows(conn: &Connection, batch_id: i64) -> Result<Vec<ReviewRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ROW_COLUMNS} FROM batch_rows WHERE batch_id = ?1 ORDER BY row_index"
    ))?;
    let rows = stmt
        .query_map([batch_id], review_row_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn rows_by_id(conn: &Connection, batch_id: i64, ids: &[i64]) -> Result<Vec<ParsedTransactionRow>> {
    let mut rows: Vec<ParsedTransactionRow> = batch_rows(conn, batch_id)?
        .into_iter()
        .map(|r| r.row)
        .filter(|r| r.id.is_some_and(|id| ids.contains(&id)))
        .collect();
    rows.sort_by_key(|r| r.row_index);
    Ok(rows)
}

/// Rows the reviewer chose at validation time, in file order.
pub fn selected_row_ids(conn: &Connection, batch_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT id FROM batch_rows WHERE batch_id = ?1 AND selected = 1 ORDER BY row_index")?;
    let ids = stmt
        .query_map([batch_id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}
