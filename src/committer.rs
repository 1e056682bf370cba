use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{info, warn};

use crate::batch::{ensure_new_rows, get_batch, mark_failed, rows_by_id, state_conflict, transition};
use crate::classifier::{eligible_date_range, load_existing_fingerprints};
use crate::error::{ImportError, Result};
use crate::models::{BatchFailure, BatchStatus, FailurePhase, LedgerTransaction};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitResult {
    pub committed_count: usize,
    /// Selected rows that reached the ledger through another batch after
    /// this one was classified.
    pub skipped_count: usize,
}

/// Write the selected `new` rows of a validated batch to the ledger and
/// complete the batch.
///
/// Runs as one immediate transaction: the status check, a fresh read of the
/// account's ledger fingerprints and all inserts happen under the write lock,
/// so two commits touching the same account cannot both insert a
/// transaction. Rows already present by then are skipped, not failed.
///
/// A storage error rolls the transaction back, marks the batch `failed` and
/// is returned as [`ImportError::Persistence`].
pub fn commit(conn: &Connection, batch_id: i64, selected_row_ids: &[i64]) -> Result<CommitResult> {
    match write_ledger(conn, batch_id, selected_row_ids) {
        Ok(result) => Ok(result),
        Err(
            e @ (ImportError::StateConflict { .. }
            | ImportError::InvalidSelection { .. }
            | ImportError::UnknownBatch(_)),
        ) => Err(e),
        Err(e) => {
            let message = e.to_string();
            mark_failed(
                conn,
                batch_id,
                &BatchFailure {
                    phase: FailurePhase::Commit,
                    message: message.clone(),
                },
            )?;
            Err(ImportError::Persistence {
                phase: FailurePhase::Commit.as_str(),
                message,
            })
        }
    }
}

fn write_ledger(conn: &Connection, batch_id: i64, selected_row_ids: &[i64]) -> Result<CommitResult> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let batch = get_batch(&tx, batch_id)?;
    if batch.status != BatchStatus::Validated {
        return Err(state_conflict(&batch, "commit"));
    }
    ensure_new_rows(&tx, &batch, selected_row_ids)?;

    let rows = rows_by_id(&tx, batch_id, selected_row_ids)?;
    let mut ledger = load_existing_fingerprints(&tx, batch.account_id, eligible_date_range(&rows))?;

    tx.execute("UPDATE batch_rows SET selected = 0 WHERE batch_id = ?1", [batch_id])?;
    let mut result = CommitResult::default();
    {
        let mut insert = tx.prepare(
            "INSERT INTO transactions (account_id, date, description, amount, fingerprint, batch_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut outcome = tx.prepare("UPDATE batch_rows SET selected = 1, commit_outcome = ?1 WHERE id = ?2")?;

        for row in &rows {
            let (Some(id), Some(date), Some(amount), Some(fingerprint)) =
                (row.id, row.date, row.amount, row.fingerprint.as_ref())
            else {
                return Err(ImportError::Other(format!(
                    "row {} of {} is missing committed fields",
                    row.row_index, batch.batch_number
                )));
            };

            if !ledger.insert(fingerprint.clone()) {
                warn!(
                    batch = %batch.batch_number,
                    row = row.row_index,
                    "transaction already in ledger; skipping"
                );
                outcome.execute(rusqlite::params!["skipped", id])?;
                result.skipped_count += 1;
                continue;
            }

            insert.execute(rusqlite::params![
                batch.account_id,
                date.to_string(),
                row.description,
                amount,
                fingerprint,
                batch.id,
            ])?;
            outcome.execute(rusqlite::params!["committed", id])?;
            result.committed_count += 1;
        }
    }

    transition(&tx, &batch, BatchStatus::Completed, "commit")?;
    tx.commit()?;

    info!(
        batch = %batch.batch_number,
        committed = result.committed_count,
        skipped = result.skipped_count,
        "batch committed"
    );
    Ok(result)
}

/// Ledger transactions a batch wrote, in insertion order.
pub fn ledger_for_batch(conn: &Connection, batch_id: i64) -> Result<Vec<LedgerTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, account_id, date, description, amount, fingerprint, batch_id \
         FROM transactions WHERE batch_id = ?1 ORDER BY id",
    )?;
    let rows: Vec<(i64, i64, String, String, i64, String, Option<i64>)> = stmt
        .query_map([batch_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, account_id, date, description, amount, fingerprint, batch_id)| {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| ImportError::Other(format!("transaction {id} has bad date '{date}': {e}")))?;
            Ok(LedgerTransaction {
                id,
                account_id,
                date,
                description,
                amount,
                fingerprint,
                batch_id,
            })
        })
        .collect()
}
