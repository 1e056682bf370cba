use std::collections::HashSet;

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::error::Result;
use crate::models::{Classification, ParsedTransactionRow};
use crate::normalizer::fingerprint;

/// Earliest and latest date among rows that are still eligible for import.
pub fn eligible_date_range(rows: &[ParsedTransactionRow]) -> Option<(NaiveDate, NaiveDate)> {
    let dates = rows
        .iter()
        .filter(|r| r.classification != Classification::Invalid)
        .filter_map(|r| r.date);
    dates.fold(None, |acc, d| match acc {
        None => Some((d, d)),
        Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
    })
}

/// Fingerprints of ledger transactions on `account_id` within `range`,
/// recomputed from the stored fields so rows written by other tools count too.
pub fn load_existing_fingerprints(
    conn: &Connection,
    account_id: i64,
    range: Option<(NaiveDate, NaiveDate)>,
) -> Result<HashSet<String>> {
    let Some((from, to)) = range else {
        return Ok(HashSet::new());
    };
    let mut stmt = conn.prepare_cached(
        "SELECT date, description, amount FROM transactions \
         WHERE account_id = ?1 AND date BETWEEN ?2 AND ?3",
    )?;
    let rows: Vec<(String, String, i64)> = stmt
        .query_map(
            rusqlite::params![account_id, from.to_string(), to.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|(date, description, amount)| {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?;
            Some(fingerprint(account_id, date, amount, &description))
        })
        .collect())
}

/// Mark eligible rows `New` or `Duplicate`, in file order.
///
/// A row is a duplicate when its fingerprint is already in the ledger, or when
/// an earlier row of the same upload with that fingerprint was classified
/// `New`. Two identical purchases in one file therefore import once.
pub fn classify(rows: &mut [ParsedTransactionRow], existing: &HashSet<String>) {
    let mut new_in_batch: HashSet<String> = HashSet::new();
    for row in rows.iter_mut() {
        if row.classification == Classification::Invalid {
            continue;
        }
        let Some(fp) = row.fingerprint.as_ref() else {
            row.classification = Classification::Invalid;
            row.invalid_reason = Some("missing fingerprint".to_string());
            continue;
        };
        if existing.contains(fp) || new_in_batch.contains(fp) {
            row.classification = Classification::Duplicate;
        } else {
            new_in_batch.insert(fp.clone());
            row.classification = Classification::New;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::db::{get_connection, init_db};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn row(idx: usize, d: u32, description: &str, amount: i64) -> ParsedTransactionRow {
        ParsedTransactionRow {
            id: None,
            row_index: idx,
            raw_fields: BTreeMap::new(),
            date: Some(day(d)),
            description: description.to_string(),
            amount: Some(amount),
            running_balance: None,
            fingerprint: Some(fingerprint(1, day(d), amount, description)),
            classification: Classification::New,
            invalid_reason: None,
        }
    }

    fn invalid(idx: usize) -> ParsedTransactionRow {
        ParsedTransactionRow {
            date: None,
            amount: None,
            fingerprint: None,
            classification: Classification::Invalid,
            invalid_reason: Some("no amount".to_string()),
            ..row(idx, 1, "BROKEN", 0)
        }
    }

    #[test]
    fn test_identical_rows_in_one_file() {
        let mut rows = vec![row(1, 15, "COFFEE", -10000), row(2, 15, "COFFEE", -10000)];
        classify(&mut rows, &HashSet::new());
        assert_eq!(rows[0].classification, Classification::New);
        assert_eq!(rows[1].classification, Classification::Duplicate);
    }

    #[test]
    fn test_matches_existing_history() {
        let existing: HashSet<String> = [fingerprint(1, day(15), -10000, "COFFEE")].into_iter().collect();
        let mut rows = vec![row(1, 15, "COFFEE", -10000), row(2, 16, "LUNCH", -9000)];
        classify(&mut rows, &existing);
        assert_eq!(rows[0].classification, Classification::Duplicate);
        assert_eq!(rows[1].classification, Classification::New);
    }

    #[test]
    fn test_invalid_rows_untouched() {
        let mut rows = vec![invalid(1), row(2, 16, "LUNCH", -9000)];
        classify(&mut rows, &HashSet::new());
        assert_eq!(rows[0].classification, Classification::Invalid);
        assert_eq!(rows[1].classification, Classification::New);
    }

    #[test]
    fn test_eligible_date_range_skips_invalid() {
        let rows = vec![row(1, 20, "A", -1), invalid(2), row(3, 5, "B", -1)];
        assert_eq!(eligible_date_range(&rows), Some((day(5), day(20))));
        assert_eq!(eligible_date_range(&[invalid(1)]), None);
    }

    #[test]
    fn test_load_existing_fingerprints_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        conn.execute("INSERT INTO companies (name) VALUES ('Acme')", []).unwrap();
        conn.execute("INSERT INTO accounts (company_id, name) VALUES (1, 'Cheque')", []).unwrap();
        conn.execute(
            "INSERT INTO transactions (account_id, date, description, amount, fingerprint) \
             VALUES (1, '2025-01-15', 'coffee', -10000, '')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO transactions (account_id, date, description, amount, fingerprint) \
             VALUES (1, '2025-03-01', 'outside range', -1, '')",
            [],
        )
        .unwrap();

        let found = load_existing_fingerprints(&conn, 1, Some((day(1), day(31)))).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains(&fingerprint(1, day(15), -10000, "COFFEE")));
        assert!(load_existing_fingerprints(&conn, 1, None).unwrap().is_empty());
    }
}
