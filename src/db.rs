use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension};

use crate::error::{ImportError, Result};
use crate::models::Account;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS companies (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    company_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    bank TEXT,
    last_four TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    UNIQUE (company_id, name),
    FOREIGN KEY (company_id) REFERENCES companies(id)
);

CREATE TABLE IF NOT EXISTS import_batches (
    id INTEGER PRIMARY KEY,
    company_id INTEGER NOT NULL,
    account_id INTEGER NOT NULL,
    batch_number TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    file_type TEXT,
    profile TEXT,
    checksum TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'processing',
    total_rows INTEGER NOT NULL DEFAULT 0,
    new_rows INTEGER NOT NULL DEFAULT 0,
    duplicate_rows INTEGER NOT NULL DEFAULT 0,
    invalid_rows INTEGER NOT NULL DEFAULT 0,
    date_range_start TEXT,
    date_range_end TEXT,
    parse_errors TEXT NOT NULL DEFAULT '[]',
    failure_phase TEXT,
    failure_message TEXT,
    uploaded_by TEXT NOT NULL,
    created_at TEXT DEFAULT (datetime('now')),
    completed_at TEXT,
    UNIQUE (company_id, batch_number),
    FOREIGN KEY (company_id) REFERENCES companies(id),
    FOREIGN KEY (account_id) REFERENCES accounts(id)
);

CREATE TABLE IF NOT EXISTS batch_rows (
    id INTEGER PRIMARY KEY,
    batch_id INTEGER NOT NULL,
    row_index INTEGER NOT NULL,
    raw_fields TEXT NOT NULL,
    date TEXT,
    description TEXT NOT NULL,
    amount INTEGER,
    running_balance INTEGER,
    fingerprint TEXT,
    classification TEXT NOT NULL,
    invalid_reason TEXT,
    selected INTEGER NOT NULL DEFAULT 0,
    commit_outcome TEXT,
    FOREIGN KEY (batch_id) REFERENCES import_batches(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    amount INTEGER NOT NULL,
    fingerprint TEXT NOT NULL,
    batch_id INTEGER,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (account_id) REFERENCES accounts(id),
    FOREIGN KEY (batch_id) REFERENCES import_batches(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_account_date ON transactions(account_id, date);
CREATE INDEX IF NOT EXISTS idx_batch_rows_batch ON batch_rows(batch_id, row_index);
CREATE INDEX IF NOT EXISTS idx_batches_account ON import_batches(account_id, checksum);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Id of the named company, creating it on first use.
pub fn ensure_company(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT OR IGNORE INTO companies (name) VALUES (?1)", [name])?;
    Ok(conn.query_row("SELECT id FROM companies WHERE name = ?1", [name], |r| r.get(0))?)
}

pub fn find_company(conn: &Connection, name: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM companies WHERE name = ?1", [name], |r| r.get(0))
        .optional()?)
}

fn account_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        company_id: row.get(1)?,
        name: row.get(2)?,
        bank: row.get(3)?,
        last_four: row.get(4)?,
    })
}

pub fn add_account(
    conn: &Connection,
    company_id: i64,
    name: &str,
    bank: Option<&str>,
    last_four: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO accounts (company_id, name, bank, last_four) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![company_id, name, bank, last_four],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_account(conn: &Connection, company_id: i64, name: &str) -> Result<Account> {
    conn.query_row(
        "SELECT id, company_id, name, bank, last_four FROM accounts WHERE company_id = ?1 AND name = ?2",
        rusqlite::params![company_id, name],
        account_from_row,
    )
    .optional()?
    .ok_or_else(|| ImportError::UnknownAccount(name.to_string()))
}

pub fn get_account(conn: &Connection, account_id: i64) -> Result<Account> {
    conn.query_row(
        "SELECT id, company_id, name, bank, last_four FROM accounts WHERE id = ?1",
        [account_id],
        account_from_row,
    )
    .optional()?
    .ok_or_else(|| ImportError::UnknownAccount(account_id.to_string()))
}

pub fn list_accounts(conn: &Connection, company_id: i64) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(
        "SELECT id, company_id, name, bank, last_four FROM accounts WHERE company_id = ?1 ORDER BY name",
    )?;
    let rows = stmt
        .query_map([company_id], account_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
