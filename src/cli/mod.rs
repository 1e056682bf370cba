pub mod accounts;
pub mod banks;
pub mod batches;
pub mod commit;
pub mod import;
pub mod init;
pub mod review;
pub mod status;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use rusqlite::Connection;

use crate::db::{ensure_company, get_connection, init_db};
use crate::models::BatchStatus;
use crate::settings::{db_path, load_settings, Settings};

/// An initialised database with the configured company resolved.
pub(crate) struct Store {
    pub conn: Connection,
    pub company_id: i64,
    pub settings: Settings,
}

pub(crate) fn open_store() -> anyhow::Result<Store> {
    let settings = load_settings();
    let path = db_path(std::path::Path::new(&settings.data_dir));
    if !path.exists() {
        bail!("Database not found. Run `stmt-import init` to set up.");
    }
    let conn = get_connection(&path).with_context(|| format!("opening {}", path.display()))?;
    init_db(&conn)?;
    let company_id = ensure_company(&conn, &settings.company_name)?;
    Ok(Store {
        conn,
        company_id,
        settings,
    })
}

pub(crate) fn status_label(status: BatchStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        BatchStatus::Completed => label.green(),
        BatchStatus::Failed => label.red(),
        BatchStatus::Cancelled => label.dimmed(),
        BatchStatus::Parsed | BatchStatus::Validated => label.yellow(),
        BatchStatus::Processing => label.normal(),
    }
}

#[derive(Parser)]
#[command(
    name = "stmt-import",
    version,
    about = "Import bank statements into staged batches and reconcile them into the ledger."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for data (default: ~/Documents/stmt-import)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Company the imported statements belong to
        #[arg(long)]
        company: Option<String>,
        /// Name recorded as the uploader of each batch
        #[arg(long)]
        user: Option<String>,
    },
    /// Manage bank accounts.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// List supported bank statement formats.
    Banks,
    /// Upload a CSV or PDF statement into a new import batch.
    Import {
        /// Path to the statement file
        file: String,
        /// Account name to import into
        #[arg(long)]
        account: String,
    },
    /// List and inspect import batches.
    Batches {
        #[command(subcommand)]
        command: BatchesCommands,
    },
    /// Select the new rows to commit and lock the batch for commit.
    Validate {
        /// Batch number (IMP-00001) or id
        batch: String,
        /// Only these row ids
        #[arg(long, value_delimiter = ',', conflicts_with = "exclude")]
        rows: Vec<i64>,
        /// Every new row except these ids
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<i64>,
    },
    /// Write a validated batch's selected rows to the ledger.
    Commit {
        /// Batch number (IMP-00001) or id
        batch: String,
        /// Row ids to commit (default: the rows selected at validation)
        #[arg(long, value_delimiter = ',')]
        rows: Option<Vec<i64>>,
    },
    /// Abandon a batch before commit.
    Cancel {
        /// Batch number (IMP-00001) or id
        batch: String,
    },
    /// Show current database and summary statistics.
    Status,
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Add a bank account.
    Add {
        /// Account name, e.g. 'FNB Cheque'
        name: String,
        /// Bank name
        #[arg(long)]
        bank: Option<String>,
        /// Last 4 digits of account number
        #[arg(long = "last-four")]
        last_four: Option<String>,
    },
    /// List accounts.
    List,
}

#[derive(Subcommand)]
pub enum BatchesCommands {
    /// List import batches, most recent first.
    List,
    /// Show a batch with its counts, failure and rows.
    Show {
        /// Batch number (IMP-00001) or id
        batch: String,
        /// Show every row instead of the first page
        #[arg(long)]
        all: bool,
    },
}
