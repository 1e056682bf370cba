use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;

use crate::batch::{Importer, UploadRequest};
use crate::cli::{open_store, status_label};
use crate::db::find_account;
use crate::models::BatchStatus;

pub fn run(file: &str, account: &str) -> anyhow::Result<()> {
    let store = open_store()?;
    let account = find_account(&store.conn, store.company_id, account)?;

    let path = Path::new(file);
    let bytes = std::fs::read(path).with_context(|| format!("reading {file}"))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file)
        .to_string();
    let uploaded_by = store.settings.uploader();

    let importer = Importer::from_settings(&store.settings);
    let summary = importer.upload(
        &store.conn,
        &UploadRequest {
            account_id: account.id,
            file_name: &file_name,
            bytes: &bytes,
            uploaded_by: &uploaded_by,
        },
    )?;

    println!("{} {}", summary.batch_number.bold(), status_label(summary.status));
    if let Some(previous) = &summary.previous_batch {
        println!(
            "{}",
            format!("This file was already uploaded to {} as {previous}.", account.name).yellow()
        );
    }

    if summary.status == BatchStatus::Failed {
        let reason = summary
            .failure
            .map(|f| format!("{} failed: {}", f.phase.as_str(), f.message))
            .unwrap_or_else(|| "import failed".to_string());
        bail!("{} {reason}", summary.batch_number);
    }

    println!(
        "{} rows: {} new, {} duplicate, {} invalid",
        summary.total_rows, summary.new_rows, summary.duplicate_rows, summary.invalid_rows
    );
    println!(
        "Review with `stmt-import batches show {0}`, then `stmt-import validate {0}`.",
        summary.batch_number
    );
    Ok(())
}
