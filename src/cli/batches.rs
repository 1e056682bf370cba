use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table};

use crate::batch::{batch_rows, find_batch, list_batches};
use crate::cli::{open_store, status_label};
use crate::committer::ledger_for_batch;
use crate::db::get_account;
use crate::models::{BatchStatus, Classification};
use crate::money::{format_bytes, money};
use crate::profiles::ProfileRegistry;

const DEFAULT_ROW_LIMIT: usize = 50;

pub fn list() -> anyhow::Result<()> {
    let store = open_store()?;
    let batches = list_batches(&store.conn, store.company_id)?;
    if batches.is_empty() {
        println!("No import batches yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Batch", "File", "Status", "Total", "New", "Dup", "Invalid", "Uploaded By", "Created",
    ]);
    for b in &batches {
        table.add_row(vec![
            Cell::new(&b.batch_number),
            Cell::new(&b.file_name),
            Cell::new(status_label(b.status)),
            Cell::new(b.total_rows).set_alignment(CellAlignment::Right),
            Cell::new(b.new_rows).set_alignment(CellAlignment::Right),
            Cell::new(b.duplicate_rows).set_alignment(CellAlignment::Right),
            Cell::new(b.invalid_rows).set_alignment(CellAlignment::Right),
            Cell::new(&b.uploaded_by),
            Cell::new(&b.created_at),
        ]);
    }
    println!("Import batches\n{table}");
    Ok(())
}

pub fn show(reference: &str, all: bool) -> anyhow::Result<()> {
    let store = open_store()?;
    let batch = find_batch(&store.conn, store.company_id, reference)?;
    let account = get_account(&store.conn, batch.account_id)?;

    println!("Batch:       {}", batch.batch_number.bold());
    println!("Status:      {}", status_label(batch.status));
    println!("Account:     {}", account.name);
    println!(
        "File:        {} ({}, {})",
        batch.file_name,
        batch.file_type.map_or("unknown type", |t| t.as_str()),
        format_bytes(batch.file_size.max(0) as u64)
    );
    println!("Checksum:    {}", batch.checksum.get(..12).unwrap_or(&batch.checksum));
    if let Some(key) = &batch.profile {
        let registry = ProfileRegistry::default();
        let name = registry.get(key).map_or(key.as_str(), |p| p.display_name.as_str());
        println!("Format:      {name}");
    }
    println!("Uploaded by: {} at {}", batch.uploaded_by, batch.created_at);
    if let Some(done) = &batch.completed_at {
        let written = ledger_for_batch(&store.conn, batch.id)?;
        let net = written
            .iter()
            .try_fold(0i64, |acc, t| acc.checked_add(t.amount))
            .map_or_else(|| "out of range".to_string(), money);
        println!("Completed:   {done} ({} transactions, net {net})", written.len());
    }
    if let (Some(from), Some(to)) = (batch.date_range_start, batch.date_range_end) {
        println!("Dates:       {from} to {to}");
    }
    println!(
        "Rows:        {} total, {} new, {} duplicate, {} invalid",
        batch.total_rows, batch.new_rows, batch.duplicate_rows, batch.invalid_rows
    );
    if matches!(batch.status, BatchStatus::Parsed | BatchStatus::Validated) && !batch.parse_errors.is_empty() {
        println!("Row errors:");
        for err in &batch.parse_errors {
            println!("  {}", err.yellow());
        }
    }
    if let Some(failure) = &batch.failure {
        println!(
            "{}",
            format!("Failed during {}: {}", failure.phase.as_str(), failure.message).red()
        );
    }

    let rows = batch_rows(&store.conn, batch.id)?;
    if rows.is_empty() {
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "#", "Date", "Description", "Amount", "Class", "Sel", "Note"]);
    let shown = if all { rows.len() } else { DEFAULT_ROW_LIMIT.min(rows.len()) };
    for r in rows.iter().take(shown) {
        let class = match r.row.classification {
            Classification::New => "new".green(),
            Classification::Duplicate => "duplicate".dimmed(),
            Classification::Invalid => "invalid".red(),
        };
        let note = r
            .commit_outcome
            .clone()
            .or_else(|| r.row.invalid_reason.clone())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(r.row.id.unwrap_or_default()),
            Cell::new(r.row.row_index),
            Cell::new(r.row.date.map(|d| d.to_string()).unwrap_or_default()),
            Cell::new(&r.row.description),
            Cell::new(r.row.amount.map(money).unwrap_or_default()).set_alignment(CellAlignment::Right),
            Cell::new(class),
            Cell::new(if r.selected { "x" } else { "" }),
            Cell::new(note),
        ]);
    }
    println!("{table}");
    if shown < rows.len() {
        println!("{} more rows; use --all to show every row.", rows.len() - shown);
    }
    if !batch.status.is_terminal() {
        println!(
            "Next: `stmt-import {} {}` or `stmt-import cancel {}`.",
            if batch.status == BatchStatus::Validated { "commit" } else { "validate" },
            batch.batch_number,
            batch.batch_number
        );
    }
    Ok(())
}
