use colored::Colorize;

use crate::batch::{cancel_batch, find_batch, selected_row_ids, validate_batch, Selection};
use crate::cli::{open_store, status_label};

pub fn validate(reference: &str, rows: Vec<i64>, exclude: Vec<i64>) -> anyhow::Result<()> {
    let store = open_store()?;
    let batch = find_batch(&store.conn, store.company_id, reference)?;
    let selection = if !rows.is_empty() {
        Selection::Only(rows)
    } else if !exclude.is_empty() {
        Selection::Excluding(exclude)
    } else {
        Selection::AllNew
    };

    let batch = validate_batch(&store.conn, batch.id, &selection)?;
    let selected = selected_row_ids(&store.conn, batch.id)?;
    println!(
        "{} {}: {} of {} new rows selected",
        batch.batch_number.bold(),
        status_label(batch.status),
        selected.len(),
        batch.new_rows
    );
    println!("Commit with `stmt-import commit {}`.", batch.batch_number);
    Ok(())
}

pub fn cancel(reference: &str) -> anyhow::Result<()> {
    let store = open_store()?;
    let batch = find_batch(&store.conn, store.company_id, reference)?;
    let batch = cancel_batch(&store.conn, batch.id)?;
    println!("{} {}", batch.batch_number.bold(), status_label(batch.status));
    Ok(())
}
