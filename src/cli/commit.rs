use colored::Colorize;

use crate::batch::{find_batch, selected_row_ids};
use crate::cli::open_store;
use crate::committer::commit;

pub fn run(reference: &str, rows: Option<Vec<i64>>) -> anyhow::Result<()> {
    let store = open_store()?;
    let batch = find_batch(&store.conn, store.company_id, reference)?;
    let ids = match rows {
        Some(ids) => ids,
        None => selected_row_ids(&store.conn, batch.id)?,
    };

    let result = commit(&store.conn, batch.id, &ids)?;
    println!(
        "{} {}: {} committed, {} skipped",
        batch.batch_number.bold(),
        "completed".green(),
        result.committed_count,
        result.skipped_count
    );
    if result.skipped_count > 0 {
        println!(
            "{}",
            "Skipped rows were already in the ledger from another import.".yellow()
        );
    }
    Ok(())
}
