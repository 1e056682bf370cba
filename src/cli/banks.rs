use comfy_table::{Cell, Table};

use crate::profiles::ProfileRegistry;

pub fn run() -> anyhow::Result<()> {
    let registry = ProfileRegistry::default();
    let mut table = Table::new();
    table.set_header(vec!["Key", "Bank", "Format", "Type"]);
    for bank in registry.supported() {
        table.add_row(vec![
            Cell::new(bank.key),
            Cell::new(bank.bank),
            Cell::new(bank.display_name),
            Cell::new(bank.file_type),
        ]);
    }
    println!("Supported statement formats\n{table}");
    Ok(())
}
