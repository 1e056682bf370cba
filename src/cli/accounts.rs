use comfy_table::{Cell, Table};

use crate::cli::open_store;
use crate::db::{add_account, list_accounts};

pub fn add(name: &str, bank: Option<&str>, last_four: Option<&str>) -> anyhow::Result<()> {
    let store = open_store()?;
    add_account(&store.conn, store.company_id, name, bank, last_four)?;
    println!("Added account: {name}");
    Ok(())
}

pub fn list() -> anyhow::Result<()> {
    let store = open_store()?;
    let accounts = list_accounts(&store.conn, store.company_id)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Bank", "Last Four"]);
    for account in accounts {
        table.add_row(vec![
            Cell::new(account.id),
            Cell::new(account.name),
            Cell::new(account.bank.unwrap_or_default()),
            Cell::new(account.last_four.unwrap_or_default()),
        ]);
    }
    println!("Accounts ({})\n{table}", store.settings.company_name);
    Ok(())
}
