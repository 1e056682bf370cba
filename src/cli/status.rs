use crate::db::{find_company, get_connection};
use crate::money::format_bytes;
use crate::settings::{db_path, load_settings};

pub fn run() -> anyhow::Result<()> {
    let settings = load_settings();
    let data_dir = std::path::PathBuf::from(&settings.data_dir);
    let db_path = db_path(&data_dir);

    println!("User:       {}", if settings.user_name.is_empty() { "(not set)" } else { &settings.user_name });
    println!("Company:    {}", settings.company_name);
    println!("Data dir:   {}", data_dir.display());
    println!("Database:   {}", db_path.display());

    if db_path.exists() {
        let size = std::fs::metadata(&db_path)?.len();
        println!("DB size:    {}", format_bytes(size));

        let conn = get_connection(&db_path)?;
        let Some(company_id) = find_company(&conn, &settings.company_name)? else {
            println!();
            println!("No data for this company yet.");
            return Ok(());
        };

        let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [company_id], |r| r.get(0)) };
        let accounts = count("SELECT count(*) FROM accounts WHERE company_id = ?1")?;
        let batches = count("SELECT count(*) FROM import_batches WHERE company_id = ?1")?;
        let open = count(
            "SELECT count(*) FROM import_batches WHERE company_id = ?1 \
             AND status IN ('processing', 'parsed', 'validated')",
        )?;
        let transactions = count(
            "SELECT count(*) FROM transactions t JOIN accounts a ON a.id = t.account_id \
             WHERE a.company_id = ?1",
        )?;

        println!();
        println!("Accounts:      {accounts}");
        println!("Batches:       {batches} ({open} awaiting review or commit)");
        println!("Transactions:  {transactions}");
    } else {
        println!();
        println!("Database not found. Run `stmt-import init` to set up.");
    }

    Ok(())
}
