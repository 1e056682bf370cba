use std::path::PathBuf;

use crate::db::{ensure_company, get_connection, init_db};
use crate::settings::{db_path, load_settings, save_settings, shellexpand_path};

pub fn run(data_dir: Option<String>, company: Option<String>, user: Option<String>) -> anyhow::Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    if let Some(name) = company {
        settings.company_name = name;
    }
    if let Some(name) = user {
        settings.user_name = name;
    }
    save_settings(&settings)?;

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;

    let conn = get_connection(&db_path(&resolved))?;
    init_db(&conn)?;
    ensure_company(&conn, &settings.company_name)?;

    println!(
        "Initialized stmt-import for {} at {}",
        settings.company_name,
        resolved.display()
    );
    Ok(())
}
