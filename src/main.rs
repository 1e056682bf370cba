mod batch;
mod classifier;
mod cli;
mod committer;
mod db;
mod detector;
mod error;
mod models;
mod money;
mod normalizer;
mod parsers;
mod profiles;
mod settings;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{AccountsCommands, BatchesCommands, Cli, Commands};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init {
            data_dir,
            company,
            user,
        } => cli::init::run(data_dir, company, user),
        Commands::Accounts { command } => match command {
            AccountsCommands::Add { name, bank, last_four } => {
                cli::accounts::add(&name, bank.as_deref(), last_four.as_deref())
            }
            AccountsCommands::List => cli::accounts::list(),
        },
        Commands::Banks => cli::banks::run(),
        Commands::Import { file, account } => cli::import::run(&file, &account),
        Commands::Batches { command } => match command {
            BatchesCommands::List => cli::batches::list(),
            BatchesCommands::Show { batch, all } => cli::batches::show(&batch, all),
        },
        Commands::Validate { batch, rows, exclude } => cli::review::validate(&batch, rows, exclude),
        Commands::Commit { batch, rows } => cli::commit::run(&batch, rows),
        Commands::Cancel { batch } => cli::review::cancel(&batch),
        Commands::Status => cli::status::run(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
