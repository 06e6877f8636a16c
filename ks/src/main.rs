use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use keystore::cli::{Cli, Command};
use keystore::config::Config;
use keystore::{FileStore, KeyValueStore};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = cli.store.unwrap_or(config.store_path);

    info!("keystore starting: {}", store_path.display());
    let store = FileStore::open(&store_path).context(format!("Failed to open store {}", store_path.display()))?;

    match cli.command {
        Command::Get { key } => match store.get(&key)? {
            Some(value) => println!("{}", value),
            None => {
                eprintln!("{} Key not found: {}", "✗".red(), key);
                std::process::exit(1);
            }
        },
        Command::Set { key, value } => {
            store.set(&key, &value)?;
            println!("{} {} = {}", "✓".green(), key.cyan(), value);
        }
        Command::Rm { key } => {
            if store.remove(&key)? {
                println!("{} Removed: {}", "✓".green(), key);
            } else {
                println!("Key not found: {}", key);
            }
        }
        Command::List => {
            let entries = store.entries()?;
            if entries.is_empty() {
                println!("No entries found");
            } else {
                for (key, value) in entries {
                    println!("{} {}", key.yellow(), value);
                }
            }
        }
    }

    Ok(())
}
