//! CLI argument parsing for keystore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ks")]
#[command(author, version, about = "Durable key-value string store", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Store file to use (overrides config)
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the value stored under a key
    Get {
        /// Key to look up
        #[arg(required = true)]
        key: String,
    },

    /// Store a value under a key
    Set {
        /// Key to write
        #[arg(required = true)]
        key: String,

        /// Value to store
        #[arg(required = true)]
        value: String,
    },

    /// Remove a key
    Rm {
        /// Key to remove
        #[arg(required = true)]
        key: String,
    },

    /// List all entries
    List,
}
