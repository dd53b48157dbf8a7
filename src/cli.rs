// src/cli.rs

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Repositories to harvest as `owner/name`; skips platform listing
    pub repositories: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory holding in-flight clones
    #[arg(long)]
    pub clone_root: Option<PathBuf>,

    /// JSON-lines file receiving code units
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of concurrent cloners
    #[arg(long)]
    pub cloners: Option<usize>,

    /// Number of concurrent indexers
    #[arg(long)]
    pub indexers: Option<usize>,
}
