use clap::Parser;
use std::path::PathBuf;

/// Mirror chat rooms as JSON Feed, RSS and Atom.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Override the HTTP listen address (host:port).
    #[arg(long)]
    pub listen: Option<String>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
}
