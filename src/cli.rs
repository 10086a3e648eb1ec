/// CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// Build timestamp injected at compile time
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

// Get version with timestamp
pub fn get_version() -> &'static str {
    VERSION_WITH_BUILD
}

#[derive(Parser)]
#[command(name = "aperture")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/aperture/config.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the dashboard server (default)
    Serve(ServeArgs),

    /// Print one system stats sample
    Stats {
        /// Use generated data instead of the local host
        #[arg(long)]
        demo: bool,

        /// Print the raw telemetry envelope
        #[arg(long)]
        json: bool,
    },

    /// Print one round of container stats
    Containers {
        /// Use generated data instead of Docker
        #[arg(long)]
        demo: bool,

        /// Print the raw telemetry envelope
        #[arg(long)]
        json: bool,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Directory holding the web UI
    #[arg(long)]
    pub static_path: Option<PathBuf>,

    /// Serve generated telemetry, no Docker needed
    #[arg(long)]
    pub demo: bool,

    /// Allow cross-origin requests
    #[arg(long)]
    pub cors: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Print the config file location
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Check the effective configuration for errors
    Validate,
}
