pub mod toml_config;

pub use toml_config::{DifferConfig, LcrConfig, PbxConfig, SourceConfig, UpdateConfig};

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "auerswald-lcr")]
#[command(about = "Update the Least-Cost-Router tables in an Auerswald PBX system")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, default_value = "lcr.toml")]
    pub config: PathBuf,

    /// Dump every request and response exchanged with the PBX to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Write the raw wire trace to this file instead of stderr (implies --debug)
    #[arg(long, global = true)]
    pub trace_file: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Download the active LCR table set to a file
    Download {
        /// Prettify XML file when downloading
        #[arg(long)]
        pretty: bool,
        file: PathBuf,
    },
    /// Replace the active LCR table set with the given file
    Upload { file: PathBuf },
    /// Reset the LCR to factory defaults
    Defaults,
    /// Delete every network and provider from the LCR
    Erase,
    /// Print one of the PBX's LCR listings as JSON
    List {
        #[arg(value_enum)]
        kind: ListingKind,
    },
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListingKind {
    Networks,
    Providers,
    Tables,
}

#[cfg(feature = "cli")]
impl CliConfig {
    pub fn wire_trace_enabled(&self) -> bool {
        self.debug || self.trace_file.is_some()
    }
}
