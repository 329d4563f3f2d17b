use std::path::PathBuf;

use clap::Parser;

use super::logging::{LogDestination, LogOptions, DEFAULT_LOG_FILE};

/// Slash-command console for RoboLedger graphs.
#[derive(Parser, Debug)]
#[command(name = "ledger_console", version)]
pub struct Cli {
    /// RON settings file; missing file means built-in defaults.
    #[arg(long, default_value = "./ledger_console.ron")]
    pub config: PathBuf,
    /// Overrides `api_base_url` from the settings file.
    #[arg(long)]
    pub api_url: Option<String>,
    /// Graph to select on startup.
    #[arg(long)]
    pub graph: Option<String>,
    #[arg(long, value_enum, default_value_t = LogDestination::File)]
    pub log: LogDestination,
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,
    /// Log at debug level.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            destination: self.log,
            file: self.log_file.clone(),
            verbose: self.verbose,
        }
    }
}
