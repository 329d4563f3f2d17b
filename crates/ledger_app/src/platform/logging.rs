//! Logging setup for the console binary.
//!
//! Defaults to `./ledger_console.log` so log lines never interleave with the
//! transcript on stdout.

use std::fs::File;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

pub const DEFAULT_LOG_FILE: &str = "./ledger_console.log";

/// Destination for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogDestination {
    File,
    /// Stderr, next to the console output.
    Terminal,
    Both,
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub destination: LogDestination,
    pub file: PathBuf,
    pub verbose: bool,
}

pub fn initialize(options: &LogOptions) {
    let loggers = build_loggers(options);
    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }
}

fn build_loggers(options: &LogOptions) -> Vec<Box<dyn SharedLogger>> {
    let level = if options.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    if matches!(
        options.destination,
        LogDestination::Terminal | LogDestination::Both
    ) {
        loggers.push(TermLogger::new(
            level,
            config.clone(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        ));
    }
    if matches!(
        options.destination,
        LogDestination::File | LogDestination::Both
    ) {
        if let Some(file_logger) = file_logger(&options.file, level, config) {
            loggers.push(file_logger);
        }
    }
    loggers
}

fn file_logger(path: &Path, level: LevelFilter, config: Config) -> Option<Box<dyn SharedLogger>> {
    match File::create(path) {
        Ok(file) => Some(WriteLogger::new(level, config, file)),
        Err(err) => {
            eprintln!("Warning: Could not create log file at {:?}: {}", path, err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(destination: LogDestination, file: PathBuf) -> LogOptions {
        LogOptions {
            destination,
            file,
            verbose: false,
        }
    }

    #[test]
    fn destinations_pick_loggers() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("console.log");

        assert_eq!(build_loggers(&options(LogDestination::File, file.clone())).len(), 1);
        assert!(file.exists());
        assert_eq!(build_loggers(&options(LogDestination::Terminal, file.clone())).len(), 1);
        assert_eq!(build_loggers(&options(LogDestination::Both, file)).len(), 2);
    }

    #[test]
    fn unwritable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("missing").join("console.log");
        assert!(build_loggers(&options(LogDestination::File, file)).is_empty());
    }
}
