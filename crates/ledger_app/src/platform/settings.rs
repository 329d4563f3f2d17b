use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ledger_core::{ConsoleConfig, ExtraCommand, SampleQuery};
use ledger_engine::{ClientSettings, EngineConfig, PollerSettings};
use ledger_logging::{ledger_info, ledger_warn};
use serde::{Deserialize, Serialize};

use super::cli::Cli;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse settings from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

/// Contents of `ledger_console.ron`. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
    /// `None` disables the consecutive failure limit.
    pub max_consecutive_failures: Option<u32>,
    pub request_timeout_ms: u64,
    pub default_graph: Option<String>,
    pub console: ConsoleSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let client = ClientSettings::default();
        let poller = PollerSettings::default();
        Self {
            api_base_url: client.base_url,
            api_key: None,
            poll_interval_ms: poller.interval.as_millis() as u64,
            max_wait_secs: poller.max_wait.as_secs(),
            max_consecutive_failures: poller.max_consecutive_failures,
            request_timeout_ms: client.request_timeout.as_millis() as u64,
            default_graph: None,
            console: ConsoleSettings::default(),
        }
    }
}

const DEFAULT_NO_SELECTION_ERROR: &str = "No graph selected. Use /use <graph_id> first.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    pub name: String,
    pub agent_mode: String,
    /// Shown when a query or question is issued before `/use`.
    pub no_selection_error: String,
    pub transcript_capacity: Option<usize>,
    pub submit_debounce_ms: u64,
    pub natural_language_examples: Vec<String>,
    pub query_examples: Vec<String>,
    pub sample_queries: Vec<SampleQuerySetting>,
    /// Extra commands that answer with fixed text.
    pub replies: Vec<ReplyCommandSetting>,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        let config = ConsoleConfig::default();
        Self {
            name: config.console_name,
            agent_mode: config.agent_mode,
            no_selection_error: DEFAULT_NO_SELECTION_ERROR.to_string(),
            transcript_capacity: config.transcript_capacity,
            submit_debounce_ms: config.submit_debounce.as_millis() as u64,
            natural_language_examples: config.natural_language_examples,
            query_examples: config.query_examples,
            sample_queries: config
                .sample_queries
                .into_iter()
                .map(|sample| SampleQuerySetting {
                    name: sample.name,
                    query: sample.query,
                })
                .collect(),
            replies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleQuerySetting {
    pub name: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyCommandSetting {
    pub name: String,
    pub description: String,
    pub text: String,
}

impl Settings {
    /// Reads settings from `path`. A missing file yields the defaults.
    pub fn read(path: &Path) -> Result<Self, SettingsError> {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                ledger_info!("No settings at {:?}; using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        ron::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like `read`, but an unreadable or invalid file only logs a warning.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::read(path) {
            Ok(settings) => settings,
            Err(err) => {
                ledger_warn!("{}; using defaults", err);
                Self::default()
            }
        }
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.api_url {
            self.api_base_url = url.clone();
        }
        if let Some(graph) = &cli.graph {
            self.default_graph = Some(graph.clone());
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            client: ClientSettings {
                base_url: self.api_base_url.clone(),
                api_key: self.api_key.clone().filter(|key| !key.trim().is_empty()),
                request_timeout: Duration::from_millis(self.request_timeout_ms.max(1)),
                ..ClientSettings::default()
            },
            poller: PollerSettings {
                interval: Duration::from_millis(self.poll_interval_ms.max(1)),
                max_wait: Duration::from_secs(self.max_wait_secs),
                max_consecutive_failures: self.max_consecutive_failures.filter(|max| *max > 0),
            },
        }
    }

    pub fn console_config(&self) -> ConsoleConfig {
        let console = &self.console;
        ConsoleConfig {
            console_name: console.name.clone(),
            no_selection_error: console.no_selection_error.clone(),
            natural_language_examples: console.natural_language_examples.clone(),
            query_examples: console.query_examples.clone(),
            sample_queries: console
                .sample_queries
                .iter()
                .map(|sample| SampleQuery::new(&sample.name, &sample.query))
                .collect(),
            agent_mode: console.agent_mode.clone(),
            transcript_capacity: console.transcript_capacity,
            submit_debounce: Duration::from_millis(console.submit_debounce_ms),
            extra_commands: console
                .replies
                .iter()
                .map(|reply| ExtraCommand::reply(&reply.name, &reply.description, &reply.text))
                .collect(),
            ..ConsoleConfig::default()
        }
    }
}
