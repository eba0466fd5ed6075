//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/secparse/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/secparse/` (~/.config/secparse/)
//! - Data: `$XDG_DATA_HOME/secparse/` (~/.local/share/secparse/)
//! - State/Logs: `$XDG_STATE_HOME/secparse/` (~/.local/state/secparse/)

use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::PathBuf;

/// Log file name parts; the rolling appender puts the date between them
pub(crate) const LOG_FILE_PREFIX: &str = "secparse";
pub(crate) const LOG_FILE_SUFFIX: &str = "log";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Storage location and table names
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Filing data ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Override for the SQLite file location
    pub path: Option<PathBuf>,

    /// Names of the four tables
    #[serde(default)]
    pub tables: TableNames,
}

/// Table names used by the schema.
///
/// Passed explicitly into [`crate::Database`]; every query is rendered
/// against these names.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// SIC industry table
    #[serde(default = "default_industry_table")]
    pub industry: String,
    /// Company table
    #[serde(default = "default_company_table")]
    pub company: String,
    /// Filing table
    #[serde(default = "default_filing_table")]
    pub filing: String,
    /// Per-filing data point table
    #[serde(default = "default_filing_data_table")]
    pub filing_data: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            industry: default_industry_table(),
            company: default_company_table(),
            filing: default_filing_table(),
            filing_data: default_filing_data_table(),
        }
    }
}

impl TableNames {
    /// Check that every name is a plain SQL identifier and that no two
    /// tables share a name.
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("industry", &self.industry),
            ("company", &self.company),
            ("filing", &self.filing),
            ("filing_data", &self.filing_data),
        ];

        for (key, name) in names {
            if !is_identifier(name) {
                return Err(Error::Config(format!(
                    "database.tables.{} must be a plain SQL identifier, got {:?}",
                    key, name
                )));
            }
        }

        for (i, (key, name)) in names.iter().enumerate() {
            if let Some((other, _)) = names[i + 1..]
                .iter()
                .find(|(_, n)| n.eq_ignore_ascii_case(name))
            {
                return Err(Error::Config(format!(
                    "database.tables.{} and database.tables.{} both use {:?}",
                    key, other, name
                )));
            }
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_industry_table() -> String {
    "sic_info".to_string()
}

fn default_company_table() -> String {
    "company_info".to_string()
}

fn default_filing_table() -> String {
    "filing_info".to_string()
}

fn default_filing_data_table() -> String {
    "filing_data".to_string()
}

/// When the ingestion routine commits its work.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// All columns of a sheet land together or not at all
    #[default]
    Atomic,
    /// Commit after every column; earlier columns survive a later failure
    PerColumn,
}

/// Filing data ingestion configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Commit policy for [`crate::Session::set_filing_data`]
    #[serde(default)]
    pub commit: CommitPolicy,

    /// Form types worth downloading and parsing
    #[serde(default = "default_valid_forms")]
    pub valid_forms: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            commit: CommitPolicy::default(),
            valid_forms: default_valid_forms(),
        }
    }
}

fn default_valid_forms() -> Vec<String> {
    ["10-Q", "10-K", "10-Q/A", "S-4", "8-K"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values that serde cannot check
    pub fn validate(&self) -> Result<()> {
        self.database.tables.validate()?;
        if self.logging.max_files == 0 {
            return Err(Error::Config(
                "logging.max_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The SQLite file to open: the configured override, or the XDG default
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(Self::database_path)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/secparse/config.toml` (~/.config/secparse/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("secparse").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/secparse/` (~/.local/share/secparse/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("secparse")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/secparse/` (~/.local/state/secparse/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("secparse")
    }

    /// Returns the default database file path
    ///
    /// `$XDG_DATA_HOME/secparse/secparse.sqlite3`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("secparse.sqlite3")
    }

    /// Returns the log file being written today
    ///
    /// Logs rotate daily on the UTC date:
    /// `$XDG_STATE_HOME/secparse/secparse.YYYY-MM-DD.log`
    pub fn log_path() -> PathBuf {
        Self::log_path_on(Utc::now().date_naive())
    }

    /// Returns the log file written on `date` (UTC)
    pub fn log_path_on(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!(
            "{}.{}.{}",
            LOG_FILE_PREFIX,
            date.format("%Y-%m-%d"),
            LOG_FILE_SUFFIX
        ))
    }
}
