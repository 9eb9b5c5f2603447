//! Store configuration loaded from TOML.
//!
//! # Responsibility
//! - Describe where the database lives and which query generator each
//!   repository uses.
//! - Resolve generator names once, at repository construction.
//!
//! # Invariants
//! - Every section and field has a default; an empty document is valid.
//! - Unknown generator names are rejected, never silently defaulted.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

const DEFAULT_QUERY_GENERATOR: &str = "generic";

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub alert_repository: RepositoryConfig,
    #[serde(default)]
    pub expression_repository: RepositoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path. `None` opens a private in-memory database.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Name of the query generator strategy (`generic` or `case_sensitive`).
    #[serde(default = "default_query_generator")]
    pub query_generator: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            query_generator: default_query_generator(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Absolute log directory. `None` leaves logging uninitialized.
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_query_generator() -> String {
    DEFAULT_QUERY_GENERATOR.to_string()
}

fn default_log_level() -> String {
    crate::logging::default_log_level().to_string()
}

/// Query generator strategies shipped with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryGeneratorKind {
    /// Portable `LIKE` containment, ASCII case-insensitive.
    Generic,
    /// `instr` containment, case-sensitive.
    CaseSensitive,
}

impl QueryGeneratorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::CaseSensitive => "case_sensitive",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "generic" => Ok(Self::Generic),
            "case_sensitive" => Ok(Self::CaseSensitive),
            other => Err(ConfigError::UnknownQueryGenerator(other.to_string())),
        }
    }
}

impl RepositoryConfig {
    /// Resolves the configured generator name.
    pub fn generator_kind(&self) -> Result<QueryGeneratorKind, ConfigError> {
        QueryGeneratorKind::parse(&self.query_generator)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    UnknownQueryGenerator(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read configuration: {err}"),
            Self::Parse(err) => write!(f, "failed to parse configuration: {err}"),
            Self::UnknownQueryGenerator(name) => write!(
                f,
                "unknown query generator `{name}`; expected generic|case_sensitive"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::UnknownQueryGenerator(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

impl PortalConfig {
    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses a TOML document and validates generator names.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.alert_repository.generator_kind()?;
        config.expression_repository.generator_kind()?;
        Ok(config)
    }
}
