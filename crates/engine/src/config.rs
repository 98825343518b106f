//! Engine configuration, loaded from TOML or from environment variables.

use serde::{Deserialize, Serialize};

/// How much history the propagator writes.
///
/// Levels are cumulative: each one records everything the previous does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryLevel {
    None,
    /// Historic case instances.
    Instance,
    /// Plus historic plan item instances.
    Activity,
    /// Plus historic identity links.
    Audit,
}

impl HistoryLevel {
    fn parse(s: &str) -> Option<HistoryLevel> {
        match s {
            "none" => Some(HistoryLevel::None),
            "instance" => Some(HistoryLevel::Instance),
            "activity" => Some(HistoryLevel::Activity),
            "audit" => Some(HistoryLevel::Audit),
            _ => None,
        }
    }
}

/// Order in which pending agenda operations of one phase are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgendaOrder {
    Fifo,
    Lifo,
}

/// Casework engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub history_level: HistoryLevel,
    /// Agenda operations one unit of work may run before it is abandoned.
    pub max_agenda_operations: usize,
    pub agenda_order: AgendaOrder,
    /// Take a per-case async lock around every command.
    pub serialize_case_commands: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_level: HistoryLevel::Audit,
            max_agenda_operations: 10_000,
            agenda_order: AgendaOrder::Fifo,
            serialize_case_commands: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `CASEWORK_HISTORY_LEVEL`: none, instance, activity or audit (default: audit)
    /// - `CASEWORK_MAX_AGENDA_OPERATIONS`: positive integer (default: 10000)
    /// - `CASEWORK_AGENDA_ORDER`: fifo or lifo (default: fifo)
    /// - `CASEWORK_SERIALIZE_CASE_COMMANDS`: true or false (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let history_level = match lookup("CASEWORK_HISTORY_LEVEL") {
            Some(v) => HistoryLevel::parse(&v.to_ascii_lowercase()).ok_or(ConfigError::Invalid(
                "CASEWORK_HISTORY_LEVEL",
                "must be one of none, instance, activity, audit",
            ))?,
            None => defaults.history_level,
        };

        let max_agenda_operations = match lookup("CASEWORK_MAX_AGENDA_OPERATIONS") {
            Some(v) => v.parse().map_err(|_| {
                ConfigError::Invalid(
                    "CASEWORK_MAX_AGENDA_OPERATIONS",
                    "must be a positive integer",
                )
            })?,
            None => defaults.max_agenda_operations,
        };

        let agenda_order = match lookup("CASEWORK_AGENDA_ORDER").map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "fifo" => AgendaOrder::Fifo,
            Some(v) if v == "lifo" => AgendaOrder::Lifo,
            Some(_) => {
                return Err(ConfigError::Invalid(
                    "CASEWORK_AGENDA_ORDER",
                    "must be fifo or lifo",
                ))
            }
            None => defaults.agenda_order,
        };

        let serialize_case_commands = match lookup("CASEWORK_SERIALIZE_CASE_COMMANDS") {
            Some(v) => v.parse().map_err(|_| {
                ConfigError::Invalid("CASEWORK_SERIALIZE_CASE_COMMANDS", "must be true or false")
            })?,
            None => defaults.serialize_case_commands,
        };

        let config = Self {
            history_level,
            max_agenda_operations,
            agenda_order,
            serialize_case_commands,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_agenda_operations == 0 {
            return Err(ConfigError::Invalid(
                "max_agenda_operations",
                "must be a positive integer",
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A setting has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),

    /// The TOML document could not be parsed.
    #[error("invalid engine configuration: {0}")]
    Toml(#[from] toml::de::Error),
}
