//! Broker and core configuration
//!
//! The typed configuration record the runtime consumes. Command-line and
//! config-file parsing live outside the core; whatever produced the options
//! hands them over as string pairs through [`CoreConfig::apply_option`],
//! which understands the recognised names and their aliases.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

// ----------------------------------------------------------------------------
// Log Levels
// ----------------------------------------------------------------------------

/// Integer log levels; higher values log more.
pub mod log_level {
    /// Suppress all output.
    pub const NO_PRINT: i32 = -1;
    pub const ERROR: i32 = 0;
    pub const WARNING: i32 = 1;
    pub const SUMMARY: i32 = 2;
    pub const CONNECTIONS: i32 = 3;
    pub const INTERFACES: i32 = 4;
    pub const TIMING: i32 = 5;
    pub const DATA: i32 = 6;
    pub const TRACE: i32 = 7;
    /// Level used for dump-log replay entries on termination.
    pub const DUMP: i32 = -10;
}

// ----------------------------------------------------------------------------
// Logging Configuration
// ----------------------------------------------------------------------------

/// Where log output goes and how much of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub console_level: i32,
    pub file_level: i32,
    pub file_path: Option<PathBuf>,
    /// Record every popped command and replay the record to the logger on
    /// normal termination.
    pub dump_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: log_level::WARNING,
            file_level: log_level::WARNING,
            file_path: None,
            dump_log: false,
        }
    }
}

impl LoggingConfig {
    /// Messages above this level are dropped at the source.
    pub fn max_level(&self) -> i32 {
        self.console_level.max(self.file_level)
    }
}

// ----------------------------------------------------------------------------
// Core Configuration
// ----------------------------------------------------------------------------

/// Configuration record for a broker or core node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Node identifier; auto-generated when empty unless
    /// [`no_automatic_id`](Self::no_automatic_id) is set.
    pub identifier: String,
    /// Minimum number of federates expected to connect.
    pub min_federates: i32,
    /// Minimum number of brokers expected to connect (ignored in cores).
    pub min_brokers: i32,
    /// Maximum number of iterations per time step.
    pub max_iterations: i32,
    /// Interval of the liveness watchdog tick.
    pub tick: Duration,
    /// How long to wait for a parent broker connection.
    pub timeout: Duration,
    /// Suppress automatic identifier generation.
    pub no_automatic_id: bool,
    pub logging: LoggingConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            min_federates: 1,
            min_brokers: 1,
            max_iterations: 10_000,
            tick: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            no_automatic_id: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for tests: short tick, short timeout, quiet console.
    pub fn testing() -> Self {
        Self {
            tick: Duration::from_millis(25),
            timeout: Duration::from_secs(1),
            logging: LoggingConfig {
                console_level: log_level::NO_PRINT,
                file_level: log_level::NO_PRINT,
                ..LoggingConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "tick",
                value: "0".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidField {
                field: "timeout",
                value: "0".to_string(),
            });
        }
        if self.max_iterations <= 0 {
            return Err(ConfigError::InvalidField {
                field: "maxiter",
                value: self.max_iterations.to_string(),
            });
        }
        if self.min_federates < 0 {
            return Err(ConfigError::InvalidField {
                field: "minfed",
                value: self.min_federates.to_string(),
            });
        }
        Ok(())
    }

    /// Apply one recognised option by name.
    ///
    /// Accepted names and aliases: `name`/`identifier`,
    /// `federates`/`minfed`/`min`, `minbroker`, `maxiter`, `logfile`,
    /// `loglevel`, `fileloglevel`, `consoleloglevel`, `tick` (ms),
    /// `dumplog`, `timeout` (ms).
    pub fn apply_option(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        match name {
            "name" | "identifier" => self.identifier = value.to_string(),
            "federates" | "minfed" | "min" => self.min_federates = parse_i32(name, value)?,
            "minbroker" => self.min_brokers = parse_i32(name, value)?,
            "maxiter" => self.max_iterations = parse_i32(name, value)?,
            "logfile" => self.logging.file_path = Some(PathBuf::from(value)),
            "loglevel" => {
                let level = parse_i32(name, value)?;
                self.logging.console_level = level;
                self.logging.file_level = level;
            }
            "fileloglevel" => self.logging.file_level = parse_i32(name, value)?,
            "consoleloglevel" => self.logging.console_level = parse_i32(name, value)?,
            "tick" => self.tick = Duration::from_millis(parse_u64(name, value)?),
            "timeout" => self.timeout = Duration::from_millis(parse_u64(name, value)?),
            // a bare flag: present with no value means enabled
            "dumplog" => self.logging.dump_log = value.is_empty() || parse_bool(name, value)?,
            _ => {
                return Err(ConfigError::UnknownOption {
                    name: name.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Apply a sequence of `(name, value)` option pairs.
    pub fn apply_options<'a, I>(&mut self, options: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in options {
            self.apply_option(name, value)?;
        }
        Ok(())
    }
}

fn parse_i32(name: &str, value: &str) -> Result<i32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidOptionValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidOptionValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" | "1" | "on" => Ok(true),
        "false" | "0" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidOptionValue {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(CoreConfig::default().validate().is_ok());
        assert!(CoreConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_max_level() {
        let logging = LoggingConfig {
            console_level: log_level::SUMMARY,
            file_level: log_level::TIMING,
            ..LoggingConfig::default()
        };
        assert_eq!(logging.max_level(), log_level::TIMING);
    }

    #[test]
    fn test_apply_option_aliases() {
        let mut config = CoreConfig::default();
        config.apply_option("min", "3").unwrap();
        assert_eq!(config.min_federates, 3);
        config.apply_option("minfed", "4").unwrap();
        assert_eq!(config.min_federates, 4);
        config.apply_option("federates", "5").unwrap();
        assert_eq!(config.min_federates, 5);

        config.apply_option("name", "broker1").unwrap();
        assert_eq!(config.identifier, "broker1");
        config.apply_option("identifier", "broker2").unwrap();
        assert_eq!(config.identifier, "broker2");
    }

    #[test]
    fn test_apply_option_logging() {
        let mut config = CoreConfig::default();
        config.apply_option("loglevel", "5").unwrap();
        assert_eq!(config.logging.console_level, 5);
        assert_eq!(config.logging.file_level, 5);
        config.apply_option("consoleloglevel", "1").unwrap();
        config.apply_option("fileloglevel", "6").unwrap();
        assert_eq!(config.logging.console_level, 1);
        assert_eq!(config.logging.file_level, 6);
        assert_eq!(config.logging.max_level(), 6);

        config.apply_option("logfile", "broker.log").unwrap();
        assert_eq!(config.logging.file_path, Some(PathBuf::from("broker.log")));

        config.apply_option("dumplog", "").unwrap();
        assert!(config.logging.dump_log);
    }

    #[test]
    fn test_apply_option_durations() {
        let mut config = CoreConfig::default();
        config.apply_option("tick", "200").unwrap();
        assert_eq!(config.tick, Duration::from_millis(200));
        config.apply_option("timeout", "15000").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_unknown_and_invalid_options() {
        let mut config = CoreConfig::default();
        assert!(matches!(
            config.apply_option("bogus", "1"),
            Err(ConfigError::UnknownOption { .. })
        ));
        assert!(matches!(
            config.apply_option("tick", "fast"),
            Err(ConfigError::InvalidOptionValue { .. })
        ));
    }
}
