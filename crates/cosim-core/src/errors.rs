//! Error types for the federation core
//!
//! Specific error enums for configuration and interface registration, plus
//! the unifying [`CoreError`] the rest of the workspace returns. The
//! dispatcher loop never lets an error cross its boundary as a panic; fatal
//! conditions are signalled as values.

use crate::types::SimTime;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised while validating a broker or core configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no broker address specified and autobroker is disabled")]
    MissingBrokerAddress,
    #[error("invalid port for {field}: {value}")]
    InvalidPort { field: &'static str, value: i32 },
    #[error("invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
    #[error("unrecognized option '{name}'")]
    UnknownOption { name: String },
    #[error("invalid value '{value}' for option '{name}'")]
    InvalidOptionValue { name: String, value: String },
}

/// Errors raised by interface registration and handle lookup.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("registration is only valid in the startup phase (currently {phase})")]
    InvalidState { phase: String },
    #[error("an interface named '{key}' is already registered")]
    DuplicateKey { key: String },
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: usize },
}

// ----------------------------------------------------------------------------
// Core Error
// ----------------------------------------------------------------------------

/// The unified error type of the federation core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error for type '{type_name}': {reason}")]
    Codec { type_name: String, reason: String },

    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("time violation: requested grant {requested} is below previous grant {granted}")]
    TimeViolation {
        requested: SimTime,
        granted: SimTime,
    },

    #[error("channel error: {message}")]
    Channel { message: String },

    #[error("operation invalid in broker state {state}")]
    InvalidBrokerState { state: String },
}

pub type CoreResult<T> = Result<T, CoreError>;

// ----------------------------------------------------------------------------
// Convenience Constructors
// ----------------------------------------------------------------------------

impl CoreError {
    pub fn codec<T: Into<String>, R: Into<String>>(type_name: T, reason: R) -> Self {
        CoreError::Codec {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    pub fn transport<R: Into<String>>(reason: R) -> Self {
        CoreError::Transport {
            reason: reason.into(),
        }
    }

    pub fn channel<M: Into<String>>(message: M) -> Self {
        CoreError::Channel {
            message: message.into(),
        }
    }

    /// True for conditions that must terminate the dispatch loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::TimeViolation { .. } | CoreError::Channel { .. }
        )
    }
}
