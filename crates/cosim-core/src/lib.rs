//! Protocol layer of the cosim federation runtime
//!
//! This crate is the stable vocabulary shared by brokers, cores, and
//! transports: the [`ActionMessage`] command set, the two-lane
//! [`CommandQueue`], simulation-time and identity types, the network address
//! model, and the typed configuration records. It spawns no tasks; the
//! engine lives in `cosim-broker`.
//!
//! ## Architecture Overview
//!
//! Transports deliver [`ActionMessage`]s into a broker's queue; a single
//! dispatcher consumes them and emits outbound messages through a
//! [`MessageSender`]. Everything a transport or an embedding application
//! needs to speak the protocol is defined here, so those crates never
//! depend on the engine.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod codec;
pub mod config;
pub mod errors;
pub mod interfaces;
pub mod message;
pub mod network;
pub mod queue;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use codec::{Codec, CodecRegistry, ValueKind};
pub use config::{log_level, CoreConfig, LoggingConfig};
pub use errors::{ConfigError, CoreError, CoreResult, RegistrationError};
pub use interfaces::{
    handle_options, Input, InputId, InterfaceDef, InterfaceDocument, Publication, PublicationId,
};
pub use message::{
    Action, ActionMessage, InterfaceRegistration, MessageSender, ValuePayload, ERROR_FLAG,
    PRIORITY_FLAG,
};
pub use network::{AddressSpec, InterfaceNetwork, InterfaceType, ServerMode};
pub use queue::CommandQueue;
pub use types::{generate_identifier, NodeId, NodeIdentity, SimTime};
