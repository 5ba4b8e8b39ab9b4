//! Engine of the cosim federation runtime
//!
//! This crate contains the runtime machinery built on the `cosim-core`
//! protocol layer:
//! - [`BrokerBase`]: the single-threaded command dispatcher, tick watchdog,
//!   and lifecycle owner shared by brokers and cores
//! - [`TimeCoordinator`]: grant/deny decisions for simulation-time
//!   advancement
//! - [`ValueManager`]: the registry and router for a federate's value
//!   interfaces
//! - [`Logger`]: console/file/user-callback log triage
//!
//! Concrete transports stay outside: they deliver commands through
//! [`BrokerBase::add_action_message`] and receive outbound traffic through a
//! `MessageSender`.

pub mod broker;
pub mod federate;
pub mod logging;
pub mod managers;
pub mod time;

pub use broker::{BrokerBase, BrokerContext, BrokerState, CommandProcessor};
pub use federate::{FederateCore, ValueManagerHandle};
pub use logging::{LogCallback, Logger};
pub use managers::{FederateState, ValueManager};
pub use time::{FederateTimeState, TimeCoordinator};

// Re-export the protocol vocabulary for convenience.
pub use cosim_core::{
    Action, ActionMessage, CommandQueue, CoreConfig, CoreError, CoreResult, MessageSender, NodeId,
    SimTime,
};
