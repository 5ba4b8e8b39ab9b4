//! Federate-facing core processor
//!
//! A [`CommandProcessor`] that owns a [`ValueManager`] and gives the
//! embedding federate a handle to it. The dispatcher routes value traffic
//! into the manager; the federate's step loop drives registration,
//! publishing, and `update_time` through the shared handle.
//!
//! The manager sits behind a mutex only so the federate can reach it from
//! outside the dispatcher; in steady state the dispatcher is the sole
//! writer of routed values and the federate the sole driver of steps.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use cosim_core::config::log_level;
use cosim_core::{Action, ActionMessage, CoreResult, InterfaceRegistration, MessageSender};

use crate::broker::{BrokerContext, CommandProcessor};
use crate::managers::ValueManager;

/// Shared handle to a federate's value manager.
#[derive(Clone, Debug)]
pub struct ValueManagerHandle(Arc<Mutex<ValueManager>>);

impl ValueManagerHandle {
    pub fn new(federate_name: impl Into<String>, sender: MessageSender) -> Self {
        Self(Arc::new(Mutex::new(ValueManager::new(
            federate_name,
            sender,
        ))))
    }

    pub fn lock(&self) -> MutexGuard<'_, ValueManager> {
        self.0.lock().expect("value manager lock poisoned")
    }
}

/// The in-process hub a single federate talks to.
#[derive(Debug)]
pub struct FederateCore {
    manager: ValueManagerHandle,
}

impl FederateCore {
    pub fn new(manager: ValueManagerHandle) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> ValueManagerHandle {
        self.manager.clone()
    }
}

#[async_trait]
impl CommandProcessor for FederateCore {
    async fn process_command(
        &mut self,
        command: ActionMessage,
        ctx: &mut BrokerContext,
    ) -> CoreResult<()> {
        match command.action {
            Action::Publish => self.manager.lock().handle_value_command(&command)?,
            Action::Disconnect => {
                ctx.logger.log(
                    log_level::CONNECTIONS,
                    &ctx.identifier,
                    &format!("node {} disconnected", command.source),
                );
            }
            Action::Tick => {
                ctx.logger.log(
                    log_level::TIMING,
                    &ctx.identifier,
                    "no traffic for a full tick interval",
                );
            }
            _ => {}
        }
        Ok(())
    }

    async fn process_priority_command(
        &mut self,
        command: ActionMessage,
        ctx: &mut BrokerContext,
    ) -> CoreResult<()> {
        match command.action {
            Action::RegisterPublication | Action::RegisterInput | Action::AddSubscriber => {
                let registration: InterfaceRegistration = bincode::deserialize(&command.payload)?;
                ctx.logger.log(
                    log_level::INTERFACES,
                    &ctx.identifier,
                    &format!(
                        "registered {} '{}' ({})",
                        if command.action == Action::RegisterPublication {
                            "publication"
                        } else {
                            "input"
                        },
                        registration.key,
                        registration.type_name
                    ),
                );
            }
            _ => {}
        }
        Ok(())
    }

    async fn process_disconnect(&mut self, ctx: &mut BrokerContext) -> CoreResult<()> {
        self.manager.lock().disconnect();
        ctx.logger.log(
            log_level::CONNECTIONS,
            &ctx.identifier,
            "federate core disconnecting",
        );
        Ok(())
    }
}
