//! Recording doubles
//!
//! [`RecordingProcessor`] implements `CommandProcessor` and republishes
//! every hook invocation, in dispatch order, on an unbounded channel so
//! tests can assert on exact sequences. [`CollectingSender`] is a
//! `MessageSender` that appends into a shared vector.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use cosim_broker::{BrokerContext, CommandProcessor};
use cosim_core::{ActionMessage, CoreResult, MessageSender};

// ----------------------------------------------------------------------------
// Recording Processor
// ----------------------------------------------------------------------------

/// One observed hook invocation, in dispatch order.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Command(ActionMessage),
    PriorityCommand(ActionMessage),
    Disconnect,
}

impl Dispatched {
    /// The carried message, if any.
    pub fn message(&self) -> Option<&ActionMessage> {
        match self {
            Dispatched::Command(msg) | Dispatched::PriorityCommand(msg) => Some(msg),
            Dispatched::Disconnect => None,
        }
    }
}

/// A processor that records everything the dispatcher hands it.
pub struct RecordingProcessor {
    tx: UnboundedSender<Dispatched>,
    reconnect_result: bool,
}

/// Build a recording processor and the receiver observing it.
pub fn recording_processor() -> (RecordingProcessor, UnboundedReceiver<Dispatched>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        RecordingProcessor {
            tx,
            reconnect_result: false,
        },
        rx,
    )
}

impl RecordingProcessor {
    /// What `try_reconnect` should report to the dispatcher.
    pub fn with_reconnect_result(mut self, result: bool) -> Self {
        self.reconnect_result = result;
        self
    }
}

#[async_trait]
impl CommandProcessor for RecordingProcessor {
    async fn process_command(
        &mut self,
        command: ActionMessage,
        _ctx: &mut BrokerContext,
    ) -> CoreResult<()> {
        let _ = self.tx.send(Dispatched::Command(command));
        Ok(())
    }

    async fn process_priority_command(
        &mut self,
        command: ActionMessage,
        _ctx: &mut BrokerContext,
    ) -> CoreResult<()> {
        let _ = self.tx.send(Dispatched::PriorityCommand(command));
        Ok(())
    }

    async fn process_disconnect(&mut self, _ctx: &mut BrokerContext) -> CoreResult<()> {
        let _ = self.tx.send(Dispatched::Disconnect);
        Ok(())
    }

    fn try_reconnect(&mut self) -> bool {
        self.reconnect_result
    }
}

// ----------------------------------------------------------------------------
// Collecting Sender
// ----------------------------------------------------------------------------

/// A message sink that appends into a shared vector.
#[derive(Default, Clone)]
pub struct CollectingSender {
    messages: Arc<Mutex<Vec<ActionMessage>>>,
}

impl CollectingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `MessageSender` writing into this collector.
    pub fn sender(&self) -> MessageSender {
        let messages = Arc::clone(&self.messages);
        MessageSender::new(move |msg| {
            messages.lock().expect("collector lock poisoned").push(msg)
        })
    }

    /// Snapshot of everything sent so far.
    pub fn messages(&self) -> Vec<ActionMessage> {
        self.messages
            .lock()
            .expect("collector lock poisoned")
            .clone()
    }

    pub fn clear(&self) {
        self.messages.lock().expect("collector lock poisoned").clear();
    }
}
