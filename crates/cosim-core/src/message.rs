//! Action messages
//!
//! Every piece of traffic between federates, cores, and brokers is an
//! [`ActionMessage`]: a tagged envelope carrying source and destination node
//! ids, a flag bitfield, an opaque payload, and an optional simulation time.
//! Messages are immutable once enqueued and are moved, not copied, through
//! the queue.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::queue::CommandQueue;
use crate::types::{NodeId, SimTime};

// ----------------------------------------------------------------------------
// Action Tags
// ----------------------------------------------------------------------------

/// The command vocabulary of the federation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Discard without processing.
    Ignore,
    /// Watchdog command injected by the tick timer.
    Tick,
    /// Orderly shutdown: process, disconnect, then stop.
    Stop,
    /// Hard cancel; the dispatch loop exits without further processing.
    TerminateImmediately,
    /// Connection handshake with the parent broker.
    Connect,
    /// Handshake acknowledgement carrying the assigned global id.
    ConnectAck,
    /// Announce a publication to the federation.
    RegisterPublication,
    /// Announce a named input to the federation.
    RegisterInput,
    /// Attach a subscriber to a publication.
    AddSubscriber,
    /// A published value block.
    Publish,
    /// A federate requests advancement to a time.
    TimeRequest,
    /// The coordinator grants advancement to a time.
    TimeGrant,
    /// A dependency reports its minimum next-event time.
    TimeMessage,
    /// Add a time dependency edge.
    AddDependency,
    /// Remove a time dependency edge.
    RemoveDependency,
    /// Add a time dependent edge.
    AddDependent,
    /// Remove a time dependent edge.
    RemoveDependent,
    /// A node is leaving the federation.
    Disconnect,
    /// An error signalled by a peer or transport.
    Error,
}

impl Action {
    /// Handshake and registration commands jump the normal lane.
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            Action::Connect
                | Action::ConnectAck
                | Action::RegisterPublication
                | Action::RegisterInput
                | Action::AddSubscriber
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Ignore => "Ignore",
            Action::Tick => "Tick",
            Action::Stop => "Stop",
            Action::TerminateImmediately => "TerminateImmediately",
            Action::Connect => "Connect",
            Action::ConnectAck => "ConnectAck",
            Action::RegisterPublication => "RegisterPublication",
            Action::RegisterInput => "RegisterInput",
            Action::AddSubscriber => "AddSubscriber",
            Action::Publish => "Publish",
            Action::TimeRequest => "TimeRequest",
            Action::TimeGrant => "TimeGrant",
            Action::TimeMessage => "TimeMessage",
            Action::AddDependency => "AddDependency",
            Action::RemoveDependency => "RemoveDependency",
            Action::AddDependent => "AddDependent",
            Action::RemoveDependent => "RemoveDependent",
            Action::Disconnect => "Disconnect",
            Action::Error => "Error",
        }
    }

    /// Time-coordination commands, handled by the broker base itself.
    pub fn is_time_action(&self) -> bool {
        matches!(
            self,
            Action::TimeRequest
                | Action::TimeGrant
                | Action::TimeMessage
                | Action::AddDependency
                | Action::RemoveDependency
                | Action::AddDependent
                | Action::RemoveDependent
        )
    }
}

// ----------------------------------------------------------------------------
// Message Flags
// ----------------------------------------------------------------------------

/// The command carries an error condition (e.g. a tick fired by a failing
/// timer service).
pub const ERROR_FLAG: u16 = 0x0001;
/// Force priority-lane routing regardless of the action tag.
pub const PRIORITY_FLAG: u16 = 0x0002;

// ----------------------------------------------------------------------------
// Action Message
// ----------------------------------------------------------------------------

/// The envelope moved through the command queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMessage {
    pub action: Action,
    pub source: NodeId,
    pub dest: NodeId,
    pub flags: u16,
    pub payload: Vec<u8>,
    pub time: Option<SimTime>,
}

impl ActionMessage {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            source: NodeId::UNSET,
            dest: NodeId::UNSET,
            flags: 0,
            payload: Vec::new(),
            time: None,
        }
    }

    pub fn with_source(mut self, source: NodeId) -> Self {
        self.source = source;
        self
    }

    pub fn with_dest(mut self, dest: NodeId) -> Self {
        self.dest = dest;
        self
    }

    pub fn with_time(mut self, time: SimTime) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_flag(mut self, flag: u16) -> Self {
        self.flags |= flag;
        self
    }

    pub fn set_flag(&mut self, flag: u16) {
        self.flags |= flag;
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    /// Which queue lane this message belongs in.
    pub fn is_priority(&self) -> bool {
        self.action.is_priority() || self.has_flag(PRIORITY_FLAG)
    }
}

impl fmt::Display for ActionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.time {
            Some(t) => write!(f, "{}@{}", self.action.name(), t),
            None => write!(f, "{}", self.action.name()),
        }
    }
}

// ----------------------------------------------------------------------------
// Payload Framing
// ----------------------------------------------------------------------------

/// Payload of a [`Action::Publish`] command: the publication key plus the
/// opaque value block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuePayload {
    pub key: String,
    pub data: Vec<u8>,
}

/// Payload of the registration announcements emitted when a federate leaves
/// the startup phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRegistration {
    pub key: String,
    pub type_name: String,
    pub units: String,
    pub global: bool,
}

// ----------------------------------------------------------------------------
// Message Sender
// ----------------------------------------------------------------------------

/// A cloneable handle for emitting outbound [`ActionMessage`]s.
///
/// The core never talks to a transport directly; it hands messages to
/// whatever sink was injected here. The time coordinator is constructed with
/// a sender that loops back into the owning broker's own queue.
#[derive(Clone)]
pub struct MessageSender(Arc<dyn Fn(ActionMessage) + Send + Sync>);

impl MessageSender {
    pub fn new(sink: impl Fn(ActionMessage) + Send + Sync + 'static) -> Self {
        Self(Arc::new(sink))
    }

    /// A sender that routes back into a command queue, honouring lane
    /// classification.
    pub fn from_queue(queue: &Arc<CommandQueue>) -> Self {
        let queue = Arc::clone(queue);
        Self::new(move |msg| queue.submit(msg))
    }

    /// A sender that drops everything; useful as a placeholder in tests.
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn send(&self, message: ActionMessage) {
        (self.0)(message);
    }
}

impl fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSender").finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
