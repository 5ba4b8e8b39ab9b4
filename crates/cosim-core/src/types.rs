//! Core types for the federation protocol
//!
//! Simulation time, node identifiers, and node identity records used
//! throughout the runtime. Newtype wrappers keep the raw representations
//! out of the rest of the codebase.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Simulation Time
// ----------------------------------------------------------------------------

/// A point in simulation time, stored as a signed nanosecond count.
///
/// The integer representation keeps time comparisons exact; conversion to and
/// from floating-point seconds happens only at the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(i64);

const NS_PER_SEC: f64 = 1e9;

impl SimTime {
    /// Simulation start.
    pub const ZERO: Self = Self(0);
    /// Sentinel for "no update has ever occurred"; compares below every
    /// reachable time.
    pub const NEVER: Self = Self(i64::MIN);
    /// The end of time; used as the floor for empty dependency sets.
    pub const MAX: Self = Self(i64::MAX);

    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Convert from wire-format seconds.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NS_PER_SEC) as i64)
    }

    /// Convert to wire-format seconds.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / NS_PER_SEC
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NEVER {
            write!(f, "NEVER")
        } else if *self == Self::MAX {
            write!(f, "MAX")
        } else {
            write!(f, "{}", self.as_secs_f64())
        }
    }
}

// ----------------------------------------------------------------------------
// Node Identifier
// ----------------------------------------------------------------------------

/// Identifier of a node (federate, core, or broker) within a federation.
///
/// Ids are assigned by the parent broker during the connection handshake;
/// until then a node carries [`NodeId::UNSET`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(i32);

impl NodeId {
    /// Not yet assigned by a parent broker.
    pub const UNSET: Self = Self(-1);
    /// The root broker of a federation.
    pub const ROOT: Self = Self(0);

    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn raw(&self) -> i32 {
        self.0
    }

    pub fn is_set(&self) -> bool {
        *self != Self::UNSET
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Node Identity
// ----------------------------------------------------------------------------

/// Name and federation-wide id of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Human-readable identifier; user supplied or auto-generated.
    pub identifier: String,
    /// Assigned by the parent broker during the handshake.
    pub global_id: NodeId,
}

impl NodeIdentity {
    pub fn named(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            global_id: NodeId::UNSET,
        }
    }

    /// Identity with an auto-generated identifier.
    pub fn generated() -> Self {
        Self::named(generate_identifier())
    }

    pub fn assign_global_id(&mut self, id: NodeId) {
        self.global_id = id;
    }
}

/// Generate a process-unique node identifier of the form `<pid>-<uuid>`.
pub fn generate_identifier() -> String {
    format!("{}-{}", std::process::id(), Uuid::new_v4())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
