//! Value interface records
//!
//! Publications and inputs are the named value endpoints of a federate. The
//! records here are pure data; the stateful registry that owns them lives in
//! the broker crate. Also defined here: the serde schema for declaring
//! interfaces in a configuration document.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::SimTime;

// ----------------------------------------------------------------------------
// Handle Option Codes
// ----------------------------------------------------------------------------

/// Interface option codes. Unknown codes are stored but inert.
pub mod handle_options {
    /// Publisher suppresses sends whose payload byte-equals the previous
    /// send.
    pub const ONLY_TRANSMIT_ON_CHANGE: i32 = 110;
    /// Input suppresses the update flag when the incoming payload
    /// byte-equals the stored payload.
    pub const ONLY_UPDATE_ON_CHANGE: i32 = 111;
}

// ----------------------------------------------------------------------------
// Interface Handles
// ----------------------------------------------------------------------------

/// Handle to a registered publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicationId(pub usize);

/// Handle to a registered input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputId(pub usize);

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pub:{}", self.0)
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input:{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Publication
// ----------------------------------------------------------------------------

/// A named outbound value endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    /// Federation-wide key (already prefixed for non-global registrations).
    pub key: String,
    /// Opaque type string, compared byte-for-byte when matching endpoints.
    pub type_name: String,
    /// Opaque unit metadata.
    pub units: String,
    pub global: bool,
    /// Destination inputs, in registration order, without duplicates.
    pub targets: Vec<String>,
    pub options: HashMap<i32, bool>,
}

impl Publication {
    pub fn new(key: impl Into<String>, type_name: impl Into<String>, units: impl Into<String>, global: bool) -> Self {
        Self {
            key: key.into(),
            type_name: type_name.into(),
            units: units.into(),
            global,
            targets: Vec::new(),
            options: HashMap::new(),
        }
    }

    pub fn add_target(&mut self, target: impl Into<String>) {
        let target = target.into();
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
    }

    pub fn option(&self, code: i32) -> bool {
        self.options.get(&code).copied().unwrap_or(false)
    }

    pub fn set_option(&mut self, code: i32, value: bool) {
        self.options.insert(code, value);
    }
}

// ----------------------------------------------------------------------------
// Input
// ----------------------------------------------------------------------------

/// A named inbound value endpoint.
///
/// A subscription is an `Input` whose key is the target publication's key
/// rather than a locally chosen name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub key: String,
    pub type_name: String,
    pub units: String,
    /// Source publications feeding this input, in registration order.
    pub sources: Vec<String>,
    /// Value returned before any publication arrives.
    pub default: Option<Vec<u8>>,
    pub last_value: Option<Vec<u8>>,
    /// [`SimTime::NEVER`] until the first update.
    pub last_update_time: SimTime,
    pub updated: bool,
    pub options: HashMap<i32, bool>,
}

impl Input {
    pub fn new(key: impl Into<String>, type_name: impl Into<String>, units: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            type_name: type_name.into(),
            units: units.into(),
            sources: Vec::new(),
            default: None,
            last_value: None,
            last_update_time: SimTime::NEVER,
            updated: false,
            options: HashMap::new(),
        }
    }

    pub fn add_source(&mut self, source: impl Into<String>) {
        let source = source.into();
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
    }

    pub fn option(&self, code: i32) -> bool {
        self.options.get(&code).copied().unwrap_or(false)
    }

    pub fn set_option(&mut self, code: i32, value: bool) {
        self.options.insert(code, value);
    }

    /// The currently visible value: the last update, else the default, else
    /// empty.
    pub fn value_bytes(&self) -> &[u8] {
        self.last_value
            .as_deref()
            .or(self.default.as_deref())
            .unwrap_or(&[])
    }
}

// ----------------------------------------------------------------------------
// Interface Document Schema
// ----------------------------------------------------------------------------

/// One interface declaration in a configuration document.
///
/// `options` keys are option names (`only_update_on_change`) or numeric
/// codes in string form; translation to codes happens at registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceDef {
    pub key: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub units: String,
    pub global: bool,
    pub targets: Vec<String>,
    pub options: HashMap<String, bool>,
    /// Optional default value, encoded through the codec registry for the
    /// declared type.
    pub default: Option<serde_json::Value>,
}

/// The parsed tree consumed by `register_interfaces`: arrays of publications
/// and inputs/subscriptions. Both JSON and TOML deserialize into this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceDocument {
    pub publications: Vec<InterfaceDef>,
    pub inputs: Vec<InterfaceDef>,
    pub subscriptions: Vec<InterfaceDef>,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
