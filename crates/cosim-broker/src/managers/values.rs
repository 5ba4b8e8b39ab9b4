//! Value federate manager
//!
//! The registry of a federate's publications, inputs, and subscriptions,
//! and the router that moves published value blocks into matching inputs.
//! Registration is gated to the startup phase; once the federate moves to
//! initialization the tables are frozen and announced to the broker.
//!
//! Incoming value commands are buffered and drained by `update_time`, which
//! the federate's step loop calls after each grant; the drain applies
//! commands in non-decreasing timestamp order with ties broken by source id.

use std::collections::HashMap;

use cosim_core::interfaces::handle_options;
use cosim_core::{
    Action, ActionMessage, CodecRegistry, CoreError, CoreResult, Input, InputId,
    InterfaceDef, InterfaceDocument, InterfaceRegistration, MessageSender, NodeId, Publication,
    PublicationId, RegistrationError, SimTime, ValueKind, ValuePayload,
};

// ----------------------------------------------------------------------------
// Federate Phase
// ----------------------------------------------------------------------------

/// Lifecycle phase of the owning federate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederateState {
    /// Interfaces may be registered.
    Startup,
    /// Tables frozen; defaults may still be applied.
    Initialization,
    /// Stepping through simulation time.
    Execution,
    /// Disconnected from the federation.
    Finalize,
}

impl std::fmt::Display for FederateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FederateState::Startup => "startup",
            FederateState::Initialization => "initialization",
            FederateState::Execution => "execution",
            FederateState::Finalize => "finalize",
        };
        write!(f, "{name}")
    }
}

// ----------------------------------------------------------------------------
// Value Manager
// ----------------------------------------------------------------------------

/// Callback invoked when an input receives a value.
pub type InputCallback = Box<dyn FnMut(&Input, SimTime) + Send>;

/// A value command waiting for the owning federate to step past its time.
#[derive(Debug, Clone)]
struct PendingValue {
    time: SimTime,
    source: NodeId,
    input: InputId,
    payload: Vec<u8>,
}

/// Registry and router for a federate's value interfaces.
pub struct ValueManager {
    federate_name: String,
    state: FederateState,
    sender: MessageSender,
    codecs: CodecRegistry,

    publications: Vec<Publication>,
    publication_lookup: HashMap<String, PublicationId>,
    last_published: HashMap<PublicationId, Vec<u8>>,

    inputs: Vec<Input>,
    input_lookup: HashMap<String, InputId>,
    /// Publication key -> inputs fed by it.
    source_lookup: HashMap<String, Vec<InputId>>,
    shortcuts: HashMap<String, InputId>,

    callbacks: HashMap<InputId, InputCallback>,
    generic_callback: Option<InputCallback>,
    /// Inputs whose only value so far is a default.
    default_only: Vec<InputId>,

    pending: Vec<PendingValue>,
    current_time: SimTime,
}

impl ValueManager {
    pub fn new(federate_name: impl Into<String>, sender: MessageSender) -> Self {
        Self {
            federate_name: federate_name.into(),
            state: FederateState::Startup,
            sender,
            codecs: CodecRegistry::with_standard_types(),
            publications: Vec::new(),
            publication_lookup: HashMap::new(),
            last_published: HashMap::new(),
            inputs: Vec::new(),
            input_lookup: HashMap::new(),
            source_lookup: HashMap::new(),
            shortcuts: HashMap::new(),
            callbacks: HashMap::new(),
            generic_callback: None,
            default_only: Vec::new(),
            pending: Vec::new(),
            current_time: SimTime::ZERO,
        }
    }

    pub fn federate_name(&self) -> &str {
        &self.federate_name
    }

    pub fn state(&self) -> FederateState {
        self.state
    }

    pub fn current_time(&self) -> SimTime {
        self.current_time
    }

    fn require_startup(&self) -> Result<(), RegistrationError> {
        if self.state != FederateState::Startup {
            return Err(RegistrationError::InvalidState {
                phase: self.state.to_string(),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Publication registration
    // ------------------------------------------------------------------

    /// Register a publication; the key is prefixed with the federate name.
    pub fn register_publication(
        &mut self,
        key: &str,
        type_name: &str,
        units: &str,
    ) -> CoreResult<PublicationId> {
        let key = format!("{}.{}", self.federate_name, key);
        self.insert_publication(key, type_name, units, false)
    }

    /// Register a publication under a federation-wide key.
    pub fn register_global_publication(
        &mut self,
        key: &str,
        type_name: &str,
        units: &str,
    ) -> CoreResult<PublicationId> {
        self.insert_publication(key.to_string(), type_name, units, true)
    }

    /// Register a publication as part of an indexed structure; indexed keys
    /// are always global, with `_i1[_i2...]` appended.
    pub fn register_publication_indexed(
        &mut self,
        key: &str,
        indices: &[i32],
        type_name: &str,
        units: &str,
    ) -> CoreResult<PublicationId> {
        self.insert_publication(indexed_key(key, indices), type_name, units, true)
    }

    fn insert_publication(
        &mut self,
        key: String,
        type_name: &str,
        units: &str,
        global: bool,
    ) -> CoreResult<PublicationId> {
        self.require_startup()?;
        if self.publication_lookup.contains_key(&key) {
            return Err(RegistrationError::DuplicateKey { key }.into());
        }
        let id = PublicationId(self.publications.len());
        self.publications
            .push(Publication::new(key.clone(), type_name, units, global));
        self.publication_lookup.insert(key, id);
        Ok(id)
    }

    /// Add a destination input to a publication.
    pub fn add_publication_target(
        &mut self,
        id: PublicationId,
        target: &str,
    ) -> CoreResult<()> {
        self.require_startup()?;
        let publication = self.publication_mut(id)?;
        publication.add_target(target);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Input / subscription registration
    // ------------------------------------------------------------------

    /// Register a named input; the key is prefixed with the federate name.
    pub fn register_input(
        &mut self,
        key: &str,
        type_name: &str,
        units: &str,
    ) -> CoreResult<InputId> {
        let key = format!("{}.{}", self.federate_name, key);
        self.insert_input(key, type_name, units)
    }

    /// Register an input under a federation-wide key.
    pub fn register_global_input(
        &mut self,
        key: &str,
        type_name: &str,
        units: &str,
    ) -> CoreResult<InputId> {
        self.insert_input(key.to_string(), type_name, units)
    }

    /// Register an input as part of an indexed structure; indexed keys are
    /// always global, with `_i1[_i2...]` appended.
    pub fn register_input_indexed(
        &mut self,
        key: &str,
        indices: &[i32],
        type_name: &str,
        units: &str,
    ) -> CoreResult<InputId> {
        self.insert_input(indexed_key(key, indices), type_name, units)
    }

    /// Register a subscription: an input whose key is the target
    /// publication's key.
    pub fn register_subscription(&mut self, target: &str, units: &str) -> CoreResult<InputId> {
        let id = self.insert_input(target.to_string(), "", units)?;
        self.attach_source(id, target);
        Ok(id)
    }

    /// Register a subscription to an indexed publication.
    pub fn register_subscription_indexed(
        &mut self,
        target: &str,
        indices: &[i32],
        units: &str,
    ) -> CoreResult<InputId> {
        self.register_subscription(&indexed_key(target, indices), units)
    }

    fn insert_input(&mut self, key: String, type_name: &str, units: &str) -> CoreResult<InputId> {
        self.require_startup()?;
        if self.input_lookup.contains_key(&key) {
            return Err(RegistrationError::DuplicateKey { key }.into());
        }
        let id = InputId(self.inputs.len());
        self.inputs.push(Input::new(key.clone(), type_name, units));
        self.input_lookup.insert(key, id);
        Ok(id)
    }

    /// Add a source publication to an input.
    pub fn add_input_source(&mut self, id: InputId, source: &str) -> CoreResult<()> {
        self.require_startup()?;
        self.input_mut(id)?;
        self.attach_source(id, source);
        self.warn_on_type_mismatch(id, source);
        Ok(())
    }

    fn attach_source(&mut self, id: InputId, source: &str) {
        self.inputs[id.0].add_source(source);
        let entry = self.source_lookup.entry(source.to_string()).or_default();
        if !entry.contains(&id) {
            entry.push(id);
        }
    }

    /// Cross-type bindings are declared intent: warn, never fail.
    fn warn_on_type_mismatch(&self, id: InputId, source: &str) {
        if let Some(pub_id) = self.publication_lookup.get(source) {
            let pub_type = &self.publications[pub_id.0].type_name;
            let input_type = &self.inputs[id.0].type_name;
            if !input_type.is_empty() && !pub_type.is_empty() && pub_type != input_type {
                tracing::warn!(
                    "input '{}' ({}) bound to publication '{}' ({})",
                    self.inputs[id.0].key,
                    input_type,
                    source,
                    pub_type
                );
            }
        }
    }

    /// Register `name` as a lookup alias for an input.
    pub fn add_shortcut(&mut self, id: InputId, name: &str) -> CoreResult<()> {
        self.input_mut(id)?;
        if self.shortcuts.contains_key(name) {
            return Err(RegistrationError::DuplicateKey {
                key: name.to_string(),
            }
            .into());
        }
        self.shortcuts.insert(name.to_string(), id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Handle lookup
    // ------------------------------------------------------------------

    fn publication_mut(&mut self, id: PublicationId) -> CoreResult<&mut Publication> {
        self.publications
            .get_mut(id.0)
            .ok_or_else(|| RegistrationError::UnknownHandle {
                kind: "publication",
                id: id.0,
            }
            .into())
    }

    fn publication_ref(&self, id: PublicationId) -> CoreResult<&Publication> {
        self.publications
            .get(id.0)
            .ok_or_else(|| RegistrationError::UnknownHandle {
                kind: "publication",
                id: id.0,
            }
            .into())
    }

    fn input_mut(&mut self, id: InputId) -> CoreResult<&mut Input> {
        self.inputs
            .get_mut(id.0)
            .ok_or_else(|| RegistrationError::UnknownHandle {
                kind: "input",
                id: id.0,
            }
            .into())
    }

    fn input_ref(&self, id: InputId) -> CoreResult<&Input> {
        self.inputs
            .get(id.0)
            .ok_or_else(|| RegistrationError::UnknownHandle {
                kind: "input",
                id: id.0,
            }
            .into())
    }

    /// Find an input by name. Precedence: exact local key, then global key,
    /// then shortcut.
    pub fn find_input(&self, name: &str) -> Option<InputId> {
        let local = format!("{}.{}", self.federate_name, name);
        self.input_lookup
            .get(&local)
            .or_else(|| self.input_lookup.get(name))
            .or_else(|| self.shortcuts.get(name))
            .copied()
    }

    /// Find a publication by name, trying the local prefix first.
    pub fn find_publication(&self, name: &str) -> Option<PublicationId> {
        let local = format!("{}.{}", self.federate_name, name);
        self.publication_lookup
            .get(&local)
            .or_else(|| self.publication_lookup.get(name))
            .copied()
    }

    pub fn publication_count(&self) -> usize {
        self.publications.len()
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn publication_key(&self, id: PublicationId) -> CoreResult<&str> {
        Ok(&self.publication_ref(id)?.key)
    }

    pub fn publication_type(&self, id: PublicationId) -> CoreResult<&str> {
        Ok(&self.publication_ref(id)?.type_name)
    }

    pub fn publication_units(&self, id: PublicationId) -> CoreResult<&str> {
        Ok(&self.publication_ref(id)?.units)
    }

    pub fn input_key(&self, id: InputId) -> CoreResult<&str> {
        Ok(&self.input_ref(id)?.key)
    }

    pub fn input_type(&self, id: InputId) -> CoreResult<&str> {
        Ok(&self.input_ref(id)?.type_name)
    }

    pub fn input_units(&self, id: InputId) -> CoreResult<&str> {
        Ok(&self.input_ref(id)?.units)
    }

    /// The first source target of an input (the selector, for a
    /// subscription).
    pub fn input_target(&self, id: InputId) -> CoreResult<&str> {
        Ok(self
            .input_ref(id)?
            .sources
            .first()
            .map(String::as_str)
            .unwrap_or(""))
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    pub fn set_publication_option(
        &mut self,
        id: PublicationId,
        code: i32,
        value: bool,
    ) -> CoreResult<()> {
        self.publication_mut(id)?.set_option(code, value);
        Ok(())
    }

    pub fn publication_option(&self, id: PublicationId, code: i32) -> CoreResult<bool> {
        Ok(self.publication_ref(id)?.option(code))
    }

    pub fn set_input_option(&mut self, id: InputId, code: i32, value: bool) -> CoreResult<()> {
        self.input_mut(id)?.set_option(code, value);
        Ok(())
    }

    pub fn input_option(&self, id: InputId, code: i32) -> CoreResult<bool> {
        Ok(self.input_ref(id)?.option(code))
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    /// Install a callback for one input, replacing any previous one.
    pub fn set_input_callback(&mut self, id: InputId, callback: InputCallback) -> CoreResult<()> {
        self.input_mut(id)?;
        self.callbacks.insert(id, callback);
        Ok(())
    }

    /// Install the generic callback invoked for inputs without their own.
    pub fn set_callback(&mut self, callback: InputCallback) {
        self.generic_callback = Some(callback);
    }

    // ------------------------------------------------------------------
    // Defaults
    // ------------------------------------------------------------------

    /// Set the value returned before any publication arrives. Does not mark
    /// the input updated; fills `last_value` only if nothing has arrived.
    pub fn set_default_value(&mut self, id: InputId, data: Vec<u8>) -> CoreResult<()> {
        let input = self.input_mut(id)?;
        if input.last_value.is_none() {
            input.last_value = Some(data.clone());
        }
        input.default = Some(data);
        if !self.default_only.contains(&id) {
            self.default_only.push(id);
        }
        Ok(())
    }

    /// Typed default-value setter.
    pub fn set_default<X: ValueKind>(&mut self, id: InputId, value: &X) -> CoreResult<()> {
        self.set_default_value(id, value.encode())
    }

    // ------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------

    /// Publish an opaque value block at the given time.
    pub fn publish(&mut self, id: PublicationId, data: Vec<u8>, time: SimTime) -> CoreResult<()> {
        if self.state == FederateState::Startup || self.state == FederateState::Finalize {
            return Err(RegistrationError::InvalidState {
                phase: self.state.to_string(),
            }
            .into());
        }
        let publication = self.publication_ref(id)?;
        let key = publication.key.clone();
        if publication.option(handle_options::ONLY_TRANSMIT_ON_CHANGE) {
            if let Some(previous) = self.last_published.get(&id) {
                if *previous == data {
                    return Ok(());
                }
            }
        }
        self.last_published.insert(id, data.clone());

        let payload = bincode::serialize(&ValuePayload { key, data })?;
        self.sender.send(
            ActionMessage::new(Action::Publish)
                .with_payload(payload)
                .with_time(time),
        );
        Ok(())
    }

    /// Typed publish through the codec for `X`.
    pub fn publish_value<X: ValueKind>(
        &mut self,
        id: PublicationId,
        value: &X,
        time: SimTime,
    ) -> CoreResult<()> {
        self.publish(id, value.encode(), time)
    }

    // ------------------------------------------------------------------
    // Incoming values
    // ------------------------------------------------------------------

    /// Accept a `Publish` command from the dispatcher and buffer it for the
    /// inputs fed by that publication key.
    pub fn handle_value_command(&mut self, message: &ActionMessage) -> CoreResult<()> {
        let payload: ValuePayload = bincode::deserialize(&message.payload)?;
        let time = message.time.unwrap_or(self.current_time);
        self.route_publication(&payload.key, payload.data, time, message.source);
        Ok(())
    }

    /// Buffer a value block for every input fed by `key`.
    pub fn route_publication(&mut self, key: &str, data: Vec<u8>, time: SimTime, source: NodeId) {
        let Some(ids) = self.source_lookup.get(key) else {
            tracing::debug!("dropping value for unknown publication '{key}'");
            return;
        };
        for id in ids.clone() {
            self.pending.push(PendingValue {
                time,
                source,
                input: id,
                payload: data.clone(),
            });
        }
    }

    /// Drain buffered value commands with timestamps in `(old, new]` into
    /// the inputs, then advance the manager's time to `new`.
    pub fn update_time(&mut self, new: SimTime, old: SimTime) {
        let mut due: Vec<PendingValue> = Vec::new();
        let mut rest: Vec<PendingValue> = Vec::new();
        for pending in self.pending.drain(..) {
            if pending.time > old && pending.time <= new {
                due.push(pending);
            } else {
                rest.push(pending);
            }
        }
        self.pending = rest;
        // stable sort preserves arrival order for exact ties
        due.sort_by_key(|p| (p.time, p.source));

        for pending in due {
            let input = &mut self.inputs[pending.input.0];
            if input.option(handle_options::ONLY_UPDATE_ON_CHANGE)
                && input.last_value.as_deref() == Some(pending.payload.as_slice())
            {
                continue;
            }
            input.last_value = Some(pending.payload);
            input.last_update_time = pending.time;
            input.updated = true;
            self.default_only.retain(|id| *id != pending.input);

            let input = &self.inputs[pending.input.0];
            if let Some(callback) = self.callbacks.get_mut(&pending.input) {
                callback(input, pending.time);
            } else if let Some(callback) = self.generic_callback.as_mut() {
                callback(input, pending.time);
            }
        }
        self.current_time = new;
    }

    /// The inputs whose update flag is set. Reading a value clears the
    /// flag; querying does not.
    pub fn query_updates(&self) -> Vec<InputId> {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| input.updated)
            .map(|(idx, _)| InputId(idx))
            .collect()
    }

    pub fn is_updated(&self, id: InputId) -> CoreResult<bool> {
        Ok(self.input_ref(id)?.updated)
    }

    pub fn last_update_time(&self, id: InputId) -> CoreResult<SimTime> {
        Ok(self.input_ref(id)?.last_update_time)
    }

    /// The raw value of an input. Reading clears the update flag.
    pub fn get_value_raw(&mut self, id: InputId) -> CoreResult<Vec<u8>> {
        let input = self.input_mut(id)?;
        input.updated = false;
        Ok(input.value_bytes().to_vec())
    }

    /// Typed read through the codec for `X`. Reading clears the update
    /// flag.
    pub fn get_value<X: ValueKind>(&mut self, id: InputId) -> CoreResult<X> {
        let data = self.get_value_raw(id)?;
        X::decode(&data)
    }

    // ------------------------------------------------------------------
    // State transitions
    // ------------------------------------------------------------------

    /// Freeze the registration tables and announce every interface to the
    /// broker.
    pub fn startup_to_initialize(&mut self) -> CoreResult<()> {
        self.require_startup()?;
        self.state = FederateState::Initialization;

        for publication in &self.publications {
            let payload = bincode::serialize(&InterfaceRegistration {
                key: publication.key.clone(),
                type_name: publication.type_name.clone(),
                units: publication.units.clone(),
                global: publication.global,
            })?;
            self.sender
                .send(ActionMessage::new(Action::RegisterPublication).with_payload(payload));
        }
        for input in &self.inputs {
            let payload = bincode::serialize(&InterfaceRegistration {
                key: input.key.clone(),
                type_name: input.type_name.clone(),
                units: input.units.clone(),
                global: true,
            })?;
            self.sender
                .send(ActionMessage::new(Action::RegisterInput).with_payload(payload));
            // announce each source attachment so the routing layer can wire
            // the publication to this input
            for source in &input.sources {
                let payload = bincode::serialize(&InterfaceRegistration {
                    key: source.clone(),
                    type_name: input.type_name.clone(),
                    units: input.units.clone(),
                    global: true,
                })?;
                self.sender
                    .send(ActionMessage::new(Action::AddSubscriber).with_payload(payload));
            }
        }
        Ok(())
    }

    /// Enter execution; inputs that only ever received a default start with
    /// a clear update flag so the first `query_updates` is empty.
    pub fn initialize_to_execute(&mut self) -> CoreResult<()> {
        if self.state != FederateState::Initialization {
            return Err(RegistrationError::InvalidState {
                phase: self.state.to_string(),
            }
            .into());
        }
        self.state = FederateState::Execution;
        for id in &self.default_only {
            self.inputs[id.0].updated = false;
        }
        Ok(())
    }

    /// Leave the federation: drop pending values and stop accepting
    /// operations.
    pub fn disconnect(&mut self) {
        self.state = FederateState::Finalize;
        self.pending.clear();
        self.sender.send(ActionMessage::new(Action::Disconnect));
    }

    // ------------------------------------------------------------------
    // Interface document intake
    // ------------------------------------------------------------------

    /// Register every interface declared in a parsed document.
    pub fn register_interfaces(&mut self, document: &InterfaceDocument) -> CoreResult<()> {
        for def in &document.publications {
            let id = if def.global {
                self.register_global_publication(&def.key, &def.type_name, &def.units)?
            } else {
                self.register_publication(&def.key, &def.type_name, &def.units)?
            };
            for target in &def.targets {
                self.add_publication_target(id, target)?;
            }
            for (name, value) in &def.options {
                let code = option_code(name)?;
                self.set_publication_option(id, code, *value)?;
            }
        }
        for def in &document.inputs {
            let id = if def.global {
                self.register_global_input(&def.key, &def.type_name, &def.units)?
            } else {
                self.register_input(&def.key, &def.type_name, &def.units)?
            };
            self.configure_input(id, def)?;
        }
        for def in &document.subscriptions {
            let id = self.register_subscription(&def.key, &def.units)?;
            if !def.type_name.is_empty() {
                self.inputs[id.0].type_name = def.type_name.clone();
            }
            self.configure_input(id, def)?;
        }
        Ok(())
    }

    fn configure_input(&mut self, id: InputId, def: &InterfaceDef) -> CoreResult<()> {
        for target in &def.targets {
            self.add_input_source(id, target)?;
        }
        for (name, value) in &def.options {
            let code = option_code(name)?;
            self.set_input_option(id, code, *value)?;
        }
        if let Some(default) = &def.default {
            let type_name = if def.type_name.is_empty() {
                "double"
            } else {
                &def.type_name
            };
            let data = self.codecs.encode_json(type_name, default)?;
            self.set_default_value(id, data)?;
        }
        Ok(())
    }

    /// Register interfaces from a JSON document string.
    pub fn register_interfaces_json(&mut self, text: &str) -> CoreResult<()> {
        let document: InterfaceDocument = serde_json::from_str(text)
            .map_err(|e| CoreError::channel(format!("invalid interface document: {e}")))?;
        self.register_interfaces(&document)
    }

    /// Register interfaces from a TOML document string.
    pub fn register_interfaces_toml(&mut self, text: &str) -> CoreResult<()> {
        let document: InterfaceDocument = toml::from_str(text)
            .map_err(|e| CoreError::channel(format!("invalid interface document: {e}")))?;
        self.register_interfaces(&document)
    }
}

impl std::fmt::Debug for ValueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueManager")
            .field("federate_name", &self.federate_name)
            .field("state", &self.state)
            .field("publications", &self.publications.len())
            .field("inputs", &self.inputs.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Compose an indexed key: `key_i1` or `key_i1_i2`.
fn indexed_key(key: &str, indices: &[i32]) -> String {
    let mut composed = key.to_string();
    for index in indices {
        composed.push('_');
        composed.push_str(&index.to_string());
    }
    composed
}

/// Translate an option name or numeric code string to an option code.
fn option_code(name: &str) -> CoreResult<i32> {
    match name {
        "only_transmit_on_change" => Ok(handle_options::ONLY_TRANSMIT_ON_CHANGE),
        "only_update_on_change" => Ok(handle_options::ONLY_UPDATE_ON_CHANGE),
        other => other.parse().map_err(|_| {
            cosim_core::ConfigError::UnknownOption {
                name: other.to_string(),
            }
            .into()
        }),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
