//! Time coordination
//!
//! The per-node view of federation time. For every locally managed federate
//! the coordinator tracks the granted time, an outstanding request, and the
//! dependency/dependent edges; remote nodes are visible only through the
//! minimum next-event times they report. Grant and forward decisions leave
//! through the injected [`MessageSender`], which in a broker points back at
//! the broker's own command queue.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use cosim_core::{Action, ActionMessage, CoreError, CoreResult, MessageSender, NodeId, SimTime};

// ----------------------------------------------------------------------------
// Federate Time State
// ----------------------------------------------------------------------------

/// Time bookkeeping for one locally managed federate.
///
/// Invariant: `granted <= current`, and `granted` never decreases.
#[derive(Debug, Clone)]
pub struct FederateTimeState {
    pub granted: SimTime,
    pub current: SimTime,
    pub requested: Option<SimTime>,
    pub dependencies: BTreeSet<NodeId>,
    pub dependents: BTreeSet<NodeId>,
}

impl Default for FederateTimeState {
    fn default() -> Self {
        Self {
            granted: SimTime::ZERO,
            current: SimTime::ZERO,
            requested: None,
            dependencies: BTreeSet::new(),
            dependents: BTreeSet::new(),
        }
    }
}

// ----------------------------------------------------------------------------
// Time Coordinator
// ----------------------------------------------------------------------------

/// Grant/deny engine for simulation-time advancement.
#[derive(Debug)]
pub struct TimeCoordinator {
    sender: MessageSender,
    /// Ordered map so simultaneous eligibility resolves by ascending id.
    federates: BTreeMap<NodeId, FederateTimeState>,
    /// Latest minimum next-event time reported by each remote node.
    reported: HashMap<NodeId, SimTime>,
}

impl TimeCoordinator {
    pub fn new(sender: MessageSender) -> Self {
        Self {
            sender,
            federates: BTreeMap::new(),
            reported: HashMap::new(),
        }
    }

    pub fn register_federate(&mut self, id: NodeId) {
        self.federates.entry(id).or_default();
    }

    pub fn state(&self, id: NodeId) -> Option<&FederateTimeState> {
        self.federates.get(&id)
    }

    pub fn granted(&self, id: NodeId) -> Option<SimTime> {
        self.federates.get(&id).map(|s| s.granted)
    }

    /// Add a dependency edge; the federate cannot advance past what
    /// `dependency` has reported.
    pub fn add_dependency(&mut self, federate: NodeId, dependency: NodeId) {
        self.federates
            .entry(federate)
            .or_default()
            .dependencies
            .insert(dependency);
    }

    /// Remove a dependency edge. Removal may unblock a pending grant.
    pub fn remove_dependency(&mut self, federate: NodeId, dependency: NodeId) -> CoreResult<()> {
        if let Some(state) = self.federates.get_mut(&federate) {
            state.dependencies.remove(&dependency);
        }
        self.evaluate(federate, false)
    }

    pub fn add_dependent(&mut self, federate: NodeId, dependent: NodeId) {
        self.federates
            .entry(federate)
            .or_default()
            .dependents
            .insert(dependent);
    }

    pub fn remove_dependent(&mut self, federate: NodeId, dependent: NodeId) {
        if let Some(state) = self.federates.get_mut(&federate) {
            state.dependents.remove(&dependent);
        }
    }

    /// A local federate requests advancement to `time`.
    ///
    /// If every dependency has reported a minimum next-event time at or past
    /// the request, the grant is emitted immediately; otherwise the request
    /// is propagated to the dependents and the federate waits.
    pub fn handle_time_request(&mut self, federate: NodeId, time: SimTime) -> CoreResult<()> {
        let state = self.federates.entry(federate).or_default();
        if time < state.granted {
            return Err(CoreError::TimeViolation {
                requested: time,
                granted: state.granted,
            });
        }
        state.requested = Some(time);
        self.evaluate(federate, true)
    }

    /// A dependency reports its minimum next-event time. Every pending
    /// federate is re-evaluated in ascending id order.
    pub fn handle_time_message(&mut self, from: NodeId, min_te: SimTime) -> CoreResult<()> {
        self.reported.insert(from, min_te);
        let ids: Vec<NodeId> = self.federates.keys().copied().collect();
        for id in ids {
            self.evaluate(id, false)?;
        }
        Ok(())
    }

    /// Route a time-coordination command. Returns `false` when the action
    /// is not a time action.
    pub fn process_message(&mut self, message: &ActionMessage) -> CoreResult<bool> {
        let time = message.time.unwrap_or(SimTime::ZERO);
        match message.action {
            Action::TimeRequest => self.handle_time_request(message.source, time)?,
            Action::TimeMessage => self.handle_time_message(message.source, time)?,
            Action::TimeGrant => {
                // record the grant, but report it unhandled so the
                // dispatcher still forwards it to the federate
                if let Some(state) = self.federates.get_mut(&message.dest) {
                    if time > state.granted {
                        state.granted = time;
                        state.current = time;
                        state.requested = None;
                    }
                }
                return Ok(false);
            }
            Action::AddDependency => self.add_dependency(message.dest, message.source),
            Action::RemoveDependency => self.remove_dependency(message.dest, message.source)?,
            Action::AddDependent => self.add_dependent(message.dest, message.source),
            Action::RemoveDependent => self.remove_dependent(message.dest, message.source),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Re-check the grant condition for one federate.
    fn evaluate(&mut self, federate: NodeId, propagate: bool) -> CoreResult<()> {
        let (requested, dependencies, dependents) = match self.federates.get(&federate) {
            Some(state) => match state.requested {
                Some(requested) => (
                    requested,
                    state.dependencies.clone(),
                    state.dependents.clone(),
                ),
                None => return Ok(()),
            },
            None => return Ok(()),
        };

        // an unreported dependency blocks until its first time message
        let min_te = dependencies
            .iter()
            .map(|d| self.reported.get(d).copied().unwrap_or(SimTime::NEVER))
            .min()
            .unwrap_or(SimTime::MAX);

        if min_te >= requested {
            if let Some(state) = self.federates.get_mut(&federate) {
                if requested < state.granted {
                    return Err(CoreError::TimeViolation {
                        requested,
                        granted: state.granted,
                    });
                }
                state.granted = requested;
                state.current = requested;
                state.requested = None;
            }
            self.sender.send(
                ActionMessage::new(Action::TimeGrant)
                    .with_dest(federate)
                    .with_time(requested),
            );
        } else if propagate {
            for dependent in dependents {
                self.sender.send(
                    ActionMessage::new(Action::TimeRequest)
                        .with_source(federate)
                        .with_dest(dependent)
                        .with_time(requested),
                );
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn collecting() -> (MessageSender, Arc<Mutex<Vec<ActionMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sender = MessageSender::new(move |msg| sink.lock().unwrap().push(msg));
        (sender, seen)
    }

    fn fed(id: i32) -> NodeId {
        NodeId::new(id)
    }

    fn secs(t: f64) -> SimTime {
        SimTime::from_secs_f64(t)
    }

    #[test]
    fn test_grant_immediate_without_dependencies() {
        let (sender, seen) = collecting();
        let mut coordinator = TimeCoordinator::new(sender);
        coordinator.register_federate(fed(1));
        coordinator.handle_time_request(fed(1), secs(1.0)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].action, Action::TimeGrant);
        assert_eq!(seen[0].dest, fed(1));
        assert_eq!(seen[0].time, Some(secs(1.0)));
        assert_eq!(coordinator.granted(fed(1)), Some(secs(1.0)));
    }

    #[test]
    fn test_grant_waits_for_dependency_report() {
        let (sender, seen) = collecting();
        let mut coordinator = TimeCoordinator::new(sender);
        coordinator.add_dependency(fed(1), fed(2));
        coordinator.handle_time_request(fed(1), secs(1.0)).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        // a report below the request keeps the grant held
        coordinator.handle_time_message(fed(2), secs(0.5)).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        coordinator.handle_time_message(fed(2), secs(1.0)).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].action, Action::TimeGrant);
        assert_eq!(seen[0].time, Some(secs(1.0)));
    }

    #[test]
    fn test_request_propagates_to_dependents() {
        let (sender, seen) = collecting();
        let mut coordinator = TimeCoordinator::new(sender);
        coordinator.add_dependency(fed(1), fed(2));
        coordinator.add_dependent(fed(1), fed(3));
        coordinator.handle_time_request(fed(1), secs(2.0)).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].action, Action::TimeRequest);
        assert_eq!(seen[0].source, fed(1));
        assert_eq!(seen[0].dest, fed(3));
    }

    #[test]
    fn test_remove_dependency_unblocks_pending_grant() {
        let (sender, seen) = collecting();
        let mut coordinator = TimeCoordinator::new(sender);
        coordinator.add_dependency(fed(1), fed(2));
        coordinator.handle_time_request(fed(1), secs(1.0)).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        coordinator.remove_dependency(fed(1), fed(2)).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].action, Action::TimeGrant);
    }

    #[test]
    fn test_grant_monotonicity() {
        let (sender, _seen) = collecting();
        let mut coordinator = TimeCoordinator::new(sender);
        coordinator.register_federate(fed(1));
        coordinator.handle_time_request(fed(1), secs(2.0)).unwrap();
        assert!(matches!(
            coordinator.handle_time_request(fed(1), secs(1.0)),
            Err(CoreError::TimeViolation { .. })
        ));
        // granted time is unchanged by the rejected request
        assert_eq!(coordinator.granted(fed(1)), Some(secs(2.0)));
    }

    #[test]
    fn test_simultaneous_grants_order_by_federate_id() {
        let (sender, seen) = collecting();
        let mut coordinator = TimeCoordinator::new(sender);
        // register out of order to make the tie-break observable
        coordinator.add_dependency(fed(5), fed(9));
        coordinator.add_dependency(fed(2), fed(9));
        coordinator.handle_time_request(fed(5), secs(1.0)).unwrap();
        coordinator.handle_time_request(fed(2), secs(1.0)).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        coordinator.handle_time_message(fed(9), secs(1.0)).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].dest, fed(2));
        assert_eq!(seen[1].dest, fed(5));
    }

    #[test]
    fn test_sequence_of_grants_is_non_decreasing() {
        let (sender, seen) = collecting();
        let mut coordinator = TimeCoordinator::new(sender);
        coordinator.add_dependency(fed(1), fed(2));
        let mut last = SimTime::ZERO;
        for step in 1..=5 {
            let t = secs(step as f64);
            coordinator.handle_time_request(fed(1), t).unwrap();
            coordinator.handle_time_message(fed(2), t).unwrap();
        }
        for msg in seen.lock().unwrap().iter() {
            if msg.action == Action::TimeGrant {
                let t = msg.time.unwrap();
                assert!(t >= last);
                last = t;
            }
        }
        assert_eq!(last, secs(5.0));
    }
}
