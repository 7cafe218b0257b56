//! Per-fixture link state machine.
//!
//! Each registry slot owns a [`LinkMachine`] that tracks how far the fixture
//! has progressed from client registration to a fully resolved, notifying
//! link.
//!
//! # Valid Transitions
//!
//! - Unregistered → Registered → Connecting → LinkUp
//! - LinkUp → MtuNegotiated → ServiceFound → ServiceResolved
//! - ServiceResolved → NotifySubscribed → Ready
//! - Connecting → Unregistered (open failed, the client is re-registered)
//! - Connecting, LinkUp ..= Ready → Registered (link lost)
//!
//! Radio events that arrive for a state they do not apply to are rejected by
//! [`LinkMachine::transition_to`], which is how the engine drops stale
//! completions.
//!
//! # Examples
//!
//! ```
//! use floodhub_engine::{LinkMachine, LinkState};
//!
//! let mut link = LinkMachine::new();
//! link.transition_to(LinkState::Registered).unwrap();
//! link.transition_to(LinkState::Connecting).unwrap();
//! assert!(link.transition_to(LinkState::Ready).is_err());
//! assert_eq!(link.current_state(), LinkState::Connecting);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use floodhub_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Link lifecycle of one fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No client profile registered with the radio.
    Unregistered,

    /// Client registered, no link.
    Registered,

    /// Open request submitted.
    Connecting,

    /// Link established.
    LinkUp,

    /// MTU exchange finished, service search submitted.
    MtuNegotiated,

    /// The vendor service was found.
    ServiceFound,

    /// Characteristics resolved; commands can be written.
    ServiceResolved,

    /// Notifications routed to this client.
    NotifySubscribed,

    /// Fixture notifications enabled.
    Ready,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            LinkState::Unregistered => "Unregistered",
            LinkState::Registered => "Registered",
            LinkState::Connecting => "Connecting",
            LinkState::LinkUp => "LinkUp",
            LinkState::MtuNegotiated => "MtuNegotiated",
            LinkState::ServiceFound => "ServiceFound",
            LinkState::ServiceResolved => "ServiceResolved",
            LinkState::NotifySubscribed => "NotifySubscribed",
            LinkState::Ready => "Ready",
        };
        write!(f, "{}", state_str)
    }
}

impl LinkState {
    /// Check if transition to target state is valid from this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use floodhub_engine::LinkState;
    ///
    /// assert!(LinkState::Registered.can_transition_to(&LinkState::Connecting));
    /// assert!(LinkState::Ready.can_transition_to(&LinkState::Registered));
    /// assert!(!LinkState::Registered.can_transition_to(&LinkState::LinkUp));
    /// ```
    pub fn can_transition_to(&self, target: &LinkState) -> bool {
        matches!(
            (self, target),
            // From Unregistered
            (LinkState::Unregistered, LinkState::Registered)
            // From Registered
            | (LinkState::Registered, LinkState::Connecting)
            // From Connecting
            | (LinkState::Connecting, LinkState::LinkUp | LinkState::Unregistered | LinkState::Registered)
            // Resolution chain
            | (LinkState::LinkUp, LinkState::MtuNegotiated)
            | (LinkState::MtuNegotiated, LinkState::ServiceFound)
            | (LinkState::ServiceFound, LinkState::ServiceResolved)
            | (LinkState::ServiceResolved, LinkState::NotifySubscribed)
            | (LinkState::NotifySubscribed, LinkState::Ready)
            // Link lost
            | (
                LinkState::LinkUp
                    | LinkState::MtuNegotiated
                    | LinkState::ServiceFound
                    | LinkState::ServiceResolved
                    | LinkState::NotifySubscribed
                    | LinkState::Ready,
                LinkState::Registered
            )
        )
    }

    /// Whether a link to the fixture is up.
    pub fn is_linked(&self) -> bool {
        *self >= LinkState::LinkUp
    }

    /// Whether characteristic resolution has finished.
    pub fn is_resolved(&self) -> bool {
        *self >= LinkState::ServiceResolved
    }
}

/// A single state transition with timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: LinkState,
    pub to: LinkState,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: LinkState, to: LinkState) -> Self {
        Self {
            from,
            to,
            at: Utc::now(),
        }
    }
}

/// Validating state machine for one fixture link.
#[derive(Debug)]
pub struct LinkMachine {
    current_state: LinkState,
    state_entered_at: DateTime<Utc>,
}

impl LinkMachine {
    /// Create a machine in the `Unregistered` state.
    pub fn new() -> Self {
        Self {
            current_state: LinkState::Unregistered,
            state_entered_at: Utc::now(),
        }
    }

    pub fn current_state(&self) -> LinkState {
        self.current_state
    }

    /// When the current state was entered.
    pub fn state_since(&self) -> DateTime<Utc> {
        self.state_entered_at
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the transition is not valid
    /// for the current state. The state is left unchanged.
    pub fn transition_to(&mut self, new_state: LinkState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(&new_state) {
            return Err(Error::transition(self.current_state, new_state));
        }

        let transition = StateTransition::new(self.current_state, new_state);
        self.current_state = new_state;
        self.state_entered_at = transition.at;
        Ok(transition)
    }
}

impl Default for LinkMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LinkMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.current_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const RESOLUTION_CHAIN: [LinkState; 8] = [
        LinkState::Registered,
        LinkState::Connecting,
        LinkState::LinkUp,
        LinkState::MtuNegotiated,
        LinkState::ServiceFound,
        LinkState::ServiceResolved,
        LinkState::NotifySubscribed,
        LinkState::Ready,
    ];

    fn machine_at(state: LinkState) -> LinkMachine {
        let mut machine = LinkMachine::new();
        for next in RESOLUTION_CHAIN {
            if machine.current_state() == state {
                break;
            }
            machine.transition_to(next).unwrap();
        }
        assert_eq!(machine.current_state(), state);
        machine
    }

    #[test]
    fn test_new_machine_starts_unregistered() {
        let machine = LinkMachine::new();
        assert_eq!(machine.current_state(), LinkState::Unregistered);
        assert!(machine.state_since() <= Utc::now());
    }

    #[test]
    fn test_full_resolution_chain() {
        let machine = machine_at(LinkState::Ready);
        assert!(machine.current_state().is_linked());
        assert!(machine.current_state().is_resolved());
    }

    #[rstest]
    #[case(LinkState::LinkUp)]
    #[case(LinkState::MtuNegotiated)]
    #[case(LinkState::ServiceFound)]
    #[case(LinkState::ServiceResolved)]
    #[case(LinkState::NotifySubscribed)]
    #[case(LinkState::Ready)]
    fn test_link_loss_returns_to_registered(#[case] state: LinkState) {
        let mut machine = machine_at(state);
        let transition = machine.transition_to(LinkState::Registered).unwrap();
        assert_eq!(transition.from, state);
        assert_eq!(machine.current_state(), LinkState::Registered);
    }

    #[test]
    fn test_open_failure_unregisters() {
        let mut machine = machine_at(LinkState::Connecting);
        machine.transition_to(LinkState::Unregistered).unwrap();
        assert_eq!(machine.current_state(), LinkState::Unregistered);
    }

    #[rstest]
    #[case(LinkState::Unregistered, LinkState::Connecting)]
    #[case(LinkState::Registered, LinkState::LinkUp)]
    #[case(LinkState::Registered, LinkState::Registered)]
    #[case(LinkState::LinkUp, LinkState::ServiceFound)]
    #[case(LinkState::MtuNegotiated, LinkState::ServiceResolved)]
    #[case(LinkState::Ready, LinkState::Unregistered)]
    #[case(LinkState::ServiceResolved, LinkState::Ready)]
    fn test_invalid_transition_leaves_state(#[case] from: LinkState, #[case] to: LinkState) {
        let mut machine = machine_at(from);
        let err = machine.transition_to(to).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(machine.current_state(), from);
    }

    #[test]
    fn test_transition_restamps_state_entry() {
        let mut machine = machine_at(LinkState::Registered);
        let before = machine.state_since();
        let transition = machine.transition_to(LinkState::Connecting).unwrap();
        assert_eq!(machine.state_since(), transition.at);
        assert!(transition.at >= before);

        machine.transition_to(LinkState::Ready).unwrap_err();
        assert_eq!(machine.state_since(), transition.at);
    }

    #[test]
    fn test_state_serde_snake_case() {
        let json = serde_json::to_string(&LinkState::ServiceResolved).unwrap();
        assert_eq!(json, "\"service_resolved\"");
        assert_eq!(LinkState::NotifySubscribed.to_string(), "NotifySubscribed");
    }
}
