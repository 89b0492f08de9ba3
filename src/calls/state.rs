//! Negotiation state machine.

use serde::Serialize;

/// Progress of one negotiation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum NegotiationState {
    /// Transport built, no channel bound.
    #[default]
    Idle,
    /// Initiator: producing and publishing the offer, then waiting for the answer.
    AwaitingLocalDescription,
    /// Responder: waiting for the offer before it can answer.
    AwaitingRemoteDescription,
    /// Both descriptions applied, candidates being exchanged.
    Negotiating,
    /// Transport reports connectivity; media flowing.
    Connected,
    /// Transport released. Only a reset leaves this state.
    Closed,
}

impl NegotiationState {
    /// A call is bound to a channel and has not been closed.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::AwaitingLocalDescription
                | Self::AwaitingRemoteDescription
                | Self::Negotiating
                | Self::Connected
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Apply a transition, returning the new state or an error if it is not
    /// allowed from the current one.
    pub fn apply(self, transition: NegotiationTransition) -> Result<Self, InvalidTransition> {
        use NegotiationTransition as T;
        let next = match (self, transition) {
            (Self::Idle, T::StartAsInitiator) => Self::AwaitingLocalDescription,
            (Self::Idle, T::StartAsResponder) => Self::AwaitingRemoteDescription,
            (Self::AwaitingLocalDescription, T::RemoteAnswerApplied) => Self::Negotiating,
            (Self::AwaitingRemoteDescription, T::LocalAnswerWritten) => Self::Negotiating,
            (Self::Negotiating, T::TransportConnected) => Self::Connected,
            (current, T::Close) if !current.is_closed() => Self::Closed,
            (Self::Closed, T::Reset) => Self::Idle,
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        Ok(next)
    }
}

/// Events that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationTransition {
    StartAsInitiator,
    StartAsResponder,
    RemoteAnswerApplied,
    LocalAnswerWritten,
    TransportConnected,
    Close,
    Reset,
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;
    use NegotiationTransition as T;

    /// Flow: Idle → AwaitingLocalDescription → Negotiating → Connected → Closed
    #[test]
    fn test_initiator_flow() {
        let mut state = NegotiationState::Idle;
        state = state.apply(T::StartAsInitiator).unwrap();
        assert_eq!(state, NegotiationState::AwaitingLocalDescription);
        assert!(state.is_active());

        state = state.apply(T::RemoteAnswerApplied).unwrap();
        assert_eq!(state, NegotiationState::Negotiating);

        state = state.apply(T::TransportConnected).unwrap();
        assert!(state.is_connected());

        state = state.apply(T::Close).unwrap();
        assert!(state.is_closed());
    }

    /// Flow: Idle → AwaitingRemoteDescription → Negotiating → Closed
    #[test]
    fn test_responder_flow() {
        let state = NegotiationState::Idle
            .apply(T::StartAsResponder)
            .unwrap()
            .apply(T::LocalAnswerWritten)
            .unwrap();
        assert_eq!(state, NegotiationState::Negotiating);
        assert!(state.apply(T::Close).unwrap().is_closed());
    }

    /// The answer transitions belong to their own role.
    #[test]
    fn test_role_specific_transitions() {
        let initiator = NegotiationState::Idle.apply(T::StartAsInitiator).unwrap();
        assert!(initiator.apply(T::LocalAnswerWritten).is_err());

        let responder = NegotiationState::Idle.apply(T::StartAsResponder).unwrap();
        assert!(responder.apply(T::RemoteAnswerApplied).is_err());
    }

    #[test]
    fn test_cannot_connect_before_negotiating() {
        for state in [
            NegotiationState::Idle,
            NegotiationState::AwaitingLocalDescription,
            NegotiationState::AwaitingRemoteDescription,
        ] {
            assert!(state.apply(T::TransportConnected).is_err());
        }
    }

    #[test]
    fn test_closed_only_leaves_through_reset() {
        let closed = NegotiationState::Closed;
        for transition in [
            T::StartAsInitiator,
            T::StartAsResponder,
            T::RemoteAnswerApplied,
            T::LocalAnswerWritten,
            T::TransportConnected,
            T::Close,
        ] {
            assert!(closed.apply(transition).is_err(), "{transition:?}");
        }
        assert_eq!(closed.apply(T::Reset).unwrap(), NegotiationState::Idle);
    }

    #[test]
    fn test_start_requires_idle() {
        let negotiating = NegotiationState::Negotiating;
        let err = negotiating.apply(T::StartAsInitiator).unwrap_err();
        assert_eq!(err.current_state, "Negotiating");
        assert_eq!(err.attempted, "StartAsInitiator");
        assert!(NegotiationState::Idle.apply(T::Reset).is_err());
    }

    #[test]
    fn test_idle_can_close() {
        assert!(NegotiationState::Idle.apply(T::Close).unwrap().is_closed());
    }
}
