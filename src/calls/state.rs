//! Call state machine implementation.

use serde::Serialize;

/// Current state of the call on one chat thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallState {
    /// No call.
    #[default]
    Idle,
    /// Outgoing call: acquiring media or waiting for the answer.
    Outgoing,
    /// Incoming call: offer stored, waiting for the local user to decide.
    IncomingPending,
    /// Descriptions exchanged (or accepted locally), waiting for remote audio.
    Connecting,
    /// Remote audio is flowing.
    Active,
    /// Tearing down resources. Short-lived.
    Ending,
}

impl CallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::IncomingPending)
    }

    /// True in every state that can be torn down.
    pub fn is_in_call(&self) -> bool {
        !matches!(self, Self::Idle | Self::Ending)
    }

    /// Applies `transition`, returning the next state.
    pub fn apply(self, transition: CallTransition) -> Result<CallState, InvalidTransition> {
        use CallState::*;
        use CallTransition::*;

        let next = match (self, transition) {
            (Idle, StartRequested) => Outgoing,
            (Idle, OfferReceived) => IncomingPending,
            (IncomingPending, Accepted) => Connecting,
            (Outgoing | Connecting, AnswerApplied) => Connecting,
            (Active, AnswerApplied) => Active,
            (Outgoing | Connecting | Active, RemoteTrack) => Active,
            (Outgoing | IncomingPending | Connecting | Active, Teardown) => Ending,
            (Ending, TeardownComplete) => Idle,
            (current, attempted) => {
                return Err(InvalidTransition { current, attempted });
            }
        };
        Ok(next)
    }
}

/// State transitions for calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    StartRequested,
    OfferReceived,
    Accepted,
    AnswerApplied,
    RemoteTrack,
    Teardown,
    TeardownComplete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub current: CallState,
    pub attempted: CallTransition,
}

impl InvalidTransition {
    pub fn new(current: CallState, attempted: CallTransition) -> Self {
        Self { current, attempted }
    }
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {:?} in state {:?}",
            self.attempted, self.current
        )
    }
}

impl std::error::Error for InvalidTransition {}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(transitions: &[CallTransition]) -> Result<CallState, InvalidTransition> {
        transitions
            .iter()
            .try_fold(CallState::Idle, |state, t| state.apply(*t))
    }

    #[test]
    fn test_outgoing_call_flow() {
        use CallTransition::*;

        assert_eq!(run(&[StartRequested]), Ok(CallState::Outgoing));
        assert_eq!(
            run(&[StartRequested, AnswerApplied]),
            Ok(CallState::Connecting)
        );
        assert_eq!(
            run(&[StartRequested, AnswerApplied, RemoteTrack]),
            Ok(CallState::Active)
        );
        assert_eq!(
            run(&[StartRequested, AnswerApplied, RemoteTrack, Teardown]),
            Ok(CallState::Ending)
        );
        assert_eq!(
            run(&[StartRequested, AnswerApplied, RemoteTrack, Teardown, TeardownComplete]),
            Ok(CallState::Idle)
        );
    }

    #[test]
    fn test_incoming_call_flow() {
        use CallTransition::*;

        let state = run(&[OfferReceived]).unwrap();
        assert!(state.can_accept());

        let state = state.apply(Accepted).unwrap();
        assert_eq!(state, CallState::Connecting);

        let state = state.apply(RemoteTrack).unwrap();
        assert!(state.is_active());
    }

    #[test]
    fn test_track_before_answer_goes_active() {
        use CallTransition::*;

        let state = run(&[StartRequested, RemoteTrack]).unwrap();
        assert!(state.is_active());
        // A late answer leaves an active call alone.
        assert_eq!(state.apply(AnswerApplied), Ok(CallState::Active));
    }

    #[test]
    fn test_decline_goes_through_ending() {
        use CallTransition::*;

        assert_eq!(run(&[OfferReceived, Teardown]), Ok(CallState::Ending));
        assert_eq!(
            run(&[OfferReceived, Teardown, TeardownComplete]),
            Ok(CallState::Idle)
        );
    }

    #[test]
    fn test_invalid_transitions() {
        use CallTransition::*;

        let err = CallState::Idle.apply(Accepted).unwrap_err();
        assert_eq!(err.current, CallState::Idle);
        assert_eq!(err.attempted, Accepted);
        assert_eq!(err.to_string(), "invalid transition Accepted in state Idle");

        assert!(CallState::Idle.apply(Teardown).is_err());
        assert!(CallState::Ending.apply(Teardown).is_err());
        assert!(CallState::Outgoing.apply(StartRequested).is_err());
        assert!(CallState::Outgoing.apply(OfferReceived).is_err());
        assert!(CallState::Active.apply(OfferReceived).is_err());
        assert!(CallState::IncomingPending.apply(RemoteTrack).is_err());
        assert!(CallState::IncomingPending.apply(AnswerApplied).is_err());
        assert!(CallState::Connecting.apply(TeardownComplete).is_err());
    }

    #[test]
    fn test_state_predicates() {
        assert!(CallState::default().is_idle());
        assert!(!CallState::Idle.is_in_call());
        assert!(!CallState::Ending.is_in_call());
        for state in [
            CallState::Outgoing,
            CallState::IncomingPending,
            CallState::Connecting,
            CallState::Active,
        ] {
            assert!(state.is_in_call(), "{state:?}");
        }
    }
}
