//! C3: the deterministic state-machine transition (§4.3).
//!
//! Pure function, no registry or I/O — easy to property-test and easy to
//! audit against the written rule. [`crate::scheduler`] is the only
//! caller, and it's the one that turns a [`Transition`] into a registry
//! write plus a published event.

use vigil_types::{CheckResult, State, StateType};

/// The outcome of applying one [`CheckResult`] to a service's current
/// `(state, state_type, current_attempt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: State,
    pub state_type: StateType,
    pub current_attempt: u32,
    /// A hard state change occurred — what notifications would key off
    /// of, were this core to dispatch them.
    pub hard_state_change: bool,
}

/// Applies `result` to a service currently at `(old_state, old_state_type,
/// current_attempt)` with a retry budget of `max_check_attempts` (§4.3).
pub fn transition(
    old_state: State,
    old_state_type: StateType,
    current_attempt: u32,
    max_check_attempts: u32,
    result: &CheckResult,
) -> Transition {
    let new_state = result.state;

    if new_state == State::Ok {
        return Transition {
            state: new_state,
            state_type: StateType::Hard,
            current_attempt: 1,
            hard_state_change: old_state != new_state,
        };
    }

    if current_attempt >= max_check_attempts {
        let hard_state_change = old_state != new_state || old_state_type != StateType::Hard;
        return Transition {
            state: new_state,
            state_type: StateType::Hard,
            current_attempt: 1,
            hard_state_change,
        };
    }

    if old_state_type == StateType::Soft || old_state == State::Ok {
        return Transition {
            state: new_state,
            state_type: StateType::Soft,
            current_attempt: current_attempt + 1,
            hard_state_change: false,
        };
    }

    // Already Hard and non-OK: the attempt counter resets to 1 rather
    // than continuing to climb, matching Icinga2's own state machine
    // even though it reads asymmetrically next to the Soft branch above.
    Transition {
        state: new_state,
        state_type: StateType::Hard,
        current_attempt: 1,
        hard_state_change: old_state != new_state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::Timestamp;

    fn result_with_state(state: State) -> CheckResult {
        let now = Timestamp::now();
        let exit_status = match state {
            State::Ok => 0,
            State::Warning => 1,
            State::Critical => 2,
            State::Unknown => 3,
        };
        CheckResult::from_plugin_output(now, now, now, now, exit_status, "synthetic")
    }

    #[test]
    fn ok_to_ok_stays_hard_attempt_one() {
        let t = transition(State::Ok, StateType::Hard, 1, 3, &result_with_state(State::Ok));
        assert_eq!(t.state, State::Ok);
        assert_eq!(t.state_type, StateType::Hard);
        assert_eq!(t.current_attempt, 1);
        assert!(!t.hard_state_change);
    }

    #[test]
    fn recovery_to_ok_is_a_hard_state_change() {
        let t = transition(
            State::Critical,
            StateType::Hard,
            1,
            3,
            &result_with_state(State::Ok),
        );
        assert_eq!(t.state, State::Ok);
        assert_eq!(t.state_type, StateType::Hard);
        assert_eq!(t.current_attempt, 1);
        assert!(t.hard_state_change);
    }

    #[test]
    fn first_failure_from_ok_goes_soft() {
        let t = transition(
            State::Ok,
            StateType::Hard,
            1,
            3,
            &result_with_state(State::Critical),
        );
        assert_eq!(t.state_type, StateType::Soft);
        assert_eq!(t.current_attempt, 2);
        assert!(!t.hard_state_change);
    }

    #[test]
    fn soft_failure_continuing_to_fail_stays_soft_and_increments() {
        let t = transition(
            State::Critical,
            StateType::Soft,
            2,
            3,
            &result_with_state(State::Critical),
        );
        assert_eq!(t.state_type, StateType::Soft);
        assert_eq!(t.current_attempt, 3);
    }

    #[test]
    fn soft_exhausting_attempts_goes_hard() {
        let t = transition(
            State::Critical,
            StateType::Soft,
            3,
            3,
            &result_with_state(State::Critical),
        );
        assert_eq!(t.state_type, StateType::Hard);
        assert_eq!(t.current_attempt, 1);
        assert!(t.hard_state_change);
    }

    #[test]
    fn hard_non_ok_to_same_state_resets_attempt_without_hard_change() {
        let t = transition(
            State::Critical,
            StateType::Hard,
            1,
            3,
            &result_with_state(State::Critical),
        );
        assert_eq!(t.state_type, StateType::Hard);
        assert_eq!(t.current_attempt, 1);
        assert!(!t.hard_state_change);
    }

    #[test]
    fn hard_non_ok_to_different_non_ok_state_is_a_hard_change() {
        let t = transition(
            State::Critical,
            StateType::Hard,
            1,
            3,
            &result_with_state(State::Warning),
        );
        assert_eq!(t.state, State::Warning);
        assert_eq!(t.state_type, StateType::Hard);
        assert_eq!(t.current_attempt, 1);
        assert!(t.hard_state_change);
    }
}
