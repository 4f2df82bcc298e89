//! Explicit connection state machine (SPEC_FULL.md §9, Design Note #1).
//!
//! Modeled as a pure `(state, event) -> (state, effects)` function rather
//! than callback-driven reconnect logic, so the reconnect policy (backoff
//! schedule, attempt cap) is unit-testable without spawning a real SSH
//! session.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    ReadyReceived,
    ErrorOccurred,
    CloseReceived,
    ReconnectTimerFired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartConnect,
    ScheduleReconnect { delay: Duration },
    NotifyDisconnected,
    NotifyFailed,
}

const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_FACTOR: u32 = 2;
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 10;

/// Exponential backoff: `base * factor^(attempt - 1)`, capped at `BACKOFF_CAP`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let multiplier = BACKOFF_FACTOR.saturating_pow(exponent);
    let candidate = BACKOFF_BASE.saturating_mul(multiplier);
    candidate.min(BACKOFF_CAP)
}

/// Advance the state machine. Returns the new state and the effect the
/// caller (the host connection's driving task) must perform.
pub fn transition(state: ConnectionState, event: ConnectionEvent) -> (ConnectionState, Option<Effect>) {
    use ConnectionEvent::*;
    use ConnectionState::*;

    match (state, event) {
        (Disconnected, ConnectRequested) => (Connecting, Some(Effect::StartConnect)),
        (Connecting, ReadyReceived) => (Connected, None),
        (Connecting, ErrorOccurred) => {
            let attempt = 1;
            (Reconnecting { attempt }, Some(Effect::ScheduleReconnect { delay: backoff_delay(attempt) }))
        }
        (Connected, ErrorOccurred) | (Connected, CloseReceived) => {
            let attempt = 1;
            (Reconnecting { attempt }, Some(Effect::ScheduleReconnect { delay: backoff_delay(attempt) }))
        }
        (Reconnecting { attempt }, ReconnectTimerFired) => (Connecting, Some(Effect::StartConnect)),
        (Reconnecting { attempt }, ErrorOccurred) => {
            let next = attempt + 1;
            if next > MAX_ATTEMPTS {
                (Failed, Some(Effect::NotifyFailed))
            } else {
                (Reconnecting { attempt: next }, Some(Effect::ScheduleReconnect { delay: backoff_delay(next) }))
            }
        }
        (_, CloseReceived) => (Disconnected, Some(Effect::NotifyDisconnected)),
        (current, _) => (current, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionEvent::*;
    use ConnectionState::*;

    #[test]
    fn backoff_doubles_each_attempt_until_cap() {
        assert_eq!(backoff_delay(1), Duration::from_secs(5));
        assert_eq!(backoff_delay(2), Duration::from_secs(10));
        assert_eq!(backoff_delay(3), Duration::from_secs(20));
        assert_eq!(backoff_delay(4), Duration::from_secs(40));
        assert_eq!(backoff_delay(5), Duration::from_secs(60));
        assert_eq!(backoff_delay(6), Duration::from_secs(60));
    }

    #[test]
    fn connect_requested_starts_connecting() {
        let (state, effect) = transition(Disconnected, ConnectRequested);
        assert_eq!(state, Connecting);
        assert_eq!(effect, Some(Effect::StartConnect));
    }

    #[test]
    fn ready_received_while_connecting_reaches_connected() {
        let (state, effect) = transition(Connecting, ReadyReceived);
        assert_eq!(state, Connected);
        assert_eq!(effect, None);
    }

    #[test]
    fn error_while_connected_begins_reconnect_at_attempt_one() {
        let (state, effect) = transition(Connected, ErrorOccurred);
        assert_eq!(state, Reconnecting { attempt: 1 });
        assert_eq!(effect, Some(Effect::ScheduleReconnect { delay: Duration::from_secs(5) }));
    }

    #[test]
    fn reconnect_attempts_increment_on_repeated_errors() {
        let (state, _) = transition(Reconnecting { attempt: 1 }, ErrorOccurred);
        assert_eq!(state, Reconnecting { attempt: 2 });
    }

    #[test]
    fn exceeding_max_attempts_reaches_failed() {
        let (state, effect) = transition(Reconnecting { attempt: MAX_ATTEMPTS }, ErrorOccurred);
        assert_eq!(state, Failed);
        assert_eq!(effect, Some(Effect::NotifyFailed));
    }

    #[test]
    fn close_received_from_any_state_goes_to_disconnected() {
        let (state, effect) = transition(Connected, CloseReceived);
        assert_eq!(state, Disconnected);
        assert_eq!(effect, Some(Effect::NotifyDisconnected));
    }

    #[test]
    fn reconnect_timer_fired_starts_a_new_connect_attempt() {
        let (state, effect) = transition(Reconnecting { attempt: 3 }, ReconnectTimerFired);
        assert_eq!(state, Connecting);
        assert_eq!(effect, Some(Effect::StartConnect));
    }

    #[test]
    fn unexpected_event_is_a_noop() {
        let (state, effect) = transition(Disconnected, ReadyReceived);
        assert_eq!(state, Disconnected);
        assert_eq!(effect, None);
    }
}
