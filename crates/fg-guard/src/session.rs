//! The watcher state machine.
//!
//! `WatcherSession` owns every decision a guard watcher makes (when to
//! check, when to emit, when to reconnect, when to give up) and none of the
//! I/O. A driver feeds it [`Trigger`]s and carries out the [`Action`]s it
//! returns, in order.
//!
//! Guarantees:
//! - The first inactive result, from a poll or a stream message, emits once
//!   and stops the session for good. Nothing restarts a stopped session.
//! - At most one reconnect is pending at any time.
//! - Reconnect delays grow `initial * 2^n`, capped, and reset once a stream
//!   opens.

use std::time::Duration;

use crate::state::{parse_stream_message, GuardState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Waiting for a stream to open. Polling continues meanwhile.
    Connecting,
    Streaming,
    /// Poll-only mode, no stream configured.
    Polling,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Start,
    PollTick,
    CheckCompleted(GuardState),
    StreamOpened,
    StreamMessage(String),
    StreamClosed,
    StreamError,
    ReconnectDue,
    HeartbeatTick,
    PingTick,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StartPolling,
    StartHeartbeat,
    RunCheck,
    Emit(GuardState),
    OpenStream,
    StartPing,
    StopPing,
    SendPing,
    ScheduleReconnect(Duration),
    /// Cancel every timer and socket. Always the last action of a session.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    /// Delay before reconnect attempt `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug)]
pub struct WatcherSession {
    phase: Phase,
    streaming: bool,
    unlock_on_waiting: bool,
    backoff: Backoff,
    reconnect_attempts: u32,
    reconnect_pending: bool,
    last_state: Option<GuardState>,
}

impl WatcherSession {
    pub fn new(streaming: bool, unlock_on_waiting: bool) -> Self {
        Self::with_backoff(streaming, unlock_on_waiting, Backoff::default())
    }

    pub fn with_backoff(streaming: bool, unlock_on_waiting: bool, backoff: Backoff) -> Self {
        Self {
            phase: Phase::Idle,
            streaming,
            unlock_on_waiting,
            backoff,
            reconnect_attempts: 0,
            reconnect_pending: false,
            last_state: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }

    pub fn handle(&mut self, trigger: Trigger) -> Vec<Action> {
        match (self.phase, trigger) {
            (Phase::Stopped, _) => Vec::new(),
            (_, Trigger::Stop) => {
                self.phase = Phase::Stopped;
                vec![Action::Shutdown]
            }
            (Phase::Idle, Trigger::Start) => self.start(),
            (Phase::Idle, _) | (_, Trigger::Start) => Vec::new(),

            (_, Trigger::PollTick) => vec![Action::RunCheck],
            (_, Trigger::CheckCompleted(state)) => self.record(state),
            (_, Trigger::HeartbeatTick) => match &self.last_state {
                Some(state) if state.active => vec![Action::Emit(state.clone())],
                _ => Vec::new(),
            },

            (Phase::Polling, _) => Vec::new(),

            (_, Trigger::StreamOpened) => {
                self.phase = Phase::Streaming;
                self.reconnect_attempts = 0;
                vec![Action::StartPing, Action::RunCheck]
            }
            (_, Trigger::StreamMessage(text)) => {
                match parse_stream_message(&text, self.unlock_on_waiting) {
                    Some(state) => self.record(state),
                    None => Vec::new(),
                }
            }
            (phase, Trigger::StreamClosed | Trigger::StreamError) => {
                let mut actions = Vec::new();
                if phase == Phase::Streaming {
                    actions.push(Action::StopPing);
                }
                self.phase = Phase::Connecting;
                if !self.reconnect_pending {
                    self.reconnect_pending = true;
                    let delay = self.backoff.delay(self.reconnect_attempts);
                    self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                    actions.push(Action::ScheduleReconnect(delay));
                }
                actions
            }
            (_, Trigger::ReconnectDue) => {
                self.reconnect_pending = false;
                vec![Action::OpenStream]
            }
            (Phase::Streaming, Trigger::PingTick) => vec![Action::SendPing],
            (_, Trigger::PingTick) => Vec::new(),
        }
    }

    fn start(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::StartPolling, Action::StartHeartbeat];
        if self.streaming {
            self.phase = Phase::Connecting;
            actions.push(Action::OpenStream);
        } else {
            self.phase = Phase::Polling;
        }
        actions
    }

    fn record(&mut self, state: GuardState) -> Vec<Action> {
        self.last_state = Some(state.clone());
        if state.active {
            return vec![Action::Emit(state)];
        }
        self.phase = Phase::Stopped;
        vec![Action::Emit(state), Action::Shutdown]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GuardReason;

    fn streaming_session() -> WatcherSession {
        let mut session = WatcherSession::new(true, false);
        assert_eq!(
            session.handle(Trigger::Start),
            vec![Action::StartPolling, Action::StartHeartbeat, Action::OpenStream]
        );
        session
    }

    fn reconnect_delay(actions: &[Action]) -> Option<Duration> {
        actions.iter().find_map(|action| match action {
            Action::ScheduleReconnect(delay) => Some(*delay),
            _ => None,
        })
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut session = streaming_session();
        let mut delays = Vec::new();
        for _ in 0..7 {
            let actions = session.handle(Trigger::StreamError);
            delays.push(reconnect_delay(&actions).unwrap().as_millis());
            assert_eq!(session.handle(Trigger::ReconnectDue), vec![Action::OpenStream]);
        }
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10000, 10000]);
    }

    #[test]
    fn backoff_survives_huge_attempt_counts() {
        assert_eq!(Backoff::default().delay(40), Duration::from_secs(10));
    }

    #[test]
    fn opening_resets_backoff() {
        let mut session = streaming_session();
        for _ in 0..3 {
            session.handle(Trigger::StreamError);
            session.handle(Trigger::ReconnectDue);
        }
        assert_eq!(
            session.handle(Trigger::StreamOpened),
            vec![Action::StartPing, Action::RunCheck]
        );
        assert_eq!(session.phase(), Phase::Streaming);
        assert_eq!(
            session.handle(Trigger::StreamClosed),
            vec![Action::StopPing, Action::ScheduleReconnect(Duration::from_millis(500))]
        );
    }

    #[test]
    fn only_one_reconnect_pending() {
        let mut session = streaming_session();
        assert!(reconnect_delay(&session.handle(Trigger::StreamError)).is_some());
        assert_eq!(session.handle(Trigger::StreamClosed), Vec::new());
        assert_eq!(session.handle(Trigger::StreamError), Vec::new());
        session.handle(Trigger::ReconnectDue);
        assert_eq!(
            reconnect_delay(&session.handle(Trigger::StreamClosed)),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn pings_only_while_streaming() {
        let mut session = streaming_session();
        assert_eq!(session.handle(Trigger::PingTick), Vec::new());
        session.handle(Trigger::StreamOpened);
        assert_eq!(session.handle(Trigger::PingTick), vec![Action::SendPing]);
    }

    #[test]
    fn first_inactive_result_stops_for_good() {
        let mut session = WatcherSession::new(false, false);
        session.handle(Trigger::Start);
        assert_eq!(session.handle(Trigger::PollTick), vec![Action::RunCheck]);

        let offline = GuardState::offline();
        assert_eq!(
            session.handle(Trigger::CheckCompleted(offline.clone())),
            vec![Action::Emit(offline.clone()), Action::Shutdown]
        );
        assert!(session.is_stopped());

        for trigger in [
            Trigger::CheckCompleted(offline),
            Trigger::CheckCompleted(GuardState::active()),
            Trigger::PollTick,
            Trigger::HeartbeatTick,
            Trigger::Start,
            Trigger::Stop,
        ] {
            assert_eq!(session.handle(trigger), Vec::new());
        }
    }

    #[test]
    fn stream_message_can_end_session() {
        let mut session = streaming_session();
        session.handle(Trigger::StreamOpened);

        assert_eq!(session.handle(Trigger::StreamMessage("garbage".into())), Vec::new());
        assert_eq!(
            session.handle(Trigger::StreamMessage(r#"{"active":true}"#.into())),
            vec![Action::Emit(GuardState::active())]
        );

        let waiting = GuardState::inactive(GuardReason::Waiting);
        assert_eq!(
            session.handle(Trigger::StreamMessage(r#"{"active":false,"waitingForInput":1}"#.into())),
            vec![Action::Emit(waiting), Action::Shutdown]
        );
        assert_eq!(session.handle(Trigger::StreamOpened), Vec::new());
        assert_eq!(session.handle(Trigger::ReconnectDue), Vec::new());
    }

    #[test]
    fn heartbeat_repeats_last_active_state() {
        let mut session = WatcherSession::new(false, false);
        session.handle(Trigger::Start);
        assert_eq!(session.handle(Trigger::HeartbeatTick), Vec::new());

        session.handle(Trigger::CheckCompleted(GuardState::active()));
        assert_eq!(
            session.handle(Trigger::HeartbeatTick),
            vec![Action::Emit(GuardState::active())]
        );
    }

    #[test]
    fn poll_only_ignores_stream_events() {
        let mut session = WatcherSession::new(false, false);
        assert_eq!(
            session.handle(Trigger::Start),
            vec![Action::StartPolling, Action::StartHeartbeat]
        );
        assert_eq!(session.phase(), Phase::Polling);
        assert_eq!(session.handle(Trigger::StreamError), Vec::new());
        assert_eq!(session.handle(Trigger::PingTick), Vec::new());
    }

    #[test]
    fn stop_shuts_down_once() {
        let mut session = streaming_session();
        assert_eq!(session.handle(Trigger::Stop), vec![Action::Shutdown]);
        assert_eq!(session.handle(Trigger::Stop), Vec::new());
        assert_eq!(session.handle(Trigger::PollTick), Vec::new());
    }

    #[test]
    fn idle_session_ignores_everything_but_start() {
        let mut session = WatcherSession::new(true, false);
        assert_eq!(session.handle(Trigger::PollTick), Vec::new());
        assert_eq!(session.handle(Trigger::StreamOpened), Vec::new());
        assert_eq!(session.phase(), Phase::Idle);
    }
}
