//! Capture session state machine.
//!
//! ```text
//! Idle ─Begin─▶ Preparing ─SurfaceVerified─▶ AcquiringStream ─StreamReady─▶ Recording
//!                                                                            │  ▲
//!                                                                            │  └ ChunkFlushed
//!                                              PlaybackEnded | TimeoutFired  ▼
//!                                    Complete ◀─RecorderFlushed─ Finalizing ◀┘
//! ```
//!
//! `Failure` and `CancelRequested` lead to `Failed` and `Cancelled` from any
//! non-terminal state.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Idle,
    Preparing,
    AcquiringStream,
    Recording,
    Finalizing,
    Complete,
    Failed,
    Cancelled,
}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Preparing => "preparing",
            Self::AcquiringStream => "acquiring_stream",
            Self::Recording => "recording",
            Self::Finalizing => "finalizing",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureEvent {
    Begin,
    SurfaceVerified,
    StreamReady,
    ChunkFlushed,
    PlaybackEnded,
    TimeoutFired,
    RecorderFlushed,
    Failure,
    CancelRequested,
}

/// Next state for `event` in `state`, or `None` if the event is not valid there.
pub fn transition(state: CaptureState, event: CaptureEvent) -> Option<CaptureState> {
    use CaptureEvent as E;
    use CaptureState as S;

    if state.is_terminal() {
        return None;
    }

    match (state, event) {
        (_, E::Failure) => Some(S::Failed),
        (_, E::CancelRequested) => Some(S::Cancelled),
        (S::Idle, E::Begin) => Some(S::Preparing),
        (S::Preparing, E::SurfaceVerified) => Some(S::AcquiringStream),
        (S::AcquiringStream, E::StreamReady) => Some(S::Recording),
        (S::Recording, E::ChunkFlushed) => Some(S::Recording),
        (S::Recording, E::PlaybackEnded | E::TimeoutFired) => Some(S::Finalizing),
        (S::Finalizing, E::RecorderFlushed) => Some(S::Complete),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [CaptureState; 8] = [
        CaptureState::Idle,
        CaptureState::Preparing,
        CaptureState::AcquiringStream,
        CaptureState::Recording,
        CaptureState::Finalizing,
        CaptureState::Complete,
        CaptureState::Failed,
        CaptureState::Cancelled,
    ];

    #[test]
    fn test_happy_path() {
        let events = [
            CaptureEvent::Begin,
            CaptureEvent::SurfaceVerified,
            CaptureEvent::StreamReady,
            CaptureEvent::ChunkFlushed,
            CaptureEvent::ChunkFlushed,
            CaptureEvent::PlaybackEnded,
            CaptureEvent::RecorderFlushed,
        ];
        let end = events.iter().try_fold(CaptureState::Idle, |s, e| transition(s, *e));
        assert_eq!(end, Some(CaptureState::Complete));
    }

    #[test]
    fn test_timeout_finalizes() {
        assert_eq!(
            transition(CaptureState::Recording, CaptureEvent::TimeoutFired),
            Some(CaptureState::Finalizing)
        );
    }

    #[test]
    fn test_terminal_states_absorb_everything() {
        for state in ALL_STATES.into_iter().filter(|s| s.is_terminal()) {
            assert_eq!(transition(state, CaptureEvent::CancelRequested), None);
            assert_eq!(transition(state, CaptureEvent::ChunkFlushed), None);
        }
    }

    #[test]
    fn test_cancel_and_failure_reachable_from_live_states() {
        for state in ALL_STATES.into_iter().filter(|s| !s.is_terminal()) {
            assert_eq!(
                transition(state, CaptureEvent::CancelRequested),
                Some(CaptureState::Cancelled)
            );
            assert_eq!(transition(state, CaptureEvent::Failure), Some(CaptureState::Failed));
        }
    }

    #[test]
    fn test_out_of_order_events_rejected() {
        assert_eq!(transition(CaptureState::Idle, CaptureEvent::StreamReady), None);
        assert_eq!(transition(CaptureState::Preparing, CaptureEvent::ChunkFlushed), None);
        assert_eq!(transition(CaptureState::Finalizing, CaptureEvent::PlaybackEnded), None);
    }
}
