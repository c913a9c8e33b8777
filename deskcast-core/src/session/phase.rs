//! Session lifecycle state machine.
//!
//! Transitions are validated and return `Result` instead of panicking.

use std::time::{Duration, Instant};

use crate::error::DeskError;

/// The current phase of a viewer session.
///
/// ```text
///  Connecting ──► Active ──► Closing ──► Closed
///       │                                  ▲
///       └──────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Slot reserved; transport handshake still running.
    #[default]
    Connecting,

    /// Receiving broadcasts.
    Active {
        /// When the session became active.
        since: Instant,
    },

    /// Teardown started (write failure, shutdown or peer close).
    Closing,

    /// Evicted from the registry. Terminal.
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Active { .. } => write!(f, "Active"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Time spent active, or `None` outside `Active`.
    pub fn active_duration(&self) -> Option<Duration> {
        match self {
            Self::Active { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Connecting`.
    pub fn activate(&mut self) -> Result<(), DeskError> {
        match self {
            Self::Connecting => {
                *self = Self::Active {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(DeskError::InvalidTransition(
                "cannot activate: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Connecting`, `Active`.
    pub fn begin_close(&mut self) -> Result<(), DeskError> {
        match self {
            Self::Connecting | Self::Active { .. } => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(DeskError::InvalidTransition(
                "cannot close: session already closing or closed",
            )),
        }
    }

    /// Valid from: `Connecting` (handshake failure), `Closing`.
    pub fn finish_close(&mut self) -> Result<(), DeskError> {
        match self {
            Self::Connecting | Self::Closing => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(DeskError::InvalidTransition(
                "cannot finish close: not in Connecting or Closing state",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut phase = SessionPhase::default();
        assert_eq!(phase, SessionPhase::Connecting);

        phase.activate().unwrap();
        assert!(phase.is_active());
        assert!(phase.active_duration().is_some());

        phase.begin_close().unwrap();
        assert_eq!(phase, SessionPhase::Closing);

        phase.finish_close().unwrap();
        assert!(phase.is_closed());
    }

    #[test]
    fn handshake_failure_closes_directly() {
        let mut phase = SessionPhase::Connecting;
        phase.finish_close().unwrap();
        assert!(phase.is_closed());
    }

    #[test]
    fn invalid_transitions() {
        let mut phase = SessionPhase::Connecting;
        phase.activate().unwrap();
        assert!(matches!(
            phase.activate(),
            Err(DeskError::InvalidTransition(_))
        ));
        assert!(phase.finish_close().is_err());

        let mut closed = SessionPhase::Closed;
        assert!(closed.begin_close().is_err());
        assert!(closed.activate().is_err());
        assert_eq!(closed, SessionPhase::Closed);
    }

    #[test]
    fn display() {
        let active = SessionPhase::Active {
            since: Instant::now(),
        };
        assert_eq!(active.to_string(), "Active");
        assert_eq!(SessionPhase::Closing.to_string(), "Closing");
    }
}
