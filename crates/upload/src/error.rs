//! Session error types.

use otaflash_firmware::Violation;

use crate::types::Phase;

/// Reasons a user action on the session was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no file selected")]
    NoFile,

    #[error("file validation failed: {}", join_violations(.0))]
    Invalid(Vec<Violation>),

    #[error("firmware file could not be re-read: {0}")]
    Unreadable(String),

    #[error("cannot {action} while {phase}")]
    WrongPhase { action: &'static str, phase: Phase },

    #[error("an upload is already in progress")]
    UploadInFlight,

    #[error("retry budget exhausted")]
    RetryExhausted,

    #[error("update finished, device is restarting")]
    Locked,
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
