//! Firmware upload workflow for a device's web update endpoint.
//!
//! This crate implements the **control flow** of an OTA update from the
//! client side. It has no UI and no HTTP code of its own: the host
//! provides a [`FirmwareTransport`] that performs the POST and a
//! [`PresentationSink`] that displays status updates.
//!
//! # Lifecycle
//!
//! 1. **Select**: a file is chosen and validated
//! 2. **Confirm**: the host asks the user, then calls `confirm_and_upload`
//! 3. **Upload**: transport progress is fed back into the session
//! 4. **Outcome**: success starts the restart countdown, failure offers
//!    a bounded number of retries

pub mod classify;
mod countdown;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod sink;
pub mod transport;
pub mod types;

// Re-export primary types for convenience.
pub use classify::{DisplayableError, ErrorClassifier, ErrorKind};
pub use error::SessionError;
pub use orchestrator::UpdateOrchestrator;
pub use session::UploadSession;
pub use sink::{
    CallbackSink, ConfirmationPrompt, PresentationEvent, PresentationSink, StatusKind,
};
pub use transport::{FirmwareTransport, TransferProgress, TransportOutcome};
pub use types::{
    AttemptOutcome, Phase, RetryPolicy, SessionConfig, UploadAttempt, UploadRequest,
};
