//! Structured updates for whatever displays the workflow.

use tokio::sync::mpsc;
use tracing::trace;

use otaflash_firmware::MIB;

/// Visual category of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Uploading,
    Success,
    Error,
}

/// What the user is asked before an upload starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationPrompt {
    pub file_name: String,
    pub size_bytes: u64,
}

impl ConfirmationPrompt {
    /// Full prompt text, size in MB with two decimals.
    pub fn message(&self) -> String {
        format!(
            "Are you sure you want to update the firmware?\n\n\
             File: {}\n\
             Size: {:.2} MB\n\n\
             The device will restart after successful update.",
            self.file_name,
            self.size_bytes as f64 / MIB as f64
        )
    }
}

/// One update emitted by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    /// A status line to show.
    Status { message: String, kind: StatusKind },
    /// Whether the upload control should accept input.
    SubmitEnabled(bool),
    /// Whether the retry control should accept input.
    RetryEnabled(bool),
    /// Upload progress; `fraction` is in `[0, 1]`.
    Progress {
        fraction: f64,
        percent: f64,
        kb_sent: f64,
        bytes_per_second: f64,
    },
    /// Seconds left until the device is expected back.
    Countdown { remaining: u32 },
    /// The host should ask the user before calling `confirm_and_upload`.
    ConfirmationRequired(ConfirmationPrompt),
}

impl PresentationEvent {
    pub(crate) fn status(kind: StatusKind, message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            kind,
        }
    }
}

/// Receives presentation updates. Implemented by the host UI.
pub trait PresentationSink: Send + Sync {
    fn publish(&self, event: PresentationEvent);
}

impl PresentationSink for mpsc::UnboundedSender<PresentationEvent> {
    fn publish(&self, event: PresentationEvent) {
        if self.send(event).is_err() {
            trace!("presentation receiver dropped, update discarded");
        }
    }
}

/// Sink that forwards every event to a callback.
pub struct CallbackSink {
    callback: Box<dyn Fn(PresentationEvent) + Send + Sync>,
}

impl CallbackSink {
    pub fn new(callback: impl Fn(PresentationEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl PresentationSink for CallbackSink {
    fn publish(&self, event: PresentationEvent) {
        (self.callback)(event);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_message_mentions_file_and_restart() {
        let prompt = ConfirmationPrompt {
            file_name: "fw.bin".into(),
            size_bytes: 1024 * 1024 + 512 * 1024,
        };
        let msg = prompt.message();
        assert!(msg.contains("File: fw.bin"));
        assert!(msg.contains("Size: 1.50 MB"));
        assert!(msg.contains("restart"));
    }

    #[test]
    fn unbounded_sender_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.publish(PresentationEvent::SubmitEnabled(true));
        assert_eq!(rx.try_recv().unwrap(), PresentationEvent::SubmitEnabled(true));
    }

    #[test]
    fn callback_sink_invokes_closure() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sink = CallbackSink::new(move |event| {
            if event == PresentationEvent::SubmitEnabled(true) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        sink.publish(PresentationEvent::SubmitEnabled(true));
        sink.publish(PresentationEvent::SubmitEnabled(false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unbounded_sender_tolerates_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        // Should not panic.
        tx.publish(PresentationEvent::RetryEnabled(false));
    }
}
