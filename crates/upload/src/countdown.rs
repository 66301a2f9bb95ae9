//! Post-update restart countdown.
//!
//! Purely cosmetic: the device reboots on its own after acknowledging the
//! image and nothing here polls it. The task only emits ticks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::sink::{PresentationEvent, PresentationSink, StatusKind};

/// Handle to a running countdown. Dropping it cancels the task.
pub(crate) struct RestartCountdown {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RestartCountdown {
    /// Spawns the countdown on the current Tokio runtime.
    ///
    /// Emits `start, start - 1, ..., 1` one `period` apart, then `0`
    /// together with the final status, sets `locked`, and disables both
    /// controls.
    pub(crate) fn spawn(
        start: u32,
        period: Duration,
        sink: Arc<dyn PresentationSink>,
        locked: Arc<AtomicBool>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let first = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(first, period);
            let mut remaining = start;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(remaining, "restart countdown cancelled");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                if remaining > 0 {
                    sink.publish(PresentationEvent::Countdown { remaining });
                    sink.publish(PresentationEvent::status(
                        StatusKind::Success,
                        format!(
                            "Update successful! System restarting in {remaining} seconds...\n\
                             Please wait for the device to restart"
                        ),
                    ));
                    remaining -= 1;
                    continue;
                }

                locked.store(true, Ordering::Release);
                sink.publish(PresentationEvent::Countdown { remaining: 0 });
                sink.publish(PresentationEvent::status(
                    StatusKind::Success,
                    "Firmware update completed successfully!\n\
                     The system has restarted with the new firmware.\n\
                     You can now close this window or disconnect from the WiFi network.",
                ));
                sink.publish(PresentationEvent::SubmitEnabled(false));
                sink.publish(PresentationEvent::RetryEnabled(false));
                debug!("restart countdown finished");
                return;
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Waits until the countdown has finished or was cancelled.
    pub(crate) async fn finished(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RestartCountdown {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
