//! Drives an [`UploadSession`] against a [`FirmwareTransport`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::session::UploadSession;
use crate::transport::{FirmwareTransport, TransportOutcome};
use crate::types::{Phase, UploadRequest};

/// Runs upload attempts and feeds transport events back into the session.
pub struct UpdateOrchestrator {
    session: UploadSession,
    transport: Arc<dyn FirmwareTransport>,
    cancel: CancellationToken,
}

impl UpdateOrchestrator {
    pub fn new(session: UploadSession, transport: Arc<dyn FirmwareTransport>) -> Self {
        Self {
            session,
            transport,
            cancel: CancellationToken::new(),
        }
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut UploadSession {
        &mut self.session
    }

    /// Token that aborts the attempt in flight, or a pending backoff.
    ///
    /// A token that already fired is replaced when the next attempt
    /// starts; fetch a fresh one after cancelling.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Confirms the current file and runs the first attempt.
    ///
    /// Returns the phase the session ended in.
    pub async fn upload(&mut self) -> Result<Phase, SessionError> {
        let request = self.session.confirm_and_upload()?;
        self.run_attempt(request).await;
        Ok(self.session.phase())
    }

    /// Runs one retry after a failed attempt.
    pub async fn retry(&mut self) -> Result<Phase, SessionError> {
        let request = self.session.retry()?;
        self.run_attempt(request).await;
        Ok(self.session.phase())
    }

    /// Uploads, then keeps retrying with backoff until the device accepts
    /// the image, the budget runs out, or the token fires.
    pub async fn upload_with_auto_retry(&mut self) -> Result<Phase, SessionError> {
        let mut phase = self.upload().await?;

        while phase == Phase::RetryAvailable {
            let next = self.session.retry_count() + 1;
            let delay = self.session.config().retry.delay_for_attempt(next);
            info!(
                retry = next,
                max_retries = self.session.max_retries(),
                delay_ms = delay.as_millis() as u64,
                "scheduling automatic retry"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("automatic retry cancelled during backoff");
                    return Ok(phase);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            phase = self.retry().await?;
        }

        Ok(phase)
    }

    async fn run_attempt(&mut self, request: UploadRequest) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let transport = Arc::clone(&self.transport);
        let mut send = transport.send(request.image, progress_tx, self.cancel.clone());

        let outcome = loop {
            tokio::select! {
                biased;
                Some(p) = progress_rx.recv() => {
                    self.session.on_progress(p.bytes_sent, p.bytes_total);
                }
                outcome = &mut send => break outcome,
            }
        };

        // Progress queued behind the response still belongs to this attempt.
        while let Ok(p) = progress_rx.try_recv() {
            self.session.on_progress(p.bytes_sent, p.bytes_total);
        }

        debug!(attempt = request.attempt_number, ?outcome, "transport finished");
        self.dispatch(outcome);
    }

    fn dispatch(&mut self, outcome: TransportOutcome) {
        match outcome {
            TransportOutcome::Completed { status: 200, body } => {
                self.session.on_success(Some(&body));
            }
            TransportOutcome::Completed { status, body } => {
                self.session.on_server_rejected(status, Some(&body));
            }
            TransportOutcome::NetworkError(reason) => {
                warn!(%reason, "upload connection failed");
                self.session.on_network_error();
            }
            TransportOutcome::TimedOut => self.session.on_timeout(),
            TransportOutcome::Cancelled => {
                if let Err(e) = self.session.cancel() {
                    debug!(error = %e, "cancellation arrived after the attempt ended");
                }
            }
        }
    }
}
