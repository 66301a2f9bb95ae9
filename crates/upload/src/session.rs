//! The upload state machine.
//!
//! `UploadSession` owns the selected file, the attempt history and the
//! retry budget. User actions (`select_file`, `confirm_and_upload`,
//! `retry`, `cancel`) return a `Result`; transport events (`on_progress`,
//! `on_success`, `on_network_error`, `on_timeout`, `on_server_rejected`)
//! are infallible and ignored when they do not apply to the current phase.
//!
//! Every transition is reported to the [`PresentationSink`]. Each failed
//! attempt produces exactly one error status line.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use otaflash_firmware::{FileValidator, FirmwareFile, ProgressSnapshot, SpeedCalculator};
use tracing::{debug, error, info, warn};

use crate::classify::{DisplayableError, ErrorClassifier};
use crate::countdown::RestartCountdown;
use crate::error::SessionError;
use crate::sink::{ConfirmationPrompt, PresentationEvent, PresentationSink, StatusKind};
use crate::types::{AttemptOutcome, Phase, SessionConfig, UploadAttempt, UploadRequest};

/// Controller for one firmware update workflow.
///
/// `on_success` spawns the restart countdown and must be called from
/// within a Tokio runtime.
pub struct UploadSession {
    config: SessionConfig,
    validator: FileValidator,
    classifier: ErrorClassifier,
    sink: Arc<dyn PresentationSink>,
    current_file: Option<FirmwareFile>,
    attempts: Vec<UploadAttempt>,
    retry_count: u32,
    phase: Phase,
    speed: SpeedCalculator,
    last_error: Option<DisplayableError>,
    countdown: Option<RestartCountdown>,
    locked: Arc<AtomicBool>,
}

impl UploadSession {
    pub fn new(config: SessionConfig, sink: Arc<dyn PresentationSink>) -> Self {
        let validator = FileValidator::new(config.limits.clone());
        let classifier = ErrorClassifier::new(config.limits.max_size_mb());
        Self {
            config,
            validator,
            classifier,
            sink,
            current_file: None,
            attempts: Vec::new(),
            retry_count: 0,
            phase: Phase::Idle,
            speed: SpeedCalculator::default(),
            last_error: None,
            countdown: None,
            locked: Arc::new(AtomicBool::new(false)),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn current_file(&self) -> Option<&FirmwareFile> {
        self.current_file.as_ref()
    }

    pub fn attempts(&self) -> &[UploadAttempt] {
        &self.attempts
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.config.retry.max_retries
    }

    /// Classified error of the last server rejection, if any.
    pub fn last_error(&self) -> Option<&DisplayableError> {
        self.last_error.as_ref()
    }

    /// `true` once the restart countdown has run out.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// The attempt currently in flight, if any.
    pub fn pending_attempt(&self) -> Option<&UploadAttempt> {
        self.attempts.iter().rev().find(|a| a.is_pending())
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    /// Replaces the current file and starts the workflow over.
    ///
    /// A valid file moves the session to `AwaitingConfirmation`; an
    /// invalid one leaves it `Idle` and reports every violation.
    pub fn select_file(&mut self, file: FirmwareFile) -> Result<(), SessionError> {
        self.ensure_unlocked()?;
        if self.pending_attempt().is_some() {
            return Err(SessionError::UploadInFlight);
        }

        self.clear_progress();
        let violations = self.validator.validate(Some(&file));

        info!(
            file = %file.name(),
            bytes = file.size_bytes(),
            violations = violations.len(),
            "firmware file selected"
        );

        if violations.is_empty() {
            self.sink.publish(PresentationEvent::status(
                StatusKind::Info,
                format!(
                    "Selected: {} ({:.2} MB). Click Upload Firmware to proceed",
                    file.name(),
                    file.size_mb()
                ),
            ));
            self.current_file = Some(file);
            self.set_phase(Phase::AwaitingConfirmation);
            self.sink.publish(PresentationEvent::SubmitEnabled(true));
            self.sink.publish(PresentationEvent::RetryEnabled(false));
            Ok(())
        } else {
            self.current_file = Some(file);
            self.set_phase(Phase::Idle);
            self.sink.publish(PresentationEvent::SubmitEnabled(false));
            self.sink.publish(PresentationEvent::RetryEnabled(false));
            self.report_violations(&violations);
            Err(SessionError::Invalid(violations))
        }
    }

    /// Drops the current file and returns to `Idle`.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.ensure_unlocked()?;
        if self.pending_attempt().is_some() {
            return Err(SessionError::UploadInFlight);
        }

        self.clear_progress();
        self.current_file = None;
        self.set_phase(Phase::Idle);
        self.sink.publish(PresentationEvent::SubmitEnabled(false));
        self.sink.publish(PresentationEvent::RetryEnabled(false));
        Ok(())
    }

    /// Validates the current file and publishes the confirmation prompt.
    ///
    /// The host decides whether and how to ask; the session only provides
    /// the text and checks that an upload could start.
    pub fn request_confirmation(&mut self) -> Result<ConfirmationPrompt, SessionError> {
        self.ensure_unlocked()?;
        self.ensure_can_start("request confirmation")?;
        let file = self.gate()?;

        let prompt = ConfirmationPrompt {
            file_name: file.name().to_string(),
            size_bytes: file.size_bytes(),
        };
        self.set_phase(Phase::AwaitingConfirmation);
        self.sink
            .publish(PresentationEvent::ConfirmationRequired(prompt.clone()));
        Ok(prompt)
    }

    /// Starts the first attempt for the current file.
    ///
    /// Returns the request to hand to the transport.
    pub fn confirm_and_upload(&mut self) -> Result<UploadRequest, SessionError> {
        self.ensure_unlocked()?;
        self.ensure_can_start("upload")?;
        let file = self.gate()?;
        Ok(self.begin_attempt(&file, false))
    }

    /// Starts another attempt with the same file after a failure.
    pub fn retry(&mut self) -> Result<UploadRequest, SessionError> {
        self.ensure_unlocked()?;
        if self.pending_attempt().is_some() {
            return Err(SessionError::UploadInFlight);
        }
        match self.phase {
            Phase::RetryAvailable => {}
            Phase::RetryExhausted => return Err(SessionError::RetryExhausted),
            phase => {
                return Err(SessionError::WrongPhase {
                    action: "retry",
                    phase,
                });
            }
        }
        if self.retry_count >= self.max_retries() {
            return Err(SessionError::RetryExhausted);
        }

        let file = if self.config.revalidate_on_retry {
            match self.refresh_and_gate() {
                Ok(file) => file,
                Err(e) => {
                    self.set_phase(Phase::Idle);
                    self.sink.publish(PresentationEvent::RetryEnabled(false));
                    return Err(e);
                }
            }
        } else {
            self.current_file.clone().ok_or(SessionError::NoFile)?
        };

        self.retry_count += 1;
        Ok(self.begin_attempt(&file, true))
    }

    /// Abandons the attempt in flight.
    ///
    /// Returns to `AwaitingConfirmation` when the current file is still
    /// valid, otherwise to `Idle`. The retry budget is left as it was.
    /// The caller is responsible for stopping the transport.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Uploading {
            return Err(SessionError::WrongPhase {
                action: "cancel",
                phase: self.phase,
            });
        }

        self.finish_attempt(AttemptOutcome::Cancelled);
        let valid = self.validator.validate(self.current_file.as_ref()).is_empty();
        self.set_phase(if valid {
            Phase::AwaitingConfirmation
        } else {
            Phase::Idle
        });
        self.sink.publish(PresentationEvent::status(
            StatusKind::Info,
            "Upload cancelled",
        ));
        self.sink.publish(PresentationEvent::SubmitEnabled(valid));
        self.sink.publish(PresentationEvent::RetryEnabled(false));
        Ok(())
    }

    /// Waits for the restart countdown to finish, if one is running.
    pub async fn wait_for_restart(&mut self) {
        if let Some(countdown) = self.countdown.as_mut() {
            countdown.finished().await;
        }
    }

    // -----------------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------------

    /// Records transport progress for the attempt in flight.
    pub fn on_progress(&mut self, bytes_sent: u64, bytes_total: u64) {
        if self.phase != Phase::Uploading {
            debug!(phase = %self.phase, bytes_sent, "ignoring progress outside upload");
            return;
        }
        if bytes_total == 0 {
            return;
        }

        let Some(attempt) = self.attempts.iter_mut().rev().find(|a| a.is_pending()) else {
            return;
        };
        let delta = bytes_sent.saturating_sub(attempt.bytes_sent);
        attempt.bytes_sent = bytes_sent;
        attempt.bytes_total = bytes_total;

        self.speed.add_sample(delta);
        let snapshot = ProgressSnapshot {
            bytes_sent,
            bytes_total,
            bytes_per_second: self.speed.bytes_per_second(),
            eta: self.speed.eta(bytes_total.saturating_sub(bytes_sent)),
        };

        self.sink.publish(PresentationEvent::Progress {
            fraction: snapshot.fraction(),
            percent: snapshot.percent(),
            kb_sent: snapshot.kb_sent(),
            bytes_per_second: snapshot.bytes_per_second,
        });
        self.sink
            .publish(PresentationEvent::status(StatusKind::Uploading, snapshot.label()));
    }

    /// The device answered 200: the image was accepted.
    pub fn on_success(&mut self, body: Option<&str>) {
        if self.phase != Phase::Uploading {
            debug!(phase = %self.phase, "ignoring completion outside upload");
            return;
        }

        self.finish_attempt(AttemptOutcome::Success);
        self.set_phase(Phase::Succeeded);
        info!(
            file = %self.file_name(),
            response = body.unwrap_or_default(),
            "firmware upload accepted"
        );

        self.sink.publish(PresentationEvent::SubmitEnabled(false));
        self.sink.publish(PresentationEvent::RetryEnabled(false));
        self.sink.publish(PresentationEvent::status(
            StatusKind::Success,
            "Update successful! Restarting system...",
        ));

        self.countdown = Some(RestartCountdown::spawn(
            self.config.restart_countdown,
            self.config.countdown_period,
            Arc::clone(&self.sink),
            Arc::clone(&self.locked),
        ));
    }

    /// The device could not be reached or the connection broke.
    pub fn on_network_error(&mut self) {
        let message = format!(
            "{}: network error occurred during upload",
            self.classifier.classify(0, None).summary
        );
        self.fail(AttemptOutcome::NetworkError, message);
    }

    /// The transport gave up waiting for the device.
    pub fn on_timeout(&mut self) {
        self.fail(
            AttemptOutcome::Timeout,
            "Upload timed out: the device did not respond".into(),
        );
    }

    /// The device answered with a non-200 status.
    pub fn on_server_rejected(&mut self, status: u16, body: Option<&str>) {
        if self.phase != Phase::Uploading {
            debug!(phase = %self.phase, status, "ignoring rejection outside upload");
            return;
        }

        let classified = self.classifier.classify(status, body);
        error!(
            status,
            body = body.unwrap_or_default(),
            file = %self.file_name(),
            "firmware upload rejected"
        );

        let message = classified.to_string();
        self.last_error = Some(classified);
        self.fail(AttemptOutcome::ServerRejected { status, message: message.clone() }, message);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_unlocked(&self) -> Result<(), SessionError> {
        if self.is_locked() {
            return Err(SessionError::Locked);
        }
        Ok(())
    }

    fn ensure_can_start(&self, action: &'static str) -> Result<(), SessionError> {
        if self.pending_attempt().is_some() {
            return Err(SessionError::UploadInFlight);
        }
        match self.phase {
            Phase::Idle | Phase::AwaitingConfirmation => Ok(()),
            phase => Err(SessionError::WrongPhase { action, phase }),
        }
    }

    /// Re-validates the current file; reports and refuses invalid ones.
    fn gate(&mut self) -> Result<FirmwareFile, SessionError> {
        let violations = self.validator.validate(self.current_file.as_ref());
        if !violations.is_empty() {
            self.report_violations(&violations);
            return Err(match self.current_file {
                None => SessionError::NoFile,
                Some(_) => SessionError::Invalid(violations),
            });
        }
        self.current_file.clone().ok_or(SessionError::NoFile)
    }

    /// Re-reads the current file from its source, then gates it.
    fn refresh_and_gate(&mut self) -> Result<FirmwareFile, SessionError> {
        if let Some(reloaded) = self.current_file.as_ref().map(FirmwareFile::reload) {
            match reloaded {
                Ok(fresh) => self.current_file = Some(fresh),
                Err(e) => {
                    warn!(file = %self.file_name(), error = %e, "firmware file could not be re-read");
                    let reason = e.to_string();
                    self.sink.publish(PresentationEvent::status(
                        StatusKind::Error,
                        format!("File Validation Failed\n{reason}"),
                    ));
                    return Err(SessionError::Unreadable(reason));
                }
            }
        }
        self.gate()
    }

    fn begin_attempt(&mut self, file: &FirmwareFile, is_retry: bool) -> UploadRequest {
        // Numbered over the whole history so cancelled attempts keep theirs.
        let attempt_number = self.attempts.len() as u32 + 1;
        self.attempts.push(UploadAttempt {
            attempt_number,
            started_at: Utc::now(),
            bytes_sent: 0,
            bytes_total: file.size_bytes(),
            outcome: AttemptOutcome::Pending,
        });
        self.speed.reset();
        self.set_phase(Phase::Uploading);

        info!(
            attempt = attempt_number,
            file = %file.name(),
            bytes = file.size_bytes(),
            "starting firmware upload"
        );

        let status = if is_retry {
            format!(
                "Retrying upload (retry {} of {})...",
                self.retry_count,
                self.max_retries()
            )
        } else {
            "Uploading firmware...".to_string()
        };

        self.sink.publish(PresentationEvent::SubmitEnabled(false));
        self.sink.publish(PresentationEvent::RetryEnabled(false));
        self.sink.publish(PresentationEvent::Progress {
            fraction: 0.0,
            percent: 0.0,
            kb_sent: 0.0,
            bytes_per_second: 0.0,
        });
        self.sink
            .publish(PresentationEvent::status(StatusKind::Uploading, status));

        UploadRequest {
            attempt_number,
            file_name: file.name().to_string(),
            image: file.content(),
        }
    }

    /// Closes the pending attempt as failed and decides whether a retry
    /// is still on offer.
    fn fail(&mut self, outcome: AttemptOutcome, message: String) {
        if self.phase != Phase::Uploading {
            debug!(phase = %self.phase, ?outcome, "ignoring failure outside upload");
            return;
        }

        self.finish_attempt(outcome);
        self.set_phase(Phase::Failed);

        let (next, suffix) = if self.retry_count < self.max_retries() {
            let left = self.max_retries() - self.retry_count;
            (Phase::RetryAvailable, format!("{left} retries left"))
        } else {
            (Phase::RetryExhausted, "no retries left".to_string())
        };
        self.set_phase(next);

        warn!(
            retry_count = self.retry_count,
            max_retries = self.max_retries(),
            phase = %next,
            "firmware upload failed"
        );

        self.sink.publish(PresentationEvent::status(
            StatusKind::Error,
            format!("Upload Failed\n{message}\n({suffix})"),
        ));
        self.sink.publish(PresentationEvent::SubmitEnabled(false));
        self.sink
            .publish(PresentationEvent::RetryEnabled(next == Phase::RetryAvailable));
    }

    fn finish_attempt(&mut self, outcome: AttemptOutcome) {
        if let Some(attempt) = self.attempts.iter_mut().rev().find(|a| a.is_pending()) {
            attempt.outcome = outcome;
        }
    }

    fn report_violations(&self, violations: &[otaflash_firmware::Violation]) {
        let lines = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        self.sink.publish(PresentationEvent::status(
            StatusKind::Error,
            format!(
                "File Validation Failed\n{lines}\nPlease select a valid ESP32 firmware .bin file"
            ),
        ));
    }

    fn clear_progress(&mut self) {
        // Dropping the handle stops stale ticks from a previous success.
        self.countdown = None;
        self.attempts.clear();
        self.retry_count = 0;
        self.last_error = None;
        self.speed.reset();
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "upload phase changed");
            self.phase = phase;
        }
    }

    fn file_name(&self) -> &str {
        self.current_file.as_ref().map_or("unknown", |f| f.name())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use otaflash_firmware::{KIB, Violation};

    use super::*;
    use crate::sink::testing::RecordingSink;

    fn firmware(name: &str, size: u64) -> FirmwareFile {
        FirmwareFile::new(name, vec![0u8; size as usize])
    }

    fn session_with(config: SessionConfig) -> (UploadSession, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (UploadSession::new(config, sink.clone()), sink)
    }

    fn session() -> (UploadSession, Arc<RecordingSink>) {
        session_with(SessionConfig::default())
    }

    fn uploading() -> (UploadSession, Arc<RecordingSink>) {
        let (mut s, sink) = session();
        s.select_file(firmware("fw.bin", 500 * KIB)).unwrap();
        s.confirm_and_upload().unwrap();
        (s, sink)
    }

    #[test]
    fn new_session_is_idle() {
        let (s, _) = session();
        assert_eq!(s.phase(), Phase::Idle);
        assert!(s.current_file().is_none());
        assert_eq!(s.retry_count(), 0);
        assert_eq!(s.max_retries(), 3);
    }

    #[test]
    fn valid_selection_awaits_confirmation() {
        let (mut s, sink) = session();
        s.select_file(firmware("fw.bin", 500 * KIB)).unwrap();
        assert_eq!(s.phase(), Phase::AwaitingConfirmation);
        assert!(sink.events().contains(&PresentationEvent::SubmitEnabled(true)));
    }

    #[test]
    fn invalid_selection_stays_idle_and_reports() {
        let (mut s, sink) = session();
        let err = s.select_file(firmware("fw.txt", 500 * KIB)).unwrap_err();
        assert_eq!(err, SessionError::Invalid(vec![Violation::Extension]));
        assert_eq!(s.phase(), Phase::Idle);

        let errors = sink.statuses(StatusKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("File must have .bin extension"));
        assert!(sink.events().contains(&PresentationEvent::SubmitEnabled(false)));
    }

    #[test]
    fn invalid_file_cannot_be_uploaded() {
        let (mut s, _) = session();
        let _ = s.select_file(firmware("fw.bin", 10));
        assert!(matches!(
            s.confirm_and_upload(),
            Err(SessionError::Invalid(_))
        ));
        assert!(s.attempts().is_empty());
    }

    #[test]
    fn upload_without_file_is_refused() {
        let (mut s, sink) = session();
        assert_eq!(s.confirm_and_upload().unwrap_err(), SessionError::NoFile);
        let errors = sink.statuses(StatusKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("No file selected"));
    }

    #[test]
    fn confirmation_prompt_is_published() {
        let (mut s, sink) = session();
        s.select_file(firmware("fw.bin", 500 * KIB)).unwrap();
        let prompt = s.request_confirmation().unwrap();
        assert_eq!(prompt.file_name, "fw.bin");
        assert_eq!(prompt.size_bytes, 500 * KIB);
        assert!(
            sink.events()
                .contains(&PresentationEvent::ConfirmationRequired(prompt))
        );
    }

    #[test]
    fn confirm_starts_first_attempt() {
        let (mut s, sink) = session();
        s.select_file(firmware("fw.bin", 500 * KIB)).unwrap();
        let req = s.confirm_and_upload().unwrap();

        assert_eq!(req.attempt_number, 1);
        assert_eq!(req.file_name, "fw.bin");
        assert_eq!(req.image.len() as u64, 500 * KIB);
        assert_eq!(s.phase(), Phase::Uploading);

        let attempt = s.pending_attempt().unwrap();
        assert_eq!(attempt.attempt_number, 1);
        assert_eq!(attempt.bytes_total, 500 * KIB);
        assert_eq!(
            sink.statuses(StatusKind::Uploading),
            vec!["Uploading firmware...".to_string()]
        );
    }

    #[test]
    fn second_upload_while_pending_is_refused() {
        let (mut s, _) = uploading();
        assert_eq!(
            s.confirm_and_upload().unwrap_err(),
            SessionError::UploadInFlight
        );
        assert_eq!(s.retry().unwrap_err(), SessionError::UploadInFlight);
        assert_eq!(
            s.select_file(firmware("other.bin", 500 * KIB)).unwrap_err(),
            SessionError::UploadInFlight
        );
        assert_eq!(s.attempts().len(), 1);
    }

    #[test]
    fn progress_updates_attempt_and_reports_percent() {
        let (mut s, sink) = uploading();
        s.on_progress(256 * 1024, 512 * 1024);

        let attempt = s.pending_attempt().unwrap();
        assert_eq!(attempt.bytes_sent, 256 * 1024);

        let progress = sink.events().into_iter().rev().find_map(|e| match e {
            PresentationEvent::Progress { fraction, kb_sent, .. } => Some((fraction, kb_sent)),
            _ => None,
        });
        assert_eq!(progress, Some((0.5, 256.0)));
        let last = sink.statuses(StatusKind::Uploading).pop().unwrap();
        assert!(last.starts_with("Uploading... 50.0% (256.0 KB"), "{last}");
        assert_eq!(s.phase(), Phase::Uploading);
    }

    #[test]
    fn progress_with_unknown_total_is_ignored() {
        let (mut s, sink) = uploading();
        sink.take();
        s.on_progress(100, 0);
        assert!(sink.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn success_is_terminal_and_ignores_spurious_events() {
        let (mut s, sink) = uploading();
        s.on_success(Some("Firmware update successful. Rebooting..."));
        assert_eq!(s.phase(), Phase::Succeeded);
        assert_eq!(s.attempts()[0].outcome, AttemptOutcome::Success);

        sink.take();
        s.on_progress(10, 20);
        s.on_network_error();
        s.on_timeout();
        s.on_server_rejected(500, None);
        s.on_success(None);

        assert_eq!(s.phase(), Phase::Succeeded);
        assert!(sink.events().is_empty());
        assert!(matches!(
            s.confirm_and_upload(),
            Err(SessionError::WrongPhase { phase: Phase::Succeeded, .. })
        ));
        assert!(matches!(
            s.retry(),
            Err(SessionError::WrongPhase { phase: Phase::Succeeded, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn success_countdown_strictly_decrements_then_locks() {
        let (mut s, sink) = uploading();
        s.on_success(None);
        s.wait_for_restart().await;

        let ticks = sink.countdown();
        assert_eq!(ticks.first(), Some(&15));
        assert_eq!(ticks.last(), Some(&0));
        assert!(ticks.windows(2).all(|w| w[1] + 1 == w[0]));

        let finals = sink.statuses(StatusKind::Success);
        assert!(
            finals
                .last()
                .unwrap()
                .starts_with("Firmware update completed successfully!")
        );

        assert!(s.is_locked());
        sink.take();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(sink.events().is_empty());

        assert_eq!(
            s.select_file(firmware("fw.bin", 500 * KIB)).unwrap_err(),
            SessionError::Locked
        );
        assert_eq!(s.reset().unwrap_err(), SessionError::Locked);
        assert_eq!(s.phase(), Phase::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn new_selection_cancels_countdown() {
        let (mut s, sink) = uploading();
        s.on_success(None);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        s.select_file(firmware("next.bin", 500 * KIB)).unwrap();
        let before = sink.countdown();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(sink.countdown(), before);
        assert_eq!(before, vec![15, 14]);
        assert!(!s.is_locked());
        assert_eq!(s.phase(), Phase::AwaitingConfirmation);
        assert!(s.attempts().is_empty());
    }

    #[test]
    fn network_error_offers_retry() {
        let (mut s, sink) = uploading();
        sink.take();
        s.on_network_error();

        assert_eq!(s.phase(), Phase::RetryAvailable);
        assert_eq!(s.attempts()[0].outcome, AttemptOutcome::NetworkError);
        let errors = sink.statuses(StatusKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Connection failed"));
        assert!(errors[0].contains("3 retries left"));
        assert!(sink.events().contains(&PresentationEvent::RetryEnabled(true)));
    }

    #[test]
    fn timeout_is_reported_as_timeout() {
        let (mut s, sink) = uploading();
        s.on_timeout();
        assert_eq!(s.phase(), Phase::RetryAvailable);
        assert_eq!(s.attempts()[0].outcome, AttemptOutcome::Timeout);
        assert!(sink.statuses(StatusKind::Error)[0].contains("timed out"));
    }

    #[test]
    fn server_rejection_is_classified() {
        let (mut s, sink) = uploading();
        s.on_server_rejected(400, Some(r#"{"error":"bad sig"}"#));

        assert_eq!(s.phase(), Phase::RetryAvailable);
        assert!(matches!(
            &s.attempts()[0].outcome,
            AttemptOutcome::ServerRejected { status: 400, message } if message.contains("bad sig")
        ));
        assert_eq!(s.last_error().unwrap().summary, "bad sig");
        let errors = sink.statuses(StatusKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("bad sig"));
    }

    #[test]
    fn retry_reuses_same_content_and_numbers_attempts() {
        let (mut s, _) = uploading();
        let first = s.attempts()[0].bytes_total;
        s.on_network_error();

        let req = s.retry().unwrap();
        assert_eq!(req.attempt_number, 2);
        assert_eq!(req.image.len() as u64, first);
        assert_eq!(s.retry_count(), 1);
        assert_eq!(s.phase(), Phase::Uploading);
        assert_eq!(s.attempts().len(), 2);
        assert_eq!(
            s.attempts().iter().filter(|a| a.is_pending()).count(),
            1
        );
    }

    #[test]
    fn retry_budget_is_bounded() {
        let (mut s, sink) = uploading();
        for expected in 1..=3 {
            s.on_network_error();
            assert_eq!(s.phase(), Phase::RetryAvailable);
            s.retry().unwrap();
            assert_eq!(s.retry_count(), expected);
        }

        sink.take();
        s.on_network_error();
        assert_eq!(s.retry_count(), s.max_retries());
        assert_eq!(s.phase(), Phase::RetryExhausted);
        assert_eq!(s.retry().unwrap_err(), SessionError::RetryExhausted);
        assert_eq!(s.attempts().len(), 4);

        let errors = sink.statuses(StatusKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no retries left"));
        assert!(sink.events().contains(&PresentationEvent::RetryEnabled(false)));
    }

    #[test]
    fn zero_retry_budget_exhausts_immediately() {
        let mut config = SessionConfig::default();
        config.retry.max_retries = 0;
        let (mut s, _) = session_with(config);
        s.select_file(firmware("fw.bin", 500 * KIB)).unwrap();
        s.confirm_and_upload().unwrap();
        s.on_timeout();
        assert_eq!(s.phase(), Phase::RetryExhausted);
    }

    #[test]
    fn retry_outside_failure_is_refused() {
        let (mut s, _) = session();
        s.select_file(firmware("fw.bin", 500 * KIB)).unwrap();
        assert_eq!(
            s.retry().unwrap_err(),
            SessionError::WrongPhase {
                action: "retry",
                phase: Phase::AwaitingConfirmation,
            }
        );
    }

    #[test]
    fn new_selection_resets_retry_budget() {
        let (mut s, _) = uploading();
        s.on_network_error();
        s.retry().unwrap();
        s.on_network_error();
        assert_eq!(s.retry_count(), 1);

        s.select_file(firmware("fw2.bin", 600 * KIB)).unwrap();
        assert_eq!(s.retry_count(), 0);
        assert!(s.attempts().is_empty());
        let req = s.confirm_and_upload().unwrap();
        assert_eq!(req.attempt_number, 1);
    }

    fn revalidating_session(path: &std::path::Path) -> (UploadSession, Arc<RecordingSink>) {
        let mut config = SessionConfig::default();
        config.revalidate_on_retry = true;
        let (mut s, sink) = session_with(config);
        s.select_file(FirmwareFile::load(path).unwrap()).unwrap();
        s.confirm_and_upload().unwrap();
        s.on_network_error();
        (s, sink)
    }

    #[test]
    fn revalidation_on_retry_sends_fresh_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, vec![0u8; (500 * KIB) as usize]).unwrap();
        let (mut s, _) = revalidating_session(&path);

        std::fs::write(&path, vec![0u8; (600 * KIB) as usize]).unwrap();
        let req = s.retry().unwrap();
        assert_eq!(req.image.len() as u64, 600 * KIB);
    }

    #[test]
    fn revalidation_on_retry_rejects_changed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, vec![0u8; (500 * KIB) as usize]).unwrap();
        let (mut s, sink) = revalidating_session(&path);
        sink.take();

        std::fs::write(&path, [0u8; 10]).unwrap();
        assert_eq!(
            s.retry().unwrap_err(),
            SessionError::Invalid(vec![Violation::TooSmall { min_kb: 100 }])
        );
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!(s.retry_count(), 0);
        assert_eq!(s.attempts().len(), 1);
        assert_eq!(sink.statuses(StatusKind::Error).len(), 1);
        assert!(sink.events().contains(&PresentationEvent::RetryEnabled(false)));
    }

    #[test]
    fn revalidation_on_retry_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, vec![0u8; (500 * KIB) as usize]).unwrap();
        let (mut s, _) = revalidating_session(&path);

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(s.retry(), Err(SessionError::Unreadable(_))));
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn retry_without_revalidation_keeps_loaded_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.bin");
        std::fs::write(&path, vec![0u8; (500 * KIB) as usize]).unwrap();
        let (mut s, _) = session();
        s.select_file(FirmwareFile::load(&path).unwrap()).unwrap();
        s.confirm_and_upload().unwrap();
        s.on_network_error();

        std::fs::write(&path, [0u8; 10]).unwrap();
        assert_eq!(s.retry().unwrap().image.len() as u64, 500 * KIB);
    }

    #[test]
    fn cancel_returns_to_confirmation() {
        let (mut s, sink) = uploading();
        s.cancel().unwrap();
        assert_eq!(s.phase(), Phase::AwaitingConfirmation);
        assert_eq!(s.attempts()[0].outcome, AttemptOutcome::Cancelled);
        assert!(s.pending_attempt().is_none());
        assert!(sink.statuses(StatusKind::Info).contains(&"Upload cancelled".to_string()));
        assert_eq!(
            sink.events().iter().rev().find(|e| matches!(e, PresentationEvent::SubmitEnabled(_))),
            Some(&PresentationEvent::SubmitEnabled(true))
        );

        // Late events from the cancelled transfer are ignored.
        s.on_success(None);
        assert_eq!(s.phase(), Phase::AwaitingConfirmation);

        assert_eq!(s.confirm_and_upload().unwrap().attempt_number, 2);
    }

    #[test]
    fn cancel_after_retry_keeps_attempt_numbers_unique() {
        let (mut s, sink) = uploading();
        s.on_network_error();
        assert_eq!(s.retry().unwrap().attempt_number, 2);
        s.cancel().unwrap();
        assert_eq!(s.retry_count(), 1);

        sink.take();
        let req = s.confirm_and_upload().unwrap();
        assert_eq!(req.attempt_number, 3);
        assert_eq!(
            sink.statuses(StatusKind::Uploading),
            vec!["Uploading firmware...".to_string()]
        );

        let numbers: Vec<u32> = s.attempts().iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn cancel_outside_upload_is_refused() {
        let (mut s, _) = session();
        assert!(matches!(
            s.cancel(),
            Err(SessionError::WrongPhase { action: "cancel", .. })
        ));
    }

    #[test]
    fn reset_clears_file() {
        let (mut s, _) = session();
        s.select_file(firmware("fw.bin", 500 * KIB)).unwrap();
        s.reset().unwrap();
        assert_eq!(s.phase(), Phase::Idle);
        assert!(s.current_file().is_none());
    }
}
