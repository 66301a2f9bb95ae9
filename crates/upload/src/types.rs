//! Public types for the upload workflow.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use otaflash_firmware::ValidationLimits;
use rand::Rng;

/// Coarse state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No valid file, or a file that has not been offered for upload.
    Idle,
    /// A valid file is selected and waits for the user's go-ahead.
    AwaitingConfirmation,
    /// An attempt is in flight.
    Uploading,
    /// The device accepted the image. Terminal for this file.
    Succeeded,
    /// The last attempt failed; resolved immediately into one of the
    /// two retry phases.
    Failed,
    /// The last attempt failed and the retry budget is not spent.
    RetryAvailable,
    /// The last attempt failed and no retries remain.
    RetryExhausted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "idle",
            Phase::AwaitingConfirmation => "awaiting confirmation",
            Phase::Uploading => "uploading",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
            Phase::RetryAvailable => "retry available",
            Phase::RetryExhausted => "retry exhausted",
        };
        f.write_str(s)
    }
}

/// Result of one transmission try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Success,
    NetworkError,
    Timeout,
    ServerRejected { status: u16, message: String },
    Cancelled,
}

/// One complete transmission try, numbered from 1.
#[derive(Debug, Clone)]
pub struct UploadAttempt {
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub outcome: AttemptOutcome,
}

impl UploadAttempt {
    pub fn is_pending(&self) -> bool {
        self.outcome == AttemptOutcome::Pending
    }
}

/// What the transport needs to carry out one attempt.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub attempt_number: u32,
    pub file_name: String,
    pub image: Arc<[u8]>,
}

/// Bounded retry budget with exponential backoff between automatic retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first automatic retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculates the delay before retry number `retry` (1-based),
    /// with ±25% jitter so several devices do not retry in lockstep.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset: f64 = rand::thread_rng().gen_range(-1.0..1.0);
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}

/// Settings for an [`UploadSession`](crate::UploadSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub limits: ValidationLimits,
    pub retry: RetryPolicy,
    /// Seconds counted down after a successful upload.
    pub restart_countdown: u32,
    /// Interval between countdown ticks.
    pub countdown_period: Duration,
    /// Run the validator again before every retry.
    pub revalidate_on_retry: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            limits: ValidationLimits::default(),
            retry: RetryPolicy::default(),
            restart_countdown: 15,
            countdown_period: Duration::from_secs(1),
            revalidate_on_retry: false,
        }
    }
}
