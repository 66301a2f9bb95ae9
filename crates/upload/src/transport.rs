//! Seam between the workflow and whatever carries bytes to the device.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cumulative byte count reported while an image is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

/// How one transmission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    /// The device answered. Any status code, including errors.
    Completed { status: u16, body: String },
    /// No answer: refused, reset, DNS failure and the like.
    NetworkError(String),
    /// The device did not answer within the configured time.
    TimedOut,
    /// The cancellation token fired before an answer arrived.
    Cancelled,
}

/// Sends a firmware image to the device.
///
/// Implementations report progress on `progress` as bytes leave the
/// client, and stop as soon as `cancel` fires.
pub trait FirmwareTransport: Send + Sync {
    fn send(
        &self,
        image: Arc<[u8]>,
        progress: mpsc::UnboundedSender<TransferProgress>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = TransportOutcome> + Send + '_>>;
}
