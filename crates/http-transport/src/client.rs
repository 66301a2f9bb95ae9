//! reqwest-based [`FirmwareTransport`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use otaflash_upload::{FirmwareTransport, TransferProgress, TransportOutcome};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_UPLOAD_TIMEOUT, FIRMWARE_CONTENT_TYPE, OTA_UPDATE_PATH};

/// Errors building the transport.
#[derive(Debug, thiserror::Error)]
pub enum HttpTransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid device URL: {0}")]
    InvalidUrl(String),
}

/// Where and how to send firmware images.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Device root, e.g. `http://192.168.4.1`.
    pub base_url: String,
    /// Limit for the whole request, body upload and response included.
    pub timeout: Duration,
    pub chunk_size: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.4.1".into(),
            timeout: DEFAULT_UPLOAD_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// POSTs firmware images to the device's update endpoint.
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    chunk_size: usize,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, HttpTransportError> {
        let base = reqwest::Url::parse(config.base_url.trim())
            .map_err(|e| HttpTransportError::InvalidUrl(format!("{}: {e}", config.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(HttpTransportError::InvalidUrl(format!(
                "{}: unsupported scheme",
                config.base_url
            )));
        }

        let endpoint = format!(
            "{}{OTA_UPDATE_PATH}",
            base.as_str().trim_end_matches('/')
        );
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            endpoint,
            timeout: config.timeout,
            chunk_size: config.chunk_size.max(1),
        })
    }

    /// Full URL the image is posted to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(
        &self,
        image: Arc<[u8]>,
        progress: mpsc::UnboundedSender<TransferProgress>,
    ) -> TransportOutcome {
        let total = image.len() as u64;
        let chunk_size = self.chunk_size;
        let ranges: Vec<(usize, usize)> = (0..image.len())
            .step_by(chunk_size)
            .map(|start| (start, (start + chunk_size).min(image.len())))
            .collect();

        let body = futures_util::stream::iter(ranges).map(move |(start, end)| {
            let _ = progress.send(TransferProgress {
                bytes_sent: end as u64,
                bytes_total: total,
            });
            Ok::<_, std::io::Error>(image[start..end].to_vec())
        });

        info!(endpoint = %self.endpoint, bytes = total, "posting firmware image");

        // The device's HTTP server does not accept chunked transfer encoding.
        let result = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, FIRMWARE_CONTENT_TYPE)
            .header(CONTENT_LENGTH, total)
            .timeout(self.timeout)
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => return classify_error(e),
        };

        let status = resp.status().as_u16();
        match resp.text().await {
            Ok(body) => {
                debug!(status, body = %body, "device responded");
                TransportOutcome::Completed { status, body }
            }
            Err(e) if e.is_timeout() => TransportOutcome::TimedOut,
            // The status line already arrived; keep it without the body.
            Err(e) => {
                debug!(status, error = %e, "could not read response body");
                TransportOutcome::Completed {
                    status,
                    body: String::new(),
                }
            }
        }
    }
}

fn classify_error(e: reqwest::Error) -> TransportOutcome {
    if e.is_timeout() {
        TransportOutcome::TimedOut
    } else {
        TransportOutcome::NetworkError(e.to_string())
    }
}

impl FirmwareTransport for HttpTransport {
    fn send(
        &self,
        image: Arc<[u8]>,
        progress: mpsc::UnboundedSender<TransferProgress>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = TransportOutcome> + Send + '_>> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(endpoint = %self.endpoint, "upload cancelled");
                    TransportOutcome::Cancelled
                }
                outcome = self.post(image, progress) => outcome,
            }
        })
    }
}
