//! Maps device responses to user-facing error descriptions.

use std::fmt;

use serde::Deserialize;

/// Raw bodies at or above this length are not shown to the user.
const MAX_RAW_BODY_LEN: usize = 200;

/// Coarse category of a failed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 400: image rejected (bad format or signature).
    InvalidFirmware,
    /// 413: image larger than the device accepts.
    PayloadTooLarge,
    /// 500: the device failed while flashing.
    DeviceFailure,
    /// 503: the device is busy with another update.
    DeviceBusy,
    /// 0: the device could not be reached.
    ConnectionFailed,
    /// Anything else.
    Unknown,
}

/// A failure ready to be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayableError {
    pub status: u16,
    pub kind: ErrorKind,
    pub summary: String,
    pub details: Option<String>,
}

impl fmt::Display for DisplayableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary)?;
        if let Some(details) = &self.details {
            write!(f, "\n{details}")?;
        }
        if self.kind == ErrorKind::Unknown {
            write!(f, "\nError code: {}", self.status)?;
        }
        Ok(())
    }
}

/// Optional structured error body returned by the device.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Turns a transport status code and optional body into a [`DisplayableError`].
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    max_size_mb: u64,
}

impl ErrorClassifier {
    /// `max_size_mb` is quoted back to the user on 413 responses.
    pub fn new(max_size_mb: u64) -> Self {
        Self { max_size_mb }
    }

    /// Classifies a failed response. Never fails: unusable bodies fall
    /// back to the generic message for the status.
    pub fn classify(&self, status: u16, body: Option<&str>) -> DisplayableError {
        let (server_error, server_details) = parse_body(body);

        let (kind, summary, details) = match status {
            400 => (
                ErrorKind::InvalidFirmware,
                server_error.unwrap_or_else(|| "Invalid firmware file".into()),
                server_details,
            ),
            413 => (
                ErrorKind::PayloadTooLarge,
                format!("File too large (max {}MB)", self.max_size_mb),
                None,
            ),
            500 => (
                ErrorKind::DeviceFailure,
                server_error.unwrap_or_else(|| "Server error during upload".into()),
                server_details,
            ),
            503 => (ErrorKind::DeviceBusy, "Device busy".into(), None),
            0 => (ErrorKind::ConnectionFailed, "Connection failed".into(), None),
            _ => (
                ErrorKind::Unknown,
                server_error.unwrap_or_else(|| "Upload failed".into()),
                server_details,
            ),
        };

        DisplayableError {
            status,
            kind,
            summary,
            details,
        }
    }
}

/// Extracts `(error, details)` from a response body.
///
/// JSON objects contribute their `error`/`details` fields and other JSON
/// values contribute nothing. Short bodies that are not JSON at all are
/// used verbatim as the error text.
fn parse_body(body: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(body) = body.map(str::trim).filter(|b| !b.is_empty()) else {
        return (None, None);
    };

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value @ serde_json::Value::Object(_)) => {
            // Fields of the wrong type count as missing.
            let parsed = ErrorBody::deserialize(value).unwrap_or_default();
            (non_empty(parsed.error), non_empty(parsed.details))
        }
        Ok(_) => (None, None),
        Err(_) if body.chars().count() < MAX_RAW_BODY_LEN => (Some(body.to_string()), None),
        Err(_) => (None, None),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
