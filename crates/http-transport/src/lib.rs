//! HTTP transport for device firmware updates.
//!
//! Streams the raw image to `POST {base_url}/ota_update` as
//! `application/octet-stream` and reports progress per chunk.

pub mod client;

pub use client::{HttpTransport, HttpTransportConfig, HttpTransportError};

/// Path of the update endpoint on the device.
pub const OTA_UPDATE_PATH: &str = "/ota_update";

/// Content type of the request body.
pub const FIRMWARE_CONTENT_TYPE: &str = "application/octet-stream";

/// Whole-request timeout used when none is configured.
pub const DEFAULT_UPLOAD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Size of each body chunk handed to the connection.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
