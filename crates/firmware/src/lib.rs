//! Firmware image handling for the OTA uploader.
//!
//! Holds the selected image, the pre-flight checks that gate an upload,
//! and the byte/percentage math used for progress reporting.

mod file;
mod progress;
mod validation;

pub use file::FirmwareFile;
pub use progress::{ProgressSnapshot, SpeedCalculator};
pub use validation::{
    FileValidator, ValidationLimits, ValidationResult, Violation, inspect_image_header,
};

/// One kibibyte.
pub const KIB: u64 = 1024;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Upload size limit used when no setting is configured.
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 2;

/// Anything smaller than this is almost certainly not a firmware image.
pub const MIN_FIRMWARE_SIZE: u64 = 100 * KIB;

/// First byte of every ESP application image.
pub const IMAGE_MAGIC: u8 = 0xE9;

/// Shortest buffer the device accepts as an image header.
pub const MIN_HEADER_LEN: usize = 32;

/// Errors produced while loading a firmware image.
#[derive(Debug, thiserror::Error)]
pub enum FirmwareError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a regular file: {0}")]
    NotAFile(String),
}
