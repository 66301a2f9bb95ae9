use crate::{
    DEFAULT_MAX_FILE_SIZE_MB, FirmwareFile, IMAGE_MAGIC, KIB, MIB, MIN_FIRMWARE_SIZE,
    MIN_HEADER_LEN,
};

/// A single reason a file cannot be uploaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("No file selected")]
    NoFile,

    #[error("File must have .bin extension")]
    Extension,

    #[error("File too large (maximum {max_mb}MB)")]
    TooLarge { max_mb: u64 },

    #[error("File too small (minimum {min_kb}KB) - not valid firmware")]
    TooSmall { min_kb: u64 },

    #[error("File is empty")]
    Empty,

    #[error("Invalid firmware image header")]
    BadHeader,
}

/// Ordered list of violations; empty means the file may be uploaded.
pub type ValidationResult = Vec<Violation>;

/// Size bounds and optional content checks applied before upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationLimits {
    /// Largest accepted image in bytes.
    pub max_size_bytes: u64,
    /// Smallest plausible image in bytes.
    pub min_size_bytes: u64,
    /// Also inspect the first bytes of the image for the ESP magic.
    pub check_image_header: bool,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self::with_max_size_mb(DEFAULT_MAX_FILE_SIZE_MB)
    }
}

impl ValidationLimits {
    /// Limits with the upload ceiling expressed in megabytes.
    pub fn with_max_size_mb(max_mb: u64) -> Self {
        Self {
            max_size_bytes: max_mb.saturating_mul(MIB),
            min_size_bytes: MIN_FIRMWARE_SIZE,
            check_image_header: false,
        }
    }

    /// Upload ceiling in whole megabytes, rounded down.
    pub fn max_size_mb(&self) -> u64 {
        self.max_size_bytes / MIB
    }
}

/// Pre-flight gate for firmware files.
#[derive(Debug, Clone, Default)]
pub struct FileValidator {
    limits: ValidationLimits,
}

impl FileValidator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Checks a candidate file and returns every violation found.
    ///
    /// All checks run so the user sees the complete list at once. A
    /// missing file is the only short-circuit. An oversized file does
    /// not additionally report the lower size bounds.
    pub fn validate(&self, file: Option<&FirmwareFile>) -> ValidationResult {
        let Some(file) = file else {
            return vec![Violation::NoFile];
        };

        let mut violations = Vec::new();

        if !file.name().to_ascii_lowercase().ends_with(".bin") {
            violations.push(Violation::Extension);
        }

        let size = file.size_bytes();
        if size > self.limits.max_size_bytes {
            violations.push(Violation::TooLarge {
                max_mb: self.limits.max_size_mb(),
            });
        } else {
            if size < self.limits.min_size_bytes {
                violations.push(Violation::TooSmall {
                    min_kb: self.limits.min_size_bytes / KIB,
                });
            }
            if size == 0 {
                violations.push(Violation::Empty);
            }
        }

        if self.limits.check_image_header && size > 0 && !inspect_image_header(file.bytes()) {
            violations.push(Violation::BadHeader);
        }

        violations
    }
}

/// Returns `true` if `content` starts with a plausible ESP image header.
pub fn inspect_image_header(content: &[u8]) -> bool {
    content.len() >= MIN_HEADER_LEN && content[0] == IMAGE_MAGIC
}
