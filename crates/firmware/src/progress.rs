use std::time::{Duration, Instant};

use crate::KIB;

/// Point-in-time view of an upload's progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub bytes_sent: u64,
    pub bytes_total: u64,
    pub bytes_per_second: f64,
    /// Estimated time left, when the speed is known.
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    /// Completed share in `[0, 1]`. Zero when the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        (self.bytes_sent as f64 / self.bytes_total as f64).clamp(0.0, 1.0)
    }

    /// Completed share as a percentage.
    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }

    /// Bytes sent so far, in KB.
    pub fn kb_sent(&self) -> f64 {
        self.bytes_sent as f64 / KIB as f64
    }

    /// Human-readable status line, one decimal place for each figure.
    pub fn label(&self) -> String {
        let mut line = format!("Uploading... {:.1}% ({:.1} KB", self.percent(), self.kb_sent());
        if self.bytes_per_second > 0.0 {
            line.push_str(&format!(", {:.1} KB/s", self.bytes_per_second / KIB as f64));
            if let Some(eta) = self.eta {
                line.push_str(&format!(", {}s left", eta.as_secs_f64().ceil() as u64));
            }
        }
        line.push(')');
        line
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            samples: Vec::new(),
            max_samples: max_samples.unwrap_or(100),
            window_size: window_size.unwrap_or(Duration::from_secs(5)),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    /// Records `bytes` transferred at `now`.
    pub fn add_sample_at(&mut self, bytes: u64, now: Instant) {
        self.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(self.window_size) {
            self.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if self.samples.len() > self.max_samples {
            let excess = self.samples.len() - self.max_samples;
            self.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        // The first sample marks the start of the window; its bytes were
        // transferred before it.
        let bytes: u64 = self.samples[1..].iter().map(|s| s.bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to transfer `remaining_bytes`, if speed is known.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
