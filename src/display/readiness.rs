//! Compositor readiness detection
//!
//! The X server has no startup notification, so readiness is inferred from
//! its log settling: when the last line stops changing for long enough, the
//! server is taken as up. A wall-clock timeout bounds the wait either way.
//!
//! [`ReadinessDetector`] is pure (no clock, no I/O) so the policy can be
//! tested and benchmarked without sleeping; the supervisor feeds it
//! observations from [`tail_line`] on a fixed poll interval.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

/// Interval between log observations.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Consecutive identical observations that count as quiescence.
pub const QUIESCENCE_THRESHOLD: u32 = 10;

/// Wall-clock bound on the whole wait.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bytes read from the end of the log per observation.
const TAIL_WINDOW: u64 = 8192;

/// Log-quiescence detector
#[derive(Debug)]
pub struct ReadinessDetector {
    threshold: u32,
    timeout: Duration,
    last: Option<String>,
    streak: u32,
}

impl ReadinessDetector {
    /// Create a detector with explicit parameters.
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            timeout,
            last: None,
            streak: 0,
        }
    }

    /// Feed one observation; returns true once the display is ready.
    ///
    /// The streak counts the current run of identical lines, starting at 1
    /// for the first sighting of a line; a differing line starts a new run.
    /// `None` (log missing or empty) leaves the run untouched and only lets
    /// the timeout advance.
    pub fn observe(&mut self, tail: Option<&str>, elapsed: Duration) -> bool {
        if elapsed >= self.timeout {
            return true;
        }

        if let Some(line) = tail {
            if self.last.as_deref() == Some(line) {
                self.streak += 1;
            } else {
                self.last = Some(line.to_string());
                self.streak = 1;
            }
        }

        self.streak >= self.threshold
    }

    /// Length of the current identical-line run.
    pub fn streak(&self) -> u32 {
        self.streak
    }
}

impl Default for ReadinessDetector {
    fn default() -> Self {
        Self::new(QUIESCENCE_THRESHOLD, STARTUP_TIMEOUT)
    }
}

/// Last non-empty line of a file, reading at most the final 8 KiB.
///
/// Returns `None` when the file is missing, unreadable, or has no content
/// yet; the caller treats that as a skipped observation.
pub fn tail_line(path: &Path) -> Option<String> {
    let mut file = File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    if len == 0 {
        return None;
    }

    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start)).ok()?;
    let mut bytes = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut bytes).ok()?;

    let text = String::from_utf8_lossy(&bytes);
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(str::to_string)
}
