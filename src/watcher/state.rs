// Per-file watch state
//
// DETECTED -> STABLE -> DECODING -> FLUSHED | QUARANTINED
//
// A truncated decode sends the file back to DETECTED so it has to look
// stable again before the next attempt.

use std::time::{Instant, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStage {
    Detected,
    Stable,
    Decoding,
    Flushed,
    Quarantined,
}

impl std::fmt::Display for FileStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileStage::Detected => "detected",
            FileStage::Stable => "stable",
            FileStage::Decoding => "decoding",
            FileStage::Flushed => "flushed",
            FileStage::Quarantined => "quarantined",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct WatchState {
    pub size: u64,
    pub mtime: SystemTime,
    /// Consecutive scans with unchanged size and mtime
    pub stable_scans: u32,
    pub stage: FileStage,
    /// Consecutive truncated attempts without the file changing
    pub truncation_retries: u32,
    /// File length at the last truncated attempt
    pub truncated_len: Option<u64>,
    /// Consecutive failed write attempts
    pub write_attempts: u32,
    pub next_attempt_at: Option<Instant>,
}

impl WatchState {
    pub fn new(size: u64, mtime: SystemTime) -> Self {
        Self {
            size,
            mtime,
            stable_scans: 0,
            stage: FileStage::Detected,
            truncation_retries: 0,
            truncated_len: None,
            write_attempts: 0,
            next_attempt_at: None,
        }
    }

    /// Record one scan. Returns true when this scan made the file stable.
    pub fn observe(&mut self, size: u64, mtime: SystemTime, required_scans: u32) -> bool {
        if size != self.size || mtime != self.mtime {
            self.size = size;
            self.mtime = mtime;
            self.stable_scans = 0;
            if self.stage == FileStage::Stable {
                self.stage = FileStage::Detected;
            }
            return false;
        }

        if self.stage != FileStage::Detected {
            return false;
        }

        self.stable_scans += 1;
        if self.stable_scans >= required_scans {
            self.stage = FileStage::Stable;
            return true;
        }
        false
    }

    /// Stable and not waiting out a write backoff.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.stage == FileStage::Stable && self.next_attempt_at.map_or(true, |at| now >= at)
    }

    /// Note a truncated attempt at `file_len`. Returns the consecutive count.
    pub fn record_truncation(&mut self, file_len: u64) -> u32 {
        if self.truncated_len == Some(file_len) {
            self.truncation_retries += 1;
        } else {
            self.truncation_retries = 1;
            self.truncated_len = Some(file_len);
        }
        self.stage = FileStage::Detected;
        self.stable_scans = 0;
        self.write_attempts = 0;
        self.next_attempt_at = None;
        self.truncation_retries
    }

    /// Note a failed write attempt. Returns the consecutive count.
    pub fn record_write_failure(&mut self, retry_at: Instant) -> u32 {
        self.write_attempts += 1;
        self.stage = FileStage::Stable;
        self.next_attempt_at = Some(retry_at);
        self.write_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_stable_after_required_unchanged_scans() {
        let mut state = WatchState::new(100, t(1));
        assert!(!state.observe(100, t(1), 2));
        assert_eq!(state.stage, FileStage::Detected);
        assert!(state.observe(100, t(1), 2));
        assert_eq!(state.stage, FileStage::Stable);
        // Further scans don't report the transition again
        assert!(!state.observe(100, t(1), 2));
    }

    #[test]
    fn test_growing_file_never_stable() {
        let mut state = WatchState::new(0, t(1));
        for i in 1..20 {
            assert!(!state.observe(i * 76, t(1 + i), 1));
            assert_eq!(state.stage, FileStage::Detected);
        }
    }

    #[test]
    fn test_change_resets_stable_file() {
        let mut state = WatchState::new(100, t(1));
        assert!(state.observe(100, t(1), 1));
        assert!(!state.observe(176, t(2), 1));
        assert_eq!(state.stage, FileStage::Detected);
        assert_eq!(state.stable_scans, 0);
    }

    #[test]
    fn test_mtime_change_alone_resets() {
        let mut state = WatchState::new(100, t(1));
        assert!(!state.observe(100, t(2), 1));
        assert_eq!(state.stable_scans, 0);
    }

    #[test]
    fn test_truncation_counter() {
        let mut state = WatchState::new(100, t(1));
        assert_eq!(state.record_truncation(100), 1);
        assert_eq!(state.stage, FileStage::Detected);
        assert_eq!(state.record_truncation(100), 2);
        // File grew: counter restarts
        assert_eq!(state.record_truncation(150), 1);
    }

    #[test]
    fn test_write_backoff_gates_readiness() {
        let now = Instant::now();
        let mut state = WatchState::new(100, t(1));
        state.stage = FileStage::Stable;
        assert!(state.is_ready(now));

        assert_eq!(state.record_write_failure(now + Duration::from_secs(5)), 1);
        assert!(!state.is_ready(now));
        assert!(state.is_ready(now + Duration::from_secs(5)));
    }
}
