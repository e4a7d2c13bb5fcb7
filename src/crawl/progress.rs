// src/crawl/progress.rs
// Progress labels and ETA bookkeeping shared by workers and the aggregator.

use std::time::Duration;

/// Formats "[current/total - pct%]"
pub fn format_progress(current: usize, total: usize) -> String {
    let percentage = if total == 0 {
        100.0
    } else {
        current as f64 / total as f64 * 100.0
    };
    format!("[{}/{} - {:.1}%]", current, total, percentage)
}

/// Running average of per-actor durations, used for the ETA
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    total: usize,
    processed: usize,
    total_duration: Duration,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.processed += 1;
        self.total_duration += duration;
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed)
    }

    pub fn average(&self) -> Duration {
        match u32::try_from(self.processed) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
        }
    }

    /// remaining tasks × average duration
    pub fn eta(&self) -> Duration {
        self.average().mul_f64(self.remaining() as f64)
    }

    pub fn label(&self) -> String {
        format_progress(self.processed, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_progress() {
        assert_eq!(format_progress(1, 4), "[1/4 - 25.0%]");
        assert_eq!(format_progress(0, 0), "[0/0 - 100.0%]");
    }

    #[test]
    fn test_eta_uses_average() {
        let mut tracker = ProgressTracker::new(5);
        tracker.record(Duration::from_secs(2));
        tracker.record(Duration::from_secs(4));

        assert_eq!(tracker.average(), Duration::from_secs(3));
        assert_eq!(tracker.remaining(), 3);
        assert_eq!(tracker.eta(), Duration::from_secs(9));
        assert_eq!(tracker.label(), "[2/5 - 40.0%]");
    }

    #[test]
    fn test_empty_tracker_has_no_eta() {
        let tracker = ProgressTracker::new(3);
        assert_eq!(tracker.eta(), Duration::ZERO);
    }
}
