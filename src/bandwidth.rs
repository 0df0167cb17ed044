//! Sliding-window bandwidth estimation
//!
//! Keeps `(timestamp, byte count)` samples within a trailing window and
//! aggregates them into bits per second. A separate monotonic byte total
//! survives window eviction.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default trailing window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Sliding-window throughput estimator
#[derive(Debug)]
pub struct BandwidthMonitor {
    samples: VecDeque<(Instant, usize)>,
    window: Duration,
    total_bytes: u64,
}

impl BandwidthMonitor {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            total_bytes: 0,
        }
    }

    /// Record transferred bytes at the current instant
    pub fn record(&mut self, bytes: usize) {
        self.record_at(Instant::now(), bytes);
    }

    fn record_at(&mut self, now: Instant, bytes: usize) {
        self.samples.push_back((now, bytes));
        self.total_bytes += bytes as u64;

        while let Some(&(ts, _)) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current throughput in bits per second over the retained samples.
    /// Returns 0 with fewer than two samples or zero elapsed time.
    pub fn current_bandwidth_bps(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }

        let first = self.samples.front().expect("non-empty").0;
        let last = self.samples.back().expect("non-empty").0;
        let elapsed = last.duration_since(first).as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }

        let window_bytes: usize = self.samples.iter().map(|&(_, b)| b).sum();
        (window_bytes as f64 * 8.0) / elapsed
    }

    /// Bytes transferred since construction or the last reset
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Clear the window and the running total (session START)
    pub fn reset(&mut self) {
        self.samples.clear();
        self.total_bytes = 0;
    }

    /// Human-readable current bandwidth ("1.25 Mbps")
    pub fn formatted_bandwidth(&self) -> String {
        format_bandwidth(self.current_bandwidth_bps())
    }

    /// Human-readable running total ("3.20 MB")
    pub fn formatted_total(&self) -> String {
        format_bytes(self.total_bytes)
    }
}

impl Default for BandwidthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a bits-per-second figure
pub fn format_bandwidth(bps: f64) -> String {
    if bps < 1_000.0 {
        format!("{:.0} bps", bps)
    } else if bps < 1_000_000.0 {
        format!("{:.2} Kbps", bps / 1_000.0)
    } else {
        format!("{:.2} Mbps", bps / 1_000_000.0)
    }
}

/// Format a byte count
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < MB {
        format!("{:.2} KB", b / KB)
    } else if b < GB {
        format!("{:.2} MB", b / MB)
    } else {
        format!("{:.2} GB", b / GB)
    }
}
