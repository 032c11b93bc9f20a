/*!
Capture statistics.

The capture task owns a [`CaptureStats`] and publishes a [`StatsSnapshot`]
after every update so the HTTP status endpoint can read it without touching
the capture loop.
*/

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use shared::{CaptureFailure, ClassificationResult, Frame};
use tokio::time::Instant;
use tracing::info;

/// Snapshot handle shared with the HTTP server
pub type SharedStats = Arc<RwLock<StatsSnapshot>>;

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Point-in-time view of the capture loop
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub bytes_captured: u64,
    /// Successful captures during the last second
    pub frames_per_second: usize,
    pub consecutive_failures: u64,
    pub failures: BTreeMap<&'static str, u64>,
    pub last_frame_bytes: usize,
    pub last_frame_at: Option<DateTime<Local>>,
    pub classifications: u64,
    pub last_classification: Option<ClassificationResult>,
    pub link_connected: bool,
    pub uptime_seconds: u64,
}

impl StatsSnapshot {
    pub fn total_failures(&self) -> u64 {
        self.failures.values().sum()
    }
}

/// Rolling capture counters owned by the capture task
pub struct CaptureStats {
    started: Instant,
    recent: VecDeque<Instant>,
    current: StatsSnapshot,
    shared: SharedStats,
    report_interval: Duration,
    last_report: Instant,
}

impl CaptureStats {
    pub fn new(report_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            recent: VecDeque::new(),
            current: StatsSnapshot::default(),
            shared: Arc::new(RwLock::new(StatsSnapshot::default())),
            report_interval,
            last_report: now,
        }
    }

    /// Handle to the published snapshot
    pub fn handle(&self) -> SharedStats {
        Arc::clone(&self.shared)
    }

    pub fn snapshot(&self) -> &StatsSnapshot {
        &self.current
    }

    pub fn record_success(&mut self, frame: &Frame) {
        let now = Instant::now();
        self.recent.push_back(now);
        self.current.frames_captured += 1;
        self.current.bytes_captured += frame.len() as u64;
        self.current.consecutive_failures = 0;
        self.current.last_frame_bytes = frame.len();
        self.current.last_frame_at = Some(frame.captured_at());
        self.publish(now);
    }

    pub fn record_failure(&mut self, failure: &CaptureFailure) {
        *self.current.failures.entry(failure.kind()).or_insert(0) += 1;
        self.current.consecutive_failures += 1;
        self.publish(Instant::now());
    }

    pub fn record_classification(&mut self, result: &ClassificationResult) {
        self.current.classifications += 1;
        self.current.last_classification = Some(result.clone());
        self.publish(Instant::now());
    }

    pub fn set_link_connected(&mut self, connected: bool) {
        if self.current.link_connected != connected {
            self.current.link_connected = connected;
            self.publish(Instant::now());
        }
    }

    /// Log a statistics line if the report interval has elapsed
    pub fn maybe_report(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_report) < self.report_interval {
            return;
        }
        self.last_report = now;
        self.trim(now);

        let s = &self.current;
        info!(
            "📊 Captured {} frames, {:.1} MB, {} fps, {} failures ({} consecutive), {} classifications",
            s.frames_captured,
            s.bytes_captured as f64 / 1_000_000.0,
            s.frames_per_second,
            s.total_failures(),
            s.consecutive_failures,
            s.classifications
        );
    }

    /// Final summary logged when the capture loop stops
    pub fn log_summary(&self) {
        let s = &self.current;
        info!("📈 Capture final stats:");
        info!("   Frames: {}", s.frames_captured);
        info!("   Bytes: {:.1} MB", s.bytes_captured as f64 / 1_000_000.0);
        for (kind, count) in &s.failures {
            info!("   {}: {}", kind, count);
        }
        info!("   Classifications: {}", s.classifications);
        info!("   Duration: {:.1}s", self.started.elapsed().as_secs_f64());
    }

    fn trim(&mut self, now: Instant) {
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) > RATE_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.current.frames_per_second = self.recent.len();
        self.current.uptime_seconds = now.duration_since(self.started).as_secs();
    }

    fn publish(&mut self, now: Instant) {
        self.trim(now);
        *self.shared.write() = self.current.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use shared::LinkFault;

    #[tokio::test(start_paused = true)]
    async fn test_rate_window_drops_old_frames() {
        let mut stats = CaptureStats::new(Duration::from_secs(10));
        for _ in 0..5 {
            stats.record_success(&Frame::new(vec![0u8; 100]));
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert_eq!(stats.snapshot().frames_per_second, 5);

        tokio::time::advance(Duration::from_secs(2)).await;
        stats.record_success(&Frame::new(vec![0u8; 100]));
        assert_eq!(stats.snapshot().frames_per_second, 1);
        assert_eq!(stats.snapshot().frames_captured, 6);
        assert_eq!(stats.snapshot().bytes_captured, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_counted_by_kind() {
        let mut stats = CaptureStats::new(Duration::from_secs(10));
        stats.record_failure(&CaptureFailure::SizeTimeout);
        stats.record_failure(&CaptureFailure::SizeTimeout);
        stats.record_failure(&CaptureFailure::ByteTimeout {
            expected: 10,
            partial: Bytes::new(),
        });
        stats.record_failure(&CaptureFailure::Link(LinkFault::Closed));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failures["size_timeout"], 2);
        assert_eq!(snapshot.failures["byte_timeout"], 1);
        assert_eq!(snapshot.failures["link_error"], 1);
        assert_eq!(snapshot.consecutive_failures, 4);
        assert_eq!(snapshot.total_failures(), 4);

        stats.record_success(&Frame::new(vec![1u8]));
        assert_eq!(stats.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_published_snapshot_tracks_updates() {
        let mut stats = CaptureStats::new(Duration::from_secs(10));
        let handle = stats.handle();

        stats.set_link_connected(true);
        stats.record_success(&Frame::new(vec![0u8; 42]));
        stats.record_classification(&ClassificationResult::from_text("3 paper", Local::now()));

        let published = handle.read();
        assert!(published.link_connected);
        assert_eq!(published.last_frame_bytes, 42);
        assert_eq!(published.classifications, 1);
        assert_eq!(
            published.last_classification.as_ref().map(|c| c.material.code()),
            Some(3)
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut snapshot = StatsSnapshot::default();
        snapshot.failures.insert("size_timeout", 3);
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["failures"]["size_timeout"], 3);
        assert!(value["last_classification"].is_null());
    }
}
