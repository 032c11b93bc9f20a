/*!
Capture loop.

A single task owns the camera link and repeats the capture handshake at a fixed
interval, publishing each good frame to the cache. Every N successful captures
the latest frame is classified and the result relayed to the actuator before
capturing resumes.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shared::{CaptureFailure, ClassificationResult, Frame, LinkError};
use tracing::{debug, error, info, warn};

use crate::cache::FrameCache;
use crate::config::CaptureConfig;
use crate::handshake::FrameReader;
use crate::stats::{CaptureStats, SharedStats};
use crate::supervisor::LinkSupervisor;
use crate::transport::LinkConnector;
use crate::trigger::ClassificationTrigger;

/// What a single capture cycle produced
#[derive(Debug)]
pub enum TickOutcome {
    /// A frame was stored in the cache
    Captured(Arc<Frame>),
    /// A frame was stored and classified
    Classified {
        frame: Arc<Frame>,
        result: ClassificationResult,
    },
    /// No frame; the cache is unchanged
    Failed(CaptureFailure),
}

/// Drives the capture handshake, the cache and the classification trigger
pub struct CaptureScheduler<C: LinkConnector> {
    reader: FrameReader,
    supervisor: LinkSupervisor<C>,
    cache: Arc<FrameCache>,
    trigger: Option<ClassificationTrigger>,
    stats: CaptureStats,
    classify_every: u32,
    since_trigger: u32,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl<C: LinkConnector> CaptureScheduler<C> {
    pub fn new(
        supervisor: LinkSupervisor<C>,
        cache: Arc<FrameCache>,
        trigger: Option<ClassificationTrigger>,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            reader: FrameReader::new(supervisor.session()),
            supervisor,
            cache,
            trigger,
            stats: CaptureStats::new(Duration::from_secs(config.stats_interval_seconds)),
            classify_every: config.classify_every,
            since_trigger: 0,
            interval: Duration::from_millis(config.interval_ms),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get a reference to the running flag for external control
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Statistics snapshot handle for the HTTP server
    pub fn stats_handle(&self) -> SharedStats {
        self.stats.handle()
    }

    /// Run capture cycles until the running flag is cleared.
    ///
    /// Only a link that cannot be reopened ends the loop with an error.
    pub async fn run(&mut self) -> Result<(), LinkError> {
        info!(
            "🚀 Capture loop started on {} (every {:?}, classify every {} frames)",
            self.supervisor.session().port,
            self.interval,
            self.classify_every
        );

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.tick().await {
                error!("❌ Camera link lost: {}", e);
                self.log_summary();
                return Err(e);
            }
            self.stats.maybe_report();
            tokio::time::sleep(self.interval).await;
        }

        info!("🛑 Capture loop stopped");
        self.log_summary();
        Ok(())
    }

    fn log_summary(&self) {
        self.stats.log_summary();
        let (completed, failed) = self.reader.stats();
        info!("   Handshakes: {} complete, {} failed", completed, failed);
        info!("   Link opens: {}", self.supervisor.opens());
    }

    /// One capture cycle, including classification when it is due
    pub async fn tick(&mut self) -> Result<TickOutcome, LinkError> {
        let transport = match self.supervisor.acquire().await {
            Ok(transport) => transport,
            Err(e) => {
                self.stats.set_link_connected(false);
                return Err(e);
            }
        };
        self.stats.set_link_connected(true);

        let frame = match self.reader.capture(transport).await {
            Ok(frame) => frame,
            Err(failure) => {
                self.stats.record_failure(&failure);
                if failure.is_link_fault() {
                    warn!("⚠️ Capture failed, reopening link: {}", failure);
                    self.supervisor.invalidate();
                    self.stats.set_link_connected(false);
                } else {
                    warn!("⚠️ Capture failed: {}", failure);
                }
                return Ok(TickOutcome::Failed(failure));
            }
        };

        debug!("📷 Captured frame of {} bytes", frame.len());
        self.stats.record_success(&frame);
        let frame = self.cache.set(frame);

        let Some(trigger) = &self.trigger else {
            return Ok(TickOutcome::Captured(frame));
        };
        self.since_trigger += 1;
        if self.since_trigger < self.classify_every {
            return Ok(TickOutcome::Captured(frame));
        }
        self.since_trigger = 0;

        let result = trigger.classify(&frame).await;
        self.stats.record_classification(&result);

        let transport = self.supervisor.acquire().await?;
        if let Err(fault) = trigger.dispatch(&result, transport).await {
            warn!("⚠️ Could not reach actuator, reopening link: {}", fault);
            self.stats.record_failure(&CaptureFailure::Link(fault));
            self.supervisor.invalidate();
            self.stats.set_link_connected(false);
        }

        Ok(TickOutcome::Classified { frame, result })
    }
}
