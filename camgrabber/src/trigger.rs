/*!
Classification trigger.

Sends a frame to the classifier, decodes the answer into a material code and
relays non-empty results to the actuator over the camera link, then holds the
capture loop for a cooldown so the actuator can finish before the next frame.
*/

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use shared::{ClassificationResult, Frame, LinkFault};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::config::CaptureConfig;
use crate::transport::LinkTransport;

/// Classifier invocation plus actuator relay
#[derive(Clone)]
pub struct ClassificationTrigger {
    classifier: Arc<dyn Classifier>,
    prompt: Arc<str>,
    cooldown: Duration,
    empty_cooldown: Duration,
}

impl ClassificationTrigger {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        prompt: impl Into<Arc<str>>,
        cooldown: Duration,
        empty_cooldown: Duration,
    ) -> Self {
        Self {
            classifier,
            prompt: prompt.into(),
            cooldown,
            empty_cooldown,
        }
    }

    /// Build a trigger using the cooldowns from the capture configuration
    pub fn from_config(
        classifier: Arc<dyn Classifier>,
        prompt: &str,
        capture: &CaptureConfig,
    ) -> Self {
        Self::new(
            classifier,
            prompt,
            Duration::from_millis(capture.cooldown_ms),
            Duration::from_millis(capture.empty_cooldown_ms),
        )
    }

    /// Classify a frame. Classifier failures are logged and decoded as empty.
    pub async fn classify(&self, frame: &Frame) -> ClassificationResult {
        let requested_at = Local::now();
        let stamp = requested_at.format("%Y-%m-%d %H:%M:%S");
        let prompt = format!("{} The request was sent at: {}.", self.prompt, stamp);

        info!("⏱ Classification requested at {} ({} bytes)", stamp, frame.len());

        match self.classifier.classify(frame.data().clone(), &prompt).await {
            Ok(text) => {
                let result = ClassificationResult::from_text(&text, requested_at);
                info!(
                    "📥 Classifier answered {:?} -> material {}",
                    text.trim(),
                    result.material
                );
                result
            }
            Err(e) => {
                warn!("⚠️ Classification failed, treating as empty: {}", e);
                ClassificationResult::empty(requested_at)
            }
        }
    }

    /// Relay a result to the actuator and wait out the cooldown.
    ///
    /// Empty results send nothing and only wait the short cooldown. A write
    /// failure is returned immediately so the link can be reopened.
    pub async fn dispatch<T: LinkTransport>(
        &self,
        result: &ClassificationResult,
        transport: &mut T,
    ) -> Result<(), LinkFault> {
        match result.material.actuator_command() {
            Some(command) => {
                transport.write_all(command.as_bytes()).await?;
                transport.flush().await?;
                info!("➡️ Material {} sent to actuator", result.material);
                info!("⏱ Waiting {:?} for the actuator", self.cooldown);
                tokio::time::sleep(self.cooldown).await;
            }
            None => {
                debug!("Nothing to sort, waiting {:?}", self.empty_cooldown);
                tokio::time::sleep(self.empty_cooldown).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::StaticClassifier;
    use crate::transport::testing::mock_pair;
    use shared::MaterialCode;
    use tokio::io::AsyncReadExt;
    use tokio::time::Instant;

    fn trigger(classifier: StaticClassifier) -> (ClassificationTrigger, Arc<StaticClassifier>) {
        let classifier = Arc::new(classifier);
        let trigger = ClassificationTrigger::new(
            classifier.clone(),
            "classify",
            Duration::from_secs(10),
            Duration::from_secs(1),
        );
        (trigger, classifier)
    }

    #[tokio::test]
    async fn test_classify_decodes_material() {
        let (trigger, classifier) = trigger(StaticClassifier::answering("2 - wine bottle"));
        let result = trigger.classify(&Frame::new(b"jpeg".to_vec())).await;

        assert_eq!(result.material, MaterialCode::Glass);
        assert_eq!(result.description, "wine bottle");
        assert_eq!(classifier.calls(), 1);
    }

    #[tokio::test]
    async fn test_classifier_failure_maps_to_empty() {
        let (trigger, _) = trigger(StaticClassifier::failing());
        let result = trigger.classify(&Frame::new(b"jpeg".to_vec())).await;

        assert_eq!(result.material, MaterialCode::Empty);
        assert!(result.raw_text.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_sends_command_and_waits_cooldown() {
        let (trigger, _) = trigger(StaticClassifier::answering("4"));
        let (mut link, mut device) = mock_pair();
        let result = ClassificationResult::from_text("4 plastic cup", Local::now());

        let start = Instant::now();
        trigger.dispatch(&result, &mut link).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));

        drop(link);
        let mut sent = String::new();
        device.read_to_string(&mut sent).await.unwrap();
        assert_eq!(sent, "4\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_empty_sends_nothing() {
        let (trigger, _) = trigger(StaticClassifier::answering("5"));
        let (mut link, mut device) = mock_pair();
        let result = ClassificationResult::from_text("5", Local::now());

        let start = Instant::now();
        trigger.dispatch(&result, &mut link).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(1));
        assert!(waited < Duration::from_secs(10));

        drop(link);
        let mut sent = Vec::new();
        device.read_to_end(&mut sent).await.unwrap();
        assert!(sent.is_empty());
    }
}
