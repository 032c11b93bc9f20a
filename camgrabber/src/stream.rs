/*!
MJPEG stream generation.

Every viewer gets its own independent stream that polls the frame cache and
emits the current frame as one multipart part per poll interval. Viewers only
read the cache, so a slow or stalled viewer never delays capture.
*/

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use shared::protocol::STREAM_BOUNDARY;
use shared::Frame;

use crate::cache::FrameCache;

/// Response content type for the multipart stream
pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Pacing of one viewer stream
#[derive(Debug, Clone, Copy)]
pub struct StreamPacing {
    /// Delay between emitted parts
    pub poll_interval: Duration,
    /// Delay between cache checks while the cache is empty
    pub idle_interval: Duration,
}

/// Encode a frame as one multipart part
pub fn encode_part(frame: &Frame) -> Bytes {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", STREAM_BOUNDARY);
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(frame.data());
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

/// Unbounded part stream for one viewer.
///
/// Idles without emitting while the cache is empty; the stream ends only
/// when the viewer drops it.
pub fn mjpeg_stream(
    cache: Arc<FrameCache>,
    pacing: StreamPacing,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold((cache, false), move |(cache, emitted)| async move {
        if emitted {
            tokio::time::sleep(pacing.poll_interval).await;
        }
        loop {
            if let Some(frame) = cache.get() {
                let part = encode_part(&frame);
                return Some((Ok(part), (cache, true)));
            }
            tokio::time::sleep(pacing.idle_interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::time::Instant;

    fn pacing() -> StreamPacing {
        StreamPacing {
            poll_interval: Duration::from_millis(40),
            idle_interval: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_part_layout() {
        let part = encode_part(&Frame::new(b"JPEG".to_vec()));
        assert_eq!(
            part.as_ref(),
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n".as_slice()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idles_until_first_frame() {
        let cache = Arc::new(FrameCache::new());
        let mut stream = Box::pin(mjpeg_stream(Arc::clone(&cache), pacing()));

        let writer = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                cache.set(Frame::new(b"late".to_vec()));
            })
        };

        let start = Instant::now();
        let part = stream.next().await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(part.ends_with(b"late\r\n"));
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeats_latest_frame_at_poll_interval() {
        let cache = Arc::new(FrameCache::new());
        cache.set(Frame::new(b"one".to_vec()));
        let mut stream = Box::pin(mjpeg_stream(Arc::clone(&cache), pacing()));

        let first = stream.next().await.unwrap().unwrap();
        let start = Instant::now();
        let repeat = stream.next().await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(first, repeat);

        cache.set(Frame::new(b"two".to_vec()));
        let next = stream.next().await.unwrap().unwrap();
        assert!(next.ends_with(b"two\r\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewers_are_independent() {
        let cache = Arc::new(FrameCache::new());
        cache.set(Frame::new(b"shared".to_vec()));

        let mut fast = Box::pin(mjpeg_stream(Arc::clone(&cache), pacing()));
        let slow = Box::pin(mjpeg_stream(Arc::clone(&cache), pacing()));

        // A viewer that never polls does not hold anything the others need
        for _ in 0..5 {
            assert!(fast.next().await.is_some());
        }
        cache.set(Frame::new(b"fresh".to_vec()));
        assert!(fast.next().await.unwrap().unwrap().ends_with(b"fresh\r\n"));
        drop(slow);
    }
}
