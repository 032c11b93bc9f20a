/*!
Single-slot cache holding the most recent frame.

One writer (the capture task) and any number of readers (stream viewers, the
classifier endpoint). The lock guards only the pointer swap or copy; frame
bytes are never copied or sent while it is held.
*/

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use shared::Frame;

/// Latest-frame holder shared between the capture task and viewers
#[derive(Debug, Default)]
pub struct FrameCache {
    slot: Mutex<Option<Arc<Frame>>>,
    generation: AtomicU64,
}

impl FrameCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached frame and return the shared handle to it
    pub fn set(&self, frame: Frame) -> Arc<Frame> {
        let frame = Arc::new(frame);
        let previous = {
            let mut slot = self.slot.lock();
            self.generation.fetch_add(1, Ordering::Release);
            slot.replace(Arc::clone(&frame))
        };
        // Release the old frame outside the critical section
        drop(previous);
        frame
    }

    /// Current frame, or `None` if nothing has been captured yet
    pub fn get(&self) -> Option<Arc<Frame>> {
        self.slot.lock().clone()
    }

    /// Number of frames stored so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_empty_until_first_set() {
        let cache = FrameCache::new();
        assert!(cache.get().is_none());
        assert_eq!(cache.generation(), 0);
    }

    #[test]
    fn test_get_returns_last_set() {
        let cache = FrameCache::new();
        cache.set(Frame::new(vec![1u8; 10]));
        let stored = cache.set(Frame::new(vec![2u8; 20]));

        let current = cache.get().unwrap();
        assert!(Arc::ptr_eq(&stored, &current));
        assert_eq!(current.len(), 20);
        assert_eq!(cache.generation(), 2);
    }

    #[test]
    fn test_reader_keeps_replaced_frame_alive() {
        let cache = FrameCache::new();
        cache.set(Frame::new(vec![9u8; 5]));
        let held = cache.get().unwrap();

        cache.set(Frame::new(Vec::new()));
        assert_eq!(held.data().as_ref(), &[9u8; 5]);
        assert!(cache.get().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_frames() {
        let cache = Arc::new(FrameCache::new());

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 1..=2000usize {
                    let len = i % 300;
                    cache.set(Frame::new(vec![(len % 256) as u8; len]));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..5000 {
                        if let Some(frame) = cache.get() {
                            let expected = (frame.len() % 256) as u8;
                            assert!(frame.data().iter().all(|&b| b == expected));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cache.generation(), 2000);
    }
}
