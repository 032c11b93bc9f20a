/*!
Frame data structure.

A frame is one JPEG image received from the camera in a single capture
handshake. Frames are immutable once assembled and are shared by reference
between the cache, the stream viewers and the classifier.
*/

use bytes::Bytes;
use chrono::{DateTime, Local};

/// Complete JPEG image with its capture timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    captured_at: DateTime<Local>,
}

impl Frame {
    /// Create a frame stamped with the current local time
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_timestamp(data, Local::now())
    }

    /// Create a frame with an explicit capture timestamp
    pub fn with_timestamp(data: impl Into<Bytes>, captured_at: DateTime<Local>) -> Self {
        Self {
            data: data.into(),
            captured_at,
        }
    }

    /// Encoded image bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Byte length of the encoded image
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for a zero-length frame (`SIZE:0`)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// When the handshake for this frame completed
    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }
}
