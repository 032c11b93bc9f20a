/*!
# Shared Types and Utilities

This crate contains the types shared between the camera link components:
the captured image, the material classification vocabulary and the failure
taxonomy of the capture handshake.

## Core Types

- [`Frame`] - One complete JPEG image pulled from the camera
- [`MaterialCode`] - Material classes understood by the sorting actuator
- [`ClassificationResult`] - Decoded answer of the image classifier
- [`CaptureFailure`] - Why a capture attempt did not produce a frame

## Modules

- [`frame`] - Frame data structure
- [`material`] - Material codes and classifier text scanning
- [`error`] - Capture and link error types
*/

pub mod error;
pub mod frame;
pub mod material;

// Re-export commonly used types
pub use error::{CaptureFailure, CaptureOutcome, LinkError, LinkFault};
pub use frame::Frame;
pub use material::{ClassificationResult, MaterialCode};

/// Device link protocol constants
pub mod protocol {
    /// Command line that asks the camera for one frame
    pub const CAPTURE_COMMAND: &[u8] = b"CAPTURE\n";

    /// Prefix of the line announcing the payload length
    pub const SIZE_PREFIX: &str = "SIZE:";

    /// Line emitted right before the raw JPEG bytes
    pub const START_MARKER: &str = "----START IMAGE----";

    /// Line emitted after the raw JPEG bytes
    pub const END_MARKER: &str = "----END IMAGE----";

    /// Multipart boundary used by the MJPEG stream
    pub const STREAM_BOUNDARY: &str = "frame";
}
