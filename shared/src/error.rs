/*!
Error types for the camera link.

Capture failures are split by handshake phase so the capture loop can tell a
retryable protocol stall from a broken link that needs reopening.
*/

use bytes::Bytes;
use thiserror::Error;

use crate::frame::Frame;

/// Result of one capture handshake
pub type CaptureOutcome = std::result::Result<Frame, CaptureFailure>;

/// Why a capture attempt did not produce a frame
#[derive(Error, Debug)]
pub enum CaptureFailure {
    /// No `SIZE:` line before the handshake deadline
    #[error("timed out waiting for SIZE line")]
    SizeTimeout,

    /// No start marker before the handshake deadline
    #[error("timed out waiting for start marker")]
    StartMarkerTimeout,

    /// Payload stalled before the declared length was reached.
    ///
    /// `partial` is kept for diagnostics only and is never published as a frame.
    #[error("timed out reading image bytes ({} of {expected} received)", .partial.len())]
    ByteTimeout { expected: usize, partial: Bytes },

    /// Payload complete but no end marker before the deadline
    #[error("timed out waiting for end marker")]
    EndMarkerTimeout,

    /// The link itself failed; the transport must be reopened
    #[error("link error: {0}")]
    Link(#[from] LinkFault),
}

impl CaptureFailure {
    /// True when the failure requires reopening the transport
    pub fn is_link_fault(&self) -> bool {
        matches!(self, Self::Link(_))
    }

    /// Short stable name used in logs and statistics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SizeTimeout => "size_timeout",
            Self::StartMarkerTimeout => "start_marker_timeout",
            Self::ByteTimeout { .. } => "byte_timeout",
            Self::EndMarkerTimeout => "end_marker_timeout",
            Self::Link(_) => "link_error",
        }
    }
}

/// Link-level faults surfaced during a handshake
#[derive(Error, Debug)]
pub enum LinkFault {
    /// I/O failure on the underlying transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport reported end of stream
    #[error("link closed by peer")]
    Closed,

    /// `SIZE:` line whose length does not parse as a decimal number
    #[error("malformed size line: {0:?}")]
    MalformedSize(String),

    /// Declared length above the configured maximum
    #[error("declared frame size {declared} exceeds limit of {limit} bytes")]
    Oversize { declared: usize, limit: usize },
}

impl LinkFault {
    /// Create a malformed size error from the offending line
    pub fn malformed_size(line: impl Into<String>) -> Self {
        Self::MalformedSize(line.into())
    }
}

/// Errors opening or keeping the link available
#[derive(Error, Debug)]
pub enum LinkError {
    /// A single open attempt failed
    #[error("failed to open link {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },

    /// Every allowed open attempt failed; escalated out of the capture task
    #[error("link {port} unavailable after {attempts} attempts")]
    Unavailable { port: String, attempts: u32 },
}
