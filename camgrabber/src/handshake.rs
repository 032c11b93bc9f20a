/*!
Capture handshake state machine.

One capture is a command/response exchange with the camera:

```text
host   -> CAPTURE
device -> SIZE:<n>
device -> ----START IMAGE----
device -> <n raw JPEG bytes>
device -> ----END IMAGE----
```

Each phase runs against its own deadline so a misbehaving device can stall a
capture for at most a small multiple of the phase timeout. Lines that are not
the expected marker are discarded; the firmware prints diagnostics freely.
*/

use std::time::Duration;

use bytes::BytesMut;
use shared::protocol::{CAPTURE_COMMAND, END_MARKER, SIZE_PREFIX, START_MARKER};
use shared::{CaptureFailure, CaptureOutcome, Frame, LinkFault};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::LinkSession;
use crate::transport::LinkTransport;

/// Handshake phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No capture attempted yet
    Idle,
    /// Input cleared and capture command written
    RequestSent,
    /// Waiting for the `SIZE:` line
    AwaitingSize,
    /// Waiting for the start marker
    AwaitingStart,
    /// Reading the raw payload
    ReadingBytes { expected: usize, received: usize },
    /// Waiting for the end marker
    AwaitingEnd,
    /// Frame assembled
    Complete,
}

/// Drives the capture handshake over a transport
pub struct FrameReader {
    phase_timeout: Duration,
    chunk_size: usize,
    max_frame_bytes: usize,
    enforce_end_deadline: bool,
    phase: HandshakePhase,
    frames_completed: u64,
    failures: u64,
}

impl FrameReader {
    /// Create a reader for the given link parameters
    pub fn new(session: &LinkSession) -> Self {
        Self {
            phase_timeout: session.phase_timeout,
            chunk_size: session.chunk_size.max(1),
            max_frame_bytes: session.max_frame_bytes,
            enforce_end_deadline: session.enforce_end_deadline,
            phase: HandshakePhase::Idle,
            frames_completed: 0,
            failures: 0,
        }
    }

    /// Phase reached by the last capture (where it stopped, on failure)
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Get statistics: (frames completed, failed attempts)
    pub fn stats(&self) -> (u64, u64) {
        (self.frames_completed, self.failures)
    }

    /// Run one complete handshake.
    ///
    /// Never returns a partially filled frame: either the declared number of
    /// bytes was received and the end marker seen, or the outcome is a failure.
    pub async fn capture<T: LinkTransport>(&mut self, transport: &mut T) -> CaptureOutcome {
        let outcome = self.run_handshake(transport).await;
        match &outcome {
            Ok(frame) => {
                self.frames_completed += 1;
                debug!("📸 Frame complete: {} bytes", frame.len());
            }
            Err(failure) => {
                self.failures += 1;
                debug!("Handshake stopped in {:?}: {}", self.phase, failure);
            }
        }
        outcome
    }

    async fn run_handshake<T: LinkTransport>(&mut self, transport: &mut T) -> CaptureOutcome {
        self.phase = HandshakePhase::RequestSent;
        transport.clear_input().map_err(LinkFault::from)?;
        transport.write_all(CAPTURE_COMMAND).await.map_err(LinkFault::from)?;
        transport.flush().await.map_err(LinkFault::from)?;

        // Size and start marker share one deadline measured from the request
        let deadline = Instant::now() + self.phase_timeout;
        let mut reader = BufReader::new(&mut *transport);
        let mut line = Vec::new();

        self.phase = HandshakePhase::AwaitingSize;
        let expected = loop {
            let Some(text) = next_line(&mut reader, &mut line, Some(deadline)).await? else {
                return Err(CaptureFailure::SizeTimeout);
            };
            match text.strip_prefix(SIZE_PREFIX) {
                Some(value) => break self.parse_size(&text, value)?,
                None => debug!("Ignoring line while awaiting size: {:?}", text),
            }
        };

        self.phase = HandshakePhase::AwaitingStart;
        loop {
            let Some(text) = next_line(&mut reader, &mut line, Some(deadline)).await? else {
                return Err(CaptureFailure::StartMarkerTimeout);
            };
            if text == START_MARKER {
                break;
            }
            debug!("Ignoring line while awaiting start marker: {:?}", text);
        }

        self.phase = HandshakePhase::ReadingBytes { expected, received: 0 };
        let byte_deadline = Instant::now() + self.phase_timeout;
        let mut payload = BytesMut::with_capacity(expected);
        let mut chunk = vec![0u8; self.chunk_size.min(expected.max(1))];
        while payload.len() < expected {
            let want = (expected - payload.len()).min(chunk.len());
            match timeout_at(byte_deadline, reader.read(&mut chunk[..want])).await {
                Err(_) => {
                    warn!("⚠️ Payload stalled at {} of {} bytes", payload.len(), expected);
                    return Err(CaptureFailure::ByteTimeout {
                        expected,
                        partial: payload.freeze(),
                    });
                }
                Ok(Err(e)) => return Err(LinkFault::Io(e).into()),
                Ok(Ok(0)) => return Err(LinkFault::Closed.into()),
                Ok(Ok(n)) => {
                    payload.extend_from_slice(&chunk[..n]);
                    self.phase = HandshakePhase::ReadingBytes {
                        expected,
                        received: payload.len(),
                    };
                }
            }
        }

        self.phase = HandshakePhase::AwaitingEnd;
        let end_deadline = self
            .enforce_end_deadline
            .then(|| Instant::now() + self.phase_timeout);
        loop {
            let Some(text) = next_line(&mut reader, &mut line, end_deadline).await? else {
                return Err(CaptureFailure::EndMarkerTimeout);
            };
            if text == END_MARKER {
                break;
            }
        }

        self.phase = HandshakePhase::Complete;
        Ok(Frame::new(payload.freeze()))
    }

    fn parse_size(&self, line: &str, value: &str) -> Result<usize, LinkFault> {
        let declared: usize = value
            .trim()
            .parse()
            .map_err(|_| LinkFault::malformed_size(line))?;
        if declared > self.max_frame_bytes {
            return Err(LinkFault::Oversize {
                declared,
                limit: self.max_frame_bytes,
            });
        }
        Ok(declared)
    }
}

/// Read one line, trimmed of surrounding whitespace.
///
/// Returns `Ok(None)` when the deadline passes first. End of stream is a
/// link fault.
async fn next_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    deadline: Option<Instant>,
) -> Result<Option<String>, LinkFault> {
    buf.clear();
    let read = match deadline {
        Some(deadline) => match timeout_at(deadline, reader.read_until(b'\n', buf)).await {
            Ok(read) => read?,
            Err(_) => return Ok(None),
        },
        None => reader.read_until(b'\n', buf).await?,
    };
    if read == 0 {
        return Err(LinkFault::Closed);
    }
    Ok(Some(String::from_utf8_lossy(buf).trim().to_string()))
}
