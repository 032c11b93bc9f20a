/*!
Byte-stream transports to the camera.

A transport is any async byte stream that can also discard pending input.
Connectors open a fresh transport for a [`LinkSession`]; the supervisor calls
them again after a link fault.
*/

use std::io;

use async_trait::async_trait;
use shared::LinkError;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::config::LinkSession;

/// Open byte stream to the camera device
pub trait LinkTransport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Discard any input the device sent before the next command
    fn clear_input(&mut self) -> io::Result<()>;
}

impl LinkTransport for SerialStream {
    fn clear_input(&mut self) -> io::Result<()> {
        tokio_serial::SerialPort::clear(self, tokio_serial::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

impl LinkTransport for TcpStream {
    fn clear_input(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 1024];
        let mut discarded = 0usize;
        loop {
            match self.try_read(&mut scratch) {
                // EOF is left for the handshake reader to report
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        if discarded > 0 {
            debug!("Discarded {} stale bytes from TCP link", discarded);
        }
        Ok(())
    }
}

/// Opens transports for a link session
#[async_trait]
pub trait LinkConnector: Send + Sync {
    type Transport: LinkTransport;

    /// Open a new transport; every call starts from a clean protocol state
    async fn open(&self, session: &LinkSession) -> Result<Self::Transport, LinkError>;
}

/// Serial (or Bluetooth SPP) port, 8N1 without flow control
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialConnector;

#[async_trait]
impl LinkConnector for SerialConnector {
    type Transport = SerialStream;

    async fn open(&self, session: &LinkSession) -> Result<SerialStream, LinkError> {
        info!("🔌 Opening serial port {} at {} baud", session.port, session.baud_rate);

        let port = tokio_serial::new(&session.port, session.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| LinkError::Open {
                port: session.port.clone(),
                source: e.into(),
            })?;

        info!("✅ Serial port {} open", session.port);
        Ok(port)
    }
}

/// TCP bridge to a wireless camera (`host:port`)
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl LinkConnector for TcpConnector {
    type Transport = TcpStream;

    async fn open(&self, session: &LinkSession) -> Result<TcpStream, LinkError> {
        info!("🔌 Connecting to camera bridge at {}", session.port);

        let open_err = |source: io::Error| LinkError::Open {
            port: session.port.clone(),
            source,
        };

        let stream = TcpStream::connect(&session.port).await.map_err(open_err)?;
        stream.set_nodelay(true).map_err(open_err)?;

        // Detect a silently dropped wireless peer
        let sock_ref = socket2::SockRef::from(&stream);
        sock_ref.set_keepalive(true).map_err(open_err)?;

        info!("✅ Connected to {}", session.port);
        Ok(stream)
    }
}

/// In-memory device link for tests
#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::task::{Context, Poll};

    use parking_lot::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadBuf};
    use tokio::task::JoinHandle;

    use super::*;

    /// Host end of a simulated link
    #[derive(Debug)]
    pub struct MockLink {
        inner: DuplexStream,
    }

    /// Create a host transport and the device end it talks to
    pub fn mock_pair() -> (MockLink, DuplexStream) {
        let (host, device) = tokio::io::duplex(256 * 1024);
        (MockLink { inner: host }, device)
    }

    impl AsyncRead for MockLink {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for MockLink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.inner).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.inner).poll_shutdown(cx)
        }
    }

    impl LinkTransport for MockLink {
        fn clear_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Bytes a well-behaved camera sends for one frame
    pub fn frame_response(payload: &[u8]) -> Vec<u8> {
        let mut out = format!("SIZE:{}\n----START IMAGE----\n", payload.len()).into_bytes();
        out.extend_from_slice(payload);
        out.extend_from_slice(b"\n----END IMAGE----\n");
        out
    }

    /// Simulated camera answering every `CAPTURE` with `payload`.
    ///
    /// Any other line written by the host is recorded and returned once the
    /// host end is dropped.
    pub fn spawn_camera(device: DuplexStream, payload: Vec<u8>) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(device);
            let mut reader = BufReader::new(read_half);
            let mut received = Vec::new();
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                if line.trim() == "CAPTURE" {
                    if write_half.write_all(&frame_response(&payload)).await.is_err() {
                        break;
                    }
                } else {
                    received.push(line.clone());
                }
            }
            received
        })
    }

    /// Connector that refuses the first `fail_first` opens, then hands out
    /// prepared links in order
    pub struct ScriptedConnector {
        fail_first: u32,
        attempts: AtomicU32,
        links: Mutex<VecDeque<MockLink>>,
    }

    impl ScriptedConnector {
        pub fn new(fail_first: u32, links: Vec<MockLink>) -> Self {
            Self {
                fail_first,
                attempts: AtomicU32::new(0),
                links: Mutex::new(links.into()),
            }
        }

        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LinkConnector for ScriptedConnector {
        type Transport = MockLink;

        async fn open(&self, session: &LinkSession) -> Result<MockLink, LinkError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let refused = || LinkError::Open {
                port: session.port.clone(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "device not ready"),
            };
            if attempt <= self.fail_first {
                return Err(refused());
            }
            self.links.lock().pop_front().ok_or_else(refused)
        }
    }
}
