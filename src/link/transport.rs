//! # Link Transports
//!
//! Byte-level access to the vehicle link over UDP, TCP or a serial port.
//!
//! This module handles:
//! - Opening endpoints (serial ports at the configured baud, 8N1)
//! - Non-blocking receive for the per-cycle message drain
//! - Awaited receive for the connection handshake
//! - Best-effort transmit of the GCS heartbeat

use async_trait::async_trait;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

use super::endpoint::{EndpointKind, LinkEndpoint};
use crate::error::{MonitorError, Result};

/// Trait for link I/O operations
#[async_trait]
pub trait LinkTransport: Send {
    /// Receive whatever is already queued, without waiting
    ///
    /// Returns `Ok(None)` when nothing is available right now.
    async fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;

    /// Wait for the next chunk of bytes
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send bytes to the vehicle
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Tear the transport down
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// Datagram transport bound to a local address
///
/// The peer is learned from the first datagram received; until then sends
/// are dropped.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<std::net::SocketAddr>,
}

impl UdpTransport {
    pub async fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| MonitorError::Link(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(Self { socket, peer: None })
    }
}

#[async_trait]
impl LinkTransport for UdpTransport {
    async fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.try_recv_from(buf) {
            Ok((n, peer)) => {
                self.peer = Some(peer);
                Ok(Some(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (n, peer) = self.socket.recv_from(buf).await?;
        self.peer = Some(peer);
        Ok(n)
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match self.peer {
            Some(peer) => {
                self.socket.send_to(data, peer).await?;
                Ok(())
            }
            None => {
                debug!("No UDP peer known yet, dropping {} bytes", data.len());
                Ok(())
            }
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.peer = None;
        Ok(())
    }
}

/// Byte-stream transport (TCP socket or serial port)
pub struct StreamTransport<S> {
    io: S,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S) -> Self {
        Self { io }
    }
}

fn link_closed() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "link closed by peer")
}

#[async_trait]
impl<S> LinkTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let mut read_buf = ReadBuf::new(buf);
        let io = &mut self.io;

        // Poll exactly once: data already queued is returned, otherwise we
        // report "nothing yet" instead of waiting.
        let polled = poll_fn(|cx| Poll::Ready(Pin::new(&mut *io).poll_read(cx, &mut read_buf))).await;

        match polled {
            Poll::Pending => Ok(None),
            Poll::Ready(Ok(())) => match read_buf.filled().len() {
                0 => Err(link_closed()),
                n => Ok(Some(n)),
            },
            Poll::Ready(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Poll::Ready(Err(e)) => Err(e),
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;

        match self.io.read(buf).await? {
            0 => Err(link_closed()),
            n => Ok(n),
        }
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.io.write_all(data).await?;
        self.io.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.io.shutdown().await
    }
}

/// Opens transports for endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &LinkEndpoint) -> Result<Box<dyn LinkTransport>>;
}

/// Connector for real UDP, TCP and serial endpoints
#[derive(Debug, Clone)]
pub struct SystemConnector {
    connect_timeout: Duration,
}

impl SystemConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Open a specific serial port with telemetry radio settings (8N1, no flow control)
    fn open_serial(path: &str, baud: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| MonitorError::Link(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

#[async_trait]
impl Connector for SystemConnector {
    async fn open(&self, endpoint: &LinkEndpoint) -> Result<Box<dyn LinkTransport>> {
        match endpoint.kind()? {
            EndpointKind::Udp(addr) => Ok(Box::new(UdpTransport::bind(&addr).await?)),
            EndpointKind::Tcp(addr) => {
                let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
                    .await
                    .map_err(|_| MonitorError::Link(format!("Timed out connecting to {}", addr)))?
                    .map_err(|e| MonitorError::Link(format!("Failed to connect to {}: {}", addr, e)))?;
                stream.set_nodelay(true)?;
                Ok(Box::new(StreamTransport::new(stream)))
            }
            EndpointKind::Serial(path) => {
                let port = Self::open_serial(&path, endpoint.baud)?;
                Ok(Box::new(StreamTransport::new(port)))
            }
        }
    }
}
