//! # Transport Layer
//!
//! Frame reader/writer over any ordered, reliable async byte stream, plus
//! TCP connect/listen helpers. Reads loop until a whole frame is buffered,
//! so partial reads from the stream are harmless.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ExchangeError, ExchangeResult};
use crate::frame::{Frame, FrameDecoder, MAX_FRAME_PAYLOAD};

/// Default read buffer size
const READ_BUFFER_SIZE: usize = 4096;

/// Await `fut`, bounded by `limit` when one is set
async fn with_timeout<T, F>(limit: Option<Duration>, fut: F) -> ExchangeResult<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| ExchangeError::Timeout(limit.as_secs()))?
            .map_err(ExchangeError::from),
        None => fut.await.map_err(ExchangeError::from),
    }
}

/// Framed connection over a byte stream
pub struct Transport<S> {
    stream: S,
    decoder: FrameDecoder,
    read_buffer: Vec<u8>,
    io_timeout: Option<Duration>,
    bytes_sent: u64,
    bytes_received: u64,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream. Reads block until data arrives or the stream closes.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            read_buffer: vec![0u8; READ_BUFFER_SIZE],
            io_timeout: None,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Bound every read and write by `limit`
    pub fn with_io_timeout(mut self, limit: Option<Duration>) -> Self {
        self.io_timeout = limit;
        self
    }

    /// Send a frame as a single write
    pub async fn send_frame(&mut self, frame: &Frame) -> ExchangeResult<()> {
        let bytes = frame.to_bytes();

        with_timeout(self.io_timeout, self.stream.write_all(&bytes)).await?;
        with_timeout(self.io_timeout, self.stream.flush()).await?;

        self.bytes_sent += bytes.len() as u64;
        debug!(
            "Sent {} frame ({} bytes)",
            frame.message_type(),
            bytes.len()
        );

        Ok(())
    }

    /// Receive the next frame
    ///
    /// End of stream before a whole frame is buffered is `TransportClosed`.
    pub async fn recv_frame(&mut self) -> ExchangeResult<Frame> {
        self.recv_frame_limited(MAX_FRAME_PAYLOAD).await
    }

    /// Receive the next frame, failing with `MessageTooLarge` as soon as its
    /// header declares more than `max_payload` bytes
    pub async fn recv_frame_limited(&mut self, max_payload: usize) -> ExchangeResult<Frame> {
        loop {
            if let Some(frame) = self.decoder.decode_limited(max_payload)? {
                debug!(
                    "Received {} frame ({} bytes)",
                    frame.message_type(),
                    frame.total_size()
                );
                return Ok(frame);
            }

            let n = with_timeout(self.io_timeout, self.stream.read(&mut self.read_buffer)).await?;

            if n == 0 {
                return Err(ExchangeError::TransportClosed);
            }

            self.bytes_received += n as u64;
            self.decoder.push(&self.read_buffer[..n]);
        }
    }

    /// Shut down the write direction
    pub async fn shutdown(&mut self) -> ExchangeResult<()> {
        self.stream.shutdown().await.map_err(ExchangeError::from)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

impl Transport<TcpStream> {
    /// Connect to a remote address
    pub async fn connect(addr: SocketAddr, connect_timeout: Option<Duration>) -> ExchangeResult<Self> {
        let stream = with_timeout(connect_timeout, TcpStream::connect(addr)).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> ExchangeResult<SocketAddr> {
        self.stream.peer_addr().map_err(ExchangeError::from)
    }
}

/// TCP listener wrapper
pub struct TransportListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TransportListener {
    /// Bind to an address
    pub async fn bind(addr: SocketAddr) -> ExchangeResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Get the local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept a new connection
    pub async fn accept(&self) -> ExchangeResult<(Transport<TcpStream>, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Transport::new(stream), addr))
    }
}
