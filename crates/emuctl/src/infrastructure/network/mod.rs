//! Network infrastructure: the byte-level control channel to the monitor.
//!
//! Architecture:
//! - [`ControlChannel`] is one open connection: write a line, read whatever
//!   arrives until the line goes quiet, close.
//! - [`Connector`] opens channels.  The session layer only ever talks to
//!   these two traits, so tests swap in the in-memory [`mock::FakeMonitor`].
//! - [`StreamChannel`] implements the channel over any tokio byte stream;
//!   [`TcpConnector`] produces it over TCP.
//!
//! # Why "read until idle"? (for beginners)
//!
//! The monitor protocol has no length prefix and no end-of-response marker.
//! The only way to know a response is complete is to notice that no more
//! bytes have arrived for a while.  `read_until_idle` keeps reading until a
//! read has waited `idle` without data, the peer closes the stream, or the
//! byte cap is hit.

pub mod mock;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time,
};
use tracing::{debug, trace};

/// One open connection to the monitor.
#[async_trait]
pub trait ControlChannel: Send {
    /// Writes `line` exactly as given (callers include the terminator).
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Accumulates bytes until the channel has been idle for `idle`, the peer
    /// closed the stream, or `max_bytes` were collected.
    async fn read_until_idle(&mut self, idle: Duration, max_bytes: usize) -> io::Result<Vec<u8>>;

    /// Closes the channel.  Calling it twice is harmless.
    async fn close(&mut self) -> io::Result<()>;
}

/// Opens control channels to a `host:port` address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, addr: &str) -> io::Result<Box<dyn ControlChannel>>;
}

/// A [`ControlChannel`] over any async byte stream.
pub struct StreamChannel<S> {
    stream: S,
    closed: bool,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl<S> ControlChannel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await
    }

    async fn read_until_idle(&mut self, idle: Duration, max_bytes: usize) -> io::Result<Vec<u8>> {
        let mut collected = Vec::new();
        let mut chunk = vec![0u8; 64 * 1024];

        while collected.len() < max_bytes {
            match time::timeout(idle, self.stream.read(&mut chunk)).await {
                // Idle window elapsed with no data: the response is over.
                Err(_) => break,
                Ok(Ok(0)) => {
                    debug!("monitor closed the control channel");
                    break;
                }
                Ok(Ok(n)) => {
                    trace!("read {n} bytes from monitor");
                    collected.extend_from_slice(&chunk[..n]);
                }
                Ok(Err(e)) => return Err(e),
            }
        }

        collected.truncate(max_bytes);
        Ok(collected)
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.shutdown().await
    }
}

/// Opens [`StreamChannel`]s over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Upper bound on the TCP handshake.
    pub connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, addr: &str) -> io::Result<Box<dyn ControlChannel>> {
        let stream = time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "TCP connect timed out"))??;
        stream.set_nodelay(true)?;
        Ok(Box::new(StreamChannel::new(stream)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_write_line_sends_exact_bytes() {
        // Arrange: the mock stream panics on any unexpected write.
        let stream = Builder::new().write(b"pause\n").build();
        let mut channel = StreamChannel::new(stream);

        // Act / Assert
        channel.write_line("pause\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_until_idle_collects_chunks_until_eof() {
        // Arrange
        let stream = Builder::new().read(b"first ").read(b"second").build();
        let mut channel = StreamChannel::new(stream);

        // Act
        let bytes = channel
            .read_until_idle(Duration::from_secs(1), 1024)
            .await
            .unwrap();

        // Assert
        assert_eq!(bytes, b"first second");
    }

    #[tokio::test]
    async fn test_read_until_idle_respects_byte_cap() {
        let stream = Builder::new().read(b"0123456789").build();
        let mut channel = StreamChannel::new(stream);

        let bytes = channel
            .read_until_idle(Duration::from_secs(1), 4)
            .await
            .unwrap();

        assert_eq!(bytes, b"0123");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_until_idle_stops_when_peer_goes_quiet() {
        // Arrange: the peer writes once and then keeps the stream open.
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"(SoC) ").await.unwrap();
        let mut channel = StreamChannel::new(client);

        // Act
        let bytes = channel
            .read_until_idle(Duration::from_millis(200), 1024)
            .await
            .unwrap();

        // Assert
        assert_eq!(bytes, b"(SoC) ");
        drop(server);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (client, _server) = tokio::io::duplex(64);
        let mut channel = StreamChannel::new(client);

        channel.close().await.unwrap();
        channel.close().await.unwrap();
        let result = channel.write_line("pause\n").await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_tcp_connector_fails_fast_on_refused_port() {
        // Port 1 on loopback is reserved and refuses connections.
        let connector = TcpConnector::default();
        let result = connector.open("127.0.0.1:1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tcp_connector_round_trips_a_line() {
        // Arrange: a one-shot echo peer on an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let peer = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 6];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        // Act
        let mut channel = TcpConnector::default().open(&addr).await.unwrap();
        channel.write_line("start\n").await.unwrap();
        let echoed = channel
            .read_until_idle(Duration::from_millis(500), 64)
            .await
            .unwrap();

        // Assert
        assert_eq!(echoed, b"start\n");
        peer.await.unwrap();
    }
}
