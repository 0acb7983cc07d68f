//! Serial transport for the matrix
//!
//! All traffic to the device goes through one [`Transport`]. Its gate is an
//! async mutex that owns the connection handle itself: a task can only touch
//! the wire while it holds the gate, and waiters are admitted in arrival
//! order. The handle is opened lazily and dropped after any I/O failure so
//! the next operation re-opens the port.
//!
//! Generic over the I/O type to support both real serial ports and virtual
//! devices (`DuplexStream` from `tokio::io::duplex()`).

use std::io::{self, ErrorKind};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, warn};

use crate::error::ControlError;

/// Pause after every write before the device accepts another command
pub const SETTLE_DELAY: Duration = Duration::from_millis(1500);

/// Read/write timeout on the line
pub const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Default reply limit for `read_reply`
pub const DEFAULT_REPLY_LIMIT: usize = 4096;

/// Reply limit for the short identity queries
pub const IDENTITY_REPLY_LIMIT: usize = 256;

/// Something that can open a connection to the matrix
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Port path or device name, for logs and errors
    fn port_name(&self) -> &str;

    /// Open a new connection
    fn open(&self) -> Result<Self::Io, ControlError>;
}

/// Connector for a real RS-232 port (8N1, no flow control)
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    baud_rate: u32,
}

impl SerialConnector {
    /// Create a connector for `port` at `baud_rate`
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }
}

impl Connector for SerialConnector {
    type Io = SerialStream;

    fn port_name(&self) -> &str {
        &self.port
    }

    fn open(&self) -> Result<SerialStream, ControlError> {
        tokio_serial::new(&self.port, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(IO_TIMEOUT)
            .open_native_async()
            .map_err(|e| ControlError::Connection {
                port: self.port.clone(),
                reason: e.to_string(),
            })
    }
}

/// Connector backed by a closure
///
/// Used for virtual matrices and tests.
pub struct FnConnector<T> {
    name: String,
    open: Box<dyn Fn() -> io::Result<T> + Send + Sync>,
}

impl<T> FnConnector<T> {
    /// Create a connector named `name` that opens connections with `open`
    pub fn new<F>(name: impl Into<String>, open: F) -> Self
    where
        F: Fn() -> io::Result<T> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            open: Box::new(open),
        }
    }
}

impl<T> std::fmt::Debug for FnConnector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnConnector")
            .field("name", &self.name)
            .field("open", &"<closure>")
            .finish()
    }
}

impl<T> Connector for FnConnector<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Io = T;

    fn port_name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<T, ControlError> {
        (self.open)().map_err(|e| ControlError::Connection {
            port: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

/// Serialized access to the matrix's serial line
pub struct Transport<C: Connector> {
    connector: C,
    /// The gate. `None` until the first successful open.
    line: Mutex<Option<C::Io>>,
}

impl<C: Connector> Transport<C> {
    /// Create a transport; nothing is opened yet
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            line: Mutex::new(None),
        }
    }

    /// Port path or device name
    pub fn port_name(&self) -> &str {
        self.connector.port_name()
    }

    /// Open the connection if it is not open already
    pub async fn open(&self) -> Result<(), ControlError> {
        let mut line = self.line.lock().await;
        self.ensure_open(&mut line)?;
        Ok(())
    }

    /// Release the connection; a no-op when not open
    pub async fn close(&self) {
        let mut line = self.line.lock().await;
        if let Some(mut io) = line.take() {
            let _ = io.shutdown().await;
            info!("Closed {}", self.port_name());
        }
    }

    /// Returns true if a connection is currently held
    pub async fn is_open(&self) -> bool {
        self.line.lock().await.is_some()
    }

    /// Write a command, then hold the line for [`SETTLE_DELAY`]
    ///
    /// The delay runs while the gate is still held, so whoever is queued next
    /// starts writing no earlier than `SETTLE_DELAY` after this write.
    pub async fn write(&self, payload: &[u8]) -> Result<(), ControlError> {
        let mut line = self.line.lock().await;
        let io = self.ensure_open(&mut line)?;

        debug!("-> {}: {:?}", self.port_name(), String::from_utf8_lossy(payload));
        if let Err(e) = send(io, payload).await {
            warn!("Write to {} failed: {}", self.port_name(), e);
            *line = None;
            return Err(e.into());
        }

        tokio::time::sleep(SETTLE_DELAY).await;
        Ok(())
    }

    /// Write a command and collect its reply
    ///
    /// Bytes are gathered until `max_bytes` arrive or the [`IO_TIMEOUT`]
    /// window closes; a short reply is accepted as-is. Undecodable bytes are
    /// replaced rather than rejected. No settle delay follows.
    pub async fn read_reply(&self, payload: &[u8], max_bytes: usize) -> Result<String, ControlError> {
        let mut line = self.line.lock().await;
        let io = self.ensure_open(&mut line)?;

        debug!("-> {}: {:?}", self.port_name(), String::from_utf8_lossy(payload));
        let result = match send(io, payload).await {
            Ok(()) => receive(io, max_bytes).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                let reply = String::from_utf8_lossy(&bytes).into_owned();
                debug!("<- {}: {:?}", self.port_name(), reply);
                Ok(reply)
            }
            Err(e) => {
                warn!("Exchange with {} failed: {}", self.port_name(), e);
                *line = None;
                Err(e.into())
            }
        }
    }

    fn ensure_open<'a>(&self, line: &'a mut Option<C::Io>) -> Result<&'a mut C::Io, ControlError> {
        if line.is_none() {
            let io = self.connector.open()?;
            info!("Opened {}", self.port_name());
            *line = Some(io);
        }
        line.as_mut().ok_or_else(|| ControlError::Connection {
            port: self.port_name().to_string(),
            reason: "connection unavailable".to_string(),
        })
    }
}

/// Write and flush within [`IO_TIMEOUT`]
async fn send<T>(io: &mut T, payload: &[u8]) -> io::Result<()>
where
    T: AsyncWrite + Unpin,
{
    let write = async {
        io.write_all(payload).await?;
        io.flush().await
    };
    timeout(IO_TIMEOUT, write)
        .await
        .map_err(|_| io::Error::new(ErrorKind::TimedOut, "write timed out"))?
}

/// Gather reply bytes until `max_bytes` or the end of the read window
async fn receive<T>(io: &mut T, max_bytes: usize) -> io::Result<Vec<u8>>
where
    T: AsyncRead + Unpin,
{
    let deadline = Instant::now() + IO_TIMEOUT;
    let mut reply = Vec::with_capacity(max_bytes.min(DEFAULT_REPLY_LIMIT));
    let mut chunk = [0u8; 512];

    while reply.len() < max_bytes {
        let want = (max_bytes - reply.len()).min(chunk.len());
        match timeout_at(deadline, io.read(&mut chunk[..want])).await {
            Err(_) => break,
            Ok(Ok(0)) if reply.is_empty() => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed by device",
                ));
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => reply.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
            Ok(Err(e)) => return Err(e),
        }
    }

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    /// Transport whose single connection is the host end of a duplex pair
    fn duplex_transport() -> (Transport<FnConnector<DuplexStream>>, DuplexStream) {
        let (host, device) = duplex(1024);
        let slot = std::sync::Mutex::new(Some(host));
        let connector = FnConnector::new("test", move || {
            slot.lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "already taken"))
        });
        (Transport::new(connector), device)
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_holds_line_for_settle_delay() {
        let (transport, mut device) = duplex_transport();

        let start = Instant::now();
        transport.write(b"0102\r").await.unwrap();
        assert!(start.elapsed() >= SETTLE_DELAY);

        let mut buf = [0u8; 16];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"0102\r");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_reply_accepts_partial_reply() {
        let (transport, mut device) = duplex_transport();
        device.write_all(b"o01i0").await.unwrap();

        let start = Instant::now();
        let reply = transport.read_reply(b"STMAP\r", DEFAULT_REPLY_LIMIT).await.unwrap();
        assert_eq!(reply, "o01i0");
        assert!(start.elapsed() >= IO_TIMEOUT);
        assert!(start.elapsed() < SETTLE_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_reply_stops_at_limit() {
        let (transport, mut device) = duplex_transport();
        device.write_all(b"FW:V1.04 and more").await.unwrap();

        let reply = transport.read_reply(b"VR\r", 8).await.unwrap();
        assert_eq!(reply, "FW:V1.04");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_reply_replaces_invalid_utf8() {
        let (transport, mut device) = duplex_transport();
        device.write_all(b"o01\xffi02").await.unwrap();

        let reply = transport.read_reply(b"STMAP\r", DEFAULT_REPLY_LIMIT).await.unwrap();
        assert_eq!(reply, "o01\u{FFFD}i02");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_yields_empty_reply() {
        let (transport, _device) = duplex_transport();
        let reply = transport.read_reply(b"STMAP\r", DEFAULT_REPLY_LIMIT).await.unwrap();
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_is_connection_error() {
        let connector = FnConnector::new("/dev/missing", || -> io::Result<DuplexStream> {
            Err(io::Error::new(ErrorKind::NotFound, "no such device"))
        });
        let transport = Transport::new(connector);

        let err = transport.write(b"01\r").await.unwrap_err();
        assert!(err.is_connection());
        assert!(!transport.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_is_idempotent_and_close_is_safe() {
        let (transport, _device) = duplex_transport();

        transport.close().await;
        transport.open().await.unwrap();
        // A second open must not ask the connector again (it would fail)
        transport.open().await.unwrap();
        assert!(transport.is_open().await);

        transport.close().await;
        assert!(!transport.is_open().await);
        transport.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_device_drops_connection() {
        let (transport, device) = duplex_transport();
        drop(device);

        assert!(transport.read_reply(b"STMAP\r", 64).await.is_err());
        assert!(!transport.is_open().await);
    }
}
