//! Serial byte transport for the motion controller.
//!
//! [`SerialLink`] wraps the `serialport` crate and provides async I/O by
//! running the synchronous serial operations on Tokio's blocking task
//! executor. The port handle lives behind `Arc<Mutex>` so the link can be
//! shared between the scan pipeline and manual move commands; each
//! read/write takes the lock for exactly one blocking operation.
//!
//! Timeouts are per read call: a read that sees no bytes within its deadline
//! reports an empty chunk, not an error. Only genuine link-level failures
//! surface as [`RigError::Link`].

use crate::error::{RigError, RigResult};
use async_trait::async_trait;
use serialport::SerialPort;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Byte transport to the motion controller.
///
/// Implementations must be safe to share across tasks; the protocol driver
/// layers its own request/acknowledge discipline on top.
#[async_trait]
pub trait MotionLink: Send + Sync {
    /// Write one already-terminated command line.
    async fn write_line(&self, line: &[u8]) -> RigResult<()>;

    /// Read whatever bytes are available, waiting at most `timeout`.
    /// An empty chunk means the deadline elapsed with nothing received.
    async fn read_chunk(&self, timeout: Duration) -> RigResult<Vec<u8>>;

    /// Discard any pending input and output.
    async fn clear_buffers(&self) -> RigResult<()>;
}

/// Production [`MotionLink`] over a serial port.
#[derive(Clone)]
pub struct SerialLink {
    port_name: String,
    port: Arc<Mutex<Box<dyn SerialPort>>>,
}

impl SerialLink {
    /// Open `port_name` at `baud_rate`.
    pub fn open(port_name: &str, baud_rate: u32) -> RigResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        debug!("serial port '{}' opened at {} baud", port_name, baud_rate);

        Ok(Self {
            port_name: port_name.to_string(),
            port: Arc::new(Mutex::new(port)),
        })
    }

    /// Port path this link was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl MotionLink for SerialLink {
    async fn write_line(&self, line: &[u8]) -> RigResult<()> {
        let port = self.port.clone();
        let line = line.to_vec();

        tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut guard = port.blocking_lock();
            guard.write_all(&line).map_err(RigError::Link)?;
            guard.flush().map_err(RigError::Link)
        })
        .await?
    }

    async fn read_chunk(&self, timeout: Duration) -> RigResult<Vec<u8>> {
        let port = self.port.clone();

        tokio::task::spawn_blocking(move || {
            use std::io::Read;

            let mut guard = port.blocking_lock();
            guard
                .set_timeout(timeout)
                .map_err(|e| RigError::Link(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

            let mut buffer = [0u8; 1024];
            match guard.read(&mut buffer) {
                Ok(n) => Ok(buffer[..n].to_vec()),
                // Deadline elapsed with no bytes; the caller decides what
                // that means at the protocol level.
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(RigError::Link(e)),
            }
        })
        .await?
    }

    async fn clear_buffers(&self) -> RigResult<()> {
        let port = self.port.clone();

        tokio::task::spawn_blocking(move || {
            let guard = port.blocking_lock();
            guard
                .clear(serialport::ClearBuffer::All)
                .map_err(|e| RigError::Link(std::io::Error::new(std::io::ErrorKind::Other, e)))
        })
        .await?
    }
}
