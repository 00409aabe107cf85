//! Motion controller protocol driver.
//!
//! The rig speaks a plain-text, line-oriented G-code dialect over the serial
//! link: each command is one line terminated by `\n\r`, and the controller
//! signals completion by emitting the token `ok` somewhere in its output.
//! The protocol is strictly request/acknowledge; there is no pipelining, so
//! the driver holds a session lock across every exchange.
//!
//! Acknowledgement waits accumulate input across reads. A read deadline that
//! expires after *some* bytes arrived keeps waiting (the controller is
//! alive, just not done); a deadline that expires with nothing received at
//! all is reported as [`Ack::TimedOut`], which callers log and survive — the
//! controller is assumed to still be processing. Link-level read/write
//! failures are another matter entirely: once a write or read fails the
//! protocol state cannot be trusted, so [`RigError::Link`] propagates up for
//! the supervisor to escalate.

use crate::error::{RigError, RigResult};
use crate::hardware::MotionLink;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Acknowledgement token scanned for in accumulated controller output.
pub const ACK_TOKEN: &str = "ok";

/// Deadline for one acknowledgement wait during normal operation.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for each drain read while flushing stale bytes at startup.
pub const INIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Motion axis selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Axis {
    type Err = RigError;

    /// Strict uppercase parse; anything else is rejected the way the
    /// control channel rejects it.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "X" => Ok(Axis::X),
            "Y" => Ok(Axis::Y),
            "Z" => Ok(Axis::Z),
            _ => Err(RigError::validation("invalid params")),
        }
    }
}

/// One encoded command line, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gcode(String);

impl Gcode {
    /// `G21` — select millimeter units.
    pub fn units_mm() -> Self {
        Gcode("G21".to_string())
    }

    /// `G91` — select relative positioning.
    pub fn relative_positioning() -> Self {
        Gcode("G91".to_string())
    }

    /// `G1 <axis><mm>` — relative move along one axis.
    pub fn move_rel(axis: Axis, mm: i32) -> Self {
        Gcode(format!("G1 {}{}", axis, mm))
    }

    /// `M400` — wait until all queued motion has finished.
    pub fn finish_moves() -> Self {
        Gcode("M400".to_string())
    }

    /// `G28 X Y` — home the horizontal axes.
    pub fn home_xy() -> Self {
        Gcode("G28 X Y".to_string())
    }

    /// `G28 Z` — home the vertical axis.
    pub fn home_z() -> Self {
        Gcode("G28 Z".to_string())
    }

    /// The wire form, terminated the way the controller expects.
    pub fn as_line(&self) -> Vec<u8> {
        let mut line = self.0.clone().into_bytes();
        line.extend_from_slice(b"\n\r");
        line
    }
}

impl fmt::Display for Gcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of one acknowledgement wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The controller emitted the acknowledgement token.
    Ok,
    /// The deadline elapsed with no bytes at all. The controller is assumed
    /// to still be processing; callers proceed optimistically.
    TimedOut,
}

impl Ack {
    fn and(self, other: Ack) -> Ack {
        match (self, other) {
            (Ack::Ok, Ack::Ok) => Ack::Ok,
            _ => Ack::TimedOut,
        }
    }
}

/// Protocol driver over a [`MotionLink`].
///
/// Cheap to clone; clones share the link and the session lock, preserving
/// the one-command-in-flight invariant across tasks.
#[derive(Clone)]
pub struct MotionDriver {
    link: Arc<dyn MotionLink>,
    session: Arc<Mutex<()>>,
    ack_timeout: Duration,
}

impl MotionDriver {
    pub fn new(link: Arc<dyn MotionLink>) -> Self {
        Self {
            link,
            session: Arc::new(Mutex::new(())),
            ack_timeout: ACK_TIMEOUT,
        }
    }

    /// Override the acknowledgement deadline. Used by tests.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Flush stale controller output, then put the controller into the
    /// units and positioning mode every later command assumes.
    ///
    /// Both setup commands must be acknowledged before the driver is
    /// considered ready; a quiet deadline here is an error, not an
    /// optimistic timeout.
    pub async fn init(&self) -> RigResult<()> {
        let _session = self.session.lock().await;

        loop {
            let chunk = self.link.read_chunk(INIT_DRAIN_TIMEOUT).await?;
            if chunk.is_empty() {
                break;
            }
            debug!(
                "serial IN {} stale bytes: {}",
                chunk.len(),
                String::from_utf8_lossy(&chunk)
            );
        }

        for cmd in [Gcode::units_mm(), Gcode::relative_positioning()] {
            match self.exchange(&cmd).await? {
                Ack::Ok => {}
                Ack::TimedOut => return Err(RigError::AckTimeout(cmd.to_string())),
            }
        }
        Ok(())
    }

    /// Send one command and wait for its acknowledgement.
    pub async fn send_gcode(&self, cmd: Gcode) -> RigResult<Ack> {
        let _session = self.session.lock().await;
        self.exchange(&cmd).await
    }

    /// Relative move along `axis` by `mm`, returning only once the rig has
    /// physically stopped: the move command is followed by a
    /// wait-for-motion-complete command, each acknowledged.
    pub async fn move_axis_and_wait(&self, axis: Axis, mm: i32) -> RigResult<Ack> {
        let first = self.send_gcode(Gcode::move_rel(axis, mm)).await?;
        let second = self.send_gcode(Gcode::finish_moves()).await?;
        Ok(first.and(second))
    }

    /// Home the X and Y axes.
    pub async fn home_xy(&self) -> RigResult<Ack> {
        self.send_gcode(Gcode::home_xy()).await
    }

    /// Home the Z axis.
    pub async fn home_z(&self) -> RigResult<Ack> {
        self.send_gcode(Gcode::home_z()).await
    }

    /// Discard anything pending on the link.
    pub async fn clear_buffers(&self) -> RigResult<()> {
        self.link.clear_buffers().await
    }

    async fn exchange(&self, cmd: &Gcode) -> RigResult<Ack> {
        self.link.write_line(&cmd.as_line()).await?;
        debug!("serial OUT: {}", cmd);

        let mut accumulated = Vec::new();
        loop {
            let chunk = self.link.read_chunk(self.ack_timeout).await?;

            if chunk.is_empty() {
                warn!("timeout waiting for acknowledgement of {}", cmd);
                return Ok(Ack::TimedOut);
            }

            debug!(
                "serial IN {} bytes: {}",
                chunk.len(),
                String::from_utf8_lossy(&chunk)
            );

            accumulated.extend_from_slice(&chunk);
            if String::from_utf8_lossy(&accumulated).contains(ACK_TOKEN) {
                return Ok(Ack::Ok);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockLink;

    fn driver(link: &MockLink) -> MotionDriver {
        MotionDriver::new(Arc::new(link.clone())).with_ack_timeout(Duration::from_millis(10))
    }

    #[test]
    fn gcode_wire_form_uses_the_rig_terminator() {
        assert_eq!(Gcode::move_rel(Axis::X, 10).as_line(), b"G1 X10\n\r");
        assert_eq!(Gcode::move_rel(Axis::Y, -25).as_line(), b"G1 Y-25\n\r");
        assert_eq!(Gcode::home_xy().as_line(), b"G28 X Y\n\r");
    }

    #[test]
    fn axis_parse_is_strict() {
        assert_eq!("X".parse::<Axis>().unwrap(), Axis::X);
        assert!("x".parse::<Axis>().is_err());
        assert!("XY".parse::<Axis>().is_err());
        assert!("".parse::<Axis>().is_err());
    }

    #[tokio::test]
    async fn send_gcode_waits_for_ok() {
        let link = MockLink::auto_ack();
        let driver = driver(&link);

        let ack = driver.send_gcode(Gcode::move_rel(Axis::X, 10)).await.unwrap();
        assert_eq!(ack, Ack::Ok);
        assert_eq!(link.written_lines().await, vec!["G1 X10".to_string()]);
    }

    #[tokio::test]
    async fn acknowledgement_may_arrive_split_across_chunks() {
        let link = MockLink::silent();
        link.push_response(b"echo:busy o").await;
        link.push_response(b"k\n").await;
        let driver = driver(&link);

        let ack = driver.send_gcode(Gcode::finish_moves()).await.unwrap();
        assert_eq!(ack, Ack::Ok);
    }

    #[tokio::test]
    async fn quiet_deadline_reports_timed_out() {
        let link = MockLink::silent();
        let driver = driver(&link);

        let ack = driver.send_gcode(Gcode::move_rel(Axis::X, 10)).await.unwrap();
        assert_eq!(ack, Ack::TimedOut);
    }

    #[tokio::test]
    async fn move_and_wait_issues_move_then_finish() {
        let link = MockLink::auto_ack();
        let driver = driver(&link);

        let ack = driver.move_axis_and_wait(Axis::Y, -5).await.unwrap();
        assert_eq!(ack, Ack::Ok);
        assert_eq!(
            link.written_lines().await,
            vec!["G1 Y-5".to_string(), "M400".to_string()]
        );
    }

    #[tokio::test]
    async fn init_drains_then_configures_units_and_positioning() {
        let link = MockLink::auto_ack();
        link.push_response(b"start\nMarlin 2.0\n").await;
        let driver = driver(&link);

        driver.init().await.unwrap();
        assert_eq!(
            link.written_lines().await,
            vec!["G21".to_string(), "G91".to_string()]
        );
    }

    #[tokio::test]
    async fn init_requires_acknowledgements() {
        let link = MockLink::silent();
        let driver = driver(&link);

        let err = driver.init().await.unwrap_err();
        assert!(matches!(err, RigError::AckTimeout(_)));
    }
}
