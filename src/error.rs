//! Custom error types for the application.
//!
//! This module defines the primary error type, `RigError`, for the entire
//! controller. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure classes this system cares about:
//!
//! - **`Validation`**: bad scan or move parameters, rejected before any
//!   hardware action and surfaced synchronously to the caller as a structured
//!   failure reply. The display string is the exact reply text.
//! - **`SerialOpen`** / **`Link`**: the serial port could not be opened, or a
//!   read/write on the open link failed. A link failure mid-protocol is
//!   unrecoverable; the top-level dispatcher escalates it to process exit.
//! - **`AckTimeout`**: no acknowledgement arrived within the read deadline
//!   while the driver was being initialized. During a scan a quiet deadline is
//!   reported as a timed-out acknowledgement instead and the scan proceeds
//!   optimistically; only init treats it as fatal.
//! - **`FrameStreamClosed`**: the camera's frame stream ended. Fatal to any
//!   in-progress scan.
//! - **`Camera`**: the capture device could not be brought up in a usable
//!   format.
//! - **`Io`** / **`Archive`**: filesystem and zip-packaging failures. Archive
//!   failures are fatal to packaging only, never to the process.
//!
//! By using `#[from]`, `RigError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the crate with the `?`
//! operator.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

#[derive(Error, Debug)]
pub enum RigError {
    /// Rejected request parameters. Display text is the wire reply text.
    #[error("{0}")]
    Validation(String),

    #[error("could not open serial port: {0}")]
    SerialOpen(#[from] serialport::Error),

    /// Read/write failure on the open serial link. The protocol state cannot
    /// be trusted afterwards.
    #[error("serial link failure: {0}")]
    Link(#[source] std::io::Error),

    #[error("no acknowledgement for {0} within the deadline")]
    AckTimeout(String),

    #[error("camera frame stream ended")]
    FrameStreamClosed,

    #[error("camera error: {0}")]
    Camera(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl RigError {
    /// Shorthand used by the endpoint validators.
    pub fn validation(text: impl Into<String>) -> Self {
        RigError::Validation(text.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_is_the_bare_reply_text() {
        let err = RigError::validation("Bad steps");
        assert_eq!(err.to_string(), "Bad steps");
    }

    #[test]
    fn link_failure_display() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = RigError::Link(io);
        assert!(err.to_string().contains("serial link failure"));
    }
}
