//! Status and preview broadcast.
//!
//! All one-way traffic towards web clients flows through a single broadcast
//! channel of [`Push`] messages: operator-facing log lines and base64 JPEG
//! preview frames. Each websocket client holds its own receiver; slow
//! clients lag and simply miss messages, they never apply backpressure to
//! the rig.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

/// One outbound message on the event channel.
#[derive(Debug, Clone, Serialize)]
pub struct Push {
    pub event: String,
    pub success: bool,
    pub text: String,
}

impl Push {
    pub fn log(text: impl Into<String>) -> Self {
        Push {
            event: "log".to_string(),
            success: true,
            text: text.into(),
        }
    }

    pub fn webcam(base64_jpeg: String) -> Self {
        Push {
            event: "webcam".to_string(),
            success: true,
            text: base64_jpeg,
        }
    }
}

/// Handle for emitting events; cheap to clone.
#[derive(Clone)]
pub struct RigEvents {
    tx: broadcast::Sender<Push>,
}

impl RigEvents {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self { tx }
    }

    /// Operator-facing status line, mirrored to the process log.
    pub fn log(&self, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        let _ = self.tx.send(Push::log(text));
    }

    /// Latest preview frame, already base64-encoded.
    pub fn webcam(&self, base64_jpeg: String) {
        let _ = self.tx.send(Push::webcam(base64_jpeg));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Push> {
        self.tx.subscribe()
    }
}

impl Default for RigEvents {
    fn default() -> Self {
        Self::new()
    }
}
