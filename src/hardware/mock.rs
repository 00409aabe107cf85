//! Mock hardware implementations.
//!
//! Provides a simulated motion-controller link for testing without physical
//! hardware. [`MockLink`] records every line written and answers reads from
//! a scripted queue; in auto-acknowledge mode it replies `ok` to each
//! written command once the script runs dry, which is enough to drive the
//! whole scan pipeline hostless.

use crate::error::RigResult;
use crate::hardware::MotionLink;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
struct MockLinkState {
    written: Vec<String>,
    responses: VecDeque<Vec<u8>>,
    pending_acks: usize,
    cleared: usize,
}

/// Scripted [`MotionLink`] for tests.
///
/// Reads pop scripted chunks first. When the script is empty and
/// auto-acknowledge is on, each previously written line is answered with one
/// `ok`; otherwise the read reports an empty chunk, which the driver treats
/// as a quiet deadline.
#[derive(Clone)]
pub struct MockLink {
    state: Arc<RwLock<MockLinkState>>,
    auto_ack: bool,
}

impl MockLink {
    /// Link that acknowledges every command.
    pub fn auto_ack() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockLinkState::default())),
            auto_ack: true,
        }
    }

    /// Link that only ever answers from the scripted queue.
    pub fn silent() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockLinkState::default())),
            auto_ack: false,
        }
    }

    /// Queue one response chunk, served before any auto-acknowledgement.
    pub async fn push_response(&self, chunk: &[u8]) {
        self.state.write().await.responses.push_back(chunk.to_vec());
    }

    /// Every line written so far, without terminators.
    pub async fn written_lines(&self) -> Vec<String> {
        self.state.read().await.written.clone()
    }

    /// How many times the buffers were cleared.
    pub async fn clear_count(&self) -> usize {
        self.state.read().await.cleared
    }
}

#[async_trait]
impl MotionLink for MockLink {
    async fn write_line(&self, line: &[u8]) -> RigResult<()> {
        let text = String::from_utf8_lossy(line)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        let mut state = self.state.write().await;
        state.written.push(text);
        state.pending_acks += 1;
        Ok(())
    }

    async fn read_chunk(&self, _timeout: Duration) -> RigResult<Vec<u8>> {
        let mut state = self.state.write().await;
        if let Some(chunk) = state.responses.pop_front() {
            return Ok(chunk);
        }
        if self.auto_ack && state.pending_acks > 0 {
            state.pending_acks -= 1;
            return Ok(b"ok\n".to_vec());
        }
        // Quiet deadline.
        Ok(Vec::new())
    }

    async fn clear_buffers(&self) -> RigResult<()> {
        let mut state = self.state.write().await;
        state.responses.clear();
        state.pending_acks = 0;
        state.cleared += 1;
        Ok(())
    }
}
