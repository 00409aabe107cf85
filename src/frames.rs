//! Frame source bridge.
//!
//! The camera produces frames continuously; the scan pipeline wants exactly
//! one frame, on demand, after the rig has settled. The bridge between the
//! two is a one-slot hand-off: a `tokio::sync::watch` channel holding only
//! the most recent unclaimed frame. A frame that is not claimed before the
//! next one arrives is overwritten and lost — deliberately, since a stale
//! frame of a moving rig is worthless.
//!
//! Zero-length frames are a transient artifact of the MJPEG stream and are
//! skipped silently; every frame handed to a caller is non-empty. If the
//! producer goes away the pull fails with [`RigError::FrameStreamClosed`],
//! which is fatal to any in-progress scan.

use crate::error::{RigError, RigResult};
use bytes::Bytes;
use tokio::sync::watch;

/// One compressed (MJPEG) camera frame.
pub type Frame = Bytes;

/// Create the producer/consumer pair for the one-slot hand-off.
///
/// The initial slot value is an empty frame, which consumers never observe:
/// pulls wait for a change first and skip empties.
pub fn frame_handoff() -> (watch::Sender<Frame>, FrameTap) {
    let (tx, rx) = watch::channel(Bytes::new());
    (tx, FrameTap { rx })
}

/// Consumer handle pulling frames from the hand-off.
///
/// Clones observe the stream independently; each clone sees the frames that
/// arrive after it was created.
#[derive(Clone)]
pub struct FrameTap {
    rx: watch::Receiver<Frame>,
}

impl FrameTap {
    /// Block until the next non-empty frame arrives.
    ///
    /// There is no timeout here: an unresponsive camera stalls the caller
    /// indefinitely, matching the rest of the pipeline's trust in the
    /// upstream device.
    pub async fn next_frame(&mut self) -> RigResult<Frame> {
        loop {
            self.rx
                .changed()
                .await
                .map_err(|_| RigError::FrameStreamClosed)?;
            let frame = self.rx.borrow_and_update().clone();
            if !frame.is_empty() {
                return Ok(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_only_non_empty_frames() {
        let (tx, mut tap) = frame_handoff();

        let puller = tokio::spawn(async move { tap.next_frame().await });

        // Arbitrarily many empty frames are skipped.
        for _ in 0..5 {
            tx.send(Bytes::new()).unwrap();
            tokio::task::yield_now().await;
        }
        tx.send(Bytes::from_static(b"\xff\xd8jpeg")).unwrap();

        let frame = puller.await.unwrap().unwrap();
        assert_eq!(&frame[..], b"\xff\xd8jpeg");
    }

    #[tokio::test]
    async fn unclaimed_frames_are_overwritten_by_newer_ones() {
        let (tx, mut tap) = frame_handoff();

        tx.send(Bytes::from_static(b"old")).unwrap();
        tx.send(Bytes::from_static(b"new")).unwrap();

        let frame = tap.next_frame().await.unwrap();
        assert_eq!(&frame[..], b"new");
    }

    #[tokio::test]
    async fn closed_stream_is_an_error() {
        let (tx, mut tap) = frame_handoff();
        drop(tx);

        let err = tap.next_frame().await.unwrap_err();
        assert!(matches!(err, RigError::FrameStreamClosed));
    }
}
