//! V4L2 camera bring-up and frame pump.
//!
//! Opens the capture device, forces MJPEG at the configured resolution and
//! frame rate, then pumps the memory-mapped stream on a dedicated blocking
//! thread. Each frame is published twice: into the one-slot hand-off the
//! scan scheduler pulls from, and onto the preview broadcast the web layer
//! drains. When the pump thread exits its senders drop, which downstream
//! consumers observe as end-of-stream.

use crate::config::Settings;
use crate::error::{RigError, RigResult};
use crate::frames::Frame;
use bytes::Bytes;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC, Fraction};

const MJPEG: &[u8; 4] = b"MJPG";
const STREAM_BUFFERS: u32 = 4;

/// Open and configure the capture device.
///
/// Fails if the device cannot deliver MJPEG; the rest of the pipeline
/// stores frames as-is and has no way to compress raw video.
pub fn open_device(settings: &Settings) -> RigResult<Device> {
    let device = Device::with_path(&settings.video_device)?;

    let format = Format::new(
        settings.capture_width,
        settings.capture_height,
        FourCC::new(MJPEG),
    );
    let actual = device.set_format(&format)?;
    if actual.fourcc != FourCC::new(MJPEG) {
        return Err(RigError::Camera(format!(
            "device {} must support MJPEG (got {})",
            settings.video_device, actual.fourcc
        )));
    }

    let params = device.set_params(&Parameters::new(Fraction::new(1, settings.fps)))?;
    info!(
        "camera {} ready: {}x{} @ {}fps MJPEG",
        settings.video_device, actual.width, actual.height, params.interval.denominator
    );

    Ok(device)
}

/// Start the pump thread draining `device` into the two frame sinks.
pub fn start_pump(
    device: Device,
    frames_tx: watch::Sender<Frame>,
    preview_tx: broadcast::Sender<Frame>,
) -> RigResult<std::thread::JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("camera-pump".to_string())
        .spawn(move || pump(device, frames_tx, preview_tx))?;
    Ok(handle)
}

fn pump(device: Device, frames_tx: watch::Sender<Frame>, preview_tx: broadcast::Sender<Frame>) {
    let mut stream = match MmapStream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS) {
        Ok(stream) => stream,
        Err(e) => {
            error!("could not start camera stream: {}", e);
            return;
        }
    };

    loop {
        match stream.next() {
            Ok((buf, meta)) => {
                // Zero-length frames happen on some UVC cameras; publish
                // them anyway and let each consumer skip.
                debug!("frame {} ({} bytes)", meta.sequence, buf.len());
                let frame = Bytes::copy_from_slice(buf);
                let _ = frames_tx.send(frame.clone());
                let _ = preview_tx.send(frame);
            }
            Err(e) => {
                error!("camera stream ended: {}", e);
                return;
            }
        }
    }
}
