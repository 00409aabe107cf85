//! Command-line settings.
//!
//! One flat clap-derive struct covers everything this appliance is
//! configured with: the capture device and its format, the serial link to
//! the motion controller, the web listen port, and the two working
//! directories. Defaults match a typical single-rig deployment.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "panoscan")]
#[command(about = "Motorized panorama capture rig controller")]
#[command(version)]
pub struct Settings {
    /// Camera device path
    #[arg(short = 'd', long, default_value = "/dev/video0")]
    pub video_device: String,

    /// Width for the capture resolution
    #[arg(short = 'w', long, default_value_t = 800)]
    pub capture_width: u32,

    /// Height for the capture resolution
    #[arg(long, default_value_t = 600)]
    pub capture_height: u32,

    /// Capture frame rate
    #[arg(short = 'f', long, default_value_t = 30)]
    pub fps: u32,

    /// Webserver listen port
    #[arg(short = 'p', long, default_value_t = 9001)]
    pub http_port: u16,

    /// Serial port device
    #[arg(short = 's', long, default_value = "/dev/ttyUSB0")]
    pub serial_device: String,

    /// Serial port baud rate
    #[arg(short = 'b', long, default_value_t = 115200)]
    pub baud_rate: u32,

    /// Directory the per-cell captures are written to (cleared per scan)
    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Directory of static web assets; also receives results.zip
    #[arg(long, default_value = "static")]
    pub static_dir: PathBuf,

    /// Log serial traffic and other debug messages
    #[arg(short = 'D', long)]
    pub debug: bool,
}

impl Settings {
    /// Destination of the result archive, overwritten per run.
    pub fn archive_path(&self) -> PathBuf {
        self.static_dir.join("results.zip")
    }
}
