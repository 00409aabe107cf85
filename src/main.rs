//! Process entry point: bring up the serial link and camera, wire the
//! frame plumbing, and serve the web control surface.

use anyhow::Context;
use clap::Parser;
use panoscan::config::Settings;
use panoscan::events::RigEvents;
use panoscan::hardware::SerialLink;
use panoscan::motion::MotionDriver;
use panoscan::scan::{ScanScheduler, ScanState};
use panoscan::server::{self, AppState};
use panoscan::{camera, frames};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();

    let default_filter = if settings.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    anyhow::ensure!(
        settings.static_dir.is_dir(),
        "missing {}/ folder with html files",
        settings.static_dir.display()
    );

    // Serial link to the motion controller; the rig must acknowledge its
    // setup commands before anything else starts.
    let link = SerialLink::open(&settings.serial_device, settings.baud_rate)
        .with_context(|| format!("cannot open serial port {}", settings.serial_device))?;
    let driver = MotionDriver::new(Arc::new(link));
    driver.init().await.context("motion controller init")?;
    info!("serial ready");

    // Camera and frame plumbing: one slot for the scheduler, a broadcast
    // for the live preview.
    let device = camera::open_device(&settings).context("camera init")?;
    let (frames_tx, tap) = frames::frame_handoff();
    let (preview_tx, preview_rx) = broadcast::channel(1);
    camera::start_pump(device, frames_tx, preview_tx).context("camera pump")?;
    info!("webcam ready");

    let events = RigEvents::new();
    server::spawn_preview(events.clone(), preview_rx);

    let scheduler = ScanScheduler::new(
        driver.clone(),
        events.clone(),
        settings.results_dir.clone(),
        settings.archive_path(),
    );
    let state = Arc::new(AppState {
        driver,
        scan_state: Arc::new(ScanState::new()),
        scheduler,
        tap,
        events,
    });

    let app = server::router(state, &settings.static_dir);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot listen on {}", addr))?;
    info!("webserver listening at {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("webserver")?;

    Ok(())
}
