//! Raster-scan scheduler.
//!
//! Sequences the whole capture run: for every grid cell, move the rig, let
//! vibration die down, pull one frame, write it to disk; afterwards return
//! towards the origin and package the results. The grid is walked row-major
//! in a simple raster — X always advances in the same direction and snaps
//! back at the end of each row, Y steps between rows.
//!
//! Cancellation is cooperative and checked exactly once per cell. A move or
//! acknowledgement wait already in flight always completes before an abort
//! is observed; at worst one extra cell is captured. On abort the return
//! moves are skipped and the run goes straight to packaging, so whatever
//! was captured so far still ends up in the archive.
//!
//! The row-end X return uses the loop variable at loop exit (the first
//! out-of-range value) and the final home-return Y move uses the loop-exit
//! Y rather than a recomputed total. When `step` does not evenly divide the
//! extents the return position drifts from true origin; this bookkeeping is
//! kept as-is because downstream calibration depends on the established
//! behavior.

use crate::archive;
use crate::error::{RigError, RigResult};
use crate::events::RigEvents;
use crate::frames::FrameTap;
use crate::motion::{Axis, MotionDriver};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tracing::{error, warn};

/// Settle delay between reaching a cell and taking its picture.
pub const DWELL: Duration = Duration::from_millis(500);

/// Dimensions of one scan, all in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPlan {
    pub width: u32,
    pub height: u32,
    pub step: u32,
}

impl ScanPlan {
    /// Bounds check, performed before any hardware action.
    ///
    /// The failure strings are part of the control-channel contract.
    pub fn validate(&self) -> RigResult<()> {
        if self.step > 50 || self.step < 1 {
            return Err(RigError::validation("Bad steps"));
        }
        if self.width > 500 || self.width < 5 {
            return Err(RigError::validation("Bad width"));
        }
        if self.height > 500 || self.height < 5 {
            return Err(RigError::validation("Bad height"));
        }
        Ok(())
    }

    /// The grid coordinates this plan visits, row-major. The last partial
    /// cell is included when `step` does not divide the extent.
    pub fn cells(&self) -> Vec<(u32, u32)> {
        let mut cells = Vec::new();
        let mut y = 0;
        while y < self.height {
            let mut x = 0;
            while x < self.width {
                cells.push((x, y));
                x += self.step;
            }
            y += self.step;
        }
        cells
    }
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const ABORT_REQUESTED: u8 = 2;

/// Process-wide scan lifecycle flag: Idle, Running, or AbortRequested.
///
/// `stop` requests only ever perform the Running → AbortRequested
/// transition and never block; a stop with no scan running is a no-op.
/// This is the only mutable state shared between the control channel and
/// the scheduler.
#[derive(Debug)]
pub struct ScanState(AtomicU8);

impl ScanState {
    pub fn new() -> Self {
        ScanState(AtomicU8::new(IDLE))
    }

    /// Mark a scan as running, clearing any stale abort request.
    pub fn begin(&self) {
        self.0.store(RUNNING, Ordering::SeqCst);
    }

    /// Request a cooperative abort. Returns whether a running scan was
    /// actually flagged.
    pub fn request_stop(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, ABORT_REQUESTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Polled by the scheduler once per grid cell.
    pub fn abort_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst) == ABORT_REQUESTED
    }

    /// Back to idle, whether the scan completed or aborted.
    pub fn finish(&self) {
        self.0.store(IDLE, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst) != IDLE
    }
}

impl Default for ScanState {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives one scan-and-package run over the motion driver and frame tap.
#[derive(Clone)]
pub struct ScanScheduler {
    driver: MotionDriver,
    events: RigEvents,
    results_dir: PathBuf,
    archive_path: PathBuf,
    dwell: Duration,
}

impl ScanScheduler {
    pub fn new(
        driver: MotionDriver,
        events: RigEvents,
        results_dir: PathBuf,
        archive_path: PathBuf,
    ) -> Self {
        Self {
            driver,
            events,
            results_dir,
            archive_path,
            dwell: DWELL,
        }
    }

    /// Override the settle delay. Used by tests.
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    /// Run the full scan synchronously on the calling task.
    ///
    /// `state` is marked running for the duration and reset to idle on the
    /// way out, normal or aborted. Hard failures (link loss, frame stream
    /// loss) propagate to the caller after the state reset.
    pub async fn run(&self, state: &ScanState, tap: &mut FrameTap, plan: ScanPlan) -> RigResult<()> {
        plan.validate()?;
        state.begin();
        let result = self.execute(state, tap, &plan).await;
        state.finish();
        result
    }

    async fn execute(
        &self,
        state: &ScanState,
        tap: &mut FrameTap,
        plan: &ScanPlan,
    ) -> RigResult<()> {
        self.driver.clear_buffers().await?;
        self.reset_results_dir().await?;

        let mut aborted = false;
        let mut y = 0;
        'rows: while y < plan.height {
            let mut x = 0;
            while x < plan.width {
                if state.abort_requested() {
                    self.events.log("Aborted.");
                    aborted = true;
                    break 'rows;
                }

                if x != 0 {
                    self.driver
                        .move_axis_and_wait(Axis::X, plan.step as i32)
                        .await?;
                }

                // Let vibration die down before the exposure.
                tokio::time::sleep(self.dwell).await;

                self.events
                    .log(format!("Taking picture at X: {} Y: {}", x, y));
                self.take_image(tap, x, y).await?;

                x += plan.step;
            }

            // Snap X back to column 0 in one corrective move, then advance
            // a row. `x` here is the first out-of-range value.
            self.driver
                .move_axis_and_wait(Axis::X, -((x - plan.step) as i32))
                .await?;
            self.driver
                .move_axis_and_wait(Axis::Y, -(plan.step as i32))
                .await?;

            y += plan.step;
        }

        if !aborted {
            // Return towards home using the loop-exit Y.
            self.driver.move_axis_and_wait(Axis::Y, y as i32).await?;
        }

        self.events.log("Compressing results into zip file.");
        self.package().await;
        self.events.log("Done.");

        Ok(())
    }

    async fn reset_results_dir(&self) -> RigResult<()> {
        if tokio::fs::metadata(&self.results_dir).await.is_ok() {
            tokio::fs::remove_dir_all(&self.results_dir).await?;
        }
        tokio::fs::create_dir_all(&self.results_dir).await?;
        Ok(())
    }

    async fn take_image(&self, tap: &mut FrameTap, x: u32, y: u32) -> RigResult<()> {
        let frame = tap.next_frame().await?;
        let path = self.results_dir.join(format!("capture-{}_{}.jpg", y, x));
        if let Err(e) = tokio::fs::write(&path, &frame).await {
            // A lost cell is not worth losing the scan over.
            warn!("failed to write {}: {}", path.display(), e);
        }
        Ok(())
    }

    /// Best-effort packaging; a failed archive is logged, never fatal.
    async fn package(&self) {
        let results_dir = self.results_dir.clone();
        let archive_path = self.archive_path.clone();
        let outcome =
            tokio::task::spawn_blocking(move || archive::package_results(&results_dir, &archive_path))
                .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("could not package results: {}", e),
            Err(e) => error!("packaging task failed: {}", e),
        }
    }
}
