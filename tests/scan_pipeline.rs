//! End-to-end scan pipeline tests over mock hardware.
//!
//! These drive the real scheduler, motion driver, frame bridge, and
//! archiver; only the serial link and the camera are replaced (scripted
//! link, synthetic frame feeder).

use bytes::Bytes;
use panoscan::events::RigEvents;
use panoscan::frames::{frame_handoff, FrameTap};
use panoscan::hardware::mock::MockLink;
use panoscan::motion::MotionDriver;
use panoscan::scan::{ScanPlan, ScanScheduler, ScanState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const JPEG_STUB: &[u8] = b"\xff\xd8panoscan-test-frame\xff\xd9";

struct TestRig {
    link: MockLink,
    scheduler: ScanScheduler,
    state: Arc<ScanState>,
    events: RigEvents,
    tap: FrameTap,
    _feeder: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl TestRig {
    fn results_dir(&self) -> std::path::PathBuf {
        self._dir.path().join("results")
    }

    fn archive_path(&self) -> std::path::PathBuf {
        self._dir.path().join("results.zip")
    }
}

/// Continuously publish frames, the way the camera pump does.
fn feed_frames(tx: watch::Sender<Bytes>, frame: &'static [u8]) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if tx.send(Bytes::from_static(frame)).is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
}

fn test_rig() -> TestRig {
    let dir = tempfile::tempdir().unwrap();
    let link = MockLink::auto_ack();
    let driver =
        MotionDriver::new(Arc::new(link.clone())).with_ack_timeout(Duration::from_millis(20));
    let events = RigEvents::new();
    let scheduler = ScanScheduler::new(
        driver,
        events.clone(),
        dir.path().join("results"),
        dir.path().join("results.zip"),
    )
    .with_dwell(Duration::from_millis(1));

    let (tx, tap) = frame_handoff();
    let feeder = feed_frames(tx, JPEG_STUB);

    TestRig {
        link,
        scheduler,
        state: Arc::new(ScanState::new()),
        events,
        tap,
        _feeder: feeder,
        _dir: dir,
    }
}

fn capture_files(results_dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(results_dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn archive_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let archive = zip::ZipArchive::new(file).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    names
}

#[tokio::test]
async fn full_scan_produces_one_file_per_cell_and_a_matching_archive() {
    let rig = test_rig();
    let mut tap = rig.tap.clone();

    let plan = ScanPlan { width: 20, height: 20, step: 10 };
    rig.scheduler.run(&rig.state, &mut tap, plan).await.unwrap();

    let expected = vec![
        "capture-0_0.jpg",
        "capture-0_10.jpg",
        "capture-10_0.jpg",
        "capture-10_10.jpg",
    ];
    assert_eq!(capture_files(&rig.results_dir()), expected);
    assert_eq!(archive_names(&rig.archive_path()), expected);

    // Every capture holds a full frame.
    for name in &expected {
        let bytes = std::fs::read(rig.results_dir().join(name)).unwrap();
        assert_eq!(bytes, JPEG_STUB);
    }

    assert!(!rig.state.is_running());
}

#[tokio::test]
async fn scan_issues_the_exact_motion_sequence() {
    let rig = test_rig();
    let mut tap = rig.tap.clone();

    let plan = ScanPlan { width: 20, height: 20, step: 10 };
    rig.scheduler.run(&rig.state, &mut tap, plan).await.unwrap();

    let expected: Vec<String> = [
        // row y=0: cell x=0 needs no move, x=10 advances, then the
        // corrective X return and the Y row step.
        "G1 X10", "M400", "G1 X-10", "M400", "G1 Y-10", "M400",
        // row y=10, same shape.
        "G1 X10", "M400", "G1 X-10", "M400", "G1 Y-10", "M400",
        // home return uses the loop-exit Y.
        "G1 Y20", "M400",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    assert_eq!(rig.link.written_lines().await, expected);
    assert_eq!(rig.link.clear_count().await, 1);
}

#[tokio::test]
async fn partial_last_cells_are_visited() {
    let rig = test_rig();
    let mut tap = rig.tap.clone();

    let plan = ScanPlan { width: 25, height: 15, step: 10 };
    rig.scheduler.run(&rig.state, &mut tap, plan).await.unwrap();

    // x in {0,10,20}, y in {0,10}; names are capture-<y>_<x>.jpg.
    let files = capture_files(&rig.results_dir());
    assert_eq!(files.len(), plan.cells().len());
    assert!(files.contains(&"capture-0_20.jpg".to_string()));
    assert!(files.contains(&"capture-10_20.jpg".to_string()));
}

#[tokio::test]
async fn stopping_mid_scan_keeps_partial_results_and_still_packages() {
    let rig = test_rig();
    let mut tap = rig.tap.clone();
    let mut log_rx = rig.events.subscribe();

    let plan = ScanPlan { width: 500, height: 500, step: 10 };
    let total_cells = plan.cells().len();

    let scheduler = rig.scheduler.clone();
    let state = rig.state.clone();
    let scan = tokio::spawn(async move { scheduler.run(&state, &mut tap, plan).await });

    // Let a few cells land before pulling the plug.
    let results_dir = rig.results_dir();
    tokio::time::timeout(Duration::from_secs(10), async {
        while capture_files(&results_dir).len() < 3 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("scan never captured its first cells");

    assert!(rig.state.request_stop());
    scan.await.unwrap().unwrap();

    let captured = capture_files(&rig.results_dir()).len();
    assert!(captured >= 3);
    assert!(captured < total_cells, "abort did not cut the scan short");

    // Packaging still ran over the partial results.
    assert_eq!(archive_names(&rig.archive_path()).len(), captured);
    assert!(!rig.state.is_running());

    // The abort was announced on the status channel.
    let mut saw_abort = false;
    while let Ok(push) = log_rx.try_recv() {
        if push.text == "Aborted." {
            saw_abort = true;
        }
    }
    assert!(saw_abort);
}

#[tokio::test]
async fn empty_frames_from_the_camera_never_reach_the_captures() {
    let dir = tempfile::tempdir().unwrap();
    let link = MockLink::auto_ack();
    let driver =
        MotionDriver::new(Arc::new(link.clone())).with_ack_timeout(Duration::from_millis(20));
    let events = RigEvents::new();
    let scheduler = ScanScheduler::new(
        driver,
        events,
        dir.path().join("results"),
        dir.path().join("results.zip"),
    )
    .with_dwell(Duration::from_millis(1));

    // Interleave empty frames with real ones, as a glitchy camera would.
    let (tx, mut tap) = frame_handoff();
    let feeder = tokio::spawn(async move {
        let mut tick = 0u64;
        loop {
            let frame = if tick % 2 == 0 {
                Bytes::new()
            } else {
                Bytes::from_static(JPEG_STUB)
            };
            if tx.send(frame).is_err() {
                break;
            }
            tick += 1;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let state = ScanState::new();
    let plan = ScanPlan { width: 20, height: 10, step: 10 };
    scheduler.run(&state, &mut tap, plan).await.unwrap();
    feeder.abort();

    let results_dir = dir.path().join("results");
    let files = capture_files(&results_dir);
    assert_eq!(files.len(), plan.cells().len());
    for name in files {
        let bytes = std::fs::read(results_dir.join(name)).unwrap();
        assert_eq!(bytes, JPEG_STUB, "an empty frame leaked into a capture");
    }
}

#[tokio::test]
async fn scan_fails_cleanly_when_the_frame_stream_ends() {
    let dir = tempfile::tempdir().unwrap();
    let link = MockLink::auto_ack();
    let driver =
        MotionDriver::new(Arc::new(link.clone())).with_ack_timeout(Duration::from_millis(20));
    let scheduler = ScanScheduler::new(
        driver,
        RigEvents::new(),
        dir.path().join("results"),
        dir.path().join("results.zip"),
    )
    .with_dwell(Duration::from_millis(1));

    // Camera goes away immediately.
    let (tx, mut tap) = frame_handoff();
    drop(tx);

    let state = ScanState::new();
    let plan = ScanPlan { width: 20, height: 10, step: 10 };
    let err = scheduler.run(&state, &mut tap, plan).await.unwrap_err();
    assert!(matches!(err, panoscan::error::RigError::FrameStreamClosed));
    assert!(!state.is_running(), "scan state must reset after a failure");
}

#[tokio::test]
async fn rerunning_a_scan_replaces_the_previous_results() {
    let rig = test_rig();

    let mut tap = rig.tap.clone();
    let big = ScanPlan { width: 30, height: 10, step: 10 };
    rig.scheduler.run(&rig.state, &mut tap, big).await.unwrap();
    assert_eq!(capture_files(&rig.results_dir()).len(), 3);

    let mut tap = rig.tap.clone();
    let small = ScanPlan { width: 10, height: 10, step: 10 };
    rig.scheduler.run(&rig.state, &mut tap, small).await.unwrap();

    // The second run cleared the output directory and the archive only
    // holds the fresh captures.
    assert_eq!(capture_files(&rig.results_dir()), vec!["capture-0_0.jpg"]);
    assert_eq!(archive_names(&rig.archive_path()), vec!["capture-0_0.jpg"]);
}
