//! Web layer: static UI, websocket control channel, live preview.
//!
//! One axum router serves the operator UI from the static directory and a
//! `/ws` endpoint speaking a small JSON message protocol:
//!
//! - requests: `{"event": "panorama"|"printer", "text": <verb>, "body": {...}}`
//! - replies:  `{"event": "reply", "success": bool, "text": "ok"|<reason>}`
//! - pushes:   `{"event": "log"|"webcam", ...}` fanned out to every client.
//!
//! Endpoint semantics follow the scan controller's contract: `start` is
//! fire-and-forget (the reply acknowledges dispatch, completion arrives on
//! the log channel), `stop` only flags the abort and returns, and the
//! manual `move`/home commands go straight to the motion driver with no
//! mutual exclusion against a running scan. Every handler error is caught
//! here and answered as a failure reply — the listener itself never dies.
//! The single exception is a serial link failure, which by policy takes the
//! whole controller down because the protocol state cannot be trusted.

use crate::error::RigError;
use crate::events::{Push, RigEvents};
use crate::frames::{Frame, FrameTap};
use crate::motion::{Axis, MotionDriver};
use crate::scan::{ScanPlan, ScanScheduler, ScanState};
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{debug, error, info, warn};

/// Everything the endpoints need, shared across client connections.
pub struct AppState {
    pub driver: MotionDriver,
    pub scan_state: Arc<ScanState>,
    pub scheduler: ScanScheduler,
    pub tap: FrameTap,
    pub events: RigEvents,
}

/// Inbound control message.
#[derive(Debug, Deserialize)]
struct Request {
    event: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    body: serde_json::Value,
}

fn reply_ok() -> Push {
    Push {
        event: "reply".to_string(),
        success: true,
        text: "ok".to_string(),
    }
}

fn reply_failure(text: impl Into<String>) -> Push {
    Push {
        event: "reply".to_string(),
        success: false,
        text: text.into(),
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, who: SocketAddr, state: Arc<AppState>) {
    debug!("websocket client {} connected", who);

    let (sender, receiver) = socket.split();
    let (reply_tx, reply_rx) = mpsc::channel::<Push>(32);
    let push_rx = state.events.subscribe();

    let mut send_task = tokio::spawn(write_outbound(sender, reply_rx, push_rx));
    let mut recv_task = tokio::spawn(read_commands(receiver, state, reply_tx));

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    debug!("websocket client {} disconnected", who);
}

async fn write_outbound(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut reply_rx: mpsc::Receiver<Push>,
    mut push_rx: broadcast::Receiver<Push>,
) {
    loop {
        let push = tokio::select! {
            reply = reply_rx.recv() => match reply {
                Some(push) => push,
                None => break,
            },
            event = push_rx.recv() => match event {
                Ok(push) => push,
                // A slow client misses events rather than stalling the rig.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let Ok(text) = serde_json::to_string(&push) else {
            continue;
        };
        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

async fn read_commands(
    mut receiver: futures::stream::SplitStream<WebSocket>,
    state: Arc<AppState>,
    reply_tx: mpsc::Sender<Push>,
) {
    while let Some(Ok(message)) = receiver.next().await {
        if let Message::Text(text) = message {
            let reply = dispatch(&state, &text).await;
            if reply_tx.send(reply).await.is_err() {
                break;
            }
        }
    }
}

/// Route one raw control message and produce its reply. Never panics and
/// never returns an error; everything unexpected becomes a failure reply.
pub async fn dispatch(state: &AppState, raw: &str) -> Push {
    let request: Request = match serde_json::from_str(raw) {
        Ok(request) => request,
        Err(e) => {
            warn!("unparseable control message: {}", e);
            return reply_failure("invalid message");
        }
    };

    info!("{} CMD: {}", request.event, request.text);

    match request.event.as_str() {
        "panorama" => panorama_endpoint(state, &request).await,
        "printer" => printer_endpoint(state, &request).await,
        _ => reply_failure("unknown event"),
    }
}

fn plan_from_body(body: &serde_json::Value) -> ScanPlan {
    let field = |name: &str| -> u32 {
        body.get(name)
            .and_then(serde_json::Value::as_i64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    };
    ScanPlan {
        width: field("width"),
        height: field("height"),
        step: field("step"),
    }
}

async fn panorama_endpoint(state: &AppState, request: &Request) -> Push {
    match request.text.as_str() {
        "start" => {
            let plan = plan_from_body(&request.body);
            if let Err(e) = plan.validate() {
                return reply_failure(e.to_string());
            }

            state.events.log(format!(
                "Starting panorama for {}x{}mm with {}mm increments",
                plan.width, plan.height, plan.step
            ));
            spawn_scan(state, plan);
            reply_ok()
        }
        "stop" => {
            // Only ever flags a running scan; a stray stop is a no-op.
            state.scan_state.request_stop();
            reply_ok()
        }
        _ => reply_ok(),
    }
}

async fn printer_endpoint(state: &AppState, request: &Request) -> Push {
    match request.text.as_str() {
        "move" => {
            let axis = request
                .body
                .get("axis")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("");
            let mm = request
                .body
                .get("mm")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0);

            let Ok(axis) = axis.parse::<Axis>() else {
                return reply_failure("invalid params");
            };
            if !(-100..=100).contains(&mm) {
                return reply_failure("invalid params");
            }

            match state.driver.move_axis_and_wait(axis, mm as i32).await {
                Ok(_) => reply_ok(),
                Err(e) => endpoint_failure(e),
            }
        }
        "homexy" => match state.driver.home_xy().await {
            Ok(_) => reply_ok(),
            Err(e) => endpoint_failure(e),
        },
        "homez" => match state.driver.home_z().await {
            Ok(_) => reply_ok(),
            Err(e) => endpoint_failure(e),
        },
        _ => reply_ok(),
    }
}

/// Run the scan on its own task; the endpoint reply does not wait for it.
fn spawn_scan(state: &AppState, plan: ScanPlan) {
    let scheduler = state.scheduler.clone();
    let scan_state = state.scan_state.clone();
    let mut tap = state.tap.clone();
    let events = state.events.clone();

    tokio::spawn(async move {
        if let Err(e) = scheduler.run(&scan_state, &mut tap, plan).await {
            match e {
                RigError::Link(_) => fatal_link_failure(&e),
                other => {
                    error!("scan failed: {}", other);
                    events.log(format!("Scan failed: {}", other));
                }
            }
        }
    });
}

fn endpoint_failure(e: RigError) -> Push {
    if matches!(e, RigError::Link(_)) {
        fatal_link_failure(&e);
    }
    error!("command failed: {}", e);
    reply_failure(e.to_string())
}

/// A dead serial link leaves the protocol in an unknowable state; the
/// supervisor decision is to take the whole controller down rather than
/// keep issuing moves blind.
fn fatal_link_failure(e: &RigError) -> ! {
    error!("fatal: {}", e);
    std::process::exit(1);
}

/// Forward camera frames to web clients as base64 JPEG pushes,
/// independently of scan state.
pub fn spawn_preview(
    events: RigEvents,
    mut frames: broadcast::Receiver<Frame>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(frame) => {
                    if frame.is_empty() {
                        debug!("skipping empty frame");
                        continue;
                    }
                    events.webcam(BASE64.encode(&frame));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
