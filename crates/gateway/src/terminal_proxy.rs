//! The Terminal Proxy (§4.8) — the second heart of the core.
//!
//! Upgrades the client's WebSocket, dials the container-local terminal
//! daemon at the session's allocated port negotiating the fixed
//! subprotocol, and shuttles frames in both directions until either side
//! closes. The bridge holds a Registry [`Handle`] for its entire
//! lifetime, which is what makes `delete` safe to call while a bridge is
//! live: the port and container cannot be reclaimed until this function
//! returns.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use portal_core::ids::SessionId;
use portal_registry::Handle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as DaemonMessage;
use tracing::{info, warn};

use crate::state::AppState;

/// The subprotocol every terminal daemon speaks. The proxy negotiates
/// this with the client and requires it when dialing the daemon.
pub const TERMINAL_SUBPROTOCOL: &str = "tty";

const PING_INTERVAL: Duration = Duration::from_secs(20);
const PONG_TIMEOUT: Duration = Duration::from_secs(45);

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Drive one bridge to completion, then release the Registry handle and
/// trigger teardown if `delete` was already requested and this was the
/// last outstanding reference.
///
/// `handle` must be the [`Handle`] acquired for `session_id` by the
/// caller before upgrading the connection; this function takes ownership
/// of its single release.
pub async fn run_bridge(
    state: Arc<AppState>,
    session_id: SessionId,
    port: u16,
    handle: Handle,
    client: WebSocket,
) {
    let daemon_url = format!("ws://127.0.0.1:{port}/");

    let request = match build_daemon_request(&daemon_url) {
        Ok(r) => r,
        Err(e) => {
            warn!(%session_id, error = %e, "failed to build terminal daemon request");
            release_and_maybe_teardown(&state, session_id, handle).await;
            return;
        }
    };

    let daemon_stream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(%session_id, port, error = %e, "failed to dial terminal daemon");
            let _ = client
                .close()
                .await;
            release_and_maybe_teardown(&state, session_id, handle).await;
            return;
        }
    };

    info!(%session_id, port, "terminal bridge established");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut daemon_tx, mut daemon_rx) = daemon_stream.split();

    let last_pong = Arc::new(AtomicI64::new(now_unix()));

    let client_to_daemon = {
        async move {
            let mut ping_ticker = tokio::time::interval(PING_INTERVAL);
            ping_ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    msg = client_rx.next() => {
                        let msg = match msg {
                            Some(Ok(m)) => m,
                            _ => break,
                        };
                        match to_daemon_message(msg) {
                            Some(forwarded) => {
                                if daemon_tx.send(forwarded).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = ping_ticker.tick() => {
                        if daemon_tx.send(DaemonMessage::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    };

    let last_pong_for_reader = last_pong.clone();
    let daemon_to_client = {
        async move {
            while let Some(msg) = daemon_rx.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };
                if matches!(msg, DaemonMessage::Pong(_)) {
                    last_pong_for_reader.store(now_unix(), Ordering::Relaxed);
                    continue;
                }
                match to_client_message(msg) {
                    Some(forwarded) => {
                        if client_tx.send(forwarded).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    };

    // Keepalive is sent to the daemon, not modeled as a direction of the
    // bridge — its job is purely to notice a daemon side that stopped
    // answering and end the bridge, even though neither forwarding task
    // would otherwise observe that on its own.
    let mut shutdown_rx = state.shutdown.subscribe();
    let watchdog = async move {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        loop {
            ticker.tick().await;
            let elapsed = now_unix() - last_pong.load(Ordering::Relaxed);
            if elapsed > PONG_TIMEOUT.as_secs() as i64 {
                warn!(%session_id, elapsed, "terminal daemon missed keepalive window");
                return;
            }
        }
    };

    tokio::pin!(client_to_daemon);
    tokio::pin!(daemon_to_client);
    tokio::pin!(watchdog);

    tokio::select! {
        _ = &mut client_to_daemon => {}
        _ = &mut daemon_to_client => {}
        _ = &mut watchdog => {}
        _ = shutdown_rx.recv() => {
            info!(%session_id, "terminal bridge ending for process shutdown");
        }
    }

    info!(%session_id, "terminal bridge ended");
    release_and_maybe_teardown(&state, session_id, handle).await;
}

async fn release_and_maybe_teardown(state: &Arc<AppState>, session_id: SessionId, handle: Handle) {
    let should_teardown = handle.release();
    state.registry.teardown_if_signalled(session_id, should_teardown).await;
}

fn build_daemon_request(
    url: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, anyhow::Error> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        TERMINAL_SUBPROTOCOL.parse().expect("static protocol name is a valid header value"),
    );
    Ok(request)
}

/// Preserve frame type (binary vs text) verbatim; translate close/ping
/// frames between the two WebSocket crates' message types. `None` means
/// "the connection is ending, stop forwarding."
fn to_daemon_message(msg: AxumMessage) -> Option<DaemonMessage> {
    match msg {
        AxumMessage::Text(t) => Some(DaemonMessage::Text(t.to_string().into())),
        AxumMessage::Binary(b) => Some(DaemonMessage::Binary(b)),
        AxumMessage::Ping(p) => Some(DaemonMessage::Ping(p)),
        AxumMessage::Pong(p) => Some(DaemonMessage::Pong(p)),
        AxumMessage::Close(_) => None,
    }
}

fn to_client_message(msg: DaemonMessage) -> Option<AxumMessage> {
    match msg {
        DaemonMessage::Text(t) => Some(AxumMessage::Text(t.as_str().to_string().into())),
        DaemonMessage::Binary(b) => Some(AxumMessage::Binary(b)),
        DaemonMessage::Ping(p) => Some(AxumMessage::Ping(p)),
        DaemonMessage::Pong(p) => Some(AxumMessage::Pong(p)),
        DaemonMessage::Close(frame) => {
            let _: Option<CloseFrame> = frame;
            None
        }
        DaemonMessage::Frame(_) => None,
    }
}
