// ============================
// reflights-backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
use crate::error::AppError;
use crate::meet_actor::MeetHandle;
use crate::metrics as keys;
use crate::registry::ConnectionId;
use crate::validation::validate_meet_name;
use crate::AppState;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use reflights_common::{parse_client_message, ProtocolError, ServerMessage};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, trace, warn, Instrument};
use uuid::Uuid;

/// Longest a single frame write may take before the peer is considered gone
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Query string of the WebSocket endpoint
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(rename = "meetName")]
    pub meet_name: Option<String>,
    /// Identity supplied by the auth layer in front of the hub
    pub user: Option<String>,
}

/// Create the router: the WebSocket endpoint (under both paths) and a liveness probe
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/referee-updates", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "meets": state.meets.len(),
    }))
}

/// Handler for WebSocket connections
///
/// The meet name is checked before the upgrade so a bad name gets a plain
/// HTTP 400 instead of a socket that is closed straight away.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let meet_name = match params.meet_name.as_deref().map(validate_meet_name) {
        Some(Ok(name)) => name.to_string(),
        Some(Err(e)) => return e.into_response(),
        None => return AppError::InvalidMeetName("meetName is required".to_string()).into_response(),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let handle = match state.meets.get_or_create(&meet_name) {
        Ok(handle) => handle,
        Err(e) => return e.into_response(),
    };

    counter!(keys::WS_CONNECTION).increment(1);
    let conn = Uuid::new_v4();
    let user = params.user;
    ws.max_message_size(state.settings.max_message_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state, handle, meet_name, conn, user))
}

#[instrument(name = "ws_connection", skip_all, fields(meet = %meet_name, conn = %conn))]
async fn handle_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    handle: MeetHandle,
    meet_name: String,
    conn: ConnectionId,
    user: Option<String>,
) {
    let (tx, rx) = mpsc::channel::<ServerMessage>(state.settings.send_buffer);

    let handle = match attach_to_meet(&state, handle, &meet_name, conn, tx, user) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "could not attach to meet");
            return;
        },
    };

    info!("client connected");
    gauge!(keys::WS_ACTIVE).increment(1.0);

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(
        write_loop(sink, rx, state.settings.ping_interval()).instrument(tracing::Span::current()),
    );
    let mut reader = tokio::spawn(
        read_loop(stream, handle.clone(), conn, state.settings.pong_wait())
            .instrument(tracing::Span::current()),
    );

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    handle.detach(conn);
    info!("client disconnected");
    counter!(keys::WS_DISCONNECTION).increment(1);
    gauge!(keys::WS_ACTIVE).decrement(1.0);
}

/// Attach the connection's queue to the meet. If the meet expired between
/// lookup and attach, a fresh actor takes over.
fn attach_to_meet(
    state: &AppState,
    handle: MeetHandle,
    meet_name: &str,
    conn: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
    user: Option<String>,
) -> Result<MeetHandle, AppError> {
    if handle.attach(conn, tx.clone(), user.clone()).is_ok() {
        return Ok(handle);
    }
    let fresh = state.meets.get_or_create(meet_name)?;
    fresh.attach(conn, tx, user)?;
    Ok(fresh)
}

/// Drain the connection's queue into the socket, pinging while idle.
/// Ends with a close frame once the meet drops the connection.
async fn write_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMessage>,
    ping_every: Duration,
) {
    let mut ping = interval_at(Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let frame = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!(error = %e, "failed to serialize server message");
                        continue;
                    },
                },
                None => {
                    let _ = timeout(WRITE_TIMEOUT, sink.send(Message::Close(None))).await;
                    break;
                },
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        match timeout(WRITE_TIMEOUT, sink.send(frame)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                debug!(error = %e, "socket write failed");
                break;
            },
            Err(_) => {
                warn!("socket write timed out");
                break;
            },
        }
    }
}

/// Parse inbound frames and forward them to the meet actor.
///
/// A peer that sends nothing for `pong_wait` (not even a pong to our pings)
/// is treated as gone.
async fn read_loop(
    mut stream: futures_util::stream::SplitStream<WebSocket>,
    handle: MeetHandle,
    conn: ConnectionId,
    pong_wait: Duration,
) {
    loop {
        let frame = match timeout(pong_wait, stream.next()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(_) => {
                warn!(?pong_wait, "peer went silent, closing connection");
                break;
            },
        };

        match frame {
            Ok(Message::Text(text)) => match parse_client_message(text.as_str()) {
                Ok(msg) => {
                    trace!(action = msg.action(), "client message");
                    if handle.send_client(conn, msg).is_err() {
                        break;
                    }
                },
                Err(ProtocolError::ServerEcho(action)) => {
                    trace!(%action, "ignoring echoed server message");
                },
                Err(e) => {
                    let err = AppError::from(e);
                    debug!(error = %err, code = err.error_code(), "ignoring malformed message");
                    counter!(keys::WS_MESSAGE_REJECTED).increment(1);
                },
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {},
            Err(e) => {
                debug!(error = %e, "socket read failed");
                break;
            },
        }
    }
}
