//! Connection handlers for the murmur server.
//!
//! This module handles the HTTP surface, the upgrade checks, and the
//! lifecycle of chat and notification sockets.

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::StreamExt;
use murmur_core::PresenceTransition;
use murmur_protocol::{PresenceStatus, ServerEvent, UserId};
use murmur_transport::{
    websocket::{self, Encoding, Inbound},
    ConnectionHandle,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{extract_token, AuthError};
use crate::config::Config;
use crate::dispatch::{self, ConnectionContext, Flow};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::state::AppState;
use crate::store::{Conversation, StoreError};

/// How long teardown waits for the writer to flush before aborting it.
const WRITER_DRAIN: Duration = Duration::from_secs(5);

/// Query parameters accepted on both socket endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
    #[serde(default)]
    pub encoding: Encoding,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve(listener, config).await
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server stops with
/// an I/O error.
pub async fn serve(listener: TcpListener, config: Config) -> Result<()> {
    config.validate()?;
    let (state, transitions) = AppState::from_config(config);
    spawn_presence_fanout(state.clone(), transitions);

    let addr = listener.local_addr()?;
    info!("murmur listening on {}", addr);
    info!(
        "Chat endpoint: ws://{}{}/:conversation_id",
        addr, state.config.transport.chat_path
    );
    info!(
        "Notification endpoint: ws://{}{}",
        addr, state.config.transport.notifications_path
    );

    let app = build_router(state);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let chat_route = format!(
        "{}/:conversation_id",
        state.config.transport.chat_path.trim_end_matches('/')
    );

    Router::new()
        .route(&chat_route, get(chat_ws_handler))
        .route(&state.config.transport.notifications_path, get(notifications_ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Resolve the caller, or the 401 response to send instead.
async fn authorize(
    state: &AppState,
    params: &ConnectParams,
    headers: &HeaderMap,
) -> Result<UserId, Response> {
    let result = match extract_token(params.token.as_deref(), headers) {
        Ok(token) => state.auth.authenticate(&token).await,
        Err(e) => Err(e),
    };

    result.map_err(|e: AuthError| {
        debug!(error = %e, "Rejected upgrade");
        (StatusCode::UNAUTHORIZED, e.to_string()).into_response()
    })
}

/// Chat socket upgrade handler.
///
/// Authentication and conversation access are checked before the upgrade,
/// so a rejected caller never enters the registry.
async fn chat_ws_handler(
    ws: WebSocketUpgrade,
    Path(raw_id): Path<String>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user = match authorize(&state, &params, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let Ok(conversation_id) = Uuid::parse_str(&raw_id) else {
        return (StatusCode::BAD_REQUEST, "invalid conversation id").into_response();
    };

    let conversation = match state.store.get_conversation(conversation_id).await {
        Ok(conversation) => conversation,
        Err(StoreError::NotFound(_)) => {
            return (StatusCode::NOT_FOUND, "conversation not found").into_response()
        }
        Err(e) => {
            error!(error = %e, "Conversation lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if !state.store.user_can_access(&conversation, user) {
        warn!(%user, conversation = %conversation_id, "Access denied");
        return (StatusCode::FORBIDDEN, "not a participant").into_response();
    }

    let encoding = params.encoding;
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_chat_socket(socket, state, user, conversation, encoding))
}

/// Notification socket upgrade handler.
async fn notifications_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user = match authorize(&state, &params, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let encoding = params.encoding;
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_notification_socket(socket, state, user, encoding))
}

/// Drive a chat connection until it closes.
async fn handle_chat_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    user: UserId,
    conversation: Conversation,
    encoding: Encoding,
) {
    let _metrics_guard = ConnectionMetricsGuard::new("chat");

    let (sink, mut stream) = socket.split();
    let (handle, rx) = ConnectionHandle::channel(user, state.config.limits.outbound_buffer);
    let connection = handle.id();
    let mut writer = tokio::spawn(websocket::write_loop(
        sink,
        rx,
        encoding,
        handle.close_signal(),
        connection,
    ));

    // Dropping the context releases the admission on every exit path.
    let mut ctx = ConnectionContext::enter(state.hub.admit(handle.clone()), conversation);
    info!(%connection, %user, room = %ctx.room(), "Chat connection opened");
    metrics::record_registry(&state.hub.stats(), state.hub.broadcaster().pruned_count());

    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let timeout = state.config.heartbeat_timeout();
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = handle.closed() => {
                debug!(%connection, "Closed by server");
                break;
            }

            _ = heartbeat.tick() => {
                if last_inbound.elapsed() > timeout {
                    warn!(%connection, "Heartbeat timeout");
                    break;
                }
                if handle.ping(Vec::new()).is_err() {
                    break;
                }
            }

            msg = stream.next() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                last_inbound = Instant::now();

                match websocket::decode(&msg) {
                    Inbound::Event(frame) => {
                        if dispatch::handle_frame(&state, &mut ctx, frame).await == Flow::Close {
                            break;
                        }
                    }
                    Inbound::Close => break,
                    Inbound::Pong | Inbound::Ignored => {}
                }
            }
        }
    }

    drop(ctx);
    finish(&handle, &mut writer).await;
    metrics::record_registry(&state.hub.stats(), state.hub.broadcaster().pruned_count());
    info!(%connection, %user, "Chat connection closed");
}

/// Drive a notification connection until it closes. Inbound events are
/// ignored.
async fn handle_notification_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    user: UserId,
    encoding: Encoding,
) {
    let _metrics_guard = ConnectionMetricsGuard::new("notifications");

    let (sink, mut stream) = socket.split();
    let (handle, rx) = ConnectionHandle::channel(user, state.config.limits.outbound_buffer);
    let connection = handle.id();
    let mut writer = tokio::spawn(websocket::write_loop(
        sink,
        rx,
        encoding,
        handle.close_signal(),
        connection,
    ));

    let subscription = state.hub.subscribe_notifications(handle.clone());
    info!(%connection, %user, "Notification connection opened");

    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let timeout = state.config.heartbeat_timeout();
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = handle.closed() => break,

            _ = heartbeat.tick() => {
                if last_inbound.elapsed() > timeout || handle.ping(Vec::new()).is_err() {
                    break;
                }
            }

            msg = stream.next() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                last_inbound = Instant::now();
                if matches!(websocket::decode(&msg), Inbound::Close) {
                    break;
                }
            }
        }
    }

    drop(subscription);
    finish(&handle, &mut writer).await;
    info!(%connection, %user, "Notification connection closed");
}

/// Ask the writer to close the socket and wait for it.
async fn finish(handle: &ConnectionHandle, writer: &mut JoinHandle<()>) {
    handle.close();
    if tokio::time::timeout(WRITER_DRAIN, &mut *writer).await.is_err() {
        warn!(connection = %handle.id(), "Writer did not drain, aborting");
        writer.abort();
    }
}

/// Forward confirmed presence transitions to every other user.
pub fn spawn_presence_fanout(
    state: Arc<AppState>,
    mut transitions: mpsc::UnboundedReceiver<PresenceTransition>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(transition) = transitions.recv().await {
            publish_presence(&state, transition).await;
        }
        debug!("Presence fan-out stopped");
    })
}

async fn publish_presence(state: &AppState, transition: PresenceTransition) {
    let PresenceTransition {
        user_id,
        status,
        at,
    } = transition;

    let last_seen = match status {
        PresenceStatus::Online => {
            metrics::record_presence("online");
            None
        }
        PresenceStatus::Offline => {
            metrics::record_presence("offline");
            if let Err(e) = state.store.touch_last_seen(user_id, at).await {
                warn!(user = %user_id, error = %e, "Failed to record last seen");
            }
            Some(at)
        }
    };

    let delivered = state.hub.broadcaster().to_all_except(
        user_id,
        ServerEvent::Presence {
            user_id,
            status,
            last_seen,
        },
    );
    metrics::record_deliveries(delivered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenVerifier;
    use crate::store::MemoryStore;
    use crate::testing::Fixture;
    use std::net::SocketAddr;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    struct LiveServer {
        state: Arc<AppState>,
        addr: SocketAddr,
        conversation: Uuid,
        alice: UserId,
    }

    impl LiveServer {
        async fn start(config: Config) -> Self {
            let alice = Uuid::new_v4();
            let bob = Uuid::new_v4();
            let conversation = Conversation::new(Uuid::new_v4(), alice, bob);
            let store = MemoryStore::with_conversations([conversation.clone()]);
            let auth = StaticTokenVerifier::default()
                .with_token("alice", alice)
                .with_token("bob", bob);
            let (state, transitions) = AppState::new(config, Arc::new(store), Arc::new(auth));
            spawn_presence_fanout(state.clone(), transitions);

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = build_router(state.clone());
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

            Self {
                state,
                addr,
                conversation: conversation.id,
                alice,
            }
        }

        /// Open alice's chat socket and wait until the server registered it.
        async fn connect_alice(&self) -> Client {
            let url = format!("ws://{}/ws/chat/{}?token=alice", self.addr, self.conversation);
            let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
            eventually(|| self.state.hub.registry().is_user_online(self.alice)).await;
            socket
        }

        /// Tasks holding the state: router, presence fan-out, this test, and
        /// one per live socket.
        fn holders(&self) -> usize {
            Arc::strong_count(&self.state)
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Read until the server closes the socket.
    async fn expect_closed(socket: &mut Client) {
        loop {
            match tokio::time::timeout(Duration::from_secs(3), socket.next()).await {
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return,
                Ok(Some(Ok(_))) => continue,
                Err(_) => panic!("socket was not closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_silent_connection_is_closed_after_heartbeat_timeout() {
        let mut config = Config::default();
        config.heartbeat.interval_ms = 50;
        config.heartbeat.timeout_ms = 150;
        config.presence.grace_period_ms = 50;
        let server = LiveServer::start(config).await;
        let idle = server.holders();

        // The client never polls, so pings go unanswered.
        let mut alice = server.connect_alice().await;

        eventually(|| !server.state.hub.registry().is_user_online(server.alice)).await;
        eventually(|| server.holders() == idle).await;
        eventually(|| !server.state.hub.presence().is_online(server.alice)).await;
        assert_eq!(server.state.hub.stats().rooms, 0);
        expect_closed(&mut alice).await;
    }

    #[tokio::test]
    async fn test_pruned_connection_stops_its_receive_loop() {
        let server = LiveServer::start(Config::default()).await;
        let idle = server.holders();

        let mut alice = server.connect_alice().await;
        eventually(|| server.holders() == idle + 1).await;

        let handle = server.state.hub.registry().user_connections(server.alice)[0].clone();
        server.state.hub.broadcaster().prune(&handle);
        drop(handle);

        // The socket is still open on the client side; only the server-side
        // close signal can end the loop.
        eventually(|| server.holders() == idle).await;
        assert_eq!(server.state.hub.stats(), Default::default());
        expect_closed(&mut alice).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_fanout_records_last_seen() {
        let fixture = Fixture::new();
        let (state, transitions) = AppState::new(
            Config::default(),
            fixture.store.clone(),
            Arc::new(crate::auth::StaticTokenVerifier::default()),
        );
        spawn_presence_fanout(state.clone(), transitions);

        let (bob_handle, mut bob_rx) = ConnectionHandle::channel(fixture.bob, 16);
        let _bob = state.hub.admit(bob_handle);

        let (alice_handle, _alice_rx) = ConnectionHandle::channel(fixture.alice, 16);
        let alice = state.hub.admit(alice_handle);
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(alice);
        tokio::time::sleep(Duration::from_secs(5)).await;

        let mut statuses = Vec::new();
        while let Ok(murmur_transport::Outbound::Event(env)) = bob_rx.try_recv() {
            if let ServerEvent::Presence {
                user_id, status, last_seen, ..
            } = &env.event
            {
                assert_eq!(*user_id, fixture.alice);
                statuses.push((*status, last_seen.is_some()));
            }
        }
        assert_eq!(
            statuses,
            vec![(PresenceStatus::Online, false), (PresenceStatus::Offline, true)]
        );
        assert!(fixture.store.last_seen(fixture.alice).await.is_some());
    }

    #[test]
    fn test_connect_params_defaults() {
        let params: ConnectParams = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(params.token.is_none());
        assert_eq!(params.encoding, Encoding::Json);

        let params: ConnectParams = serde_json::from_value(serde_json::json!({
            "token": "t",
            "encoding": "msgpack"
        }))
        .unwrap();
        assert_eq!(params.token.as_deref(), Some("t"));
        assert_eq!(params.encoding, Encoding::MessagePack);
    }
}
