use axum::extract::ws::{CloseFrame, Message, WebSocket};
use conclave_core::{gate, AppState};
use conclave_models::gateway::*;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::OnceLock;
use tokio::time::{Duration, Instant};

use crate::session::Session;

const HEARTBEAT_INTERVAL_MS: u64 = 41250;
const HEARTBEAT_TIMEOUT_MS: u64 = 90000;
const IDENTIFY_TIMEOUT_SECS: u64 = 30;
const HEARTBEAT_ACK_MSG: &str = r#"{"op":11}"#;

const WS_MAX_GLOBAL_CONNECTIONS_DEFAULT: usize = 2_000;
const WS_MAX_CONNECTIONS_PER_USER_DEFAULT: usize = 5;

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);
static USER_CONNECTIONS: OnceLock<dashmap::DashMap<i64, usize>> = OnceLock::new();

fn user_connections() -> &'static dashmap::DashMap<i64, usize> {
    USER_CONNECTIONS.get_or_init(dashmap::DashMap::new)
}

#[derive(Clone, Copy)]
struct WsLimits {
    max_global_connections: usize,
    max_connections_per_user: usize,
}

static WS_LIMITS: OnceLock<WsLimits> = OnceLock::new();

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn ws_limits() -> WsLimits {
    *WS_LIMITS.get_or_init(|| WsLimits {
        max_global_connections: env_usize(
            "CONCLAVE_WS_MAX_CONNECTIONS",
            WS_MAX_GLOBAL_CONNECTIONS_DEFAULT,
        ),
        max_connections_per_user: env_usize(
            "CONCLAVE_WS_MAX_CONNECTIONS_PER_USER",
            WS_MAX_CONNECTIONS_PER_USER_DEFAULT,
        ),
    })
}

struct ConnectionGuard {
    user_id: Option<i64>,
    global_acquired: bool,
}

impl ConnectionGuard {
    fn new() -> Self {
        Self {
            user_id: None,
            global_acquired: false,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(user_id) = self.user_id.take() {
            if let Some(mut count) = user_connections().get_mut(&user_id) {
                if *count <= 1 {
                    drop(count);
                    user_connections().remove(&user_id);
                } else {
                    *count -= 1;
                }
            }
        }
        if self.global_acquired {
            ACTIVE_CONNECTIONS.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }
}

fn try_acquire_global_connection_slot() -> bool {
    let limits = ws_limits();
    let mut current = ACTIVE_CONNECTIONS.load(AtomicOrdering::SeqCst);
    loop {
        if current >= limits.max_global_connections {
            return false;
        }
        match ACTIVE_CONNECTIONS.compare_exchange(
            current,
            current + 1,
            AtomicOrdering::SeqCst,
            AtomicOrdering::SeqCst,
        ) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
}

fn try_acquire_user_connection_slot(user_id: i64) -> bool {
    let limits = ws_limits();
    let mut count = user_connections().entry(user_id).or_insert(0);
    if *count >= limits.max_connections_per_user {
        return false;
    }
    *count += 1;
    true
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send_text(sender: &mut WsSender, payload: String) -> Result<(), ()> {
    sender.send(Message::Text(payload.into())).await.map_err(|_| ())
}

async fn send_close(sender: &mut WsSender, code: u16, reason: &str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn send_dispatch(
    sender: &mut WsSender,
    session: &mut Session,
    event_type: &str,
    payload: Value,
) -> Result<(), ()> {
    let seq = session.next_sequence();
    let msg = json!({
        "op": OP_DISPATCH,
        "t": event_type,
        "s": seq,
        "d": payload,
    });
    send_text(sender, msg.to_string()).await
}

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let mut connection_guard = ConnectionGuard::new();
    if !try_acquire_global_connection_slot() {
        let (mut sender, _) = socket.split();
        send_close(&mut sender, 1013, "Gateway is at connection capacity").await;
        return;
    }
    connection_guard.global_acquired = true;

    let (mut sender, mut receiver) = socket.split();

    let hello = json!({
        "op": OP_HELLO,
        "d": { "heartbeat_interval": HEARTBEAT_INTERVAL_MS },
    });
    if send_text(&mut sender, hello.to_string()).await.is_err() {
        return;
    }

    // Wait for IDENTIFY; anything else before it is a protocol error.
    let session = match tokio::time::timeout(
        Duration::from_secs(IDENTIFY_TIMEOUT_SECS),
        wait_for_identify(&mut receiver, &state),
    )
    .await
    {
        Ok(Some(session)) => session,
        _ => {
            let _ = send_text(
                &mut sender,
                json!({ "op": OP_INVALID_SESSION, "d": false }).to_string(),
            )
            .await;
            return;
        }
    };

    if !try_acquire_user_connection_slot(session.user_id) {
        send_close(
            &mut sender,
            1008,
            "Too many concurrent connections for this user",
        )
        .await;
        return;
    }
    connection_guard.user_id = Some(session.user_id);

    let mut session = session;
    let ready = json!({
        "user_id": session.user_id.to_string(),
        "connection_id": session.connection_id,
    });
    if send_dispatch(&mut sender, &mut session, EVENT_READY, ready)
        .await
        .is_err()
    {
        return;
    }

    tracing::debug!(
        user_id = session.user_id,
        connection_id = %session.connection_id,
        "gateway connection established"
    );

    let mut event_rx = state.event_bus.subscribe();
    let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
    let heartbeat_sleep = tokio::time::sleep(heartbeat_timeout);
    tokio::pin!(heartbeat_sleep);

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<GatewayMessage>(&text) else {
                            continue;
                        };
                        if frame.op == OP_HEARTBEAT {
                            heartbeat_sleep
                                .as_mut()
                                .reset(Instant::now() + heartbeat_timeout);
                        }
                        if handle_client_message(&frame, &mut sender, &mut session, &state)
                            .await
                            .is_err()
                        {
                            break "websocket send failed".to_string();
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        break "client close frame".to_string();
                    }
                    Some(Err(err)) => {
                        break format!("websocket receive error: {err}");
                    }
                    None => {
                        break "websocket stream ended".to_string();
                    }
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if !session.should_receive_event(
                            event.session_id,
                            event.target_user_ids.as_deref(),
                        ) {
                            continue;
                        }

                        // A removal for this user revokes the subscription;
                        // the event itself is still delivered so the client
                        // can show why the stream stopped.
                        revoke_subscription_if_removed(&mut session, &event.event_type, &event.payload);

                        let event_type = event.event_type.clone();
                        if send_dispatch(&mut sender, &mut session, &event_type, event.payload)
                            .await
                            .is_err()
                        {
                            break "websocket send failed".to_string();
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // At-most-once delivery: the client catches up over REST.
                        tracing::warn!(
                            user_id = session.user_id,
                            skipped,
                            "gateway receiver lagged, events dropped"
                        );
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break "event bus closed".to_string();
                    }
                }
            }
            _ = &mut heartbeat_sleep => {
                send_close(&mut sender, 4009, "Heartbeat timed out").await;
                break "heartbeat timeout".to_string();
            }
            _ = state.shutdown.notified() => {
                send_close(&mut sender, 1001, "Server shutting down").await;
                break "server shutdown".to_string();
            }
        }
    };

    tracing::debug!(
        user_id = session.user_id,
        connection_id = %session.connection_id,
        reason = %disconnect_reason,
        "gateway connection closed"
    );
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Option<Session> {
    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<GatewayMessage>(&text) else {
            continue;
        };
        if frame.op != OP_IDENTIFY {
            continue;
        }
        let token = frame
            .d
            .as_ref()
            .and_then(|d| d.get("token"))
            .and_then(|v| v.as_str())?;
        let claims = conclave_core::auth::validate_token(token, &state.config.jwt_secret).ok()?;
        return Some(Session::new(claims.sub));
    }
    None
}

async fn handle_client_message(
    frame: &GatewayMessage,
    sender: &mut WsSender,
    session: &mut Session,
    state: &AppState,
) -> Result<(), ()> {
    match frame.op {
        OP_HEARTBEAT => send_text(sender, HEARTBEAT_ACK_MSG.to_string()).await,
        OP_SUBSCRIBE => {
            let Some(session_id) = payload_session_id(frame.d.as_ref()) else {
                return Ok(());
            };
            // The gate is evaluated fresh on every subscribe; a user removed
            // since their last connection is denied here.
            let allowed = gate::can_subscribe(&state.db, session.user_id, session_id)
                .await
                .unwrap_or(false);
            if allowed {
                session.subscribe(session_id);
                send_dispatch(
                    sender,
                    session,
                    EVENT_SUBSCRIBED,
                    json!({ "session_id": session_id.to_string() }),
                )
                .await
            } else {
                send_dispatch(
                    sender,
                    session,
                    EVENT_SUBSCRIBE_DENIED,
                    json!({ "session_id": session_id.to_string() }),
                )
                .await
            }
        }
        OP_UNSUBSCRIBE => {
            let Some(session_id) = payload_session_id(frame.d.as_ref()) else {
                return Ok(());
            };
            session.unsubscribe(session_id);
            send_dispatch(
                sender,
                session,
                EVENT_UNSUBSCRIBED,
                json!({ "session_id": session_id.to_string() }),
            )
            .await
        }
        OP_IDENTIFY => Ok(()),
        other => {
            tracing::debug!(user_id = session.user_id, opcode = other, "unknown gateway opcode");
            Ok(())
        }
    }
}

fn payload_session_id(d: Option<&Value>) -> Option<i64> {
    match d?.get("session_id") {
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    }
}

fn revoke_subscription_if_removed(session: &mut Session, event_type: &str, payload: &Value) {
    if event_type != EVENT_PARTICIPANT_UPDATED {
        return;
    }
    let removed_user = payload
        .get("user_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<i64>().ok());
    let status = payload.get("status").and_then(|v| v.as_str());
    if removed_user == Some(session.user_id) && status == Some("removed") {
        if let Some(sid) = payload
            .get("session_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i64>().ok())
        {
            session.unsubscribe(sid);
        }
    }
}
