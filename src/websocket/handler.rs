use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use serde::Deserialize;

use crate::metrics::{
    AUTH_FAILURES_TOTAL, CAPACITY_REJECTIONS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL,
    CONNECTIONS_OPENED_TOTAL, RATE_LIMIT_VIOLATIONS_TOTAL,
};
use crate::ratelimit::RateDecision;
use crate::server::AppState;
use crate::session::ConnectionHandle;

use super::frames::{ClientFrame, ServerFrame};

/// Grace period for flushing a final error frame before teardown.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub session_id: Option<String>,
}

/// WebSocket upgrade handler for `GET /ws?session_id=...`
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, query))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let session_id = match query.session_id.filter(|s| !s.is_empty()) {
        Some(id) => id,
        None => {
            return (StatusCode::BAD_REQUEST, "Missing session_id query parameter")
                .into_response();
        }
    };

    tracing::info!(session_id = %session_id, "WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Outcome of the authentication phase.
enum AuthPhase {
    Authenticated,
    /// Rejected; an error frame is already queued for the writer.
    Rejected,
    /// Client went away before authenticating.
    Disconnected,
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state), fields(session_id = %session_id))]
async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let connection_start = std::time::Instant::now();

    // Join the session with the capacity check
    let handle = match state.registry.join(&session_id) {
        Ok(h) => h,
        Err(e) => {
            state.stats.record_capacity_rejection();
            CAPACITY_REJECTIONS_TOTAL.inc();
            tracing::warn!(session_id = %session_id, error = %e, "Connection rejected");
            let (mut ws_sender, _) = socket.split();
            let error_frame = ServerFrame::error(&session_id, e.error_code(), e.to_string());
            if let Ok(json) = serde_json::to_string(&error_frame) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = handle.id;

    state.stats.record_connection_opened();
    CONNECTIONS_OPENED_TOTAL.inc();
    CONNECTIONS_ACTIVE.inc();

    tracing::info!(
        connection_id = %connection_id,
        session_id = %session_id,
        "WebSocket connection established"
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer task: drain the connection's outbound queue onto the socket.
    // Ends when the queue is closed and empty, or the socket breaks.
    let writer_handle = handle.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = writer_handle.outbound.pop().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize frame");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Authentication phase with a hard deadline
    let auth_timeout = Duration::from_secs(state.settings.auth.auth_timeout_secs);
    let auth_result = tokio::time::timeout(
        auth_timeout,
        await_auth(&mut ws_receiver, &state, &handle),
    )
    .await;

    let authenticated = match auth_result {
        Ok(AuthPhase::Authenticated) => true,
        Ok(AuthPhase::Rejected) | Ok(AuthPhase::Disconnected) => false,
        Err(_elapsed) => {
            state.stats.record_auth_failure();
            AUTH_FAILURES_TOTAL.inc();
            tracing::warn!(
                connection_id = %connection_id,
                session_id = %session_id,
                timeout_secs = auth_timeout.as_secs(),
                "Authentication deadline expired"
            );
            handle.enqueue(ServerFrame::error(
                &session_id,
                "authentication_timeout",
                "Authentication not completed in time",
            ));
            false
        }
    };

    let mut writer_done = false;
    if authenticated {
        // Main receive loop; ends on client close, socket error, or when
        // the writer dies (sweeper-forced close included).
        let recv_loop = async {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(msg) => {
                        if !process_message(msg, &state, &handle).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = recv_loop => {
                tracing::debug!(connection_id = %connection_id, "Receive loop completed");
            }
            _ = &mut send_task => {
                writer_done = true;
                tracing::debug!(connection_id = %connection_id, "Send task completed");
            }
        }
    }

    // Teardown: close the queue so the writer flushes pending frames
    // (rejection errors included), then unregister.
    handle.close();
    if !writer_done {
        let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task).await;
        send_task.abort();
    }

    state.registry.leave(&handle);
    state.limiter.remove(connection_id);
    handle.set_closed();

    CONNECTIONS_CLOSED_TOTAL.inc();
    CONNECTIONS_ACTIVE.dec();

    tracing::info!(
        connection_id = %connection_id,
        session_id = %session_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        messages_received = handle.messages_received(),
        "WebSocket connection closed"
    );
}

/// Read frames until the client authenticates or goes away. Pre-auth
/// frames other than `auth` get a `not_authenticated` error frame and do
/// not reset the deadline.
async fn await_auth(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> AuthPhase {
    while let Some(result) = ws_receiver.next().await {
        let msg = match result {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket receive error during auth");
                return AuthPhase::Disconnected;
            }
        };

        match msg {
            Message::Text(text) => {
                handle.touch();
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Auth {
                        api_key,
                        session_id,
                    }) => {
                        return finish_auth(state, handle, &api_key, &session_id).await;
                    }
                    Ok(_) => {
                        handle.enqueue(ServerFrame::error(
                            &handle.session_id,
                            "not_authenticated",
                            "Authenticate before sending other messages",
                        ));
                    }
                    Err(e) => {
                        handle.enqueue(ServerFrame::error(
                            &handle.session_id,
                            "validation_error",
                            e.to_string(),
                        ));
                    }
                }
            }
            Message::Ping(_) | Message::Pong(_) => {
                handle.touch();
            }
            Message::Binary(_) => {
                handle.enqueue(ServerFrame::error(
                    &handle.session_id,
                    "validation_error",
                    "Binary messages are not supported",
                ));
            }
            Message::Close(_) => return AuthPhase::Disconnected,
        }
    }
    AuthPhase::Disconnected
}

/// Validate the presented credentials and flip the connection state.
async fn finish_auth(
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    api_key: &str,
    claimed_session_id: &str,
) -> AuthPhase {
    if claimed_session_id != handle.session_id {
        state.stats.record_auth_failure();
        AUTH_FAILURES_TOTAL.inc();
        tracing::warn!(
            connection_id = %handle.id,
            session_id = %handle.session_id,
            claimed = %claimed_session_id,
            "Auth frame session_id mismatch"
        );
        handle.enqueue(ServerFrame::error(
            &handle.session_id,
            "authentication_failed",
            "session_id in auth frame does not match connection",
        ));
        return AuthPhase::Rejected;
    }

    if !state.validator.validate(api_key).await {
        state.stats.record_auth_failure();
        AUTH_FAILURES_TOTAL.inc();
        tracing::warn!(
            connection_id = %handle.id,
            session_id = %handle.session_id,
            "Authentication failed"
        );
        handle.enqueue(ServerFrame::error(
            &handle.session_id,
            "authentication_failed",
            "Invalid API key",
        ));
        return AuthPhase::Rejected;
    }

    if handle.set_authenticated() {
        tracing::info!(
            connection_id = %handle.id,
            session_id = %handle.session_id,
            "Connection authenticated"
        );
        state.message_router.flush_backlog(handle);
    }
    AuthPhase::Authenticated
}

/// Process a received WebSocket message post-auth.
/// Returns false if the connection should be closed.
async fn process_message(msg: Message, state: &AppState, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.touch();
            handle.record_message_received();

            // Rate limit before parsing; oversized floods shouldn't get
            // free JSON parsing either.
            match state.limiter.check(handle.id) {
                RateDecision::Allowed { .. } => {}
                RateDecision::Limited { violations } => {
                    state.stats.record_rate_limit_violation();
                    RATE_LIMIT_VIOLATIONS_TOTAL.inc();
                    tracing::warn!(
                        connection_id = %handle.id,
                        violations,
                        "Message rate limit exceeded"
                    );
                    handle.enqueue(ServerFrame::error(
                        &handle.session_id,
                        "rate_limited",
                        "Message rate limit exceeded",
                    ));
                    return true;
                }
                RateDecision::Escalate => {
                    state.stats.record_rate_limit_violation();
                    RATE_LIMIT_VIOLATIONS_TOTAL.inc();
                    tracing::warn!(
                        connection_id = %handle.id,
                        session_id = %handle.session_id,
                        "Repeated rate limit violations, closing connection"
                    );
                    handle.enqueue(ServerFrame::error(
                        &handle.session_id,
                        "rate_limited",
                        "Repeated rate limit violations, closing connection",
                    ));
                    return false;
                }
            }

            let frame: ClientFrame = match serde_json::from_str(&text) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse client frame");
                    handle.enqueue(ServerFrame::error(
                        &handle.session_id,
                        "validation_error",
                        e.to_string(),
                    ));
                    return true;
                }
            };

            handle_client_frame(frame, handle);
            true
        }
        Message::Binary(_) => {
            handle.enqueue(ServerFrame::error(
                &handle.session_id,
                "validation_error",
                "Binary messages are not supported",
            ));
            true
        }
        Message::Ping(_) => {
            // Axum replies with pong automatically; just record liveness
            handle.touch();
            true
        }
        Message::Pong(_) => {
            handle.touch();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

/// Dispatch a parsed client frame
fn handle_client_frame(frame: ClientFrame, handle: &Arc<ConnectionHandle>) {
    match frame {
        ClientFrame::Auth { .. } => {
            handle.enqueue(ServerFrame::error(
                &handle.session_id,
                "validation_error",
                "Already authenticated",
            ));
        }
        ClientFrame::Ping => {
            handle.enqueue(ServerFrame::pong(&handle.session_id));
        }
        ClientFrame::Pong => {
            // liveness already recorded by touch()
        }
        ClientFrame::Subscribe { types } => {
            handle.subscribe(&types);
            tracing::debug!(
                connection_id = %handle.id,
                types = ?types,
                "Subscription narrowed"
            );
        }
        ClientFrame::Unsubscribe { types } => {
            handle.unsubscribe(&types);
            tracing::debug!(
                connection_id = %handle.id,
                types = ?types,
                "Subscription reduced"
            );
        }
    }
}
