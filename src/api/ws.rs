// =============================================================================
// WebSocket Handler — push-based snapshot subscription
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. The current snapshot immediately on subscribe.
//   2. Every snapshot the scheduler publishes from then on.
//
// Limits: at most 5 concurrent connections per client IP, at most 30
// client-to-server messages per minute, and no outbound document larger
// than 1 MB (oversized documents are dropped with a warning, never sent
// truncated).
// =============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::clock::Clock;

use super::ApiState;

/// Outbound document size cap, bytes.
const MAX_MESSAGE_BYTES: usize = 1_000_000;

/// Client-to-server message budget per rolling minute.
const CLIENT_MESSAGES_PER_MINUTE: u32 = 30;

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let Some(guard) = state.try_connect(addr.ip()) else {
        warn!(ip = %addr.ip(), "WebSocket rejected: connection limit reached");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            "connection limit reached for this client",
        )
            .into_response();
    };

    info!(ip = %addr.ip(), "WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, guard))
        .into_response()
}

/// Manages one subscription lifecycle: initial snapshot, push loop, and the
/// inbound rate limit.
async fn handle_ws_connection(
    socket: WebSocket,
    state: Arc<ApiState>,
    _guard: super::ConnectionGuard,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut snapshots = state.scheduler.subscribe();

    // Initial snapshot on subscribe.
    let initial = state.assembler.build();
    if send_document(&mut sender, &initial).await.is_err() {
        return;
    }

    let mut rate = ClientRateLimit::new(Clock::system());

    loop {
        tokio::select! {
            // ── Push loop: forward every published snapshot ─────────────
            published = snapshots.recv() => {
                match published {
                    Ok(snapshot) => {
                        if send_document(&mut sender, snapshot.as_ref()).await.is_err() {
                            debug!("WebSocket send failed — disconnecting");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // A slow consumer only ever misses intermediate
                        // documents; the next one is always complete.
                        debug!(skipped, "WebSocket consumer lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            // ── Recv loop: enforce the inbound message budget ───────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(_))) => {
                        if !rate.allow() {
                            warn!("client exceeded message rate limit — disconnecting");
                            break;
                        }
                        // Inbound text is treated as a heartbeat.
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        if !rate.allow() {
                            warn!("client exceeded message rate limit — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed by client");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket connection closed — slot released");
}

/// Serialize and send one document, enforcing the size cap.
async fn send_document<S, T>(sender: &mut S, document: &T) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
    T: serde::Serialize,
{
    let json = match serde_json::to_string(document) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialise snapshot");
            return Ok(()); // not a transport error
        }
    };

    if json.len() > MAX_MESSAGE_BYTES {
        warn!(bytes = json.len(), "snapshot exceeds message cap — dropped");
        return Ok(());
    }

    sender.send(Message::Text(json)).await.map_err(|_| ())
}

/// Rolling-minute inbound message budget.
struct ClientRateLimit {
    clock: Clock,
    window_start_ms: i64,
    count: u32,
}

impl ClientRateLimit {
    fn new(clock: Clock) -> Self {
        let window_start_ms = clock.now_ms();
        Self {
            clock,
            window_start_ms,
            count: 0,
        }
    }

    /// Whether one more client message fits the budget.
    fn allow(&mut self) -> bool {
        let now = self.clock.now_ms();
        if now - self.window_start_ms >= 60_000 {
            self.window_start_ms = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= CLIENT_MESSAGES_PER_MINUTE
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_allows_thirty_per_minute() {
        let clock = Clock::manual(0);
        let mut limit = ClientRateLimit::new(clock.clone());

        for _ in 0..CLIENT_MESSAGES_PER_MINUTE {
            assert!(limit.allow());
        }
        assert!(!limit.allow());

        // A fresh minute resets the budget.
        clock.advance_ms(60_000);
        assert!(limit.allow());
    }

    #[test]
    fn rate_limit_window_is_rolling_from_reset() {
        let clock = Clock::manual(0);
        let mut limit = ClientRateLimit::new(clock.clone());

        clock.advance_ms(59_999);
        for _ in 0..CLIENT_MESSAGES_PER_MINUTE {
            limit.allow();
        }
        assert!(!limit.allow());

        clock.advance_ms(2);
        assert!(limit.allow());
    }
}
