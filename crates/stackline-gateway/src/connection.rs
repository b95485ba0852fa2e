use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use stackline_types::api::Claims;
use stackline_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may take to send `identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Validate a session token and return its claims.
pub fn verify_token(jwt_secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Answer a socket upgrade request. A `token` from the query string is
/// checked before upgrading and a bad one gets 401; without one the socket
/// must send `identify` within the identify window.
pub fn upgrade(
    ws: WebSocketUpgrade,
    dispatcher: Dispatcher,
    jwt_secret: &str,
    token: Option<&str>,
) -> Response {
    upgrade_with_timeout(ws, dispatcher, jwt_secret, token, IDENTIFY_TIMEOUT)
}

fn upgrade_with_timeout(
    ws: WebSocketUpgrade,
    dispatcher: Dispatcher,
    jwt_secret: &str,
    token: Option<&str>,
    identify_timeout: Duration,
) -> Response {
    match token {
        Some(token) => match verify_token(jwt_secret, token) {
            Some(claims) => ws
                .on_upgrade(move |socket| handle_connection_authenticated(socket, dispatcher, claims))
                .into_response(),
            None => (StatusCode::UNAUTHORIZED, "Invalid or expired token").into_response(),
        },
        None => {
            let jwt_secret = jwt_secret.to_string();
            ws.on_upgrade(move |socket| {
                handle_connection(socket, dispatcher, jwt_secret, identify_timeout)
            })
            .into_response()
        }
    }
}

/// Handle a socket whose token was already checked at the HTTP upgrade.
async fn handle_connection_authenticated(socket: WebSocket, dispatcher: Dispatcher, claims: Claims) {
    let (sender, receiver) = socket.split();
    run_connection_loop(sender, receiver, dispatcher, claims).await;
}

/// Handle a socket opened without a token: wait for an `identify` command first.
async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    jwt_secret: String,
    identify_timeout: Duration,
) {
    let (sender, mut receiver) = socket.split();

    let claims = match wait_for_identify(&mut receiver, &jwt_secret, identify_timeout).await {
        Some(claims) => claims,
        None => {
            warn!("Socket client failed to identify, closing");
            return;
        }
    };

    run_connection_loop(sender, receiver, dispatcher, claims).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    claims: Claims,
) {
    let user_id = claims.sub;

    // Subscribe before Ready so nothing emitted after Ready is missed
    let mut broadcast_rx = dispatcher.subscribe();

    let ready = GatewayEvent::Ready {
        user_id,
        role: claims.role,
    };
    let ready = match serde_json::to_string(&ready) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize ready event: {}", e);
            return;
        }
    };
    if sender.send(Message::Text(ready.into())).await.is_err() {
        return;
    }

    let conn_id = dispatcher.register(user_id, claims.role).await;
    info!("{} ({}, {}) connected to gateway", claims.email, user_id, claims.role);

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let frame = match result {
                        Ok(frame) => frame,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if sender.send(Message::Text(frame.json.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read from client: only keepalives matter, the channel is broadcast-only
    let email = claims.email.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Ping) => pong_flag_recv.store(true, Ordering::Release),
                    Ok(GatewayCommand::Identify { .. }) => {} // Already handled
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            email,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(conn_id).await;
    info!("{} ({}) disconnected from gateway", claims.email, user_id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
    identify_timeout: Duration,
) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return verify_token(jwt_secret, &token);
                }
            }
        }
        None
    };

    tokio::time::timeout(identify_timeout, identify).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::Router;
    use axum::extract::Query;
    use axum::routing::get;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use stackline_types::models::Role;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::{self, Message as ClientMessage};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
    use uuid::Uuid;

    const SECRET: &str = "gateway-test-secret";

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn issue(secret: &str, exp_offset: i64) -> (Uuid, String) {
        let sub = Uuid::new_v4();
        let claims = Claims {
            sub,
            email: "ops@example.com".into(),
            role: Role::Admin,
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (sub, token)
    }

    #[test]
    fn verify_accepts_valid_token() {
        let (sub, token) = issue("secret", 3600);
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, sub);
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn verify_rejects_wrong_secret_and_expired() {
        let (_, token) = issue("secret", 3600);
        assert!(verify_token("other", &token).is_none());

        // Beyond the default 60s leeway
        let (_, expired) = issue("secret", -3600);
        assert!(verify_token("secret", &expired).is_none());
        assert!(verify_token("secret", "garbage").is_none());
    }

    /// Serve the upgrade handler on an ephemeral port. Returns the socket URL.
    async fn serve(identify_timeout: Duration) -> (String, Dispatcher) {
        let dispatcher = Dispatcher::new();
        let handler_dispatcher = dispatcher.clone();
        let app = Router::new().route(
            "/socket",
            get(move |ws: WebSocketUpgrade, Query(query): Query<HashMap<String, String>>| {
                let dispatcher = handler_dispatcher.clone();
                async move {
                    upgrade_with_timeout(
                        ws,
                        dispatcher,
                        SECRET,
                        query.get("token").map(String::as_str),
                        identify_timeout,
                    )
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("ws://{}/socket", addr), dispatcher)
    }

    async fn next_event(client: &mut Client) -> serde_json::Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("no frame within 5s")
                .expect("socket closed")
                .unwrap();
            if let ClientMessage::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn wait_for_connected(dispatcher: &Dispatcher, expected: usize) {
        for _ in 0..100 {
            if dispatcher.connected().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {} connected clients", expected);
    }

    /// True once the server has dropped the socket, whichever way the
    /// client observes it.
    async fn is_closed(client: &mut Client) -> bool {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(ClientMessage::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    #[tokio::test]
    async fn query_token_gets_ready_then_broadcasts() {
        let (url, dispatcher) = serve(IDENTIFY_TIMEOUT).await;
        let (sub, token) = issue(SECRET, 3600);

        let (mut client, _) = connect_async(format!("{}?token={}", url, token)).await.unwrap();
        let ready = next_event(&mut client).await;
        assert_eq!(ready["event"], "ready");
        assert_eq!(ready["data"]["user_id"], sub.to_string());
        assert_eq!(ready["data"]["role"], serde_json::to_value(Role::Admin).unwrap());
        wait_for_connected(&dispatcher, 1).await;

        let id = Uuid::new_v4();
        assert_eq!(dispatcher.broadcast(GatewayEvent::InvoiceDeleted { id }), 1);
        let event = next_event(&mut client).await;
        assert_eq!(event["event"], "invoice_deleted");
        assert_eq!(event["data"]["id"], id.to_string());

        client.close(None).await.unwrap();
        wait_for_connected(&dispatcher, 0).await;
    }

    #[tokio::test]
    async fn identify_command_authenticates() {
        let (url, dispatcher) = serve(IDENTIFY_TIMEOUT).await;
        let (sub, token) = issue(SECRET, 3600);

        let (mut client, _) = connect_async(url.as_str()).await.unwrap();
        let identify = serde_json::json!({ "command": "identify", "data": { "token": token } });
        client
            .send(ClientMessage::Text(identify.to_string().into()))
            .await
            .unwrap();

        let ready = next_event(&mut client).await;
        assert_eq!(ready["event"], "ready");
        assert_eq!(ready["data"]["user_id"], sub.to_string());
        wait_for_connected(&dispatcher, 1).await;

        dispatcher.broadcast(GatewayEvent::InvoiceDeleted { id: sub });
        assert_eq!(next_event(&mut client).await["event"], "invoice_deleted");
    }

    #[tokio::test]
    async fn socket_that_never_identifies_is_dropped() {
        let (url, dispatcher) = serve(Duration::from_millis(200)).await;

        let (mut client, _) = connect_async(url.as_str()).await.unwrap();
        assert!(is_closed(&mut client).await);
        assert_eq!(dispatcher.connected().await, 0);

        // An identify carrying a bad token is treated the same
        let (mut client, _) = connect_async(url.as_str()).await.unwrap();
        let identify = serde_json::json!({ "command": "identify", "data": { "token": "garbage" } });
        client
            .send(ClientMessage::Text(identify.to_string().into()))
            .await
            .unwrap();
        assert!(is_closed(&mut client).await);
        assert_eq!(dispatcher.connected().await, 0);
    }

    #[tokio::test]
    async fn bad_query_token_is_refused_before_upgrade() {
        let (url, dispatcher) = serve(IDENTIFY_TIMEOUT).await;
        let (_, token) = issue("some-other-secret", 3600);

        for token in [token.as_str(), "garbage"] {
            match connect_async(format!("{}?token={}", url, token)).await {
                Err(tungstenite::Error::Http(resp)) => {
                    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED)
                }
                Err(e) => panic!("unexpected error: {}", e),
                Ok(_) => panic!("upgrade should have been refused"),
            }
        }
        assert_eq!(dispatcher.connected().await, 0);
    }
}
