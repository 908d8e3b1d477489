//! Chat WebSocket endpoint.
//!
//! Each socket is split in two. The read half runs in the upgrade task: it
//! waits for the `auth` frame, binds the identity, then hands every frame to
//! the hub. The write half runs in its own task and drains the connection's
//! bounded outbound queue, so frames for one client are written one at a time
//! in the order they were queued.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use murmur_core::{ClientFrame, Hub, HubError, Identity, ProtocolError, ServerFrame};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::server::AppState;

/// Create the WebSocket router
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(websocket_handler))
}

/// GET /ws
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    let auth_timeout = Duration::from_secs(state.config.server.auth_timeout_secs);
    let Some(identity) = authenticate(&mut stream, &mut sink, auth_timeout).await else {
        info!("WebSocket closed before authentication");
        let _ = sink.close().await;
        return;
    };

    let (tx, rx) = mpsc::channel(state.config.registry.outbound_capacity);
    let connection = state.presence.connect(identity.clone(), tx).await;
    info!(identity = %identity, connection = %connection, "WebSocket connection authenticated");

    let writer = tokio::spawn(write_frames(sink, rx));

    read_frames(&mut stream, &state.hub, &identity).await;

    state.presence.disconnect(&identity, connection).await;
    state.hub.connection_closed(&identity);

    // Unbinding dropped the registry's sender, so the writer drains and exits.
    if let Err(e) = writer.await {
        warn!(identity = %identity, error = %e, "WebSocket writer task failed");
    }

    info!(identity = %identity, connection = %connection, "WebSocket connection closed");
}

/// Wait for a valid `auth` frame.
///
/// Anything else is answered with an `error` frame and the wait goes on.
/// Returns `None` if the socket closes or `timeout` elapses first.
async fn authenticate<S, K, E>(stream: &mut S, sink: &mut K, timeout: Duration) -> Option<Identity>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    K: Sink<Message> + Unpin,
    K::Error: Display,
    E: Display,
{
    let wait = async {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "WebSocket error before authentication");
                    return None;
                }
            };

            let rejection = match ClientFrame::decode(&text) {
                Ok(ClientFrame::Auth { user_id }) if !user_id.as_str().trim().is_empty() => {
                    return Some(user_id);
                }
                Ok(ClientFrame::Auth { .. }) => {
                    ProtocolError::InvalidFrame("userId must not be empty".to_string())
                }
                Ok(_) => ProtocolError::NotAuthenticated,
                Err(e) => e,
            };

            debug!(error = %rejection, "Rejected frame before authentication");
            if !send_frame(sink, &ServerFrame::error(rejection.code(), rejection.to_string())).await
            {
                return None;
            }
        }
        None
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(identity) => identity,
        Err(_) => {
            info!(timeout_secs = timeout.as_secs(), "WebSocket authentication timed out");
            None
        }
    }
}

/// Feed frames from an authenticated client to the hub until the socket closes.
async fn read_frames<S, E>(stream: &mut S, hub: &Hub, identity: &Identity)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match ClientFrame::decode(&text) {
                Ok(frame) => hub.handle(identity, frame).await,
                Err(e) => {
                    debug!(identity = %identity, error = %e, "Malformed frame");
                    hub.report(identity, &HubError::from(e));
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(identity = %identity, "Received binary WebSocket message (not supported)");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(identity = %identity, "WebSocket close requested");
                break;
            }
            Err(e) => {
                debug!(identity = %identity, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Drain the outbound queue into the socket.
async fn write_frames<K>(mut sink: K, mut rx: mpsc::Receiver<ServerFrame>)
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    while let Some(frame) = rx.recv().await {
        if !send_frame(&mut sink, &frame).await {
            break;
        }
    }
    let _ = sink.close().await;
}

// Returns false once the sink is unusable.
async fn send_frame<K>(sink: &mut K, frame: &ServerFrame) -> bool
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let text = match frame.encode() {
        Ok(text) => text,
        Err(e) => {
            error!(frame = frame.name(), error = %e, "Failed to encode frame");
            return true;
        }
    };

    match sink.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            debug!(frame = frame.name(), error = %e, "Failed to send WebSocket message");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::stream;
    use murmur_core::store::MemoryStore;
    use murmur_core::typing::DEFAULT_TYPING_EXPIRY;
    use murmur_core::ConnectionRegistry;

    type Incoming = Result<Message, std::io::Error>;

    fn text(json: &str) -> Incoming {
        Ok(Message::Text(json.to_string()))
    }

    fn decode_sent(message: Message) -> ServerFrame {
        match message {
            Message::Text(text) => ServerFrame::decode(&text).unwrap(),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    fn error_code(frame: ServerFrame) -> String {
        match frame {
            ServerFrame::Error { code, .. } => code,
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_binds_identity() {
        let mut incoming = stream::iter(vec![text(r#"{"type":"auth","userId":"alice"}"#)]);
        let (mut sink, mut sent) = fmpsc::unbounded();

        let identity = authenticate(&mut incoming, &mut sink, Duration::from_secs(10)).await;

        assert_eq!(identity, Some(Identity::new("alice")));
        drop(sink);
        assert!(sent.next().await.is_none());
    }

    #[tokio::test]
    async fn test_frames_before_auth_are_rejected() {
        let mut incoming = stream::iter(vec![
            text(r#"{"type":"typing","toUserId":"bob","isTyping":true}"#),
            text("not json"),
            text(r#"{"type":"auth","userId":"  "}"#),
            text(r#"{"type":"auth","userId":"alice"}"#),
        ]);
        let (mut sink, sent) = fmpsc::unbounded();

        let identity = authenticate(&mut incoming, &mut sink, Duration::from_secs(10)).await;
        assert_eq!(identity, Some(Identity::new("alice")));
        drop(sink);

        let codes: Vec<String> = sent
            .map(|m| error_code(decode_sent(m)))
            .collect()
            .await;
        assert_eq!(
            codes,
            vec!["not-authenticated", "malformed-frame", "invalid-frame"]
        );
    }

    #[tokio::test]
    async fn test_close_before_auth() {
        let mut incoming = stream::iter(vec![Incoming::Ok(Message::Close(None))]);
        let (mut sink, _sent) = fmpsc::unbounded();

        assert_eq!(
            authenticate(&mut incoming, &mut sink, Duration::from_secs(10)).await,
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_times_out() {
        let mut incoming = stream::pending::<Incoming>();
        let (mut sink, _sent) = fmpsc::unbounded();

        assert_eq!(
            authenticate(&mut incoming, &mut sink, Duration::from_secs(10)).await,
            None
        );
    }

    #[tokio::test]
    async fn test_read_frames_reports_malformed_and_keeps_going() {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::new(registry.clone(), store.clone(), DEFAULT_TYPING_EXPIRY);
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        store.add_friendship(&alice, &bob).await;

        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        registry.bind(alice.clone(), tx_a);
        registry.bind(bob.clone(), tx_b);

        let mut incoming = stream::iter(vec![
            text(r#"{"type":"nonsense"}"#),
            Ok(Message::Binary(vec![1, 2, 3])),
            text(r#"{"type":"send-message","toUserId":"bob","content":"still here"}"#),
        ]);
        read_frames(&mut incoming, &hub, &alice).await;

        assert_eq!(error_code(rx_a.recv().await.unwrap()), "malformed-frame");
        match rx_b.recv().await.unwrap() {
            ServerFrame::NewMessage { content, .. } => assert_eq!(content, "still here"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writer_preserves_order_and_closes() {
        let (tx, rx) = mpsc::channel(8);
        let (sink, sent) = fmpsc::unbounded();

        tx.send(ServerFrame::error("a", "first")).await.unwrap();
        tx.send(ServerFrame::error("b", "second")).await.unwrap();
        drop(tx);

        write_frames(sink, rx).await;

        let codes: Vec<String> = sent
            .map(|m| error_code(decode_sent(m)))
            .collect()
            .await;
        assert_eq!(codes, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_writer_stops_when_socket_is_gone() {
        let (tx, rx) = mpsc::channel(8);
        let (sink, sent) = fmpsc::unbounded::<Message>();
        drop(sent);

        tx.send(ServerFrame::error("a", "lost")).await.unwrap();
        write_frames(sink, rx).await;

        // The receiver was dropped along with the writer.
        assert!(tx.is_closed());
    }
}
