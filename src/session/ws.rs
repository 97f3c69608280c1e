//! WebSocket transport.
//!
//! Each socket is a spawned task that owns the tungstenite stream. The
//! engine side ([`WsSocket`]) only queues outgoing text and requests the
//! close; everything the task observes comes back on the shared event
//! channel tagged with the [`SessionId`].

use super::engine::{Connector, Socket, SocketEvent};
use super::SessionId;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

type EventTx = mpsc::UnboundedSender<(SessionId, SocketEvent)>;

/// Opens WebSocket connections. Must be used from within a tokio runtime.
pub struct WsConnector {
    events: EventTx,
}

impl WsConnector {
    /// Create a connector and the receiver for all of its sockets' events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(SessionId, SocketEvent)>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }
}

impl Connector for WsConnector {
    type Socket = WsSocket;

    fn connect(&mut self, id: SessionId, uri: &str, timeout: Duration) -> Result<WsSocket, String> {
        let url = parse_ws_url(uri)?;
        let (outgoing, rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        tokio::spawn(run_socket(
            id,
            url,
            timeout,
            rx,
            self.events.clone(),
            closed.clone(),
        ));
        Ok(WsSocket { outgoing, closed })
    }
}

/// Engine-side handle to a socket task. Dropping it closes the socket.
pub struct WsSocket {
    outgoing: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

impl Socket for WsSocket {
    fn send_text(&mut self, text: &str) -> bool {
        !self.closed.is_cancelled() && self.outgoing.send(text.to_string()).is_ok()
    }

    fn disconnect(&mut self) {
        self.closed.cancel();
    }
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

fn parse_ws_url(uri: &str) -> Result<Url, String> {
    let url = Url::parse(uri).map_err(|e| format!("invalid URI '{}': {}", uri, e))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(format!("unsupported scheme '{}' in '{}'", other, uri)),
    }
}

async fn run_socket(
    id: SessionId,
    url: Url,
    timeout: Duration,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    events: EventTx,
    closed: CancellationToken,
) {
    let emit = |event: SocketEvent| {
        let _ = events.send((id, event));
    };

    let connect = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()));
    let mut ws = tokio::select! {
        _ = closed.cancelled() => return,
        result = connect => match result {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                emit(SocketEvent::ConnectError(e.to_string()));
                return;
            }
            Err(_) => {
                emit(SocketEvent::ConnectError(format!(
                    "connect to {} timed out after {:?}",
                    url, timeout
                )));
                return;
            }
        }
    };
    debug!("{}: websocket open to {}", id, url);
    emit(SocketEvent::Opened);

    loop {
        tokio::select! {
            biased;
            text = outgoing.recv() => match text {
                Some(text) => {
                    if let Err(e) = ws.send(Message::Text(text)).await {
                        emit(SocketEvent::Error(e.to_string()));
                        return;
                    }
                }
                None => break,
            },
            _ = closed.cancelled() => break,
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => emit(SocketEvent::Message(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    emit(SocketEvent::Message(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(Message::Close(_))) | None => {
                    emit(SocketEvent::Closed { by_server: true });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(SocketEvent::Error(e.to_string()));
                    return;
                }
            },
        }
    }

    if let Err(e) = ws.close(None).await {
        warn!("{}: close failed: {}", id, e);
    }
    emit(SocketEvent::Closed { by_server: false });
}
