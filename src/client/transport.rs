//! WebSocket transport.
//!
//! A pump task owns the socket. Outbound frames travel through an ordered
//! channel so anything queued before `close()` is flushed ahead of the close
//! frame. Inbound traffic is reported as [`TransportEvent`]s on a channel the
//! connection task consumes in arrival order.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, WebSocketStream};

use crate::client::ClientError;
use crate::protocol::Outbound;

/// Close code reported when the socket ends without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// How long `join()` waits for queued frames and the close frame to flush.
pub const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Events raised by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket is open.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The socket failed; no further events follow.
    Error(String),
    /// The peer closed the socket; no further events follow.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason sent by the peer.
        reason: String,
    },
}

/// Receiving half of a transport.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[derive(Debug)]
pub(crate) enum Frame {
    Text(String),
    Close,
}

/// Cloneable sending handle for a transport.
#[derive(Debug, Clone)]
pub struct TransportSender {
    frames: mpsc::UnboundedSender<Frame>,
    open: Arc<AtomicBool>,
}

impl TransportSender {
    /// Serializes and queues a message.
    ///
    /// Returns `false` (after logging an error) when the transport is not
    /// open; never panics into the caller.
    pub fn send(&self, message: &Outbound) -> bool {
        if !self.is_open() {
            tracing::error!(
                kind = message.kind(),
                id = ?message.id(),
                "cannot send message: transport is not open"
            );
            return false;
        }

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(kind = message.kind(), "failed to encode message: {}", e);
                return false;
            }
        };

        if self.frames.send(Frame::Text(text)).is_err() {
            self.open.store(false, Ordering::SeqCst);
            tracing::error!(kind = message.kind(), "cannot send message: transport task has exited");
            return false;
        }

        tracing::trace!(kind = message.kind(), id = ?message.id(), "queued message");
        true
    }

    /// Whether the transport still accepts messages.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Exclusive owner of one duplex connection.
#[derive(Debug)]
pub struct Transport {
    sender: TransportSender,
    pump: Option<JoinHandle<()>>,
}

impl Transport {
    /// Opens a WebSocket to `address`.
    ///
    /// The first event on the returned receiver is always
    /// [`TransportEvent::Open`].
    ///
    /// # Errors
    ///
    /// * `ClientError::InvalidAddress` if `address` is not a `ws://`/`wss://` URL.
    /// * `ClientError::Transport` if the socket or the upgrade fails.
    pub async fn open(address: &str) -> Result<(Self, TransportEvents), ClientError> {
        let (socket, _response) = connect_async(address).await.map_err(|e| match e {
            tungstenite::Error::Url(reason) => ClientError::InvalidAddress {
                address: address.to_string(),
                reason: reason.to_string(),
            },
            other => ClientError::Transport(other.to_string()),
        })?;

        tracing::debug!(address, "websocket open");
        Ok(Self::spawn(socket))
    }

    /// Wraps an already-upgraded WebSocket stream.
    pub fn spawn<S>(socket: WebSocketStream<S>) -> (Self, TransportEvents)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let _ = events_tx.send(TransportEvent::Open);
        let pump = tokio::spawn(pump(socket, frames_rx, events_tx, Arc::clone(&open)));

        let transport = Self {
            sender: TransportSender {
                frames: frames_tx,
                open,
            },
            pump: Some(pump),
        };
        (transport, events_rx)
    }

    /// In-process transport with no socket behind it.
    #[cfg(test)]
    pub(crate) fn loopback() -> (Self, TransportEvents, Loopback) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(TransportEvent::Open);

        let transport = Self {
            sender: TransportSender {
                frames: frames_tx,
                open: Arc::new(AtomicBool::new(true)),
            },
            pump: None,
        };
        let peer = Loopback {
            events: events_tx,
            frames: frames_rx,
            closed: false,
        };
        (transport, events_rx, peer)
    }

    /// A sending handle sharing this transport's channel.
    pub fn sender(&self) -> TransportSender {
        self.sender.clone()
    }

    /// Queues a message. See [`TransportSender::send`].
    pub fn send(&self, message: &Outbound) -> bool {
        self.sender.send(message)
    }

    /// Whether the transport still accepts messages.
    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Stops the transport. Safe to call more than once.
    pub fn close(&mut self) {
        if self.sender.open.swap(false, Ordering::SeqCst) {
            tracing::debug!("closing transport");
            let _ = self.sender.frames.send(Frame::Close);
        }
    }

    /// Waits for the pump task to finish flushing and exit.
    ///
    /// A peer that stops reading cannot hold this up for longer than
    /// [`CLOSE_FLUSH_TIMEOUT`]; the pump is aborted after that.
    pub async fn join(&mut self) {
        if let Some(mut pump) = self.pump.take() {
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut pump).await.is_err() {
                tracing::warn!(
                    "websocket did not flush within {:?}, dropping it",
                    CLOSE_FLUSH_TIMEOUT
                );
                pump.abort();
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump<S>(
    socket: WebSocketStream<S>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::error!("websocket send failed: {}", e);
                        open.store(false, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Frame::Close) | None => {
                    let flush = async {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                    };
                    let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await;
                    break;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    open.store(false, Ordering::SeqCst);
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((ABNORMAL_CLOSE, String::new()));
                    tracing::debug!(code, %reason, "peer closed websocket");
                    let _ = events.send(TransportEvent::Close { code, reason });
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("websocket receive failed: {}", e);
                    open.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    open.store(false, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Close {
                        code: ABNORMAL_CLOSE,
                        reason: String::new(),
                    });
                    break;
                }
            },
        }
    }
}

/// Test-side peer of a loopback transport.
#[cfg(test)]
pub(crate) struct Loopback {
    events: mpsc::UnboundedSender<TransportEvent>,
    frames: mpsc::UnboundedReceiver<Frame>,
    closed: bool,
}

#[cfg(test)]
impl Loopback {
    /// Delivers a JSON message as an inbound text frame.
    pub fn push(&self, message: serde_json::Value) {
        let _ = self.events.send(TransportEvent::Message(message.to_string()));
    }

    /// Delivers a raw inbound text frame.
    pub fn push_raw(&self, raw: &str) {
        let _ = self.events.send(TransportEvent::Message(raw.to_string()));
    }

    /// Simulates a transport failure.
    pub fn fail(&self, cause: &str) {
        let _ = self.events.send(TransportEvent::Error(cause.to_string()));
    }

    /// Simulates a clean close by the hub.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.events.send(TransportEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next message the client sent, waiting up to one second.
    pub async fn next_sent(&mut self) -> Option<serde_json::Value> {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), self.frames.recv())
            .await
            .ok()??;
        match frame {
            Frame::Text(text) => serde_json::from_str(&text).ok(),
            Frame::Close => {
                self.closed = true;
                None
            }
        }
    }

    /// Every message sent so far, without waiting.
    pub fn drain_sent(&mut self) -> Vec<serde_json::Value> {
        let mut sent = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            match frame {
                Frame::Text(text) => {
                    if let Ok(value) = serde_json::from_str(&text) {
                        sent.push(value);
                    }
                }
                Frame::Close => self.closed = true,
            }
        }
        sent
    }

    /// Whether the client closed the transport.
    pub fn was_closed(&mut self) -> bool {
        self.drain_sent();
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_starts_with_open_event() {
        let (_transport, mut events, _peer) = Transport::loopback();
        assert_eq!(events.recv().await, Some(TransportEvent::Open));
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (transport, _events, mut peer) = Transport::loopback();
        assert!(transport.send(&Outbound::GetStates { id: 1 }));
        let sent = peer.next_sent().await.expect("message should arrive");
        assert_eq!(sent["type"], "get_states");
        assert_eq!(sent["id"], 1);
    }

    #[tokio::test]
    async fn test_send_after_close_is_refused() {
        let (mut transport, _events, mut peer) = Transport::loopback();
        let sender = transport.sender();
        transport.close();

        assert!(!transport.is_open());
        assert!(!sender.send(&Outbound::GetStates { id: 1 }));
        assert!(peer.was_closed());
        assert!(peer.drain_sent().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut transport, _events, mut peer) = Transport::loopback();
        transport.close();
        transport.close();
        drop(transport);

        let mut closes = 0;
        while let Ok(frame) = peer.frames.try_recv() {
            if matches!(frame, Frame::Close) {
                closes += 1;
            }
        }
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn test_queued_frames_precede_close() {
        let (mut transport, _events, mut peer) = Transport::loopback();
        transport.send(&Outbound::GetStates { id: 1 });
        transport.close();

        assert_eq!(peer.next_sent().await.unwrap()["id"], 1);
        assert!(peer.next_sent().await.is_none());
        assert!(peer.was_closed());
    }

    #[tokio::test]
    async fn test_join_is_bounded_when_peer_stops_reading() {
        use tokio_tungstenite::tungstenite::protocol::Role;

        // The far end is kept alive but never read, so writes stall once
        // the small buffer fills.
        let (near, _far) = tokio::io::duplex(64);
        let socket = WebSocketStream::from_raw_socket(near, Role::Client, None).await;
        let (mut transport, _events) = Transport::spawn(socket);

        let payload = "x".repeat(64 * 1024);
        assert!(transport.send(&Outbound::Auth {
            access_token: payload,
        }));
        transport.close();

        let joined = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT * 3, transport.join()).await;
        assert!(joined.is_ok(), "join must give up on a stalled peer");
    }

    #[tokio::test]
    async fn test_open_rejects_non_websocket_scheme() {
        let result = Transport::open("http://127.0.0.1/api/websocket").await;
        match result {
            Err(ClientError::InvalidAddress { address, .. }) => {
                assert_eq!(address, "http://127.0.0.1/api/websocket");
            }
            other => panic!("expected InvalidAddress, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_open_reports_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Transport::open(&format!("ws://{}/api/websocket", addr)).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
