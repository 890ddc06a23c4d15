//! WebSocket JSON transport.
//!
//! Messages are UTF-8 JSON. Some deployments deliver every message —
//! including JSON control messages like `setupComplete` — in *Binary*
//! frames, so the receive path treats a `{`-prefixed binary payload as
//! JSON before dismissing it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use async_trait::async_trait;
use confab_core::{ClientError, ClientFrame, ServerFrame, TransportSession};

use crate::classify::{classify_close_code, classify_ws_error};
use crate::credentials::Credentials;
use crate::json::{decode_server_message, encode_client_frame};

/// Default endpoint for the bidirectional generate-content service.
pub const DEFAULT_WS_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Bound on the WebSocket connection handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One live WebSocket session.
pub struct WsSession {
    sink: Mutex<WsSink>,
    stream: Mutex<WsStream>,
    /// Frames decoded from an envelope but not yet handed to `recv`.
    pending: Mutex<VecDeque<ServerFrame>>,
    closed: AtomicBool,
}

impl WsSession {
    /// Connect to `endpoint` and complete the WebSocket upgrade.
    ///
    /// The setup frame is *not* sent here; the session's send pipeline
    /// emits it as the first outbound frame.
    pub async fn connect(
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Self, ClientError> {
        let key = credentials.api_key().ok_or_else(|| {
            ClientError::Auth("the WebSocket transport requires an API key".into())
        })?;
        let url = format!("{endpoint}?key={key}");

        tracing::info!(endpoint, "Connecting WebSocket transport");

        let connect = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(&url)).await;
        let (ws, _response) = match connect {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(classify_ws_error(&e)),
            Err(_) => {
                return Err(ClientError::Timeout {
                    context: "WebSocket handshake".into(),
                    elapsed: HANDSHAKE_TIMEOUT,
                    retryable: true,
                });
            }
        };

        let (sink, stream) = ws.split();
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        })
    }

    async fn send_message(&self, message: WsMessage) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::TransportClosed);
        }
        let mut sink = self.sink.lock().await;
        sink.send(message).await.map_err(|e| classify_ws_error(&e))
    }

    /// Decode one wire payload, queueing every frame it carried.
    async fn absorb_payload(&self, text: &str) -> Result<(), ClientError> {
        match decode_server_message(text) {
            Ok(frames) => {
                self.pending.lock().await.extend(frames);
                Ok(())
            }
            // Malformed frames are logged and dropped; the session continues.
            Err(ClientError::Protocol(message)) => {
                tracing::warn!(%message, "Dropping malformed server message");
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

#[async_trait]
impl TransportSession for WsSession {
    async fn send(&self, frame: ClientFrame) -> Result<(), ClientError> {
        let message = match &frame {
            // Keepalive is a protocol-level ping on this transport.
            ClientFrame::Ping => WsMessage::Ping(Vec::new()),
            _ => WsMessage::Text(encode_client_frame(&frame)?),
        };
        self.send_message(message).await
    }

    async fn recv(&self) -> Result<Option<ServerFrame>, ClientError> {
        loop {
            if let Some(frame) = self.pending.lock().await.pop_front() {
                return Ok(Some(frame));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let next = { self.stream.lock().await.next().await };
            match next {
                None => return Ok(None),
                Some(Err(e)) => {
                    if self.closed.load(Ordering::SeqCst) {
                        return Ok(None);
                    }
                    return Err(classify_ws_error(&e));
                }
                Some(Ok(WsMessage::Text(text))) => {
                    self.absorb_payload(&text).await?;
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    // JSON-in-binary: detect and parse before giving up.
                    if data.first() == Some(&b'{') {
                        match std::str::from_utf8(&data) {
                            Ok(text) => self.absorb_payload(text).await?,
                            Err(_) => {
                                tracing::warn!(
                                    len = data.len(),
                                    "Dropping non-UTF-8 binary frame"
                                );
                            }
                        }
                    } else if !data.is_empty() {
                        tracing::warn!(
                            len = data.len(),
                            first_byte = data.first().copied().unwrap_or(0),
                            "Dropping unexpected non-JSON binary frame"
                        );
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    self.closed.store(true, Ordering::SeqCst);
                    let mapped = frame.and_then(|f| classify_close_code(f.code, &f.reason));
                    return match mapped {
                        Some(err) => Err(err),
                        None => Ok(None),
                    };
                }
                // Ping/pong bookkeeping is handled by tungstenite itself.
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close_send(&self) -> Result<(), ClientError> {
        let mut sink = self.sink.lock().await;
        match sink.send(WsMessage::Close(None)).await {
            Ok(()) => Ok(()),
            Err(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed
                | tokio_tungstenite::tungstenite::Error::AlreadyClosed,
            ) => Ok(()),
            Err(e) => Err(classify_ws_error(&e)),
        }
    }

    async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Best-effort close frame; the socket drops with the session.
        let mut sink = self.sink.lock().await;
        let _ = sink.send(WsMessage::Close(None)).await;
        let _ = sink.flush().await;
        Ok(())
    }
}
