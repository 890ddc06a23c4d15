//! Binary bidi transport over gRPC.
//!
//! The outbound direction is an `mpsc` channel drained into the request
//! stream — that channel is the single-writer serialization point, and
//! dropping its sender half-closes the stream. The inbound direction is
//! the tonic `Streaming` body, decoded response-by-response into
//! transport-neutral frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use http::uri::PathAndQuery;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tonic::codec::ProstCodec;
use tonic::transport::Channel;

use async_trait::async_trait;
use confab_core::{ClientError, ClientFrame, ServerFrame, TransportSession};

use crate::classify::classify_status;
use crate::credentials::Credentials;
use crate::proto;

/// Default endpoint for the binary bidi service.
pub const DEFAULT_GRPC_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Bound on channel establishment and the streaming-call handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Fully-qualified streaming method path.
const STREAM_METHOD: &str =
    "/google.ai.generativelanguage.v1beta.GenerativeService/BidiGenerateContent";

/// Outbound frames buffered before `send` applies backpressure.
const OUTBOUND_BUFFER: usize = 32;

/// Metadata key carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// One live gRPC bidi session.
pub struct GrpcSession {
    /// `None` after `close_send`; dropping the sender half-closes.
    outbound: Mutex<Option<mpsc::Sender<proto::BidiRequest>>>,
    inbound: Mutex<tonic::Streaming<proto::BidiResponse>>,
    /// Frames decoded from a response but not yet handed to `recv`.
    pending: Mutex<VecDeque<ServerFrame>>,
    closed: AtomicBool,
}

impl GrpcSession {
    /// Establish the channel and open the streaming call.
    ///
    /// With ambient credentials no per-request key metadata is attached;
    /// channel-level auth is the platform layer's concern.
    pub async fn connect(endpoint: &str, credentials: &Credentials) -> Result<Self, ClientError> {
        tracing::info!(endpoint, "Connecting binary bidi transport");

        let channel = Channel::from_shared(endpoint.to_string())
            .map_err(|e| ClientError::Config(format!("invalid endpoint '{endpoint}': {e}")))?
            .connect_timeout(HANDSHAKE_TIMEOUT)
            .connect()
            .await
            .map_err(|e| {
                ClientError::TransportInit(format!("channel to {endpoint} failed: {e}")).demoted()
            })?;

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| ClientError::TransportInit(format!("service not ready: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut request = Request::new(ReceiverStream::new(outbound_rx));
        if let Some(key) = credentials.api_key() {
            let value = key
                .parse()
                .map_err(|_| ClientError::Auth("API key is not valid header metadata".into()))?;
            request.metadata_mut().insert(API_KEY_HEADER, value);
        }

        let codec: ProstCodec<proto::BidiRequest, proto::BidiResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(STREAM_METHOD);

        let response =
            tokio::time::timeout(HANDSHAKE_TIMEOUT, grpc.streaming(request, path, codec))
                .await
                .map_err(|_| ClientError::Timeout {
                    context: "binary bidi handshake".into(),
                    elapsed: HANDSHAKE_TIMEOUT,
                    retryable: true,
                })?
                .map_err(|status| classify_status(&status))?;

        Ok(Self {
            outbound: Mutex::new(Some(outbound_tx)),
            inbound: Mutex::new(response.into_inner()),
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl TransportSession for GrpcSession {
    async fn send(&self, frame: ClientFrame) -> Result<(), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::TransportClosed);
        }
        let guard = self.outbound.lock().await;
        let Some(tx) = guard.as_ref() else {
            return Err(ClientError::TransportClosed);
        };
        tx.send(proto::encode_request(&frame))
            .await
            .map_err(|_| ClientError::TransportClosed)
    }

    async fn recv(&self) -> Result<Option<ServerFrame>, ClientError> {
        loop {
            if let Some(frame) = self.pending.lock().await.pop_front() {
                return Ok(Some(frame));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }

            let next = { self.inbound.lock().await.message().await };
            match next {
                Ok(Some(response)) => {
                    let frames = proto::decode_response(response);
                    if frames.is_empty() {
                        tracing::debug!("Dropping empty server response");
                        continue;
                    }
                    self.pending.lock().await.extend(frames);
                }
                Ok(None) => return Ok(None),
                Err(status) => {
                    if self.closed.load(Ordering::SeqCst) {
                        return Ok(None);
                    }
                    return Err(classify_status(&status));
                }
            }
        }
    }

    async fn close_send(&self) -> Result<(), ClientError> {
        // Dropping the sender ends the request stream.
        self.outbound.lock().await.take();
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.outbound.lock().await.take();
        Ok(())
    }
}
