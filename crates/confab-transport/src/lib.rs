//! Wire transports for the confab streaming client.
//!
//! Two implementations of the `TransportSession` port — a gRPC binary
//! bidi stream and a WebSocket JSON stream — plus the pieces every
//! connection needs: credential resolution, transport selection, error
//! classification, and the retry/backoff engine.

pub mod backoff;
pub mod classify;
pub mod connector;
pub mod credentials;
pub mod grpc;
mod json;
mod proto;
pub mod ws;

pub use backoff::RetryPolicy;
pub use classify::{classify_close_code, classify_http_status, classify_status, classify_ws_error};
pub use connector::{ServiceConnector, TransportKind, select_transport};
pub use credentials::{CredentialResolver, Credentials, DEFAULT_ENV_KEYS};
pub use grpc::{DEFAULT_GRPC_ENDPOINT, GrpcSession};
pub use ws::{DEFAULT_WS_ENDPOINT, HANDSHAKE_TIMEOUT, WsSession};
