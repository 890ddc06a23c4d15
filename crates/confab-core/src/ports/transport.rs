//! Transport ports.
//!
//! # Design Rules
//!
//! - The session runtime only ever holds `Arc<dyn TransportSession>`; it
//!   cannot observe which wire protocol is underneath.
//! - `recv` takes `&self`: implementations guard their receive half with a
//!   mutex so the single receive task and teardown can coexist.
//! - Errors crossing this boundary are already mapped into the
//!   [`ClientError`] taxonomy, including the retryable hint.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::wire::{ClientFrame, ServerFrame};

/// One live bidirectional stream.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Enqueue one outbound frame.
    ///
    /// Sends are serialized by the implementation (single-writer contract);
    /// fails with [`ClientError::TransportClosed`] after teardown.
    async fn send(&self, frame: ClientFrame) -> Result<(), ClientError>;

    /// Receive the next inbound frame.
    ///
    /// Returns `Ok(None)` on orderly end of stream.
    async fn recv(&self) -> Result<Option<ServerFrame>, ClientError>;

    /// Half-close the outbound direction.
    async fn close_send(&self) -> Result<(), ClientError>;

    /// Full teardown. Idempotent.
    async fn close(&self) -> Result<(), ClientError>;
}

/// Factory for [`TransportSession`]s.
///
/// The session runtime calls `open` once at start and again on every
/// reconnect; each call performs the protocol-specific setup handshake
/// (sending the setup frame) but leaves the server's acknowledgement in
/// the receive stream for the session state machine to observe.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Establish a fresh stream for `config`.
    async fn open(&self, config: &ClientConfig) -> Result<Arc<dyn TransportSession>, ClientError>;
}
